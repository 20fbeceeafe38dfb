//! Reply text extraction from webhook payloads of unknown shape.
//!
//! Automation backends answer with several different JSON envelopes. Extraction runs
//! an ordered table of shape probes; the first non-empty string wins. When no probe
//! matches, a best-effort scan picks the longest string in the payload that is longer
//! than [`HEURISTIC_MIN_CHARS`]. The scan can pick unrelated text (e.g. an echoed
//! field) from an unexpected payload.

use serde_json::Value;

/// Strings at or below this length are never picked by the fallback scan.
pub const HEURISTIC_MIN_CHARS: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("reply body is not valid json: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("no reply text found in payload")]
    NoTextFound,
}

/// How a probe locates its candidate string.
#[derive(Debug, Clone, Copy)]
enum Locator {
    /// JSON pointer (RFC 6901) into the payload.
    Pointer(&'static str),
    /// First entry of `result.artifacts` whose `parts[0].text` is non-empty.
    FirstArtifactText,
    /// `parts[0].text` of the last `result.history` entry with role "agent".
    LastAgentTurnText,
}

/// One shape-specific extraction attempt.
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    pub name: &'static str,
    locator: Locator,
}

/// Probes in priority order.
pub const PROBES: &[Probe] = &[
    Probe { name: "output", locator: Locator::Pointer("/output") },
    Probe { name: "response", locator: Locator::Pointer("/response") },
    Probe { name: "resposta", locator: Locator::Pointer("/resposta") },
    Probe { name: "[0].resposta", locator: Locator::Pointer("/0/resposta") },
    Probe { name: "[0].output", locator: Locator::Pointer("/0/output") },
    Probe { name: "[0].response", locator: Locator::Pointer("/0/response") },
    Probe {
        name: "result.status.message",
        locator: Locator::Pointer("/result/status/message/parts/0/text"),
    },
    Probe { name: "result.artifacts", locator: Locator::FirstArtifactText },
    Probe { name: "result.history", locator: Locator::LastAgentTurnText },
];

fn non_empty_str(v: Option<&Value>) -> Option<&str> {
    v.and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

impl Probe {
    /// Candidate text for this probe, if the payload has this shape.
    pub fn apply<'a>(&self, payload: &'a Value) -> Option<&'a str> {
        match self.locator {
            Locator::Pointer(p) => non_empty_str(payload.pointer(p)),
            Locator::FirstArtifactText => payload
                .pointer("/result/artifacts")
                .and_then(Value::as_array)?
                .iter()
                .find_map(|a| non_empty_str(a.pointer("/parts/0/text"))),
            Locator::LastAgentTurnText => payload
                .pointer("/result/history")
                .and_then(Value::as_array)?
                .iter()
                .rev()
                .find(|turn| turn.get("role").and_then(Value::as_str) == Some("agent"))
                .and_then(|turn| non_empty_str(turn.pointer("/parts/0/text"))),
        }
    }
}

/// Longest string anywhere in `value` with more than `min_chars` characters.
/// Ties keep the first one in document order.
pub fn longest_string(value: &Value, min_chars: usize) -> Option<&str> {
    fn walk<'a>(v: &'a Value, min_chars: usize, best: &mut Option<(&'a str, usize)>) {
        match v {
            Value::String(s) => {
                let len = s.trim().chars().count();
                if len > min_chars && best.map_or(true, |(_, b)| len > b) {
                    *best = Some((s.as_str(), len));
                }
            }
            Value::Array(items) => items.iter().for_each(|i| walk(i, min_chars, best)),
            Value::Object(map) => map.values().for_each(|i| walk(i, min_chars, best)),
            _ => {}
        }
    }
    let mut best = None;
    walk(value, min_chars, &mut best);
    best.map(|(s, _)| s)
}

/// Text from the first matching probe only (no heuristic scan).
pub fn probe_text(payload: &Value) -> Option<&str> {
    PROBES.iter().find_map(|probe| {
        let text = probe.apply(payload)?;
        log::debug!("normalize: matched probe {}", probe.name);
        Some(text)
    })
}

/// Extract reply text from a parsed payload: probes first, then the longest-string scan.
pub fn extract_text(payload: &Value) -> Result<String, NormalizeError> {
    if let Some(text) = probe_text(payload) {
        return Ok(text.to_string());
    }
    match longest_string(payload, HEURISTIC_MIN_CHARS) {
        Some(text) => {
            log::debug!("normalize: no probe matched, using longest string heuristic");
            Ok(text.to_string())
        }
        None => Err(NormalizeError::NoTextFound),
    }
}

/// Parse a raw response body and extract its reply text.
pub fn normalize_body(body: &str) -> Result<String, NormalizeError> {
    let payload: Value = serde_json::from_str(body)?;
    extract_text(&payload)
}

/// Like `normalize_body` but never fails: errors become the given fallback texts.
pub fn normalize_or_fallback(body: &str, malformed_fallback: &str, no_text_fallback: &str) -> String {
    match normalize_body(body) {
        Ok(text) => text,
        Err(NormalizeError::MalformedPayload(e)) => {
            log::warn!("normalize: malformed payload: {}", e);
            malformed_fallback.to_string()
        }
        Err(NormalizeError::NoTextFound) => {
            log::warn!("normalize: no text found in payload");
            no_text_fallback.to_string()
        }
    }
}
