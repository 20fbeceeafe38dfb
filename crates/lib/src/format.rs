//! Markdown-lite to HTML for chat bubbles.
//!
//! Applied once, when a message is laid out for display; stored text stays plain.
//! Input is HTML-escaped first, so running this on its own output double-escapes.

use regex::Regex;
use std::sync::OnceLock;

struct Rules {
    paragraph_break: Regex,
    bold: Regex,
    italic: Regex,
    url: Regex,
    bullet: Regex,
    numbered: Regex,
}

fn rules() -> &'static Rules {
    static RULES: OnceLock<Rules> = OnceLock::new();
    RULES.get_or_init(|| Rules {
        paragraph_break: Regex::new(r"\n\s*\n").expect("paragraph regex"),
        bold: Regex::new(r"\*\*([^*\n]+?)\*\*").expect("bold regex"),
        italic: Regex::new(r"\*([^*\n]+?)\*").expect("italic regex"),
        // Runs on escaped text: `&amp;` stays inside a URL, any other entity ends it.
        url: Regex::new(r#"https?://(?:[^\s<>"&]|&amp;)*(?:[^\s<>"&.,;:!?)]|&amp;)"#)
            .expect("url regex"),
        bullet: Regex::new(r"^\s*(?:•|-)\s+(.*)$").expect("bullet regex"),
        numbered: Regex::new(r"^\s*\d+[.)]\s+(.*)$").expect("numbered regex"),
    })
}

/// Escape the characters that matter inside HTML text and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Inline rules on one escaped line: bold, italic, then bare URLs.
fn inline(line: &str) -> String {
    let r = rules();
    let line = r.bold.replace_all(line, "<strong>$1</strong>");
    let line = r.italic.replace_all(&line, "<em>$1</em>");
    r.url
        .replace_all(&line, r#"<a href="$0" target="_blank" rel="noopener noreferrer">$0</a>"#)
        .into_owned()
}

#[derive(Clone, Copy, PartialEq)]
enum ListKind {
    Bullet,
    Numbered,
}

impl ListKind {
    fn tag(self) -> &'static str {
        match self {
            ListKind::Bullet => "ul",
            ListKind::Numbered => "ol",
        }
    }
}

fn list_item(line: &str) -> Option<(ListKind, &str)> {
    let r = rules();
    if let Some(c) = r.bullet.captures(line) {
        return c.get(1).map(|m| (ListKind::Bullet, m.as_str()));
    }
    r.numbered
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| (ListKind::Numbered, m.as_str()))
}

/// One paragraph: runs of list lines become lists, other lines become `<p>` with `<br />`.
fn paragraph(block: &str, out: &mut String) {
    let mut text_lines: Vec<String> = Vec::new();
    let mut list: Option<(ListKind, Vec<String>)> = None;

    fn flush_text(lines: &mut Vec<String>, out: &mut String) {
        if !lines.is_empty() {
            out.push_str("<p>");
            out.push_str(&lines.join("<br />"));
            out.push_str("</p>");
            lines.clear();
        }
    }
    fn flush_list(list: &mut Option<(ListKind, Vec<String>)>, out: &mut String) {
        if let Some((kind, items)) = list.take() {
            out.push_str(&format!("<{}>", kind.tag()));
            for item in items {
                out.push_str("<li>");
                out.push_str(&item);
                out.push_str("</li>");
            }
            out.push_str(&format!("</{}>", kind.tag()));
        }
    }

    for line in block.lines() {
        match list_item(line) {
            Some((kind, item)) => {
                flush_text(&mut text_lines, out);
                let continues = matches!(&list, Some((k, _)) if *k == kind);
                if !continues {
                    flush_list(&mut list, out);
                    list = Some((kind, Vec::new()));
                }
                if let Some((_, items)) = list.as_mut() {
                    items.push(inline(item));
                }
            }
            None => {
                flush_list(&mut list, out);
                let line = line.trim();
                if !line.is_empty() {
                    text_lines.push(inline(line));
                }
            }
        }
    }
    flush_list(&mut list, out);
    flush_text(&mut text_lines, out);
}

/// Render plain reply text as bubble HTML.
pub fn to_html(text: &str) -> String {
    let escaped = escape_html(text.trim());
    let mut out = String::new();
    for block in rules().paragraph_break.split(&escaped) {
        if !block.trim().is_empty() {
            paragraph(block, &mut out);
        }
    }
    out
}
