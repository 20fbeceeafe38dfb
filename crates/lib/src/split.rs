//! Card splitter: breaks a long reply into display cards of bounded length.
//!
//! Paragraphs (blank-line separated) are packed greedily into cards joined by a blank
//! line. A paragraph longer than the limit is packed sentence by sentence instead,
//! sentences joined by a single space. A lone sentence longer than the limit is
//! emitted whole. Lengths are counted in chars.

use regex::Regex;
use std::sync::OnceLock;

const PARAGRAPH_SEP: &str = "\n\n";
const SENTENCE_SEP: &str = " ";

fn paragraph_break() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\n+").expect("paragraph regex"))
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split into sentences at each space preceded by '.', '?' or '!'. The space is dropped.
pub fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;
    for (i, c) in paragraph.char_indices() {
        if c == ' ' && matches!(prev, Some('.' | '?' | '!')) {
            out.push(&paragraph[start..i]);
            start = i + c.len_utf8();
        }
        prev = Some(c);
    }
    out.push(&paragraph[start..]);
    out
}

/// Greedy packer: joins pieces with `sep` while the card stays within `limit`.
struct Packer {
    limit: usize,
    cards: Vec<String>,
    current: String,
}

impl Packer {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            cards: Vec::new(),
            current: String::new(),
        }
    }

    fn push(&mut self, piece: &str, sep: &str) {
        if self.current.is_empty() {
            self.current.push_str(piece);
            return;
        }
        if char_len(&self.current) + char_len(sep) + char_len(piece) > self.limit {
            self.flush();
            self.current.push_str(piece);
        } else {
            self.current.push_str(sep);
            self.current.push_str(piece);
        }
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.cards.push(std::mem::take(&mut self.current));
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.cards
    }
}

/// Split `text` into cards of at most `limit` chars (see module docs for the rules).
/// Text within the limit comes back as a single card, unchanged.
pub fn split_long_message(text: &str, limit: usize) -> Vec<String> {
    if char_len(text) <= limit {
        return vec![text.to_string()];
    }
    let mut packer = Packer::new(limit);
    for paragraph in paragraph_break().split(text) {
        if paragraph.is_empty() {
            continue;
        }
        if char_len(paragraph) <= limit {
            packer.push(paragraph, PARAGRAPH_SEP);
            continue;
        }
        // Oversized paragraph: close the open card, then pack its sentences. The last
        // sentence group stays open so a following short paragraph can join it.
        packer.flush();
        for sentence in split_sentences(paragraph) {
            packer.push(sentence, SENTENCE_SEP);
        }
    }
    packer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 250;

    fn sentence(n: usize, len: usize) -> String {
        let body: String = std::iter::repeat('a').take(len.saturating_sub(3)).collect();
        format!("{}{}.", n, body)
    }

    /// True when `text` is exactly the cards in order, with one removed separator
    /// (a blank line or a space) between neighbours.
    fn covers_exactly(cards: &[String], text: &str) -> bool {
        let mut rest = text;
        for (i, card) in cards.iter().enumerate() {
            if i > 0 {
                rest = match rest
                    .strip_prefix(PARAGRAPH_SEP)
                    .or_else(|| rest.strip_prefix(SENTENCE_SEP))
                {
                    Some(r) => r,
                    None => return false,
                };
            }
            rest = match rest.strip_prefix(card.as_str()) {
                Some(r) => r,
                None => return false,
            };
        }
        rest.is_empty()
    }

    #[test]
    fn short_text_is_single_card() {
        let text = "O valor varia.";
        assert_eq!(split_long_message(text, LIMIT), vec![text.to_string()]);
        let exact = "b".repeat(LIMIT);
        assert_eq!(split_long_message(&exact, LIMIT), vec![exact.clone()]);
    }

    #[test]
    fn paragraphs_pack_within_limit() {
        let p1 = "p".repeat(120);
        let p2 = "q".repeat(120);
        let p3 = "r".repeat(120);
        let text = format!("{}\n\n{}\n\n{}", p1, p2, p3);
        let cards = split_long_message(&text, LIMIT);
        assert_eq!(cards, vec![format!("{}\n\n{}", p1, p2), p3]);
        assert!(cards.iter().all(|c| c.chars().count() <= LIMIT));
        assert!(covers_exactly(&cards, &text), "{:?}", cards);
    }

    #[test]
    fn separator_counts_toward_limit() {
        let p1 = "p".repeat(124);
        let p2 = "q".repeat(125);
        let text = format!("{}\n\n{}", p1, p2);
        // 124 + 2 + 125 = 251 > 250
        assert_eq!(split_long_message(&text, LIMIT), vec![p1, p2]);
    }

    #[test]
    fn long_paragraph_splits_on_sentences() {
        let sentences: Vec<String> = (0..6).map(|i| sentence(i, 100)).collect();
        let paragraph = sentences.join(" ");
        let cards = split_long_message(&paragraph, LIMIT);
        assert_eq!(cards.len(), 3);
        assert!(cards.iter().all(|c| c.chars().count() <= LIMIT));
        assert_eq!(cards[0], format!("{} {}", sentences[0], sentences[1]));
        assert!(covers_exactly(&cards, &paragraph), "{:?}", cards);
    }

    #[test]
    fn long_paragraph_after_short_one_still_splits() {
        let intro = "Olá!".to_string();
        let long: Vec<String> = (0..4).map(|i| sentence(i, 100)).collect();
        let text = format!("{}\n\n{}", intro, long.join(" "));
        let cards = split_long_message(&text, LIMIT);
        assert_eq!(cards[0], intro);
        assert!(cards.iter().all(|c| c.chars().count() <= LIMIT));
        assert!(covers_exactly(&cards, &text), "{:?}", cards);
    }

    #[test]
    fn question_and_exclamation_end_sentences() {
        assert_eq!(
            split_sentences("Quanto custa? Depende! Veja. ok"),
            vec!["Quanto custa?", "Depende!", "Veja.", "ok"]
        );
        assert_eq!(split_sentences("v1.2 é a versão"), vec!["v1.2 é a versão"]);
    }

    #[test]
    fn unsplittable_sentence_is_emitted_whole() {
        let giant = "x".repeat(LIMIT + 40);
        let text = format!("Curta. {}", giant);
        let cards = split_long_message(&text, LIMIT);
        assert_eq!(cards, vec!["Curta.".to_string(), giant]);
    }

    #[test]
    fn counts_chars_not_bytes() {
        let text = "é".repeat(LIMIT);
        assert_eq!(split_long_message(&text, LIMIT).len(), 1);
    }

    #[test]
    fn splitting_is_deterministic() {
        let text = (0..20).map(|i| sentence(i, 60)).collect::<Vec<_>>().join(" ");
        assert_eq!(split_long_message(&text, 200), split_long_message(&text, 200));
    }

    #[test]
    fn extra_blank_lines_collapse() {
        let p = "z".repeat(200);
        let text = format!("{}\n\n\n\n{}", p, p);
        assert_eq!(split_long_message(&text, LIMIT), vec![p.clone(), p]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn sentence_text() -> impl Strategy<Value = String> {
            (
                prop::collection::vec("[a-zé]{1,12}", 1..15),
                prop::sample::select(vec!['.', '?', '!']),
            )
                .prop_map(|(words, end)| format!("{}{}", words.join(" "), end))
        }

        fn paragraph_text() -> impl Strategy<Value = String> {
            prop::collection::vec(sentence_text(), 1..6).prop_map(|s| s.join(" "))
        }

        fn reply_text() -> impl Strategy<Value = String> {
            prop::collection::vec(paragraph_text(), 1..5).prop_map(|p| p.join("\n\n"))
        }

        proptest! {
            #[test]
            fn text_within_limit_is_untouched(text in "\\PC{0,200}", extra in 0usize..50) {
                let limit = text.chars().count() + extra;
                prop_assert_eq!(split_long_message(&text, limit), vec![text.clone()]);
            }

            #[test]
            fn cards_fit_unless_a_lone_sentence(text in reply_text(), limit in 40usize..300) {
                for card in split_long_message(&text, limit) {
                    prop_assert!(!card.is_empty());
                    if card.chars().count() > limit {
                        prop_assert_eq!(split_sentences(&card).len(), 1, "{:?}", card);
                        prop_assert!(!card.contains(PARAGRAPH_SEP));
                    }
                }
            }

            #[test]
            fn cards_rebuild_the_reply(text in reply_text(), limit in 40usize..300) {
                let cards = split_long_message(&text, limit);
                prop_assert!(covers_exactly(&cards, &text), "{:?}", cards);
            }

            #[test]
            fn same_input_same_cards(text in reply_text(), limit in 40usize..300) {
                prop_assert_eq!(split_long_message(&text, limit), split_long_message(&text, limit));
            }
        }
    }
}
