//! Deterministic text normalization shared by every extractor.
//!
//! Search runs on the output of [`clean_text`], so the same input must
//! always normalize to the same string.

use regex::Regex;
use std::sync::LazyLock;

static CHAPTER_TITLE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)^chapter\s+\d+[:.\s]*(.*)$").unwrap(),
        Regex::new(r"^\d+\.\s*(.*)$").unwrap(),
    ]
});

static CHAPTER_NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:chapter\s+(\d+)|(\d+)\.)").unwrap());

const MAX_TITLE_WORDS: usize = 15;

/// Collapse whitespace runs, drop control characters, fold typographic quotes to ASCII.
pub fn clean_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;

    for ch in text.chars() {
        let ch = match ch {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{00AB}' | '\u{00BB}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => '\'',
            '\u{00A0}' | '\u{2007}' | '\u{202F}' => ' ',
            // soft hyphen and zero-width marks are invisible in rendered text
            '\u{00AD}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' => continue,
            other => other,
        };

        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if ch.is_control() {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(ch);
    }

    out
}

/// Clean each block and join the non-empty ones with newlines.
pub fn join_blocks<I, S>(blocks: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    blocks
        .into_iter()
        .map(|b| clean_text(b.as_ref()))
        .filter(|b| !b.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Title from the leading "Chapter N: Title" or "N. Title" pattern of a text.
pub fn title_from_text(text: &str) -> Option<String> {
    let first_line = text.lines().map(str::trim).find(|l| !l.is_empty())?;

    for pattern in CHAPTER_TITLE_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(first_line) {
            let rest = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            if rest.is_empty() {
                // "Chapter 3" on its own line is the title
                return Some(limit_words(first_line, MAX_TITLE_WORDS));
            }
            return Some(limit_words(rest, MAX_TITLE_WORDS));
        }
    }
    None
}

pub fn chapter_number(text: &str) -> Option<u32> {
    let caps = CHAPTER_NUMBER_PATTERN.captures(text.trim())?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| m.as_str().parse().ok())
}

/// Title for a chapter whose outline entry has none.
///
/// Tries the first heading of the unit, then a chapter pattern at the start
/// of its text, then falls back to `Chapter <order>`.
pub fn infer_title(heading: Option<&str>, text: &str, order: u32) -> String {
    if let Some(h) = heading.map(clean_text).filter(|h| !h.is_empty()) {
        return limit_words(&h, MAX_TITLE_WORDS);
    }
    if let Some(t) = title_from_text(text) {
        return t;
    }
    format!("Chapter {order}")
}

fn limit_words(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  Hello \n\t  world  "), "Hello world");
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text(" \n "), "");
    }

    #[test]
    fn test_clean_text_strips_controls_and_quotes() {
        assert_eq!(clean_text("a\u{0007}b"), "ab");
        assert_eq!(
            clean_text("\u{201C}It\u{2019}s\u{201D} fine"),
            "\"It's\" fine"
        );
        assert_eq!(clean_text("co\u{00AD}operate"), "cooperate");
    }

    #[test]
    fn test_clean_text_is_idempotent() {
        let once = clean_text(" \u{201C}x\u{201D}\n\n y ");
        assert_eq!(clean_text(&once), once);
    }

    #[test]
    fn test_join_blocks_drops_empty() {
        let text = join_blocks(["First  para", "   ", "Second\npara"]);
        assert_eq!(text, "First para\nSecond para");
    }

    #[test]
    fn test_title_from_text_patterns() {
        assert_eq!(
            title_from_text("Chapter 4: The Return\nIt was late."),
            Some("The Return".to_string())
        );
        assert_eq!(
            title_from_text("12. Endgame\nbody"),
            Some("Endgame".to_string())
        );
        assert_eq!(
            title_from_text("CHAPTER 7\nbody"),
            Some("CHAPTER 7".to_string())
        );
        assert_eq!(title_from_text("Just prose here."), None);
    }

    #[test]
    fn test_chapter_number() {
        assert_eq!(chapter_number("Chapter 12 Begins"), Some(12));
        assert_eq!(chapter_number("3. Title"), Some(3));
        assert_eq!(chapter_number("Preface"), None);
    }

    #[test]
    fn test_infer_title_order() {
        assert_eq!(infer_title(Some(" Opening "), "Chapter 1: X", 1), "Opening");
        assert_eq!(infer_title(None, "Chapter 1: Dawn\ntext", 1), "Dawn");
        assert_eq!(infer_title(Some("  "), "no pattern", 9), "Chapter 9");
    }
}
