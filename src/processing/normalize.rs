//! Text cleanup applied before chunking.
//!
//! Extracted text arrives with mis-decoded UTF-8, typographic punctuation, stray control
//! characters, and page furniture (page numbers, running headers and footers). Normalization
//! removes all of that so chunk boundaries and fingerprints depend only on content.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

/// UTF-8 sequences decoded as cp1252, mapped back to the intended text.
const MOJIBAKE: &[(&str, &str)] = &[
    ("â€™", "'"),
    ("â€˜", "'"),
    ("â€œ", "\""),
    ("â€\u{9d}", "\""),
    ("â€“", "-"),
    ("â€”", "-"),
    ("â€¦", "..."),
    ("â€¢", "•"),
    ("Â\u{a0}", " "),
    ("Â°", "°"),
    ("Â±", "±"),
    ("Â·", "·"),
    ("Ã©", "é"),
    ("Ã¨", "è"),
    ("Ã¡", "á"),
    ("Ã³", "ó"),
    ("Ã±", "ñ"),
    ("Ã¼", "ü"),
    ("Ã¶", "ö"),
    ("Ã¤", "ä"),
    ("ï¿½", ""),
    ("\u{FFFD}", ""),
];

const REPEATED_LINE_MAX_CHARS: usize = 80;
const REPEATED_LINE_MIN_COUNT: usize = 3;

static PAGE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:page\s+\d+(?:\s+(?:of|/)\s+\d+)?|-\s*\d+\s*-|\d{1,4}|\d+\s*/\s*\d+)$")
        .expect("valid page number pattern")
});

static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n{3,}").expect("valid newline pattern")
});

/// Normalize raw extracted text.
///
/// Never fails. When boilerplate removal would leave nothing of a non-empty document, the
/// whitespace-collapsed text is returned instead.
pub fn normalize_text(raw: &str) -> String {
    let repaired = repair_encoding(raw);
    let lines: Vec<String> = repaired.split('\n').map(collapse_line).collect();

    let cleaned = collapse_newlines(&strip_boilerplate(&lines).join("\n"));
    if !cleaned.is_empty() {
        return cleaned;
    }

    let collapsed = collapse_newlines(&lines.join("\n"));
    if !collapsed.is_empty() {
        tracing::debug!(
            chars = collapsed.chars().count(),
            "Boilerplate removal emptied document; keeping collapsed text"
        );
    }
    collapsed
}

fn repair_encoding(raw: &str) -> String {
    let mut text = raw.replace("\r\n", "\n").replace('\r', "\n");
    for (broken, intended) in MOJIBAKE {
        if text.contains(broken) {
            text = text.replace(broken, intended);
        }
    }

    text.nfkc()
        .filter_map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => Some('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => Some('"'),
            '\u{2010}'..='\u{2015}' | '\u{2212}' => Some('-'),
            '\n' | '\t' => Some(c),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect()
}

fn collapse_line(line: &str) -> String {
    line.split([' ', '\t'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_boilerplate(lines: &[String]) -> Vec<&str> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for line in lines {
        if is_header_candidate(line) {
            *counts.entry(line.as_str()).or_default() += 1;
        }
    }

    lines
        .iter()
        .map(String::as_str)
        .filter(|line| {
            if PAGE_NUMBER.is_match(line) {
                return false;
            }
            counts
                .get(line)
                .is_none_or(|count| *count < REPEATED_LINE_MIN_COUNT)
        })
        .collect()
}

fn is_header_candidate(line: &str) -> bool {
    !line.is_empty()
        && line.chars().count() <= REPEATED_LINE_MAX_CHARS
        && line.chars().any(char::is_alphabetic)
}

fn collapse_newlines(text: &str) -> String {
    EXCESS_NEWLINES
        .replace_all(text.trim(), "\n\n")
        .into_owned()
}
