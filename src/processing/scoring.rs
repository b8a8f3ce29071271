//! Chunk validation and scoring.
//!
//! [`ChunkScorer::assess`] is pure: the same text always yields the same assessment. Scores are
//! clamped to `[0, 1]`. Content types come from a pluggable [`ContentClassifier`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

const MIN_NON_WHITESPACE: usize = 10;
const MIN_WORDS: usize = 2;
const MIN_ALNUM_SHARE: f32 = 0.5;
const MAX_ARTIFACT_RATIO: f32 = 0.2;
const MAX_KEYWORDS: usize = 10;

const ARTIFACT_MARKERS: &[&str] = &["â€", "Ã", "Â", "ï¿½", "\u{FFFD}"];

/// Words ignored by keyword extraction and lexical overlap checks.
pub(crate) const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "how",
    "if", "in", "into", "is", "it", "its", "may", "more", "must", "no", "not", "of", "on", "or",
    "other", "our", "should", "so", "such", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "those", "to", "up", "was", "we", "were", "what", "when",
    "where", "which", "while", "who", "will", "with", "would", "you", "your",
];

/// Keywords that suggest template fields (names, dates, identifiers, ratings).
pub(crate) const FIELD_KEYWORDS: &[&str] = &[
    "name",
    "date",
    "model",
    "serial",
    "number",
    "manufacturer",
    "version",
    "type",
    "id",
    "address",
    "phone",
    "email",
    "price",
    "quantity",
    "total",
    "specification",
    "rating",
    "voltage",
    "capacity",
    "weight",
    "dimensions",
    "warranty",
];

static LABEL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*[A-Za-z][A-Za-z0-9 /()#&.\-]{0,40}:\s*\S").expect("valid label pattern")
});

static BULLET_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:[-*•·]|\d{1,3}[.)])\s+\S").expect("valid bullet pattern")
});

/// Coarse classification of a chunk's layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Running prose.
    #[default]
    Text,
    /// Label/value pairs.
    Form,
    /// Bulleted or numbered items.
    List,
    /// Tables and other structured extracts.
    Structured,
}

impl ContentType {
    /// Lowercase identifier stored in vector metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Form => "form",
            Self::List => "list",
            Self::Structured => "structured",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "form" => Ok(Self::Form),
            "list" => Ok(Self::List),
            "structured" => Ok(Self::Structured),
            _ => Err(()),
        }
    }
}

/// Assigns a [`ContentType`] to chunk text.
pub trait ContentClassifier {
    /// Classify `text`.
    fn classify(&self, text: &str) -> ContentType;
}

/// Line-pattern classifier. Precedence: structured, form, list, text.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedClassifier;

impl ContentClassifier for RuleBasedClassifier {
    fn classify(&self, text: &str) -> ContentType {
        if text.contains("[TABLE DATA]") || text.contains("[STRUCTURED_CONTENT]") {
            return ContentType::Structured;
        }
        let table_lines = text
            .lines()
            .filter(|line| line.matches('|').count() >= 2 || line.contains('\t'))
            .count();
        if table_lines >= 2 {
            return ContentType::Structured;
        }
        if LABEL_LINE.find_iter(text).count() >= 2 {
            return ContentType::Form;
        }
        if BULLET_LINE.find_iter(text).count() >= 2 {
            return ContentType::List;
        }
        ContentType::Text
    }
}

/// Result of validating and scoring one chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkAssessment {
    /// Whether the chunk passed validation.
    pub is_valid: bool,
    /// Readability and cleanliness score.
    pub quality_score: f32,
    /// Likelihood the chunk carries key facts (labels, numbers, identifiers).
    pub importance_score: f32,
    /// Share of tokens that look like entities (capitalised, numeric, abbreviations).
    pub entity_density: f32,
    /// Blend of vocabulary diversity, entity density, and length.
    pub information_richness: f32,
    /// Layout classification.
    pub content_type: ContentType,
    /// Most frequent non-stop-word tokens.
    pub semantic_keywords: Vec<String>,
    /// Whether the chunk looks like it holds template fields.
    pub contains_fields: bool,
    /// Whitespace-separated token count.
    pub word_count: usize,
}

/// Validates chunk text and computes its scores.
pub struct ChunkScorer {
    classifier: Box<dyn ContentClassifier + Send + Sync>,
}

impl Default for ChunkScorer {
    fn default() -> Self {
        Self::new(Box::new(RuleBasedClassifier))
    }
}

impl fmt::Debug for ChunkScorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkScorer").finish_non_exhaustive()
    }
}

impl ChunkScorer {
    /// Build a scorer around a custom classifier.
    pub fn new(classifier: Box<dyn ContentClassifier + Send + Sync>) -> Self {
        Self { classifier }
    }

    /// Validate only, skipping score computation.
    pub fn is_valid(&self, text: &str) -> bool {
        TextStats::collect(text).is_valid()
    }

    /// Validate and score `text`.
    pub fn assess(&self, text: &str) -> ChunkAssessment {
        let stats = TextStats::collect(text);
        let label_lines = LABEL_LINE.find_iter(text).count();
        let keyword_hits = field_keyword_hits(&stats.words);

        ChunkAssessment {
            is_valid: stats.is_valid(),
            quality_score: stats.quality(),
            importance_score: importance(&stats, label_lines, keyword_hits),
            entity_density: stats.entity_density(),
            information_richness: stats.information_richness(),
            content_type: self.classifier.classify(text),
            semantic_keywords: extract_keywords(text, MAX_KEYWORDS),
            contains_fields: label_lines >= 2 || (label_lines == 1 && keyword_hits > 0),
            word_count: stats.words.len(),
        }
    }
}

struct TextStats<'a> {
    words: Vec<&'a str>,
    non_whitespace: usize,
    alnum: usize,
    artifact_chars: usize,
    punctuation_kinds: usize,
    sentence_lengths: Vec<usize>,
}

impl<'a> TextStats<'a> {
    fn collect(text: &'a str) -> Self {
        let words: Vec<&str> = text.split_whitespace().collect();
        let non_whitespace = text.chars().filter(|c| !c.is_whitespace()).count();
        let alnum = text.chars().filter(|c| c.is_alphanumeric()).count();
        let punctuation_kinds = text
            .chars()
            .filter(|c| ".,;:!?()-'\"".contains(*c))
            .collect::<HashSet<_>>()
            .len();
        let sentence_lengths = text
            .split(['.', '!', '?', '\n'])
            .map(|sentence| sentence.split_whitespace().filter(|w| is_lexical(w)).count())
            .filter(|count| *count > 0)
            .collect();

        Self {
            words,
            non_whitespace,
            alnum,
            artifact_chars: artifact_chars(text),
            punctuation_kinds,
            sentence_lengths,
        }
    }

    fn alnum_share(&self) -> f32 {
        ratio(self.alnum, self.non_whitespace)
    }

    fn artifact_ratio(&self) -> f32 {
        ratio(self.artifact_chars, self.non_whitespace)
    }

    fn is_valid(&self) -> bool {
        if self.non_whitespace < MIN_NON_WHITESPACE || self.words.len() < MIN_WORDS {
            return false;
        }
        if self.alnum_share() < MIN_ALNUM_SHARE {
            return false;
        }
        let total_len: usize = self.words.iter().map(|w| w.chars().count()).sum();
        let average = total_len as f32 / self.words.len() as f32;
        if !(2.0..=15.0).contains(&average) {
            return false;
        }
        let very_long = self.words.iter().filter(|w| w.chars().count() > 25).count();
        if ratio(very_long, self.words.len()) > 0.3 {
            return false;
        }
        self.artifact_ratio() <= MAX_ARTIFACT_RATIO
    }

    fn quality(&self) -> f32 {
        if self.words.is_empty() {
            return 0.0;
        }
        let sentence_fit = if self.sentence_lengths.is_empty() {
            0.0
        } else {
            let average = self.sentence_lengths.iter().sum::<usize>() as f32
                / self.sentence_lengths.len() as f32;
            if (8.0..=25.0).contains(&average) {
                1.0
            } else if (3.0..8.0).contains(&average) || (25.0..=40.0).contains(&average) {
                0.6
            } else {
                0.3
            }
        };
        let punctuation = (self.punctuation_kinds as f32 / 4.0).min(1.0);
        let alnum_share = self.alnum_share();

        let base = 0.3 * sentence_fit
            + 0.3 * self.lexical_diversity()
            + 0.15 * punctuation
            + 0.25 * alnum_share;
        let penalty = (self.artifact_ratio() * 2.0).min(0.5);
        clamp_unit(base * alnum_share - penalty)
    }

    fn lexical_diversity(&self) -> f32 {
        let unique: HashSet<String> = self
            .words
            .iter()
            .filter(|w| is_lexical(w))
            .map(|w| w.to_lowercase())
            .collect();
        ratio(unique.len(), self.words.len())
    }

    fn entity_density(&self) -> f32 {
        let entities = self
            .words
            .iter()
            .filter(|w| {
                let token = trim_token(w);
                token.starts_with(char::is_uppercase) || token.chars().any(|c| c.is_ascii_digit())
            })
            .count();
        clamp_unit(ratio(entities, self.words.len()))
    }

    fn information_richness(&self) -> f32 {
        let length = (self.words.len() as f32 / 100.0).min(1.0);
        clamp_unit(
            0.5 * self.lexical_diversity()
                + 0.3 * (self.entity_density() * 2.0).min(1.0)
                + 0.2 * length,
        )
    }
}

fn importance(stats: &TextStats<'_>, label_lines: usize, keyword_hits: usize) -> f32 {
    if stats.words.is_empty() {
        return 0.0;
    }
    let labels = (label_lines as f32 / 3.0).min(1.0);
    let numeric_tokens = stats
        .words
        .iter()
        .filter(|w| w.chars().any(|c| c.is_ascii_digit()))
        .count();
    let numeric = (ratio(numeric_tokens, stats.words.len()) * 4.0).min(1.0);
    let abbreviations = stats.words.iter().filter(|w| is_abbreviation(w)).count();
    let abbreviation = (abbreviations as f32 / 3.0).min(1.0);
    let keywords = (keyword_hits as f32 / 3.0).min(1.0);

    clamp_unit(0.4 * labels + 0.2 * numeric + 0.2 * abbreviation + 0.2 * keywords)
}

fn field_keyword_hits(words: &[&str]) -> usize {
    words
        .iter()
        .map(|w| trim_token(w).to_lowercase())
        .filter(|token| FIELD_KEYWORDS.contains(&token.as_str()))
        .collect::<HashSet<_>>()
        .len()
}

fn is_abbreviation(word: &str) -> bool {
    let token = trim_token(word);
    let uppercase = token.chars().filter(char::is_ascii_uppercase).count();
    uppercase >= 2
        && token.starts_with(|c: char| c.is_ascii_uppercase())
        && token
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

fn is_lexical(word: &str) -> bool {
    word.chars().any(char::is_alphabetic)
}

fn trim_token(word: &str) -> &str {
    word.trim_matches(|c: char| !c.is_alphanumeric())
}

fn artifact_chars(text: &str) -> usize {
    let markers: usize = ARTIFACT_MARKERS
        .iter()
        .map(|marker| text.matches(marker).count() * marker.chars().count())
        .sum();

    let mut runs = 0usize;
    let mut previous: Option<char> = None;
    let mut run_len = 0usize;
    let flush = |c: Option<char>, len: usize| match c {
        Some(c) if c.is_alphanumeric() && len >= 5 => len,
        Some(c) if !c.is_alphanumeric() && !c.is_whitespace() && len >= 3 => len,
        _ => 0,
    };
    for c in text.chars() {
        if Some(c) == previous {
            run_len += 1;
        } else {
            runs += flush(previous, run_len);
            previous = Some(c);
            run_len = 1;
        }
    }
    runs += flush(previous, run_len);

    markers + runs
}

/// Up to `limit` lowercase non-stop-word tokens ordered by frequency, ties lexicographic.
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for token in tokenize(text) {
        if token.chars().count() >= 3
            && !token.chars().all(|c| c.is_ascii_digit())
            && !is_stop_word(&token)
        {
            *counts.entry(token).or_default() += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(token, _)| token).collect()
}

/// Lowercase alphanumeric tokens of `text`.
pub(crate) fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

pub(crate) fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

fn ratio(part: usize, whole: usize) -> f32 {
    if whole == 0 {
        0.0
    } else {
        part as f32 / whole as f32
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}
