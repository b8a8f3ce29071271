//! Query expansion into several reformulations.

use crate::generation::{Generator, parse_string_list};
use crate::processing::scoring::{is_stop_word, tokenize};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

const EXPANSION_TEMPERATURE: f32 = 0.3;

static QUESTION_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:what|which|where|who|how|when)(?:'s|\s+(?:is|are|was|were|does|do|did|can|should))?\s+(?:(?:the|a|an|this|that)\s+)?",
    )
    .expect("valid question pattern")
});

static TRAILING_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s?.!]+$").expect("valid punctuation pattern"));

/// Word substitutions applied by the rule-based fallback.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("device", &["product", "equipment"]),
    ("manufacturer", &["maker", "producer"]),
    ("model", &["product model"]),
    ("number", &["identifier"]),
    ("specifications", &["specs"]),
    ("specification", &["spec"]),
    ("price", &["cost"]),
    ("warranty", &["guarantee"]),
    ("instructions", &["procedure"]),
    ("problem", &["issue"]),
    ("error", &["fault"]),
    ("document", &["record"]),
];

/// Produces query variations, preferring the generation backend when configured.
#[derive(Clone, Default)]
pub struct QueryExpander {
    generator: Option<Generator>,
}

impl QueryExpander {
    /// Expander that calls `generator` when present.
    pub fn new(generator: Option<Generator>) -> Self {
        Self { generator }
    }

    /// Element 0 is `query`, followed by up to `count - 1` distinct reformulations.
    pub async fn expand(&self, query: &str, count: usize) -> Vec<String> {
        let count = count.max(1);
        if count == 1 {
            return vec![query.to_string()];
        }

        let Some(generator) = self.generator.as_ref() else {
            return fallback_variations(query, count);
        };

        let prompt = expansion_prompt(query, count - 1);
        match generator.complete(&prompt, EXPANSION_TEMPERATURE).await {
            Ok(output) => match parse_string_list(&output) {
                Some(candidates) => {
                    let mut variations = distinct(query, candidates, count);
                    if variations.len() < count {
                        let extra = fallback_variations(query, count).into_iter().skip(1);
                        variations = distinct(query, variations.into_iter().skip(1).chain(extra), count);
                    }
                    tracing::debug!(query, variations = variations.len(), "Expanded query with generation");
                    variations
                }
                None => {
                    tracing::warn!(query, "Query expansion returned malformed output; using rules");
                    fallback_variations(query, count)
                }
            },
            Err(error) => {
                tracing::warn!(query, %error, "Query expansion failed; using rules");
                fallback_variations(query, count)
            }
        }
    }
}

fn expansion_prompt(query: &str, count: usize) -> String {
    format!(
        "Generate {count} search query variations for the question below. Use different \
         keywords, synonyms, and question forms so each variation could match different \
         documents.\n\nOriginal query: \"{query}\"\n\nReturn only a JSON array of {count} strings."
    )
}

/// Deterministic rule-based variations; element 0 is always `query`.
///
/// Rules, in order: question-form rewriting, synonym substitution, keyword-only form, and
/// documentation phrasing.
pub fn fallback_variations(query: &str, count: usize) -> Vec<String> {
    let mut candidates = Vec::new();

    let core = question_core(query);
    if !core.is_empty() {
        if normalize(&core) != normalize(query) {
            candidates.push(core.clone());
        }
        candidates.push(format!("Details about {core}"));
        candidates.push(format!("{core} information"));
    }

    for (word, replacements) in SYNONYMS {
        if let Some(pattern) = word_pattern(word)
            && pattern.is_match(query)
        {
            for replacement in *replacements {
                candidates.push(pattern.replace_all(query, *replacement).into_owned());
            }
        }
    }

    let keywords: Vec<String> = tokenize(query)
        .filter(|token| !is_stop_word(token))
        .collect();
    if !keywords.is_empty() {
        candidates.push(keywords.join(" "));
    }

    let subject = if core.is_empty() { query.trim() } else { core.as_str() };
    candidates.push(format!("Documentation about {subject}"));
    candidates.push(format!("Technical specifications for {subject}"));

    distinct(query, candidates, count.max(1))
}

fn question_core(query: &str) -> String {
    let stripped = QUESTION_PREFIX.replace(query, "");
    TRAILING_PUNCTUATION.replace(&stripped, "").trim().to_string()
}

fn word_pattern(word: &str) -> Option<Regex> {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(word))).ok()
}

/// Lowercase alphanumeric tokens joined by single spaces.
fn normalize(text: &str) -> String {
    tokenize(text).collect::<Vec<_>>().join(" ")
}

fn distinct(query: &str, candidates: impl IntoIterator<Item = String>, count: usize) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(normalize(query));
    let mut variations = vec![query.to_string()];
    for candidate in candidates {
        if variations.len() >= count {
            break;
        }
        let candidate = candidate.trim().to_string();
        let key = normalize(&candidate);
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        variations.push(candidate);
    }
    variations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{GenerationClient, GenerationError, GenerationRequest};
    use crate::throttle::{RateLimiter, ThrottleConfig};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct Scripted(Result<String, GenerationError>);

    #[async_trait]
    impl GenerationClient for Scripted {
        async fn generate(&self, _: GenerationRequest) -> Result<String, GenerationError> {
            self.0.clone()
        }
    }

    fn expander(reply: Result<String, GenerationError>) -> QueryExpander {
        let limiter = Arc::new(RateLimiter::new(ThrottleConfig {
            min_delay: Duration::ZERO,
            max_retries: 0,
            ..ThrottleConfig::default()
        }));
        QueryExpander::new(Some(Generator::new(
            Arc::new(Scripted(reply)),
            limiter,
            "test".into(),
        )))
    }

    #[test]
    fn fallback_rewrites_questions() {
        let variations = fallback_variations("What is the model number?", 4);
        assert_eq!(
            variations,
            vec![
                "What is the model number?".to_string(),
                "model number".to_string(),
                "Details about model number".to_string(),
                "model number information".to_string(),
            ]
        );
    }

    #[test]
    fn fallback_substitutes_synonyms() {
        let variations = fallback_variations("device manufacturer", 10);
        assert_eq!(variations[0], "device manufacturer");
        assert!(variations.contains(&"product manufacturer".to_string()));
        assert!(variations.contains(&"device maker".to_string()));
        assert!(variations.len() <= 10);
    }

    #[test]
    fn fallback_is_deterministic_and_distinct() {
        let first = fallback_variations("How do I reset the pump?", 6);
        assert_eq!(first, fallback_variations("How do I reset the pump?", 6));
        let keys: HashSet<String> = first.iter().map(|v| normalize(v)).collect();
        assert_eq!(keys.len(), first.len());
    }

    #[test]
    fn casing_only_changes_are_not_distinct() {
        let variations = distinct("Pump", vec!["PUMP".into(), "pump!".into(), "Valve".into()], 5);
        assert_eq!(variations, vec!["Pump".to_string(), "Valve".to_string()]);
    }

    #[tokio::test]
    async fn single_variation_is_just_the_query() {
        let expander = QueryExpander::default();
        assert_eq!(expander.expand("pump", 1).await, vec!["pump".to_string()]);
        assert_eq!(expander.expand("pump", 0).await, vec!["pump".to_string()]);
    }

    #[tokio::test]
    async fn uses_generated_variations_embedded_in_prose() {
        let expander = expander(Ok(
            "Sure! [\"pump model\", \"which pump model\"] hope that helps".into(),
        ));
        let variations = expander.expand("What pump model is installed?", 3).await;
        assert_eq!(
            variations,
            vec![
                "What pump model is installed?".to_string(),
                "pump model".to_string(),
                "which pump model".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn malformed_or_failed_generation_falls_back() {
        let query = "What is the warranty period?";
        let expected = fallback_variations(query, 3);

        let malformed = expander(Ok("no list here".into()));
        assert_eq!(malformed.expand(query, 3).await, expected);

        let failed = expander(Err(GenerationError::ProviderUnavailable("down".into())));
        assert_eq!(failed.expand(query, 3).await, expected);
    }

    #[tokio::test]
    async fn short_generated_lists_are_topped_up() {
        let expander = expander(Ok("[\"warranty length\"]".into()));
        let variations = expander.expand("What is the warranty period?", 3).await;
        assert_eq!(variations.len(), 3);
        assert_eq!(variations[1], "warranty length");
    }
}
