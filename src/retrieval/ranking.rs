//! Deduplication, filtering, and re-ranking of merged retrieval hits.

use super::types::{RetrievalConfig, RetrievalResult};
use crate::processing::scoring::{ChunkScorer, is_stop_word, tokenize};
use crate::vector::{ScoredRecord, content_fingerprint};
use std::collections::{HashMap, HashSet};

/// Collapse hits sharing a content fingerprint.
///
/// Each group keeps its highest-similarity member at the position where the group was first
/// seen. Hits without a stored fingerprint are fingerprinted from their text.
pub fn dedupe(hits: Vec<ScoredRecord>) -> Vec<ScoredRecord> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<ScoredRecord> = Vec::with_capacity(hits.len());

    for hit in hits {
        let key = fingerprint_of(&hit);
        match positions.get(&key) {
            Some(&position) => {
                if hit.score > unique[position].score {
                    unique[position] = hit;
                }
            }
            None => {
                positions.insert(key, unique.len());
                unique.push(hit);
            }
        }
    }
    unique
}

/// Lexical relevance check between chunk content and the query.
///
/// Passes when the share of the query's non-stop-word keywords found in the content exceeds
/// `min_overlap`, or when the content has more than `substantial_words` words. Queries made only
/// of stop words pass.
pub fn is_relevant(content: &str, query: &str, min_overlap: f32, substantial_words: usize) -> bool {
    let query_keywords: HashSet<String> = tokenize(query)
        .filter(|token| !is_stop_word(token))
        .collect();
    if query_keywords.is_empty() {
        return true;
    }
    if content.split_whitespace().count() > substantial_words {
        return true;
    }
    let content_keywords: HashSet<String> = tokenize(content).collect();
    let shared = query_keywords.intersection(&content_keywords).count();
    shared as f32 / query_keywords.len() as f32 > min_overlap
}

fn fingerprint_of(hit: &ScoredRecord) -> String {
    if hit.metadata.fingerprint.is_empty() {
        content_fingerprint(&hit.metadata.text)
    } else {
        hit.metadata.fingerprint.clone()
    }
}

/// Fingerprint of the first `words` normalized tokens of `text`.
pub fn diversity_key(text: &str, words: usize) -> String {
    let leading: Vec<String> = tokenize(text).take(words).collect();
    content_fingerprint(&leading.join(" "))
}

/// Filtering and ranking stages parameterized by the retrieval config.
pub(crate) struct Ranker<'a> {
    config: &'a RetrievalConfig,
    scorer: &'a ChunkScorer,
}

impl<'a> Ranker<'a> {
    pub(crate) fn new(config: &'a RetrievalConfig, scorer: &'a ChunkScorer) -> Self {
        Self { config, scorer }
    }

    /// Keep candidates meeting the similarity floor that are valid chunks relevant to `query`.
    pub(crate) fn filter(&self, candidates: Vec<ScoredRecord>, query: &str) -> Vec<ScoredRecord> {
        candidates
            .into_iter()
            .filter(|hit| hit.score >= self.config.min_similarity)
            .filter(|hit| self.scorer.is_valid(&hit.metadata.text))
            .filter(|hit| {
                is_relevant(
                    &hit.metadata.text,
                    query,
                    self.config.min_keyword_overlap,
                    self.config.substantial_word_count,
                )
            })
            .collect()
    }

    /// Composite-score, diversify, and truncate to `final_count`.
    pub(crate) fn rank(&self, candidates: Vec<ScoredRecord>, final_count: usize) -> Vec<RetrievalResult> {
        let weights = self.config.weights;
        let mut scored: Vec<(f32, ScoredRecord)> = candidates
            .into_iter()
            .map(|hit| {
                let composite = weights.score(
                    hit.score,
                    hit.metadata.quality_score,
                    hit.metadata.importance_score,
                );
                (composite, hit)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let thresholds = &self.config.thresholds;
        let mut seen_fingerprints: HashSet<String> = HashSet::new();
        let mut seen_openings: HashSet<String> = HashSet::new();
        let mut results = Vec::with_capacity(final_count.min(scored.len()));
        for (composite, hit) in scored {
            if results.len() >= final_count {
                break;
            }
            let always_admit =
                composite > self.config.always_admit_score || hit.metadata.contains_fields;
            let fresh_fingerprint = seen_fingerprints.insert(fingerprint_of(&hit));
            let fresh_opening = self.config.diversity_words.is_none_or(|words| {
                seen_openings.insert(diversity_key(&hit.metadata.text, words))
            });
            if !(fresh_fingerprint && fresh_opening) && !always_admit {
                tracing::trace!(id = %hit.id, "Dropped duplicate candidate");
                continue;
            }
            results.push(RetrievalResult {
                similarity: hit.score,
                composite_score: composite,
                relevance_tier: thresholds.relevance(hit.score),
                confidence_tier: thresholds.classify(hit.score),
                id: hit.id,
                metadata: hit.metadata,
            });
        }
        results
    }
}
