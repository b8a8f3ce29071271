//! Confidence tiers and the evidence bundle handed to answer generation.

use super::types::{RetrievalConfigError, RetrievalResult};
use serde::Serialize;
use std::fmt;
use std::fmt::Write as _;

/// Similarity cut-offs for the confidence tiers. Always strictly decreasing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceThresholds {
    /// Lower bound of the critical tier.
    pub critical: f32,
    /// Lower bound of the high tier.
    pub high: f32,
    /// Lower bound of the acceptable tier.
    pub acceptable: f32,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            critical: 0.80,
            high: 0.70,
            acceptable: 0.55,
        }
    }
}

impl ConfidenceThresholds {
    /// Validate `1 >= critical > high > acceptable >= 0`.
    pub fn new(critical: f32, high: f32, acceptable: f32) -> Result<Self, RetrievalConfigError> {
        let in_range = |value: f32| (0.0..=1.0).contains(&value);
        if !(in_range(critical) && in_range(high) && in_range(acceptable)) {
            return Err(RetrievalConfigError::InvalidThresholds(format!(
                "thresholds must lie in [0, 1] (critical={critical}, high={high}, acceptable={acceptable})"
            )));
        }
        if !(critical > high && high > acceptable) {
            return Err(RetrievalConfigError::InvalidThresholds(format!(
                "thresholds must be strictly decreasing (critical={critical}, high={high}, acceptable={acceptable})"
            )));
        }
        Ok(Self {
            critical,
            high,
            acceptable,
        })
    }

    /// Tier for a similarity score.
    pub fn classify(&self, score: f32) -> ConfidenceTier {
        if score >= self.critical {
            ConfidenceTier::Critical
        } else if score >= self.high {
            ConfidenceTier::High
        } else if score >= self.acceptable {
            ConfidenceTier::Acceptable
        } else {
            ConfidenceTier::Low
        }
    }

    /// Relevance grouping for a similarity score.
    pub fn relevance(&self, score: f32) -> RelevanceTier {
        if score >= self.critical {
            RelevanceTier::Primary
        } else if score >= self.high {
            RelevanceTier::Secondary
        } else {
            RelevanceTier::Supporting
        }
    }
}

/// Confidence bucket assigned by similarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    /// At or above the critical threshold.
    Critical,
    /// At or above the high threshold.
    High,
    /// At or above the acceptable threshold.
    Acceptable,
    /// Below every threshold.
    Low,
}

impl ConfidenceTier {
    /// Uppercase label used in rendered context.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Acceptable => "ACCEPTABLE",
            Self::Low => "LOW",
        }
    }
}

/// How a result should be weighed when presenting evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelevanceTier {
    /// Critical confidence.
    Primary,
    /// High confidence.
    Secondary,
    /// Everything else that survived ranking.
    Supporting,
}

/// Result counts per confidence tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    /// Critical results.
    pub critical: usize,
    /// High results.
    pub high: usize,
    /// Acceptable results.
    pub acceptable: usize,
    /// Low results.
    pub low: usize,
}

impl TierCounts {
    /// Count `results` by their assigned tier.
    pub fn from_results(results: &[RetrievalResult]) -> Self {
        let mut counts = Self::default();
        for result in results {
            match result.confidence_tier {
                ConfidenceTier::Critical => counts.critical += 1,
                ConfidenceTier::High => counts.high += 1,
                ConfidenceTier::Acceptable => counts.acceptable += 1,
                ConfidenceTier::Low => counts.low += 1,
            }
        }
        counts
    }
}

/// Similarity statistics over a set of results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreSummary {
    /// Number of results.
    pub count: usize,
    /// Mean similarity, zero when empty.
    pub average: f32,
    /// Highest similarity, zero when empty.
    pub max: f32,
    /// Lowest similarity, zero when empty.
    pub min: f32,
}

impl ScoreSummary {
    fn from_scores(scores: &[f32]) -> Self {
        if scores.is_empty() {
            return Self::default();
        }
        let sum: f32 = scores.iter().sum();
        Self {
            count: scores.len(),
            average: sum / scores.len() as f32,
            max: scores.iter().copied().fold(f32::MIN, f32::max),
            min: scores.iter().copied().fold(f32::MAX, f32::min),
        }
    }
}

/// Overall grade of the evidence behind an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisQuality {
    /// Average ≥ 0.8 with at least three critical results.
    Excellent,
    /// Average ≥ 0.75 with at least one critical result.
    VeryGood,
    /// Average ≥ 0.7.
    Good,
    /// Average ≥ 0.65.
    Acceptable,
    /// Anything weaker.
    Limited,
    /// No results.
    NoData,
}

impl AnalysisQuality {
    fn grade(overall: &ScoreSummary, critical_count: usize) -> Self {
        if overall.count == 0 {
            return Self::NoData;
        }
        let avg = overall.average;
        if avg >= 0.8 && critical_count >= 3 {
            Self::Excellent
        } else if avg >= 0.75 && critical_count >= 1 {
            Self::VeryGood
        } else if avg >= 0.7 {
            Self::Good
        } else if avg >= 0.65 {
            Self::Acceptable
        } else {
            Self::Limited
        }
    }

    /// Guidance shown next to the grade.
    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::NoData => "Upload relevant documents for this tenant",
            Self::Excellent | Self::VeryGood => {
                "High-quality documents available; answers should be very accurate"
            }
            Self::Good => "Good document quality; answers should be reliable",
            Self::Acceptable => "Moderate document quality; consider uploading more specific documents",
            Self::Limited => "Limited relevant documents; upload more documents related to the query",
        }
    }
}

impl fmt::Display for AnalysisQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Excellent => "EXCELLENT",
            Self::VeryGood => "VERY_GOOD",
            Self::Good => "GOOD",
            Self::Acceptable => "ACCEPTABLE",
            Self::Limited => "LIMITED",
            Self::NoData => "NO_DATA",
        };
        f.write_str(label)
    }
}

/// Whether any evidence was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStatus {
    /// At least one result.
    Found,
    /// Retrieval succeeded but nothing matched.
    NoEvidence,
}

/// Results grouped by tier with aggregate statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceBundle {
    /// Explicit found/no-evidence signal.
    pub status: EvidenceStatus,
    /// Critical results in ranked order.
    pub critical: Vec<RetrievalResult>,
    /// High results in ranked order.
    pub high: Vec<RetrievalResult>,
    /// Acceptable results in ranked order.
    pub acceptable: Vec<RetrievalResult>,
    /// Low results in ranked order.
    pub low: Vec<RetrievalResult>,
    /// Statistics per tier, in critical/high/acceptable/low order.
    pub tier_summaries: [ScoreSummary; 4],
    /// Statistics over all results.
    pub overall: ScoreSummary,
    /// Overall grade.
    pub analysis_quality: AnalysisQuality,
    /// Thresholds used for the sections.
    pub thresholds: ConfidenceThresholds,
}

impl EvidenceBundle {
    /// Total number of results in the bundle.
    pub fn len(&self) -> usize {
        self.overall.count
    }

    /// Whether the bundle holds no results.
    pub fn is_empty(&self) -> bool {
        self.overall.count == 0
    }

    /// Results from every tier, best tier first.
    pub fn ordered(&self) -> impl Iterator<Item = &RetrievalResult> {
        self.critical
            .iter()
            .chain(&self.high)
            .chain(&self.acceptable)
            .chain(&self.low)
    }

    /// Render the bundle as sectioned plain text for a generation prompt.
    ///
    /// Documents are numbered in bundle order so answers can cite `[Document N]`.
    pub fn render_context(&self) -> String {
        let mut out = String::new();
        if self.status == EvidenceStatus::NoEvidence {
            out.push_str("No relevant documents were found.\n");
            return out;
        }

        let sections = [
            (ConfidenceTier::Critical, self.thresholds.critical, &self.critical),
            (ConfidenceTier::High, self.thresholds.high, &self.high),
            (ConfidenceTier::Acceptable, self.thresholds.acceptable, &self.acceptable),
        ];
        let mut number = 1;
        for (tier, threshold, results) in sections {
            let _ = writeln!(
                out,
                "=== {} CONFIDENCE DOCUMENTS (score >= {threshold:.2}) ===",
                tier.label()
            );
            if results.is_empty() {
                let _ = writeln!(out, "No {} confidence documents found.", tier.label().to_lowercase());
            }
            for result in results.iter() {
                write_document(&mut out, number, result);
                number += 1;
            }
            out.push('\n');
        }
        if !self.low.is_empty() {
            out.push_str("=== LOW CONFIDENCE DOCUMENTS ===\n");
            for result in &self.low {
                write_document(&mut out, number, result);
                number += 1;
            }
            out.push('\n');
        }
        let _ = writeln!(
            out,
            "Documents: {} | Average similarity: {:.2} | Analysis quality: {}",
            self.overall.count, self.overall.average, self.analysis_quality
        );
        out
    }
}

fn write_document(out: &mut String, number: usize, result: &RetrievalResult) {
    let _ = writeln!(
        out,
        "[Document {number}] ({}, similarity {:.2})\n{}",
        result.metadata.filename, result.similarity, result.metadata.text
    );
}

/// Buckets ranked results into confidence tiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceAggregator {
    thresholds: ConfidenceThresholds,
}

impl ConfidenceAggregator {
    /// Aggregator using `thresholds`.
    pub fn new(thresholds: ConfidenceThresholds) -> Self {
        Self { thresholds }
    }

    /// Group `results` (already ranked) into an evidence bundle.
    pub fn aggregate(&self, results: &[RetrievalResult]) -> EvidenceBundle {
        let mut tiers: [Vec<RetrievalResult>; 4] = Default::default();
        for result in results {
            let slot = match self.thresholds.classify(result.similarity) {
                ConfidenceTier::Critical => 0,
                ConfidenceTier::High => 1,
                ConfidenceTier::Acceptable => 2,
                ConfidenceTier::Low => 3,
            };
            tiers[slot].push(result.clone());
        }

        let summary_of = |results: &[RetrievalResult]| {
            let scores: Vec<f32> = results.iter().map(|result| result.similarity).collect();
            ScoreSummary::from_scores(&scores)
        };
        let tier_summaries = [
            summary_of(&tiers[0]),
            summary_of(&tiers[1]),
            summary_of(&tiers[2]),
            summary_of(&tiers[3]),
        ];
        let overall = summary_of(results);
        let analysis_quality = AnalysisQuality::grade(&overall, tiers[0].len());
        let [critical, high, acceptable, low] = tiers;

        EvidenceBundle {
            status: if results.is_empty() {
                EvidenceStatus::NoEvidence
            } else {
                EvidenceStatus::Found
            },
            critical,
            high,
            acceptable,
            low,
            tier_summaries,
            overall,
            analysis_quality,
            thresholds: self.thresholds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::types::fixtures::result_with;

    #[test]
    fn thresholds_must_be_strictly_decreasing() {
        assert!(ConfidenceThresholds::new(0.8, 0.7, 0.55).is_ok());
        assert!(ConfidenceThresholds::new(0.8, 0.8, 0.55).is_err());
        assert!(ConfidenceThresholds::new(0.6, 0.7, 0.55).is_err());
        assert!(ConfidenceThresholds::new(1.2, 0.7, 0.55).is_err());
    }

    #[test]
    fn classifies_on_inclusive_lower_bounds() {
        let thresholds = ConfidenceThresholds::default();
        assert_eq!(thresholds.classify(0.80), ConfidenceTier::Critical);
        assert_eq!(thresholds.classify(0.75), ConfidenceTier::High);
        assert_eq!(thresholds.classify(0.55), ConfidenceTier::Acceptable);
        assert_eq!(thresholds.classify(0.2), ConfidenceTier::Low);
        assert_eq!(thresholds.relevance(0.72), RelevanceTier::Secondary);
        assert_eq!(thresholds.relevance(0.6), RelevanceTier::Supporting);
    }

    #[test]
    fn empty_results_signal_no_evidence() {
        let bundle = ConfidenceAggregator::default().aggregate(&[]);
        assert_eq!(bundle.status, EvidenceStatus::NoEvidence);
        assert_eq!(bundle.analysis_quality, AnalysisQuality::NoData);
        assert!(bundle.is_empty());
        assert!(bundle.render_context().contains("No relevant documents"));
    }

    #[test]
    fn aggregates_tiers_and_grades() {
        let results = vec![
            result_with("a", 0.92),
            result_with("b", 0.85),
            result_with("c", 0.81),
            result_with("d", 0.74),
            result_with("e", 0.4),
        ];
        let bundle = ConfidenceAggregator::default().aggregate(&results);
        assert_eq!(bundle.status, EvidenceStatus::Found);
        assert_eq!(bundle.critical.len(), 3);
        assert_eq!(bundle.high.len(), 1);
        assert_eq!(bundle.low.len(), 1);
        assert_eq!(bundle.tier_summaries[0].count, 3);
        assert!((bundle.tier_summaries[0].max - 0.92).abs() < 1e-6);
        assert!((bundle.overall.min - 0.4).abs() < 1e-6);
        // Average 0.744 with three critical hits.
        assert_eq!(bundle.analysis_quality, AnalysisQuality::Good);

        let ids: Vec<&str> = bundle.ordered().map(|result| result.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);

        let context = bundle.render_context();
        assert!(context.contains("=== CRITICAL CONFIDENCE DOCUMENTS (score >= 0.80) ==="));
        assert!(context.contains("No acceptable confidence documents found."));
        assert!(context.contains("[Document 5]"));
        assert!(context.contains("Analysis quality: GOOD"));
    }

    #[test]
    fn grades_follow_average_and_critical_count() {
        let grade = |scores: &[f32], critical| {
            AnalysisQuality::grade(&ScoreSummary::from_scores(scores), critical)
        };
        assert_eq!(grade(&[0.9, 0.85, 0.82], 3), AnalysisQuality::Excellent);
        assert_eq!(grade(&[0.9, 0.7], 1), AnalysisQuality::VeryGood);
        assert_eq!(grade(&[0.66], 0), AnalysisQuality::Acceptable);
        assert_eq!(grade(&[0.5], 0), AnalysisQuality::Limited);
    }
}
