//! Template field extraction on top of retrieval.

use super::confidence::{ConfidenceTier, EvidenceStatus};
use super::orchestrator::RetrievalOrchestrator;
use super::types::{RetrievalRequest, RetrievalResult};
use crate::generation::{Generator, parse_string_list};
use crate::tenant::TenantId;
use futures_util::future::join_all;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

const QUESTION_TEMPERATURE: f32 = 0.3;
const VALUE_TEMPERATURE: f32 = 0.1;
const MAX_QUESTIONS: usize = 3;
const EVIDENCE_FOR_VALUE: usize = 3;
const MAX_FIELD_NAME_CHARS: usize = 80;
const NOT_FOUND: &str = "NOT_FOUND";

static TEMPLATE_PLACEHOLDERS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [r"\{([^}]+)\}", r"\[([^\]]+)\]", r"<([^>]+)>"]
        .map(|pattern| Regex::new(pattern).expect("valid placeholder pattern"))
});

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s*").expect("valid list marker pattern"));

/// A template field to fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    /// Field name as it appears in the template.
    pub name: String,
    /// Surrounding template text, when known.
    pub context: Option<String>,
}

impl FieldSpec {
    /// Field without context.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: None,
        }
    }
}

/// Extraction outcome for one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValue {
    /// Field name.
    pub name: String,
    /// Extracted value, `None` when no evidence supported one.
    pub value: Option<String>,
    /// Questions generated for the field; the first drove retrieval.
    pub questions: Vec<String>,
    /// Whether any evidence was retrieved.
    pub status: EvidenceStatus,
    /// Chunk ids of the evidence used.
    pub sources: Vec<String>,
    /// Confidence tier of the best evidence.
    pub confidence: Option<ConfidenceTier>,
}

/// Fills template fields from a tenant's documents.
pub struct FieldExtractor {
    orchestrator: Arc<RetrievalOrchestrator>,
    generator: Option<Generator>,
    batch_size: usize,
}

impl FieldExtractor {
    /// Build an extractor. Fields are processed `batch_size` at a time.
    pub fn new(
        orchestrator: Arc<RetrievalOrchestrator>,
        generator: Option<Generator>,
        batch_size: usize,
    ) -> Self {
        Self {
            orchestrator,
            generator,
            batch_size: batch_size.max(1),
        }
    }

    /// Targeted questions for `field`, at most three.
    pub async fn generate_questions(&self, field: &FieldSpec) -> Vec<String> {
        let Some(generator) = self.generator.as_ref() else {
            return fallback_questions(&field.name);
        };
        match generator
            .complete(&question_prompt(field), QUESTION_TEMPERATURE)
            .await
        {
            Ok(output) => {
                let questions = parse_questions(&output);
                if questions.is_empty() {
                    tracing::warn!(field = %field.name, "No questions in generation output; using defaults");
                    fallback_questions(&field.name)
                } else {
                    questions
                }
            }
            Err(error) => {
                tracing::warn!(field = %field.name, %error, "Question generation failed; using defaults");
                fallback_questions(&field.name)
            }
        }
    }

    /// Extract every field for `tenant`, preserving input order.
    pub async fn extract_fields(&self, tenant: &TenantId, fields: &[FieldSpec]) -> Vec<FieldValue> {
        let mut values = Vec::with_capacity(fields.len());
        for batch in fields.chunks(self.batch_size) {
            let extracted = join_all(batch.iter().map(|field| self.extract_field(tenant, field))).await;
            values.extend(extracted);
        }
        let found = values.iter().filter(|value| value.value.is_some()).count();
        tracing::info!(tenant = %tenant, fields = fields.len(), found, "Field extraction finished");
        values
    }

    async fn extract_field(&self, tenant: &TenantId, field: &FieldSpec) -> FieldValue {
        let questions = self.generate_questions(field).await;
        let mut value = FieldValue {
            name: field.name.clone(),
            value: None,
            questions,
            status: EvidenceStatus::NoEvidence,
            sources: Vec::new(),
            confidence: None,
        };
        let Some(question) = value.questions.first().cloned() else {
            return value;
        };

        let results = match self
            .orchestrator
            .retrieve(RetrievalRequest::new(tenant.clone(), question))
            .await
        {
            Ok(response) => response.results,
            Err(error) => {
                tracing::warn!(tenant = %tenant, field = %field.name, %error, "Field retrieval failed");
                return value;
            }
        };
        if results.is_empty() {
            return value;
        }

        let evidence = &results[..results.len().min(EVIDENCE_FOR_VALUE)];
        value.status = EvidenceStatus::Found;
        value.confidence = Some(results[0].confidence_tier);
        value.sources = evidence.iter().map(|result| result.id.clone()).collect();
        value.value = match self.generated_value(field, evidence).await {
            Some(extracted) => Some(extracted),
            None => extract_value_rule_based(&field.name, &results),
        };
        value
    }

    async fn generated_value(&self, field: &FieldSpec, evidence: &[RetrievalResult]) -> Option<String> {
        let generator = self.generator.as_ref()?;
        match generator.complete(&value_prompt(field, evidence), VALUE_TEMPERATURE).await {
            Ok(output) => clean_generated_value(&field.name, &output),
            Err(error) => {
                tracing::warn!(field = %field.name, %error, "Value generation failed; using rules");
                None
            }
        }
    }
}

/// Default questions used without a generation backend.
pub fn fallback_questions(field: &str) -> Vec<String> {
    vec![
        format!("What is the {field}?"),
        format!("Find {field} information"),
        format!("{field} details"),
    ]
}

/// First `label: value` line whose label mentions `field`, searched in result order.
pub fn extract_value_rule_based(field: &str, results: &[RetrievalResult]) -> Option<String> {
    let needle = field.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    results
        .iter()
        .flat_map(|result| result.metadata.text.lines())
        .filter_map(|line| line.split_once(':'))
        .filter(|(label, _)| label.to_lowercase().contains(&needle))
        .map(|(_, rest)| rest.trim())
        .find(|rest| !rest.is_empty())
        .map(str::to_string)
}

/// Placeholders of a template: `{name}`, `[name]`, and `<name>`, in order of appearance.
///
/// Names are deduplicated case-insensitively; each field carries the template line it came from.
pub fn parse_template_fields(template: &str) -> Vec<FieldSpec> {
    let mut found: Vec<(usize, &str)> = TEMPLATE_PLACEHOLDERS
        .iter()
        .flat_map(|pattern| pattern.captures_iter(template))
        .filter_map(|captures| captures.get(1))
        .map(|name| (name.start(), name.as_str()))
        .collect();
    found.sort_by_key(|(position, _)| *position);

    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter_map(|(position, raw)| {
            let name = raw.trim();
            if name.is_empty() || name.chars().count() > MAX_FIELD_NAME_CHARS {
                return None;
            }
            if !seen.insert(name.to_lowercase()) {
                return None;
            }
            Some(FieldSpec {
                name: name.to_string(),
                context: line_around(template, position),
            })
        })
        .collect()
}

fn line_around(text: &str, position: usize) -> Option<String> {
    let start = text[..position].rfind('\n').map_or(0, |index| index + 1);
    let end = text[position..].find('\n').map_or(text.len(), |index| position + index);
    let line = text[start..end].trim();
    (!line.is_empty()).then(|| line.to_string())
}

fn question_prompt(field: &FieldSpec) -> String {
    let context = field
        .context
        .as_deref()
        .map(|context| format!("\nTemplate context: {context}"))
        .unwrap_or_default();
    format!(
        "Write {MAX_QUESTIONS} short questions that would find the value of the field \"{}\" in \
         a document collection.{context}\n\nReturn only a JSON array of strings.",
        field.name
    )
}

fn value_prompt(field: &FieldSpec, evidence: &[RetrievalResult]) -> String {
    let passages: Vec<String> = evidence
        .iter()
        .enumerate()
        .map(|(position, result)| format!("[{}] {}", position + 1, result.metadata.text))
        .collect();
    format!(
        "Extract the value of the field \"{}\" from the evidence below. Reply with the value \
         only. If the evidence does not contain it, reply {NOT_FOUND}.\n\nEvidence:\n{}",
        field.name,
        passages.join("\n\n")
    )
}

/// Questions from a JSON array, else from lines containing a question mark.
fn parse_questions(output: &str) -> Vec<String> {
    let questions = parse_string_list(output).unwrap_or_else(|| {
        output
            .lines()
            .filter(|line| line.contains('?'))
            .map(|line| LIST_MARKER.replace(line, "").trim().to_string())
            .collect()
    });
    questions
        .into_iter()
        .filter(|question| !question.is_empty())
        .take(MAX_QUESTIONS)
        .collect()
}

fn clean_generated_value(field: &str, output: &str) -> Option<String> {
    let mut value = output.trim().trim_matches('"').trim();
    let field_prefix = format!("{}:", field.to_lowercase());
    for prefix in [field_prefix.as_str(), "value:", "answer:", "result:"] {
        if let Some(head) = value.get(..prefix.len())
            && head.to_lowercase() == prefix
        {
            value = value[prefix.len()..].trim();
        }
    }
    if value.is_empty() || value.eq_ignore_ascii_case(NOT_FOUND) {
        None
    } else {
        Some(value.to_string())
    }
}
