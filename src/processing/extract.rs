//! Plain-text extraction from uploaded bytes.

use thiserror::Error;

/// Errors raised while turning uploaded bytes into text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    /// The declared type has no extractor.
    #[error("unsupported document type: {0}")]
    Unsupported(String),
    /// The document decoded to no text.
    #[error("document contains no extractable text")]
    Empty,
}

/// Converts raw document bytes into text.
pub trait TextExtractor {
    /// Extract text from `bytes` of the given declared type (lowercase extension).
    fn extract(&self, bytes: &[u8], declared_type: &str) -> Result<String, ExtractionError>;
}

/// Extractor for text-based formats.
///
/// Bytes are decoded as UTF-8, replacing invalid sequences; a leading byte-order mark is
/// dropped. Binary formats such as PDF or DOCX are reported as unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    /// Document types accepted by this extractor.
    pub const SUPPORTED_TYPES: &'static [&'static str] =
        &["txt", "text", "md", "markdown", "csv", "log", "json"];

    /// Whether `declared_type` is handled.
    pub fn supports(declared_type: &str) -> bool {
        Self::SUPPORTED_TYPES.contains(&declared_type.trim().to_lowercase().as_str())
    }
}

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8], declared_type: &str) -> Result<String, ExtractionError> {
        if !Self::supports(declared_type) {
            return Err(ExtractionError::Unsupported(declared_type.to_string()));
        }
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let text = String::from_utf8_lossy(bytes).into_owned();
        if text.trim().is_empty() {
            return Err(ExtractionError::Empty);
        }
        Ok(text)
    }
}

/// Lowercased extension of `filename`, or an empty string when there is none.
pub fn document_type_from_filename(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}
