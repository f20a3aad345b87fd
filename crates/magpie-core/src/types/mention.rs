//! Mention types.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, MagpieError, MagpieResult};

use super::check_unit_interval;

/// A text span believed to reference a real-world entity.
///
/// Mentions are immutable once extracted; entities refer to them by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    /// Unique identifier for the mention.
    pub id: String,
    /// The surface text of the span.
    pub text: String,
    /// Start character offset in the source document.
    pub start_offset: usize,
    /// End character offset in the source document (exclusive).
    pub end_offset: usize,
    /// Extraction confidence (0.0-1.0).
    pub confidence: f32,
    /// Document the span was extracted from.
    pub source_document_id: String,
}

impl Mention {
    /// Create a new mention.
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        source_document_id: impl Into<String>,
        start_offset: usize,
        end_offset: usize,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            start_offset,
            end_offset,
            confidence: 1.0,
            source_document_id: source_document_id.into(),
        }
    }

    /// Set the confidence.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Check the mention is well formed.
    pub fn validate(&self) -> MagpieResult<()> {
        if self.id.trim().is_empty() {
            return Err(MagpieError::invalid_item(
                &self.id,
                ErrorCode::ValMissingField,
                "mention id is empty",
            ));
        }
        if self.start_offset > self.end_offset {
            return Err(MagpieError::invalid_item(
                &self.id,
                ErrorCode::ValInvalidSpan,
                format!(
                    "mention span start {} is after end {}",
                    self.start_offset, self.end_offset
                ),
            ));
        }
        check_unit_interval(&self.id, "mention confidence", self.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_mention() {
        let mention = Mention::new("m1", "Acme Corp", "doc-1", 10, 19).with_confidence(0.9);
        assert!(mention.validate().is_ok());
    }

    #[test]
    fn test_inverted_span_rejected() {
        let mention = Mention::new("m1", "Acme", "doc-1", 20, 10);
        let err = mention.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValInvalidSpan);
    }

    #[test]
    fn test_confidence_out_of_range_rejected() {
        let mention = Mention::new("m1", "Acme", "doc-1", 0, 4).with_confidence(1.5);
        assert_eq!(mention.validate().unwrap_err().code(), ErrorCode::ValOutOfRange);
    }
}
