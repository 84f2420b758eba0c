//! Core document types, the completion contract, and the crate error taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Metadata keys owned by the enrichment stages.
///
/// Caller-supplied metadata may use any other key; values stored under these
/// keys are overwritten during enrichment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReservedKey {
    /// Identity of the caller that owns the document.
    UserId,
    /// Topic label assigned from the document's embedding.
    Topic,
    /// Similarity score backing the topic label, when one was computed.
    TopicConfidence,
}

impl ReservedKey {
    /// All reserved keys, for collision checks.
    pub const ALL: [ReservedKey; 3] = [
        ReservedKey::UserId,
        ReservedKey::Topic,
        ReservedKey::TopicConfidence,
    ];

    /// Stable string form used in document metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ReservedKey::UserId => "user_id",
            ReservedKey::Topic => "topic",
            ReservedKey::TopicConfidence => "topic_confidence",
        }
    }
}

impl fmt::Display for ReservedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of text content plus associated metadata.
///
/// Documents are immutable values: the enrichment stages never modify a
/// document in place, they produce new documents with merged metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier, a UUID v4 unless supplied by the caller.
    pub id: String,
    /// The text to be embedded and indexed.
    pub content: String,
    /// Open key-value metadata; see [`ReservedKey`] for the keys the
    /// pipeline itself writes.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    /// Creates a document with a generated id and empty metadata.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            metadata: Map::new(),
        }
    }

    /// Creates a document with a caller-chosen id.
    pub fn with_id(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Map::new(),
        }
    }

    /// Adds a metadata entry, replacing any existing value for the key.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Looks up a metadata value as a string slice.
    pub fn metadata_str(&self, key: ReservedKey) -> Option<&str> {
        self.metadata.get(key.as_str()).and_then(Value::as_str)
    }
}

/// A document paired with the embedding computed from its content.
///
/// This is the unit the index sink commits; the embedding is always derived
/// from this document's `content`, never from a batch-mate's.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnrichedDocument {
    pub document: Document,
    pub embedding: Vec<f32>,
}

/// The unit of work handed to the pipeline: an ordered batch of input
/// documents.
///
/// After a successful run the caller applies the returned
/// [`CompletionSignal`], which clears the consumed documents.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub docs: Vec<Document>,
}

impl PipelineState {
    pub fn new(docs: Vec<Document>) -> Self {
        Self { docs }
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Consumes a completion signal, clearing the processed documents.
    pub fn apply(&mut self, signal: CompletionSignal) {
        match signal.docs {
            ClearDirective::Delete => self.docs.clear(),
        }
    }
}

impl From<Vec<Document>> for PipelineState {
    fn from(docs: Vec<Document>) -> Self {
        Self { docs }
    }
}

/// Directive returned by the pipeline once a batch is durably indexed.
///
/// Carries no document contents; it only instructs the caller to clear the
/// just-processed input from its pending work. Serializes as
/// `{"docs": "delete"}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSignal {
    pub docs: ClearDirective,
}

/// The clear instruction carried by a [`CompletionSignal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearDirective {
    Delete,
}

impl CompletionSignal {
    /// The signal that the input documents are consumed and may be cleared.
    #[must_use]
    pub fn clear_documents() -> Self {
        Self {
            docs: ClearDirective::Delete,
        }
    }
}

/// Error taxonomy for the enrichment pipeline.
///
/// No stage swallows errors: every stage either fully succeeds for the whole
/// batch or aborts the run with one of these. The only locally-absorbed
/// condition is a per-document unclassified topic outcome, which is a
/// successful result, not an error.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Required request context is missing or invalid. Rejected before any
    /// enrichment work begins; never retried internally.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The embedding backend failed or returned a mismatched batch. Surfaced
    /// as-is; the caller owns retry policy.
    #[error("embedding provider '{provider}' failed: {message}")]
    EmbeddingProvider { provider: String, message: String },

    /// An internal alignment contract was broken. Programming defect, fatal
    /// to the run.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The storage backend rejected the batch. The run has made no partial
    /// commit.
    #[error("sink error: {0}")]
    Sink(String),

    /// The pre-fit topic model could not be loaded or is malformed.
    #[error("topic model error: {0}")]
    TopicModel(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completion_signal_serializes_to_clear_directive() {
        let signal = CompletionSignal::clear_documents();
        assert_eq!(
            serde_json::to_value(signal).unwrap(),
            json!({"docs": "delete"})
        );

        let parsed: CompletionSignal = serde_json::from_value(json!({"docs": "delete"})).unwrap();
        assert_eq!(parsed, signal);
    }

    #[test]
    fn applying_signal_clears_state() {
        let mut state = PipelineState::new(vec![Document::new("a"), Document::new("b")]);
        assert_eq!(state.len(), 2);

        state.apply(CompletionSignal::clear_documents());
        assert!(state.is_empty());
    }

    #[test]
    fn reserved_keys_have_stable_names() {
        assert_eq!(ReservedKey::UserId.as_str(), "user_id");
        assert_eq!(ReservedKey::Topic.as_str(), "topic");
        assert_eq!(ReservedKey::TopicConfidence.as_str(), "topic_confidence");
        assert_eq!(ReservedKey::ALL.len(), 3);
    }

    #[test]
    fn document_builder_sets_metadata() {
        let doc = Document::new("body")
            .with_metadata("source", json!("unit-test"))
            .with_metadata("rank", json!(3));

        assert_eq!(doc.metadata.get("source"), Some(&json!("unit-test")));
        assert_eq!(doc.metadata.get("rank"), Some(&json!(3)));
        assert!(doc.metadata_str(ReservedKey::UserId).is_none());
    }

    #[test]
    fn document_serde_round_trip_keeps_metadata() {
        let doc = Document::with_id("doc-1", "hello").with_metadata("lang", json!("en"));
        let raw = serde_json::to_string(&doc).unwrap();
        let back: Document = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, doc);
    }
}
