//! Topic assignment over embedding vectors using a pre-fit centroid model.
//!
//! Fitting happens offline; this module only *assigns* labels. A vector is
//! labeled with its nearest centroid by cosine similarity, or with
//! [`UNCLASSIFIED_TOPIC`] when no centroid claims it confidently enough.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::types::{Document, IndexError, ReservedKey};

/// Label applied when no centroid claims a vector with enough confidence.
pub const UNCLASSIFIED_TOPIC: &str = "unclassified";

/// A labeled cluster center in the embedding space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopicCentroid {
    pub label: String,
    pub centroid: Vec<f32>,
}

impl TopicCentroid {
    pub fn new(label: impl Into<String>, centroid: Vec<f32>) -> Self {
        Self {
            label: label.into(),
            centroid,
        }
    }
}

/// A pre-fit topic model: labeled centroids plus a confidence floor.
///
/// Models are read-only after construction and cheap to share across
/// concurrent pipeline invocations behind an `Arc`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopicModel {
    topics: Vec<TopicCentroid>,
    #[serde(default = "default_min_similarity")]
    min_similarity: f32,
}

fn default_min_similarity() -> f32 {
    0.3
}

impl TopicModel {
    pub fn new(topics: Vec<TopicCentroid>, min_similarity: f32) -> Self {
        Self {
            topics,
            min_similarity,
        }
    }

    /// A model with no centroids; every vector comes back unclassified.
    pub fn empty() -> Self {
        Self {
            topics: Vec::new(),
            min_similarity: default_min_similarity(),
        }
    }

    /// Replaces the confidence floor below which vectors stay unclassified.
    #[must_use]
    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    /// Parses a model from its JSON representation.
    pub fn from_json_str(raw: &str) -> Result<Self, IndexError> {
        serde_json::from_str(raw)
            .map_err(|err| IndexError::TopicModel(format!("invalid model JSON: {err}")))
    }

    /// Loads a model from a JSON file on disk.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|err| {
            IndexError::TopicModel(format!("unable to read {}: {err}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn min_similarity(&self) -> f32 {
        self.min_similarity
    }

    /// Labels a single vector by its nearest centroid.
    ///
    /// Vectors below the confidence floor, dimension-incompatible with every
    /// centroid, or classified by an empty model are assigned
    /// [`UNCLASSIFIED_TOPIC`] rather than rejected; one uncertain document
    /// must not abort enrichment of the rest of its batch.
    pub fn classify(&self, vector: &[f32]) -> TopicAssignment {
        let mut best: Option<(&str, f32)> = None;
        for topic in &self.topics {
            let Some(similarity) = cosine_similarity(&topic.centroid, vector) else {
                continue;
            };
            if best.is_none_or(|(_, current)| similarity > current) {
                best = Some((&topic.label, similarity));
            }
        }

        match best {
            Some((label, similarity)) if similarity >= self.min_similarity => TopicAssignment {
                label: label.to_string(),
                confidence: Some(similarity),
            },
            _ => TopicAssignment::unclassified(),
        }
    }
}

/// A topic label plus the similarity score that backed it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopicAssignment {
    pub label: String,
    pub confidence: Option<f32>,
}

impl TopicAssignment {
    pub fn unclassified() -> Self {
        Self {
            label: UNCLASSIFIED_TOPIC.to_string(),
            confidence: None,
        }
    }

    pub fn is_unclassified(&self) -> bool {
        self.label == UNCLASSIFIED_TOPIC
    }
}

/// Attaches topic metadata to documents from their position-aligned vectors.
#[derive(Clone, Debug)]
pub struct TopicAssigner {
    model: Arc<TopicModel>,
}

impl TopicAssigner {
    pub fn new(model: Arc<TopicModel>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &TopicModel {
        &self.model
    }

    /// Labels each document from its vector, returning fresh documents.
    ///
    /// `documents` and `vectors` must have equal length and matching order;
    /// `vectors[i]` was computed from `documents[i].content`. A mismatch is a
    /// broken internal contract, reported as
    /// [`IndexError::InvariantViolation`] rather than patched over.
    pub fn assign(
        &self,
        documents: Vec<Document>,
        vectors: &[Vec<f32>],
    ) -> Result<Vec<Document>, IndexError> {
        if documents.len() != vectors.len() {
            error!(
                documents = documents.len(),
                vectors = vectors.len(),
                "document and vector batches are misaligned"
            );
            return Err(IndexError::InvariantViolation(format!(
                "document batch ({}) and vector batch ({}) are misaligned",
                documents.len(),
                vectors.len()
            )));
        }

        Ok(documents
            .into_iter()
            .zip(vectors)
            .map(|(doc, vector)| {
                let assignment = self.model.classify(vector);
                let mut metadata = doc.metadata;
                metadata.insert(
                    ReservedKey::Topic.as_str().to_string(),
                    Value::String(assignment.label),
                );
                match assignment.confidence {
                    Some(confidence) => {
                        metadata.insert(
                            ReservedKey::TopicConfidence.as_str().to_string(),
                            Value::from(f64::from(confidence)),
                        );
                    }
                    None => {
                        // A stale confidence next to "unclassified" would lie.
                        metadata.remove(ReservedKey::TopicConfidence.as_str());
                    }
                }
                Document {
                    id: doc.id,
                    content: doc.content,
                    metadata,
                }
            })
            .collect())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn model() -> TopicModel {
        TopicModel::new(
            vec![
                TopicCentroid::new("systems", vec![1.0, 0.0, 0.0]),
                TopicCentroid::new("cooking", vec![0.0, 1.0, 0.0]),
            ],
            0.5,
        )
    }

    #[test]
    fn nearest_centroid_wins() {
        let assignment = model().classify(&[0.9, 0.1, 0.0]);
        assert_eq!(assignment.label, "systems");
        assert!(assignment.confidence.unwrap() > 0.9);
    }

    #[test]
    fn low_similarity_is_unclassified() {
        // Equidistant from both centroids and mostly orthogonal.
        let assignment = model().classify(&[0.1, 0.1, 1.0]);
        assert!(assignment.is_unclassified());
        assert!(assignment.confidence.is_none());
    }

    #[test]
    fn dimension_mismatch_is_unclassified_not_fatal() {
        let assignment = model().classify(&[1.0, 0.0]);
        assert!(assignment.is_unclassified());
    }

    #[test]
    fn zero_vector_is_unclassified() {
        let assignment = model().classify(&[0.0, 0.0, 0.0]);
        assert!(assignment.is_unclassified());
    }

    #[test]
    fn empty_model_classifies_nothing() {
        let assignment = TopicModel::empty().classify(&[1.0, 0.0, 0.0]);
        assert!(assignment.is_unclassified());
    }

    #[test]
    fn model_json_round_trip() {
        let raw = serde_json::to_string(&model()).unwrap();
        let back = TopicModel::from_json_str(&raw).unwrap();
        assert_eq!(back, model());
    }

    #[test]
    fn model_json_defaults_threshold() {
        let raw = json!({
            "topics": [{"label": "systems", "centroid": [1.0, 0.0]}]
        })
        .to_string();
        let parsed = TopicModel::from_json_str(&raw).unwrap();
        assert_eq!(parsed.min_similarity(), default_min_similarity());
        assert_eq!(parsed.topic_count(), 1);
    }

    #[test]
    fn malformed_model_json_is_reported() {
        let err = TopicModel::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, IndexError::TopicModel(_)));
    }

    #[test]
    fn assigner_labels_documents_in_order() {
        let assigner = TopicAssigner::new(Arc::new(model()));
        let docs = vec![
            Document::with_id("a", "about kernels").with_metadata("source", json!("unit")),
            Document::with_id("b", "about bread"),
        ];
        let vectors = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]];

        let labeled = assigner.assign(docs, &vectors).unwrap();

        assert_eq!(labeled[0].metadata_str(ReservedKey::Topic), Some("systems"));
        assert_eq!(labeled[1].metadata_str(ReservedKey::Topic), Some("cooking"));
        // Caller metadata survives enrichment.
        assert_eq!(labeled[0].metadata.get("source"), Some(&json!("unit")));
        assert!(
            labeled[0]
                .metadata
                .get(ReservedKey::TopicConfidence.as_str())
                .is_some()
        );
    }

    #[test]
    fn unclassified_document_keeps_no_confidence() {
        let assigner = TopicAssigner::new(Arc::new(model()));
        let docs = vec![
            Document::with_id("a", "drifting")
                .with_metadata(ReservedKey::TopicConfidence.as_str(), json!(0.99)),
        ];
        let vectors = vec![vec![0.0, 0.0, 1.0]];

        let labeled = assigner.assign(docs, &vectors).unwrap();

        assert_eq!(
            labeled[0].metadata_str(ReservedKey::Topic),
            Some(UNCLASSIFIED_TOPIC)
        );
        assert!(
            labeled[0]
                .metadata
                .get(ReservedKey::TopicConfidence.as_str())
                .is_none()
        );
    }

    #[test]
    fn misaligned_batches_violate_invariant() {
        let assigner = TopicAssigner::new(Arc::new(model()));
        let docs = vec![Document::new("a"), Document::new("b")];
        let vectors = vec![vec![1.0, 0.0, 0.0]];

        let err = assigner.assign(docs, &vectors).unwrap_err();
        assert!(matches!(err, IndexError::InvariantViolation(_)), "got {err}");
    }
}
