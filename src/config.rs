//! Pipeline configuration: embedding backend, topic model, and index location.

use std::env;
use std::path::PathBuf;

use rig::embeddings::embedding::EmbeddingModel;

use crate::embeddings::RigEmbeddingProvider;
use crate::pipeline::IndexPipeline;
use crate::sinks::SqliteSinkGateway;
use crate::topics::TopicModel;
use crate::types::IndexError;

/// Connection options recognized by the pipeline.
///
/// These map to the pieces a deployment wires together at process start: the
/// embedding backend, the pre-fit topic model, and the index database. All
/// values are plain data; see [`IndexConfig::connect_with_model`] for turning
/// a config into a ready pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexConfig {
    /// Embedding model name, passed through to the backend.
    pub embedding_model: String,
    /// Dimensionality the backend is configured to produce.
    pub embedding_dimensions: usize,
    /// Upper bound on texts per backend call; `None` sends the whole batch in
    /// one call.
    pub max_embed_batch: Option<usize>,
    /// Location of the pre-fit topic model JSON. When absent an empty model
    /// is used and every document is labeled unclassified.
    pub topic_model_path: Option<PathBuf>,
    /// SQLite database path for the index sink.
    pub index_db_path: PathBuf,
    /// Confidence floor for topic assignment when building the fallback
    /// empty model; a loaded model carries its own floor.
    pub min_topic_similarity: f32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 1536,
            max_embed_batch: None,
            topic_model_path: None,
            index_db_path: PathBuf::from("./indexsmith.sqlite"),
            min_topic_similarity: 0.3,
        }
    }
}

impl IndexConfig {
    /// Reads configuration from `INDEXSMITH_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            embedding_model: env::var("INDEXSMITH_EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            embedding_dimensions: env::var("INDEXSMITH_EMBEDDING_DIMENSIONS")
                .ok()
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(defaults.embedding_dimensions),
            max_embed_batch: env::var("INDEXSMITH_EMBED_BATCH_LIMIT")
                .ok()
                .and_then(|value| value.parse::<usize>().ok()),
            topic_model_path: env::var("INDEXSMITH_TOPIC_MODEL").ok().map(PathBuf::from),
            index_db_path: env::var("INDEXSMITH_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.index_db_path),
            min_topic_similarity: env::var("INDEXSMITH_MIN_TOPIC_SIMILARITY")
                .ok()
                .and_then(|value| value.parse::<f32>().ok())
                .unwrap_or(defaults.min_topic_similarity),
        }
    }

    /// Assembles a production pipeline around a concrete embedding backend.
    ///
    /// The model drives both the embedding adapter and the SQLite sink (which
    /// needs its dimensionality for the vector table). The topic model is
    /// loaded from [`topic_model_path`](Self::topic_model_path) when set.
    /// Which backend to hand in is the caller's choice; the pipeline treats
    /// it as a black box.
    pub async fn connect_with_model<E>(&self, model: E) -> Result<IndexPipeline, IndexError>
    where
        E: EmbeddingModel + Clone + Send + Sync + 'static,
    {
        if model.ndims() != self.embedding_dimensions {
            return Err(IndexError::Configuration(format!(
                "embedding model produces {} dimensions, config expects {}",
                model.ndims(),
                self.embedding_dimensions
            )));
        }

        let mut embedder = RigEmbeddingProvider::new(self.embedding_model.clone(), model.clone());
        if let Some(cap) = self.max_embed_batch {
            embedder = embedder.with_max_batch(cap);
        }

        let topics = match &self.topic_model_path {
            Some(path) => TopicModel::load(path).await?,
            None => TopicModel::empty().with_min_similarity(self.min_topic_similarity),
        };

        let sink = SqliteSinkGateway::new(self.index_db_path.clone(), model);

        Ok(IndexPipeline::builder()
            .embedder(embedder)
            .topic_model(topics)
            .sink(sink)
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = IndexConfig::default();
        assert_eq!(config.embedding_model, "text-embedding-3-small");
        assert_eq!(config.embedding_dimensions, 1536);
        assert!(config.max_embed_batch.is_none());
        assert!(config.topic_model_path.is_none());
    }

    #[test]
    fn from_env_falls_back_to_defaults_when_unset() {
        // Env mutation in tests races with parallel cases, so this only
        // exercises the fallback path with the variables absent.
        let config = IndexConfig::from_env();
        let defaults = IndexConfig::default();
        if env::var("INDEXSMITH_EMBEDDING_MODEL").is_err() {
            assert_eq!(config.embedding_model, defaults.embedding_model);
        }
        if env::var("INDEXSMITH_DB").is_err() {
            assert_eq!(config.index_db_path, defaults.index_db_path);
        }
    }
}
