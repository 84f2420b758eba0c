//! Embedding provider adapters: one batched call from texts to vectors.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rig::embeddings::embedding::EmbeddingModel;
use tracing::debug;

use crate::types::IndexError;

/// Uniform batch contract over a configured embedding backend.
///
/// Implementations must be length- and order-preserving: vector `i` of the
/// output corresponds to text `i` of the input, and downstream topic
/// assignment depends on that alignment. Backend failures surface as
/// [`IndexError::EmbeddingProvider`] and are never retried here; the caller
/// owns retry policy.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier used in logs and error messages.
    fn id(&self) -> &str;

    /// Dimensionality of the produced vectors.
    fn dimensions(&self) -> usize;

    /// Embeds the whole batch in one backend call.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError>;
}

/// Adapter over any rig [`EmbeddingModel`].
///
/// The backend is treated as a black box; this adapter only batches the full
/// input (rather than calling per text) and narrows the returned `f64`
/// components to `f32`.
#[derive(Clone)]
pub struct RigEmbeddingProvider<M> {
    id: String,
    model: M,
    max_batch: Option<usize>,
}

impl<M> RigEmbeddingProvider<M>
where
    M: EmbeddingModel,
{
    pub fn new(id: impl Into<String>, model: M) -> Self {
        Self {
            id: id.into(),
            model,
            max_batch: None,
        }
    }

    /// Caps the number of texts sent to the backend per call.
    ///
    /// Oversized batches are split into ordered sub-batches; output order
    /// still matches input order. Uncapped by default.
    #[must_use]
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = Some(max_batch.max(1));
        self
    }

    async fn embed_slice(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let embeddings = self
            .model
            .embed_texts(texts.iter().cloned())
            .await
            .map_err(|err| self.provider_error(err.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(self.provider_error(format!(
                "returned {} vectors for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }

        Ok(embeddings
            .into_iter()
            .map(|embedding| embedding.vec.into_iter().map(|v| v as f32).collect())
            .collect())
    }

    fn provider_error(&self, message: String) -> IndexError {
        IndexError::EmbeddingProvider {
            provider: self.id.clone(),
            message,
        }
    }
}

#[async_trait]
impl<M> EmbeddingProvider for RigEmbeddingProvider<M>
where
    M: EmbeddingModel,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn dimensions(&self) -> usize {
        self.model.ndims()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let Some(cap) = self.max_batch else {
            return self.embed_slice(texts).await;
        };

        let mut vectors = Vec::with_capacity(texts.len());
        for window in texts.chunks(cap) {
            vectors.extend(self.embed_slice(window).await?);
        }
        debug!(
            provider = %self.id,
            texts = texts.len(),
            sub_batches = texts.len().div_ceil(cap),
            "split embedding batch"
        );
        Ok(vectors)
    }
}

/// Deterministic provider for tests and offline development.
///
/// Vectors are derived from a hash of the text, so identical texts always
/// embed identically while distinct texts diverge. The call counter lets
/// tests assert how often the backend was reached.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
    calls: Arc<AtomicUsize>,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self::with_dimensions(8)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of `embed_batch` calls observed so far.
    pub fn batch_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hash_to_vec(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();
        (0..self.dimensions)
            .map(|i| {
                let bits = seed.rotate_left((i % 64) as u32) ^ ((i as u64) << 7);
                ((bits % 2048) as f32 / 1024.0) - 1.0
            })
            .collect()
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn id(&self) -> &str {
        "mock"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|text| self.hash_to_vec(text)).collect())
    }
}
