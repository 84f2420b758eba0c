//! The enrichment pipeline: stamp, embed, assign, commit, signal.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::context::RequestContext;
use crate::embeddings::EmbeddingProvider;
use crate::sinks::{SinkGateway, SinkSession};
use crate::stamp::stamp_user_id;
use crate::topics::{TopicAssigner, TopicModel};
use crate::types::{CompletionSignal, EnrichedDocument, IndexError, PipelineState};

/// Progress of one pipeline invocation.
///
/// Every run walks this machine front to back; an error short-circuits to
/// [`Stage::Failed`]. `Completed` and `Failed` are the only terminal states;
/// there is no retry loop inside the pipeline itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Validating,
    Stamping,
    Embedding,
    Assigning,
    Committing,
    Completed,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Validating => "validating",
            Stage::Stamping => "stamping",
            Stage::Embedding => "embedding",
            Stage::Assigning => "assigning",
            Stage::Committing => "committing",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

impl IndexError {
    /// Pipeline stage in which this error class faults during a run.
    ///
    /// Load-time errors (topic model, serde, io) occur while a pipeline is
    /// being assembled and map to [`Stage::Validating`].
    pub fn stage(&self) -> Stage {
        match self {
            IndexError::Configuration(_) => Stage::Validating,
            IndexError::EmbeddingProvider { .. } => Stage::Embedding,
            IndexError::InvariantViolation(_) => Stage::Assigning,
            IndexError::Sink(_) => Stage::Committing,
            IndexError::TopicModel(_) | IndexError::Serde(_) | IndexError::Io(_) => {
                Stage::Validating
            }
        }
    }
}

/// Orchestrates document enrichment and the atomic handoff into the index.
///
/// Components are read-only shared handles, so one pipeline serves concurrent
/// invocations; each run owns its batch and its sink session, and no state is
/// shared between runs.
///
/// # Run Sequence
///
/// Validate context → stamp ownership → embed contents (one batched call) →
/// assign topics from the position-aligned vectors → commit the whole batch →
/// return the completion signal. An empty input batch still validates the
/// context but touches neither the embedding backend nor the sink.
///
/// # Atomicity
///
/// Any stage failure aborts the run before the sink commit; partial batches
/// are never indexed. The sink session acquired for the run is closed on
/// every exit path. If the backend fails *after* a successful commit (during
/// release), the error still propagates; callers that retry must rely on the
/// sink's upsert semantics.
pub struct IndexPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    assigner: TopicAssigner,
    sink: Arc<dyn SinkGateway>,
}

impl IndexPipeline {
    /// Create a new builder for constructing an `IndexPipeline`.
    pub fn builder() -> IndexPipelineBuilder {
        IndexPipelineBuilder::default()
    }

    /// Runs one unit of work through the pipeline.
    pub async fn run(
        &self,
        state: PipelineState,
        context: &RequestContext,
    ) -> Result<CompletionSignal, IndexError> {
        let mut stage = Stage::Idle;

        advance(&mut stage, Stage::Validating);
        if let Err(err) = context.validate() {
            fail(&mut stage, &err);
            return Err(err);
        }

        if state.is_empty() {
            // Indexing an empty batch is vacuously successful.
            debug!(user_id = %context.user_id(), "empty input batch, nothing to index");
            advance(&mut stage, Stage::Completed);
            return Ok(CompletionSignal::clear_documents());
        }

        let mut session = match self.sink.acquire().await {
            Ok(session) => session,
            Err(err) => {
                fail(&mut stage, &err);
                return Err(err);
            }
        };

        let enriched = match self.enrich(&state, context, &mut stage).await {
            Ok(enriched) => enriched,
            Err(err) => {
                if let Err(close_err) = session.close().await {
                    warn!(error = %close_err, "sink session close failed after aborted run");
                }
                fail(&mut stage, &err);
                return Err(err);
            }
        };

        advance(&mut stage, Stage::Committing);
        let committed = session.commit(enriched).await;
        let closed = session.close().await;
        if let Err(err) = committed {
            if let Err(close_err) = closed {
                warn!(error = %close_err, "sink session close failed after rejected commit");
            }
            fail(&mut stage, &err);
            return Err(err);
        }
        if let Err(err) = closed {
            fail(&mut stage, &err);
            return Err(err);
        }

        advance(&mut stage, Stage::Completed);
        info!(
            documents = state.len(),
            user_id = %context.user_id(),
            "batch enriched and indexed"
        );
        Ok(CompletionSignal::clear_documents())
    }

    async fn enrich(
        &self,
        state: &PipelineState,
        context: &RequestContext,
        stage: &mut Stage,
    ) -> Result<Vec<EnrichedDocument>, IndexError> {
        advance(stage, Stage::Stamping);
        let stamped = stamp_user_id(&state.docs, context.user_id())?;

        advance(stage, Stage::Embedding);
        let texts: Vec<String> = stamped.iter().map(|doc| doc.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        advance(stage, Stage::Assigning);
        let labeled = self.assigner.assign(stamped, &vectors)?;

        Ok(labeled
            .into_iter()
            .zip(vectors)
            .map(|(document, embedding)| EnrichedDocument {
                document,
                embedding,
            })
            .collect())
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    debug!(from = %stage, to = %next, "pipeline stage transition");
    *stage = next;
}

fn fail(stage: &mut Stage, err: &IndexError) {
    error!(stage = %stage, error = %err, "pipeline run failed");
    *stage = Stage::Failed;
}

/// Builder for constructing [`IndexPipeline`] instances.
#[derive(Default)]
pub struct IndexPipelineBuilder {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    topics: Option<Arc<TopicModel>>,
    sink: Option<Arc<dyn SinkGateway>>,
}

impl IndexPipelineBuilder {
    /// Set the embedding provider adapter.
    ///
    /// This is required before calling [`build()`](Self::build).
    #[must_use]
    pub fn embedder(mut self, embedder: impl EmbeddingProvider + 'static) -> Self {
        self.embedder = Some(Arc::new(embedder));
        self
    }

    /// Set the embedding provider from an existing Arc.
    #[must_use]
    pub fn embedder_arc(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Set the pre-fit topic model.
    ///
    /// This is required before calling [`build()`](Self::build).
    #[must_use]
    pub fn topic_model(mut self, model: TopicModel) -> Self {
        self.topics = Some(Arc::new(model));
        self
    }

    /// Set the topic model from an existing Arc.
    ///
    /// Use this to share one model across pipelines.
    #[must_use]
    pub fn topic_model_arc(mut self, model: Arc<TopicModel>) -> Self {
        self.topics = Some(model);
        self
    }

    /// Set the index sink gateway.
    ///
    /// This is required before calling [`build()`](Self::build).
    #[must_use]
    pub fn sink(mut self, sink: impl SinkGateway + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Set the sink gateway from an existing Arc.
    #[must_use]
    pub fn sink_arc(mut self, sink: Arc<dyn SinkGateway>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build the [`IndexPipeline`].
    ///
    /// # Panics
    ///
    /// Panics if the embedder, topic model, or sink was not set.
    pub fn build(self) -> IndexPipeline {
        self.try_build()
            .expect("IndexPipelineBuilder requires an embedder, a topic model, and a sink")
    }

    /// Build the [`IndexPipeline`], returning `None` if a component is missing.
    pub fn try_build(self) -> Option<IndexPipeline> {
        Some(IndexPipeline {
            embedder: self.embedder?,
            assigner: TopicAssigner::new(self.topics?),
            sink: self.sink?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_all_components() {
        assert!(IndexPipelineBuilder::default().try_build().is_none());

        let partial = IndexPipeline::builder()
            .embedder(crate::embeddings::MockEmbeddingProvider::new())
            .topic_model(TopicModel::empty());
        assert!(partial.try_build().is_none());
    }

    #[test]
    fn error_classes_map_to_their_stage() {
        assert_eq!(
            IndexError::Configuration("x".into()).stage(),
            Stage::Validating
        );
        assert_eq!(
            IndexError::EmbeddingProvider {
                provider: "p".into(),
                message: "m".into()
            }
            .stage(),
            Stage::Embedding
        );
        assert_eq!(
            IndexError::InvariantViolation("x".into()).stage(),
            Stage::Assigning
        );
        assert_eq!(IndexError::Sink("x".into()).stage(), Stage::Committing);
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        for stage in [
            Stage::Idle,
            Stage::Validating,
            Stage::Stamping,
            Stage::Embedding,
            Stage::Assigning,
            Stage::Committing,
        ] {
            assert!(!stage.is_terminal(), "{stage} must not be terminal");
        }
        assert!(Stage::Completed.is_terminal());
        assert!(Stage::Failed.is_terminal());
    }
}
