//! Indexing node for weavegraph workflows.

use async_trait::async_trait;
use std::sync::Arc;

use weavegraph::node::{Node, NodeContext, NodeError, NodePartial};
use weavegraph::state::StateSnapshot;
use weavegraph::utils::collections::new_extra_map;

use crate::context::RequestContext;
use crate::pipeline::IndexPipeline;
use crate::types::{Document, IndexError, PipelineState};

/// Error type for indexing node operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexingNodeError {
    /// The input key was not found in the state's extra map.
    #[error("input key '{key}' not found in state.extra")]
    InputNotFound { key: String },

    /// The input value could not be parsed as the expected type.
    #[error("input key '{key}' has invalid type: expected {expected}")]
    InvalidInputType { key: String, expected: &'static str },

    /// The enrichment pipeline failed.
    #[error("indexing failed: {0}")]
    IndexingFailed(#[from] IndexError),
}

impl From<IndexingNodeError> for NodeError {
    fn from(err: IndexingNodeError) -> Self {
        NodeError::ValidationFailed(err.to_string())
    }
}

/// A weavegraph [`Node`] that runs the enrichment pipeline over documents
/// held in workflow state.
///
/// # Input/Output
///
/// - **Input**: Reads a JSON array of documents from `state.extra[docs_key]`
///   and the caller identity string from `state.extra[user_key]`
/// - **Output**: Writes `"delete"` back under `docs_key`, the completion
///   directive telling the state reducer the batch is consumed
///
/// # Event Emission
///
/// The node emits progress events via the [`NodeContext`]:
/// - `indexing:start` - When the batch is handed to the pipeline
/// - `indexing:complete` - When the batch has been committed
pub struct IndexingNode {
    pipeline: Arc<IndexPipeline>,
    docs_key: String,
    user_key: String,
    emit_events: bool,
}

impl IndexingNode {
    /// Create a new builder for constructing an `IndexingNode`.
    pub fn builder() -> IndexingNodeBuilder {
        IndexingNodeBuilder::default()
    }

    fn parse_docs(&self, snapshot: &StateSnapshot) -> Result<Vec<Document>, IndexingNodeError> {
        let value = snapshot
            .extra
            .get(&self.docs_key)
            .ok_or_else(|| IndexingNodeError::InputNotFound {
                key: self.docs_key.clone(),
            })?;

        serde_json::from_value(value.clone()).map_err(|_| IndexingNodeError::InvalidInputType {
            key: self.docs_key.clone(),
            expected: "JSON array of documents",
        })
    }

    fn parse_user_id(&self, snapshot: &StateSnapshot) -> Result<String, IndexingNodeError> {
        let value = snapshot
            .extra
            .get(&self.user_key)
            .ok_or_else(|| IndexingNodeError::InputNotFound {
                key: self.user_key.clone(),
            })?;

        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| IndexingNodeError::InvalidInputType {
                key: self.user_key.clone(),
                expected: "string",
            })
    }
}

#[async_trait]
impl Node for IndexingNode {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodePartial, NodeError> {
        let docs = self.parse_docs(&snapshot)?;
        let user_id = self.parse_user_id(&snapshot)?;
        let count = docs.len();

        if self.emit_events {
            let _ = ctx.emit(
                "indexing",
                format!("Indexing {count} documents from key '{}'", self.docs_key),
            );
        }

        let context = RequestContext::new(user_id);
        let signal = self
            .pipeline
            .run(PipelineState::new(docs), &context)
            .await
            .map_err(IndexingNodeError::IndexingFailed)?;

        if self.emit_events {
            let _ = ctx.emit("indexing", format!("Indexed {count} documents"));
        }

        // Merge the clear directive into state under the docs key, so the
        // reducer drops the consumed batch.
        let mut extra = new_extra_map();
        extra.insert(self.docs_key.clone(), serde_json::to_value(signal.docs)?);

        Ok(NodePartial::new().with_extra(extra))
    }
}

/// Builder for constructing [`IndexingNode`] instances.
pub struct IndexingNodeBuilder {
    pipeline: Option<Arc<IndexPipeline>>,
    docs_key: Option<String>,
    user_key: Option<String>,
    emit_events: bool,
}

impl Default for IndexingNodeBuilder {
    fn default() -> Self {
        Self {
            pipeline: None,
            docs_key: None,
            user_key: None,
            emit_events: true,
        }
    }
}

impl IndexingNodeBuilder {
    /// Set the pipeline to run.
    ///
    /// This is required before calling [`build()`](Self::build).
    #[must_use]
    pub fn pipeline(mut self, pipeline: IndexPipeline) -> Self {
        self.pipeline = Some(Arc::new(pipeline));
        self
    }

    /// Set the pipeline from an existing Arc.
    ///
    /// Use this to share a pipeline across multiple nodes.
    #[must_use]
    pub fn pipeline_arc(mut self, pipeline: Arc<IndexPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Set the key holding the document batch in `state.extra`.
    ///
    /// Defaults to `"docs"`.
    #[must_use]
    pub fn docs_key(mut self, key: impl Into<String>) -> Self {
        self.docs_key = Some(key.into());
        self
    }

    /// Set the key holding the caller identity in `state.extra`.
    ///
    /// Defaults to `"user_id"`.
    #[must_use]
    pub fn user_key(mut self, key: impl Into<String>) -> Self {
        self.user_key = Some(key.into());
        self
    }

    /// Enable or disable event emission during indexing.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn emit_events(mut self, emit: bool) -> Self {
        self.emit_events = emit;
        self
    }

    /// Build the [`IndexingNode`].
    ///
    /// # Panics
    ///
    /// Panics if [`pipeline()`](Self::pipeline) was not called.
    pub fn build(self) -> IndexingNode {
        IndexingNode {
            pipeline: self.pipeline.expect("IndexingNodeBuilder requires a pipeline"),
            docs_key: self.docs_key.unwrap_or_else(|| "docs".to_string()),
            user_key: self.user_key.unwrap_or_else(|| "user_id".to_string()),
            emit_events: self.emit_events,
        }
    }

    /// Build the [`IndexingNode`], returning `None` if the pipeline is not set.
    pub fn try_build(self) -> Option<IndexingNode> {
        Some(IndexingNode {
            pipeline: self.pipeline?,
            docs_key: self.docs_key.unwrap_or_else(|| "docs".to_string()),
            user_key: self.user_key.unwrap_or_else(|| "user_id".to_string()),
            emit_events: self.emit_events,
        })
    }
}
