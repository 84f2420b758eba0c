//! Document enrichment pipeline for retrieval-augmented indexing.
//!
//! ```text
//! PipelineState (docs) ──► stamp::stamp_user_id ──► stamped documents
//!                                   ▲
//! RequestContext (user_id) ─────────┘
//!
//! stamped documents ──► embeddings::EmbeddingProvider ──► aligned vectors
//!
//! (documents, vectors) ──► topics::TopicAssigner ──► labeled documents
//!
//! labeled documents ──► sinks::SinkGateway session ──► committed batch
//!                                    │
//!                                    └──► CompletionSignal ("docs": "delete")
//! ```
//!
//! The embedding backend, the index backend, and the orchestrator that
//! invokes the pipeline all sit behind traits; [`config::IndexConfig`] wires
//! a production pipeline (rig embedding model + SQLite vector sink) from
//! plain configuration, while tests swap in the mock provider and the
//! in-memory sink.

pub mod config;
pub mod context;
pub mod embeddings;
pub mod pipeline;
pub mod sinks;
pub mod stamp;
pub mod topics;
pub mod types;

#[cfg(feature = "weavegraph-nodes")]
pub mod nodes;

pub use config::IndexConfig;
pub use context::RequestContext;
pub use pipeline::{IndexPipeline, Stage};
pub use types::{
    CompletionSignal, Document, EnrichedDocument, IndexError, PipelineState, ReservedKey,
};
