//! Index sink gateways: scoped access to the storage backend.
//!
//! A [`SinkGateway`] lives for the life of the process; each pipeline run
//! acquires its own [`SinkSession`], commits exactly one batch, and closes the
//! session. `close` runs on every exit path, including failures; dropping an
//! unclosed session still releases its resources as a backstop, so a
//! cancelled run cannot leak a backend handle.
//!
//! # Supported Backends
//!
//! - [`MemorySinkGateway`] - in-process store for tests and offline work
//! - [`sqlite::SqliteSinkGateway`] - SQLite with vector search via `sqlite-vec`

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::types::{EnrichedDocument, IndexError};

// Re-exports for convenience
pub use memory::MemorySinkGateway;
pub use sqlite::{IndexedDocument, SqliteSinkGateway};

/// Hands out one backend session per pipeline run.
#[async_trait]
pub trait SinkGateway: Send + Sync {
    /// Opens a backend handle scoped to a single run.
    async fn acquire(&self) -> Result<Box<dyn SinkSession>, IndexError>;
}

/// A scoped connection to the storage backend.
///
/// All-or-nothing from the caller's view: a `commit` error means nothing from
/// this invocation is reported as indexed. Backend rejections surface as
/// [`IndexError::Sink`] and propagate unmodified.
#[async_trait]
pub trait SinkSession: Send {
    /// Adds the whole enriched batch to the index.
    async fn commit(&mut self, batch: Vec<EnrichedDocument>) -> Result<(), IndexError>;

    /// Releases the backend handle.
    async fn close(self: Box<Self>) -> Result<(), IndexError>;
}
