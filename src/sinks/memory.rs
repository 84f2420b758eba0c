//! In-process sink for tests and offline development.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{SinkGateway, SinkSession};
use crate::types::{EnrichedDocument, IndexError};

/// Gateway backed by process memory.
///
/// Committed documents and acquisition counters are observable, which makes
/// this the workhorse for pipeline tests: assertions can check both *what*
/// was indexed and *whether* the sink was touched at all.
#[derive(Clone, Debug, Default)]
pub struct MemorySinkGateway {
    committed: Arc<Mutex<Vec<EnrichedDocument>>>,
    sessions: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
}

impl MemorySinkGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every document committed so far, in commit order.
    pub fn committed(&self) -> Vec<EnrichedDocument> {
        self.committed.lock().clone()
    }

    pub fn committed_count(&self) -> usize {
        self.committed.lock().len()
    }

    /// Number of sessions opened, for asserting scoped-acquisition behavior.
    pub fn sessions_acquired(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Number of `commit` calls observed across all sessions.
    pub fn commit_calls(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SinkGateway for MemorySinkGateway {
    async fn acquire(&self) -> Result<Box<dyn SinkSession>, IndexError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySinkSession {
            committed: Arc::clone(&self.committed),
            commits: Arc::clone(&self.commits),
        }))
    }
}

struct MemorySinkSession {
    committed: Arc<Mutex<Vec<EnrichedDocument>>>,
    commits: Arc<AtomicUsize>,
}

#[async_trait]
impl SinkSession for MemorySinkSession {
    async fn commit(&mut self, batch: Vec<EnrichedDocument>) -> Result<(), IndexError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.committed.lock().extend(batch);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), IndexError> {
        Ok(())
    }
}
