//! Per-invocation request context: caller identity plus backend connection
//! options.

use crate::config::IndexConfig;
use crate::types::IndexError;

/// Read-only context for a single pipeline invocation.
///
/// Constructed once per call, discarded afterwards. The identity is required
/// and validated before any enrichment work; the connection options are only
/// consulted by callers that assemble a pipeline per request (see
/// [`IndexConfig`]).
#[derive(Clone, Debug)]
pub struct RequestContext {
    user_id: String,
    config: IndexConfig,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            config: IndexConfig::default(),
        }
    }

    /// Attach backend connection options to this request.
    #[must_use]
    pub fn with_config(mut self, config: IndexConfig) -> Self {
        self.config = config;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Rejects the request before any enrichment work begins.
    ///
    /// All downstream metadata depends on the identity, so a missing or empty
    /// `user_id` fails here with [`IndexError::Configuration`].
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.user_id.trim().is_empty() {
            return Err(IndexError::Configuration(
                "user_id must be a non-empty string".to_string(),
            ));
        }
        Ok(())
    }
}
