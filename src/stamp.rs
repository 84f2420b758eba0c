//! Ownership stamping: tagging every document in a batch with the calling
//! identity.

use serde_json::Value;

use crate::types::{Document, IndexError, ReservedKey};

/// Returns a new batch in which every document carries the caller's identity.
///
/// The input documents are left untouched. Each output document's metadata is
/// the shallow union of the original metadata and `{user_id: <user_id>}`, with
/// the identity winning key collisions, so stamping is stable under repeated
/// application with the same identity.
///
/// Fails with [`IndexError::Configuration`] when `user_id` is empty or
/// whitespace; this is checked before any per-document work since all
/// downstream metadata depends on it.
pub fn stamp_user_id(documents: &[Document], user_id: &str) -> Result<Vec<Document>, IndexError> {
    if user_id.trim().is_empty() {
        return Err(IndexError::Configuration(
            "user_id must be a non-empty string".to_string(),
        ));
    }

    Ok(documents
        .iter()
        .map(|doc| {
            let mut metadata = doc.metadata.clone();
            metadata.insert(
                ReservedKey::UserId.as_str().to_string(),
                Value::String(user_id.to_string()),
            );
            Document {
                id: doc.id.clone(),
                content: doc.content.clone(),
                metadata,
            }
        })
        .collect())
}
