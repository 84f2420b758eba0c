//! SQLite-backed sink built on `rig-sqlite` with the `sqlite-vec` extension.

use rig::OneOrMany;
use rig::embeddings::{Embedding, EmbeddingModel};
use rig_sqlite::{Column, ColumnValue, SqliteVectorStore, SqliteVectorStoreTable};
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use std::mem::transmute;
use std::os::raw::c_char;
use std::path::PathBuf;
use std::sync::Once;
use tokio_rusqlite::{Connection, ffi};

use super::{SinkGateway, SinkSession};
use async_trait::async_trait;

use crate::types::{EnrichedDocument, IndexError, ReservedKey};

/// Row shape for enriched documents in the `documents` table.
///
/// `user_id` and `topic` are lifted out of the metadata map into indexed
/// columns so query-time filtering by owner and topic stays cheap; the full
/// metadata map is kept alongside as JSON text.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: String,
    pub user_id: String,
    pub topic: String,
    pub content: String,
    #[serde(deserialize_with = "deserialize_metadata_field")]
    pub metadata: serde_json::Value,
}

impl IndexedDocument {
    /// Flattens an enriched document into its row shape.
    pub fn from_enriched(enriched: &EnrichedDocument) -> Self {
        let document = &enriched.document;
        Self {
            id: document.id.clone(),
            user_id: document
                .metadata_str(ReservedKey::UserId)
                .unwrap_or_default()
                .to_string(),
            topic: document
                .metadata_str(ReservedKey::Topic)
                .unwrap_or_default()
                .to_string(),
            content: document.content.clone(),
            metadata: serde_json::Value::Object(document.metadata.clone()),
        }
    }
}

impl SqliteVectorStoreTable for IndexedDocument {
    fn name() -> &'static str {
        "documents"
    }

    fn schema() -> Vec<Column> {
        vec![
            Column::new("id", "TEXT PRIMARY KEY"),
            Column::new("user_id", "TEXT").indexed(),
            Column::new("topic", "TEXT").indexed(),
            Column::new("metadata", "TEXT"),
            Column::new("content", "TEXT"),
        ]
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn column_values(&self) -> Vec<(&'static str, Box<dyn ColumnValue>)> {
        vec![
            ("id", Box::new(self.id.clone())),
            ("user_id", Box::new(self.user_id.clone())),
            ("topic", Box::new(self.topic.clone())),
            ("metadata", Box::new(self.metadata.to_string())),
            ("content", Box::new(self.content.clone())),
        ]
    }
}

fn deserialize_metadata_field<'de, D>(deserializer: D) -> Result<serde_json::Value, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    if let serde_json::Value::String(raw) = value {
        serde_json::from_str(&raw).map_or(Ok(serde_json::Value::String(raw)), Ok)
    } else {
        Ok(value)
    }
}

/// Gateway that opens one SQLite-backed session per pipeline run.
///
/// The embedding model is only consulted for its dimensionality when the
/// vector table is created; vectors themselves arrive precomputed with the
/// batch.
#[derive(Clone)]
pub struct SqliteSinkGateway<E>
where
    E: EmbeddingModel + 'static,
{
    path: PathBuf,
    model: E,
}

impl<E> SqliteSinkGateway<E>
where
    E: EmbeddingModel + Clone + Send + Sync + 'static,
{
    pub fn new(path: impl Into<PathBuf>, model: E) -> Self {
        Self {
            path: path.into(),
            model,
        }
    }

    fn register_sqlite_vec() -> Result<(), IndexError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!(
                        "failed to register sqlite-vec extension (code {rc})"
                    ))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(IndexError::Sink)
    }
}

#[async_trait]
impl<E> SinkGateway for SqliteSinkGateway<E>
where
    E: EmbeddingModel + Clone + Send + Sync + 'static,
{
    async fn acquire(&self) -> Result<Box<dyn SinkSession>, IndexError> {
        Self::register_sqlite_vec()?;

        let conn = Connection::open(&self.path)
            .await
            .map_err(|err| IndexError::Sink(err.to_string()))?;
        conn.call(|conn| {
            let result = conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0));
            match result {
                Ok(_) => Ok(()),
                Err(err) => Err(tokio_rusqlite::Error::Rusqlite(err)),
            }
        })
        .await
        .map_err(|err| IndexError::Sink(err.to_string()))?;

        // Keep a handle for closing before the connection moves into the store.
        let conn_for_close = conn.clone();
        let store = SqliteVectorStore::new(conn, &self.model)
            .await
            .map_err(|err| IndexError::Sink(err.to_string()))?;

        Ok(Box::new(SqliteSinkSession {
            store,
            conn: conn_for_close,
        }))
    }
}

struct SqliteSinkSession<E>
where
    E: EmbeddingModel + 'static,
{
    store: SqliteVectorStore<E, IndexedDocument>,
    conn: Connection,
}

#[async_trait]
impl<E> SinkSession for SqliteSinkSession<E>
where
    E: EmbeddingModel + Clone + Send + Sync + 'static,
{
    async fn commit(&mut self, batch: Vec<EnrichedDocument>) -> Result<(), IndexError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut rows = Vec::with_capacity(batch.len());
        for enriched in batch {
            let row = IndexedDocument::from_enriched(&enriched);
            let vec: Vec<f64> = enriched.embedding.iter().map(|v| f64::from(*v)).collect();
            let embedding = Embedding {
                document: enriched.document.content,
                vec,
            };
            rows.push((row, OneOrMany::one(embedding)));
        }

        self.store
            .add_rows(rows)
            .await
            .map_err(|err| IndexError::Sink(err.to_string()))?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), IndexError> {
        // The store holds a clone of the same worker handle; drop it first so
        // the close below is the last reference.
        let SqliteSinkSession { store, conn } = *self;
        drop(store);
        conn.close()
            .await
            .map_err(|err| IndexError::Sink(err.to_string()))
    }
}
