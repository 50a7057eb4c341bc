//! DuckDB-backed document store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use duckdb::{Connection, OptionalExt, params};
use tracing::{debug, info};

use crate::StoreError;
use crate::document::{self, DocPath, Document, DocumentStore, WriteBatch};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS documents (
    path VARCHAR PRIMARY KEY,
    parent VARCHAR NOT NULL,
    body VARCHAR NOT NULL
)";

/// Documents kept as JSON text in one `documents` table, keyed by path and
/// indexed by parent collection.
///
/// Supports both in-memory (ephemeral) and persistent (file-backed) modes.
/// Each [`commit`](DocumentStore::commit) runs in a single transaction.
pub struct DuckStore {
    conn: Mutex<Connection>,
}

impl DuckStore {
    /// Open an in-memory DuckDB database.
    pub fn open() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let store = Self::init(Connection::open(path)?)?;
        info!(path = %path.display(), "opened document store");
        Ok(store)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Other("document store lock poisoned".into()))
    }

    /// Number of stored documents.
    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT count(*) FROM documents", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn decode(path: &str, body: &str) -> Result<Document, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Malformed {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl DocumentStore for DuckStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        let key = path.to_string();
        let conn = self.lock()?;
        let body: Option<String> = conn
            .query_row("SELECT body FROM documents WHERE path = ?", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        body.map(|b| decode(&key, &b)).transpose()
    }

    async fn list(&self, collection: &str) -> Result<Vec<(DocPath, Document)>, StoreError> {
        document::validate_collection(collection)?;
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT path, body FROM documents WHERE parent = ? ORDER BY path")?;
        let rows = stmt.query_map(params![collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (path, body) = row?;
            out.push((DocPath::parse(&path)?, decode(&path, &body)?));
        }
        Ok(out)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let now = document::server_timestamp();
        let ops = batch.len();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for op in batch.into_ops() {
            let key = op.path.to_string();
            let parent = op.path.collection();
            let existing: Option<String> = tx
                .query_row("SELECT body FROM documents WHERE path = ?", params![key], |row| {
                    row.get(0)
                })
                .optional()?;
            let existing = existing.map(|b| decode(&key, &b)).transpose()?;
            let updated = document::apply(existing, op, &now);
            let body = serde_json::to_string(&updated)?;
            tx.execute(
                "INSERT OR REPLACE INTO documents (path, parent, body) VALUES (?, ?, ?)",
                params![key, parent, body],
            )?;
        }
        tx.commit()?;
        debug!(ops, "committed write batch");
        Ok(())
    }
}
