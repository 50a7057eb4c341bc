//! Hierarchical JSON documents addressed by slash-separated paths, written
//! through atomic batches.
//!
//! Paths alternate collection and document ids: `runs/r1`,
//! `entities/B01/items/R7`. A batch's operations are applied all together or
//! not at all.

use std::fmt;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::StoreError;

/// A JSON object stored at one path.
pub type Document = Map<String, Value>;

/// Path of a single document: an even number of non-empty segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocPath {
    segments: Vec<String>,
}

impl DocPath {
    pub fn new<S: AsRef<str>>(segments: &[S]) -> Result<Self, StoreError> {
        let segments: Vec<String> = segments.iter().map(|s| s.as_ref().to_string()).collect();
        if segments.is_empty() || segments.len() % 2 != 0 {
            return Err(StoreError::InvalidPath(segments.join("/")));
        }
        if segments.iter().any(|s| s.is_empty() || s.contains('/')) {
            return Err(StoreError::InvalidPath(segments.join("/")));
        }
        Ok(Self { segments })
    }

    pub fn parse(path: &str) -> Result<Self, StoreError> {
        let segments: Vec<&str> = path.split('/').collect();
        Self::new(&segments)
    }

    /// The collection this document lives in, e.g. `entities/B01/items`.
    pub fn collection(&self) -> String {
        self.segments[..self.segments.len() - 1].join("/")
    }

    /// The last segment.
    pub fn id(&self) -> &str {
        self.segments
            .last()
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Check a collection path: an odd number of non-empty segments.
pub fn validate_collection(collection: &str) -> Result<(), StoreError> {
    let segments: Vec<&str> = collection.split('/').collect();
    if segments.len() % 2 != 1 || segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidPath(collection.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the whole document.
    Set,
    /// Merge fields into the existing document, recursing into objects.
    Merge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    pub path: DocPath,
    pub mode: WriteMode,
    pub document: Document,
    /// Fields to fill with the commit time.
    pub timestamp_fields: Vec<String>,
}

/// Operations committed together by [`DocumentStore::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: DocPath, document: Document) -> &mut Self {
        self.push(path, WriteMode::Set, document, Vec::new())
    }

    pub fn merge(&mut self, path: DocPath, document: Document) -> &mut Self {
        self.push(path, WriteMode::Merge, document, Vec::new())
    }

    /// Merge and stamp `timestamp_field` with the store's commit time.
    pub fn merge_stamped(
        &mut self,
        path: DocPath,
        document: Document,
        timestamp_field: &str,
    ) -> &mut Self {
        self.push(path, WriteMode::Merge, document, vec![timestamp_field.to_string()])
    }

    fn push(
        &mut self,
        path: DocPath,
        mode: WriteMode,
        document: Document,
        timestamp_fields: Vec<String>,
    ) -> &mut Self {
        self.ops.push(WriteOp {
            path,
            mode,
            document,
            timestamp_fields,
        });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Commit time as RFC 3339 UTC, millisecond precision.
pub fn server_timestamp() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn merge_into(target: &mut Document, patch: Document) {
    for (key, value) in patch {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming)
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Apply one operation to the current document (if any) at its path.
pub fn apply(existing: Option<Document>, op: WriteOp, now: &Value) -> Document {
    let mut document = match (op.mode, existing) {
        (WriteMode::Merge, Some(mut current)) => {
            merge_into(&mut current, op.document);
            current
        }
        (_, _) => op.document,
    };
    for field in op.timestamp_fields {
        document.insert(field, now.clone());
    }
    document
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError>;

    /// Documents directly inside `collection`, ordered by path.
    async fn list(&self, collection: &str) -> Result<Vec<(DocPath, Document)>, StoreError>;

    /// Apply every operation atomically.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;
}
