//! In-process document store, used for dry runs and tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::StoreError;
use crate::document::{self, DocPath, Document, DocumentStore, WriteBatch};

#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<DocPath, Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.docs.lock().await.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        Ok(self.docs.lock().await.get(path).cloned())
    }

    async fn list(&self, collection: &str) -> Result<Vec<(DocPath, Document)>, StoreError> {
        document::validate_collection(collection)?;
        let docs = self.docs.lock().await;
        Ok(docs
            .iter()
            .filter(|(path, _)| path.collection() == collection)
            .map(|(path, doc)| (path.clone(), doc.clone()))
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let now = document::server_timestamp();
        let mut docs = self.docs.lock().await;
        for op in batch.into_ops() {
            let existing = docs.remove(&op.path);
            let path = op.path.clone();
            let updated = document::apply(existing, op, &now);
            docs.insert(path, updated);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = MemoryStore::new();
        let path = DocPath::parse("runs/r1").unwrap();
        assert!(store.get(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_then_read_back() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch
            .set(DocPath::parse("entities/B01/items/R1").unwrap(), doc(json!({"text": "a"})))
            .set(DocPath::parse("entities/B01/items/R2").unwrap(), doc(json!({"text": "b"})))
            .set(DocPath::parse("entities/B02/items/R3").unwrap(), doc(json!({"text": "c"})));
        store.commit(batch).await.unwrap();

        let listed = store.list("entities/B01/items").await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|(p, _)| p.id()).collect();
        assert_eq!(ids, vec!["R1", "R2"]);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn merge_keeps_unrelated_fields() {
        let store = MemoryStore::new();
        let path = DocPath::parse("runs/r1").unwrap();
        let mut batch = WriteBatch::new();
        batch.set(path.clone(), doc(json!({"entityIds": ["B01"], "status": "started"})));
        store.commit(batch).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.merge_stamped(path.clone(), doc(json!({"status": "fetched"})), "fetchedAt");
        store.commit(batch).await.unwrap();

        let run = store.get(&path).await.unwrap().unwrap();
        assert_eq!(run["status"], "fetched");
        assert_eq!(run["entityIds"], json!(["B01"]));
        assert!(run["fetchedAt"].is_string());
    }

    #[tokio::test]
    async fn list_rejects_document_paths() {
        let store = MemoryStore::new();
        assert!(store.list("runs/r1").await.is_err());
    }
}
