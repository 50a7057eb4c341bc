//! Where a run's inputs and outputs live in the document store, and typed
//! reads and writes over those locations.
//!
//! ```text
//! runs/{run_id}                              {entityIds, status, <status>At}
//! entities/{entity_id}/items/{external_id}   {id, rating, text, attributes?, tags?}
//! insights/{run_id}/categories/{category}    {labels: [ConsolidatedLabel]}
//! clusters/{run_id}/attributes/{attribute}   {labels: [ConsolidatedLabel]}
//! clusters/{run_id}/entities/{entity_id}     {attributes: {attribute: [ConsolidatedLabel]}}
//! ```

use std::collections::BTreeMap;

use reviewlens_core::{ConsolidatedLabel, InsightTable, Item, RunStatus, SourceItem};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::StoreError;
use crate::document::{DocPath, Document, DocumentStore, WriteBatch};

pub fn run_path(run_id: &str) -> Result<DocPath, StoreError> {
    DocPath::new(&["runs", run_id])
}

pub fn items_collection(entity_id: &str) -> String {
    format!("entities/{entity_id}/items")
}

pub fn item_path(entity_id: &str, external_id: &str) -> Result<DocPath, StoreError> {
    DocPath::new(&["entities", entity_id, "items", external_id])
}

pub fn insight_path(run_id: &str, category: &str) -> Result<DocPath, StoreError> {
    DocPath::new(&["insights", run_id, "categories", category])
}

pub fn cluster_attribute_path(run_id: &str, attribute: &str) -> Result<DocPath, StoreError> {
    DocPath::new(&["clusters", run_id, "attributes", attribute])
}

pub fn cluster_entity_path(run_id: &str, entity_id: &str) -> Result<DocPath, StoreError> {
    DocPath::new(&["clusters", run_id, "entities", entity_id])
}

fn object(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

// ── Runs ──

/// Create or reset the run document with its entity list, stamped `started`.
pub async fn start_run(
    store: &dyn DocumentStore,
    run_id: &str,
    entity_ids: &[String],
) -> Result<(), StoreError> {
    let mut batch = WriteBatch::new();
    batch.merge_stamped(
        run_path(run_id)?,
        object(json!({ "entityIds": entity_ids, "status": RunStatus::Started })),
        &RunStatus::Started.timestamp_field(),
    );
    store.commit(batch).await
}

/// Record a status transition with a commit-time timestamp.
pub async fn set_status(
    store: &dyn DocumentStore,
    run_id: &str,
    status: RunStatus,
) -> Result<(), StoreError> {
    let mut batch = WriteBatch::new();
    batch.merge_stamped(
        run_path(run_id)?,
        object(json!({ "status": status })),
        &status.timestamp_field(),
    );
    store.commit(batch).await
}

/// Entity ids recorded on the run document.
pub async fn run_entities(
    store: &dyn DocumentStore,
    run_id: &str,
) -> Result<Vec<String>, StoreError> {
    let path = run_path(run_id)?;
    let Some(doc) = store.get(&path).await? else {
        return Ok(Vec::new());
    };
    match doc.get("entityIds") {
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| StoreError::Malformed {
            path: path.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(Vec::new()),
    }
}

// ── Items ──

/// Ratings arrive as integers, floats, or strings like "4.0 out of 5 stars".
fn parse_rating(value: &Value) -> Option<u8> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.split_whitespace().next()?.parse::<f64>().ok()?,
        _ => return None,
    };
    let rounded = number.round();
    (1.0..=5.0).contains(&rounded).then_some(rounded as u8)
}

fn parse_item(entity_id: &str, path: &DocPath, doc: &Document) -> Option<SourceItem> {
    let text = doc.get("text").and_then(Value::as_str)?.trim();
    if text.is_empty() {
        return None;
    }
    let rating = doc.get("rating").and_then(parse_rating)?;
    let external_id = doc
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_else(|| path.id())
        .to_string();
    let attributes = doc
        .get("attributes")
        .and_then(Value::as_object)
        .map(|attrs| {
            attrs
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Some(SourceItem {
        external_id,
        entity_id: entity_id.to_string(),
        rating,
        text: text.to_string(),
        attributes,
    })
}

/// Read every entity's items in entity order, then path order. Documents
/// without usable text or rating are skipped with a warning.
pub async fn fetch_items(
    store: &dyn DocumentStore,
    entity_ids: &[String],
) -> Result<Vec<SourceItem>, StoreError> {
    let mut items = Vec::new();
    for entity_id in entity_ids {
        let docs = store.list(&items_collection(entity_id)).await?;
        let before = items.len();
        for (path, doc) in &docs {
            match parse_item(entity_id, path, doc) {
                Some(item) => items.push(item),
                None => warn!(path = %path, "skipping item without text or rating"),
            }
        }
        info!(entity = %entity_id, count = items.len() - before, "fetched items");
    }
    Ok(items)
}

/// Merge tags and attributes back onto item documents, one atomic batch per
/// entity. Returns the entities whose batch failed.
pub async fn write_items(store: &dyn DocumentStore, items: &[Item]) -> Vec<String> {
    let mut by_entity: BTreeMap<&str, Vec<&Item>> = BTreeMap::new();
    for item in items {
        by_entity.entry(&item.entity_id).or_default().push(item);
    }

    let mut failed = Vec::new();
    for (entity_id, items) in by_entity {
        let mut batch = WriteBatch::new();
        let mut bad_path = false;
        for item in items {
            match item_path(entity_id, &item.external_id) {
                Ok(path) => {
                    batch.merge(
                        path,
                        object(json!({ "tags": item.tags, "attributes": item.attributes })),
                    );
                }
                Err(e) => {
                    warn!(entity = %entity_id, error = %e, "unwritable item id");
                    bad_path = true;
                }
            }
        }
        if let Err(e) = store.commit(batch).await {
            warn!(entity = %entity_id, error = %e, "item write failed");
            failed.push(entity_id.to_string());
        } else if bad_path {
            failed.push(entity_id.to_string());
        }
    }
    failed
}

// ── Insight tables ──

fn labels_doc(labels: &[ConsolidatedLabel]) -> Result<Document, StoreError> {
    let labels = serde_json::to_value(labels)?;
    Ok(object(json!({ "labels": labels })))
}

/// One document per category under `insights/{run_id}/categories`.
pub async fn write_insights(
    store: &dyn DocumentStore,
    run_id: &str,
    table: &InsightTable,
) -> Result<(), StoreError> {
    let mut batch = WriteBatch::new();
    for (category, labels) in table {
        batch.set(insight_path(run_id, category)?, labels_doc(labels)?);
    }
    store.commit(batch).await
}

/// Corpus-wide cluster table, one document per attribute.
pub async fn write_cluster_table(
    store: &dyn DocumentStore,
    run_id: &str,
    table: &InsightTable,
) -> Result<(), StoreError> {
    let mut batch = WriteBatch::new();
    for (attribute, labels) in table {
        batch.set(cluster_attribute_path(run_id, attribute)?, labels_doc(labels)?);
    }
    store.commit(batch).await
}

/// Per-entity cluster tables, committed per entity. Returns failed entities.
pub async fn write_entity_cluster_tables(
    store: &dyn DocumentStore,
    run_id: &str,
    tables: &BTreeMap<String, InsightTable>,
) -> Vec<String> {
    let mut failed = Vec::new();
    for (entity_id, table) in tables {
        let result: Result<(), StoreError> = async {
            let mut batch = WriteBatch::new();
            let attributes = serde_json::to_value(table)?;
            batch.set(
                cluster_entity_path(run_id, entity_id)?,
                object(json!({ "attributes": attributes })),
            );
            store.commit(batch).await
        }
        .await;
        if let Err(e) = result {
            warn!(entity = %entity_id, error = %e, "cluster table write failed");
            failed.push(entity_id.clone());
        }
    }
    failed
}

fn decode_labels(path: &DocPath, doc: &Document) -> Result<Vec<ConsolidatedLabel>, StoreError> {
    let labels = doc.get("labels").cloned().unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(labels).map_err(|e| StoreError::Malformed {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

async fn read_label_collection(
    store: &dyn DocumentStore,
    collection: &str,
) -> Result<InsightTable, StoreError> {
    let mut table = InsightTable::new();
    for (path, doc) in store.list(collection).await? {
        let labels = decode_labels(&path, &doc)?;
        table.insert(path.id().to_string(), labels);
    }
    Ok(table)
}

pub async fn read_insights(
    store: &dyn DocumentStore,
    run_id: &str,
) -> Result<InsightTable, StoreError> {
    read_label_collection(store, &format!("insights/{run_id}/categories")).await
}

pub async fn read_cluster_table(
    store: &dyn DocumentStore,
    run_id: &str,
) -> Result<InsightTable, StoreError> {
    read_label_collection(store, &format!("clusters/{run_id}/attributes")).await
}

pub async fn read_entity_cluster_tables(
    store: &dyn DocumentStore,
    run_id: &str,
) -> Result<BTreeMap<String, InsightTable>, StoreError> {
    let mut tables = BTreeMap::new();
    for (path, doc) in store.list(&format!("clusters/{run_id}/entities")).await? {
        let attributes = doc
            .get("attributes")
            .cloned()
            .unwrap_or(Value::Object(Default::default()));
        let table: InsightTable =
            serde_json::from_value(attributes).map_err(|e| StoreError::Malformed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        tables.insert(path.id().to_string(), table);
    }
    Ok(tables)
}
