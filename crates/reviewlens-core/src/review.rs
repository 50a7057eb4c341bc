//! Review corpus types shared by the annotation, clustering, and storage layers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Dense, run-scoped item handle. Kept small so prompts stay compact.
pub type Uid = u32;

/// Per-item labels attached after consolidation: category → labels.
pub type Tags = BTreeMap<String, Vec<String>>;

/// A review as supplied by the upstream collector, before uid assignment.
///
/// Read from `entities/{entity_id}/items/{external_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceItem {
    pub external_id: String,
    pub entity_id: String,
    /// Star rating, 1..=5.
    pub rating: u8,
    pub text: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// A review inside a run: the source record plus its uid and derived labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub external_id: String,
    pub uid: Uid,
    pub entity_id: String,
    pub rating: u8,
    pub text: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Tags,
}

impl Item {
    pub fn from_source(source: SourceItem, uid: Uid) -> Self {
        Self {
            external_id: source.external_id,
            uid,
            entity_id: source.entity_id,
            rating: source.rating,
            text: source.text,
            attributes: source.attributes,
            tags: Tags::new(),
        }
    }
}

/// One free-text attribute value of one item, the unit of clustering.
///
/// `cluster_id` is filled by agglomerative clustering, `cluster_label` by the
/// labelling pass that follows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeValueRow {
    pub item_uid: Uid,
    pub entity_id: String,
    pub attribute: String,
    pub value: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub cluster_id: Option<usize>,
    pub cluster_label: Option<String>,
}

/// Run lifecycle, persisted on `runs/{run_id}` with a timestamp per transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Started,
    Fetched,
    Annotated,
    Clustered,
    Quantified,
    Persisted,
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Fetched => "fetched",
            Self::Annotated => "annotated",
            Self::Clustered => "clustered",
            Self::Quantified => "quantified",
            Self::Persisted => "persisted",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    /// Name of the timestamp field recorded alongside the status, e.g. `annotatedAt`.
    pub fn timestamp_field(&self) -> String {
        format!("{}At", self.as_str())
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_item_json_uses_camel_case() {
        let json = r#"{
            "externalId": "R1",
            "entityId": "B00X",
            "rating": 4,
            "text": "works fine"
        }"#;
        let parsed: SourceItem = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.external_id, "R1");
        assert_eq!(parsed.entity_id, "B00X");
        assert!(parsed.attributes.is_empty());
    }

    #[test]
    fn item_from_source_starts_untagged() {
        let source = SourceItem {
            external_id: "R7".into(),
            entity_id: "B01".into(),
            rating: 2,
            text: "broke after a week".into(),
            attributes: BTreeMap::from([("durability".into(), "poor".into())]),
        };
        let item = Item::from_source(source, 7);
        assert_eq!(item.uid, 7);
        assert!(item.tags.is_empty());
        assert_eq!(item.attributes["durability"], "poor");
    }

    #[test]
    fn status_timestamp_field_names() {
        assert_eq!(RunStatus::Started.timestamp_field(), "startedAt");
        assert_eq!(RunStatus::Failed.timestamp_field(), "failedAt");
        assert_eq!(
            serde_json::to_string(&RunStatus::Quantified).unwrap(),
            "\"quantified\""
        );
    }
}
