//! Label statistics: counts, shares, mean ratings, and example texts.
//!
//! The same routine serves the annotation categories and the attribute
//! clusters; for clusters the attribute plays the role of the category and the
//! cluster label the role of the label.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::labels::{CategoryMap, LabelEntry};
use crate::review::{AttributeValueRow, Item, Uid};

/// Default number of example texts kept per label.
pub const DEFAULT_EXAMPLE_LIMIT: usize = 5;

/// A quantified label, the unit downstream readers consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedLabel {
    pub category: String,
    pub label: String,
    #[serde(rename = "uid")]
    pub uids: Vec<Uid>,
    pub external_ids: Vec<String>,
    pub entities: Vec<String>,
    pub ratings: Vec<u8>,
    pub observation_count: u64,
    pub percentage: f64,
    pub item_percentage: f64,
    pub average_rating: f64,
    pub example_text: Vec<String>,
}

/// category → labels, sorted by count descending then label.
pub type InsightTable = BTreeMap<String, Vec<ConsolidatedLabel>>;

/// Round half away from zero to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn share(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round1(part as f64 / whole as f64 * 100.0)
    }
}

fn quantify_label(
    category: &str,
    entry: &LabelEntry,
    by_uid: &HashMap<Uid, &Item>,
    category_total: u64,
    items_in_scope: u64,
    example_limit: usize,
) -> ConsolidatedLabel {
    let mut uids = entry.uids.clone();
    uids.sort_unstable();
    uids.dedup();

    let referenced: Vec<&Item> = uids.iter().filter_map(|u| by_uid.get(u).copied()).collect();

    let mut entities: Vec<String> = Vec::new();
    for item in &referenced {
        if !entities.contains(&item.entity_id) {
            entities.push(item.entity_id.clone());
        }
    }

    let ratings: Vec<u8> = referenced.iter().map(|i| i.rating).collect();
    let average_rating = if ratings.is_empty() {
        0.0
    } else {
        round1(ratings.iter().map(|r| *r as f64).sum::<f64>() / ratings.len() as f64)
    };

    let observation_count = uids.len() as u64;

    ConsolidatedLabel {
        category: category.to_string(),
        label: entry.label.clone(),
        external_ids: referenced.iter().map(|i| i.external_id.clone()).collect(),
        entities,
        example_text: referenced
            .iter()
            .take(example_limit)
            .map(|i| i.text.clone())
            .collect(),
        ratings,
        observation_count,
        percentage: share(observation_count, category_total),
        item_percentage: share(observation_count, items_in_scope),
        average_rating,
        uids,
    }
}

/// Quantify every label of every category against the items in scope.
pub fn quantify_categories(
    map: &CategoryMap,
    items: &[Item],
    example_limit: usize,
) -> InsightTable {
    let by_uid: HashMap<Uid, &Item> = items.iter().map(|i| (i.uid, i)).collect();
    let items_in_scope = items.len() as u64;

    let mut table = InsightTable::new();
    for (category, entries) in map {
        let category_total: u64 = entries
            .iter()
            .map(|e| {
                let mut uids = e.uids.clone();
                uids.sort_unstable();
                uids.dedup();
                uids.len() as u64
            })
            .sum();

        let mut labels: Vec<ConsolidatedLabel> = entries
            .iter()
            .map(|e| {
                quantify_label(
                    category,
                    e,
                    &by_uid,
                    category_total,
                    items_in_scope,
                    example_limit,
                )
            })
            .collect();
        labels.sort_by(|a, b| {
            b.observation_count
                .cmp(&a.observation_count)
                .then_with(|| a.label.cmp(&b.label))
        });
        table.insert(category.clone(), labels);
    }
    table
}

/// Regroup labelled attribute rows as attribute → cluster label → uids.
fn cluster_map<'a>(rows: impl IntoIterator<Item = &'a AttributeValueRow>) -> CategoryMap {
    let mut grouped: BTreeMap<String, BTreeMap<String, Vec<Uid>>> = BTreeMap::new();
    for row in rows {
        let Some(label) = &row.cluster_label else {
            continue;
        };
        grouped
            .entry(row.attribute.clone())
            .or_default()
            .entry(label.clone())
            .or_default()
            .push(row.item_uid);
    }
    grouped
        .into_iter()
        .map(|(attribute, clusters)| {
            let entries = clusters
                .into_iter()
                .map(|(label, uids)| LabelEntry::new(label, uids))
                .collect();
            (attribute, entries)
        })
        .collect()
}

/// Corpus-wide cluster statistics: category = attribute, label = cluster label.
pub fn quantify_clusters(
    rows: &[AttributeValueRow],
    items: &[Item],
    example_limit: usize,
) -> InsightTable {
    quantify_categories(&cluster_map(rows), items, example_limit)
}

/// The same statistics restricted to each entity's own items.
pub fn quantify_clusters_by_entity(
    rows: &[AttributeValueRow],
    items: &[Item],
    example_limit: usize,
) -> BTreeMap<String, InsightTable> {
    let mut entity_ids: Vec<&str> = rows.iter().map(|r| r.entity_id.as_str()).collect();
    entity_ids.sort_unstable();
    entity_ids.dedup();

    entity_ids
        .into_iter()
        .map(|entity| {
            let scoped_items: Vec<Item> = items
                .iter()
                .filter(|i| i.entity_id == entity)
                .cloned()
                .collect();
            let map = cluster_map(rows.iter().filter(|r| r.entity_id == entity));
            (
                entity.to_string(),
                quantify_categories(&map, &scoped_items, example_limit),
            )
        })
        .collect()
}
