//! Category → label maps as extracted from model output, and the pure
//! merge/sanitize steps applied to them between model calls.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::identity::IdentityMapper;
use crate::review::Uid;

/// One label with the items it was observed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub label: String,
    #[serde(rename = "uid")]
    pub uids: Vec<Uid>,
}

impl LabelEntry {
    pub fn new(label: impl Into<String>, uids: Vec<Uid>) -> Self {
        Self {
            label: label.into(),
            uids,
        }
    }
}

/// Category name → labels. Ordered so output and prompts are reproducible.
pub type CategoryMap = BTreeMap<String, Vec<LabelEntry>>;

/// Comparison key for exact-duplicate detection: lowercase, whitespace collapsed.
pub fn label_key(label: &str) -> String {
    label
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Union entries whose labels differ only by case or whitespace. The first
/// spelling seen wins; order of first appearance is kept.
fn union_duplicates(entries: impl IntoIterator<Item = LabelEntry>) -> Vec<LabelEntry> {
    let mut out: Vec<LabelEntry> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        let key = label_key(&entry.label);
        match seen.get(&key) {
            Some(&pos) => out[pos].uids.extend(entry.uids),
            None => {
                seen.insert(key, out.len());
                out.push(entry);
            }
        }
    }
    out
}

/// Concatenate per-batch maps into one corpus-level map.
pub fn merge(maps: impl IntoIterator<Item = CategoryMap>) -> CategoryMap {
    let mut gathered: BTreeMap<String, Vec<LabelEntry>> = BTreeMap::new();
    for map in maps {
        for (category, entries) in map {
            gathered.entry(category).or_default().extend(entries);
        }
    }
    gathered
        .into_iter()
        .map(|(category, entries)| (category, union_duplicates(entries)))
        .collect()
}

/// Drop uids the run never assigned, sort and dedup uid lists, and drop labels
/// that end up blank or empty. Categories left without labels are removed.
pub fn sanitize(map: CategoryMap, identity: &IdentityMapper) -> CategoryMap {
    let mut out = CategoryMap::new();
    for (category, entries) in map {
        let mut kept = Vec::new();
        for mut entry in union_duplicates(entries) {
            let label = entry.label.trim();
            if label.is_empty() {
                continue;
            }
            entry.label = label.to_string();
            entry.uids.retain(|uid| identity.contains(*uid));
            entry.uids.sort_unstable();
            entry.uids.dedup();
            if !entry.uids.is_empty() {
                kept.push(entry);
            }
        }
        if !kept.is_empty() {
            out.insert(category, kept);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::SourceItem;

    fn mapper(n: usize) -> IdentityMapper {
        let sources = (0..n)
            .map(|i| SourceItem {
                external_id: format!("R{i}"),
                entity_id: "B01".into(),
                rating: 3,
                text: "t".into(),
                attributes: Default::default(),
            })
            .collect();
        IdentityMapper::assign(sources).0
    }

    fn map(category: &str, entries: Vec<LabelEntry>) -> CategoryMap {
        CategoryMap::from([(category.to_string(), entries)])
    }

    #[test]
    fn wire_shape_uses_uid_key() {
        let entry: LabelEntry =
            serde_json::from_str(r#"{"label":"battery life","uid":[0,2]}"#).unwrap();
        assert_eq!(entry.uids, vec![0, 2]);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"uid\":[0,2]"));
    }

    #[test]
    fn label_key_ignores_case_and_spacing() {
        assert_eq!(label_key("  Battery   Life "), "battery life");
        assert_eq!(label_key("battery life"), label_key("BATTERY\tlife"));
    }

    #[test]
    fn merge_concatenates_and_unions_exact_duplicates() {
        let a = map(
            "painPoints",
            vec![
                LabelEntry::new("Battery life", vec![0]),
                LabelEntry::new("noise", vec![1]),
            ],
        );
        let b = map("painPoints", vec![LabelEntry::new("battery  LIFE", vec![2])]);
        let c = map("useCase", vec![LabelEntry::new("camping", vec![3])]);

        let merged = merge([a, b, c]);
        assert_eq!(merged.len(), 2);
        let pain = &merged["painPoints"];
        assert_eq!(pain.len(), 2);
        assert_eq!(pain[0].label, "Battery life");
        assert_eq!(pain[0].uids, vec![0, 2]);
        assert_eq!(merged["useCase"][0].uids, vec![3]);
    }

    #[test]
    fn merge_keeps_near_duplicates_apart() {
        let merged = merge([map(
            "painPoints",
            vec![
                LabelEntry::new("battery life", vec![0]),
                LabelEntry::new("battery lifetime", vec![1]),
            ],
        )]);
        assert_eq!(merged["painPoints"].len(), 2);
    }

    #[test]
    fn sanitize_drops_unknown_uids_and_sorts() {
        let dirty = map(
            "painPoints",
            vec![LabelEntry::new("noise", vec![2, 99, 0, 2, 1])],
        );
        let clean = sanitize(dirty, &mapper(3));
        assert_eq!(clean["painPoints"][0].uids, vec![0, 1, 2]);
    }

    #[test]
    fn sanitize_drops_blank_and_emptied_labels() {
        let dirty = map(
            "painPoints",
            vec![
                LabelEntry::new("   ", vec![0]),
                LabelEntry::new("ghost", vec![50, 51]),
                LabelEntry::new(" smell ", vec![1]),
            ],
        );
        let clean = sanitize(dirty, &mapper(2));
        let labels: Vec<&str> = clean["painPoints"].iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["smell"]);
    }

    #[test]
    fn sanitize_removes_categories_left_empty() {
        let dirty = map("useCase", vec![LabelEntry::new("ghost", vec![7])]);
        assert!(sanitize(dirty, &mapper(1)).is_empty());
    }

    #[test]
    fn every_sanitized_uid_is_known() {
        let identity = mapper(4);
        let dirty = merge([
            map("a", vec![LabelEntry::new("x", vec![0, 4, 8])]),
            map("b", vec![LabelEntry::new("y", vec![3, 3, 100])]),
        ]);
        let clean = sanitize(dirty, &identity);
        for entries in clean.values() {
            for entry in entries {
                assert!(entry.uids.iter().all(|u| identity.contains(*u)));
            }
        }
    }
}
