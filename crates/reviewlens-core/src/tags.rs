//! Attach consolidated labels back onto items.

use std::collections::HashMap;

use crate::labels::CategoryMap;
use crate::review::{Item, Tags, Uid};

/// Invert a category map into uid → {category: [label, ...]}.
pub fn invert(map: &CategoryMap) -> HashMap<Uid, Tags> {
    let mut by_uid: HashMap<Uid, Tags> = HashMap::new();
    for (category, entries) in map {
        for entry in entries {
            for uid in &entry.uids {
                let labels = by_uid
                    .entry(*uid)
                    .or_default()
                    .entry(category.clone())
                    .or_default();
                if !labels.contains(&entry.label) {
                    labels.push(entry.label.clone());
                }
            }
        }
    }
    by_uid
}

/// Replace every item's tags with the labels the map assigns it.
///
/// Items the map never mentions end up with an empty tag map, so applying the
/// same map twice leaves items unchanged.
pub fn attach(items: &mut [Item], map: &CategoryMap) {
    let mut by_uid = invert(map);
    for item in items.iter_mut() {
        item.tags = by_uid.remove(&item.uid).unwrap_or_default();
    }
}
