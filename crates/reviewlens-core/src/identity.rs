//! Run-scoped dense uids for items.
//!
//! Prompts reference items by a small integer instead of the upstream id, which
//! keeps batches compact and lets the model echo ids back cheaply. The mapping
//! is fixed once at run start and shared read-only afterwards.

use std::collections::HashMap;

use tracing::warn;

use crate::review::{Item, SourceItem, Uid};

/// Bidirectional uid ↔ external id map.
#[derive(Debug, Clone, Default)]
pub struct IdentityMapper {
    by_uid: Vec<String>,
    by_external: HashMap<String, Uid>,
}

impl IdentityMapper {
    /// Assign uids in input order. A repeated external id keeps its first
    /// occurrence; later copies are discarded.
    pub fn assign(sources: Vec<SourceItem>) -> (Self, Vec<Item>) {
        let mut mapper = Self::default();
        let mut items = Vec::with_capacity(sources.len());

        for source in sources {
            if mapper.by_external.contains_key(&source.external_id) {
                warn!(
                    external_id = %source.external_id,
                    "duplicate item id, keeping first occurrence"
                );
                continue;
            }
            let uid = mapper.by_uid.len() as Uid;
            mapper.by_uid.push(source.external_id.clone());
            mapper.by_external.insert(source.external_id.clone(), uid);
            items.push(Item::from_source(source, uid));
        }

        (mapper, items)
    }

    pub fn external_id(&self, uid: Uid) -> Option<&str> {
        self.by_uid.get(uid as usize).map(String::as_str)
    }

    pub fn uid(&self, external_id: &str) -> Option<Uid> {
        self.by_external.get(external_id).copied()
    }

    pub fn contains(&self, uid: Uid) -> bool {
        (uid as usize) < self.by_uid.len()
    }

    pub fn len(&self) -> usize {
        self.by_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uid.is_empty()
    }
}
