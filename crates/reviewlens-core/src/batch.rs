//! Token-budgeted batching of items into prompt-sized groups.

use crate::CoreError;
use crate::review::{Item, Uid};
use crate::tokens::TokenCounter;

/// Compact star form used inside prompts, e.g. `4*`.
pub fn render_rating(rating: u8) -> String {
    format!("{rating}*")
}

/// One item as it appears in a batch prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    pub uid: Uid,
    pub rating: u8,
    pub text: String,
}

impl BatchEntry {
    /// The prompt line for this entry: `<uid> <rating*> `text``.
    pub fn render(&self) -> String {
        format!("{} {} `{}`", self.uid, render_rating(self.rating), self.text)
    }
}

/// A closed group of entries with its accumulated token cost.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub index: usize,
    pub entries: Vec<BatchEntry>,
    pub tokens: usize,
}

impl Batch {
    /// All entry lines, newline separated, in insertion order.
    pub fn prompt(&self) -> String {
        self.entries
            .iter()
            .map(BatchEntry::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn uids(&self) -> impl Iterator<Item = Uid> + '_ {
        self.entries.iter().map(|e| e.uid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Greedy in-order bin packer.
pub struct Batcher<'a> {
    counter: &'a dyn TokenCounter,
    max_tokens: usize,
}

impl<'a> Batcher<'a> {
    pub fn new(counter: &'a dyn TokenCounter, max_tokens: usize) -> Result<Self, CoreError> {
        if max_tokens == 0 {
            return Err(CoreError::ZeroBudget);
        }
        Ok(Self {
            counter,
            max_tokens,
        })
    }

    /// Pack items in order. A batch is closed as soon as the next item would
    /// push it over budget; an item that is over budget on its own gets a
    /// batch to itself.
    pub fn pack(&self, items: &[Item]) -> Vec<Batch> {
        let mut batches = Vec::new();
        let mut current = Batch {
            index: 0,
            entries: Vec::new(),
            tokens: 0,
        };

        for item in items {
            let entry = BatchEntry {
                uid: item.uid,
                rating: item.rating,
                text: item.text.clone(),
            };
            let cost = self.counter.count(&entry.render());

            if !current.is_empty() && current.tokens + cost > self.max_tokens {
                let next_index = current.index + 1;
                batches.push(std::mem::replace(
                    &mut current,
                    Batch {
                        index: next_index,
                        entries: Vec::new(),
                        tokens: 0,
                    },
                ));
            }

            current.tokens += cost;
            current.entries.push(entry);
        }

        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }
}
