pub mod batch;
pub mod error;
pub mod identity;
pub mod labels;
pub mod quantify;
pub mod review;
pub mod schema;
pub mod tags;
pub mod tokens;

pub use batch::{Batch, BatchEntry, Batcher, render_rating};
pub use error::CoreError;
pub use identity::IdentityMapper;
pub use labels::{CategoryMap, LabelEntry};
pub use quantify::{ConsolidatedLabel, InsightTable};
pub use review::{AttributeValueRow, Item, RunStatus, SourceItem, Tags, Uid};
pub use schema::tables;
pub use tokens::{HeuristicCounter, TokenCounter};

#[cfg(feature = "tokenizers")]
pub use tokens::HfTokenCounter;
