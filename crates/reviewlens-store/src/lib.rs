//! Storage layer: hierarchical document store (in-memory or DuckDB), run
//! layout, and Parquet export.

pub mod document;
mod error;
pub mod layout;
mod memory;

pub use document::{DocPath, Document, DocumentStore, WriteBatch};
pub use error::StoreError;
pub use memory::MemoryStore;

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckStore;

#[cfg(feature = "parquet")]
mod export;
#[cfg(feature = "parquet")]
pub use export::{export_run_tables, export_tables, write_parquet};
