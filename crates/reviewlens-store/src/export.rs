//! Parquet export of quantified label tables.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use reviewlens_core::{InsightTable, tables};
use tracing::info;

use crate::StoreError;

/// Write one batch to `path`, replacing any existing file.
pub fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<(), StoreError> {
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

/// Write each named table to `<dir>/<name>.parquet`. Returns the files written.
pub fn export_tables(
    dir: &Path,
    named: &[(&str, RecordBatch)],
) -> Result<Vec<PathBuf>, StoreError> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(named.len());
    for (name, batch) in named {
        let path = dir.join(format!("{name}.parquet"));
        write_parquet(&path, batch)?;
        info!(path = %path.display(), rows = batch.num_rows(), "exported table");
        written.push(path);
    }
    Ok(written)
}

/// Export a run's three quantified tables under their standard names.
pub fn export_run_tables(
    dir: &Path,
    insights: &InsightTable,
    clusters: &InsightTable,
    clusters_by_entity: &BTreeMap<String, InsightTable>,
) -> Result<Vec<PathBuf>, StoreError> {
    let named = [
        (
            tables::CATEGORY_INSIGHTS,
            tables::insight_table_batch(None, insights)?,
        ),
        (
            tables::ATTRIBUTE_CLUSTERS,
            tables::insight_table_batch(None, clusters)?,
        ),
        (
            tables::ATTRIBUTE_CLUSTERS_BY_ENTITY,
            tables::entity_tables_batch(clusters_by_entity)?,
        ),
    ];
    export_tables(dir, &named)
}
