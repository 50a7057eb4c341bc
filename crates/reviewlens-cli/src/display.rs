//! Terminal rendering of a persisted run: a status card followed by the
//! quantified tables, pretty-printed through Arrow.

use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use reviewlens_core::{RunStatus, tables};
use reviewlens_store::{Document, DocumentStore, layout};
use serde_json::Value;

/// Columns shown in the terminal; list columns are left to the Parquet export.
const SUMMARY_COLUMNS: &[&str] = &[
    "entity_id",
    "category",
    "label",
    "observation_count",
    "percentage",
    "item_percentage",
    "average_rating",
];

const STATUSES: &[RunStatus] = &[
    RunStatus::Started,
    RunStatus::Fetched,
    RunStatus::Annotated,
    RunStatus::Clustered,
    RunStatus::Quantified,
    RunStatus::Persisted,
    RunStatus::Finished,
    RunStatus::Failed,
];

// ── Public API ──

/// Print the run card and all three tables for `run_id`.
pub async fn print_run(store: &dyn DocumentStore, run_id: &str) -> anyhow::Result<()> {
    let path = layout::run_path(run_id)?;
    let Some(run) = store.get(&path).await? else {
        anyhow::bail!("run {run_id} not found");
    };
    print!("{}", run_card(run_id, &run));

    let insights = layout::read_insights(store, run_id).await?;
    let clusters = layout::read_cluster_table(store, run_id).await?;
    let by_entity = layout::read_entity_cluster_tables(store, run_id).await?;

    print_table(
        tables::CATEGORY_INSIGHTS,
        &tables::insight_table_batch(None, &insights)?,
    )?;
    print_table(
        tables::ATTRIBUTE_CLUSTERS,
        &tables::insight_table_batch(None, &clusters)?,
    )?;
    print_table(
        tables::ATTRIBUTE_CLUSTERS_BY_ENTITY,
        &tables::entity_tables_batch(&by_entity)?,
    )?;
    Ok(())
}

// ── Rendering ──

fn run_card(run_id: &str, run: &Document) -> String {
    let mut out = format!("=== run {run_id} ===\n");
    let status = run.get("status").and_then(Value::as_str).unwrap_or("unknown");
    out.push_str(&format!("  {:<14} {}\n", "status", status));

    if let Some(Value::Array(ids)) = run.get("entityIds") {
        let ids: Vec<&str> = ids.iter().filter_map(Value::as_str).collect();
        out.push_str(&format!("  {:<14} {}\n", "entities", ids.join(", ")));
    }
    for status in STATUSES {
        let field = status.timestamp_field();
        if let Some(at) = run.get(&field).and_then(Value::as_str) {
            out.push_str(&format!("  {:<14} {}\n", field, at));
        }
    }
    out.push('\n');
    out
}

fn summary(batch: &RecordBatch) -> anyhow::Result<RecordBatch> {
    let schema = batch.schema();
    let indices = SUMMARY_COLUMNS
        .iter()
        .map(|name| schema.index_of(name))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(batch.project(&indices)?)
}

fn format_table(name: &str, batch: &RecordBatch) -> anyhow::Result<String> {
    if batch.num_rows() == 0 {
        return Ok(format!("{name}: (empty)\n"));
    }
    let table = pretty_format_batches(&[summary(batch)?])?;
    Ok(format!("{name} ({} rows)\n{table}\n", batch.num_rows()))
}

fn print_table(name: &str, batch: &RecordBatch) -> anyhow::Result<()> {
    println!("{}", format_table(name, batch)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use reviewlens_core::{ConsolidatedLabel, InsightTable};
    use serde_json::json;

    use super::*;

    fn table() -> InsightTable {
        InsightTable::from([(
            "painPoints".to_string(),
            vec![ConsolidatedLabel {
                category: "painPoints".into(),
                label: "battery life".into(),
                uids: vec![0, 1, 2],
                external_ids: vec!["R0".into(), "R1".into(), "R2".into()],
                entities: vec!["B01".into()],
                ratings: vec![5, 2, 4],
                observation_count: 3,
                percentage: 100.0,
                item_percentage: 100.0,
                average_rating: 3.7,
                example_text: vec!["great battery".into()],
            }],
        )])
    }

    #[test]
    fn card_lists_reached_statuses_in_order() {
        let run = match json!({
            "status": "annotated",
            "entityIds": ["B01", "B02"],
            "startedAt": "2026-01-01T00:00:00.000Z",
            "annotatedAt": "2026-01-01T00:01:00.000Z",
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let card = run_card("r1", &run);
        assert!(card.starts_with("=== run r1 ==="));
        assert!(card.contains("B01, B02"));
        let started = card.find("startedAt").unwrap();
        let annotated = card.find("annotatedAt").unwrap();
        assert!(started < annotated);
        assert!(!card.contains("fetchedAt"));
    }

    #[test]
    fn table_shows_summary_columns_only() {
        let batch = tables::insight_table_batch(None, &table()).unwrap();
        let text = format_table(tables::CATEGORY_INSIGHTS, &batch).unwrap();
        assert!(text.starts_with("category_insights (1 rows)"));
        assert!(text.contains("battery life"));
        assert!(text.contains("3.7"));
        assert!(!text.contains("great battery"));
    }

    #[test]
    fn empty_table_is_marked() {
        let batch = tables::insight_table_batch(None, &InsightTable::new()).unwrap();
        let text = format_table(tables::ATTRIBUTE_CLUSTERS, &batch).unwrap();
        assert_eq!(text, "attribute_clusters: (empty)\n");
    }
}
