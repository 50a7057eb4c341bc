//! Batch annotation and cross-batch label consolidation.
//!
//! 1. Extract: one structured call per (batch, category schema).
//! 2. Merge: per-batch maps are concatenated; exact duplicates are unioned.
//! 3. Consolidate: one call per category with more than one label merges
//!    near-duplicates into canonical labels.
//! 4. Sanitize: unknown uids and empty labels are dropped.

use std::sync::Arc;

use futures::future::join_all;
use reviewlens_core::labels::{self, CategoryMap, LabelEntry};
use reviewlens_core::Batch;
use serde_json::json;
use tracing::{info, warn};

use crate::context::RunContext;
use crate::heal::structured_call;
use crate::schema::{self, AnnotationSchema, Extraction};
use crate::service::ChatMessage;

/// Result of the annotation phase.
#[derive(Debug, Default)]
pub struct Annotation {
    pub categories: CategoryMap,
    pub units: usize,
    pub failed_units: usize,
}

impl Annotation {
    pub fn label_count(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }
}

/// Phase 0: extract labels from every batch with every category schema.
/// Units that fail, even after healing, are dropped with a warning.
pub async fn extract(
    ctx: &RunContext,
    batches: &[Batch],
    schemas: &[Arc<AnnotationSchema>],
) -> (Vec<CategoryMap>, usize) {
    let units: Vec<(&Batch, &AnnotationSchema)> = batches
        .iter()
        .flat_map(|b| {
            schemas
                .iter()
                .filter(|s| s.is_category_labels())
                .map(move |s| (b, s.as_ref()))
        })
        .collect();

    let results = join_all(units.iter().map(|(batch, schema)| async move {
        let unit = format!("{}:batch[{}]", schema.name, batch.index);
        let messages = vec![
            ChatMessage::system(schema.instructions.clone()),
            ChatMessage::user(batch.prompt()),
        ];
        structured_call(ctx, &unit, schema, messages, ctx.settings.temperature).await
    }))
    .await;

    let mut maps = Vec::new();
    let mut failed = 0;
    for ((batch, schema), result) in units.iter().zip(results) {
        match result {
            Ok(Extraction::Categories(map)) => maps.push(map),
            Ok(Extraction::Record(_)) => failed += 1,
            Err(e) => {
                warn!(
                    run_id = %ctx.run_id,
                    batch = batch.index,
                    schema = %schema.name,
                    error = %e,
                    "dropping batch"
                );
                failed += 1;
            }
        }
    }
    (maps, failed)
}

async fn consolidate_category(
    ctx: &RunContext,
    category: &str,
    entries: Vec<LabelEntry>,
) -> Vec<LabelEntry> {
    let schema = schema::consolidation(category);
    let payload = json!({ category: &entries }).to_string();
    let messages = vec![
        ChatMessage::system(schema.instructions.clone()),
        ChatMessage::user(payload),
    ];
    let unit = format!("consolidate:{category}");

    match structured_call(
        ctx,
        &unit,
        &schema,
        messages,
        ctx.settings.consolidation_temperature,
    )
    .await
    {
        Ok(Extraction::Categories(mut map)) => match map.remove(category) {
            Some(consolidated) if !consolidated.is_empty() => consolidated,
            _ => {
                warn!(
                    run_id = %ctx.run_id,
                    category,
                    "consolidation returned no labels, keeping merged labels"
                );
                entries
            }
        },
        Ok(Extraction::Record(_)) => entries,
        Err(e) => {
            warn!(
                run_id = %ctx.run_id,
                category,
                error = %e,
                "consolidation failed, keeping merged labels"
            );
            entries
        }
    }
}

/// Phase 2: merge near-duplicate labels per category. Categories with at most
/// one label are passed through without a call.
pub async fn consolidate(ctx: &RunContext, merged: CategoryMap) -> CategoryMap {
    let results = join_all(merged.into_iter().map(|(category, entries)| async move {
        let entries = if entries.len() > 1 {
            consolidate_category(ctx, &category, entries).await
        } else {
            entries
        };
        (category, entries)
    }))
    .await;
    results.into_iter().collect()
}

/// Extract, merge, consolidate, and sanitize.
pub async fn annotate(
    ctx: &RunContext,
    batches: &[Batch],
    schemas: &[Arc<AnnotationSchema>],
) -> Annotation {
    let units = batches.len() * schemas.iter().filter(|s| s.is_category_labels()).count();
    let (maps, failed_units) = extract(ctx, batches, schemas).await;
    let merged = labels::merge(maps);
    let consolidated = consolidate(ctx, merged).await;
    let categories = labels::sanitize(consolidated, &ctx.identity);

    let annotation = Annotation {
        categories,
        units,
        failed_units,
    };
    info!(
        run_id = %ctx.run_id,
        units,
        failed = failed_units,
        categories = annotation.categories.len(),
        labels = annotation.label_count(),
        "annotation complete"
    );
    annotation
}
