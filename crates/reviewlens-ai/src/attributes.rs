//! Per-review free-text attribute extraction.

use futures::future::join_all;
use reviewlens_core::Item;
use tracing::{info, warn};

use crate::context::RunContext;
use crate::heal::structured_call;
use crate::schema::{AnnotationSchema, Extraction};
use crate::service::ChatMessage;

/// Extract one record per item and write its fields into `item.attributes`.
///
/// Extracted values overwrite same-named attributes; an item whose call fails
/// keeps whatever attributes it already had. Returns how many items were
/// updated.
pub async fn extract_attributes(
    ctx: &RunContext,
    items: &mut [Item],
    schema: &AnnotationSchema,
) -> usize {
    let results = join_all(items.iter().map(|item| async move {
        let unit = format!("{}:item[{}]", schema.name, item.uid);
        let messages = vec![
            ChatMessage::system(schema.instructions.clone()),
            ChatMessage::user(format!("REVIEW: ```{}```", item.text)),
        ];
        structured_call(ctx, &unit, schema, messages, ctx.settings.temperature).await
    }))
    .await;

    let mut updated = 0;
    for (item, result) in items.iter_mut().zip(results) {
        match result {
            Ok(Extraction::Record(record)) => {
                item.attributes.extend(record);
                updated += 1;
            }
            Ok(Extraction::Categories(_)) => {
                warn!(
                    uid = item.uid,
                    schema = %schema.name,
                    "attribute schema returned categories"
                );
            }
            Err(e) => {
                warn!(
                    run_id = %ctx.run_id,
                    uid = item.uid,
                    error = %e,
                    "attribute extraction failed"
                );
            }
        }
    }
    info!(run_id = %ctx.run_id, updated, total = items.len(), "attributes extracted");
    updated
}
