//! Schema-checked completion calls with one corrective retry.
//!
//! A reply that fails to parse gets exactly one follow-up request carrying the
//! malformed payload, the parse error, and the expected schema. If that reply
//! also fails, the unit is reported as unrecoverable and the caller drops it.

use thiserror::Error;
use tracing::{debug, warn};

use crate::context::RunContext;
use crate::dispatch::DispatchError;
use crate::schema::{AnnotationSchema, Extraction, SchemaError};
use crate::service::{ChatMessage, CompletionRequest};

#[derive(Error, Debug)]
pub enum HealError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("{unit}: reply could not be healed: {source} (original error: {original})")]
    Unrecoverable {
        unit: String,
        original: SchemaError,
        #[source]
        source: SchemaError,
    },
}

fn healing_messages(
    schema: &AnnotationSchema,
    payload: &str,
    error: &SchemaError,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "Your previous tool call did not match the required schema. \
Return the same content, corrected, through the tool. Do not add or remove information.",
        ),
        ChatMessage::user(format!(
            "Expected schema:\n{}\n\nParse error:\n{error}\n\nMalformed arguments:\n{payload}",
            schema.tool().parameters
        )),
    ]
}

/// Send one completion through the dispatcher and parse the reply against
/// `schema`, healing it once if needed.
pub async fn structured_call(
    ctx: &RunContext,
    unit: &str,
    schema: &AnnotationSchema,
    messages: Vec<ChatMessage>,
    temperature: f32,
) -> Result<Extraction, HealError> {
    let request = CompletionRequest {
        model: ctx.settings.completion_model.clone(),
        messages,
        temperature,
        tool: schema.tool().clone(),
    };
    let raw = ctx
        .dispatcher
        .call(unit, || ctx.completions.complete(&request))
        .await?;

    let original = match schema.parse(&raw.arguments) {
        Ok(extraction) => return Ok(extraction),
        Err(e) => e,
    };
    debug!(unit, schema = %schema.name, error = %original, "healing malformed reply");

    let heal_request = CompletionRequest {
        model: ctx.settings.completion_model.clone(),
        messages: healing_messages(schema, &raw.arguments, &original),
        temperature: 0.0,
        tool: schema.tool().clone(),
    };
    let heal_unit = format!("{unit}:heal");
    let healed = ctx
        .dispatcher
        .call(&heal_unit, || ctx.completions.complete(&heal_request))
        .await?;

    schema.parse(&healed.arguments).map_err(|source| {
        warn!(unit, schema = %schema.name, error = %source, "healing failed");
        HealError::Unrecoverable {
            unit: unit.to_string(),
            original,
            source,
        }
    })
}
