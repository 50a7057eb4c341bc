//! Model-facing layer: service clients, paced dispatch, schema-checked
//! annotation, attribute extraction, and attribute clustering.

pub mod annotate;
pub mod attributes;
pub mod cluster;
pub mod context;
pub mod dispatch;
pub mod heal;
pub mod schema;
pub mod service;

#[cfg(test)]
mod testing;

pub use annotate::{Annotation, annotate};
pub use attributes::extract_attributes;
pub use cluster::{ClusterEngine, ClusterError, ClusterOutcome, ClusterSettings, Linkage};
pub use context::{ModelSettings, RunContext};
pub use dispatch::{DispatchError, DispatchSettings, RequestDispatcher};
pub use heal::{HealError, structured_call};
pub use schema::{AnnotationSchema, Extraction, OutputShape, SchemaError, SchemaRegistry};
pub use service::{
    ChatMessage, CompletionRequest, CompletionService, EmbeddingService, OpenAiClient,
    RawResponse, ServiceError, ToolSpec,
};
