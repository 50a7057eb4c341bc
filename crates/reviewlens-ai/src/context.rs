//! Per-run state handed to every pipeline stage.

use std::sync::Arc;

use reviewlens_core::{IdentityMapper, TokenCounter};

use crate::dispatch::RequestDispatcher;
use crate::service::{CompletionService, EmbeddingService};

/// Model choices and sampling temperatures for one run.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub completion_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub consolidation_temperature: f32,
    /// Values longer than this many tokens are not sent for embedding.
    pub embedding_token_limit: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            completion_model: "gpt-4o-mini".into(),
            embedding_model: "text-embedding-3-small".into(),
            temperature: 0.0,
            consolidation_temperature: 0.3,
            embedding_token_limit: 8191,
        }
    }
}

/// Service clients, dispatcher, settings, and identity map for one run.
///
/// Built once after the corpus is fetched; stages only read from it.
pub struct RunContext {
    pub run_id: String,
    pub completions: Arc<dyn CompletionService>,
    pub embeddings: Arc<dyn EmbeddingService>,
    pub dispatcher: RequestDispatcher,
    pub settings: ModelSettings,
    pub identity: IdentityMapper,
    pub counter: Arc<dyn TokenCounter>,
}
