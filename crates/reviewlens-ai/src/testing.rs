//! Scripted service stubs shared by this crate's tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reviewlens_core::{HeuristicCounter, IdentityMapper, SourceItem};

use crate::context::{ModelSettings, RunContext};
use crate::dispatch::{DispatchSettings, RequestDispatcher};
use crate::service::{
    CompletionRequest, CompletionService, EmbeddingService, RawResponse, ServiceError,
};

/// Replies chosen by a closure over the request; records every request.
pub struct StubCompletions {
    pub reply: Box<dyn Fn(&CompletionRequest) -> Result<String, ServiceError> + Send + Sync>,
    pub seen: Mutex<Vec<CompletionRequest>>,
}

impl StubCompletions {
    pub fn new(
        reply: impl Fn(&CompletionRequest) -> Result<String, ServiceError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            reply: Box::new(reply),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Replies popped in order; errors once exhausted.
    pub fn scripted(replies: Vec<&str>) -> Arc<Self> {
        let queue: Mutex<VecDeque<String>> =
            Mutex::new(replies.into_iter().map(str::to_string).collect());
        Self::new(move |_| {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ServiceError::Rejected {
                    status: 400,
                    body: "script exhausted".into(),
                })
        })
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionService for StubCompletions {
    async fn complete(&self, request: &CompletionRequest) -> Result<RawResponse, ServiceError> {
        self.seen.lock().unwrap().push(request.clone());
        (self.reply)(request).map(|arguments| RawResponse { arguments })
    }
}

/// Embeds by looking the text up in a table; unknown text is rejected.
pub struct StubEmbeddings {
    pub vectors: Vec<(String, Vec<f32>)>,
    pub calls: Mutex<Vec<String>>,
}

impl StubEmbeddings {
    pub fn new(vectors: Vec<(&str, Vec<f32>)>) -> Arc<Self> {
        Arc::new(Self {
            vectors: vectors
                .into_iter()
                .map(|(t, v)| (t.to_string(), v))
                .collect(),
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl EmbeddingService for StubEmbeddings {
    async fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>, ServiceError> {
        self.calls.lock().unwrap().push(text.to_string());
        self.vectors
            .iter()
            .find(|(t, _)| t == text)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| ServiceError::Rejected {
                status: 400,
                body: format!("no vector for {text}"),
            })
    }
}

pub fn sources(texts: &[(&str, u8, &str)]) -> Vec<SourceItem> {
    texts
        .iter()
        .enumerate()
        .map(|(i, (entity, rating, text))| SourceItem {
            external_id: format!("R{i}"),
            entity_id: entity.to_string(),
            rating: *rating,
            text: text.to_string(),
            attributes: Default::default(),
        })
        .collect()
}

pub fn context(
    completions: Arc<dyn CompletionService>,
    embeddings: Arc<dyn EmbeddingService>,
    identity: IdentityMapper,
) -> RunContext {
    RunContext {
        run_id: "run-test".into(),
        completions,
        embeddings,
        dispatcher: RequestDispatcher::new(DispatchSettings {
            concurrency: 4,
            dispatch_interval: Duration::ZERO,
            timeout: Duration::from_secs(5),
            max_attempts: 2,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        }),
        settings: ModelSettings::default(),
        identity,
        counter: Arc::new(HeuristicCounter),
    }
}
