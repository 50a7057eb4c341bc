//! TOML configuration for a `reviewlens` run.
//!
//! Every section is optional; missing keys take the defaults below. CLI
//! flags override the file where both name the same setting.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use reviewlens_ai::schema::{CLUSTER_LABEL, JOBS, MARKET, REVIEW_ATTRIBUTES};
use reviewlens_ai::{ClusterSettings, DispatchSettings, Linkage, ModelSettings};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub annotation: AnnotationConfig,
    #[serde(default)]
    pub attributes: AttributesConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub quantify: QuantifyConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&content, path)
    }

    /// Load `explicit` if given, otherwise `fallback` if it exists, otherwise
    /// defaults. Only a missing fallback file is tolerated; unreadable or
    /// malformed files are errors. Also returns the path that was read.
    pub fn resolve(
        explicit: Option<&Path>,
        fallback: &Path,
    ) -> anyhow::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        match std::fs::read_to_string(fallback) {
            Ok(content) => Ok((
                Self::parse(&content, fallback)?,
                Some(fallback.to_path_buf()),
            )),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok((Self::default(), None)),
            Err(e) => Err(e).with_context(|| format!("reading config {}", fallback.display())),
        }
    }

    fn parse(content: &str, path: &Path) -> anyhow::Result<Self> {
        toml::from_str(content).with_context(|| format!("parsing config {}", path.display()))
    }
}

/// Completion and embedding endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// OpenAI-compatible API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub completion_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub consolidation_temperature: f32,
    pub embedding_token_limit: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let models = ModelSettings::default();
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            completion_model: models.completion_model,
            embedding_model: models.embedding_model,
            temperature: models.temperature,
            consolidation_temperature: models.consolidation_temperature,
            embedding_token_limit: models.embedding_token_limit,
        }
    }
}

impl ServiceConfig {
    pub fn model_settings(&self) -> ModelSettings {
        ModelSettings {
            completion_model: self.completion_model.clone(),
            embedding_model: self.embedding_model.clone(),
            temperature: self.temperature,
            consolidation_temperature: self.consolidation_temperature,
            embedding_token_limit: self.embedding_token_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum outstanding requests.
    pub concurrency: usize,
    pub dispatch_interval_ms: u64,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let d = DispatchSettings::default();
        Self {
            concurrency: d.concurrency,
            dispatch_interval_ms: d.dispatch_interval.as_millis() as u64,
            timeout_secs: d.timeout.as_secs(),
            max_attempts: d.max_attempts,
            base_backoff_ms: d.base_backoff.as_millis() as u64,
            max_backoff_ms: d.max_backoff.as_millis() as u64,
        }
    }
}

impl DispatchConfig {
    /// Zero concurrency or attempts would stall every call; both are raised to 1.
    pub fn settings(&self) -> DispatchSettings {
        DispatchSettings {
            concurrency: self.concurrency.max(1),
            dispatch_interval: Duration::from_millis(self.dispatch_interval_ms),
            timeout: Duration::from_secs(self.timeout_secs),
            max_attempts: self.max_attempts.max(1),
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Token budget per completion batch.
    pub max_tokens: usize,
    /// `tokenizer.json` for exact counts; the byte heuristic is used otherwise.
    pub tokenizer: Option<PathBuf>,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 3000,
            tokenizer: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Category-label schemas applied to every batch.
    pub schemas: Vec<String>,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            schemas: vec![MARKET.to_string(), JOBS.to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributesConfig {
    /// One completion per review; off unless asked for.
    pub enabled: bool,
    pub schema: String,
}

impl Default for AttributesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schema: REVIEW_ATTRIBUTES.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub enabled: bool,
    pub max_clusters: usize,
    pub linkage: Linkage,
    pub label_sample_size: usize,
    pub max_label_words: usize,
    pub label_schema: String,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        let c = ClusterSettings::default();
        Self {
            enabled: true,
            max_clusters: c.max_clusters,
            linkage: c.linkage,
            label_sample_size: c.label_sample_size,
            max_label_words: c.max_label_words,
            label_schema: CLUSTER_LABEL.to_string(),
        }
    }
}

impl ClusteringConfig {
    pub fn settings(&self) -> ClusterSettings {
        ClusterSettings {
            max_clusters: self.max_clusters,
            linkage: self.linkage,
            label_sample_size: self.label_sample_size,
            max_label_words: self.max_label_words,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantifyConfig {
    /// Example texts kept per label.
    pub example_limit: usize,
}

impl Default for QuantifyConfig {
    fn default() -> Self {
        Self {
            example_limit: reviewlens_core::quantify::DEFAULT_EXAMPLE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// DuckDB file; an in-memory store is used when unset.
    pub path: Option<PathBuf>,
    /// Directory for Parquet exports of the quantified tables.
    pub export_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
