//! Run pipeline: fetch → annotate → tag → cluster → quantify → persist.
//!
//! Each phase records its status on the run document. A failing phase
//! skips only what depends on it; whatever was produced is still persisted
//! before the run is marked failed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use reviewlens_ai::schema::SchemaError;
use reviewlens_ai::{
    AnnotationSchema, ClusterEngine, CompletionService, EmbeddingService, RequestDispatcher,
    RunContext, SchemaRegistry, annotate, extract_attributes,
};
use reviewlens_core::{
    AttributeValueRow, Batcher, CategoryMap, IdentityMapper, InsightTable, Item, RunStatus,
    TokenCounter, quantify, tags,
};
use reviewlens_store::{DocumentStore, export_run_tables, layout};
use tracing::{error, info, warn};

use crate::config::Config;

/// External services and token counter shared by every run.
pub struct Services {
    pub completions: Arc<dyn CompletionService>,
    pub embeddings: Arc<dyn EmbeddingService>,
    pub counter: Arc<dyn TokenCounter>,
}

/// Schemas resolved from configuration before any run starts.
struct RunSchemas {
    categories: Vec<Arc<AnnotationSchema>>,
    attributes: Option<Arc<AnnotationSchema>>,
    cluster_label: Option<Arc<AnnotationSchema>>,
}

pub struct Orchestrator<'a> {
    config: &'a Config,
    store: &'a dyn DocumentStore,
    services: Services,
    schemas: RunSchemas,
    export_dir: Option<PathBuf>,
}

/// What each phase produced, kept for persistence and the final verdict.
#[derive(Default)]
struct Outputs {
    categories: CategoryMap,
    rows: Vec<AttributeValueRow>,
    insights: InsightTable,
    clusters: InsightTable,
    clusters_by_entity: std::collections::BTreeMap<String, InsightTable>,
    failed_phases: Vec<&'static str>,
}

impl<'a> Orchestrator<'a> {
    /// Resolve configured schema names against `registry`; an unknown name
    /// fails here rather than mid-run.
    pub fn new(
        config: &'a Config,
        store: &'a dyn DocumentStore,
        services: Services,
        registry: &SchemaRegistry,
    ) -> Result<Self, SchemaError> {
        let categories = registry.resolve(&config.annotation.schemas)?;
        if let Some(bad) = categories.iter().find(|s| !s.is_category_labels()) {
            return Err(SchemaError::Shape {
                schema: bad.name.clone(),
                reason: "not a category-label schema".to_string(),
            });
        }
        let attributes = config
            .attributes
            .enabled
            .then(|| registry.get(&config.attributes.schema))
            .transpose()?;
        let cluster_label = config
            .clustering
            .enabled
            .then(|| registry.get(&config.clustering.label_schema))
            .transpose()?;

        Ok(Self {
            config,
            store,
            services,
            schemas: RunSchemas {
                categories,
                attributes,
                cluster_label,
            },
            export_dir: config.store.export_dir.clone(),
        })
    }

    pub fn with_export_dir(mut self, dir: Option<PathBuf>) -> Self {
        if dir.is_some() {
            self.export_dir = dir;
        }
        self
    }

    async fn mark(&self, run_id: &str, status: RunStatus) {
        if let Err(e) = layout::set_status(self.store, run_id, status).await {
            warn!(run_id, status = %status, error = %e, "status write failed");
        } else {
            info!(run_id, status = %status, "run status");
        }
    }

    async fn fail(&self, run_id: &str, reason: &str) -> bool {
        error!(run_id, reason, "run failed");
        self.mark(run_id, RunStatus::Failed).await;
        false
    }

    /// Execute one run. `entity_ids` may be empty, in which case the entity
    /// list already recorded on `runs/{run_id}` is used. Returns whether the
    /// run finished without a phase coming up empty.
    pub async fn run(&self, run_id: &str, entity_ids: &[String]) -> bool {
        let start = Instant::now();

        let entity_ids = if entity_ids.is_empty() {
            match layout::run_entities(self.store, run_id).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(run_id, error = %e, "could not read run document");
                    Vec::new()
                }
            }
        } else {
            entity_ids.to_vec()
        };
        if let Err(e) = layout::start_run(self.store, run_id, &entity_ids).await {
            warn!(run_id, error = %e, "could not record run start");
        }
        if entity_ids.is_empty() {
            return self.fail(run_id, "no entities to process").await;
        }

        // ── Fetch ──

        let sources = match layout::fetch_items(self.store, &entity_ids).await {
            Ok(sources) => sources,
            Err(e) => return self.fail(run_id, &format!("fetching items: {e}")).await,
        };
        let (identity, mut items) = IdentityMapper::assign(sources);
        if items.is_empty() {
            return self.fail(run_id, "no usable items").await;
        }
        info!(run_id, entities = entity_ids.len(), items = items.len(), "corpus fetched");
        self.mark(run_id, RunStatus::Fetched).await;

        let ctx = RunContext {
            run_id: run_id.to_string(),
            completions: Arc::clone(&self.services.completions),
            embeddings: Arc::clone(&self.services.embeddings),
            dispatcher: RequestDispatcher::new(self.config.dispatch.settings()),
            settings: self.config.service.model_settings(),
            identity,
            counter: Arc::clone(&self.services.counter),
        };

        let mut out = Outputs::default();

        // ── Annotate ──

        if !self.schemas.categories.is_empty() {
            match Batcher::new(self.services.counter.as_ref(), self.config.batching.max_tokens) {
                Ok(batcher) => {
                    let batches = batcher.pack(&items);
                    info!(run_id, batches = batches.len(), "corpus batched");
                    let annotation = annotate(&ctx, &batches, &self.schemas.categories).await;
                    if annotation.label_count() == 0 {
                        out.failed_phases.push("annotate");
                    }
                    tags::attach(&mut items, &annotation.categories);
                    out.categories = annotation.categories;
                }
                Err(e) => {
                    warn!(run_id, error = %e, "batching failed, skipping annotation");
                    out.failed_phases.push("annotate");
                }
            }
        }
        self.mark(run_id, RunStatus::Annotated).await;

        // ── Attributes and clustering ──

        if let Some(schema) = &self.schemas.attributes {
            let updated = extract_attributes(&ctx, &mut items, schema).await;
            if updated == 0 {
                warn!(run_id, "no item gained attributes");
            }
        }

        if let Some(label_schema) = &self.schemas.cluster_label {
            let engine = ClusterEngine::new(&ctx, self.config.clustering.settings(), label_schema);
            let outcome = engine.run(&items).await;
            if outcome.distinct_values > 0 && outcome.rows.is_empty() {
                out.failed_phases.push("cluster");
            }
            out.rows = outcome.rows;
        }
        self.mark(run_id, RunStatus::Clustered).await;

        // ── Quantify ──

        let limit = self.config.quantify.example_limit;
        out.insights = quantify::quantify_categories(&out.categories, &items, limit);
        out.clusters = quantify::quantify_clusters(&out.rows, &items, limit);
        out.clusters_by_entity = quantify::quantify_clusters_by_entity(&out.rows, &items, limit);
        self.mark(run_id, RunStatus::Quantified).await;

        // ── Persist ──

        if !self.persist(run_id, &items, &out).await {
            out.failed_phases.push("persist");
        }
        self.mark(run_id, RunStatus::Persisted).await;

        if let Some(dir) = &self.export_dir {
            let exported =
                export_run_tables(dir, &out.insights, &out.clusters, &out.clusters_by_entity);
            if let Err(e) = exported {
                warn!(run_id, dir = %dir.display(), error = %e, "export failed");
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        if out.failed_phases.is_empty() {
            info!(run_id, elapsed_secs = elapsed, "run finished");
            self.mark(run_id, RunStatus::Finished).await;
            true
        } else {
            self.fail(run_id, &format!("empty phases: {}", out.failed_phases.join(", ")))
                .await
        }
    }

    /// Write items and all three tables. Per-entity failures are logged;
    /// returns false when nothing at all could be written.
    async fn persist(&self, run_id: &str, items: &[Item], out: &Outputs) -> bool {
        let mut wrote_any = false;

        let failed = layout::write_items(self.store, items).await;
        let entity_count = {
            let mut ids: Vec<&str> = items.iter().map(|i| i.entity_id.as_str()).collect();
            ids.sort_unstable();
            ids.dedup();
            ids.len()
        };
        if failed.len() < entity_count {
            wrote_any = true;
        }
        if !failed.is_empty() {
            warn!(run_id, entities = ?failed, "some entities were not written back");
        }

        match layout::write_insights(self.store, run_id, &out.insights).await {
            Ok(()) => wrote_any = true,
            Err(e) => warn!(run_id, error = %e, "insight write failed"),
        }
        match layout::write_cluster_table(self.store, run_id, &out.clusters).await {
            Ok(()) => wrote_any = true,
            Err(e) => warn!(run_id, error = %e, "cluster table write failed"),
        }
        let failed =
            layout::write_entity_cluster_tables(self.store, run_id, &out.clusters_by_entity).await;
        if !failed.is_empty() {
            warn!(run_id, entities = ?failed, "some entity cluster tables were not written");
        }

        wrote_any
    }
}
