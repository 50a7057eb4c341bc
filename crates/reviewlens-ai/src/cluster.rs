//! Embedding-based clustering of free-text attribute values.
//!
//! Items are pivoted into one row per (item, attribute, value). Each distinct
//! value is embedded once, values are clustered per attribute with
//! agglomerative clustering, and every cluster gets a short label from one
//! completion call. Labels are then joined back onto the rows.

use std::collections::{BTreeMap, HashMap};

use reviewlens_core::{AttributeValueRow, Item};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::heal::structured_call;
use crate::schema::{AnnotationSchema, Extraction};
use crate::service::ChatMessage;

#[derive(Error, Debug, PartialEq)]
pub enum ClusterError {
    #[error("no vectors to cluster")]
    Empty,
    #[error("cluster count must be positive")]
    ZeroClusters,
    #[error("embedding dimension mismatch: expected {expected}, found {found}")]
    Dimension { expected: usize, found: usize },
}

/// Cluster merge criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    /// Minimum increase in within-cluster variance.
    #[default]
    Ward,
    /// Mean pairwise cosine distance.
    Average,
}

#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub max_clusters: usize,
    pub linkage: Linkage,
    pub label_sample_size: usize,
    pub max_label_words: usize,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            max_clusters: 8,
            linkage: Linkage::Ward,
            label_sample_size: 20,
            max_label_words: 7,
        }
    }
}

/// Attributes below this many distinct values are not clustered.
const MIN_DISTINCT_FOR_CLUSTERING: usize = 3;

const SENTINELS: &[&str] = &[
    "",
    "unknown",
    "na",
    "n/a",
    "nan",
    "none",
    "null",
    "missing",
    "not mentioned",
    "not specified",
    "not applicable",
    "-",
];

/// Placeholder answers that carry no information.
pub fn is_sentinel(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    SENTINELS.contains(&v.as_str())
}

/// One row per informative (item, attribute, value).
pub fn pivot(items: &[Item]) -> Vec<AttributeValueRow> {
    items
        .iter()
        .flat_map(|item| {
            item.attributes
                .iter()
                .filter(|(_, value)| !is_sentinel(value))
                .map(|(attribute, value)| AttributeValueRow {
                    item_uid: item.uid,
                    entity_id: item.entity_id.clone(),
                    attribute: attribute.clone(),
                    value: value.trim().to_string(),
                    embedding: Vec::new(),
                    cluster_id: None,
                    cluster_label: None,
                })
        })
        .collect()
}

/// Keep at most `max_words` whitespace-separated words.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Vector math ──

fn cosine_sim(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum()
}

fn squared_euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = (*x - *y) as f64;
            d * d
        })
        .sum()
}

/// L2-normalize a vector in place.
fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Upper triangle of a symmetric distance matrix, stored row-major.
struct Condensed {
    n: usize,
    data: Vec<f64>,
}

impl Condensed {
    fn build(points: &[Vec<f32>], linkage: Linkage) -> Self {
        let n = points.len();
        let mut data = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for i in 0..n {
            for j in (i + 1)..n {
                data.push(match linkage {
                    Linkage::Ward => squared_euclidean(&points[i], &points[j]),
                    Linkage::Average => 1.0 - cosine_sim(&points[i], &points[j]),
                });
            }
        }
        Self { n, data }
    }

    fn index(&self, i: usize, j: usize) -> usize {
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        i * (2 * self.n - i - 1) / 2 + (j - i - 1)
    }

    fn get(&self, i: usize, j: usize) -> f64 {
        self.data[self.index(i, j)]
    }

    fn set(&mut self, i: usize, j: usize, d: f64) {
        let idx = self.index(i, j);
        self.data[idx] = d;
    }
}

/// Full dendrogram by nearest-neighbour chain. Each merge is recorded as
/// `(distance, kept_slot, dropped_slot)`; the kept slot is the lower index.
fn nn_chain(dist: &mut Condensed, linkage: Linkage) -> Vec<(f64, usize, usize)> {
    let n = dist.n;
    let mut active = vec![true; n];
    let mut size = vec![1usize; n];
    let mut chain: Vec<usize> = Vec::with_capacity(n);
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    while merges.len() + 1 < n {
        if chain.is_empty() {
            let Some(first) = active.iter().position(|&a| a) else {
                break;
            };
            chain.push(first);
        }

        // Grow the chain until its last two entries are mutual nearest neighbours.
        let (a, b, d_ab) = loop {
            let a = chain[chain.len() - 1];
            let prev = chain.len().checked_sub(2).map(|i| chain[i]);
            let mut best = prev.map(|p| (p, dist.get(a, p)));
            for m in (0..n).filter(|&m| active[m] && m != a) {
                let d = dist.get(a, m);
                if best.is_none_or(|(_, bd)| d < bd) {
                    best = Some((m, d));
                }
            }
            let Some((b, d)) = best else {
                return merges;
            };
            if Some(b) == prev {
                chain.truncate(chain.len() - 2);
                break (a, b, d);
            }
            chain.push(b);
        };

        let (keep, drop) = (a.min(b), a.max(b));
        let (nk, nd) = (size[keep] as f64, size[drop] as f64);
        for m in (0..n).filter(|&m| active[m] && m != keep && m != drop) {
            let nm = size[m] as f64;
            let updated = match linkage {
                Linkage::Ward => {
                    ((nk + nm) * dist.get(keep, m) + (nd + nm) * dist.get(drop, m) - nm * d_ab)
                        / (nk + nd + nm)
                }
                Linkage::Average => (nk * dist.get(keep, m) + nd * dist.get(drop, m)) / (nk + nd),
            };
            dist.set(keep, m, updated);
        }
        size[keep] += size[drop];
        active[drop] = false;
        merges.push((d_ab, keep, drop));
    }
    merges
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Bottom-up agglomerative clustering into at most `k` clusters.
///
/// Vectors are L2-normalized first. Ward works on squared Euclidean distance,
/// average linkage on cosine distance; both are updated with the
/// Lance-Williams recurrence. The dendrogram is built with the
/// nearest-neighbour chain in O(n²) time, then cut after its `n - k`
/// cheapest merges. Returned ids are numbered by each cluster's lowest
/// member index.
pub fn agglomerate(
    vectors: &[Vec<f32>],
    k: usize,
    linkage: Linkage,
) -> Result<Vec<usize>, ClusterError> {
    if k == 0 {
        return Err(ClusterError::ZeroClusters);
    }
    let n = vectors.len();
    if n == 0 {
        return Err(ClusterError::Empty);
    }
    let dim = vectors[0].len();
    if dim == 0 {
        return Err(ClusterError::Empty);
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
        return Err(ClusterError::Dimension {
            expected: dim,
            found: bad.len(),
        });
    }

    let points: Vec<Vec<f32>> = vectors
        .iter()
        .map(|v| {
            let mut v = v.clone();
            normalize(&mut v);
            v
        })
        .collect();

    let mut merges = nn_chain(&mut Condensed::build(&points, linkage), linkage);
    merges.sort_by(|a, b| a.0.total_cmp(&b.0));

    // Roots always point at the lowest member, so ids follow first-member order.
    let mut parent: Vec<usize> = (0..n).collect();
    for &(_, a, b) in merges.iter().take(n.saturating_sub(k)) {
        let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
        parent[ra.max(rb)] = ra.min(rb);
    }
    let mut assignment = vec![0usize; n];
    let mut next = 0;
    for i in 0..n {
        let root = find(&mut parent, i);
        if root == i {
            assignment[i] = next;
            next += 1;
        } else {
            assignment[i] = assignment[root];
        }
    }
    Ok(assignment)
}

// ── Engine ──

/// Rows after clustering and labelling, plus bookkeeping for the run log.
#[derive(Debug, Default)]
pub struct ClusterOutcome {
    pub rows: Vec<AttributeValueRow>,
    pub distinct_values: usize,
    pub failed_values: usize,
    pub skipped_values: usize,
}

pub struct ClusterEngine<'a> {
    ctx: &'a RunContext,
    settings: ClusterSettings,
    label_schema: &'a AnnotationSchema,
}

impl<'a> ClusterEngine<'a> {
    pub fn new(
        ctx: &'a RunContext,
        settings: ClusterSettings,
        label_schema: &'a AnnotationSchema,
    ) -> Self {
        Self {
            ctx,
            settings,
            label_schema,
        }
    }

    /// Embed every distinct value once. Values over the token limit are
    /// skipped; failures are counted and logged.
    async fn embed_values(&self, values: &[String]) -> (HashMap<String, Vec<f32>>, usize, usize) {
        let limit = self.ctx.settings.embedding_token_limit;
        let (eligible, oversized): (Vec<String>, Vec<String>) = values
            .iter()
            .cloned()
            .partition(|v| self.ctx.counter.count(v) <= limit);
        for value in &oversized {
            debug!(chars = value.len(), "value over embedding token limit, skipping");
        }

        let model = &self.ctx.settings.embedding_model;
        let results = self
            .ctx
            .dispatcher
            .dispatch_all("embed", &eligible, |value| {
                self.ctx.embeddings.embed(model, value)
            })
            .await;

        let mut vectors = HashMap::new();
        let mut failed = 0;
        for (value, result) in eligible.into_iter().zip(results) {
            match result {
                Ok(vector) => {
                    vectors.insert(value, vector);
                }
                Err(e) => {
                    warn!(
                        run_id = %self.ctx.run_id,
                        error = %e,
                        "embedding failed, dropping value"
                    );
                    failed += 1;
                }
            }
        }
        (vectors, failed, oversized.len())
    }

    /// Cluster one attribute's distinct values (sorted) into ids. The
    /// clustering itself runs on the blocking pool.
    async fn cluster_attribute(
        &self,
        attribute: &str,
        values: &[&String],
        vectors: &HashMap<String, Vec<f32>>,
    ) -> Vec<usize> {
        if values.len() < MIN_DISTINCT_FOR_CLUSTERING {
            return vec![0; values.len()];
        }
        let matrix: Vec<Vec<f32>> = values
            .iter()
            .map(|v| vectors.get(*v).cloned().unwrap_or_default())
            .collect();
        let k = self.settings.max_clusters.min(values.len());
        let linkage = self.settings.linkage;
        let clustered =
            tokio::task::spawn_blocking(move || agglomerate(&matrix, k, linkage)).await;
        match clustered {
            Ok(Ok(ids)) => ids,
            Ok(Err(e)) => {
                warn!(
                    run_id = %self.ctx.run_id,
                    attribute,
                    error = %e,
                    "clustering failed, using a single cluster"
                );
                vec![0; values.len()]
            }
            Err(e) => {
                warn!(
                    run_id = %self.ctx.run_id,
                    attribute,
                    error = %e,
                    "clustering task aborted, using a single cluster"
                );
                vec![0; values.len()]
            }
        }
    }

    async fn label_cluster(
        &self,
        attribute: &str,
        cluster: usize,
        ranked: &[(String, usize)],
    ) -> String {
        let max_words = self.settings.max_label_words;
        let fallback = || {
            ranked
                .first()
                .map(|(v, _)| truncate_words(v, max_words))
                .unwrap_or_default()
        };

        let sample: Vec<String> = ranked
            .iter()
            .take(self.settings.label_sample_size.max(1))
            .map(|(v, _)| format!("- {v}"))
            .collect();
        let messages = vec![
            ChatMessage::system(self.label_schema.instructions.clone()),
            ChatMessage::user(format!(
                "Attribute: {attribute}\nPhrases:\n{}",
                sample.join("\n")
            )),
        ];
        let unit = format!("label:{attribute}[{cluster}]");

        let temperature = self.ctx.settings.temperature;
        match structured_call(self.ctx, &unit, self.label_schema, messages, temperature).await {
            Ok(Extraction::Record(record)) => match record.get("label") {
                Some(label) if !label.trim().is_empty() => truncate_words(label, max_words),
                _ => fallback(),
            },
            Ok(Extraction::Categories(_)) => fallback(),
            Err(e) => {
                warn!(
                    run_id = %self.ctx.run_id,
                    attribute,
                    cluster,
                    error = %e,
                    "cluster label failed, using most frequent value"
                );
                fallback()
            }
        }
    }

    /// Pivot, embed, cluster, and label.
    pub async fn run(&self, items: &[Item]) -> ClusterOutcome {
        let rows = pivot(items);

        let mut distinct: Vec<String> = rows.iter().map(|r| r.value.clone()).collect();
        distinct.sort();
        distinct.dedup();

        let (vectors, failed_values, skipped_values) = self.embed_values(&distinct).await;

        let mut rows: Vec<AttributeValueRow> = rows
            .into_iter()
            .filter_map(|mut row| {
                let vector = vectors.get(&row.value)?;
                row.embedding = vector.clone();
                Some(row)
            })
            .collect();

        // attribute → value → occurrence count
        let mut by_attribute: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
        for row in &rows {
            *by_attribute
                .entry(row.attribute.clone())
                .or_default()
                .entry(row.value.clone())
                .or_default() += 1;
        }

        // (attribute, value) → cluster id
        let mut assignment: HashMap<(String, String), usize> = HashMap::new();
        let mut label_jobs: Vec<(String, usize, Vec<(String, usize)>)> = Vec::new();
        for (attribute, counts) in &by_attribute {
            let values: Vec<&String> = counts.keys().collect();
            let ids = self.cluster_attribute(attribute, &values, &vectors).await;

            let mut per_cluster: BTreeMap<usize, Vec<(String, usize)>> = BTreeMap::new();
            for (value, id) in values.iter().zip(&ids) {
                assignment.insert((attribute.clone(), (*value).clone()), *id);
                per_cluster
                    .entry(*id)
                    .or_default()
                    .push(((*value).clone(), counts[*value]));
            }
            for (id, mut ranked) in per_cluster {
                ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                label_jobs.push((attribute.clone(), id, ranked));
            }
        }

        let labels = futures::future::join_all(
            label_jobs
                .iter()
                .map(|(attribute, id, ranked)| self.label_cluster(attribute, *id, ranked)),
        )
        .await;
        let labels: HashMap<(&str, usize), String> = label_jobs
            .iter()
            .zip(labels)
            .map(|((attribute, id, _), label)| ((attribute.as_str(), *id), label))
            .collect();

        for row in &mut rows {
            if let Some(id) = assignment.get(&(row.attribute.clone(), row.value.clone())) {
                row.cluster_id = Some(*id);
                row.cluster_label = labels.get(&(row.attribute.as_str(), *id)).cloned();
            }
        }

        info!(
            run_id = %self.ctx.run_id,
            rows = rows.len(),
            attributes = by_attribute.len(),
            clusters = labels.len(),
            failed_values,
            skipped_values,
            "clustering complete"
        );
        ClusterOutcome {
            rows,
            distinct_values: distinct.len(),
            failed_values,
            skipped_values,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use reviewlens_core::IdentityMapper;

    use super::*;
    use crate::schema::{CLUSTER_LABEL, SchemaRegistry};
    use crate::service::ServiceError;
    use crate::testing::{StubCompletions, StubEmbeddings, context, sources};

    fn items_with(attribute: &str, values: &[&str]) -> (IdentityMapper, Vec<Item>) {
        let mut srcs = sources(
            &values
                .iter()
                .map(|_| ("B01", 4u8, "text"))
                .collect::<Vec<_>>(),
        );
        for (src, value) in srcs.iter_mut().zip(values) {
            src.attributes.insert(attribute.into(), value.to_string());
        }
        IdentityMapper::assign(srcs)
    }

    fn label_stub() -> Arc<StubCompletions> {
        StubCompletions::new(|req| {
            let first = req.messages[1]
                .content
                .lines()
                .find_map(|l| l.strip_prefix("- "))
                .unwrap_or("none")
                .to_string();
            Ok(serde_json::json!({ "label": format!("about {first}") }).to_string())
        })
    }

    #[test]
    fn sentinels_are_recognised() {
        for s in ["", "  ", "N/A", "Not Mentioned", " none ", "-", "NaN", "not applicable"] {
            assert!(is_sentinel(s), "{s:?}");
        }
        for s in ["red", "not great", "nano"] {
            assert!(!is_sentinel(s), "{s:?}");
        }
    }

    #[test]
    fn pivot_drops_sentinels_and_trims() {
        let (_, items) = items_with("season", &["  winter ", "unknown", "summer"]);
        let rows = pivot(&items);
        let values: Vec<&str> = rows.iter().map(|r| r.value.as_str()).collect();
        assert_eq!(values, vec!["winter", "summer"]);
        assert_eq!(rows[1].item_uid, 2);
    }

    #[test]
    fn truncates_to_word_limit() {
        assert_eq!(truncate_words("one two three", 7), "one two three");
        assert_eq!(truncate_words("a b c d e f g h i", 7), "a b c d e f g");
        assert_eq!(truncate_words("  spaced   out ", 7), "spaced out");
    }

    #[test]
    fn separates_two_obvious_groups() {
        let vectors = vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![0.95, 0.05],
            vec![0.05, 0.95],
            vec![0.9, 0.1],
        ];
        for linkage in [Linkage::Ward, Linkage::Average] {
            let ids = agglomerate(&vectors, 2, linkage).unwrap();
            assert_eq!(ids, vec![0, 1, 0, 1, 0], "{linkage:?}");
        }
    }

    #[test]
    fn k_at_least_n_keeps_singletons() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        assert_eq!(agglomerate(&vectors, 5, Linkage::Ward).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn k_of_one_merges_everything() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        assert_eq!(agglomerate(&vectors, 1, Linkage::Average).unwrap(), vec![0, 0, 0]);
    }

    fn scatter(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dim).map(|_| rng.random_range(-1.0f32..1.0)).collect())
            .collect()
    }

    /// Greedy closest-pair merging, one full scan per merge.
    fn greedy_partition(vectors: &[Vec<f32>], k: usize, linkage: Linkage) -> Vec<usize> {
        let points: Vec<Vec<f32>> = vectors
            .iter()
            .map(|v| {
                let mut v = v.clone();
                normalize(&mut v);
                v
            })
            .collect();
        let mut dist = Condensed::build(&points, linkage);
        let n = points.len();
        let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
        let mut active = vec![true; n];
        for _ in 0..n.saturating_sub(k) {
            let mut best: Option<(usize, usize, f64)> = None;
            for i in (0..n).filter(|&i| active[i]) {
                for j in ((i + 1)..n).filter(|&j| active[j]) {
                    if best.is_none_or(|(_, _, d)| dist.get(i, j) < d) {
                        best = Some((i, j, dist.get(i, j)));
                    }
                }
            }
            let (i, j, d_ij) = best.unwrap();
            let (ni, nj) = (members[i].len() as f64, members[j].len() as f64);
            for m in (0..n).filter(|&m| active[m] && m != i && m != j) {
                let nm = members[m].len() as f64;
                let updated = match linkage {
                    Linkage::Ward => {
                        ((ni + nm) * dist.get(i, m) + (nj + nm) * dist.get(j, m) - nm * d_ij)
                            / (ni + nj + nm)
                    }
                    Linkage::Average => (ni * dist.get(i, m) + nj * dist.get(j, m)) / (ni + nj),
                };
                dist.set(i, m, updated);
            }
            let moved = std::mem::take(&mut members[j]);
            members[i].extend(moved);
            active[j] = false;
        }
        let mut ids = vec![0; n];
        for (id, slot) in (0..n).filter(|&s| active[s]).enumerate() {
            for &m in &members[slot] {
                ids[m] = id;
            }
        }
        ids
    }

    #[test]
    fn chain_matches_greedy_merging() {
        for (seed, linkage) in [(7, Linkage::Ward), (11, Linkage::Average)] {
            let vectors = scatter(80, 6, seed);
            for k in [1, 5, 12, 80] {
                assert_eq!(
                    agglomerate(&vectors, k, linkage).unwrap(),
                    greedy_partition(&vectors, k, linkage),
                    "{linkage:?} k={k}"
                );
            }
        }
    }

    #[test]
    fn hundreds_of_values_keep_their_groups() {
        let centres = [
            [1.0f32, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let noise = scatter(400, 4, 3);
        let vectors: Vec<Vec<f32>> = noise
            .iter()
            .enumerate()
            .map(|(i, jitter)| {
                centres[i % 4]
                    .iter()
                    .zip(jitter)
                    .map(|(c, j)| c + 0.05 * j)
                    .collect()
            })
            .collect();

        for linkage in [Linkage::Ward, Linkage::Average] {
            let ids = agglomerate(&vectors, 4, linkage).unwrap();
            for (i, id) in ids.iter().enumerate() {
                assert_eq!(*id, i % 4, "{linkage:?} value {i}");
            }
        }
    }

    #[test]
    fn bad_input_is_an_error() {
        assert_eq!(agglomerate(&[], 2, Linkage::Ward), Err(ClusterError::Empty));
        assert_eq!(
            agglomerate(&[vec![1.0]], 0, Linkage::Ward),
            Err(ClusterError::ZeroClusters)
        );
        assert_eq!(
            agglomerate(&[vec![1.0, 0.0], vec![1.0]], 1, Linkage::Ward),
            Err(ClusterError::Dimension {
                expected: 2,
                found: 1
            })
        );
    }

    #[tokio::test]
    async fn two_distinct_values_share_cluster_zero() {
        let (identity, items) = items_with("season", &["winter", "summer", "winter"]);
        let embeddings = StubEmbeddings::new(vec![
            ("winter", vec![1.0, 0.0]),
            ("summer", vec![0.0, 1.0]),
        ]);
        let stub = label_stub();
        let ctx = context(stub.clone(), embeddings.clone(), identity);
        let registry = SchemaRegistry::builtin();
        let schema = registry.get(CLUSTER_LABEL).unwrap();
        let engine = ClusterEngine::new(&ctx, ClusterSettings::default(), &schema);

        let outcome = engine.run(&items).await;
        assert_eq!(outcome.rows.len(), 3);
        assert!(outcome.rows.iter().all(|r| r.cluster_id == Some(0)));
        // One label call for the single cluster; most frequent value sampled first.
        assert_eq!(stub.calls(), 1);
        assert!(outcome.rows.iter().all(|r| r.cluster_label.as_deref() == Some("about winter")));
        // Each distinct value embedded once.
        assert_eq!(embeddings.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn five_values_into_at_most_two_clusters() {
        let values = ["red", "crimson", "scarlet", "navy", "blue"];
        let (identity, items) = items_with("color", &values);
        let embeddings = StubEmbeddings::new(vec![
            ("red", vec![1.0, 0.0, 0.0]),
            ("crimson", vec![0.9, 0.1, 0.0]),
            ("scarlet", vec![0.95, 0.0, 0.05]),
            ("navy", vec![0.0, 0.1, 1.0]),
            ("blue", vec![0.0, 0.0, 1.0]),
        ]);
        let ctx = context(label_stub(), embeddings, identity);
        let registry = SchemaRegistry::builtin();
        let schema = registry.get(CLUSTER_LABEL).unwrap();
        let settings = ClusterSettings {
            max_clusters: 2,
            ..ClusterSettings::default()
        };
        let engine = ClusterEngine::new(&ctx, settings, &schema);

        let outcome = engine.run(&items).await;
        assert_eq!(outcome.rows.len(), 5);
        let ids: BTreeSet<usize> = outcome.rows.iter().filter_map(|r| r.cluster_id).collect();
        assert!(ids.len() <= 2);
        assert!(outcome.rows.iter().all(|r| r.cluster_label.is_some()));

        let id_of = |v: &str| {
            outcome
                .rows
                .iter()
                .find(|r| r.value == v)
                .and_then(|r| r.cluster_id)
        };
        assert_eq!(id_of("red"), id_of("crimson"));
        assert_eq!(id_of("navy"), id_of("blue"));
        assert_ne!(id_of("red"), id_of("blue"));
        // Sorted order is blue, crimson, navy, red, scarlet: blue's cluster is 0.
        assert_eq!(id_of("blue"), Some(0));
    }

    #[tokio::test]
    async fn failed_embeddings_drop_their_rows() {
        let (identity, items) = items_with("season", &["winter", "mystery"]);
        let embeddings = StubEmbeddings::new(vec![("winter", vec![1.0, 0.0])]);
        let ctx = context(label_stub(), embeddings, identity);
        let registry = SchemaRegistry::builtin();
        let schema = registry.get(CLUSTER_LABEL).unwrap();
        let engine = ClusterEngine::new(&ctx, ClusterSettings::default(), &schema);

        let outcome = engine.run(&items).await;
        assert_eq!(outcome.failed_values, 1);
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].value, "winter");
    }

    #[tokio::test]
    async fn oversized_values_are_not_embedded() {
        let long = "word ".repeat(100);
        let (identity, items) = items_with("issues", &["rust", long.trim()]);
        let embeddings = StubEmbeddings::new(vec![("rust", vec![1.0])]);
        let mut ctx = context(label_stub(), embeddings.clone(), identity);
        ctx.settings.embedding_token_limit = 10;
        let registry = SchemaRegistry::builtin();
        let schema = registry.get(CLUSTER_LABEL).unwrap();
        let engine = ClusterEngine::new(&ctx, ClusterSettings::default(), &schema);

        let outcome = engine.run(&items).await;
        assert_eq!(outcome.skipped_values, 1);
        assert_eq!(outcome.failed_values, 0);
        assert_eq!(*embeddings.calls.lock().unwrap(), vec!["rust".to_string()]);
        assert_eq!(outcome.rows.len(), 1);
    }

    #[tokio::test]
    async fn label_failure_falls_back_to_most_frequent_value() {
        let camping = "camping trips in the mountains every single summer";
        let (identity, items) = items_with("use", &[camping, camping, "hiking"]);
        let embeddings = StubEmbeddings::new(vec![
            (camping, vec![1.0, 0.0]),
            ("hiking", vec![0.9, 0.1]),
        ]);
        let stub = StubCompletions::new(|_| {
            Err(ServiceError::Rejected {
                status: 400,
                body: "nope".into(),
            })
        });
        let ctx = context(stub, embeddings, identity);
        let registry = SchemaRegistry::builtin();
        let schema = registry.get(CLUSTER_LABEL).unwrap();
        let engine = ClusterEngine::new(&ctx, ClusterSettings::default(), &schema);

        let outcome = engine.run(&items).await;
        assert!(outcome.rows.iter().all(|r| {
            r.cluster_label.as_deref() == Some("camping trips in the mountains every single")
        }));
    }

    #[tokio::test]
    async fn long_model_labels_are_truncated() {
        let (identity, items) = items_with("use", &["a", "b"]);
        let embeddings = StubEmbeddings::new(vec![("a", vec![1.0]), ("b", vec![1.0])]);
        let stub = StubCompletions::scripted(vec![
            r#"{"label":"one two three four five six seven eight nine"}"#,
        ]);
        let ctx = context(stub, embeddings, identity);
        let registry = SchemaRegistry::builtin();
        let schema = registry.get(CLUSTER_LABEL).unwrap();
        let engine = ClusterEngine::new(&ctx, ClusterSettings::default(), &schema);

        let outcome = engine.run(&items).await;
        assert_eq!(
            outcome.rows[0].cluster_label.as_deref(),
            Some("one two three four five six seven")
        );
    }
}
