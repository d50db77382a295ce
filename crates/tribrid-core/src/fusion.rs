//! Tri-brid fusion: combine per-leg result sets into one ranked list.
//!
//! Two fusion methods (`rrf`, `weighted`) produce an initial fused score;
//! the shaping pipeline then runs six stages in order: multi-corpus
//! merge, dedup, per-file cap, MMR diversification, neighbor expansion,
//! truncate to `top_k`. [`FusionDebug`] records per-stage counts for the
//! trace sink — grounded on the `normalize_scores` min-max pattern in
//! the old hybrid search algorithm, generalized here across three legs
//! instead of two.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::models::{ChunkMatch, MatchSource};
use crate::retrieval::LegResults;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    Rrf,
    Weighted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LegWeights {
    pub vector: f64,
    pub sparse: f64,
    pub graph: f64,
}

impl LegWeights {
    /// Equal weight split across whichever legs actually returned
    /// candidates; a leg with no results contributes 0 regardless of
    /// its configured weight.
    pub fn equal_over(results: &LegResults) -> Self {
        let enabled = [
            !results.vector.is_empty(),
            !results.sparse.is_empty(),
            !results.graph.is_empty(),
        ];
        let n = enabled.iter().filter(|b| **b).count().max(1) as f64;
        Self {
            vector: if enabled[0] { 1.0 / n } else { 0.0 },
            sparse: if enabled[1] { 1.0 / n } else { 0.0 },
            graph: if enabled[2] { 1.0 / n } else { 0.0 },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    pub method: FusionMethod,
    pub rrf_k: usize,
    /// `None` means equal weighting over whichever legs returned
    /// results, recomputed per request by [`LegWeights::equal_over`].
    pub weights: Option<LegWeights>,
    pub max_per_file: usize,
    pub mmr_enabled: bool,
    pub mmr_lambda: f64,
    pub neighbor_expansion_enabled: bool,
    pub neighbor_radius: i64,
    pub top_k: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            method: FusionMethod::Rrf,
            rrf_k: 60,
            weights: None,
            max_per_file: 3,
            mmr_enabled: true,
            mmr_lambda: 0.5,
            neighbor_expansion_enabled: true,
            neighbor_radius: 1,
            top_k: 10,
        }
    }
}

/// Per-stage candidate counts, attached to the trace's `retrieval.fusion`
/// event.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FusionDebug {
    pub vector_candidates: usize,
    pub sparse_candidates: usize,
    pub graph_candidates: usize,
    pub after_fuse: usize,
    pub after_dedup: usize,
    pub after_cap: usize,
    pub after_mmr: usize,
    pub after_neighbors: usize,
    pub final_count: usize,
}

fn min_max_normalize(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let lo = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    scores
        .iter()
        .map(|&s| if (hi - lo).abs() < f64::EPSILON { 1.0 } else { (s - lo) / (hi - lo) })
        .collect()
}

fn rrf_contribution(rank: usize, rrf_k: usize) -> f64 {
    1.0 / (rrf_k as f64 + rank as f64)
}

/// Descending by score, ties broken ascending on `(file_path, start_line,
/// chunk_id)` so every fused/shaped ordering is deterministic.
fn cmp_score_desc(a: &ChunkMatch, b: &ChunkMatch) -> std::cmp::Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| (a.file_path.as_str(), a.start_line, a.chunk_id.as_str()).cmp(&(b.file_path.as_str(), b.start_line, b.chunk_id.as_str())))
}

struct Accum {
    representative: ChunkMatch,
    score: f64,
    best_leg_score: f64,
    best_leg: MatchSource,
}

/// Fuses one corpus's per-leg results into a single scored, sorted list.
/// Does not run the shaping pipeline — call [`shape`] next.
pub fn fuse_single(results: &LegResults, config: &FusionConfig) -> Vec<ChunkMatch> {
    let mut accum: HashMap<String, Accum> = HashMap::new();

    let legs: [(&Vec<ChunkMatch>, MatchSource); 3] = [
        (&results.vector, MatchSource::Vector),
        (&results.sparse, MatchSource::Sparse),
        (&results.graph, MatchSource::Graph),
    ];

    match config.method {
        FusionMethod::Rrf => {
            for (leg_matches, source) in legs {
                for (rank, m) in leg_matches.iter().enumerate() {
                    let contribution = rrf_contribution(rank + 1, config.rrf_k);
                    merge_contribution(&mut accum, m, source, contribution, m.score);
                }
            }
        }
        FusionMethod::Weighted => {
            let weights = config.weights.unwrap_or_else(|| LegWeights::equal_over(results));
            for (leg_matches, source, weight) in [
                (&results.vector, MatchSource::Vector, weights.vector),
                (&results.sparse, MatchSource::Sparse, weights.sparse),
                (&results.graph, MatchSource::Graph, weights.graph),
            ] {
                let raw: Vec<f64> = leg_matches.iter().map(|m| m.score).collect();
                let normalized = min_max_normalize(&raw);
                for (m, norm) in leg_matches.iter().zip(normalized.iter()) {
                    merge_contribution(&mut accum, m, source, weight * norm, m.score);
                }
            }
        }
    }

    let mut fused: Vec<ChunkMatch> = accum
        .into_values()
        .map(|a| {
            let mut m = a.representative;
            m.score = a.score;
            m.source = a.best_leg;
            m
        })
        .collect();
    fused.sort_by(cmp_score_desc);
    fused
}

fn merge_contribution(accum: &mut HashMap<String, Accum>, m: &ChunkMatch, source: MatchSource, contribution: f64, leg_raw_score: f64) {
    accum
        .entry(m.chunk_id.clone())
        .and_modify(|a| {
            a.score += contribution;
            if leg_raw_score > a.best_leg_score {
                a.best_leg_score = leg_raw_score;
                a.best_leg = source;
            }
        })
        .or_insert_with(|| Accum {
            representative: m.clone(),
            score: contribution,
            best_leg_score: leg_raw_score,
            best_leg: source,
        });
}

fn jaccard(a: &str, b: &str) -> f64 {
    let set_a: std::collections::HashSet<&str> = a.split_whitespace().collect();
    let set_b: std::collections::HashSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn dedup(matches: Vec<ChunkMatch>) -> Vec<ChunkMatch> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<ChunkMatch> = Vec::new();
    for m in matches {
        if let Some(&idx) = seen.get(&m.chunk_id) {
            if m.score > out[idx].score {
                out[idx] = m;
            }
        } else {
            seen.insert(m.chunk_id.clone(), out.len());
            out.push(m);
        }
    }
    out.sort_by(cmp_score_desc);
    out
}

fn cap_per_file(matches: Vec<ChunkMatch>, max_per_file: usize) -> Vec<ChunkMatch> {
    if max_per_file == 0 {
        return matches;
    }
    let mut per_file_count: HashMap<String, usize> = HashMap::new();
    matches
        .into_iter()
        .filter(|m| {
            let count = per_file_count.entry(m.file_path.clone()).or_insert(0);
            *count += 1;
            *count <= max_per_file
        })
        .collect()
}

/// Greedy maximal-marginal-relevance selection: repeatedly picks the
/// remaining candidate maximizing
/// `lambda * relevance - (1 - lambda) * max_similarity_to_selected`,
/// where similarity is Jaccard over whitespace-tokenized content.
fn apply_mmr(matches: Vec<ChunkMatch>, lambda: f64) -> Vec<ChunkMatch> {
    if matches.len() <= 1 {
        return matches;
    }
    let max_score = matches.iter().map(|m| m.score).fold(f64::NEG_INFINITY, f64::max).max(f64::EPSILON);
    let mut remaining = matches;
    let mut selected: Vec<ChunkMatch> = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_mmr = f64::NEG_INFINITY;
        for (i, cand) in remaining.iter().enumerate() {
            let relevance = cand.score / max_score;
            let max_sim = selected
                .iter()
                .map(|s| jaccard(&cand.content, &s.content))
                .fold(0.0_f64, f64::max);
            let mmr = lambda * relevance - (1.0 - lambda) * max_sim;
            if mmr > best_mmr {
                best_mmr = mmr;
                best_idx = i;
            }
        }
        selected.push(remaining.remove(best_idx));
    }
    selected
}

/// Adds same-file chunks adjacent (within `radius` ordinals) to each
/// already-selected match, tagged `metadata.neighbor_of`, at half the
/// originating match's score, without exceeding `top_k * 3` extra
/// candidates (neighbor expansion never dominates the result set).
async fn expand_neighbors(
    store: &dyn Store,
    corpus_id: &str,
    matches: &[ChunkMatch],
    radius: i64,
    top_k: usize,
) -> CoreResult<Vec<ChunkMatch>> {
    if radius <= 0 {
        return Ok(Vec::new());
    }
    let mut existing: std::collections::HashSet<String> = matches.iter().map(|m| m.chunk_id.clone()).collect();
    let mut added = Vec::new();
    for m in matches {
        if added.len() >= top_k * 3 {
            break;
        }
        let neighbors = store.neighbors(corpus_id, &m.chunk_id, radius).await?;
        for n in neighbors {
            if !existing.insert(n.chunk_id.clone()) {
                continue;
            }
            let mut neighbor_match = ChunkMatch::from_chunk(&n, m.score * 0.5, m.source, corpus_id);
            neighbor_match.metadata.insert("neighbor_of".to_string(), serde_json::json!(m.chunk_id));
            added.push(neighbor_match);
        }
    }
    Ok(added)
}

/// Runs the full shaping pipeline over already-fused, possibly
/// multi-corpus candidates: dedup, per-file cap, MMR, neighbor
/// expansion, truncate to `top_k`. Returns the shaped list plus debug
/// counters for the trace sink.
pub async fn shape(
    store: &dyn Store,
    corpus_id: &str,
    merged: Vec<ChunkMatch>,
    config: &FusionConfig,
    mut debug: FusionDebug,
) -> CoreResult<(Vec<ChunkMatch>, FusionDebug)> {
    debug.after_fuse = merged.len();

    let deduped = dedup(merged);
    debug.after_dedup = deduped.len();

    let capped = cap_per_file(deduped, config.max_per_file);
    debug.after_cap = capped.len();

    let diversified = if config.mmr_enabled {
        apply_mmr(capped, config.mmr_lambda)
    } else {
        capped
    };
    debug.after_mmr = diversified.len();

    let mut with_neighbors = diversified;
    if config.neighbor_expansion_enabled {
        let extra = expand_neighbors(store, corpus_id, &with_neighbors, config.neighbor_radius, config.top_k).await?;
        with_neighbors.extend(extra);
    }
    with_neighbors.sort_by(cmp_score_desc);
    debug.after_neighbors = with_neighbors.len();

    with_neighbors.truncate(config.top_k);
    debug.final_count = with_neighbors.len();

    Ok((with_neighbors, debug))
}

/// Concatenates fused results from multiple corpora ahead of [`shape`]
/// (the multi-corpus-merge shaping stage).
pub fn merge_corpora(per_corpus: Vec<Vec<ChunkMatch>>) -> Vec<ChunkMatch> {
    per_corpus.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn make_match(id: &str, file: &str, score: f64, source: MatchSource) -> ChunkMatch {
        ChunkMatch {
            chunk_id: id.to_string(),
            content: format!("content {id}"),
            file_path: file.to_string(),
            start_line: 1,
            end_line: 1,
            language: None,
            token_count: 2,
            score,
            source,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn rrf_rewards_consensus_across_legs() {
        let results = LegResults {
            vector: vec![make_match("a", "f1", 0.9, MatchSource::Vector), make_match("b", "f1", 0.5, MatchSource::Vector)],
            sparse: vec![make_match("a", "f1", 5.0, MatchSource::Sparse)],
            graph: vec![],
        };
        let config = FusionConfig::default();
        let fused = fuse_single(&results, &config);
        assert_eq!(fused[0].chunk_id, "a");
    }

    #[test]
    fn weighted_alpha_one_equals_single_leg_ranking() {
        let results = LegResults {
            vector: vec![make_match("a", "f1", 10.0, MatchSource::Vector), make_match("b", "f1", 1.0, MatchSource::Vector)],
            sparse: vec![],
            graph: vec![],
        };
        let mut config = FusionConfig::default();
        config.method = FusionMethod::Weighted;
        config.weights = Some(LegWeights { vector: 1.0, sparse: 0.0, graph: 0.0 });
        let fused = fuse_single(&results, &config);
        assert_eq!(fused[0].chunk_id, "a");
        assert_eq!(fused[1].chunk_id, "b");
    }

    #[test]
    fn dedup_keeps_highest_score() {
        let matches = vec![make_match("a", "f1", 0.2, MatchSource::Vector), make_match("a", "f1", 0.9, MatchSource::Sparse)];
        let out = dedup(matches);
        assert_eq!(out.len(), 1);
        assert!((out[0].score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn cap_per_file_limits_count() {
        let matches = vec![
            make_match("a", "f1", 0.9, MatchSource::Vector),
            make_match("b", "f1", 0.8, MatchSource::Vector),
            make_match("c", "f1", 0.7, MatchSource::Vector),
        ];
        let out = cap_per_file(matches, 2);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn mmr_demotes_near_duplicate_content() {
        let mut dup = make_match("b", "f1", 0.89, MatchSource::Vector);
        dup.content = "content a".to_string();
        let matches = vec![make_match("a", "f1", 0.9, MatchSource::Vector), dup, make_match("c", "f2", 0.5, MatchSource::Vector)];
        let out = apply_mmr(matches, 0.5);
        assert_eq!(out[0].chunk_id, "a");
        assert_eq!(out[1].chunk_id, "c");
    }

    #[test]
    fn equal_scores_break_ties_by_file_path_then_start_line_then_chunk_id() {
        let mut b = make_match("b", "f1", 0.5, MatchSource::Vector);
        b.start_line = 1;
        let mut a = make_match("a", "f1", 0.5, MatchSource::Vector);
        a.start_line = 2;
        let mut z = make_match("z", "f0", 0.5, MatchSource::Vector);
        z.start_line = 5;
        let mut matches = vec![a, b, z];
        matches.sort_by(cmp_score_desc);
        assert_eq!(matches.iter().map(|m| m.chunk_id.as_str()).collect::<Vec<_>>(), vec!["z", "b", "a"]);
    }

    #[tokio::test]
    async fn shape_truncates_to_top_k() {
        use crate::store::memory::InMemoryStore;
        let store = InMemoryStore::new();
        let matches: Vec<ChunkMatch> = (0..20).map(|i| make_match(&format!("m{i}"), "f1", 1.0 - (i as f64) * 0.01, MatchSource::Vector)).collect();
        let mut config = FusionConfig::default();
        config.max_per_file = 100;
        config.neighbor_expansion_enabled = false;
        config.top_k = 5;
        let (shaped, debug) = shape(&store, "c1", matches, &config, FusionDebug::default()).await.unwrap();
        assert_eq!(shaped.len(), 5);
        assert_eq!(debug.final_count, 5);
    }
}
