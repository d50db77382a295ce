//! Per-leg retrieval: thin orchestration over [`Store`] that honors the
//! `include_vector`/`include_sparse`/`include_graph` skip flags and
//! enforces `top_k` defense-in-depth even if a backend over-returns.
//!
//! Leg-specific scoring itself (cosine similarity, BM25, graph decay)
//! lives in the `Store` implementation; this module is the seam fusion
//! reads through, so a caller never has to know which legs are enabled.

use crate::error::CoreResult;
use crate::models::ChunkMatch;
use crate::store::Store;

/// Which legs to run and how many candidates to pull from each. The
/// orchestrator (app crate) maps `RetrievalConfig` onto this per request.
#[derive(Debug, Clone)]
pub struct RetrievalRequest<'a> {
    pub corpus_id: &'a str,
    pub query_text: &'a str,
    pub query_vec: Option<&'a [f32]>,
    pub include_vector: bool,
    pub include_sparse: bool,
    pub include_graph: bool,
    pub top_k_vector: usize,
    pub top_k_sparse: usize,
    pub top_k_graph: usize,
    pub graph_max_depth: usize,
    /// Seed chunk ids for the graph leg. Typically the top vector/sparse
    /// hits from this same request; empty skips the graph leg even if
    /// `include_graph` is set (nothing to traverse from).
    pub graph_seeds: Vec<String>,
}

/// Independent per-leg result sets, not yet fused.
#[derive(Debug, Clone, Default)]
pub struct LegResults {
    pub vector: Vec<ChunkMatch>,
    pub sparse: Vec<ChunkMatch>,
    pub graph: Vec<ChunkMatch>,
}

/// Runs every enabled leg against `store` and returns their raw,
/// per-leg-sorted results. Does not merge, dedup, or rerank — see
/// [`crate::fusion`] for that.
pub async fn retrieve(store: &dyn Store, req: &RetrievalRequest<'_>) -> CoreResult<LegResults> {
    let mut out = LegResults::default();

    if req.include_vector {
        if let Some(qv) = req.query_vec {
            out.vector = store.vector_search(req.corpus_id, qv, req.top_k_vector).await?;
            out.vector.truncate(req.top_k_vector);
        }
    }

    if req.include_sparse && store.pg_search_available() {
        out.sparse = store.sparse_search(req.corpus_id, req.query_text, req.top_k_sparse).await?;
        out.sparse.truncate(req.top_k_sparse);
    }

    if req.include_graph && !req.graph_seeds.is_empty() {
        out.graph = store
            .graph_search(req.corpus_id, &req.graph_seeds, req.top_k_graph, req.graph_max_depth)
            .await?;
        out.graph.truncate(req.top_k_graph);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Metadata};
    use crate::store::memory::InMemoryStore;

    fn chunk(id: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            content: "hello world".to_string(),
            file_path: "a.txt".to_string(),
            start_line: 1,
            end_line: 1,
            language: None,
            token_count: 2,
            embedding: Some(vec![1.0, 0.0]),
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn skip_flags_are_honored() {
        let store = InMemoryStore::new();
        store.replace_chunks("c1", "a.txt", &[chunk("a")]).await.unwrap();

        let req = RetrievalRequest {
            corpus_id: "c1",
            query_text: "hello",
            query_vec: Some(&[1.0, 0.0]),
            include_vector: false,
            include_sparse: true,
            include_graph: false,
            top_k_vector: 5,
            top_k_sparse: 5,
            top_k_graph: 5,
            graph_max_depth: 2,
            graph_seeds: vec![],
        };
        let results = retrieve(&store, &req).await.unwrap();
        assert!(results.vector.is_empty());
        assert_eq!(results.sparse.len(), 1);
        assert!(results.graph.is_empty());
    }

    #[tokio::test]
    async fn vector_leg_skipped_without_query_vec() {
        let store = InMemoryStore::new();
        store.replace_chunks("c1", "a.txt", &[chunk("a")]).await.unwrap();
        let req = RetrievalRequest {
            corpus_id: "c1",
            query_text: "hello",
            query_vec: None,
            include_vector: true,
            include_sparse: false,
            include_graph: false,
            top_k_vector: 5,
            top_k_sparse: 5,
            top_k_graph: 5,
            graph_max_depth: 2,
            graph_seeds: vec![],
        };
        let results = retrieve(&store, &req).await.unwrap();
        assert!(results.vector.is_empty());
    }
}
