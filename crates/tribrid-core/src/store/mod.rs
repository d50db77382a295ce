//! Storage abstraction for the tri-brid retrieval engine.
//!
//! The [`Store`] trait is the single seam between the pure fusion/shaping
//! logic and a concrete backend (SQLite+FTS5+sqlite-vec in the app crate,
//! [`memory::InMemoryStore`] here for tests and WASM targets). Each leg
//! (vector, sparse, graph) is its own method so a backend can implement
//! only the legs it supports; [`Store::pg_search_available`] lets callers
//! probe for an optional capability before routing to it.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::models::{Chunk, ChunkMatch, Corpus};

/// A directed edge in the graph leg: `from_chunk_id` relates to
/// `to_chunk_id` with `weight` (typically co-occurrence or an explicit
/// extracted relationship), optionally labeled.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub from_chunk_id: String,
    pub to_chunk_id: String,
    pub weight: f64,
    pub relation: Option<String>,
}

/// Abstract storage backend for the tri-brid engine.
///
/// | Method | Leg / purpose |
/// |--------|---------|
/// | [`upsert_corpus`](Store::upsert_corpus) / [`get_corpus`](Store::get_corpus) / [`list_corpora`](Store::list_corpora) / [`delete_corpus`](Store::delete_corpus) | Corpus registry |
/// | [`replace_chunks`](Store::replace_chunks) | Re-index a file's chunks |
/// | [`upsert_edges`](Store::upsert_edges) | Populate the graph leg |
/// | [`vector_search`](Store::vector_search) | Dense leg: cosine similarity |
/// | [`sparse_search`](Store::sparse_search) | Sparse leg: BM25 / lexical |
/// | [`graph_search`](Store::graph_search) | Graph leg: weighted traversal from seeds |
/// | [`get_chunk`](Store::get_chunk) / [`neighbors`](Store::neighbors) | Shaping-pipeline support (neighbor expansion) |
/// | [`pg_search_available`](Store::pg_search_available) | Capability probe for an optional backend |
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_corpus(&self, corpus: &Corpus) -> CoreResult<()>;

    /// `Ok(None)` for an unknown corpus — never auto-creates one.
    async fn get_corpus(&self, corpus_id: &str) -> CoreResult<Option<Corpus>>;

    async fn list_corpora(&self) -> CoreResult<Vec<Corpus>>;

    async fn delete_corpus(&self, corpus_id: &str) -> CoreResult<()>;

    /// Replaces all chunks previously indexed for `file_path` within
    /// `corpus_id` with `chunks`.
    async fn replace_chunks(&self, corpus_id: &str, file_path: &str, chunks: &[Chunk]) -> CoreResult<()>;

    /// Replaces all graph edges for `corpus_id` with `edges` (callers
    /// re-derive the full edge set on each graph-extraction pass).
    async fn upsert_edges(&self, corpus_id: &str, edges: &[GraphEdge]) -> CoreResult<()>;

    /// Dense leg. Score is cosine similarity (`1 - cosine_distance`),
    /// already in `[-1.0, 1.0]`.
    async fn vector_search(&self, corpus_id: &str, query_vec: &[f32], top_k: usize) -> CoreResult<Vec<ChunkMatch>>;

    /// Sparse leg. Score is the backend's native lexical rank (BM25 or
    /// an approximation), returned verbatim.
    async fn sparse_search(&self, corpus_id: &str, query: &str, top_k: usize) -> CoreResult<Vec<ChunkMatch>>;

    /// Graph leg. Traverses outward from `seed_chunk_ids` up to
    /// `max_depth` hops; score is `1 / (depth + 1) * edge_weight`,
    /// summed when a chunk is reachable via more than one path.
    async fn graph_search(
        &self,
        corpus_id: &str,
        seed_chunk_ids: &[String],
        top_k: usize,
        max_depth: usize,
    ) -> CoreResult<Vec<ChunkMatch>>;

    async fn get_chunk(&self, corpus_id: &str, chunk_id: &str) -> CoreResult<Option<Chunk>>;

    /// Chunks from the same `file_path` whose `chunk_ordinal` is within
    /// `radius` of `chunk_id`'s, used by the shaping pipeline's neighbor
    /// expansion stage.
    async fn neighbors(&self, corpus_id: &str, chunk_id: &str, radius: i64) -> CoreResult<Vec<Chunk>>;

    /// Whether this backend can serve the sparse (BM25/FTS) leg. The
    /// in-memory store reports `true` (it always can, approximately);
    /// a SQLite backend without the FTS5 extension compiled in reports
    /// `false` so callers can skip the leg instead of failing the
    /// request (`CoreError::BackendUnavailable` is for the case where a
    /// required leg is missing, not an optional one).
    fn pg_search_available(&self) -> bool {
        true
    }
}
