//! In-memory [`Store`] implementation for testing and WASM targets.
//!
//! Keeps everything behind `std::sync::RwLock`; vector search is
//! brute-force cosine similarity and sparse search is a term-overlap
//! count standing in for a real BM25 index (no FTS engine is available
//! at this portable-core level — see `tribrid`'s SQLite+FTS5 backend for
//! the production sparse leg).

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::CoreResult;
use crate::models::{Chunk, ChunkMatch, Corpus, MatchSource};

use super::{GraphEdge, Store};

/// In-memory store for tests and WASM environments.
pub struct InMemoryStore {
    corpora: RwLock<HashMap<String, Corpus>>,
    chunks: RwLock<HashMap<String, Vec<Chunk>>>,
    edges: RwLock<HashMap<String, Vec<GraphEdge>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            corpora: RwLock::new(HashMap::new()),
            chunks: RwLock::new(HashMap::new()),
            edges: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_corpus(&self, corpus: &Corpus) -> CoreResult<()> {
        self.corpora.write().unwrap().insert(corpus.corpus_id.clone(), corpus.clone());
        Ok(())
    }

    async fn get_corpus(&self, corpus_id: &str) -> CoreResult<Option<Corpus>> {
        Ok(self.corpora.read().unwrap().get(corpus_id).cloned())
    }

    async fn list_corpora(&self) -> CoreResult<Vec<Corpus>> {
        Ok(self.corpora.read().unwrap().values().cloned().collect())
    }

    async fn delete_corpus(&self, corpus_id: &str) -> CoreResult<()> {
        self.corpora.write().unwrap().remove(corpus_id);
        self.chunks.write().unwrap().remove(corpus_id);
        self.edges.write().unwrap().remove(corpus_id);
        Ok(())
    }

    async fn replace_chunks(&self, corpus_id: &str, file_path: &str, chunks: &[Chunk]) -> CoreResult<()> {
        let mut all = self.chunks.write().unwrap();
        let entry = all.entry(corpus_id.to_string()).or_default();
        entry.retain(|c| c.file_path != file_path);
        entry.extend(chunks.iter().cloned());
        Ok(())
    }

    async fn upsert_edges(&self, corpus_id: &str, edges: &[GraphEdge]) -> CoreResult<()> {
        self.edges.write().unwrap().insert(corpus_id.to_string(), edges.to_vec());
        Ok(())
    }

    async fn vector_search(&self, corpus_id: &str, query_vec: &[f32], top_k: usize) -> CoreResult<Vec<ChunkMatch>> {
        let all = self.chunks.read().unwrap();
        let Some(corpus_chunks) = all.get(corpus_id) else {
            return Ok(Vec::new());
        };
        let mut matches: Vec<ChunkMatch> = corpus_chunks
            .iter()
            .filter_map(|c| {
                let emb = c.embedding.as_ref()?;
                let score = cosine_similarity(query_vec, emb) as f64;
                Some(ChunkMatch::from_chunk(c, score, MatchSource::Vector, corpus_id))
            })
            .collect();
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn sparse_search(&self, corpus_id: &str, query: &str, top_k: usize) -> CoreResult<Vec<ChunkMatch>> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let all = self.chunks.read().unwrap();
        let Some(corpus_chunks) = all.get(corpus_id) else {
            return Ok(Vec::new());
        };
        let mut matches: Vec<ChunkMatch> = corpus_chunks
            .iter()
            .filter_map(|c| {
                let text_lower = c.content.to_lowercase();
                let hits = terms.iter().filter(|t| text_lower.contains(*t)).count();
                if hits == 0 {
                    return None;
                }
                Some(ChunkMatch::from_chunk(c, hits as f64, MatchSource::Sparse, corpus_id))
            })
            .collect();
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn graph_search(
        &self,
        corpus_id: &str,
        seed_chunk_ids: &[String],
        top_k: usize,
        max_depth: usize,
    ) -> CoreResult<Vec<ChunkMatch>> {
        let edges_by_corpus = self.edges.read().unwrap();
        let Some(edges) = edges_by_corpus.get(corpus_id) else {
            return Ok(Vec::new());
        };
        let mut by_source: HashMap<&str, Vec<&GraphEdge>> = HashMap::new();
        for e in edges {
            by_source.entry(e.from_chunk_id.as_str()).or_default().push(e);
        }

        let mut scores: HashMap<String, f64> = HashMap::new();
        let mut visited: HashSet<String> = seed_chunk_ids.iter().cloned().collect();
        let mut frontier: Vec<String> = seed_chunk_ids.to_vec();

        for depth in 0..max_depth {
            let mut next_frontier = Vec::new();
            for node in &frontier {
                let Some(out_edges) = by_source.get(node.as_str()) else {
                    continue;
                };
                for edge in out_edges {
                    let contribution = edge.weight / (depth as f64 + 1.0);
                    *scores.entry(edge.to_chunk_id.clone()).or_insert(0.0) += contribution;
                    if visited.insert(edge.to_chunk_id.clone()) {
                        next_frontier.push(edge.to_chunk_id.clone());
                    }
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }
        drop(edges_by_corpus);

        let all = self.chunks.read().unwrap();
        let Some(corpus_chunks) = all.get(corpus_id) else {
            return Ok(Vec::new());
        };
        let mut matches: Vec<ChunkMatch> = scores
            .into_iter()
            .filter_map(|(chunk_id, score)| {
                let chunk = corpus_chunks.iter().find(|c| c.chunk_id == chunk_id)?;
                Some(ChunkMatch::from_chunk(chunk, score, MatchSource::Graph, corpus_id))
            })
            .collect();
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn get_chunk(&self, corpus_id: &str, chunk_id: &str) -> CoreResult<Option<Chunk>> {
        let all = self.chunks.read().unwrap();
        Ok(all.get(corpus_id).and_then(|cs| cs.iter().find(|c| c.chunk_id == chunk_id).cloned()))
    }

    async fn neighbors(&self, corpus_id: &str, chunk_id: &str, radius: i64) -> CoreResult<Vec<Chunk>> {
        let all = self.chunks.read().unwrap();
        let Some(corpus_chunks) = all.get(corpus_id) else {
            return Ok(Vec::new());
        };
        let Some(origin) = corpus_chunks.iter().find(|c| c.chunk_id == chunk_id) else {
            return Ok(Vec::new());
        };
        let Some(origin_ordinal) = origin.chunk_ordinal() else {
            return Ok(Vec::new());
        };
        let neighbors: Vec<Chunk> = corpus_chunks
            .iter()
            .filter(|c| {
                c.file_path == origin.file_path
                    && c.chunk_id != chunk_id
                    && c.chunk_ordinal()
                        .map(|ord| (ord - origin_ordinal).abs() <= radius)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        Ok(neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, file: &str, ordinal: i64, embedding: Option<Vec<f32>>) -> Chunk {
        let mut metadata = crate::models::Metadata::new();
        metadata.insert("chunk_ordinal".into(), serde_json::json!(ordinal));
        Chunk {
            chunk_id: id.to_string(),
            content: format!("content for {id}"),
            file_path: file.to_string(),
            start_line: 1,
            end_line: 1,
            language: None,
            token_count: 3,
            embedding,
            metadata,
        }
    }

    #[tokio::test]
    async fn vector_search_ranks_by_cosine_similarity() {
        let store = InMemoryStore::new();
        store
            .replace_chunks(
                "c1",
                "a.txt",
                &[
                    chunk("a", "a.txt", 0, Some(vec![1.0, 0.0])),
                    chunk("b", "a.txt", 1, Some(vec![0.0, 1.0])),
                ],
            )
            .await
            .unwrap();
        let results = store.vector_search("c1", &[1.0, 0.0], 5).await.unwrap();
        assert_eq!(results[0].chunk_id, "a");
    }

    #[tokio::test]
    async fn sparse_search_requires_term_overlap() {
        let store = InMemoryStore::new();
        store.replace_chunks("c1", "a.txt", &[chunk("a", "a.txt", 0, None)]).await.unwrap();
        let results = store.sparse_search("c1", "content", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        let none = store.sparse_search("c1", "nonexistent_term_xyz", 5).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn graph_search_decays_score_with_depth() {
        let store = InMemoryStore::new();
        store
            .replace_chunks("c1", "a.txt", &[chunk("a", "a.txt", 0, None), chunk("b", "a.txt", 1, None), chunk("c", "a.txt", 2, None)])
            .await
            .unwrap();
        store
            .upsert_edges(
                "c1",
                &[
                    GraphEdge { from_chunk_id: "a".into(), to_chunk_id: "b".into(), weight: 1.0, relation: None },
                    GraphEdge { from_chunk_id: "b".into(), to_chunk_id: "c".into(), weight: 1.0, relation: None },
                ],
            )
            .await
            .unwrap();
        let results = store.graph_search("c1", &["a".to_string()], 5, 3).await.unwrap();
        let b_score = results.iter().find(|m| m.chunk_id == "b").unwrap().score;
        let c_score = results.iter().find(|m| m.chunk_id == "c").unwrap().score;
        assert!(b_score > c_score);
    }

    #[tokio::test]
    async fn neighbors_respects_radius_and_file() {
        let store = InMemoryStore::new();
        store
            .replace_chunks(
                "c1",
                "a.txt",
                &[chunk("a", "a.txt", 0, None), chunk("b", "a.txt", 1, None), chunk("c", "a.txt", 5, None)],
            )
            .await
            .unwrap();
        let neighbors = store.neighbors("c1", "a", 1).await.unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].chunk_id, "b");
    }

    #[tokio::test]
    async fn get_corpus_returns_none_without_auto_create() {
        let store = InMemoryStore::new();
        assert!(store.get_corpus("unknown").await.unwrap().is_none());
        assert!(store.list_corpora().await.unwrap().is_empty());
    }
}
