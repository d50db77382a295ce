//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] leg onto SQLite + FTS5: `chunks` for dense/graph
//! lookups and raw content, `chunks_fts` for the sparse leg, and
//! `graph_edges` for the graph leg. A connection pool opened without
//! FTS5 compiled in would fail every `sparse_search` call; rather than
//! surface that per-query, [`SqliteStore::new`] probes it once so
//! [`Store::pg_search_available`] can report it up front.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use tribrid_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use tribrid_core::error::{CoreError, CoreResult};
use tribrid_core::models::{Chunk, ChunkMatch, Corpus, MatchSource, Metadata};
use tribrid_core::store::{GraphEdge, Store};

pub struct SqliteStore {
    pool: SqlitePool,
    fts_available: bool,
}

impl SqliteStore {
    /// Probes for the FTS5 virtual table once at construction so later
    /// `sparse_search` calls don't pay for a failed-query round trip on
    /// backends built without the extension.
    pub async fn new(pool: SqlitePool) -> Self {
        let fts_available = sqlx::query_scalar::<_, bool>(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
        )
        .fetch_one(&pool)
        .await
        .unwrap_or(false);
        Self { pool, fts_available }
    }

    #[allow(dead_code)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn metadata_from_row(
    chunk_ordinal: Option<i64>,
    char_start: Option<i64>,
    char_end: Option<i64>,
    parent_doc_id: Option<String>,
    metadata_json: &str,
) -> Metadata {
    let mut metadata: Metadata = serde_json::from_str(metadata_json).unwrap_or_default();
    if let Some(v) = chunk_ordinal {
        metadata.insert("chunk_ordinal".to_string(), serde_json::json!(v));
    }
    if let Some(v) = char_start {
        metadata.insert("char_start".to_string(), serde_json::json!(v));
    }
    if let Some(v) = char_end {
        metadata.insert("char_end".to_string(), serde_json::json!(v));
    }
    if let Some(v) = parent_doc_id {
        metadata.insert("parent_doc_id".to_string(), serde_json::json!(v));
    }
    metadata
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    let embedding: Option<Vec<u8>> = row.get("embedding");
    let metadata_json: String = row.get("metadata_json");
    Chunk {
        chunk_id: row.get("chunk_id"),
        content: row.get("content"),
        file_path: row.get("file_path"),
        start_line: row.get::<i64, _>("start_line") as usize,
        end_line: row.get::<i64, _>("end_line") as usize,
        language: row.get("language"),
        token_count: row.get::<i64, _>("token_count") as usize,
        embedding: embedding.map(|b| blob_to_vec(&b)),
        metadata: metadata_from_row(
            row.get("chunk_ordinal"),
            row.get("char_start"),
            row.get("char_end"),
            row.get("parent_doc_id"),
            &metadata_json,
        ),
    }
}

fn cv<T>(metadata: &Metadata, key: &str) -> Option<T>
where
    T: serde::de::DeserializeOwned,
{
    metadata.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_corpus(&self, corpus: &Corpus) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO corpora (corpus_id, name, root_path, description)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(corpus_id) DO UPDATE SET
                name = excluded.name,
                root_path = excluded.root_path,
                description = excluded.description
            "#,
        )
        .bind(&corpus.corpus_id)
        .bind(&corpus.name)
        .bind(&corpus.root_path)
        .bind(&corpus.description)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::backend_unavailable(e.to_string()))?;
        Ok(())
    }

    async fn get_corpus(&self, corpus_id: &str) -> CoreResult<Option<Corpus>> {
        let row = sqlx::query("SELECT corpus_id, name, root_path, description FROM corpora WHERE corpus_id = ?")
            .bind(corpus_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::backend_unavailable(e.to_string()))?;
        Ok(row.map(|r| Corpus {
            corpus_id: r.get("corpus_id"),
            name: r.get("name"),
            root_path: r.get("root_path"),
            description: r.get("description"),
        }))
    }

    async fn list_corpora(&self) -> CoreResult<Vec<Corpus>> {
        let rows = sqlx::query("SELECT corpus_id, name, root_path, description FROM corpora")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoreError::backend_unavailable(e.to_string()))?;
        Ok(rows
            .iter()
            .map(|r| Corpus {
                corpus_id: r.get("corpus_id"),
                name: r.get("name"),
                root_path: r.get("root_path"),
                description: r.get("description"),
            })
            .collect())
    }

    async fn delete_corpus(&self, corpus_id: &str) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| CoreError::backend_unavailable(e.to_string()))?;
        sqlx::query("DELETE FROM chunks_fts WHERE corpus_id = ?").bind(corpus_id).execute(&mut *tx).await.ok();
        sqlx::query("DELETE FROM chunks WHERE corpus_id = ?").bind(corpus_id).execute(&mut *tx).await.map_err(|e| CoreError::backend_unavailable(e.to_string()))?;
        sqlx::query("DELETE FROM graph_edges WHERE corpus_id = ?").bind(corpus_id).execute(&mut *tx).await.map_err(|e| CoreError::backend_unavailable(e.to_string()))?;
        sqlx::query("DELETE FROM corpora WHERE corpus_id = ?").bind(corpus_id).execute(&mut *tx).await.map_err(|e| CoreError::backend_unavailable(e.to_string()))?;
        tx.commit().await.map_err(|e| CoreError::backend_unavailable(e.to_string()))?;
        Ok(())
    }

    async fn replace_chunks(&self, corpus_id: &str, file_path: &str, chunks: &[Chunk]) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| CoreError::backend_unavailable(e.to_string()))?;

        let existing_ids: Vec<String> = sqlx::query_scalar(
            "SELECT chunk_id FROM chunks WHERE corpus_id = ? AND file_path = ?",
        )
        .bind(corpus_id)
        .bind(file_path)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| CoreError::backend_unavailable(e.to_string()))?;

        for id in &existing_ids {
            sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?").bind(id).execute(&mut *tx).await.ok();
        }
        sqlx::query("DELETE FROM chunks WHERE corpus_id = ? AND file_path = ?")
            .bind(corpus_id)
            .bind(file_path)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::backend_unavailable(e.to_string()))?;

        for chunk in chunks {
            chunk.validate().map_err(|e| CoreError::config(e.to_string()))?;
            let metadata_json = serde_json::to_string(&chunk.metadata).unwrap_or_else(|_| "{}".to_string());
            let embedding_blob = chunk.embedding.as_ref().map(|v| vec_to_blob(v));
            sqlx::query(
                r#"
                INSERT INTO chunks (
                    chunk_id, corpus_id, file_path, start_line, end_line, language,
                    token_count, content, embedding, chunk_ordinal, char_start, char_end,
                    parent_doc_id, metadata_json
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(corpus_id)
            .bind(file_path)
            .bind(chunk.start_line as i64)
            .bind(chunk.end_line as i64)
            .bind(&chunk.language)
            .bind(chunk.token_count as i64)
            .bind(&chunk.content)
            .bind(embedding_blob)
            .bind(chunk.chunk_ordinal())
            .bind(cv::<i64>(&chunk.metadata, "char_start"))
            .bind(cv::<i64>(&chunk.metadata, "char_end"))
            .bind(chunk.parent_doc_id())
            .bind(&metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::backend_unavailable(e.to_string()))?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, corpus_id, content) VALUES (?, ?, ?)")
                .bind(&chunk.chunk_id)
                .bind(corpus_id)
                .bind(&chunk.content)
                .execute(&mut *tx)
                .await
                .ok();
        }

        tx.commit().await.map_err(|e| CoreError::backend_unavailable(e.to_string()))?;
        Ok(())
    }

    async fn upsert_edges(&self, corpus_id: &str, edges: &[GraphEdge]) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| CoreError::backend_unavailable(e.to_string()))?;
        sqlx::query("DELETE FROM graph_edges WHERE corpus_id = ?")
            .bind(corpus_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::backend_unavailable(e.to_string()))?;
        for edge in edges {
            sqlx::query(
                "INSERT INTO graph_edges (corpus_id, from_chunk_id, to_chunk_id, weight, relation) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(corpus_id)
            .bind(&edge.from_chunk_id)
            .bind(&edge.to_chunk_id)
            .bind(edge.weight)
            .bind(&edge.relation)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::backend_unavailable(e.to_string()))?;
        }
        tx.commit().await.map_err(|e| CoreError::backend_unavailable(e.to_string()))?;
        Ok(())
    }

    async fn vector_search(&self, corpus_id: &str, query_vec: &[f32], top_k: usize) -> CoreResult<Vec<ChunkMatch>> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, corpus_id, file_path, start_line, end_line, language, token_count,
                   content, embedding, chunk_ordinal, char_start, char_end, parent_doc_id, metadata_json
            FROM chunks WHERE corpus_id = ? AND embedding IS NOT NULL
            "#,
        )
        .bind(corpus_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::backend_unavailable(e.to_string()))?;

        let mut matches: Vec<ChunkMatch> = rows
            .iter()
            .map(|row| {
                let chunk = row_to_chunk(row);
                let emb = chunk.embedding.clone().unwrap_or_default();
                let score = cosine_similarity(query_vec, &emb) as f64;
                ChunkMatch::from_chunk(&chunk, score, MatchSource::Vector, corpus_id)
            })
            .collect();
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn sparse_search(&self, corpus_id: &str, query: &str, top_k: usize) -> CoreResult<Vec<ChunkMatch>> {
        if !self.fts_available {
            return Err(CoreError::backend_unavailable("FTS5 virtual table not present"));
        }
        let rows = sqlx::query(
            r#"
            SELECT c.chunk_id, c.corpus_id, c.file_path, c.start_line, c.end_line, c.language,
                   c.token_count, c.content, c.embedding, c.chunk_ordinal, c.char_start, c.char_end,
                   c.parent_doc_id, c.metadata_json, f.rank AS rank
            FROM chunks_fts f
            JOIN chunks c ON c.chunk_id = f.chunk_id
            WHERE f.chunks_fts MATCH ? AND f.corpus_id = ?
            ORDER BY f.rank
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(corpus_id)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::backend_unavailable(e.to_string()))?;

        let matches: Vec<ChunkMatch> = rows
            .iter()
            .map(|row| {
                let chunk = row_to_chunk(row);
                let rank: f64 = row.get("rank");
                ChunkMatch::from_chunk(&chunk, -rank, MatchSource::Sparse, corpus_id)
            })
            .collect();
        Ok(matches)
    }

    async fn graph_search(
        &self,
        corpus_id: &str,
        seed_chunk_ids: &[String],
        top_k: usize,
        max_depth: usize,
    ) -> CoreResult<Vec<ChunkMatch>> {
        let edge_rows = sqlx::query(
            "SELECT from_chunk_id, to_chunk_id, weight, relation FROM graph_edges WHERE corpus_id = ?",
        )
        .bind(corpus_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::backend_unavailable(e.to_string()))?;

        let mut by_source: HashMap<String, Vec<(String, f64)>> = HashMap::new();
        for row in &edge_rows {
            let from: String = row.get("from_chunk_id");
            let to: String = row.get("to_chunk_id");
            let weight: f64 = row.get("weight");
            by_source.entry(from).or_default().push((to, weight));
        }

        let mut scores: HashMap<String, f64> = HashMap::new();
        let mut visited: HashSet<String> = seed_chunk_ids.iter().cloned().collect();
        let mut frontier: Vec<String> = seed_chunk_ids.to_vec();

        for depth in 0..max_depth {
            let mut next_frontier = Vec::new();
            for node in &frontier {
                let Some(out_edges) = by_source.get(node) else { continue };
                for (to, weight) in out_edges {
                    let contribution = weight / (depth as f64 + 1.0);
                    *scores.entry(to.clone()).or_insert(0.0) += contribution;
                    if visited.insert(to.clone()) {
                        next_frontier.push(to.clone());
                    }
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }

        if scores.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_ids: Vec<&String> = scores.keys().collect();
        let placeholders = vec!["?"; chunk_ids.len()].join(",");
        let sql = format!(
            "SELECT chunk_id, corpus_id, file_path, start_line, end_line, language, token_count, \
             content, embedding, chunk_ordinal, char_start, char_end, parent_doc_id, metadata_json \
             FROM chunks WHERE corpus_id = ? AND chunk_id IN ({placeholders})"
        );
        let mut q = sqlx::query(&sql).bind(corpus_id);
        for id in &chunk_ids {
            q = q.bind(id.as_str());
        }
        let rows = q.fetch_all(&self.pool).await.map_err(|e| CoreError::backend_unavailable(e.to_string()))?;

        let mut matches: Vec<ChunkMatch> = rows
            .iter()
            .map(|row| {
                let chunk = row_to_chunk(row);
                let score = scores.get(&chunk.chunk_id).copied().unwrap_or(0.0);
                ChunkMatch::from_chunk(&chunk, score, MatchSource::Graph, corpus_id)
            })
            .collect();
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn get_chunk(&self, corpus_id: &str, chunk_id: &str) -> CoreResult<Option<Chunk>> {
        let row = sqlx::query(
            r#"
            SELECT chunk_id, corpus_id, file_path, start_line, end_line, language, token_count,
                   content, embedding, chunk_ordinal, char_start, char_end, parent_doc_id, metadata_json
            FROM chunks WHERE corpus_id = ? AND chunk_id = ?
            "#,
        )
        .bind(corpus_id)
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoreError::backend_unavailable(e.to_string()))?;
        Ok(row.as_ref().map(row_to_chunk))
    }

    async fn neighbors(&self, corpus_id: &str, chunk_id: &str, radius: i64) -> CoreResult<Vec<Chunk>> {
        let Some(origin) = self.get_chunk(corpus_id, chunk_id).await? else {
            return Ok(Vec::new());
        };
        let Some(origin_ordinal) = origin.chunk_ordinal() else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(
            r#"
            SELECT chunk_id, corpus_id, file_path, start_line, end_line, language, token_count,
                   content, embedding, chunk_ordinal, char_start, char_end, parent_doc_id, metadata_json
            FROM chunks
            WHERE corpus_id = ? AND file_path = ? AND chunk_id != ?
              AND chunk_ordinal IS NOT NULL
              AND ABS(chunk_ordinal - ?) <= ?
            "#,
        )
        .bind(corpus_id)
        .bind(&origin.file_path)
        .bind(chunk_id)
        .bind(origin_ordinal)
        .bind(radius)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::backend_unavailable(e.to_string()))?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    fn pg_search_available(&self) -> bool {
        self.fts_available
    }
}
