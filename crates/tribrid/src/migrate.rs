//! Database schema migrations.
//!
//! Creates all tables the [`crate::sqlite_store::SqliteStore`] needs
//! (corpora, chunks, chunks_fts, graph_edges) and ensures idempotent
//! execution. Run via `tribrid init`.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::AppConfig;
use crate::db;

pub async fn run_migrations(config: &AppConfig) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations_on(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Runs all migrations against an already-open pool. Split out from
/// [`run_migrations`] so tests can run against an in-memory database.
pub async fn run_migrations_on(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS corpora (
            corpus_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            root_path TEXT NOT NULL,
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            corpus_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            language TEXT,
            token_count INTEGER NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB,
            chunk_ordinal INTEGER,
            char_start INTEGER,
            char_end INTEGER,
            parent_doc_id TEXT,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            FOREIGN KEY (corpus_id) REFERENCES corpora(corpus_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                corpus_id UNINDEXED,
                content
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS graph_edges (
            corpus_id TEXT NOT NULL,
            from_chunk_id TEXT NOT NULL,
            to_chunk_id TEXT NOT NULL,
            weight REAL NOT NULL,
            relation TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_corpus_id ON chunks(corpus_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_corpus_file ON chunks(corpus_id, file_path)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_graph_edges_corpus_from ON graph_edges(corpus_id, from_chunk_id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations_on(&pool).await.unwrap();
        run_migrations_on(&pool).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM corpora")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
