//! Filesystem corpus indexing.
//!
//! Walks each configured `[[corpora]]` root, chunks every matching plain
//! text file with [`tribrid_core::chunk::chunk_text`], optionally embeds
//! the chunks, and replaces them in the [`Store`] via
//! [`Store::replace_chunks`]. Glob matching and directory walking follow
//! the legacy filesystem connector; unlike it, this indexer only reads
//! UTF-8 text — PDFs, Office documents, and other binary formats are
//! out of scope (a real deployment fronts those with a dedicated
//! extraction service upstream of this crate).

use std::path::Path;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{info, warn};
use walkdir::WalkDir;

use tribrid_core::chunk::chunk_text;
use tribrid_core::config::ConfigSnapshot;
use tribrid_core::models::Corpus;
use tribrid_core::store::Store;
use tribrid_core::tokenizer::Tokenizer;

use crate::config::FilesystemCorpusConfig;
use crate::embedding;

/// Indexes a single configured corpus: registers it, walks its root, and
/// replaces each file's chunks. Returns the number of files indexed.
pub async fn index_corpus(
    store: &dyn Store,
    snapshot: &ConfigSnapshot,
    corpus_config: &FilesystemCorpusConfig,
) -> Result<usize> {
    let root = &corpus_config.root;
    if !root.exists() {
        bail!("corpus root does not exist: {}", root.display());
    }

    store
        .upsert_corpus(&Corpus {
            corpus_id: corpus_config.corpus_id.clone(),
            name: corpus_config.corpus_id.clone(),
            root_path: root.display().to_string(),
            description: None,
        })
        .await
        .context("registering corpus")?;

    let include_set = build_globset(&corpus_config.include_globs)?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(corpus_config.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let tokenizer = Tokenizer::new(snapshot.tokenization.strategy, snapshot.tokenization.encoding_name.clone());

    let mut indexed = 0usize;
    for entry in WalkDir::new(root) {
        let entry = entry.context("walking corpus root")?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match index_file(store, &corpus_config.corpus_id, path, &rel_str, snapshot, &tokenizer).await {
            Ok(()) => indexed += 1,
            Err(e) => warn!("skipping {}: {e:#}", path.display()),
        }
    }

    info!(corpus_id = %corpus_config.corpus_id, indexed, "indexed corpus");
    Ok(indexed)
}

async fn index_file(
    store: &dyn Store,
    corpus_id: &str,
    path: &Path,
    rel_str: &str,
    snapshot: &ConfigSnapshot,
    tokenizer: &Tokenizer,
) -> Result<()> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return Ok(()), // not valid UTF-8 text; skip silently, not an error
    };
    if content.trim().is_empty() {
        return Ok(());
    }

    let mut chunks = chunk_text(rel_str, &content, 0, 1, 0, &snapshot.chunking, tokenizer)
        .with_context(|| format!("chunking {rel_str}"))?;

    if snapshot.embedding.is_enabled() && !chunks.is_empty() {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = embedding::embed_texts(&snapshot.embedding, &texts)
            .await
            .with_context(|| format!("embedding {rel_str}"))?;
        for (chunk, vector) in chunks.iter_mut().zip(vectors.into_iter()) {
            chunk.embedding = Some(vector);
        }
    }

    store
        .replace_chunks(corpus_id, rel_str, &chunks)
        .await
        .with_context(|| format!("storing chunks for {rel_str}"))?;
    Ok(())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tribrid_core::config::ConfigSnapshot;

    use crate::sqlite_store::SqliteStore;

    async fn memory_store() -> SqliteStore {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::run_migrations_on(&pool).await.unwrap();
        SqliteStore::new(pool).await
    }

    fn snapshot() -> ConfigSnapshot {
        let toml_str = r#"
            [chunking]
            strategy = "fixed_chars"
        "#;
        toml::from_str(toml_str).unwrap()
    }

    #[tokio::test]
    async fn indexes_matching_text_files_and_skips_excluded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# Title\n\nSome content here that is long enough.").unwrap();
        std::fs::write(dir.path().join("notes.bin"), [0u8, 159, 146, 150]).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git").join("HEAD"), "ref: refs/heads/main").unwrap();

        let store = memory_store().await;
        let config = FilesystemCorpusConfig {
            corpus_id: "docs".to_string(),
            root: dir.path().to_path_buf(),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec![],
        };

        let indexed = index_corpus(&store, &snapshot(), &config).await.unwrap();
        assert_eq!(indexed, 1);

        let corpus = store.get_corpus("docs").await.unwrap();
        assert!(corpus.is_some());
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let store = memory_store().await;
        let config = FilesystemCorpusConfig {
            corpus_id: "missing".to_string(),
            root: std::path::PathBuf::from("/does/not/exist/ever"),
            include_globs: vec!["**/*.md".to_string()],
            exclude_globs: vec![],
        };
        assert!(index_corpus(&store, &snapshot(), &config).await.is_err());
    }
}
