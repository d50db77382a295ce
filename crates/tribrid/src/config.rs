//! TOML configuration loading for the `tribrid` binary.
//!
//! `tribrid-core::config::ConfigSnapshot` holds the portable, validated
//! config sections (chunking/embedding/retrieval/reranking/chat/indexing).
//! This module adds the app-only sections a TOML file on disk actually
//! needs — database path, server bind address, chat provider routing,
//! and the filesystem corpora to index — and wires loading + validation
//! together.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use tribrid_core::config::ConfigSnapshot;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub db: DbConfig,
    #[serde(flatten)]
    pub snapshot: ConfigSnapshot,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chat_providers: ChatProvidersConfig,
    #[serde(default)]
    pub corpora: Vec<FilesystemCorpusConfig>,
    #[serde(default)]
    pub trace: TraceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8420".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TraceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_trace_dir")]
    pub dir: PathBuf,
}

fn default_trace_dir() -> PathBuf {
    PathBuf::from(".tribrid/traces")
}

/// A named filesystem corpus to index: `[[corpora]]` tables in TOML.
#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemCorpusConfig {
    pub corpus_id: String,
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string(), "**/*.rs".to_string()]
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ChatProvidersConfig {
    #[serde(default)]
    pub openrouter: OpenRouterConfig,
    #[serde(default)]
    pub local_models: LocalModelsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenRouterConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_openrouter_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub default_model: String,
    #[serde(default)]
    pub site_name: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_openrouter_base_url(),
            default_model: String::new(),
            site_name: String::new(),
        }
    }
}

fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LocalModelsConfig {
    #[serde(default)]
    pub default_chat_model: String,
    #[serde(default)]
    pub providers: Vec<LocalModelProviderConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalModelProviderConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i64,
}

/// Loads and validates an `AppConfig` from a TOML file on disk.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| "failed to parse config file")?;
    config
        .snapshot
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid config: {e}"))?;
    for corpus in &config.corpora {
        if corpus.corpus_id.trim().is_empty() {
            anyhow::bail!("corpora entries must set a non-empty corpus_id");
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_loads_and_validates() {
        let toml_str = r#"
            [db]
            path = "tribrid.db"

            [chunking]
            strategy = "fixed_chars"
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.snapshot.validate().is_ok());
        assert_eq!(config.server.bind, default_bind());
    }

    #[test]
    fn filesystem_corpus_requires_corpus_id() {
        let toml_str = r#"
            [db]
            path = "tribrid.db"

            [chunking]
            strategy = "fixed_chars"

            [[corpora]]
            corpus_id = ""
            root = "./docs"
        "#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, toml_str).unwrap();
        assert!(load_config(&path).is_err());
    }
}
