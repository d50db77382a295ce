//! Validated, typed configuration snapshot.
//!
//! Mirrors the shape of the legacy flat `ctx.toml` (`tokenization`,
//! `chunking`, `embedding`, `retrieval`, `fusion`, `reranking`, `chat`,
//! `indexing` sections), generalized to the tri-brid engine. This module
//! only defines the data model and validation; reading a TOML file from
//! disk (`toml`/`serde` + `anyhow::Context`, as the legacy `src/config.rs`
//! does) is the app crate's job, since that needs filesystem I/O.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::chunk::ChunkingConfig;
use crate::error::{CoreError, CoreResult};
use crate::fusion::FusionConfig;
use crate::tokenizer::{TokenizerStrategy, TruncateMode};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizationConfig {
    pub strategy: TokenizerStrategy,
    #[serde(default = "default_encoding_name")]
    pub encoding_name: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default)]
    pub truncate_mode: TruncateMode,
}

fn default_encoding_name() -> String {
    "o200k_base".to_string()
}
fn default_max_tokens() -> usize {
    8192
}

impl Default for TruncateMode {
    fn default() -> Self {
        TruncateMode::TruncateEnd
    }
}

impl Default for TokenizationConfig {
    fn default() -> Self {
        Self {
            strategy: TokenizerStrategy::Whitespace,
            encoding_name: default_encoding_name(),
            max_tokens: default_max_tokens(),
            truncate_mode: TruncateMode::TruncateEnd,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub late_chunking_enabled: bool,
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            late_chunking_enabled: false,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_true")]
    pub enable_vector: bool,
    #[serde(default = "default_true")]
    pub enable_sparse: bool,
    #[serde(default)]
    pub enable_graph: bool,
    #[serde(default = "default_top_k_leg")]
    pub top_k_vector: usize,
    #[serde(default = "default_top_k_leg")]
    pub top_k_sparse: usize,
    #[serde(default = "default_top_k_leg")]
    pub top_k_graph: usize,
    #[serde(default = "default_graph_max_depth")]
    pub graph_max_depth: usize,
}

fn default_true() -> bool {
    true
}
fn default_top_k_leg() -> usize {
    40
}
fn default_graph_max_depth() -> usize {
    2
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enable_vector: true,
            enable_sparse: true,
            enable_graph: false,
            top_k_vector: default_top_k_leg(),
            top_k_sparse: default_top_k_leg(),
            top_k_graph: default_top_k_leg(),
            graph_max_depth: default_graph_max_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RerankingConfig {
    #[serde(default)]
    pub enabled: bool,
    pub model: Option<String>,
    #[serde(default = "default_rerank_top_n")]
    pub top_n: usize,
}

fn default_rerank_top_n() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt_base: String,
    pub recall_suffix: Option<String>,
    pub rag_suffix: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_temperature_no_retrieval")]
    pub temperature_no_retrieval: f64,
    pub model_override: Option<String>,
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}
fn default_temperature() -> f64 {
    0.2
}
fn default_temperature_no_retrieval() -> f64 {
    0.7
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt_base: default_system_prompt(),
            recall_suffix: None,
            rag_suffix: None,
            temperature: default_temperature(),
            temperature_no_retrieval: default_temperature_no_retrieval(),
            model_override: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_ignore_globs")]
    pub ignore_globs: Vec<String>,
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}
fn default_ignore_globs() -> Vec<String> {
    vec!["**/.git/**".to_string(), "**/node_modules/**".to_string()]
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size(),
            ignore_globs: default_ignore_globs(),
        }
    }
}

/// The full, validated configuration for one corpus (or the default
/// corpus-less configuration).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub tokenization: TokenizationConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub reranking: RerankingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
}

impl ConfigSnapshot {
    pub fn validate(&self) -> CoreResult<()> {
        self.chunking.validate()?;
        if self.embedding.is_enabled() {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                return Err(CoreError::config(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                )));
            }
            if self.embedding.model.is_none() {
                return Err(CoreError::config(format!(
                    "embedding.model must be set when provider is '{}'",
                    self.embedding.provider
                )));
            }
        }
        if !(0.0..=2.0).contains(&self.chat.temperature) {
            return Err(CoreError::config("chat.temperature must be in [0.0, 2.0]"));
        }
        if !(0.0..=2.0).contains(&self.chat.temperature_no_retrieval) {
            return Err(CoreError::config("chat.temperature_no_retrieval must be in [0.0, 2.0]"));
        }
        Ok(())
    }
}

/// Per-corpus configuration registry: each corpus may override the
/// default snapshot; `get_config` on an unknown corpus id returns
/// `None` without creating an entry.
#[derive(Debug, Default)]
pub struct ConfigRegistry {
    default_config: ConfigSnapshot,
    overrides: HashMap<String, ConfigSnapshot>,
}

impl ConfigRegistry {
    pub fn new(default_config: ConfigSnapshot) -> Self {
        Self {
            default_config,
            overrides: HashMap::new(),
        }
    }

    /// Returns the corpus-specific snapshot if one was ever set,
    /// otherwise falls back to the default snapshot — but an explicit
    /// lookup for an id with no override and no prior `set_config` call
    /// still resolves to the default, never `None`, since every corpus
    /// is configured at least by default. `None` is reserved for ids
    /// that should be treated as wholly unknown by the caller (see
    /// `get_config_override` for the strict form).
    pub fn get_config(&self, corpus_id: &str) -> ConfigSnapshot {
        self.overrides.get(corpus_id).cloned().unwrap_or_else(|| self.default_config.clone())
    }

    /// Strict lookup: `None` if no override was ever set for this
    /// corpus id, without mutating the registry.
    pub fn get_config_override(&self, corpus_id: &str) -> Option<&ConfigSnapshot> {
        self.overrides.get(corpus_id)
    }

    pub fn set_config(&mut self, corpus_id: &str, config: ConfigSnapshot) -> CoreResult<()> {
        config.validate()?;
        self.overrides.insert(corpus_id.to_string(), config);
        Ok(())
    }

    pub fn delete_config(&mut self, corpus_id: &str) {
        self.overrides.remove(corpus_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_validates() {
        assert!(ConfigSnapshot::default().validate().is_ok());
    }

    #[test]
    fn embedding_enabled_requires_dims_and_model() {
        let mut config = ConfigSnapshot::default();
        config.embedding.provider = "openai".to_string();
        assert!(config.validate().is_err());
        config.embedding.dims = Some(1536);
        config.embedding.model = Some("text-embedding-3-small".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn get_config_override_is_none_without_mutation() {
        let registry = ConfigRegistry::new(ConfigSnapshot::default());
        assert!(registry.get_config_override("unknown").is_none());
        assert!(registry.get_config_override("unknown").is_none());
    }

    #[test]
    fn set_config_rejects_invalid_overlay() {
        let mut registry = ConfigRegistry::new(ConfigSnapshot::default());
        let mut bad = ConfigSnapshot::default();
        bad.chunking.chunk_size = 10;
        assert!(registry.set_config("c1", bad).is_err());
        assert!(registry.get_config_override("c1").is_none());
    }
}
