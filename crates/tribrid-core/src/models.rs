//! Core data models shared by chunking, storage, retrieval, and fusion.
//!
//! These mirror the shapes described for `Chunk`, `ChunkMatch`, and
//! `Corpus`: owned value types with short-lived borrows into source text
//! only during construction (chunking never keeps a document borrowed).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// A JSON-compatible value used for chunk/trace metadata maps.
pub type MetadataValue = serde_json::Value;
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A contiguous span of one document, with stable line/char anchors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id: `{file_path}:{start_line}-{end_line}:{char_start}`.
    pub chunk_id: String,
    pub content: String,
    pub file_path: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// Inclusive.
    pub end_line: usize,
    pub language: Option<String>,
    pub token_count: usize,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Metadata,
}

impl Chunk {
    /// `char_start`/`char_end` as recorded in `metadata`, if present.
    pub fn char_start(&self) -> Option<usize> {
        self.metadata.get("char_start").and_then(|v| v.as_u64()).map(|v| v as usize)
    }

    pub fn char_end(&self) -> Option<usize> {
        self.metadata.get("char_end").and_then(|v| v.as_u64()).map(|v| v as usize)
    }

    pub fn chunk_ordinal(&self) -> Option<i64> {
        self.metadata.get("chunk_ordinal").and_then(|v| v.as_i64())
    }

    pub fn parent_doc_id(&self) -> Option<&str> {
        self.metadata.get("parent_doc_id").and_then(|v| v.as_str())
    }

    /// Validates the invariants every constructed chunk must satisfy.
    pub fn validate(&self) -> CoreResult<()> {
        if self.start_line < 1 || self.end_line < self.start_line {
            return Err(CoreError::fatal(format!(
                "chunk {} has invalid line span {}..{}",
                self.chunk_id, self.start_line, self.end_line
            )));
        }
        if let (Some(cs), Some(ce)) = (self.char_start(), self.char_end()) {
            if cs > ce {
                return Err(CoreError::fatal(format!(
                    "chunk {} has char_start {} > char_end {}",
                    self.chunk_id, cs, ce
                )));
            }
        }
        Ok(())
    }
}

/// The three retrieval legs a [`ChunkMatch`] can have come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Vector,
    Sparse,
    Graph,
}

impl MatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchSource::Vector => "vector",
            MatchSource::Sparse => "sparse",
            MatchSource::Graph => "graph",
        }
    }

    /// Parses a source string, rejecting the forbidden `"neighbor"` value
    /// (which may only ever appear in `metadata.neighbor_of`).
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s {
            "vector" => Ok(MatchSource::Vector),
            "sparse" => Ok(MatchSource::Sparse),
            "graph" => Ok(MatchSource::Graph),
            "neighbor" => Err(CoreError::config(
                "ChunkMatch.source cannot be \"neighbor\" — use metadata.neighbor_of instead",
            )),
            other => Err(CoreError::config(format!("unknown ChunkMatch.source: {other}"))),
        }
    }
}

/// A retrieved chunk annotated with ranking context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMatch {
    pub chunk_id: String,
    pub content: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: Option<String>,
    pub token_count: usize,
    pub score: f64,
    pub source: MatchSource,
    pub metadata: Metadata,
}

impl ChunkMatch {
    pub fn corpus_id(&self) -> Option<&str> {
        self.metadata.get("corpus_id").and_then(|v| v.as_str())
    }

    pub fn chunk_ordinal(&self) -> Option<i64> {
        self.metadata.get("chunk_ordinal").and_then(|v| v.as_i64())
    }

    pub fn parent_doc_id(&self) -> Option<&str> {
        self.metadata.get("parent_doc_id").and_then(|v| v.as_str())
    }

    pub fn neighbor_of(&self) -> Option<&str> {
        self.metadata.get("neighbor_of").and_then(|v| v.as_str())
    }

    pub fn from_chunk(chunk: &Chunk, score: f64, source: MatchSource, corpus_id: &str) -> Self {
        let mut metadata = chunk.metadata.clone();
        metadata.insert("corpus_id".to_string(), serde_json::json!(corpus_id));
        Self {
            chunk_id: chunk.chunk_id.clone(),
            content: chunk.content.clone(),
            file_path: chunk.file_path.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            language: chunk.language.clone(),
            token_count: chunk.token_count,
            score,
            source,
            metadata,
        }
    }
}

/// A named logical document collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Corpus {
    pub corpus_id: String,
    pub name: String,
    pub root_path: String,
    pub description: Option<String>,
}

/// Output of offset-preserving tokenization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizationResult {
    pub normalized_text: String,
    pub token_starts: Vec<usize>,
    pub token_ids: Option<Vec<u32>>,
}

impl TokenizationResult {
    pub fn token_count(&self) -> usize {
        self.token_starts.len()
    }

    /// Validates the core offset invariant: every start indexes into
    /// `normalized_text` and the sequence is non-decreasing.
    pub fn validate(&self) -> CoreResult<()> {
        let len = self.normalized_text.len();
        let mut prev = 0usize;
        for (i, &start) in self.token_starts.iter().enumerate() {
            if start > len {
                return Err(CoreError::fatal(format!(
                    "token_starts[{i}] = {start} exceeds text length {len}"
                )));
            }
            if i > 0 && start < prev {
                return Err(CoreError::fatal(format!(
                    "token_starts not non-decreasing at index {i}: {start} < {prev}"
                )));
            }
            prev = start;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_source_rejects_neighbor() {
        assert!(MatchSource::parse("neighbor").is_err());
        assert!(MatchSource::parse("vector").is_ok());
    }

    #[test]
    fn tokenization_result_validates_offsets() {
        let ok = TokenizationResult {
            normalized_text: "hello world".to_string(),
            token_starts: vec![0, 6],
            token_ids: None,
        };
        assert!(ok.validate().is_ok());

        let bad = TokenizationResult {
            normalized_text: "hi".to_string(),
            token_starts: vec![0, 99],
            token_ids: None,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn chunk_validate_rejects_inverted_span() {
        let mut metadata = Metadata::new();
        metadata.insert("char_start".into(), serde_json::json!(10));
        metadata.insert("char_end".into(), serde_json::json!(5));
        let chunk = Chunk {
            chunk_id: "f:1-1:0".into(),
            content: String::new(),
            file_path: "f".into(),
            start_line: 1,
            end_line: 1,
            language: None,
            token_count: 0,
            embedding: None,
            metadata,
        };
        assert!(chunk.validate().is_err());
    }
}
