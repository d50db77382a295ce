//! Late chunking: one whole-document embedding pass, then mean-pool +
//! L2-normalize per chunk span, instead of embedding each chunk in
//! isolation. This lets every chunk's vector carry context from the rest
//! of the document.
//!
//! The windowing step reuses `fixed_tokens`' sliding-window math exactly
//! (`target_tokens`/`overlap_tokens`), since late chunking and
//! `fixed_tokens` chunking answer the same question — "how do we slide
//! a token window over this document" — for two different purposes.

use crate::error::{CoreError, CoreResult};
use crate::models::Chunk;
use crate::tokenizer::Tokenizer;

/// Seam for the embedding backend that produces one vector per input
/// token (or sub-token) position, fed whole-document text. Concrete
/// backends (fastembed, tract-onnx) live in the `tribrid` app crate so
/// this crate never depends on an ML runtime.
pub trait ContextualEmbedder: Send + Sync {
    /// Embeds `text` and returns one vector per token reported by
    /// `tokenize_with_offsets`, in the same order. Implementations must
    /// return exactly `expected_token_count` vectors, each of
    /// `self.dims()` length.
    fn embed_tokens(&self, text: &str, expected_token_count: usize) -> CoreResult<Vec<Vec<f32>>>;

    fn dims(&self) -> usize;
}

fn mean_pool_normalize(token_vectors: &[Vec<f32>], dims: usize) -> CoreResult<Vec<f32>> {
    if token_vectors.is_empty() {
        return Err(CoreError::config("late chunking: span has no tokens to pool"));
    }
    let mut pooled = vec![0.0f32; dims];
    for v in token_vectors {
        if v.len() != dims {
            return Err(CoreError::config(format!(
                "late chunking: embedder returned a {}-dim vector but configured dims is {dims}",
                v.len()
            )));
        }
        for (acc, x) in pooled.iter_mut().zip(v.iter()) {
            *acc += x;
        }
    }
    let n = token_vectors.len() as f32;
    for acc in pooled.iter_mut() {
        *acc /= n;
    }
    let norm = pooled.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for acc in pooled.iter_mut() {
            *acc /= norm;
        }
    }
    Ok(pooled)
}

/// Runs one whole-document embedding pass through `embedder`, then
/// assigns each chunk in `chunks` a mean-pooled, L2-normalized vector
/// over the token range its span covers. `chunks` must already carry
/// `char_start`/`char_end` metadata (as produced by [`crate::chunk::chunk_text`]).
///
/// A dimension mismatch between `embedder.dims()` and what it actually
/// returns is a hard configuration error — never silently reshaped.
pub fn late_chunk_embed(document_text: &str, chunks: &mut [Chunk], tokenizer: &Tokenizer, embedder: &dyn ContextualEmbedder) -> CoreResult<()> {
    let tokenized = tokenizer.tokenize_with_offsets(document_text)?;
    let starts = &tokenized.token_starts;
    let n = starts.len();
    if n == 0 {
        return Ok(());
    }

    let token_vectors = embedder.embed_tokens(&tokenized.normalized_text, n)?;
    if token_vectors.len() != n {
        return Err(CoreError::config(format!(
            "late chunking: embedder returned {} token vectors for {n} tokens",
            token_vectors.len()
        )));
    }
    let dims = embedder.dims();

    for chunk in chunks.iter_mut() {
        let (Some(char_start), Some(char_end)) = (chunk.char_start(), chunk.char_end()) else {
            continue;
        };
        let tok_start = starts.partition_point(|&s| s < char_start);
        let tok_end = starts.partition_point(|&s| s < char_end).max(tok_start);
        if tok_start >= tok_end {
            continue;
        }
        let span_vectors = &token_vectors[tok_start..tok_end];
        chunk.embedding = Some(mean_pool_normalize(span_vectors, dims)?);
    }
    Ok(())
}

/// Sliding windows identical in step size to `fixed_tokens`, used when
/// late chunking is driven by window spans rather than pre-built chunk
/// boundaries (e.g. indexing a document with no chunker run yet).
pub fn late_chunk_windows(token_count: usize, target_tokens: usize, overlap_tokens: usize) -> Vec<(usize, usize)> {
    if token_count == 0 {
        return Vec::new();
    }
    let target = target_tokens.max(1);
    let overlap = overlap_tokens.min(target.saturating_sub(1));
    let mut windows = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + target).min(token_count);
        windows.push((start, end));
        if end >= token_count {
            break;
        }
        let mut next_start = end.saturating_sub(overlap);
        if next_start <= start {
            next_start = start + 1;
        }
        start = next_start;
    }
    windows
}

/// Test double: returns a deterministic vector per token derived from a
/// hash of its position, so pooling math can be exercised without a
/// real embedding model.
#[cfg(test)]
struct FakeEmbedder {
    dims: usize,
}

#[cfg(test)]
impl ContextualEmbedder for FakeEmbedder {
    fn embed_tokens(&self, text: &str, expected_token_count: usize) -> CoreResult<Vec<Vec<f32>>> {
        let _ = text;
        Ok((0..expected_token_count)
            .map(|i| {
                let mut v = vec![0.0f32; self.dims];
                v[i % self.dims] = 1.0;
                v
            })
            .collect())
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;

    #[test]
    fn windows_match_fixed_tokens_step_size() {
        let windows = late_chunk_windows(100, 10, 2);
        assert_eq!(windows[0], (0, 10));
        assert_eq!(windows[1].0, 8);
    }

    #[test]
    fn pooled_vectors_are_unit_length() {
        let tokenizer = Tokenizer::whitespace();
        let text = (0..40).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let mut config = crate::chunk::ChunkingConfig::default();
        config.strategy = crate::chunk::ChunkingStrategy::FixedTokens;
        config.target_tokens = 10;
        config.overlap_tokens = 2;
        let mut chunks = chunk_text("doc.txt", &text, 0, 1, 0, &config, &tokenizer).unwrap();

        let embedder = FakeEmbedder { dims: 4 };
        late_chunk_embed(&text, &mut chunks, &tokenizer, &embedder).unwrap();

        for chunk in &chunks {
            let emb = chunk.embedding.as_ref().unwrap();
            let norm: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
        }
    }

    #[test]
    fn dimension_mismatch_is_a_hard_error() {
        struct BadEmbedder;
        impl ContextualEmbedder for BadEmbedder {
            fn embed_tokens(&self, _text: &str, expected_token_count: usize) -> CoreResult<Vec<Vec<f32>>> {
                Ok((0..expected_token_count).map(|_| vec![0.0f32; 3]).collect())
            }
            fn dims(&self) -> usize {
                8
            }
        }
        let tokenizer = Tokenizer::whitespace();
        let text = "one two three four".to_string();
        let config = crate::chunk::ChunkingConfig::default();
        let mut chunks = chunk_text("doc.txt", &text, 0, 1, 0, &config, &tokenizer).unwrap();
        let err = late_chunk_embed(&text, &mut chunks, &tokenizer, &BadEmbedder).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
