//! Offset-preserving tokenization used both for chunk budgets and for
//! embedding-input truncation.
//!
//! The critical invariant here is normalization-length-preservation:
//! Unicode NFKC and lowercasing can change a string's byte length for
//! some inputs (ligatures like `"ﬁ"`, dotted-I like `"İ"`). Whenever we
//! need to hand back offsets that index into the *returned* text, we only
//! apply a normalization step if it leaves the length unchanged; full
//! normalization is reserved for paths that don't report offsets.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::error::{CoreError, CoreResult};
use crate::models::TokenizationResult;

/// Tokenization strategy, selected per `tokenization` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerStrategy {
    Whitespace,
    Tiktoken,
    HuggingFace,
    EstimateOnly,
}

impl Default for TokenizerStrategy {
    fn default() -> Self {
        TokenizerStrategy::Whitespace
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncateMode {
    TruncateEnd,
    TruncateMiddle,
    Error,
}

/// A fast tokenizer that can report per-token byte offsets into the text
/// it was given (already normalized). Swappable so a real BPE/WordPiece
/// backend can replace the bundled approximation without touching call
/// sites in `Tokenizer`.
pub trait OffsetTokenizer: Send + Sync {
    /// Tokenize `text`, returning `(token_starts, token_ids)`. `token_ids`
    /// is `None` when the backend doesn't assign ids (e.g. whitespace).
    fn tokenize_with_offsets(&self, text: &str) -> (Vec<usize>, Option<Vec<u32>>);

    fn name(&self) -> &str;
}

/// Maximal non-whitespace runs; token start = first non-whitespace byte
/// of each run.
pub struct WhitespaceTokenizer;

impl OffsetTokenizer for WhitespaceTokenizer {
    fn tokenize_with_offsets(&self, text: &str) -> (Vec<usize>, Option<Vec<u32>>) {
        let mut starts = Vec::new();
        let mut in_token = false;
        for (i, ch) in text.char_indices() {
            if ch.is_whitespace() {
                in_token = false;
            } else if !in_token {
                starts.push(i);
                in_token = true;
            }
        }
        (starts, None)
    }

    fn name(&self) -> &str {
        "whitespace"
    }
}

/// Stand-in byte-pair-style tokenizer: splits on whitespace and
/// punctuation boundaries to approximate subword granularity without a
/// bundled vocabulary table. Used for both the `tiktoken` and
/// `huggingface` strategies until a real BPE/WordPiece backend is wired
/// in (see DESIGN.md).
pub struct ApproximateBpeTokenizer {
    pub encoding_name: String,
}

impl ApproximateBpeTokenizer {
    /// `o200k_base`-equivalent default used when an unknown encoding name
    /// is requested, matching the fallback-without-error behavior.
    pub fn new(encoding_name: impl Into<String>) -> Self {
        Self {
            encoding_name: encoding_name.into(),
        }
    }
}

impl OffsetTokenizer for ApproximateBpeTokenizer {
    fn tokenize_with_offsets(&self, text: &str) -> (Vec<usize>, Option<Vec<u32>>) {
        let mut starts = Vec::new();
        let mut ids = Vec::new();
        let mut chars = text.char_indices().peekable();
        let mut token_start: Option<usize> = None;
        let mut token_hash: u32 = 0;

        let flush = |starts: &mut Vec<usize>, ids: &mut Vec<u32>, start: usize, hash: u32| {
            starts.push(start);
            ids.push(hash);
        };

        while let Some((i, ch)) = chars.next() {
            if ch.is_whitespace() {
                if let Some(start) = token_start.take() {
                    flush(&mut starts, &mut ids, start, token_hash);
                    token_hash = 0;
                }
                continue;
            }
            let is_word_char = ch.is_alphanumeric() || ch == '_';
            if token_start.is_none() {
                token_start = Some(i);
                token_hash = ch as u32;
            } else if !is_word_char {
                // punctuation always starts its own token
                if let Some(start) = token_start.take() {
                    flush(&mut starts, &mut ids, start, token_hash);
                }
                token_start = Some(i);
                token_hash = ch as u32;
                if let Some(start) = token_start.take() {
                    flush(&mut starts, &mut ids, start, token_hash);
                }
                token_hash = 0;
                continue;
            } else {
                token_hash = token_hash.wrapping_mul(31).wrapping_add(ch as u32);
            }
            if let Some((_, next_ch)) = chars.peek() {
                if !next_ch.is_alphanumeric() && *next_ch != '_' && is_word_char {
                    if let Some(start) = token_start.take() {
                        flush(&mut starts, &mut ids, start, token_hash);
                        token_hash = 0;
                    }
                }
            }
        }
        if let Some(start) = token_start.take() {
            flush(&mut starts, &mut ids, start, token_hash);
        }
        (starts, Some(ids))
    }

    fn name(&self) -> &str {
        &self.encoding_name
    }
}

/// Synthesizes pseudo-tokens at a fixed stride (no real tokenization).
fn estimate_tokenize(text: &str) -> Vec<usize> {
    let len = text.len();
    if len == 0 {
        return Vec::new();
    }
    (0..len).step_by(4).collect()
}

pub fn estimate_token_count(text: &str) -> usize {
    (text.len() + 3) / 4
}

/// NFKC-normalizes and lowercases `text` only if doing so preserves its
/// byte length; otherwise returns `text` unchanged for that step. This is
/// the invariant behind every offset-reporting call.
fn normalize_length_preserving(text: &str) -> String {
    let nfkc: String = text.nfkc().collect();
    let after_nfkc = if nfkc.len() == text.len() { nfkc } else { text.to_string() };
    let lowered = after_nfkc.to_lowercase();
    if lowered.len() == after_nfkc.len() {
        lowered
    } else {
        after_nfkc
    }
}

/// The tokenizer: strategy dispatch plus the four operations named by
/// the contract.
pub struct Tokenizer {
    pub strategy: TokenizerStrategy,
    offset_tokenizer: Arc<dyn OffsetTokenizer>,
}

impl Tokenizer {
    pub fn new(strategy: TokenizerStrategy, encoding_name: impl Into<String>) -> Self {
        let offset_tokenizer: Arc<dyn OffsetTokenizer> = match strategy {
            TokenizerStrategy::Whitespace => Arc::new(WhitespaceTokenizer),
            TokenizerStrategy::Tiktoken | TokenizerStrategy::HuggingFace => {
                Arc::new(ApproximateBpeTokenizer::new(encoding_name))
            }
            TokenizerStrategy::EstimateOnly => Arc::new(WhitespaceTokenizer),
        };
        Self {
            strategy,
            offset_tokenizer,
        }
    }

    pub fn whitespace() -> Self {
        Self::new(TokenizerStrategy::Whitespace, "whitespace")
    }

    /// Full normalization (NFKC + lowercase), applied unconditionally.
    /// Length may change; only safe to use where offsets aren't reported
    /// back (e.g. truncation for embedding input).
    pub fn normalize(&self, text: &str) -> String {
        text.nfkc().collect::<String>().to_lowercase()
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        match self.strategy {
            TokenizerStrategy::EstimateOnly => estimate_token_count(text),
            _ => match self.tokenize_with_offsets(text) {
                Ok(result) => result.token_count(),
                Err(_) => estimate_token_count(text),
            },
        }
    }

    /// Applies length-preserving normalization, then tokenizes, reporting
    /// offsets into the (possibly partially) normalized text.
    pub fn tokenize_with_offsets(&self, text: &str) -> CoreResult<TokenizationResult> {
        let normalized = normalize_length_preserving(text);

        let (token_starts, token_ids) = if self.strategy == TokenizerStrategy::EstimateOnly {
            (estimate_tokenize(&normalized), None)
        } else {
            self.offset_tokenizer.tokenize_with_offsets(&normalized)
        };

        let result = TokenizationResult {
            normalized_text: normalized,
            token_starts,
            token_ids,
        };
        result.validate()?;
        Ok(result)
    }

    /// Truncates `text` to at most `max_tokens` tokens using full
    /// normalization (offsets are not needed here).
    pub fn truncate_by_tokens(
        &self,
        text: &str,
        max_tokens: usize,
        mode: TruncateMode,
    ) -> CoreResult<String> {
        if self.strategy == TokenizerStrategy::EstimateOnly {
            let max_chars = max_tokens.saturating_mul(4);
            if text.len() <= max_chars {
                return Ok(text.to_string());
            }
            return match mode {
                TruncateMode::TruncateEnd => Ok(Self::char_safe_slice(text, 0, max_chars)),
                TruncateMode::TruncateMiddle => {
                    let head = max_chars / 2;
                    let tail = max_chars - head;
                    let head_s = Self::char_safe_slice(text, 0, head);
                    let tail_s = Self::char_safe_slice(text, text.len().saturating_sub(tail), text.len());
                    Ok(format!("{head_s}\u{2026}{tail_s}"))
                }
                TruncateMode::Error => Err(CoreError::fatal(format!(
                    "text exceeds {max_tokens} tokens (estimate_only)"
                ))),
            };
        }

        let normalized = self.normalize(text);
        let full = self.offset_tokenizer.tokenize_with_offsets(&normalized);
        let starts = full.0;
        let n = starts.len();
        if n <= max_tokens {
            return Ok(normalized);
        }

        match mode {
            TruncateMode::TruncateEnd => {
                let end = if max_tokens < n {
                    *starts.get(max_tokens).unwrap_or(&normalized.len())
                } else {
                    normalized.len()
                };
                Ok(Self::char_safe_slice(&normalized, 0, end))
            }
            TruncateMode::TruncateMiddle => {
                let head_n = max_tokens / 2;
                let tail_n = max_tokens - head_n;
                let head_end = starts.get(head_n).copied().unwrap_or(normalized.len());
                let tail_start_idx = n.saturating_sub(tail_n);
                let tail_start = starts.get(tail_start_idx).copied().unwrap_or(normalized.len());
                let head_s = Self::char_safe_slice(&normalized, 0, head_end);
                let tail_s = Self::char_safe_slice(&normalized, tail_start, normalized.len());
                Ok(format!("{head_s}\u{2026}{tail_s}"))
            }
            TruncateMode::Error => Err(CoreError::fatal(format!(
                "text has {n} tokens, exceeding the limit of {max_tokens}"
            ))),
        }
    }

    fn char_safe_slice(s: &str, mut start: usize, mut end: usize) -> String {
        end = end.min(s.len());
        start = start.min(end);
        while start > 0 && !s.is_char_boundary(start) {
            start -= 1;
        }
        while end < s.len() && !s.is_char_boundary(end) {
            end += 1;
        }
        s[start..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_valid_indices() {
        let t = Tokenizer::whitespace();
        let result = t.tokenize_with_offsets("the quick brown fox").unwrap();
        assert!(result.validate().is_ok());
        assert_eq!(result.token_count(), 4);
    }

    #[test]
    fn length_preserving_normalization_ligature() {
        let t = Tokenizer::whitespace();
        let result = t.tokenize_with_offsets("\u{FB01}").unwrap();
        // "ﬁ" ligature NFKC-decomposes to 2 chars ("fi"), which changes
        // length, so normalization is skipped for this input and the
        // returned text keeps its original single-codepoint length.
        assert_eq!(result.normalized_text.chars().count(), 1);
    }

    #[test]
    fn length_preserving_normalization_dotted_i() {
        let t = Tokenizer::whitespace();
        let result = t.tokenize_with_offsets("\u{0130}").unwrap();
        assert_eq!(result.normalized_text.chars().count(), 1);
    }

    #[test]
    fn estimate_only_counts_by_stride() {
        let t = Tokenizer::new(TokenizerStrategy::EstimateOnly, "estimate");
        assert_eq!(t.count_tokens("abcdefgh"), 2);
        assert_eq!(estimate_token_count(""), 0);
    }

    #[test]
    fn truncate_end_keeps_first_n_tokens() {
        let t = Tokenizer::whitespace();
        let text = (0..10).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let truncated = t.truncate_by_tokens(&text, 3, TruncateMode::TruncateEnd).unwrap();
        assert_eq!(truncated.split_whitespace().count(), 3);
    }

    #[test]
    fn truncate_middle_joins_with_ellipsis() {
        let t = Tokenizer::whitespace();
        let text = (0..10).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let truncated = t.truncate_by_tokens(&text, 4, TruncateMode::TruncateMiddle).unwrap();
        assert!(truncated.contains('\u{2026}'));
    }

    #[test]
    fn truncate_error_mode_fails_over_budget() {
        let t = Tokenizer::whitespace();
        let text = "one two three four five";
        assert!(t.truncate_by_tokens(text, 2, TruncateMode::Error).is_err());
        assert!(t.truncate_by_tokens(text, 20, TruncateMode::Error).is_ok());
    }

    #[test]
    fn truncate_idempotent() {
        let t = Tokenizer::whitespace();
        let text = (0..20).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let once = t.truncate_by_tokens(&text, 5, TruncateMode::TruncateEnd).unwrap();
        let twice = t.truncate_by_tokens(&once, 5, TruncateMode::TruncateEnd).unwrap();
        assert_eq!(once, twice);
    }
}
