//! Strategy-driven segmentation of raw text into bounded [`Chunk`]s.
//!
//! Six strategies are implemented: `fixed_chars`, `fixed_tokens`,
//! `recursive`, `markdown`, `sentence`, `qa_blocks`. `ast`/`hybrid`/
//! `semantic`/`greedy` are aliases that fall back to `fixed_chars` — the
//! upstream system never shipped distinct behavior for them either, so
//! no behavior is invented here (see DESIGN.md).
//!
//! Every strategy produces `(start, end)` byte spans over the original
//! content; [`chunk_text`] turns those into [`Chunk`]s (computing line
//! spans, token counts, and metadata) and then runs a hard post-pass that
//! re-splits any chunk still over `max_chunk_tokens`.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::models::Chunk;
use crate::tokenizer::Tokenizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    FixedChars,
    FixedTokens,
    Recursive,
    Markdown,
    Sentence,
    QaBlocks,
}

impl ChunkingStrategy {
    /// Normalizes aliases: `greedy -> fixed_chars`; `ast/hybrid/semantic
    /// -> fixed_chars`. Anything else is parsed as a named strategy.
    pub fn normalize(raw: &str) -> Self {
        match raw {
            "fixed_tokens" => ChunkingStrategy::FixedTokens,
            "recursive" => ChunkingStrategy::Recursive,
            "markdown" => ChunkingStrategy::Markdown,
            "sentence" => ChunkingStrategy::Sentence,
            "qa_blocks" => ChunkingStrategy::QaBlocks,
            "greedy" | "ast" | "hybrid" | "semantic" | "fixed_chars" | _ => ChunkingStrategy::FixedChars,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeparatorKeep {
    Prefix,
    Suffix,
    None,
}

impl Default for SeparatorKeep {
    fn default() -> Self {
        SeparatorKeep::Suffix
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub strategy: ChunkingStrategy,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_chars: usize,
    pub target_tokens: usize,
    pub overlap_tokens: usize,
    /// Hard ceiling enforced by the post-pass re-split; also the upper
    /// bound `target_tokens` must respect (`max_tokens_per_chunk_hard`).
    pub max_chunk_tokens: usize,
    pub separators: Vec<String>,
    pub recursive_max_depth: usize,
    pub separator_keep: SeparatorKeep,
    pub markdown_max_heading_level: usize,
    pub emit_chunk_ordinal: bool,
    pub emit_parent_doc_id: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::FixedChars,
            chunk_size: 500,
            chunk_overlap: 100,
            min_chunk_chars: 50,
            target_tokens: 512,
            overlap_tokens: 64,
            max_chunk_tokens: 1024,
            separators: vec!["\n\n".into(), "\n".into(), ". ".into(), " ".into(), "".into()],
            recursive_max_depth: 5,
            separator_keep: SeparatorKeep::Suffix,
            markdown_max_heading_level: 3,
            emit_chunk_ordinal: true,
            emit_parent_doc_id: true,
        }
    }
}

impl ChunkingConfig {
    /// Validation constraints from the configuration model contract.
    pub fn validate(&self) -> CoreResult<()> {
        use crate::error::CoreError;
        if self.chunk_size < 200 {
            return Err(CoreError::config("chunking.chunk_size must be >= 200"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(CoreError::config("chunking.chunk_overlap must be < chunk_size"));
        }
        if !(10..=500).contains(&self.min_chunk_chars) {
            return Err(CoreError::config("chunking.min_chunk_chars must be in [10, 500]"));
        }
        if self.target_tokens > self.max_chunk_tokens {
            return Err(CoreError::config(
                "chunking.target_tokens must be <= max_chunk_tokens (max_tokens_per_chunk_hard)",
            ));
        }
        if self.overlap_tokens >= self.target_tokens {
            return Err(CoreError::config("chunking.overlap_tokens must be < target_tokens"));
        }
        if !(1..=6).contains(&self.markdown_max_heading_level) {
            return Err(CoreError::config("chunking.markdown_max_heading_level must be in [1, 6]"));
        }
        Ok(())
    }
}

fn detect_language(file_path: &str) -> Option<String> {
    let lower = file_path.to_lowercase();
    if lower.ends_with(".py") {
        Some("python".to_string())
    } else if lower.ends_with(".ts") || lower.ends_with(".tsx") {
        Some("typescript".to_string())
    } else if lower.ends_with(".js") || lower.ends_with(".jsx") {
        Some("javascript".to_string())
    } else {
        None
    }
}

fn newline_positions(content: &str) -> Vec<usize> {
    content
        .char_indices()
        .filter(|(_, c)| *c == '\n')
        .map(|(i, _)| i)
        .collect()
}

/// `start_line = base_line + rank_of(newlines < start)`; symmetric for
/// `end_line`, clamped so `end_line >= start_line`.
fn line_span(nl_positions: &[usize], start: usize, end: usize, base_line: usize) -> (usize, usize) {
    let start_line = base_line + nl_positions.partition_point(|&p| p < start);
    let end_line = base_line + nl_positions.partition_point(|&p| p < end.max(start));
    (start_line, end_line.max(start_line))
}

fn char_safe(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Sliding window of `chunk_size` chars with `chunk_overlap` overlap.
fn spans_fixed_chars(content: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<(usize, usize)> {
    let len = content.len();
    if len == 0 {
        return Vec::new();
    }
    let size = chunk_size.max(100);
    let mut overlap = chunk_overlap;
    if overlap >= size {
        overlap = size / 5;
    }
    let step = size - overlap;
    let mut spans = Vec::new();
    let mut start = 0usize;
    loop {
        let end = char_safe(content, (start + size).min(len));
        if end > start {
            spans.push((start, end));
        }
        if end >= len {
            break;
        }
        start = char_safe(content, start + step);
        if start >= len {
            break;
        }
    }
    spans
}

/// Token-index sliding window translated back to char spans via token
/// start offsets, guaranteeing at least one token of forward progress.
fn spans_fixed_tokens(
    content: &str,
    tokenizer: &Tokenizer,
    target_tokens: usize,
    overlap_tokens: usize,
) -> Vec<(usize, usize)> {
    let result = match tokenizer.tokenize_with_offsets(content) {
        Ok(r) => r,
        Err(_) => return Vec::new(),
    };
    let starts = &result.token_starts;
    let n = starts.len();
    if n == 0 {
        return Vec::new();
    }
    let target = target_tokens.max(1);
    let overlap = overlap_tokens.min(target.saturating_sub(1));

    let mut spans = Vec::new();
    let mut start_tok = 0usize;
    loop {
        let end_tok = (start_tok + target).min(n);
        let start_char = starts[start_tok];
        let end_char = if end_tok < n { starts[end_tok] } else { content.len() };
        if end_char > start_char {
            spans.push((start_char, end_char));
        }
        if end_tok >= n {
            break;
        }
        let mut next_start_tok = end_tok.saturating_sub(overlap);
        if next_start_tok <= start_tok {
            next_start_tok = start_tok + 1;
        }
        start_tok = next_start_tok;
    }
    spans
}

/// Greedily packs adjacent atomic spans while their combined token count
/// stays within `target_tokens`.
fn pack_atoms(content: &str, atoms: Vec<(usize, usize)>, tokenizer: &Tokenizer, target_tokens: usize) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut cur: Option<(usize, usize, usize)> = None; // (start, end, token_count)
    for (s, e) in atoms {
        if e <= s {
            continue;
        }
        let tok = tokenizer.count_tokens(&content[s..e]);
        match cur {
            None => cur = Some((s, e, tok)),
            Some((cs, ce, ct)) => {
                if ct + tok <= target_tokens {
                    cur = Some((cs, e, ct + tok));
                } else {
                    out.push((cs, ce));
                    cur = Some((s, e, tok));
                }
            }
        }
    }
    if let Some((s, e, _)) = cur {
        out.push((s, e));
    }
    out
}

/// Splits `[start, end)` on every occurrence of `sep`, honoring
/// `keep`. The `Prefix` branch builds a cut list defensively (`[start,
/// occurrence starts…, end]`, deduped) so leading/consecutive
/// separators never produce a zero-length span or fail to progress.
fn split_span_by_separator(
    content: &str,
    start: usize,
    end: usize,
    sep: &str,
    keep: SeparatorKeep,
    tokenizer: &Tokenizer,
    target_tokens: usize,
    overlap_tokens: usize,
) -> Vec<(usize, usize)> {
    if sep.is_empty() {
        return spans_fixed_tokens(&content[start..end], tokenizer, target_tokens, overlap_tokens)
            .into_iter()
            .map(|(s, e)| (start + s, start + e))
            .collect();
    }

    match keep {
        SeparatorKeep::Prefix => {
            let mut cuts = vec![start];
            let mut search_from = start;
            while search_from < end {
                match content[search_from..end].find(sep) {
                    Some(rel) => {
                        let abs = search_from + rel;
                        cuts.push(abs);
                        search_from = abs + sep.len();
                    }
                    None => break,
                }
            }
            cuts.push(end);
            cuts.dedup();
            cuts.windows(2).filter(|w| w[1] > w[0]).map(|w| (w[0], w[1])).collect()
        }
        SeparatorKeep::Suffix => {
            let mut spans = Vec::new();
            let mut i = start;
            loop {
                match content[i..end].find(sep) {
                    Some(rel) => {
                        let j = i + rel;
                        let span_end = (j + sep.len()).min(end);
                        if span_end > i {
                            spans.push((i, span_end));
                        }
                        i = span_end;
                        if i >= end {
                            break;
                        }
                    }
                    None => {
                        if end > i {
                            spans.push((i, end));
                        }
                        break;
                    }
                }
            }
            spans
        }
        SeparatorKeep::None => {
            let mut spans = Vec::new();
            let mut i = start;
            loop {
                match content[i..end].find(sep) {
                    Some(rel) => {
                        let j = i + rel;
                        if j > i {
                            spans.push((i, j));
                        }
                        i = j + sep.len();
                        if i >= end {
                            break;
                        }
                    }
                    None => {
                        if end > i {
                            spans.push((i, end));
                        }
                        break;
                    }
                }
            }
            spans
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn recursive_descend(
    content: &str,
    start: usize,
    end: usize,
    depth: usize,
    separators: &[String],
    max_depth: usize,
    target_tokens: usize,
    overlap_tokens: usize,
    tokenizer: &Tokenizer,
    keep: SeparatorKeep,
    out: &mut Vec<(usize, usize)>,
) {
    if end <= start {
        return;
    }
    let token_count = tokenizer.count_tokens(&content[start..end]);
    if depth >= max_depth || token_count <= target_tokens {
        out.push((start, end));
        return;
    }
    let sep = separators.get(depth).map(|s| s.as_str()).unwrap_or("");
    let pieces = split_span_by_separator(content, start, end, sep, keep, tokenizer, target_tokens, overlap_tokens);
    if pieces.len() <= 1 {
        if depth + 1 < max_depth {
            recursive_descend(content, start, end, depth + 1, separators, max_depth, target_tokens, overlap_tokens, tokenizer, keep, out);
        } else {
            out.push((start, end));
        }
        return;
    }
    for (s, e) in pieces {
        recursive_descend(content, s, e, depth + 1, separators, max_depth, target_tokens, overlap_tokens, tokenizer, keep, out);
    }
}

fn spans_recursive(content: &str, config: &ChunkingConfig, tokenizer: &Tokenizer) -> Vec<(usize, usize)> {
    let mut atoms = Vec::new();
    recursive_descend(
        content,
        0,
        content.len(),
        0,
        &config.separators,
        config.recursive_max_depth,
        config.target_tokens,
        config.overlap_tokens,
        tokenizer,
        config.separator_keep,
        &mut atoms,
    );
    pack_atoms(content, atoms, tokenizer, config.target_tokens)
}

fn heading_regex(max_level: usize) -> Regex {
    Regex::new(&format!(r"(?m)^#{{1,{max_level}}}\s+.+$")).expect("valid heading regex")
}

fn spans_markdown(content: &str, config: &ChunkingConfig, tokenizer: &Tokenizer) -> Vec<(usize, usize)> {
    let re = heading_regex(config.markdown_max_heading_level);
    let mut heading_starts: Vec<usize> = re.find_iter(content).map(|m| m.start()).collect();
    if heading_starts.is_empty() {
        return spans_recursive(content, config, tokenizer);
    }
    heading_starts.sort_unstable();
    heading_starts.dedup();

    let mut boundaries = Vec::new();
    if heading_starts[0] != 0 {
        boundaries.push(0);
    }
    boundaries.extend(heading_starts);
    boundaries.push(content.len());
    boundaries.dedup();

    let mut out = Vec::new();
    for w in boundaries.windows(2) {
        let (s, e) = (w[0], w[1]);
        if e <= s {
            continue;
        }
        let mut atoms = Vec::new();
        recursive_descend(
            content,
            s,
            e,
            0,
            &config.separators,
            config.recursive_max_depth,
            config.target_tokens,
            config.overlap_tokens,
            tokenizer,
            config.separator_keep,
            &mut atoms,
        );
        out.extend(pack_atoms(content, atoms, tokenizer, config.target_tokens));
    }
    out
}

/// `regex` has no look-around support, so sentence boundaries (which the
/// upstream system finds with `(?<=[.!?])\s+(?=[A-Z0-9"'(])`) are found
/// by hand: a terminator, a run of whitespace, then a capital/digit/quote.
fn sentence_boundaries(content: &str) -> Vec<usize> {
    let chars: Vec<(usize, char)> = content.char_indices().collect();
    let mut bounds = Vec::new();
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i].1;
        if c == '.' || c == '!' || c == '?' {
            let mut j = i + 1;
            let mut saw_space = false;
            while j < chars.len() && chars[j].1.is_whitespace() {
                j += 1;
                saw_space = true;
            }
            if saw_space && j < chars.len() {
                let nc = chars[j].1;
                if nc.is_ascii_uppercase() || nc.is_ascii_digit() || nc == '"' || nc == '\'' || nc == '(' {
                    bounds.push(chars[j].0);
                }
            }
        }
        i += 1;
    }
    bounds
}

fn spans_sentence(content: &str, config: &ChunkingConfig, tokenizer: &Tokenizer) -> Vec<(usize, usize)> {
    let mut cuts = vec![0usize];
    cuts.extend(sentence_boundaries(content));
    cuts.push(content.len());
    cuts.dedup();
    let atoms: Vec<(usize, usize)> = cuts.windows(2).filter(|w| w[1] > w[0]).map(|w| (w[0], w[1])).collect();
    pack_atoms(content, atoms, tokenizer, config.target_tokens)
}

fn qa_regex() -> Regex {
    Regex::new(r"(?m)^(?:Q:|A:)").expect("valid qa regex")
}

fn spans_qa_blocks(content: &str, config: &ChunkingConfig, tokenizer: &Tokenizer) -> Vec<(usize, usize)> {
    let re = qa_regex();
    let hits: Vec<usize> = re.find_iter(content).map(|m| m.start()).collect();
    if hits.is_empty() {
        return spans_sentence(content, config, tokenizer);
    }
    let mut cuts = Vec::new();
    if hits[0] != 0 {
        cuts.push(0);
    }
    cuts.extend(hits);
    cuts.push(content.len());
    cuts.dedup();
    let atoms: Vec<(usize, usize)> = cuts.windows(2).filter(|w| w[1] > w[0]).map(|w| (w[0], w[1])).collect();
    pack_atoms(content, atoms, tokenizer, config.target_tokens)
}

fn strategy_spans(content: &str, config: &ChunkingConfig, tokenizer: &Tokenizer) -> Vec<(usize, usize)> {
    match config.strategy {
        ChunkingStrategy::FixedChars => spans_fixed_chars(content, config.chunk_size, config.chunk_overlap),
        ChunkingStrategy::FixedTokens => spans_fixed_tokens(content, tokenizer, config.target_tokens, config.overlap_tokens),
        ChunkingStrategy::Recursive => spans_recursive(content, config, tokenizer),
        ChunkingStrategy::Markdown => spans_markdown(content, config, tokenizer),
        ChunkingStrategy::Sentence => spans_sentence(content, config, tokenizer),
        ChunkingStrategy::QaBlocks => spans_qa_blocks(content, config, tokenizer),
    }
}

fn build_chunk(
    file_path: &str,
    content: &str,
    start: usize,
    end: usize,
    base_char_offset: usize,
    base_line: usize,
    ordinal: i64,
    nl_positions: &[usize],
    config: &ChunkingConfig,
    tokenizer: &Tokenizer,
) -> Chunk {
    let (start_line, end_line) = line_span(nl_positions, start, end, base_line);
    let text = &content[start..end];
    let token_count = tokenizer.count_tokens(text);
    let abs_start = base_char_offset + start;
    let abs_end = base_char_offset + end;

    let mut metadata: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    metadata.insert("char_start".to_string(), serde_json::json!(abs_start));
    metadata.insert("char_end".to_string(), serde_json::json!(abs_end));
    if config.emit_chunk_ordinal {
        metadata.insert("chunk_ordinal".to_string(), serde_json::json!(ordinal));
    }
    if config.emit_parent_doc_id {
        metadata.insert("parent_doc_id".to_string(), serde_json::json!(file_path));
    }

    Chunk {
        chunk_id: format!("{file_path}:{start_line}-{end_line}:{abs_start}"),
        content: text.to_string(),
        file_path: file_path.to_string(),
        start_line,
        end_line,
        language: detect_language(file_path),
        token_count,
        embedding: None,
        metadata,
    }
}

/// Re-splits any chunk whose `token_count` exceeds `max_chunk_tokens`
/// into non-overlapping token windows, preserving ordinal continuity and
/// recomputing char/line spans from the sub-span.
fn hard_resplit(
    chunk: Chunk,
    ordinal_cursor: &mut i64,
    nl_positions: &[usize],
    config: &ChunkingConfig,
    tokenizer: &Tokenizer,
) -> Vec<Chunk> {
    if chunk.token_count <= config.max_chunk_tokens {
        return vec![chunk];
    }
    let char_start = chunk.char_start().unwrap_or(0);
    let base_line = chunk.start_line;
    let content = &chunk.content;
    let result = match tokenizer.tokenize_with_offsets(content) {
        Ok(r) => r,
        Err(_) => return vec![chunk],
    };
    let starts = &result.token_starts;
    let n = starts.len();
    if n == 0 {
        return vec![chunk];
    }
    let window = config.max_chunk_tokens.max(1);

    let mut out = Vec::new();
    let mut tok_idx = 0usize;
    let sub_nl = newline_positions(content);
    while tok_idx < n {
        let end_tok = (tok_idx + window).min(n);
        let start_char = starts[tok_idx];
        let end_char = if end_tok < n { starts[end_tok] } else { content.len() };
        if end_char > start_char {
            let sub_text = &content[start_char..end_char];
            if sub_text.trim().len() >= config.min_chunk_chars || n <= window {
                let (s_line, e_line) = line_span(&sub_nl, start_char, end_char, base_line);
                let abs_start = char_start + start_char;
                let abs_end = char_start + end_char;
                let mut metadata: BTreeMap<String, serde_json::Value> = BTreeMap::new();
                metadata.insert("char_start".to_string(), serde_json::json!(abs_start));
                metadata.insert("char_end".to_string(), serde_json::json!(abs_end));
                if config.emit_chunk_ordinal {
                    metadata.insert("chunk_ordinal".to_string(), serde_json::json!(*ordinal_cursor));
                }
                if config.emit_parent_doc_id {
                    metadata.insert("parent_doc_id".to_string(), serde_json::json!(chunk.file_path));
                }
                *ordinal_cursor += 1;
                out.push(Chunk {
                    chunk_id: format!("{}:{}-{}:{}", chunk.file_path, s_line, e_line, abs_start),
                    content: sub_text.to_string(),
                    file_path: chunk.file_path.clone(),
                    start_line: s_line,
                    end_line: e_line,
                    language: chunk.language.clone(),
                    token_count: tokenizer.count_tokens(sub_text),
                    embedding: None,
                    metadata,
                });
            }
        }
        tok_idx = end_tok;
    }
    if out.is_empty() {
        vec![chunk]
    } else {
        out
    }
}

/// Segments `content` into chunks that together cover it (with optional
/// overlap), each `<= max_chunk_tokens`, each `>= min_chunk_chars` except
/// the allowed non-empty singleton-document case.
pub fn chunk_text(
    file_path: &str,
    content: &str,
    base_char_offset: usize,
    base_line: usize,
    starting_ordinal: i64,
    config: &ChunkingConfig,
    tokenizer: &Tokenizer,
) -> CoreResult<Vec<Chunk>> {
    config.validate()?;
    if content.is_empty() {
        return Ok(Vec::new());
    }

    let nl_positions = newline_positions(content);
    let mut spans = strategy_spans(content, config, tokenizer);
    spans.retain(|(s, e)| e > s);

    let allow_small_singleton = spans.len() == 1 && !content.trim().is_empty();

    let mut chunks = Vec::new();
    let mut ordinal = starting_ordinal;
    for (start, end) in spans {
        let text = &content[start..end];
        if text.is_empty() {
            continue;
        }
        if text.trim().len() < config.min_chunk_chars && !allow_small_singleton {
            continue;
        }
        let chunk = build_chunk(
            file_path,
            content,
            start,
            end,
            base_char_offset,
            base_line,
            ordinal,
            &nl_positions,
            config,
            tokenizer,
        );
        ordinal += 1;
        chunks.push(chunk);
    }

    let mut final_chunks = Vec::new();
    for chunk in chunks {
        final_chunks.extend(hard_resplit(chunk, &mut ordinal, &nl_positions, config, tokenizer));
    }

    for chunk in &final_chunks {
        chunk.validate()?;
    }

    Ok(final_chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::Tokenizer;

    fn cfg(strategy: ChunkingStrategy) -> ChunkingConfig {
        ChunkingConfig {
            strategy,
            ..ChunkingConfig::default()
        }
    }

    #[test]
    fn fixed_tokens_overlap_scenario() {
        let tokenizer = Tokenizer::whitespace();
        let text = (0..200).map(|i| format!("tok{i}")).collect::<Vec<_>>().join(" ");
        let mut config = cfg(ChunkingStrategy::FixedTokens);
        config.target_tokens = 64;
        config.overlap_tokens = 8;
        let chunks = chunk_text("doc.txt", &text, 0, 1, 0, &config, &tokenizer).unwrap();
        assert!(chunks.len() >= 3);
        for c in &chunks {
            assert!(c.token_count <= 64);
        }
        assert!(chunks[0].content.contains("tok63"));
        assert!(chunks[1].content.contains("tok63"));
    }

    #[test]
    fn recursive_packs_paragraphs() {
        let tokenizer = Tokenizer::whitespace();
        let para = (0..30).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let text = vec![para.clone(), para.clone(), para.clone(), para].join("\n\n");
        let mut config = cfg(ChunkingStrategy::Recursive);
        config.target_tokens = 64;
        let chunks = chunk_text("doc.txt", &text, 0, 1, 0, &config, &tokenizer).unwrap();
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.token_count <= 64);
        }
    }

    #[test]
    fn markdown_splits_at_headings() {
        let tokenizer = Tokenizer::whitespace();
        let body_a = (0..120).map(|i| format!("alpha{i}")).collect::<Vec<_>>().join(" ");
        let body_b = (0..120).map(|i| format!("beta{i}")).collect::<Vec<_>>().join(" ");
        let text = format!("# Title\n\n{body_a}\n\n## Sub\n\n{body_b}\n");
        let mut config = cfg(ChunkingStrategy::Markdown);
        config.markdown_max_heading_level = 2;
        let chunks = chunk_text("doc.md", &text, 0, 1, 0, &config, &tokenizer).unwrap();
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().any(|c| c.content.contains("# Title")));
        assert!(chunks.iter().any(|c| c.content.contains("## Sub")));
    }

    #[test]
    fn prefix_separator_safety_terminates_with_positive_spans() {
        let tokenizer = Tokenizer::whitespace();
        let mut config = cfg(ChunkingStrategy::Recursive);
        config.separators = vec!["\n\n".into()];
        config.separator_keep = SeparatorKeep::Prefix;
        config.target_tokens = 1;
        config.overlap_tokens = 0;
        config.recursive_max_depth = 3;
        let chunks = chunk_text("doc.txt", "\n\nA\n\nB", 0, 1, 0, &config, &tokenizer).unwrap();
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.char_end().unwrap() > c.char_start().unwrap());
        }
    }

    #[test]
    fn chunk_ordinals_strictly_increase() {
        let tokenizer = Tokenizer::whitespace();
        let text = (0..50).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let mut config = cfg(ChunkingStrategy::FixedTokens);
        config.target_tokens = 8;
        config.overlap_tokens = 2;
        let chunks = chunk_text("doc.txt", &text, 0, 1, 0, &config, &tokenizer).unwrap();
        let ordinals: Vec<i64> = chunks.iter().map(|c| c.chunk_ordinal().unwrap()).collect();
        for w in ordinals.windows(2) {
            assert!(w[1] > w[0]);
        }
    }

    #[test]
    fn post_pass_resplits_oversized_chunks() {
        let tokenizer = Tokenizer::whitespace();
        let text = (0..500).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let mut config = cfg(ChunkingStrategy::FixedChars);
        config.chunk_size = 100_000;
        config.chunk_overlap = 0;
        config.max_chunk_tokens = 100;
        let chunks = chunk_text("doc.txt", &text, 0, 1, 0, &config, &tokenizer).unwrap();
        for c in &chunks {
            assert!(c.token_count <= 100);
        }
    }

    #[test]
    fn alias_strategies_fall_back_to_fixed_chars() {
        assert_eq!(ChunkingStrategy::normalize("ast"), ChunkingStrategy::FixedChars);
        assert_eq!(ChunkingStrategy::normalize("hybrid"), ChunkingStrategy::FixedChars);
        assert_eq!(ChunkingStrategy::normalize("semantic"), ChunkingStrategy::FixedChars);
        assert_eq!(ChunkingStrategy::normalize("greedy"), ChunkingStrategy::FixedChars);
    }

    #[test]
    fn language_hint_from_extension() {
        assert_eq!(detect_language("a.py"), Some("python".to_string()));
        assert_eq!(detect_language("a.tsx"), Some("typescript".to_string()));
        assert_eq!(detect_language("a.jsx"), Some("javascript".to_string()));
        assert_eq!(detect_language("a.rs"), None);
    }
}
