//! OpenAI-compatible chat generation over HTTP.
//!
//! Both the non-streaming and streaming paths build the same message
//! envelope and differ only in `stream: bool` on the request body and
//! how the response is consumed. The upstream SSE framing
//! (`data: {...}\n\n`, terminated by `data: [DONE]`) is decoded by hand
//! since every OpenAI-compatible provider (OpenRouter, Ollama's OpenAI
//! shim, vLLM) emits the same wire format.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use tribrid_core::error::{CoreError, CoreResult};
use tribrid_core::models::ChunkMatch;

use crate::config::OpenRouterConfig;
use crate::provider_router::{ProviderRoute, RouteKind};

const DEFAULT_MAX_TOKENS: u32 = 2048;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// An inline image attached to a chat message, rendered as an OpenAI
/// `image_url` content part.
#[derive(Debug, Clone, Default)]
pub struct ImageAttachment {
    pub url: Option<String>,
    pub mime_type: String,
    pub base64: String,
}

impl ImageAttachment {
    fn to_openai_part(&self) -> Value {
        let url = match &self.url {
            Some(url) => url.clone(),
            None => format!("data:{};base64,{}", self.mime_type, self.base64),
        };
        json!({"type": "image_url", "image_url": {"url": url}})
    }
}

fn format_chunks_for_context(chunks: &[ChunkMatch]) -> String {
    if chunks.is_empty() {
        return "No relevant context found.".to_string();
    }
    chunks
        .iter()
        .map(|c| {
            let mut header = format!("## {}:{}-{}", c.file_path, c.start_line, c.end_line);
            if let Some(lang) = &c.language {
                header.push_str(&format!(" ({lang})"));
            }
            format!("{header}\n```\n{}\n```", c.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds `system_prompt + optional ## Context block` per the
/// orchestrator's prompt-assembly contract.
pub fn build_prompt(system_prompt: &str, context_text: Option<&str>, context_chunks: &[ChunkMatch]) -> String {
    let context_block = match context_text {
        Some(text) => text.trim().to_string(),
        None => format_chunks_for_context(context_chunks),
    };
    if context_block.is_empty() {
        system_prompt.to_string()
    } else {
        format!("{system_prompt}\n\n## Context\n{context_block}")
    }
}

fn build_messages(system_prompt: &str, user_message: &str, images: &[ImageAttachment]) -> Value {
    let user_payload = if images.is_empty() {
        json!({"role": "user", "content": user_message})
    } else {
        let mut content = vec![json!({"type": "text", "text": user_message})];
        content.extend(images.iter().map(ImageAttachment::to_openai_part));
        json!({"role": "user", "content": content})
    };
    json!([{"role": "system", "content": system_prompt}, user_payload])
}

fn openrouter_headers(api_key: &str, cfg: &OpenRouterConfig) -> reqwest::header::HeaderMap {
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {api_key}")).expect("api key must be header-safe"),
    );
    let site_name = cfg.site_name.trim();
    if !site_name.is_empty() {
        if let Ok(value) = HeaderValue::from_str(site_name) {
            headers.insert(HeaderName::from_static("x-title"), value);
        }
    }
    headers
}

fn completions_url(route: &ProviderRoute) -> CoreResult<String> {
    if route.kind == RouteKind::CloudDirect {
        return Err(CoreError::config("no cloud_direct provider configured"));
    }
    let base = route.base_url.trim_end_matches('/');
    Ok(match route.kind {
        RouteKind::OpenRouter => format!("{base}/chat/completions"),
        _ => format!("{base}/v1/chat/completions"),
    })
}

struct GenerationRequest {
    url: String,
    headers: reqwest::header::HeaderMap,
    payload: Value,
}

fn build_request(
    route: &ProviderRoute,
    openrouter_cfg: &OpenRouterConfig,
    system_prompt: &str,
    user_message: &str,
    images: &[ImageAttachment],
    temperature: f64,
    max_tokens: u32,
    context_text: Option<&str>,
    context_chunks: &[ChunkMatch],
    stream: bool,
) -> CoreResult<GenerationRequest> {
    let prompt = build_prompt(system_prompt, context_text, context_chunks);
    let messages = build_messages(&prompt, user_message, images);
    let url = completions_url(route)?;

    let headers = if route.kind == RouteKind::OpenRouter {
        let api_key = route
            .api_key
            .as_deref()
            .ok_or_else(|| CoreError::config("openrouter route selected without an api key"))?;
        openrouter_headers(api_key, openrouter_cfg)
    } else {
        reqwest::header::HeaderMap::new()
    };

    let payload = json!({
        "model": route.model,
        "messages": messages,
        "temperature": temperature,
        "max_tokens": max_tokens,
        "stream": stream,
    });

    Ok(GenerationRequest { url, headers, payload })
}

/// Generates a single non-streaming chat completion. Returns the
/// response text (the original's `provider_id` second return value has
/// no counterpart for OpenAI-compatible completions and is dropped).
#[allow(clippy::too_many_arguments)]
pub async fn generate_chat_text(
    client: &reqwest::Client,
    route: &ProviderRoute,
    openrouter_cfg: &OpenRouterConfig,
    system_prompt: &str,
    user_message: &str,
    images: &[ImageAttachment],
    temperature: f64,
    max_tokens: u32,
    context_text: Option<&str>,
    context_chunks: &[ChunkMatch],
) -> CoreResult<String> {
    let req = build_request(
        route,
        openrouter_cfg,
        system_prompt,
        user_message,
        images,
        temperature,
        max_tokens,
        context_text,
        context_chunks,
        false,
    )?;

    let resp = client
        .post(&req.url)
        .headers(req.headers)
        .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .json(&req.payload)
        .send()
        .await
        .map_err(|e| CoreError::TransientRemote(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(CoreError::TransientRemote(format!("provider returned {status}: {body}")));
    }

    let data: Value = resp.json().await.map_err(|e| CoreError::TransientRemote(e.to_string()))?;
    let text = data["choices"][0]["message"]["content"].as_str().unwrap_or("").to_string();
    Ok(text)
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

/// Decodes one `data:` line from an OpenAI-compatible SSE stream.
/// Returns `None` for the `[DONE]` sentinel, blank lines, or a delta
/// with no text content.
fn decode_sse_line(line: &str) -> Option<CoreResult<String>> {
    let line = line.trim();
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk.choices.into_iter().next().and_then(|c| c.delta.content).map(Ok),
        Err(_) => None,
    }
}

struct StreamState {
    bytes: Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
    buffer: String,
    pending: VecDeque<String>,
    finished: bool,
}

/// Streams chat response text deltas from an OpenAI-compatible
/// `stream: true` completion. Each item is one delta's text content, in
/// arrival order.
#[allow(clippy::too_many_arguments)]
pub async fn stream_chat_text(
    client: &reqwest::Client,
    route: &ProviderRoute,
    openrouter_cfg: &OpenRouterConfig,
    system_prompt: &str,
    user_message: &str,
    images: &[ImageAttachment],
    temperature: f64,
    max_tokens: u32,
    context_text: Option<&str>,
    context_chunks: &[ChunkMatch],
) -> CoreResult<Pin<Box<dyn Stream<Item = CoreResult<String>> + Send>>> {
    let req = build_request(
        route,
        openrouter_cfg,
        system_prompt,
        user_message,
        images,
        temperature,
        max_tokens,
        context_text,
        context_chunks,
        true,
    )?;

    let resp = client
        .post(&req.url)
        .headers(req.headers)
        .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .json(&req.payload)
        .send()
        .await
        .map_err(|e| CoreError::TransientRemote(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(CoreError::TransientRemote(format!("provider returned {status}: {body}")));
    }

    let state = StreamState {
        bytes: Box::pin(resp.bytes_stream()),
        buffer: String::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = stream::unfold(state, |mut state| async move {
        loop {
            if let Some(delta) = state.pending.pop_front() {
                return Some((Ok(delta), state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(pos) = state.buffer.find('\n') {
                        let line: String = state.buffer.drain(..=pos).collect();
                        match decode_sse_line(line.trim_end_matches('\n')) {
                            Some(Ok(delta)) if !delta.is_empty() => state.pending.push_back(delta),
                            Some(Err(e)) => return Some((Err(e), state)),
                            _ => {}
                        }
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(CoreError::TransientRemote(e.to_string())), state));
                }
                None => {
                    state.finished = true;
                }
            }
        }
    });

    Ok(Box::pin(stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_sse_line_extracts_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"hel"}}]}"#;
        let result = decode_sse_line(line).unwrap().unwrap();
        assert_eq!(result, "hel");
    }

    #[test]
    fn decode_sse_line_done_sentinel_is_none() {
        assert!(decode_sse_line("data: [DONE]").is_none());
    }

    #[test]
    fn decode_sse_line_blank_is_none() {
        assert!(decode_sse_line("").is_none());
        assert!(decode_sse_line("   ").is_none());
    }

    #[test]
    fn format_chunks_renders_fenced_blocks() {
        let chunks = vec![ChunkMatch {
            chunk_id: "a:1-2:0".to_string(),
            content: "fn main() {}".to_string(),
            file_path: "a.rs".to_string(),
            start_line: 1,
            end_line: 2,
            language: Some("rust".to_string()),
            token_count: 3,
            score: 1.0,
            source: tribrid_core::models::MatchSource::Vector,
            metadata: tribrid_core::models::Metadata::new(),
        }];
        let rendered = format_chunks_for_context(&chunks);
        assert!(rendered.contains("## a.rs:1-2 (rust)"));
        assert!(rendered.contains("fn main() {}"));
    }

    #[test]
    fn build_prompt_appends_context_section() {
        let prompt = build_prompt("Be helpful.", Some("some context"), &[]);
        assert_eq!(prompt, "Be helpful.\n\n## Context\nsome context");
    }

    #[test]
    fn build_prompt_skips_context_section_when_empty() {
        let prompt = build_prompt("Be helpful.", None, &[]);
        assert_eq!(prompt, "Be helpful.");
    }

    #[test]
    fn cloud_direct_route_is_rejected() {
        let route = ProviderRoute {
            kind: RouteKind::CloudDirect,
            provider_name: "Cloud".to_string(),
            base_url: String::new(),
            model: "x".to_string(),
            api_key: None,
        };
        assert!(completions_url(&route).is_err());
    }
}
