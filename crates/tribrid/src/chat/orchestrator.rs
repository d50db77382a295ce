//! Non-streaming and streaming chat request handling: config resolution,
//! trace bracketing, retrieval fan-out, provider routing, and (for the
//! streaming path) SSE event construction.
//!
//! Ported from the original `chat_once`/`chat_stream` handlers. The
//! Recall-corpus auto-indexing step in the original (tied to a
//! Postgres-backed conversation/recall store) has no counterpart here —
//! this crate's storage backend is SQLite and corpus indexing is a
//! filesystem-driven, explicitly configured step (see
//! [`crate::indexer`]), not an implicit per-request side effect.

use futures::StreamExt;
use serde::Serialize;

use tribrid_core::config::ConfigSnapshot;
use tribrid_core::error::{CoreError, CoreResult};
use tribrid_core::fusion::{self, FusionDebug, LegWeights};
use tribrid_core::models::ChunkMatch;
use tribrid_core::retrieval::{self, RetrievalRequest};
use tribrid_core::store::Store;
use tribrid_core::trace::TraceSink;

use crate::chat::generation::{self, ImageAttachment};
use crate::config::ChatProvidersConfig;
use crate::provider_router::select_provider_route;

/// One incoming chat request. Mirrors the original's `ChatRequest`
/// model, minus fields (`conversation_id` continuity tokens, auth) that
/// belong to the external HTTP envelope this crate doesn't own.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub corpus_ids: Vec<String>,
    pub recall_corpus_id: String,
    pub images: Vec<ImageAttachment>,
    pub model_override: String,
    pub include_vector: bool,
    pub include_sparse: bool,
    pub include_graph: bool,
    pub top_k: usize,
    pub query_vec: Option<Vec<f32>>,
}

impl Default for ChatRequest {
    fn default() -> Self {
        Self {
            message: String::new(),
            corpus_ids: Vec::new(),
            recall_corpus_id: "recall_default".to_string(),
            images: Vec::new(),
            model_override: String::new(),
            include_vector: true,
            include_sparse: true,
            include_graph: false,
            top_k: 10,
            query_vec: None,
        }
    }
}

/// Result of a non-streaming chat turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub message: String,
    pub sources: Vec<ChunkMatch>,
    pub run_id: String,
    pub started_at_ms: i64,
    pub ended_at_ms: i64,
    pub debug: FusionDebug,
}

/// One SSE frame emitted by [`chat_stream`], matching the contract in
/// the chat orchestrator spec: `text` deltas, exactly one terminal
/// `done`, or a single `error`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseEvent {
    Text {
        content: String,
    },
    Done {
        run_id: String,
        started_at_ms: i64,
        ended_at_ms: i64,
        conversation_id: String,
        sources: Vec<ChunkMatch>,
    },
    Error {
        message: String,
    },
}

fn build_system_prompt(config: &ConfigSnapshot, corpus_ids: &[String], recall_corpus_id: &str) -> String {
    let mut prompt = config.chat.system_prompt_base.clone();
    let has_recall = corpus_ids.iter().any(|c| c == recall_corpus_id);
    let has_rag = corpus_ids.iter().any(|c| !c.is_empty() && c != recall_corpus_id);

    if has_recall {
        if let Some(suffix) = &config.chat.recall_suffix {
            prompt.push_str(suffix);
        }
    }
    if has_rag {
        if let Some(suffix) = &config.chat.rag_suffix {
            prompt.push_str(suffix);
        }
    }
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        "You are a helpful assistant.".to_string()
    } else {
        trimmed.to_string()
    }
}

fn select_temperature(config: &ConfigSnapshot, corpus_ids: &[String]) -> f64 {
    if corpus_ids.is_empty() {
        config.chat.temperature_no_retrieval
    } else {
        config.chat.temperature
    }
}

/// How many top vector/sparse hits seed the graph leg's traversal when
/// `include_graph` is set. The graph store itself has no notion of a
/// "query" to search by name, only chunk-to-chunk edges, so a chat
/// request seeds it from whatever the other two legs already found
/// relevant rather than leaving it permanently unseeded.
const GRAPH_SEED_COUNT: usize = 5;

/// Runs retrieval across every selected corpus and merges + shapes the
/// combined candidate list. Empty `corpus_ids` skips retrieval
/// entirely, matching the orchestrator contract.
async fn retrieve_and_shape(
    store: &dyn Store,
    corpus_ids: &[String],
    query_text: &str,
    query_vec: Option<&[f32]>,
    config: &ConfigSnapshot,
    include_vector: bool,
    include_sparse: bool,
    include_graph: bool,
    top_k: usize,
) -> CoreResult<(Vec<ChunkMatch>, FusionDebug)> {
    if corpus_ids.is_empty() {
        return Ok((Vec::new(), FusionDebug::default()));
    }

    let mut per_corpus = Vec::with_capacity(corpus_ids.len());
    let mut debug = FusionDebug::default();

    for corpus_id in corpus_ids {
        let req = RetrievalRequest {
            corpus_id,
            query_text,
            query_vec,
            include_vector,
            include_sparse,
            include_graph: false,
            top_k_vector: config.retrieval.top_k_vector,
            top_k_sparse: config.retrieval.top_k_sparse,
            top_k_graph: config.retrieval.top_k_graph,
            graph_max_depth: config.retrieval.graph_max_depth,
            graph_seeds: Vec::new(),
        };
        let mut legs = retrieval::retrieve(store, &req).await?;
        debug.vector_candidates += legs.vector.len();
        debug.sparse_candidates += legs.sparse.len();

        if include_graph {
            let seeds: Vec<String> = legs
                .vector
                .iter()
                .chain(legs.sparse.iter())
                .take(GRAPH_SEED_COUNT)
                .map(|m| m.chunk_id.clone())
                .collect();
            if !seeds.is_empty() {
                let graph_req = RetrievalRequest {
                    corpus_id,
                    query_text,
                    query_vec,
                    include_vector: false,
                    include_sparse: false,
                    include_graph: true,
                    top_k_vector: 0,
                    top_k_sparse: 0,
                    top_k_graph: config.retrieval.top_k_graph,
                    graph_max_depth: config.retrieval.graph_max_depth,
                    graph_seeds: seeds,
                };
                legs.graph = retrieval::retrieve(store, &graph_req).await?.graph;
            }
        }
        debug.graph_candidates += legs.graph.len();

        let weights = config.fusion.weights.unwrap_or_else(|| LegWeights::equal_over(&legs));
        let mut fusion_config = config.fusion.clone();
        fusion_config.weights = Some(weights);
        fusion_config.top_k = top_k;
        per_corpus.push(fusion::fuse_single(&legs, &fusion_config));
    }

    let merged = fusion::merge_corpora(per_corpus);
    let mut fusion_config = config.fusion.clone();
    fusion_config.top_k = top_k;
    let primary_corpus = &corpus_ids[0];
    let (shaped, debug) = fusion::shape(store, primary_corpus, merged, &fusion_config, debug).await?;
    Ok((shaped, debug))
}

#[allow(clippy::too_many_arguments)]
pub async fn chat_once(
    store: &dyn Store,
    trace: &dyn TraceSink,
    http: &reqwest::Client,
    chat_providers: &ChatProvidersConfig,
    config: &ConfigSnapshot,
    openrouter_api_key: Option<&str>,
    request: &ChatRequest,
    run_id: &str,
    started_at_ms: i64,
) -> CoreResult<ChatOutcome> {
    let enabled = trace.start(run_id, request.corpus_ids.first().map(String::as_str).unwrap_or(""), started_at_ms, config).await?;
    if enabled {
        trace
            .add_event(run_id, "chat.request", serde_json::json!({"message": request.message, "corpus_ids": request.corpus_ids}), None)
            .await?;
    }

    let (sources, debug) = retrieve_and_shape(
        store,
        &request.corpus_ids,
        &request.message,
        request.query_vec.as_deref(),
        config,
        request.include_vector,
        request.include_sparse,
        request.include_graph,
        request.top_k,
    )
    .await?;
    if enabled {
        trace.add_event(run_id, "retrieval.fusion", serde_json::to_value(&debug).unwrap_or_default(), None).await?;
    }

    let system_prompt = build_system_prompt(config, &request.corpus_ids, &request.recall_corpus_id);
    let route = select_provider_route(chat_providers, &config.chat, &request.model_override, openrouter_api_key);
    let temperature = select_temperature(config, &request.corpus_ids);

    let result = generation::generate_chat_text(
        http,
        &route,
        &chat_providers.openrouter,
        &system_prompt,
        &request.message,
        &request.images,
        temperature,
        2048,
        None,
        &sources,
    )
    .await;

    let ended_at_ms = chrono::Utc::now().timestamp_millis();
    match result {
        Ok(text) => {
            if enabled {
                trace.add_event(run_id, "chat.response", serde_json::json!({"chars": text.len()}), None).await?;
            }
            trace.end(run_id, Some(ended_at_ms)).await?;
            Ok(ChatOutcome { message: text, sources, run_id: run_id.to_string(), started_at_ms, ended_at_ms, debug })
        }
        Err(e) => {
            if enabled {
                trace.add_event(run_id, "chat.error", serde_json::json!({}), Some(e.to_string())).await?;
            }
            trace.end(run_id, Some(ended_at_ms)).await?;
            Err(e)
        }
    }
}

/// Runs the streaming chat path and returns the full sequence of SSE
/// events to emit (the HTTP layer is responsible for framing each as
/// `data: <json>\n\n`). Always ends with exactly one `Done` or one
/// `Error` event, per the orchestrator contract.
#[allow(clippy::too_many_arguments)]
pub async fn chat_stream(
    store: &dyn Store,
    trace: &dyn TraceSink,
    http: &reqwest::Client,
    chat_providers: &ChatProvidersConfig,
    config: &ConfigSnapshot,
    openrouter_api_key: Option<&str>,
    request: &ChatRequest,
    run_id: &str,
    started_at_ms: i64,
    conversation_id: &str,
) -> CoreResult<Vec<SseEvent>> {
    let enabled = trace.start(run_id, request.corpus_ids.first().map(String::as_str).unwrap_or(""), started_at_ms, config).await?;
    if enabled {
        trace
            .add_event(run_id, "chat.request", serde_json::json!({"message": request.message, "corpus_ids": request.corpus_ids}), None)
            .await?;
    }

    let (sources, debug) = retrieve_and_shape(
        store,
        &request.corpus_ids,
        &request.message,
        request.query_vec.as_deref(),
        config,
        request.include_vector,
        request.include_sparse,
        request.include_graph,
        request.top_k,
    )
    .await?;
    if enabled {
        trace.add_event(run_id, "retrieval.fusion", serde_json::to_value(&debug).unwrap_or_default(), None).await?;
    }

    let system_prompt = build_system_prompt(config, &request.corpus_ids, &request.recall_corpus_id);
    let route = select_provider_route(chat_providers, &config.chat, &request.model_override, openrouter_api_key);
    let temperature = select_temperature(config, &request.corpus_ids);

    let mut events = Vec::new();
    let stream_result = generation::stream_chat_text(
        http,
        &route,
        &chat_providers.openrouter,
        &system_prompt,
        &request.message,
        &request.images,
        temperature,
        2048,
        None,
        &sources,
    )
    .await;

    let mut failure: Option<CoreError> = None;
    match stream_result {
        Ok(mut deltas) => {
            while let Some(next) = deltas.next().await {
                match next {
                    Ok(delta) => events.push(SseEvent::Text { content: delta }),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }
        Err(e) => failure = Some(e),
    }

    let ended_at_ms = chrono::Utc::now().timestamp_millis();
    if let Some(e) = failure {
        if enabled {
            trace.add_event(run_id, "chat.error", serde_json::json!({}), Some(e.to_string())).await?;
        }
        trace.end(run_id, Some(ended_at_ms)).await?;
        events.push(SseEvent::Error { message: e.to_string() });
        return Ok(events);
    }

    if enabled {
        trace.add_event(run_id, "chat.response", serde_json::json!({"sources": sources.len()}), None).await?;
    }
    trace.end(run_id, Some(ended_at_ms)).await?;
    events.push(SseEvent::Done {
        run_id: run_id.to_string(),
        started_at_ms,
        ended_at_ms,
        conversation_id: conversation_id.to_string(),
        sources,
    });
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_suffixes() -> ConfigSnapshot {
        let mut config = ConfigSnapshot::default();
        config.chat.system_prompt_base = "Base.".to_string();
        config.chat.recall_suffix = Some(" Recall active.".to_string());
        config.chat.rag_suffix = Some(" RAG active.".to_string());
        config
    }

    #[test]
    fn system_prompt_adds_recall_suffix_only_for_recall_corpus() {
        let config = config_with_suffixes();
        let prompt = build_system_prompt(&config, &["recall_default".to_string()], "recall_default");
        assert_eq!(prompt, "Base. Recall active.");
    }

    #[test]
    fn system_prompt_adds_rag_suffix_for_non_recall_corpus() {
        let config = config_with_suffixes();
        let prompt = build_system_prompt(&config, &["docs".to_string()], "recall_default");
        assert_eq!(prompt, "Base. RAG active.");
    }

    #[test]
    fn system_prompt_adds_both_suffixes_when_both_present() {
        let config = config_with_suffixes();
        let prompt = build_system_prompt(&config, &["recall_default".to_string(), "docs".to_string()], "recall_default");
        assert_eq!(prompt, "Base. Recall active. RAG active.");
    }

    #[test]
    fn temperature_uses_no_retrieval_when_no_corpus_selected() {
        let config = ConfigSnapshot::default();
        assert_eq!(select_temperature(&config, &[]), config.chat.temperature_no_retrieval);
        assert_eq!(select_temperature(&config, &["c1".to_string()]), config.chat.temperature);
    }

    #[tokio::test]
    async fn graph_leg_is_seeded_from_vector_and_sparse_hits() {
        use tribrid_core::models::{Chunk, Metadata};
        use tribrid_core::store::memory::InMemoryStore;
        use tribrid_core::store::GraphEdge;

        let store = InMemoryStore::new();
        let chunk_a = Chunk {
            chunk_id: "a".to_string(),
            content: "hello world".to_string(),
            file_path: "f.txt".to_string(),
            start_line: 1,
            end_line: 1,
            language: None,
            token_count: 2,
            embedding: Some(vec![1.0, 0.0]),
            metadata: Metadata::new(),
        };
        let chunk_b = Chunk {
            chunk_id: "b".to_string(),
            content: "related note".to_string(),
            file_path: "f.txt".to_string(),
            start_line: 2,
            end_line: 2,
            language: None,
            token_count: 2,
            embedding: None,
            metadata: Metadata::new(),
        };
        store.replace_chunks("c1", "f.txt", &[chunk_a, chunk_b]).await.unwrap();
        store
            .upsert_edges("c1", &[GraphEdge { from_chunk_id: "a".to_string(), to_chunk_id: "b".to_string(), weight: 1.0, relation: None }])
            .await
            .unwrap();

        let config = ConfigSnapshot::default();
        let (sources, debug) =
            retrieve_and_shape(&store, &["c1".to_string()], "hello", Some(&[1.0, 0.0]), &config, true, true, true, 10).await.unwrap();

        assert!(debug.graph_candidates > 0, "graph leg should be seeded from top vector/sparse hits, not left empty");
        assert!(sources.iter().any(|m| m.chunk_id == "b"));
    }

    #[tokio::test]
    async fn graph_leg_stays_empty_without_vector_or_sparse_hits() {
        use tribrid_core::store::memory::InMemoryStore;

        let store = InMemoryStore::new();
        let config = ConfigSnapshot::default();
        let (_, debug) = retrieve_and_shape(&store, &["c1".to_string()], "hello", None, &config, true, true, true, 10).await.unwrap();
        assert_eq!(debug.graph_candidates, 0);
    }
}
