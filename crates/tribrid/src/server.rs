//! HTTP surface: configuration management, chat (streaming and not),
//! and conversation history.
//!
//! # Endpoints
//!
//! | Method   | Path                                  | Description |
//! |----------|----------------------------------------|-------------|
//! | `GET`    | `/api/config?corpus_id=…`              | Validated snapshot for a corpus; 404 if unknown, never creates |
//! | `PUT`    | `/api/config?corpus_id=…`              | Replace the snapshot wholesale |
//! | `PATCH`  | `/api/config/{section}?corpus_id=…`    | Deep-merge a patch into one section |
//! | `POST`   | `/api/config/reset?corpus_id=…`        | Drop the override, fall back to defaults |
//! | `POST`   | `/api/chat`                            | Non-streaming chat turn |
//! | `POST`   | `/api/chat/stream`                     | SSE chat turn |
//! | `GET`    | `/api/chat/history/{conversation_id}`  | Ordered messages; 404 if absent |
//! | `DELETE` | `/api/chat/history/{conversation_id}`  | Clears history; 404 if absent |
//! | `GET`    | `/health`                               | Health check |
//!
//! # Error contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "..." } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted, matching the
//! tool-integration posture of the legacy MCP server.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};

use tribrid_core::config::{ConfigRegistry, ConfigSnapshot};
use tribrid_core::error::CoreError;
use tribrid_core::fusion::FusionDebug;
use tribrid_core::models::ChunkMatch;
use tribrid_core::store::Store;
use tribrid_core::tokenizer::Tokenizer;
use tribrid_core::trace::TraceSink;

use crate::chat::generation::ImageAttachment;
use crate::chat::orchestrator::{self, ChatRequest};
use crate::config::{AppConfig, ChatProvidersConfig};
use crate::conversation::{ConversationMessage, ConversationStore};
use crate::embedding;

const CONFIG_SECTIONS: [&str; 8] =
    ["tokenization", "chunking", "embedding", "retrieval", "fusion", "reranking", "chat", "indexing"];

#[derive(Clone)]
struct AppState {
    store: Arc<dyn Store>,
    trace: Arc<dyn TraceSink>,
    registry: Arc<RwLock<ConfigRegistry>>,
    chat_providers: ChatProvidersConfig,
    conversations: Arc<ConversationStore>,
    http: reqwest::Client,
    openrouter_api_key: Option<String>,
}

/// Starts the HTTP server. Binds to `config.server.bind` and runs until
/// the process is terminated.
pub async fn run_server(config: &AppConfig, store: Arc<dyn Store>, trace: Arc<dyn TraceSink>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let state = AppState {
        store,
        trace,
        registry: Arc::new(RwLock::new(ConfigRegistry::new(config.snapshot.clone()))),
        chat_providers: config.chat_providers.clone(),
        conversations: Arc::new(ConversationStore::new()),
        http: reqwest::Client::new(),
        openrouter_api_key: std::env::var("OPENROUTER_API_KEY").ok(),
    };

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/api/config", get(handle_get_config).put(handle_put_config))
        .route("/api/config/reset", post(handle_reset_config))
        .route("/api/config/{section}", axum::routing::patch(handle_patch_config))
        .route("/api/chat", post(handle_chat))
        .route("/api/chat/stream", post(handle_chat_stream))
        .route(
            "/api/chat/history/{conversation_id}",
            get(handle_get_history).delete(handle_delete_history),
        )
        .layer(cors)
        .with_state(state);

    tracing::info!("tribrid server listening on http://{bind_addr}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error: ErrorDetail { code: self.code, message: self.message } };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError { status: StatusCode::BAD_REQUEST, code: "bad_request".to_string(), message: message.into() }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError { status: StatusCode::NOT_FOUND, code: "not_found".to_string(), message: message.into() }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError { status: StatusCode::INTERNAL_SERVER_ERROR, code: "internal".to_string(), message: message.into() }
}

/// Maps the five core error kinds onto the HTTP status codes named by
/// the error-handling design: config errors are client-caused (400),
/// an unavailable backend is 503, a transient upstream failure is 502,
/// cancellation/timeout is 504, and a fatal invariant violation is 500.
fn core_error(e: CoreError) -> AppError {
    match e {
        CoreError::Config(msg) => bad_request(msg),
        CoreError::BackendUnavailable(msg) => {
            AppError { status: StatusCode::SERVICE_UNAVAILABLE, code: "backend_unavailable".to_string(), message: msg }
        }
        CoreError::TransientRemote(msg) => {
            AppError { status: StatusCode::BAD_GATEWAY, code: "transient_remote".to_string(), message: msg }
        }
        CoreError::Cancelled(msg) => {
            AppError { status: StatusCode::GATEWAY_TIMEOUT, code: "cancelled".to_string(), message: msg }
        }
        CoreError::Fatal(msg) => internal_error(msg),
    }
}

fn merge_json(base: &mut serde_json::Value, patch: serde_json::Value) {
    match patch {
        serde_json::Value::Object(patch_map) => {
            if !base.is_object() {
                *base = serde_json::Value::Object(serde_json::Map::new());
            }
            let base_map = base.as_object_mut().expect("just ensured object");
            for (key, value) in patch_map {
                merge_json(base_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        other => *base = other,
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".to_string(), version: env!("CARGO_PKG_VERSION").to_string() })
}

// ============ Config endpoints ============

#[derive(Deserialize)]
struct CorpusQuery {
    corpus_id: Option<String>,
}

impl CorpusQuery {
    fn require(self) -> Result<String, AppError> {
        self.corpus_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| bad_request("corpus_id query parameter is required"))
    }
}

async fn handle_get_config(
    State(state): State<AppState>,
    Query(query): Query<CorpusQuery>,
) -> Result<Json<ConfigSnapshot>, AppError> {
    let corpus_id = query.require()?;
    let known = state.store.get_corpus(&corpus_id).await.map_err(core_error)?;
    if known.is_none() {
        return Err(not_found(format!("unknown corpus: {corpus_id}")));
    }
    let snapshot = state.registry.read().await.get_config(&corpus_id);
    Ok(Json(snapshot))
}

async fn handle_put_config(
    State(state): State<AppState>,
    Query(query): Query<CorpusQuery>,
    Json(snapshot): Json<ConfigSnapshot>,
) -> Result<Json<ConfigSnapshot>, AppError> {
    let corpus_id = query.require()?;
    let mut registry = state.registry.write().await;
    registry.set_config(&corpus_id, snapshot.clone()).map_err(core_error)?;
    Ok(Json(snapshot))
}

async fn handle_patch_config(
    State(state): State<AppState>,
    Path(section): Path<String>,
    Query(query): Query<CorpusQuery>,
    Json(patch): Json<serde_json::Value>,
) -> Result<Json<ConfigSnapshot>, AppError> {
    let corpus_id = query.require()?;
    if !CONFIG_SECTIONS.contains(&section.as_str()) {
        return Err(bad_request(format!("unknown config section: {section}")));
    }

    let mut registry = state.registry.write().await;
    let current = registry.get_config(&corpus_id);
    let mut value = serde_json::to_value(&current).map_err(|e| internal_error(e.to_string()))?;
    let slot = value.get_mut(&section).expect("section name validated against the snapshot's own fields");
    merge_json(slot, patch);

    let updated: ConfigSnapshot = serde_json::from_value(value).map_err(|e| bad_request(e.to_string()))?;
    registry.set_config(&corpus_id, updated.clone()).map_err(core_error)?;
    Ok(Json(updated))
}

async fn handle_reset_config(
    State(state): State<AppState>,
    Query(query): Query<CorpusQuery>,
) -> Result<Json<ConfigSnapshot>, AppError> {
    let corpus_id = query.require()?;
    let mut registry = state.registry.write().await;
    registry.delete_config(&corpus_id);
    Ok(Json(registry.get_config(&corpus_id)))
}

// ============ Chat endpoints ============

#[derive(Deserialize)]
struct ChatHttpRequest {
    message: String,
    #[serde(default)]
    corpus_ids: Vec<String>,
    #[serde(default = "default_recall_corpus_id")]
    recall_corpus_id: String,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    model: String,
    #[serde(default = "default_true")]
    include_vector: bool,
    #[serde(default = "default_true")]
    include_sparse: bool,
    #[serde(default)]
    include_graph: bool,
    #[serde(default = "default_top_k")]
    top_k: usize,
}

fn default_recall_corpus_id() -> String {
    "recall_default".to_string()
}
fn default_true() -> bool {
    true
}
fn default_top_k() -> usize {
    10
}

#[derive(Serialize)]
struct ChatHttpResponse {
    run_id: String,
    started_at_ms: i64,
    ended_at_ms: i64,
    debug: FusionDebug,
    conversation_id: String,
    message: String,
    sources: Vec<ChunkMatch>,
    tokens_used: usize,
}

fn config_corpus_id(corpus_ids: &[String]) -> String {
    corpus_ids.first().cloned().unwrap_or_else(|| "default".to_string())
}

async fn resolve_query_vec(config: &ConfigSnapshot, include_vector: bool, message: &str) -> Result<Option<Vec<f32>>, AppError> {
    if include_vector && config.embedding.is_enabled() {
        let vec = embedding::embed_query(&config.embedding, message).await.map_err(|e| internal_error(e.to_string()))?;
        Ok(Some(vec))
    } else {
        Ok(None)
    }
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatHttpRequest>,
) -> Result<Json<ChatHttpResponse>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let config = state.registry.read().await.get_config(&config_corpus_id(&req.corpus_ids));
    let query_vec = resolve_query_vec(&config, req.include_vector, &req.message).await?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let conversation_id = req.conversation_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let started_at_ms = chrono::Utc::now().timestamp_millis();

    let chat_request = ChatRequest {
        message: req.message.clone(),
        corpus_ids: req.corpus_ids.clone(),
        recall_corpus_id: req.recall_corpus_id.clone(),
        images: Vec::<ImageAttachment>::new(),
        model_override: req.model.clone(),
        include_vector: req.include_vector,
        include_sparse: req.include_sparse,
        include_graph: req.include_graph,
        top_k: req.top_k,
        query_vec,
    };

    let outcome = orchestrator::chat_once(
        state.store.as_ref(),
        state.trace.as_ref(),
        &state.http,
        &state.chat_providers,
        &config,
        state.openrouter_api_key.as_deref(),
        &chat_request,
        &run_id,
        started_at_ms,
    )
    .await
    .map_err(core_error)?;

    state
        .conversations
        .append(&conversation_id, ConversationMessage { role: "user".to_string(), content: req.message.clone(), created_at_ms: started_at_ms })
        .await;
    state
        .conversations
        .append(
            &conversation_id,
            ConversationMessage { role: "assistant".to_string(), content: outcome.message.clone(), created_at_ms: outcome.ended_at_ms },
        )
        .await;

    let tokenizer = Tokenizer::new(config.tokenization.strategy, config.tokenization.encoding_name.clone());
    let tokens_used = tokenizer.count_tokens(&outcome.message);

    Ok(Json(ChatHttpResponse {
        run_id: outcome.run_id,
        started_at_ms: outcome.started_at_ms,
        ended_at_ms: outcome.ended_at_ms,
        debug: outcome.debug,
        conversation_id,
        message: outcome.message,
        sources: outcome.sources,
        tokens_used,
    }))
}

/// Streams the SSE frames already fully resolved by
/// [`orchestrator::chat_stream`]. Per-chunk backpressure is left to the
/// transport's flow control, matching the concurrency model's stated
/// posture on streaming writes.
async fn handle_chat_stream(State(state): State<AppState>, Json(req): Json<ChatHttpRequest>) -> Result<Response, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let config = state.registry.read().await.get_config(&config_corpus_id(&req.corpus_ids));
    let query_vec = resolve_query_vec(&config, req.include_vector, &req.message).await?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let conversation_id = req.conversation_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let started_at_ms = chrono::Utc::now().timestamp_millis();

    let chat_request = ChatRequest {
        message: req.message.clone(),
        corpus_ids: req.corpus_ids.clone(),
        recall_corpus_id: req.recall_corpus_id.clone(),
        images: Vec::<ImageAttachment>::new(),
        model_override: req.model.clone(),
        include_vector: req.include_vector,
        include_sparse: req.include_sparse,
        include_graph: req.include_graph,
        top_k: req.top_k,
        query_vec,
    };

    let events = orchestrator::chat_stream(
        state.store.as_ref(),
        state.trace.as_ref(),
        &state.http,
        &state.chat_providers,
        &config,
        state.openrouter_api_key.as_deref(),
        &chat_request,
        &run_id,
        started_at_ms,
        &conversation_id,
    )
    .await
    .map_err(core_error)?;

    let assistant_text: String = events
        .iter()
        .filter_map(|event| match event {
            orchestrator::SseEvent::Text { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    if !assistant_text.is_empty() {
        state
            .conversations
            .append(&conversation_id, ConversationMessage { role: "user".to_string(), content: req.message.clone(), created_at_ms: started_at_ms })
            .await;
        state
            .conversations
            .append(
                &conversation_id,
                ConversationMessage { role: "assistant".to_string(), content: assistant_text, created_at_ms: started_at_ms },
            )
            .await;
    }

    let frames = events.into_iter().map(|event| {
        let json = serde_json::to_string(&event).unwrap_or_else(|_| "{\"type\":\"error\",\"message\":\"encoding failed\"}".to_string());
        Ok::<_, std::io::Error>(bytes::Bytes::from(format!("data: {json}\n\n")))
    });
    let body = Body::from_stream(futures::stream::iter(frames));

    Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
        .header(axum::http::header::CACHE_CONTROL, "no-cache")
        .header(axum::http::header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(body)
        .map_err(|e| internal_error(e.to_string()))
}

// ============ Chat history endpoints ============

async fn handle_get_history(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<ConversationMessage>>, AppError> {
    state
        .conversations
        .history(&conversation_id)
        .await
        .map(Json)
        .ok_or_else(|| not_found(format!("unknown conversation: {conversation_id}")))
}

async fn handle_delete_history(State(state): State<AppState>, Path(conversation_id): Path<String>) -> Result<StatusCode, AppError> {
    if state.conversations.clear(&conversation_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("unknown conversation: {conversation_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_json_overlays_nested_objects_without_dropping_siblings() {
        let mut base = serde_json::json!({"a": 1, "b": {"x": 1, "y": 2}});
        let patch = serde_json::json!({"b": {"y": 3}});
        merge_json(&mut base, patch);
        assert_eq!(base, serde_json::json!({"a": 1, "b": {"x": 1, "y": 3}}));
    }

    #[test]
    fn merge_json_replaces_arrays_wholesale() {
        let mut base = serde_json::json!({"list": [1, 2, 3]});
        let patch = serde_json::json!({"list": [9]});
        merge_json(&mut base, patch);
        assert_eq!(base, serde_json::json!({"list": [9]}));
    }

    #[test]
    fn corpus_query_rejects_blank_corpus_id() {
        let query = CorpusQuery { corpus_id: Some("   ".to_string()) };
        assert!(query.require().is_err());
    }
}
