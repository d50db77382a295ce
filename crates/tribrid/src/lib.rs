//! # tribrid
//!
//! A local-first tri-brid (dense + sparse + graph) retrieval and fusion
//! engine with provider-routed chat orchestration.
//!
//! Three independent retrieval legs — dense vector similarity, sparse
//! lexical (BM25 via SQLite FTS5), and a graph walk over explicit
//! chunk-to-chunk edges — are fused (RRF or weighted) and shaped
//! (dedup, per-file cap, MMR, neighbor expansion, truncate) into a
//! single ranked context, which the chat orchestrator hands to a
//! provider-routed model and streams back as SSE.
//!
//! Pure retrieval/fusion logic, the data model, and configuration
//! validation live in [`tribrid_core`]; this crate is the application
//! shell around it — SQLite storage, filesystem indexing, embedding
//! providers, chat generation, and the HTTP/CLI surface.
//!
//! ## Architecture
//!
//! ```text
//! Filesystem corpora ──▶ Chunking ──▶ Embedding ──▶ SQLite (vectors + FTS5 + graph edges)
//!                                                         │
//!                                                         ▼
//!                                      Fusion & Shaping ◀── per-leg retrieval
//!                                            │
//!                                            ▼
//!                         Chat Orchestrator ── Provider Router ── SSE / CLI
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//! | [`sqlite_store`] | [`tribrid_core::store::Store`] implementation over SQLite + FTS5 |
//! | [`indexer`] | Filesystem corpus walking, chunking, embedding, and storage |
//! | [`embedding`] | Embedding provider implementations (OpenAI, Ollama, local) |
//! | [`provider_router`] | Deterministic chat provider selection |
//! | [`chat`] | Prompt assembly, streaming/non-streaming generation, orchestration |
//! | [`trace_sink`] | File-backed JSONL trace sink |
//! | [`conversation`] | In-memory conversation history |
//! | [`server`] | HTTP surface (Axum) |
//!
//! ## Configuration
//!
//! `tribrid` is configured via a TOML file (default: `config/tribrid.toml`).
//! See [`config`] for all available sections and [`config::load_config`]
//! for validation rules.

pub mod chat;
pub mod config;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod indexer;
pub mod migrate;
pub mod provider_router;
pub mod server;
pub mod sqlite_store;
pub mod trace_sink;

pub use tribrid_core::store;
