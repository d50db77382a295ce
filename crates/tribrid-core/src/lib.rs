//! # tribrid-core
//!
//! Shared, WASM-safe logic for the tri-brid retrieval engine: tokenizer,
//! chunker, late-chunking pooling math, data models, store contract,
//! per-leg retrieval, fusion/shaping, configuration snapshot, and trace
//! data model.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. It compiles to both native targets and
//! `wasm32-unknown-unknown`.

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod late_chunk;
pub mod models;
pub mod retrieval;
pub mod store;
pub mod tokenizer;
pub mod trace;
