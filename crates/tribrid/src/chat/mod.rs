//! Chat orchestration: prompt assembly, provider-routed generation,
//! and SSE envelope construction.

pub mod generation;
pub mod orchestrator;

pub use generation::{generate_chat_text, stream_chat_text, ImageAttachment};
pub use orchestrator::{chat_once, chat_stream, ChatOutcome, ChatRequest, SseEvent};
