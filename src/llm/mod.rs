//! LLM Layer - streamed chat completions over channel rows
//!
//! Flow:
//! 1. Rows are encoded as one user message each, after a fixed system prompt
//! 2. The request asks for a server-sent event stream
//! 3. Events are decoded incrementally and their fragments concatenated
//! 4. The finished output is reduced to one sanitised HTML document

pub mod request;
pub mod stream;
pub mod client;
pub mod sanitize;

pub use client::{CompletionClient, Generation, Renderer};
pub use request::{ChatMessage, ChatRequest};
pub use stream::{DecoderState, EventStream, SseDecoder, StreamEvent};
