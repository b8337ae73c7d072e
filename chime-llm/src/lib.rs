//! BYO-key completion client for chime.
//!
//! Pure HTTP client for OpenAI-compatible chat-completion APIs, plus the
//! `CompletionBackend` trait the engine consumes so providers can be swapped
//! or faked in tests.

mod client;
mod error;
mod openai;
mod types;

pub use client::{CompletionBackend, LlmClient};
pub use error::{LlmError, Result};
pub use types::{ChatMessage, Completion, CompletionRequest, Role, Usage};
