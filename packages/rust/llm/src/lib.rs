//! Language model access for Chronicler.
//!
//! This crate provides:
//! - [`LanguageModel`], the inference seam every pipeline stage calls through
//! - [`OpenRouterClient`], an OpenAI-compatible chat-completions client
//! - [`RetryingModel`], bounded retries, per-call timeouts, and call spacing
//! - [`invoke_structured`] / [`invoke_text`], schema-validated and plain calls

pub mod model;
pub mod openrouter;
pub mod retry;
pub mod structured;

pub use model::{LanguageModel, ModelReply, ModelRequest, ResponseSchema, TaskKind, truncate_content};
pub use openrouter::OpenRouterClient;
pub use retry::{RetryPolicy, RetryingModel};
pub use structured::{extract_json, invoke_structured, invoke_text};
