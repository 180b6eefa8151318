//! Schema-validated and plain-text model calls.
//!
//! Structured replies are validated by deserializing into the caller's type;
//! anything that does not fit becomes [`ChroniclerError::MalformedOutput`].

use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tracing::debug;

use chronicler_shared::{ChroniclerError, Result};

use crate::model::{LanguageModel, ModelRequest, TaskKind};

/// Run a structured call and deserialize the reply into `T`.
pub async fn invoke_structured<T>(
    model: &dyn LanguageModel,
    task: TaskKind,
    prompt: impl Into<String>,
) -> Result<T>
where
    T: DeserializeOwned + JsonSchema,
{
    let request = ModelRequest::structured::<T>(task, prompt)?;
    let reply = model.invoke(&request).await?;

    let json = extract_json(&reply.text).ok_or_else(|| {
        ChroniclerError::MalformedOutput(format!("{task}: reply contained no JSON"))
    })?;

    serde_json::from_str(json).map_err(|e| {
        debug!(%task, error = %e, reply = %json, "reply failed schema validation");
        ChroniclerError::MalformedOutput(format!("{task}: {e}"))
    })
}

/// Run a free-text call. Blank replies are malformed.
pub async fn invoke_text(
    model: &dyn LanguageModel,
    task: TaskKind,
    prompt: impl Into<String>,
) -> Result<String> {
    let reply = model.invoke(&ModelRequest::text(task, prompt)).await?;
    let text = strip_reasoning(&reply.text).trim();
    if text.is_empty() {
        return Err(ChroniclerError::MalformedOutput(format!("{task}: empty reply")));
    }
    Ok(text.to_string())
}

/// Locate the JSON value in a reply: the whole text, a fenced block, or the
/// outermost object/array.
pub fn extract_json(text: &str) -> Option<&str> {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").expect("valid regex")
    });

    let text = strip_reasoning(text).trim();
    if text.is_empty() {
        return None;
    }
    if text.starts_with('{') || text.starts_with('[') {
        if serde_json::from_str::<serde_json::Value>(text).is_ok() {
            return Some(text);
        }
    }

    if let Some(caps) = FENCE_RE.captures(text) {
        let inner = caps.get(1)?.as_str().trim();
        if !inner.is_empty() {
            return Some(inner);
        }
    }

    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Drop `<think>...</think>` preambles some reasoning models emit.
fn strip_reasoning(text: &str) -> &str {
    match text.rfind("</think>") {
        Some(idx) => &text[idx + "</think>".len()..],
        None => text,
    }
}
