//! The model seam: request/reply types and the [`LanguageModel`] trait.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use chronicler_shared::{ChroniclerError, Result};

// ---------------------------------------------------------------------------
// Task kinds
// ---------------------------------------------------------------------------

/// What a model call is for. Used for tracing and by test doubles to route
/// scripted replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    PlanAction,
    ClassifyChunk,
    ExtractEvents,
    MergeCategory,
    AnalyzeGaps,
    StructureChronology,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanAction => "plan_action",
            Self::ClassifyChunk => "classify_chunk",
            Self::ExtractEvents => "extract_events",
            Self::MergeCategory => "merge_category",
            Self::AnalyzeGaps => "analyze_gaps",
            Self::StructureChronology => "structure_chronology",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Request / reply
// ---------------------------------------------------------------------------

/// JSON Schema the reply must satisfy.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

impl ResponseSchema {
    /// Generate the schema for `T` with `schemars`.
    pub fn of<T: JsonSchema>(name: impl Into<String>) -> Result<Self> {
        let schema = serde_json::to_value(schemars::schema_for!(T))
            .map_err(|e| ChroniclerError::parse(format!("schema generation failed: {e}")))?;
        Ok(Self {
            name: name.into(),
            schema,
        })
    }
}

/// One prompt sent to the model.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub task: TaskKind,
    pub prompt: String,
    /// Present for structured calls.
    pub schema: Option<ResponseSchema>,
}

impl ModelRequest {
    /// A free-text request.
    pub fn text(task: TaskKind, prompt: impl Into<String>) -> Self {
        Self {
            task,
            prompt: prompt.into(),
            schema: None,
        }
    }

    /// A request whose reply must deserialize into `T`.
    pub fn structured<T: JsonSchema>(task: TaskKind, prompt: impl Into<String>) -> Result<Self> {
        Ok(Self {
            task,
            prompt: prompt.into(),
            schema: Some(ResponseSchema::of::<T>(task.as_str())?),
        })
    }
}

/// Raw model output plus usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReply {
    pub text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

impl ModelReply {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Inference capability. Implementations must be safe to call concurrently.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one prompt. Transient failures surface as errors for which
    /// [`ChroniclerError::is_transient`] is true.
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelReply>;

    /// Model identifier, for logs and run metadata.
    fn model_id(&self) -> &str;
}

/// Cut `content` to `max_chars` characters, marking the cut.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        None => content.to_string(),
        Some((idx, _)) => {
            format!("{}\n\n[... content truncated for model context window ...]", &content[..idx])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct Verdict {
        relevant: bool,
        explanation: String,
    }

    #[test]
    fn task_kind_as_str() {
        assert_eq!(TaskKind::PlanAction.as_str(), "plan_action");
        assert_eq!(TaskKind::StructureChronology.to_string(), "structure_chronology");
    }

    #[test]
    fn structured_request_carries_schema() {
        let request = ModelRequest::structured::<Verdict>(TaskKind::ClassifyChunk, "classify").unwrap();
        let schema = request.schema.expect("schema");
        assert_eq!(schema.name, "classify_chunk");
        assert_eq!(schema.schema["type"], "object");
        assert!(schema.schema["properties"]["explanation"].is_object());
    }

    #[test]
    fn text_request_has_no_schema() {
        let request = ModelRequest::text(TaskKind::MergeCategory, "merge");
        assert!(request.schema.is_none());
    }

    #[test]
    fn truncate_short_content() {
        assert_eq!(truncate_content("short text", 100), "short text");
    }

    #[test]
    fn truncate_long_content() {
        let content = "é".repeat(200);
        let result = truncate_content(&content, 100);
        assert!(result.starts_with(&"é".repeat(100)));
        assert!(result.contains("truncated"));
    }
}
