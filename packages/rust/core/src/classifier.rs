//! Chunk relevance classification.
//!
//! Each chunk is judged against a [`RelevanceTarget`]. Relevant chunks are
//! kept whole, partial chunks keep only the sentences the model selected (and
//! only those that really occur in the chunk), everything else is dropped.
//! Classification never fails: a broken call yields
//! [`ChunkClassification::Unknown`].

use std::sync::{Arc, LazyLock};

use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use chronicler_llm::{LanguageModel, TaskKind, invoke_structured};
use chronicler_shared::{Chunk, ChunkClassification, ResearchRequest};

use crate::prompts;

/// What a chunk must be about to be kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelevanceTarget {
    /// Life events of the subject.
    Subject { subject: String },
    /// Material answering a specific question about the subject.
    Question { subject: String, question: String },
}

impl RelevanceTarget {
    pub fn for_request(request: &ResearchRequest) -> Self {
        match request.research_question.as_deref().map(str::trim) {
            Some(question) if !question.is_empty() => Self::Question {
                subject: request.subject.clone(),
                question: question.to_string(),
            },
            _ => Self::Subject {
                subject: request.subject.clone(),
            },
        }
    }
}

/// The model's verdict on one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ClassifierVerdict {
    /// More than 80% of the chunk concerns the target.
    Relevant {
        /// Why the whole chunk is relevant.
        #[serde(default)]
        explanation: String,
    },
    /// The chunk mixes relevant and irrelevant material.
    Partial {
        /// Every relevant sentence, copied verbatim from the chunk.
        relevant_content: String,
        /// What was kept and what was discarded.
        #[serde(default)]
        explanation: String,
    },
    /// Nothing in the chunk concerns the target.
    Irrelevant {
        /// Why the chunk is irrelevant.
        #[serde(default)]
        explanation: String,
    },
}

/// Classifies chunks with bounded concurrency.
#[derive(Clone)]
pub struct ChunkClassifier {
    model: Arc<dyn LanguageModel>,
    concurrency: usize,
    max_chunks: usize,
}

impl ChunkClassifier {
    pub fn new(model: Arc<dyn LanguageModel>, concurrency: usize, max_chunks: usize) -> Self {
        Self {
            model,
            concurrency: concurrency.max(1),
            max_chunks: max_chunks.max(1),
        }
    }

    /// Classify one chunk, filling `classification` and `extracted_content`.
    pub async fn classify(&self, chunk: Chunk, target: &RelevanceTarget) -> Chunk {
        classify_chunk(self.model.as_ref(), chunk, target).await
    }

    /// Classify up to `max_chunks` chunks concurrently. Results keep the
    /// input order; chunks past the cap are dropped.
    #[instrument(skip_all, fields(chunks = chunks.len()))]
    pub async fn classify_all(&self, mut chunks: Vec<Chunk>, target: &RelevanceTarget) -> Vec<Chunk> {
        if chunks.len() > self.max_chunks {
            debug!(dropped = chunks.len() - self.max_chunks, "chunk cap reached");
            chunks.truncate(self.max_chunks);
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(chunks.len());

        for chunk in &chunks {
            let model = self.model.clone();
            let sem = semaphore.clone();
            let target = target.clone();
            let chunk = chunk.clone();

            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                classify_chunk(model.as_ref(), chunk, &target).await
            }));
        }

        let mut classified = Vec::with_capacity(chunks.len());
        for (handle, original) in handles.into_iter().zip(chunks) {
            match handle.await {
                Ok(chunk) => classified.push(chunk),
                Err(e) => {
                    warn!(index = original.sequence_index, error = %e, "classification task failed");
                    classified.push(unknown(original));
                }
            }
        }
        classified
    }
}

async fn classify_chunk(model: &dyn LanguageModel, mut chunk: Chunk, target: &RelevanceTarget) -> Chunk {
    let prompt = prompts::classify_chunk(target, &chunk.text);
    let verdict = match invoke_structured::<ClassifierVerdict>(model, TaskKind::ClassifyChunk, prompt).await {
        Ok(verdict) => verdict,
        Err(e) => {
            warn!(index = chunk.sequence_index, error = %e, "chunk classification failed");
            return unknown(chunk);
        }
    };

    match verdict {
        ClassifierVerdict::Relevant { .. } => {
            chunk.classification = ChunkClassification::Relevant;
            chunk.extracted_content = chunk.text.trim().to_string();
        }
        ClassifierVerdict::Partial { relevant_content, .. } => {
            let kept = verify_selection(&chunk.text, &relevant_content);
            if kept.is_empty() {
                debug!(index = chunk.sequence_index, "partial selection not found in chunk");
                return unknown(chunk);
            }
            chunk.classification = ChunkClassification::Partial;
            chunk.extracted_content = kept;
        }
        ClassifierVerdict::Irrelevant { explanation } => {
            debug!(index = chunk.sequence_index, %explanation, "chunk irrelevant");
            chunk.classification = ChunkClassification::Irrelevant;
            chunk.extracted_content.clear();
        }
    }
    chunk
}

fn unknown(mut chunk: Chunk) -> Chunk {
    chunk.classification = ChunkClassification::Unknown;
    chunk.extracted_content.clear();
    chunk
}

/// Keep only the sentences of `selection` that occur verbatim in `chunk`,
/// comparing with whitespace collapsed.
pub(crate) fn verify_selection(chunk: &str, selection: &str) -> String {
    static SENTENCE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^.!?\n]+(?:[.!?]+|$)").expect("valid regex"));

    let haystack = collapse_whitespace(chunk);
    SENTENCE_RE
        .find_iter(selection)
        .map(|m| collapse_whitespace(m.as_str()))
        .filter(|sentence| !sentence.is_empty() && haystack.contains(sentence.as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Kept content of classified chunks, in chunk order.
pub fn kept_content(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .filter(|c| c.classification.keeps_content() && !c.extracted_content.is_empty())
        .map(|c| c.extracted_content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::chunk_text;
    use crate::testing::ScriptedModel;
    use crate::tokenizer::WordTokenizer;
    use chronicler_shared::ChroniclerError;

    const CRITICISM: &str = "Critics have long debated the Notes. The algorithm in Note G is \
        read by some scholars as the first computer program, while others credit Babbage.";

    fn target() -> RelevanceTarget {
        RelevanceTarget::Subject {
            subject: "Ada Lovelace".into(),
        }
    }

    fn single(text: &str) -> Chunk {
        chunk_text(text, &WordTokenizer, 1000, 20).remove(0)
    }

    #[tokio::test]
    async fn relevant_chunk_is_kept_whole() {
        let model = Arc::new(ScriptedModel::new().reply(
            TaskKind::ClassifyChunk,
            r#"{"verdict": "relevant", "explanation": "birth and family"}"#,
        ));
        let classifier = ChunkClassifier::new(model, 2, 10);
        let chunk = classifier.classify(single("Ada was born in London in 1815. "), &target()).await;

        assert_eq!(chunk.classification, ChunkClassification::Relevant);
        assert_eq!(chunk.extracted_content, "Ada was born in London in 1815.");
    }

    #[tokio::test]
    async fn literary_criticism_is_irrelevant() {
        let model = Arc::new(ScriptedModel::new().reply(
            TaskKind::ClassifyChunk,
            r#"{"verdict": "irrelevant", "explanation": "Focuses only on criticism of her Notes."}"#,
        ));
        let classifier = ChunkClassifier::new(model.clone(), 2, 10);
        let chunk = classifier.classify(single(CRITICISM), &target()).await;

        assert_eq!(chunk.classification, ChunkClassification::Irrelevant);
        assert!(chunk.extracted_content.is_empty());
        assert_eq!(model.total_calls(), 1);
    }

    #[tokio::test]
    async fn partial_keeps_only_verbatim_sentences() {
        let text = "Ada married William King in 1835. \
            The Notes describe the Analytical Engine at length.\nShe had three children.";
        let reply = serde_json::json!({
            "verdict": "partial",
            "relevant_content": "Ada married William King in 1835. She had   three children. She loved horses.",
            "explanation": "kept marriage and children"
        });
        let model = Arc::new(ScriptedModel::new().reply(TaskKind::ClassifyChunk, reply.to_string()));
        let chunk = ChunkClassifier::new(model, 1, 10).classify(single(text), &target()).await;

        assert_eq!(chunk.classification, ChunkClassification::Partial);
        assert_eq!(
            chunk.extracted_content,
            "Ada married William King in 1835. She had three children."
        );
    }

    #[tokio::test]
    async fn paraphrased_partial_degrades_to_unknown() {
        let reply = r#"{"verdict": "partial", "relevant_content": "She wed a baron."}"#;
        let model = Arc::new(ScriptedModel::new().reply(TaskKind::ClassifyChunk, reply));
        let chunk = ChunkClassifier::new(model, 1, 10)
            .classify(single("Ada married William King in 1835."), &target())
            .await;

        assert_eq!(chunk.classification, ChunkClassification::Unknown);
        assert!(chunk.extracted_content.is_empty());
    }

    #[tokio::test]
    async fn failed_or_malformed_calls_are_unknown() {
        let model = Arc::new(
            ScriptedModel::new()
                .fail(TaskKind::ClassifyChunk, ChroniclerError::Network("reset".into()))
                .reply(TaskKind::ClassifyChunk, r#"{"verdict": "maybe"}"#),
        );
        let classifier = ChunkClassifier::new(model, 1, 10);

        for _ in 0..2 {
            let chunk = classifier.classify(single("Ada was born in 1815."), &target()).await;
            assert_eq!(chunk.classification, ChunkClassification::Unknown);
        }
    }

    #[tokio::test]
    async fn classify_all_keeps_order_and_caps_chunks() {
        let model = Arc::new(ScriptedModel::new().respond(TaskKind::ClassifyChunk, |request| {
            // Even-numbered words are relevant, odd are not.
            let relevant = ["w0 ", "w2 ", "w4 "].iter().any(|w| request.prompt.contains(&format!("<Text>\n{w}")));
            Ok(if relevant {
                r#"{"verdict": "relevant"}"#.to_string()
            } else {
                r#"{"verdict": "irrelevant"}"#.to_string()
            })
        }));
        let text = "w0 w1 w2 w3 w4 w5 w6";
        let chunks = chunk_text(text, &WordTokenizer, 1, 0);
        let classified = ChunkClassifier::new(model.clone(), 3, 5).classify_all(chunks, &target()).await;

        assert_eq!(classified.len(), 5);
        assert_eq!(model.calls(TaskKind::ClassifyChunk), 5);
        let indices: Vec<_> = classified.iter().map(|c| c.sequence_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(kept_content(&classified), "w0\n\nw2\n\nw4");
    }

    #[test]
    fn target_prefers_question() {
        let request = ResearchRequest::new("Ada Lovelace").with_question("  ");
        assert!(matches!(RelevanceTarget::for_request(&request), RelevanceTarget::Subject { .. }));

        let request = ResearchRequest::new("Ada Lovelace").with_question("Who taught her?");
        assert!(matches!(RelevanceTarget::for_request(&request), RelevanceTarget::Question { .. }));
    }
}
