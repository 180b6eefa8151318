//! Event extraction from kept source content.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use chronicler_llm::{LanguageModel, TaskKind, invoke_structured};
use chronicler_shared::{CategorizedKnowledge, Category, bullet_lines};

use crate::chunker::chunk_text;
use crate::prompts;
use crate::tokenizer::Tokenizer;

/// Bucket text the model uses to say "nothing here".
const EMPTY_MARKERS: &[&str] = &["no new information", "none", "n/a", "nothing new"];

/// Reply schema for one extraction call.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ExtractionReply {
    /// New or more detailed events, one `- bullet` per line in each bucket.
    Events {
        /// Childhood, upbringing, family background, and education.
        #[serde(default)]
        early: String,
        /// Relationships, marriages, children, residence, and health.
        #[serde(default)]
        personal: String,
        /// Professional journey, works, and achievements.
        #[serde(default)]
        career: String,
        /// Reception, honours, death, and influence.
        #[serde(default)]
        legacy: String,
    },
    /// The text adds nothing to the known events.
    NoNewInformation,
}

/// Result of extracting one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Nothing new; merging this is a no-op.
    NoNewInformation,
    Events(CategorizedKnowledge),
}

impl Extraction {
    /// Categorized text to merge; empty for [`Extraction::NoNewInformation`].
    pub fn knowledge(&self) -> Option<&CategorizedKnowledge> {
        match self {
            Self::NoNewInformation => None,
            Self::Events(knowledge) => Some(knowledge),
        }
    }
}

/// Turns kept source text into categorized event bullets.
pub struct EventExtractor {
    model: Arc<dyn LanguageModel>,
    tokenizer: Arc<dyn Tokenizer>,
    chunk_size: usize,
    chunk_overlap: usize,
    max_chunks: usize,
}

impl EventExtractor {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        tokenizer: Arc<dyn Tokenizer>,
        chunk_size: usize,
        chunk_overlap: usize,
        max_chunks: usize,
    ) -> Self {
        Self {
            model,
            tokenizer,
            chunk_size,
            chunk_overlap,
            max_chunks: max_chunks.max(1),
        }
    }

    /// Extract events from `content` that are not already in `existing`.
    ///
    /// Long content is split into extraction chunks handled one after the
    /// other. A chunk whose call times out or exhausts its retries is passed
    /// through unprocessed into the personal bucket; a chunk with malformed
    /// output contributes nothing.
    #[instrument(skip_all, fields(chars = content.len()))]
    pub async fn extract(
        &self,
        subject: &str,
        research_question: Option<&str>,
        content: &str,
        existing: &CategorizedKnowledge,
    ) -> Extraction {
        if content.trim().is_empty() {
            return Extraction::NoNewInformation;
        }

        let pieces = chunk_text(content, self.tokenizer.as_ref(), self.chunk_size, self.chunk_overlap);
        if pieces.len() > self.max_chunks {
            debug!(dropped = pieces.len() - self.max_chunks, "extraction chunk cap reached");
        }

        let mut collected = Collected::new(existing);
        for piece in pieces.iter().take(self.max_chunks) {
            let prompt = prompts::extract_events(subject, research_question, existing, &piece.text);
            match invoke_structured::<ExtractionReply>(self.model.as_ref(), TaskKind::ExtractEvents, prompt).await {
                Ok(ExtractionReply::Events {
                    early,
                    personal,
                    career,
                    legacy,
                }) => {
                    collected.add(Category::Early, &early);
                    collected.add(Category::Personal, &personal);
                    collected.add(Category::Career, &career);
                    collected.add(Category::Legacy, &legacy);
                }
                Ok(ExtractionReply::NoNewInformation) => {
                    debug!(index = piece.sequence_index, "no new information");
                }
                Err(e) if e.is_transient() => {
                    warn!(index = piece.sequence_index, error = %e, "extraction unavailable, passing text through");
                    collected.pass_through(&piece.text);
                }
                Err(e) => {
                    warn!(index = piece.sequence_index, error = %e, "extraction output discarded");
                }
            }
        }

        collected.finish()
    }
}

/// Per-category accumulator that drops repeated and already-known bullets.
struct Collected {
    known: Vec<String>,
    buckets: CategorizedKnowledge,
}

impl Collected {
    fn new(existing: &CategorizedKnowledge) -> Self {
        let known = existing
            .iter()
            .flat_map(|(_, text)| bullet_lines(text))
            .map(|b| normalize(&b))
            .collect();
        Self {
            known,
            buckets: CategorizedKnowledge::default(),
        }
    }

    fn add(&mut self, category: Category, text: &str) {
        if is_empty_marker(text) {
            return;
        }
        let mut bucket = self.buckets.get(category).to_string();
        for bullet in bullet_lines(text) {
            let key = normalize(&bullet);
            if key.is_empty() || is_empty_marker(&bullet) || self.known.contains(&key) {
                continue;
            }
            self.known.push(key);
            if !bucket.is_empty() {
                bucket.push('\n');
            }
            bucket.push_str("- ");
            bucket.push_str(&bullet);
        }
        self.buckets.set(category, bucket);
    }

    fn pass_through(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let mut bucket = self.buckets.get(Category::Personal).to_string();
        if !bucket.is_empty() {
            bucket.push('\n');
        }
        bucket.push_str(text);
        self.buckets.set(Category::Personal, bucket);
    }

    fn finish(self) -> Extraction {
        if self.buckets.is_empty() {
            Extraction::NoNewInformation
        } else {
            Extraction::Events(self.buckets)
        }
    }
}

fn is_empty_marker(text: &str) -> bool {
    let text = text.trim().trim_end_matches('.').trim().to_lowercase();
    text.is_empty() || EMPTY_MARKERS.contains(&text.as_str())
}

fn normalize(bullet: &str) -> String {
    bullet
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches('.')
        .to_lowercase()
}
