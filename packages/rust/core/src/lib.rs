//! Research orchestration and event consolidation for Chronicler.
//!
//! This crate ties the fetcher and model seams together into a research run:
//! chunk → classify → extract → merge, repeated under the orchestrator's
//! budgets, then structured into a chronology once (see [`Chronicler::run`]).

pub mod chunker;
pub mod classifier;
pub mod extractor;
pub mod merge;
pub mod orchestrator;
pub mod pipeline;
mod prompts;
pub mod report;
pub mod source;
pub mod structurer;
pub mod summary;
pub mod tokenizer;

#[cfg(test)]
mod testing;

pub use chunker::chunk_text;
pub use classifier::{ChunkClassifier, ClassifierVerdict, RelevanceTarget, kept_content};
pub use extractor::{EventExtractor, Extraction};
pub use merge::{MergeEngine, MergeOutcome, MergeStatus};
pub use orchestrator::{FinishReason, Orchestrator, ResearchAction, ResearchState};
pub use pipeline::{Chronicler, ProgressReporter, ResearchOutput, SilentProgress};
pub use report::render_markdown;
pub use source::{SourceFailure, SourceOutcome, SourcePipeline};
pub use structurer::{ChronologyStructurer, StructuredChronology, StructuredEvent};
pub use summary::ConversationSummary;
pub use tokenizer::{Tokenizer, WordTokenizer};
