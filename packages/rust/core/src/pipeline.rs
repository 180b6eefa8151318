//! End-to-end research run: request → orchestrator → structurer → output.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use chronicler_fetcher::{Fetcher, SourceCatalog};
use chronicler_llm::LanguageModel;
use chronicler_shared::{
    AppConfig, CategorizedKnowledge, ChroniclerError, ChronologyEvent, ResearchRequest, Result, RunId,
};

use crate::classifier::ChunkClassifier;
use crate::extractor::EventExtractor;
use crate::orchestrator::{FinishReason, Orchestrator, ResearchAction};
use crate::source::SourcePipeline;
use crate::structurer::ChronologyStructurer;
use crate::tokenizer::{Tokenizer, WordTokenizer};

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutput {
    pub run_id: RunId,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_question: Option<String>,
    pub model: String,
    /// Ordered by year, year-less events last.
    pub events: Vec<ChronologyEvent>,
    /// Consolidated categorized narrative the events were built from.
    pub narrative: CategorizedKnowledge,
    /// Source keys fetched during the run, in sorted order.
    pub used_sources: Vec<String>,
    pub iterations: u32,
    pub fetches: u32,
    pub finish_reason: FinishReason,
    pub conversation_summary: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once per orchestrator iteration with the chosen action.
    fn action(&self, iteration: u32, action: &ResearchAction);
    /// Called when a source has been merged.
    fn source_done(&self, source: &str, categories_updated: usize);
    /// Called when a source produced nothing usable.
    fn source_failed(&self, source: &str, reason: &str);
    /// Called when the run completes.
    fn done(&self, output: &ResearchOutput);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn action(&self, _iteration: u32, _action: &ResearchAction) {}
    fn source_done(&self, _source: &str, _categories_updated: usize) {}
    fn source_failed(&self, _source: &str, _reason: &str) {}
    fn done(&self, _output: &ResearchOutput) {}
}

/// Research entry point. Collaborators are injected so runs can be driven by
/// fakes.
pub struct Chronicler {
    model: Arc<dyn LanguageModel>,
    fetcher: Arc<dyn Fetcher>,
    tokenizer: Arc<dyn Tokenizer>,
    config: AppConfig,
    cancel: CancellationToken,
}

impl Chronicler {
    pub fn new(model: Arc<dyn LanguageModel>, fetcher: Arc<dyn Fetcher>, config: AppConfig) -> Self {
        Self {
            model,
            fetcher,
            tokenizer: Arc::new(WordTokenizer),
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Stop the run at the next planning step once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Research `request` and return the structured chronology.
    ///
    /// 1. Validate the request
    /// 2. Run the orchestrator until a stop condition
    /// 3. Structure the consolidated narrative once
    ///
    /// Only invalid input is an error; external failures degrade the result.
    #[instrument(skip_all, fields(subject = %request.subject))]
    pub async fn run(&self, request: &ResearchRequest, progress: &dyn ProgressReporter) -> Result<ResearchOutput> {
        let subject = request.subject.trim();
        if subject.is_empty() {
            return Err(ChroniclerError::invalid_input("subject must not be blank"));
        }
        let request = ResearchRequest {
            subject: subject.to_string(),
            research_question: request
                .research_question
                .as_deref()
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string),
        };

        let started_at = Utc::now();
        let run_id = RunId::new();
        info!(%run_id, model = self.model.model_id(), "starting research run");

        // --- Phase 1: Research loop ---
        progress.phase("Researching");
        let pipeline = &self.config.pipeline;
        let sources = SourcePipeline::new(
            self.fetcher.clone(),
            self.tokenizer.clone(),
            ChunkClassifier::new(
                self.model.clone(),
                pipeline.classify_concurrency,
                pipeline.max_chunks_per_source,
            ),
            EventExtractor::new(
                self.model.clone(),
                self.tokenizer.clone(),
                pipeline.extraction_chunk_size,
                pipeline.chunk_overlap,
                pipeline.max_extraction_chunks,
            ),
            pipeline.chunk_size,
            pipeline.chunk_overlap,
        );
        let orchestrator = Orchestrator::new(
            self.model.clone(),
            sources,
            SourceCatalog::new(self.config.sources.clone()),
            self.config.research.clone(),
            self.cancel.clone(),
        );
        let (state, finish_reason) = orchestrator.run(&request, progress).await;

        // --- Phase 2: Structure ---
        progress.phase("Structuring chronology");
        let events = ChronologyStructurer::new(self.model.clone())
            .structure(&request.subject, &state.existing_knowledge)
            .await;

        let output = ResearchOutput {
            run_id,
            subject: request.subject,
            research_question: request.research_question,
            model: self.model.model_id().to_string(),
            events,
            narrative: state.existing_knowledge,
            used_sources: state.used_sources.into_iter().collect(),
            iterations: state.iteration_count,
            fetches: state.fetch_count,
            finish_reason,
            conversation_summary: state.conversation_summary.render(),
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            %run_id,
            events = output.events.len(),
            %finish_reason,
            elapsed_ms = (output.finished_at - output.started_at).num_milliseconds(),
            "research run complete"
        );
        progress.done(&output);
        Ok(output)
    }
}
