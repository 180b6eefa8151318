//! The research state machine.
//!
//! ```text
//! Planning ──► Acting(action) ──► Consolidating ──► Planning
//!    │              │  (reflect) ───────────────────► Planning
//!    ▼              ▼
//! Finished(reason) ◄┘
//! ```
//!
//! Each trip through `Planning` is one iteration and selects exactly one
//! [`ResearchAction`]. Budgets, cancellation and repeated failures are
//! checked before the planner is consulted, so a run always terminates
//! within `max_iterations` whatever the model says.

use std::collections::BTreeSet;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use chronicler_fetcher::{SourceCatalog, source_key};
use chronicler_llm::{LanguageModel, TaskKind, invoke_structured, invoke_text};
use chronicler_shared::{CategorizedKnowledge, Category, ResearchConfig, ResearchRequest};

use crate::classifier::RelevanceTarget;
use crate::extractor::Extraction;
use crate::merge::MergeEngine;
use crate::pipeline::ProgressReporter;
use crate::prompts::{self, PlannerContext};
use crate::source::{SourceOutcome, SourcePipeline};
use crate::summary::ConversationSummary;

// ---------------------------------------------------------------------------
// Actions and outcomes
// ---------------------------------------------------------------------------

/// The one thing the orchestrator does in an iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResearchAction {
    /// Read one source.
    Fetch {
        /// Source URL to read.
        url: String,
        /// The gap this source should fill.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        focus: Option<String>,
    },
    /// Analyse progress and plan the next fetch.
    Reflect {
        /// Last result, top priority gap, and planned query.
        #[serde(default)]
        reflection: String,
    },
    /// Stop researching.
    Finish {
        /// Why the timeline is complete.
        #[serde(default)]
        reason: String,
    },
}

impl ResearchAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::Reflect { .. } => "reflect",
            Self::Finish { .. } => "finish",
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The planner chose to finish.
    Requested,
    IterationBudget,
    FetchBudget,
    /// Every catalog source has been used.
    SourcesExhausted,
    ConsecutiveFailures,
    Cancelled,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::IterationBudget => "iteration_budget",
            Self::FetchBudget => "fetch_budget",
            Self::SourcesExhausted => "sources_exhausted",
            Self::ConsecutiveFailures => "consecutive_failures",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable run state, owned by the orchestrator loop.
#[derive(Debug, Clone)]
pub struct ResearchState {
    pub subject: String,
    pub research_question: Option<String>,
    pub existing_knowledge: CategorizedKnowledge,
    /// Source keys already fetched (successfully or not).
    pub used_sources: BTreeSet<String>,
    pub iteration_count: u32,
    pub fetch_count: u32,
    pub consecutive_failures: u32,
    pub last_action: Option<ResearchAction>,
    pub conversation_summary: ConversationSummary,
}

impl ResearchState {
    pub fn new(request: &ResearchRequest, max_summary_entries: usize) -> Self {
        Self {
            subject: request.subject.clone(),
            research_question: request.research_question.clone(),
            existing_knowledge: CategorizedKnowledge::default(),
            used_sources: BTreeSet::new(),
            iteration_count: 0,
            fetch_count: 0,
            consecutive_failures: 0,
            last_action: None,
            conversation_summary: ConversationSummary::new(max_summary_entries),
        }
    }

    fn target(&self) -> RelevanceTarget {
        RelevanceTarget::for_request(&ResearchRequest {
            subject: self.subject.clone(),
            research_question: self.research_question.clone(),
        })
    }
}

enum Phase {
    Planning,
    Acting(ResearchAction),
    Consolidating { key: String, outcome: SourceOutcome },
    Finished(FinishReason),
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives planning, fetching and consolidation until a stop condition.
pub struct Orchestrator {
    model: Arc<dyn LanguageModel>,
    sources: SourcePipeline,
    merger: MergeEngine,
    catalog: SourceCatalog,
    config: ResearchConfig,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        sources: SourcePipeline,
        catalog: SourceCatalog,
        config: ResearchConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            merger: MergeEngine::new(model.clone()),
            model,
            sources,
            catalog,
            config,
            cancel,
        }
    }

    /// Run to completion, returning the final state and why it stopped.
    #[instrument(skip_all, fields(subject = %request.subject))]
    pub async fn run(
        &self,
        request: &ResearchRequest,
        progress: &dyn ProgressReporter,
    ) -> (ResearchState, FinishReason) {
        let mut state = ResearchState::new(request, self.config.max_summary_entries);
        let mut phase = Phase::Planning;

        loop {
            phase = match phase {
                Phase::Planning => self.plan(&mut state, progress).await,
                Phase::Acting(action) => self.act(&mut state, action, progress).await,
                Phase::Consolidating { key, outcome } => {
                    self.consolidate(&mut state, key, outcome, progress).await
                }
                Phase::Finished(reason) => {
                    info!(
                        %reason,
                        iterations = state.iteration_count,
                        fetches = state.fetch_count,
                        bullets = state.existing_knowledge.total_bullets(),
                        "research finished"
                    );
                    return (state, reason);
                }
            };
        }
    }

    async fn plan(&self, state: &mut ResearchState, progress: &dyn ProgressReporter) -> Phase {
        if self.cancel.is_cancelled() {
            state.conversation_summary.record("Cancelled");
            return Phase::Finished(FinishReason::Cancelled);
        }
        if state.iteration_count >= self.config.max_iterations {
            return Phase::Finished(FinishReason::IterationBudget);
        }
        if state.consecutive_failures >= self.config.max_consecutive_failures.max(1) {
            return Phase::Finished(FinishReason::ConsecutiveFailures);
        }
        state.iteration_count += 1;

        let candidates = self.catalog.candidates(&state.subject);
        let history = state.conversation_summary.render();
        let prompt = prompts::planner(&PlannerContext {
            subject: &state.subject,
            research_question: state.research_question.as_deref(),
            knowledge: &state.existing_knowledge,
            history: &history,
            candidates: &candidates,
            used_sources: &state.used_sources,
            enforce_alternation: self.config.enforce_alternation,
            last_action: state.last_action.as_ref().map(ResearchAction::kind),
        });

        let action = match invoke_structured::<ResearchAction>(self.model.as_ref(), TaskKind::PlanAction, prompt).await
        {
            Ok(action) => action,
            Err(e) => {
                warn!(iteration = state.iteration_count, error = %e, "planner failed, using fallback action");
                self.fallback_action(state)
            }
        };
        let action = self.alternate(state, action);

        debug!(iteration = state.iteration_count, action = action.kind(), "action selected");
        progress.action(state.iteration_count, &action);
        Phase::Acting(action)
    }

    /// Deterministic choice when the planner is unavailable.
    fn fallback_action(&self, state: &ResearchState) -> ResearchAction {
        match state.last_action {
            Some(ResearchAction::Fetch { .. }) if self.config.enforce_alternation => ResearchAction::Reflect {
                reflection: String::new(),
            },
            // An empty URL resolves to the next unused source, or exhaustion.
            _ => ResearchAction::Fetch {
                url: String::new(),
                focus: None,
            },
        }
    }

    /// Coerce repeated fetches or reflections when alternation is enforced.
    fn alternate(&self, state: &ResearchState, action: ResearchAction) -> ResearchAction {
        if !self.config.enforce_alternation {
            return action;
        }
        match (&state.last_action, &action) {
            (Some(ResearchAction::Fetch { .. }), ResearchAction::Fetch { .. }) => {
                debug!("fetch after fetch, reflecting instead");
                ResearchAction::Reflect {
                    reflection: String::new(),
                }
            }
            (Some(ResearchAction::Reflect { .. }), ResearchAction::Reflect { .. }) => {
                debug!("reflect after reflect, fetching instead");
                ResearchAction::Fetch {
                    url: String::new(),
                    focus: None,
                }
            }
            _ => action,
        }
    }

    async fn act(&self, state: &mut ResearchState, action: ResearchAction, progress: &dyn ProgressReporter) -> Phase {
        match action {
            ResearchAction::Finish { reason } => {
                let reason = reason.trim();
                state
                    .conversation_summary
                    .record(if reason.is_empty() { "Finished".to_string() } else { format!("Finished: {reason}") });
                state.last_action = Some(ResearchAction::Finish {
                    reason: reason.to_string(),
                });
                Phase::Finished(FinishReason::Requested)
            }
            ResearchAction::Reflect { reflection } => {
                self.reflect(state, reflection).await;
                Phase::Planning
            }
            ResearchAction::Fetch { url, focus } => self.fetch(state, url, focus, progress).await,
        }
    }

    async fn reflect(&self, state: &mut ResearchState, reflection: String) {
        let reflection = reflection.trim();
        let text = if reflection.is_empty() {
            let prompt = prompts::gap_analysis(&state.subject, &state.existing_knowledge);
            match invoke_text(self.model.as_ref(), TaskKind::AnalyzeGaps, prompt).await {
                Ok(gaps) => format!("Gap analysis: {gaps}"),
                Err(e) => {
                    warn!(error = %e, "gap analysis failed");
                    "Gap analysis unavailable".to_string()
                }
            }
        } else {
            reflection.to_string()
        };

        state.conversation_summary.record(format!("Reflected: {text}"));
        state.last_action = Some(ResearchAction::Reflect { reflection: text });
    }

    async fn fetch(
        &self,
        state: &mut ResearchState,
        requested: String,
        focus: Option<String>,
        progress: &dyn ProgressReporter,
    ) -> Phase {
        if state.fetch_count >= self.config.max_fetches {
            state.conversation_summary.record("Fetch budget reached");
            return Phase::Finished(FinishReason::FetchBudget);
        }
        let Some((url, key)) = self.resolve_fetch(state, &requested) else {
            state.conversation_summary.record("No unused sources remain");
            return Phase::Finished(FinishReason::SourcesExhausted);
        };

        state.used_sources.insert(key.clone());
        state.fetch_count += 1;
        state.last_action = Some(ResearchAction::Fetch {
            url: url.to_string(),
            focus,
        });
        progress.phase(&format!("Reading {key}"));

        match self.sources.process(&url, &state.target(), &state.existing_knowledge).await {
            Ok(outcome) => Phase::Consolidating { key, outcome },
            Err(failure) => {
                state.consecutive_failures += 1;
                warn!(source = %key, %failure, consecutive = state.consecutive_failures, "source failed");
                state
                    .conversation_summary
                    .record(format!("Fetch of {key} failed: {failure}"));
                progress.source_failed(&key, &failure.to_string());
                Phase::Planning
            }
        }
    }

    /// The URL to fetch for `requested`: itself when valid, unused and (if
    /// restricted) in the catalog; otherwise the next unused candidate.
    fn resolve_fetch(&self, state: &ResearchState, requested: &str) -> Option<(Url, String)> {
        let requested = requested.trim();
        match Url::parse(requested) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => match source_key(&url) {
                Some(key) if state.used_sources.contains(&key) => {
                    debug!(source = %key, "source already used");
                }
                Some(key) if self.config.restrict_to_catalog && !self.catalog.keys().contains(&key) => {
                    debug!(source = %key, "source outside catalog");
                }
                Some(key) => return Some((url, key)),
                None => {}
            },
            _ if requested.is_empty() => {}
            _ => debug!(url = requested, "planner URL invalid"),
        }

        self.catalog
            .next_unused(&state.subject, &state.used_sources)
            .map(|candidate| (candidate.url, candidate.key))
    }

    async fn consolidate(
        &self,
        state: &mut ResearchState,
        key: String,
        outcome: SourceOutcome,
        progress: &dyn ProgressReporter,
    ) -> Phase {
        let merged = self
            .merger
            .merge(&state.subject, &state.existing_knowledge, &outcome.extraction)
            .await;
        let updated = merged.merged_categories();
        state.existing_knowledge = merged.knowledge;
        state.consecutive_failures = 0;

        let entry = match outcome.extraction {
            Extraction::NoNewInformation => format!("Fetched {key}: no new information"),
            Extraction::Events(_) => {
                format!("Fetched {key}: {updated} of {} categories updated", Category::ALL.len())
            }
        };
        state.conversation_summary.record(entry);
        progress.source_done(&key, updated);
        Phase::Planning
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ChunkClassifier;
    use crate::extractor::EventExtractor;
    use crate::pipeline::SilentProgress;
    use crate::testing::{MapFetcher, ScriptedModel, union_merge};
    use crate::tokenizer::{Tokenizer, WordTokenizer};
    use chronicler_shared::{ChroniclerError, SourceTemplate};

    const WIKI: &str = "https://en.wikipedia.org/wiki/Ada_Lovelace";
    const BRITANNICA: &str = "https://www.britannica.com/biography/Ada-Lovelace";

    fn config(enforce_alternation: bool) -> ResearchConfig {
        ResearchConfig {
            max_iterations: 10,
            max_fetches: 5,
            max_consecutive_failures: 3,
            enforce_alternation,
            restrict_to_catalog: true,
            max_summary_entries: 20,
        }
    }

    fn templates(hosts: &[&str]) -> Vec<SourceTemplate> {
        hosts
            .iter()
            .map(|host| SourceTemplate {
                name: host.to_string(),
                url_template: format!("https://{host}/wiki/{{underscore}}"),
            })
            .collect()
    }

    fn orchestrator(
        model: Arc<ScriptedModel>,
        fetcher: Arc<MapFetcher>,
        catalog: SourceCatalog,
        config: ResearchConfig,
        cancel: CancellationToken,
    ) -> Orchestrator {
        let tokenizer: Arc<dyn Tokenizer> = Arc::new(WordTokenizer);
        let sources = SourcePipeline::new(
            fetcher,
            tokenizer.clone(),
            ChunkClassifier::new(model.clone(), 2, 20),
            EventExtractor::new(model.clone(), tokenizer, 2000, 20, 8),
            1000,
            20,
        );
        Orchestrator::new(model, sources, catalog, config, cancel)
    }

    fn default_catalog() -> SourceCatalog {
        SourceCatalog::new(chronicler_shared::AppConfig::default().sources)
    }

    fn request() -> ResearchRequest {
        ResearchRequest::new("Ada Lovelace")
    }

    fn fetch(url: &str) -> String {
        serde_json::json!({"action": "fetch", "url": url}).to_string()
    }

    fn biography_model() -> ScriptedModel {
        ScriptedModel::new()
            .always(TaskKind::ClassifyChunk, r#"{"verdict": "relevant"}"#)
            .always(
                TaskKind::ExtractEvents,
                r#"{"status": "events", "early": "- Born 10 December 1815 in London."}"#,
            )
            .respond(TaskKind::MergeCategory, union_merge)
            .always(TaskKind::AnalyzeGaps, "- Missing details about her marriage")
    }

    #[tokio::test]
    async fn stops_at_iteration_budget_when_model_never_finishes() {
        let model = Arc::new(
            ScriptedModel::new().always(TaskKind::PlanAction, r#"{"action": "reflect", "reflection": "thinking"}"#),
        );
        let orchestrator = orchestrator(
            model.clone(),
            Arc::new(MapFetcher::new()),
            default_catalog(),
            ResearchConfig {
                max_iterations: 4,
                ..config(false)
            },
            CancellationToken::new(),
        );

        let (state, reason) = orchestrator.run(&request(), &SilentProgress).await;

        assert_eq!(reason, FinishReason::IterationBudget);
        assert_eq!(state.iteration_count, 4);
        assert_eq!(model.calls(TaskKind::PlanAction), 4);
        assert_eq!(state.conversation_summary.len(), 4);
    }

    #[tokio::test]
    async fn never_fetches_a_source_key_twice() {
        let model = Arc::new(biography_model().always(TaskKind::PlanAction, fetch(WIKI)));
        let fetcher = Arc::new(
            MapFetcher::new()
                .page(WIKI, "Ada was born in London in 1815.")
                .page(BRITANNICA, "Ada Lovelace was born in 1815."),
        );
        let orchestrator = orchestrator(
            model.clone(),
            fetcher.clone(),
            default_catalog(),
            config(false),
            CancellationToken::new(),
        );

        let (state, reason) = orchestrator.run(&request(), &SilentProgress).await;

        assert_eq!(reason, FinishReason::SourcesExhausted);
        let fetched: Vec<String> = fetcher.fetched().iter().map(|u| u.to_string()).collect();
        assert_eq!(fetched, vec![WIKI, BRITANNICA]);
        let keys: BTreeSet<_> = fetcher.fetched().iter().filter_map(source_key).collect();
        assert_eq!(keys.len(), fetched.len());
        assert_eq!(state.used_sources, keys);
        assert_eq!(state.fetch_count, 2);
    }

    #[tokio::test]
    async fn alternation_turns_repeated_fetches_into_reflections() {
        let model = Arc::new(biography_model().always(TaskKind::PlanAction, fetch(WIKI)));
        let fetcher = Arc::new(
            MapFetcher::new()
                .page(WIKI, "Ada was born in London in 1815.")
                .page(BRITANNICA, "Ada Lovelace was born in 1815."),
        );
        let orchestrator = orchestrator(
            model.clone(),
            fetcher.clone(),
            default_catalog(),
            config(true),
            CancellationToken::new(),
        );

        let (state, reason) = orchestrator.run(&request(), &SilentProgress).await;

        // fetch, reflect, fetch, reflect, then no source left.
        assert_eq!(reason, FinishReason::SourcesExhausted);
        assert_eq!(state.iteration_count, 5);
        assert_eq!(fetcher.fetched().len(), 2);
        assert_eq!(model.calls(TaskKind::AnalyzeGaps), 2);

        let history = state.conversation_summary.render();
        assert!(history.contains("2. Reflected: Gap analysis: - Missing details about her marriage"));
        assert!(history.contains("3. Fetched britannica.com"));
    }

    #[tokio::test]
    async fn consecutive_failures_end_the_run() {
        let model = Arc::new(ScriptedModel::new().respond(TaskKind::PlanAction, |_| {
            Ok(r#"{"action": "fetch", "url": "https://example.org/nowhere"}"#.to_string())
        }));
        let catalog = SourceCatalog::new(templates(&["a.org", "b.org", "c.org", "d.org", "e.org"]));
        let orchestrator = orchestrator(
            model.clone(),
            Arc::new(MapFetcher::new()),
            catalog,
            config(false),
            CancellationToken::new(),
        );

        let (state, reason) = orchestrator.run(&request(), &SilentProgress).await;

        assert_eq!(reason, FinishReason::ConsecutiveFailures);
        assert_eq!(state.fetch_count, 3);
        assert_eq!(state.consecutive_failures, 3);
        let used: Vec<_> = state.used_sources.iter().map(String::as_str).collect();
        assert_eq!(used, vec!["a.org", "b.org", "c.org"]);
    }

    #[tokio::test]
    async fn fetch_budget_is_enforced() {
        let model = Arc::new(biography_model().always(TaskKind::PlanAction, r#"{"action": "fetch", "url": ""}"#));
        let fetcher = Arc::new(MapFetcher::new().page(WIKI, "Ada was born in London in 1815."));
        let orchestrator = orchestrator(
            model,
            fetcher.clone(),
            default_catalog(),
            ResearchConfig {
                max_fetches: 1,
                ..config(false)
            },
            CancellationToken::new(),
        );

        let (state, reason) = orchestrator.run(&request(), &SilentProgress).await;
        assert_eq!(reason, FinishReason::FetchBudget);
        assert_eq!(fetcher.fetched().len(), 1);
        assert_eq!(state.existing_knowledge.early, "- Born 10 December 1815 in London.");
    }

    #[tokio::test]
    async fn irrelevant_source_leaves_knowledge_untouched() {
        let model = Arc::new(
            ScriptedModel::new()
                .reply(TaskKind::PlanAction, fetch(WIKI))
                .reply(TaskKind::PlanAction, r#"{"action": "finish", "reason": "nothing more"}"#)
                .always(
                    TaskKind::ClassifyChunk,
                    r#"{"verdict": "irrelevant", "explanation": "literary criticism"}"#,
                ),
        );
        let fetcher = Arc::new(MapFetcher::new().page(
            WIKI,
            "Scholars still argue over whether the Notes show original mathematical insight.",
        ));
        let orchestrator = orchestrator(
            model.clone(),
            fetcher,
            default_catalog(),
            config(true),
            CancellationToken::new(),
        );

        let (state, reason) = orchestrator.run(&request(), &SilentProgress).await;

        assert_eq!(reason, FinishReason::Requested);
        assert!(state.existing_knowledge.is_empty());
        assert_eq!(model.calls(TaskKind::ExtractEvents), 0);
        assert_eq!(model.calls(TaskKind::MergeCategory), 0);
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.conversation_summary.render().contains("no new information"));
    }

    #[tokio::test]
    async fn planner_failure_falls_back_to_catalog() {
        let model = Arc::new(
            biography_model()
                .fail(TaskKind::PlanAction, ChroniclerError::MalformedOutput("garbage".into()))
                .reply(TaskKind::PlanAction, r#"{"action": "finish"}"#),
        );
        let fetcher = Arc::new(MapFetcher::new().page(WIKI, "Ada was born in London in 1815."));
        let orchestrator = orchestrator(
            model,
            fetcher.clone(),
            default_catalog(),
            config(false),
            CancellationToken::new(),
        );

        let (state, reason) = orchestrator.run(&request(), &SilentProgress).await;
        assert_eq!(reason, FinishReason::Requested);
        assert_eq!(fetcher.fetched()[0].as_str(), WIKI);
        assert!(!state.existing_knowledge.is_empty());
    }

    #[tokio::test]
    async fn cancellation_stops_before_planning() {
        let model = Arc::new(ScriptedModel::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let orchestrator = orchestrator(
            model.clone(),
            Arc::new(MapFetcher::new()),
            default_catalog(),
            config(true),
            cancel,
        );

        let (state, reason) = orchestrator.run(&request(), &SilentProgress).await;
        assert_eq!(reason, FinishReason::Cancelled);
        assert_eq!(state.iteration_count, 0);
        assert_eq!(model.total_calls(), 0);
    }

    #[test]
    fn actions_deserialize_from_tagged_json() {
        let action: ResearchAction =
            serde_json::from_str(r#"{"action": "fetch", "url": "https://x.org", "focus": "marriage"}"#).unwrap();
        assert_eq!(
            action,
            ResearchAction::Fetch {
                url: "https://x.org".into(),
                focus: Some("marriage".into())
            }
        );
        let action: ResearchAction = serde_json::from_str(r#"{"action": "reflect"}"#).unwrap();
        assert_eq!(action.kind(), "reflect");
        assert!(serde_json::from_str::<ResearchAction>(r#"{"action": "search"}"#).is_err());
    }
}
