//! One source through fetch → chunk → classify → extract.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};
use url::Url;

use chronicler_fetcher::Fetcher;
use chronicler_shared::{CategorizedKnowledge, ChunkClassification};

use crate::chunker::chunk_text;
use crate::classifier::{ChunkClassifier, RelevanceTarget, kept_content};
use crate::extractor::{EventExtractor, Extraction};
use crate::tokenizer::Tokenizer;

/// Why a source produced nothing usable. Counts as a failed action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceFailure {
    #[error("no content could be fetched")]
    NoContent,

    #[error("all {chunks} chunks failed classification")]
    Unclassified { chunks: usize },
}

/// Counts and extracted events for one processed source.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub url: Url,
    pub chars: usize,
    pub chunks: usize,
    pub relevant: usize,
    pub partial: usize,
    pub irrelevant: usize,
    pub unknown: usize,
    pub extraction: Extraction,
}

/// Per-source sub-pipeline.
pub struct SourcePipeline {
    fetcher: Arc<dyn Fetcher>,
    tokenizer: Arc<dyn Tokenizer>,
    classifier: ChunkClassifier,
    extractor: EventExtractor,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl SourcePipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        tokenizer: Arc<dyn Tokenizer>,
        classifier: ChunkClassifier,
        extractor: EventExtractor,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        Self {
            fetcher,
            tokenizer,
            classifier,
            extractor,
            chunk_size,
            chunk_overlap,
        }
    }

    /// Fetch `url` and extract events not already in `existing`.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn process(
        &self,
        url: &Url,
        target: &RelevanceTarget,
        existing: &CategorizedKnowledge,
    ) -> Result<SourceOutcome, SourceFailure> {
        let text = match self.fetcher.fetch(url).await {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Err(SourceFailure::NoContent),
        };

        let chunks = chunk_text(&text, self.tokenizer.as_ref(), self.chunk_size, self.chunk_overlap);
        let classified = self.classifier.classify_all(chunks, target).await;

        let count = |kind: ChunkClassification| classified.iter().filter(|c| c.classification == kind).count();
        let (relevant, partial, irrelevant, unknown) = (
            count(ChunkClassification::Relevant),
            count(ChunkClassification::Partial),
            count(ChunkClassification::Irrelevant),
            count(ChunkClassification::Unknown),
        );
        if unknown == classified.len() {
            return Err(SourceFailure::Unclassified { chunks: unknown });
        }

        info!(
            chars = text.len(),
            chunks = classified.len(),
            relevant,
            partial,
            irrelevant,
            unknown,
            "source classified"
        );

        let (subject, question) = match target {
            RelevanceTarget::Subject { subject } => (subject.as_str(), None),
            RelevanceTarget::Question { subject, question } => (subject.as_str(), Some(question.as_str())),
        };
        let kept = kept_content(&classified);
        let extraction = self.extractor.extract(subject, question, &kept, existing).await;

        Ok(SourceOutcome {
            url: url.clone(),
            chars: text.len(),
            chunks: classified.len(),
            relevant,
            partial,
            irrelevant,
            unknown,
            extraction,
        })
    }
}
