//! Category-scoped consolidation of new events into accumulated knowledge.
//!
//! The four categories merge concurrently and independently. A merge never
//! loses an existing bullet: anything the model dropped is restored, and a
//! failed call leaves the category as it was.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use chronicler_llm::{LanguageModel, TaskKind, invoke_text};
use chronicler_shared::{CategorizedKnowledge, Category, bullet_lines};

use crate::extractor::Extraction;
use crate::prompts;

/// Share of an old bullet's significant words that must appear in one merged
/// bullet for it to count as retained.
const RETENTION_THRESHOLD: f64 = 0.8;

const STOPWORDS: &[&str] = &[
    "the", "and", "was", "were", "for", "with", "her", "his", "she", "him", "their", "from", "that", "this",
    "into", "had", "has", "who", "which", "are", "its", "also",
];

/// What happened to one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStatus {
    /// Nothing old, nothing new.
    Skipped,
    /// No new text; the old value was kept without a call.
    Unchanged,
    /// Consolidated by the model; `restored` old bullets were put back.
    Merged { restored: usize },
    /// The call failed; the old value was kept.
    FellBack,
}

/// Consolidated knowledge plus per-category status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub knowledge: CategorizedKnowledge,
    pub statuses: Vec<(Category, MergeStatus)>,
}

impl MergeOutcome {
    /// Categories consolidated by the model.
    pub fn merged_categories(&self) -> usize {
        self.statuses
            .iter()
            .filter(|(_, status)| matches!(status, MergeStatus::Merged { .. }))
            .count()
    }
}

/// Folds extracted events into existing knowledge, one call per category.
pub struct MergeEngine {
    model: Arc<dyn LanguageModel>,
}

impl MergeEngine {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Merge `extraction` into `existing`.
    ///
    /// [`Extraction::NoNewInformation`] returns `existing` unchanged without
    /// calling the model.
    #[instrument(skip_all, fields(subject = %subject))]
    pub async fn merge(&self, subject: &str, existing: &CategorizedKnowledge, extraction: &Extraction) -> MergeOutcome {
        let Some(new) = extraction.knowledge() else {
            return MergeOutcome {
                knowledge: existing.clone(),
                statuses: Category::ALL.iter().map(|&c| (c, MergeStatus::Unchanged)).collect(),
            };
        };

        let (early, personal, career, legacy) = tokio::join!(
            self.merge_category(subject, Category::Early, existing.get(Category::Early), new.get(Category::Early)),
            self.merge_category(
                subject,
                Category::Personal,
                existing.get(Category::Personal),
                new.get(Category::Personal)
            ),
            self.merge_category(subject, Category::Career, existing.get(Category::Career), new.get(Category::Career)),
            self.merge_category(subject, Category::Legacy, existing.get(Category::Legacy), new.get(Category::Legacy)),
        );

        let mut knowledge = CategorizedKnowledge::default();
        let mut statuses = Vec::with_capacity(Category::ALL.len());
        for (category, (text, status)) in Category::ALL.into_iter().zip([early, personal, career, legacy]) {
            knowledge.set(category, text);
            statuses.push((category, status));
        }
        MergeOutcome { knowledge, statuses }
    }

    async fn merge_category(&self, subject: &str, category: Category, old: &str, new: &str) -> (String, MergeStatus) {
        match (old.trim().is_empty(), new.trim().is_empty()) {
            (true, true) => return (old.to_string(), MergeStatus::Skipped),
            (_, true) => return (old.to_string(), MergeStatus::Unchanged),
            _ => {}
        }

        let prompt = prompts::merge_category(subject, category, old, new);
        match invoke_text(self.model.as_ref(), TaskKind::MergeCategory, prompt).await {
            Ok(merged) => {
                let mut bullets = bullet_lines(&merged);
                if bullets.is_empty() {
                    warn!(%category, "merge reply had no events, keeping old value");
                    return (old.to_string(), MergeStatus::FellBack);
                }
                let restored = restore_missing(&bullet_lines(old), &mut bullets);
                if restored > 0 {
                    warn!(%category, restored, "merge dropped existing events, restored them");
                }
                debug!(%category, bullets = bullets.len(), "category merged");
                (render_bullets(&bullets), MergeStatus::Merged { restored })
            }
            Err(e) => {
                warn!(%category, error = %e, "merge failed, keeping old value");
                (old.to_string(), MergeStatus::FellBack)
            }
        }
    }
}

/// Append every old bullet that `merged` no longer contains. Returns how many
/// were appended.
fn restore_missing(old: &[String], merged: &mut Vec<String>) -> usize {
    let mut restored = 0;
    for bullet in old {
        if !is_retained(bullet, merged) {
            merged.push(bullet.clone());
            restored += 1;
        }
    }
    restored
}

fn is_retained(bullet: &str, merged: &[String]) -> bool {
    let needle = bullet.to_lowercase();
    let needle = needle.trim_end_matches('.');
    if merged.iter().any(|m| m.to_lowercase().contains(needle)) {
        return true;
    }

    let words = significant_words(bullet);
    if words.is_empty() {
        return false;
    }
    merged.iter().any(|m| {
        let candidate = significant_words(m);
        let found = words.iter().filter(|w| candidate.contains(*w)).count();
        found as f64 / words.len() as f64 >= RETENTION_THRESHOLD
    })
}

fn significant_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| (w.len() >= 3 || w.chars().all(|c| c.is_ascii_digit())) && !w.is_empty())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn render_bullets(bullets: &[String]) -> String {
    bullets.iter().map(|b| format!("- {b}")).collect::<Vec<_>>().join("\n")
}
