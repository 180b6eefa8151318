//! Turns the consolidated narrative into an ordered list of identified events.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use chronicler_llm::{LanguageModel, TaskKind, invoke_structured};
use chronicler_shared::{CategorizedKnowledge, ChronologyDate, ChronologyEvent, bullet_lines};

use crate::prompts;

/// Note attached to events whose year could not be estimated.
pub const DATE_UNKNOWN: &str = "date unknown";

/// Words kept from a bullet when naming a fallback event.
const FALLBACK_NAME_WORDS: usize = 8;

static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(1[0-9]{3}|20[0-9]{2})\b").expect("valid regex"));

static APPROXIMATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:c\.|ca\.|circa|about|around|approximately|between|before|after|early|late|mid)\s*(?:the\s+)?(?:1[0-9]{3}|20[0-9]{2})s?(?:\s*(?:-|–|and|to)\s*(?:1[0-9]{3}|20[0-9]{2}))?|\b(?:1[0-9]{3}|20[0-9]{2})\s*(?:-|–)\s*(?:1[0-9]{3}|20[0-9]{2})\b",
    )
    .expect("valid regex")
});

/// Reply schema for the structuring call.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct StructuredChronology {
    /// One entry per distinct life event.
    pub events: Vec<StructuredEvent>,
}

/// One event as the model describes it, before ids and ordering.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct StructuredEvent {
    /// Short descriptive title, e.g. "Birth of Ada Lovelace".
    pub name: String,
    /// What happened.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub date: ChronologyDate,
    /// Where it happened, if mentioned.
    #[serde(default)]
    pub location: Option<String>,
}

/// Runs once per research run, after the orchestrator finishes.
pub struct ChronologyStructurer {
    model: Arc<dyn LanguageModel>,
}

impl ChronologyStructurer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Structure `narrative` into events sorted by year.
    ///
    /// Falls back to one event per narrative bullet when the model call fails
    /// or returns no events.
    #[instrument(skip_all, fields(subject = %subject, bullets = narrative.total_bullets()))]
    pub async fn structure(&self, subject: &str, narrative: &CategorizedKnowledge) -> Vec<ChronologyEvent> {
        if narrative.is_empty() {
            return Vec::new();
        }

        let prompt = prompts::structure_chronology(subject, narrative);
        let events = match invoke_structured::<StructuredChronology>(
            self.model.as_ref(),
            TaskKind::StructureChronology,
            prompt,
        )
        .await
        {
            Ok(chronology) if !chronology.events.is_empty() => chronology.events,
            Ok(_) => {
                warn!("structuring returned no events, using narrative bullets");
                fallback_events(narrative)
            }
            Err(e) => {
                warn!(error = %e, "structuring failed, using narrative bullets");
                fallback_events(narrative)
            }
        };

        let chronology = finalize(events);
        info!(events = chronology.len(), "chronology structured");
        chronology
    }
}

/// Assign ids, fill missing years, collapse duplicates, and sort by year.
pub fn finalize(events: Vec<StructuredEvent>) -> Vec<ChronologyEvent> {
    let mut seen: HashSet<(String, Option<i32>)> = HashSet::new();
    let mut assigned: HashSet<String> = HashSet::new();
    let mut next_suffix: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(events.len());

    for event in events {
        let name = clean(&event.name);
        let description = clean(&event.description);
        let name = if name.is_empty() { leading_words(&description) } else { name };
        if name.is_empty() {
            continue;
        }

        let date = complete_date(event.date, &[&description, &name]);
        let base = slugify(&name);
        if !seen.insert((base.clone(), date.year)) {
            continue;
        }

        let id = unique_id(base, &mut assigned, &mut next_suffix);

        out.push(ChronologyEvent {
            id,
            name,
            description,
            date,
            location: event.location.map(|l| clean(&l)).filter(|l| !l.is_empty()),
        });
    }

    // Stable: events in the same year keep their input order.
    out.sort_by_key(|e| (e.date.year.is_none(), e.date.year));
    out
}

/// `base`, or `base_N` with the smallest free `N >= 2`.
///
/// Checked against every id handed out so far, so a suffixed id never
/// shadows a slug that is naturally `move_2`.
fn unique_id(base: String, assigned: &mut HashSet<String>, next_suffix: &mut HashMap<String, usize>) -> String {
    if assigned.insert(base.clone()) {
        return base;
    }
    let n = next_suffix.entry(base.clone()).or_insert(2);
    loop {
        let candidate = format!("{base}_{n}");
        *n += 1;
        if assigned.insert(candidate.clone()) {
            return candidate;
        }
    }
}

/// One event per narrative bullet, named after its first words.
pub fn fallback_events(narrative: &CategorizedKnowledge) -> Vec<StructuredEvent> {
    narrative
        .iter()
        .flat_map(|(_, text)| bullet_lines(text))
        .map(|bullet| StructuredEvent {
            name: leading_words(&bullet),
            date: ChronologyDate::default(),
            location: None,
            description: bullet,
        })
        .collect()
}

fn complete_date(mut date: ChronologyDate, sources: &[&str]) -> ChronologyDate {
    date.note = date.note.map(|n| clean(&n)).filter(|n| !n.is_empty());
    if date.year.is_some() {
        return date;
    }

    let texts: Vec<&str> = date.note.as_deref().into_iter().chain(sources.iter().copied()).collect();
    date.year = texts.iter().find_map(|text| infer_year(text));
    if date.note.is_none() {
        date.note = match date.year {
            Some(_) => texts.iter().find_map(|text| approximate_note(text)),
            None => Some(DATE_UNKNOWN.to_string()),
        };
    }
    date
}

/// First plausible four-digit year in `text`.
pub fn infer_year(text: &str) -> Option<i32> {
    YEAR_RE.find(text).and_then(|m| m.as_str().parse().ok())
}

/// Approximate-date wording such as "c. 1840" or "between 1840 and 1842".
pub fn approximate_note(text: &str) -> Option<String> {
    APPROXIMATE_RE.find(text).map(|m| m.as_str().to_string())
}

/// Lowercase underscore slug; `"event"` when nothing alphanumeric remains.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_end_matches('_');
    if slug.is_empty() { "event".to_string() } else { slug.to_string() }
}

fn leading_words(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().take(FALLBACK_NAME_WORDS).collect();
    words.join(" ").trim_end_matches([',', ';', ':', '.']).to_string()
}

fn clean(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;
    use chronicler_shared::ChroniclerError;

    fn event(name: &str, year: Option<i32>, description: &str) -> StructuredEvent {
        StructuredEvent {
            name: name.into(),
            description: description.into(),
            date: ChronologyDate { year, note: None },
            location: None,
        }
    }

    fn ada_narrative() -> CategorizedKnowledge {
        CategorizedKnowledge {
            early: "- Born Augusta Ada Byron on 10 December 1815 in London.".into(),
            personal: "- Born Augusta Ada Byron on 10 December 1815 in London.".into(),
            career: "- Published her translation of Menabrea's article with extensive Notes in 1843.".into(),
            legacy: "- Died of uterine cancer on 27 November 1852 in Marylebone, London.".into(),
        }
    }

    #[test]
    fn slugify_names() {
        assert_eq!(slugify("Birth of Ada Lovelace"), "birth_of_ada_lovelace");
        assert_eq!(slugify("  Marriage -- to William King! "), "marriage_to_william_king");
        assert_eq!(slugify("Gödel's Theorem"), "gödel_s_theorem");
        assert_eq!(slugify("***"), "event");
    }

    #[test]
    fn year_and_note_inference() {
        assert_eq!(infer_year("Moved to London c. 1840."), Some(1840));
        assert_eq!(infer_year("Event 12345 and 999"), None);
        assert_eq!(approximate_note("Moved to London c. 1840."), Some("c. 1840".into()));
        assert_eq!(
            approximate_note("Studied between 1829 and 1833 with tutors"),
            Some("between 1829 and 1833".into())
        );
        assert_eq!(approximate_note("Toured Europe 1840–1842"), Some("1840–1842".into()));
        assert_eq!(approximate_note("Born in 1815"), None);
    }

    #[test]
    fn finalize_orders_years_and_makes_unique_ids() {
        let events = vec![
            event("Death", Some(1852), "Died in London."),
            event("Unknown trip", None, "Travelled abroad."),
            event("Move", None, "Moved to Ockham c. 1840."),
            event("Birth", Some(1815), "Born in London."),
            event("Move", Some(1845), "Moved again."),
        ];
        let chronology = finalize(events);

        let years: Vec<_> = chronology.iter().map(|e| e.date.year).collect();
        assert_eq!(years, vec![Some(1815), Some(1840), Some(1845), Some(1852), None]);

        let ids: Vec<_> = chronology.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["birth", "move", "move_2", "death", "unknown_trip"]);
        assert_eq!(chronology[1].date.note.as_deref(), Some("c. 1840"));
        assert_eq!(chronology[4].date.note.as_deref(), Some(DATE_UNKNOWN));

        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
        assert!(ids.iter().all(|id| !id.is_empty()));
    }

    #[test]
    fn finalize_collapses_same_event_same_year() {
        let events = vec![
            event("Birth of Ada", Some(1815), "Born in London."),
            event("Birth of  Ada", Some(1815), "Born to Lord Byron."),
            event("Birth of Ada", Some(1816), "A different claim."),
        ];
        let chronology = finalize(events);
        assert_eq!(chronology.len(), 2);
        assert_eq!(chronology[0].description, "Born in London.");
        assert_eq!(chronology[1].id, "birth_of_ada_2");
    }

    #[test]
    fn suffixed_ids_never_collide_with_natural_slugs() {
        let events = vec![
            event("Move", Some(1840), "Moved to Ockham."),
            event("Move", Some(1845), "Moved to London."),
            event("Move 2", Some(1850), "Moved a third time."),
            event("Move 2", Some(1851), "Moved a fourth time."),
            event("Move", Some(1852), "Moved once more."),
        ];
        let chronology = finalize(events);

        let ids: Vec<_> = chronology.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["move", "move_2", "move_2_2", "move_2_3", "move_3"]);
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn ids_stay_unique_across_generated_name_sets() {
        let names = ["Move", "Move 2", "Move 3", "Move_2", "move 2 2", "Birth", "Birth 2"];
        for len in 1..=names.len() {
            for offset in 0..names.len() {
                let events: Vec<_> = (0..len * 3)
                    .map(|i| {
                        let name = names[(i + offset) % names.len()];
                        event(name, Some(1800 + i as i32), "Something happened.")
                    })
                    .collect();
                let chronology = finalize(events);

                let ids: HashSet<_> = chronology.iter().map(|e| e.id.clone()).collect();
                assert_eq!(ids.len(), chronology.len(), "duplicate id for len={len} offset={offset}");
                assert!(chronology.windows(2).all(|w| w[0].date.year <= w[1].date.year));
            }
        }
    }

    #[tokio::test]
    async fn ada_lovelace_structured_path() {
        let reply = serde_json::json!({
            "events": [
                {"name": "Death of Ada Lovelace", "description": "Died of uterine cancer.", "date": {"year": 1852}, "location": "Marylebone, London"},
                {"name": "Birth of Ada Lovelace", "description": "Born Augusta Ada Byron.", "date": {"year": 1815}, "location": "London"},
                {"name": "Publication of the Notes", "description": "Published her translation with Notes.", "date": {"year": 1843}},
                {"name": "Birth of Ada Lovelace", "description": "Born to Lord Byron.", "date": {"year": 1815}, "location": "London"}
            ]
        });
        let model = Arc::new(ScriptedModel::new().reply(TaskKind::StructureChronology, reply.to_string()));
        let chronology = ChronologyStructurer::new(model)
            .structure("Ada Lovelace", &ada_narrative())
            .await;

        let summary: Vec<_> = chronology.iter().map(|e| (e.id.as_str(), e.date.year)).collect();
        assert_eq!(
            summary,
            vec![
                ("birth_of_ada_lovelace", Some(1815)),
                ("publication_of_the_notes", Some(1843)),
                ("death_of_ada_lovelace", Some(1852)),
            ]
        );
        assert_eq!(chronology[0].location.as_deref(), Some("London"));
    }

    #[tokio::test]
    async fn ada_lovelace_fallback_path() {
        let model = Arc::new(ScriptedModel::new().fail(
            TaskKind::StructureChronology,
            ChroniclerError::MalformedOutput("not json".into()),
        ));
        let chronology = ChronologyStructurer::new(model)
            .structure("Ada Lovelace", &ada_narrative())
            .await;

        let years: Vec<_> = chronology.iter().map(|e| e.date.year).collect();
        assert_eq!(years, vec![Some(1815), Some(1843), Some(1852)]);
        assert_eq!(chronology[0].id, "born_augusta_ada_byron_on_10_december_1815");
        assert!(chronology[1].description.contains("Menabrea"));
    }

    #[tokio::test]
    async fn empty_narrative_skips_the_model() {
        let model = Arc::new(ScriptedModel::new());
        let chronology = ChronologyStructurer::new(model.clone())
            .structure("Ada Lovelace", &CategorizedKnowledge::default())
            .await;
        assert!(chronology.is_empty());
        assert_eq!(model.total_calls(), 0);
    }
}
