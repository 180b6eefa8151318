//! Prompt text for every model task.

use std::collections::BTreeSet;

use chronicler_fetcher::SourceCandidate;
use chronicler_shared::{CategorizedKnowledge, Category};

use crate::classifier::RelevanceTarget;

/// Replacement shown to the model when a bucket or history is empty.
const NOTHING_YET: &str = "(nothing yet)";

fn or_placeholder(text: &str) -> &str {
    if text.trim().is_empty() { NOTHING_YET } else { text.trim() }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Inputs to the planner prompt.
pub(crate) struct PlannerContext<'a> {
    pub subject: &'a str,
    pub research_question: Option<&'a str>,
    pub knowledge: &'a CategorizedKnowledge,
    pub history: &'a str,
    pub candidates: &'a [SourceCandidate],
    pub used_sources: &'a BTreeSet<String>,
    pub enforce_alternation: bool,
    /// `"fetch"` or `"reflect"`, when there was a previous action.
    pub last_action: Option<&'a str>,
}

pub(crate) fn planner(ctx: &PlannerContext<'_>) -> String {
    let question = ctx
        .research_question
        .map(|q| format!("\nResearch question: {q}\n"))
        .unwrap_or_default();

    let mut sources = String::new();
    for candidate in ctx.candidates {
        let status = if ctx.used_sources.contains(&candidate.key) { "already used" } else { "available" };
        sources.push_str(&format!("- {} ({status}): {}\n", candidate.name, candidate.url));
    }
    if sources.is_empty() {
        sources.push_str(NOTHING_YET);
    }

    let cycle = if ctx.enforce_alternation {
        let next = match ctx.last_action {
            Some("fetch") => "Your last action was `fetch`, so this action MUST be `reflect`.",
            Some("reflect") => "Your last action was `reflect`, so this action MUST be `fetch` or `finish`.",
            _ => "This is the first action; start with `fetch` or `reflect`.",
        };
        format!(
            "Fetch and reflect actions MUST alternate: never fetch twice in a row and never reflect twice in a row. {next}\n"
        )
    } else {
        String::new()
    };

    format!(
        r#"You are a meticulous research agent building a complete event timeline for {subject}.
{question}
Choose exactly ONE next action:
- `fetch`: read one source to fill gaps in the timeline. Give its `url` and optionally a `focus` describing the gap it should fill. Only use available sources.
- `reflect`: analyse progress. The `reflection` must have three parts:
  1. Last Result: what the last fetch added, if anything.
  2. Top Priority Gap: the single most important missing piece of the timeline.
  3. Planned Query: the exact source and focus for the next fetch.
- `finish`: stop researching. Only choose this when the timeline has no significant gaps or no available sources remain. Give a short `reason`.
{cycle}
<Known Events>
{knowledge}
</Known Events>

<Sources>
{sources}
</Sources>

<History>
{history}
</History>

Respond with the JSON object for your single action and nothing else."#,
        subject = ctx.subject,
        knowledge = or_placeholder(&ctx.knowledge.render()),
        history = or_placeholder(ctx.history),
    )
}

/// Gap analysis run when a reflection arrives empty.
pub(crate) fn gap_analysis(subject: &str, knowledge: &CategorizedKnowledge) -> String {
    format!(
        r#"Analyze the following events about {subject} and identify only the 2 biggest gaps in information. Be brief and general.

Events:
{events}

Example gaps:
- Missing details about a time period in their life

Gaps:"#,
        events = or_placeholder(&knowledge.render()),
    )
}

// ---------------------------------------------------------------------------
// Source pipeline
// ---------------------------------------------------------------------------

pub(crate) fn classify_chunk(target: &RelevanceTarget, chunk: &str) -> String {
    let focus = match target {
        RelevanceTarget::Subject { subject } => format!(
            "the LIFE of {subject}: relationships, moves, education, health, finances, military service, career changes, birth and death"
        ),
        RelevanceTarget::Question { subject, question } => {
            format!("the following question about {subject}: {question}")
        }
    };

    format!(
        r#"You are a meticulous biographical event extractor. Decide how much of the text below concerns {focus}.

Keep life events. Discard summaries, plots or analysis of works, reception of the work, references after death (except the death itself), and general historical context.

Verdicts:
- `relevant`: the vast majority (more than 80%) of the text is about the target. The whole text is kept.
- `partial`: the text mixes relevant and irrelevant material. Copy EVERY relevant sentence into `relevant_content` word for word. Do not paraphrase.
- `irrelevant`: nothing in the text is about the target.

<Text>
{chunk}
</Text>

Respond with the JSON verdict only."#
    )
}

pub(crate) fn extract_events(
    subject: &str,
    research_question: Option<&str>,
    existing: &CategorizedKnowledge,
    content: &str,
) -> String {
    let mut categories = String::new();
    for category in Category::ALL {
        categories.push_str(&format!("- `{}`: {}\n", category.as_str(), category.description()));
    }
    let question = research_question
        .map(|q| format!(" Pay particular attention to: {q}."))
        .unwrap_or_default();

    format!(
        r#"You are extracting life events of {subject} from source text.{question}

Sort every event into one of these categories:
{categories}
Rules:
- Write one event per line as a bullet: `- Event details.`
- Keep dates, places and people exactly as the text states them.
- Preserve chronological order where it can be determined.
- Only report events that are NOT already known, or that add detail to a known event.
- If the text adds nothing new, respond with status `no_new_information`.

<Known Events>
{known}
</Known Events>

<Text>
{content}
</Text>

Respond with the JSON object only."#,
        known = or_placeholder(&existing.render()),
    )
}

// ---------------------------------------------------------------------------
// Consolidation
// ---------------------------------------------------------------------------

pub(crate) const EXISTING_OPEN: &str = "<existing_events>";
pub(crate) const EXISTING_CLOSE: &str = "</existing_events>";
pub(crate) const NEW_OPEN: &str = "<new_events>";
pub(crate) const NEW_CLOSE: &str = "</new_events>";

pub(crate) fn merge_category(subject: &str, category: Category, existing: &str, new: &str) -> String {
    format!(
        r#"You are merging the "{title}" events ({description}) of {subject}.

Rules:
1. Always include every original event exactly as written.
2. Add a new event only if it is not already covered. If it adds detail to an original event, extend that event instead of repeating it.
3. Remove duplicate phrasing.
4. Output one event per line as `- Event details.`
5. No commentary, headings or explanations.

{EXISTING_OPEN}
{existing}
{EXISTING_CLOSE}

{NEW_OPEN}
{new}
{NEW_CLOSE}

Merged events:"#,
        title = category.title(),
        description = category.description(),
        existing = or_placeholder(existing),
        new = new.trim(),
    )
}

// ---------------------------------------------------------------------------
// Structuring
// ---------------------------------------------------------------------------

pub(crate) fn structure_chronology(subject: &str, narrative: &CategorizedKnowledge) -> String {
    format!(
        r#"Convert the events of {subject}'s life below into structured JSON.

For every distinct event:
- `name`: a short descriptive title, e.g. "Birth of {subject}".
- `description`: a clear, concise summary of what happened.
- `date.year`: the year as a number. For estimates or ranges ("circa 1912", "between 1920 and 1924") give your best estimate and copy the original wording into `date.note`. Use null only when no estimate is possible.
- `location`: where it happened, or null when not mentioned.

List each real-world event once, even if it appears in several categories.

<Events>
{events}
</Events>

Respond with the JSON object only."#,
        events = narrative.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planner_marks_used_sources_and_alternation() {
        let candidates = vec![SourceCandidate {
            name: "Wikipedia".into(),
            url: url::Url::parse("https://en.wikipedia.org/wiki/Ada_Lovelace").unwrap(),
            key: "wikipedia.org".into(),
        }];
        let used = BTreeSet::from(["wikipedia.org".to_string()]);
        let knowledge = CategorizedKnowledge::default();
        let prompt = planner(&PlannerContext {
            subject: "Ada Lovelace",
            research_question: None,
            knowledge: &knowledge,
            history: "",
            candidates: &candidates,
            used_sources: &used,
            enforce_alternation: true,
            last_action: Some("fetch"),
        });

        assert!(prompt.contains("Wikipedia (already used)"));
        assert!(prompt.contains("MUST be `reflect`"));
        assert!(prompt.contains("<History>\n(nothing yet)"));
    }

    #[test]
    fn merge_prompt_wraps_sections() {
        let prompt = merge_category("Ada Lovelace", Category::Early, "- Born 1815", "- Tutored by De Morgan\n");
        assert!(prompt.contains("<existing_events>\n- Born 1815\n</existing_events>"));
        assert!(prompt.contains("<new_events>\n- Tutored by De Morgan\n</new_events>"));
        assert!(prompt.contains("Early life"));
    }

    #[test]
    fn classify_prompt_names_question() {
        let target = RelevanceTarget::Question {
            subject: "Ada Lovelace".into(),
            question: "Who taught her mathematics?".into(),
        };
        assert!(classify_chunk(&target, "text").contains("Who taught her mathematics?"));
    }
}
