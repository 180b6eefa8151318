//! Markdown rendering of a finished run.

use std::fmt::Write;

use crate::pipeline::ResearchOutput;

/// Render `output` as a Markdown timeline followed by the narrative.
pub fn render_markdown(output: &ResearchOutput) -> String {
    let mut md = String::new();

    let _ = writeln!(md, "# {}\n", output.subject);
    if let Some(question) = &output.research_question {
        let _ = writeln!(md, "> {question}\n");
    }
    let _ = writeln!(
        md,
        "_Run {} with `{}`: {} iterations, {} fetches, finished ({})._\n",
        output.run_id, output.model, output.iterations, output.fetches, output.finish_reason
    );

    md.push_str("## Timeline\n\n");
    if output.events.is_empty() {
        md.push_str("No events found.\n");
    }
    for event in &output.events {
        let year = event.date.year.map_or_else(|| "Undated".to_string(), |y| y.to_string());
        let _ = write!(md, "- **{year}**: {}", event.name);
        if let Some(location) = &event.location {
            let _ = write!(md, " ({location})");
        }
        if !event.description.is_empty() {
            let _ = write!(md, ". {}", event.description);
        }
        if let Some(note) = &event.date.note {
            let _ = write!(md, " _[{note}]_");
        }
        md.push('\n');
    }

    let narrative = output.narrative.render();
    if !narrative.is_empty() {
        md.push_str("\n# Narrative\n\n");
        md.push_str(&narrative);
        md.push('\n');
    }

    if !output.used_sources.is_empty() {
        md.push_str("\n## Sources\n\n");
        for source in &output.used_sources {
            let _ = writeln!(md, "- {source}");
        }
    }

    md
}
