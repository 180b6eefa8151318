//! Generic (fallback) source adapter.
//!
//! Used when no source-specific adapter is detected. Uses readability
//! heuristics to find the main content area.

use scraper::Html;
use url::Url;

use super::{ExtractedContent, SourceAdapter, first_match_html, first_text, strip_elements};

const CHROME: &str = "nav, header, footer, aside, script, style, form, .sidebar, .nav, .menu";

/// Generic adapter that works on arbitrary HTML pages.
pub struct GenericAdapter;

impl SourceAdapter for GenericAdapter {
    fn detect(&self, _doc: &Html, _url: &Url) -> bool {
        true
    }

    fn extract_content(&self, doc: &Html) -> ExtractedContent {
        let html = first_match_html(
            doc,
            &["article", "main", r#"[role="main"]"#, ".content", "body"],
        )
        .map(|html| strip_elements(&html, CHROME))
        .unwrap_or_default();

        ExtractedContent {
            html,
            title: first_text(doc, "h1").or_else(|| first_text(doc, "title")),
        }
    }

    fn name(&self) -> &str {
        "generic"
    }
}
