//! Encyclopaedia Britannica source adapter.

use scraper::Html;
use url::Url;

use super::{ExtractedContent, SourceAdapter, first_match_html, first_text, host_matches, strip_elements};

const CHROME: &str = "nav, header, footer, aside, script, style, figure, \
    .marketing-content, .ad, .md-ad, .topic-links, .assemblies";

/// Extracts biography articles from britannica.com.
pub struct BritannicaAdapter;

impl SourceAdapter for BritannicaAdapter {
    fn detect(&self, _doc: &Html, url: &Url) -> bool {
        host_matches(url, "britannica.com")
    }

    fn extract_content(&self, doc: &Html) -> ExtractedContent {
        let html = first_match_html(doc, &[".topic-content", "article", "main"])
            .map(|html| strip_elements(&html, CHROME))
            .unwrap_or_default();

        ExtractedContent {
            html,
            title: first_text(doc, "h1"),
        }
    }

    fn name(&self) -> &str {
        "britannica"
    }
}
