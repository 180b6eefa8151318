//! Wikipedia (MediaWiki) source adapter.

use scraper::{Html, Selector};
use url::Url;

use super::{ExtractedContent, SourceAdapter, first_match_html, first_text, host_matches, strip_elements};

/// MediaWiki furniture that never carries article prose.
const CHROME: &str = "style, script, .mw-editsection, .navbox, .vertical-navbox, .hatnote, \
    .metadata, .ambox, .sidebar, .toc, #toc, .reflist, .mw-references-wrap, .reference, \
    .thumb, figure, .shortdescription, .noprint";

/// Extracts article bodies from Wikipedia and other MediaWiki sites.
pub struct WikipediaAdapter;

impl SourceAdapter for WikipediaAdapter {
    fn detect(&self, doc: &Html, url: &Url) -> bool {
        if host_matches(url, "wikipedia.org") {
            return true;
        }

        // <meta name="generator" content="MediaWiki 1.43">
        let Ok(meta_sel) = Selector::parse(r#"meta[name="generator"]"#) else {
            return false;
        };
        doc.select(&meta_sel).any(|el| {
            el.value()
                .attr("content")
                .is_some_and(|c| c.to_lowercase().contains("mediawiki"))
        })
    }

    fn extract_content(&self, doc: &Html) -> ExtractedContent {
        let html = first_match_html(
            doc,
            &["#mw-content-text .mw-parser-output", "#mw-content-text", "#bodyContent"],
        )
        .map(|html| strip_elements(&html, CHROME))
        .unwrap_or_default();

        ExtractedContent {
            html,
            title: first_text(doc, "#firstHeading").or_else(|| first_text(doc, "h1")),
        }
    }

    fn name(&self) -> &str {
        "wikipedia"
    }
}
