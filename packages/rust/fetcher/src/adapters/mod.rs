//! Source adapter trait and built-in adapters for article extraction.
//!
//! Adapters recognise specific biography sources (Wikipedia, Britannica)
//! and pull the article body out of the page, dropping navigation boxes,
//! reference lists, and other chrome.

mod britannica;
mod generic;
mod wikipedia;

use scraper::{Html, Selector};
use url::Url;

pub use britannica::BritannicaAdapter;
pub use generic::GenericAdapter;
pub use wikipedia::WikipediaAdapter;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Content extraction result from an adapter.
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    /// Article HTML with chrome stripped.
    pub html: String,
    /// Article title, when the page exposes one.
    pub title: Option<String>,
}

/// Trait for source-specific content extraction.
///
/// Adapters are tried in priority order; `GenericAdapter` is the always-last fallback.
pub trait SourceAdapter: Send + Sync {
    /// Returns `true` if this adapter should handle the document.
    fn detect(&self, doc: &Html, url: &Url) -> bool;

    /// Extract the article body as clean HTML.
    fn extract_content(&self, doc: &Html) -> ExtractedContent;

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds registered adapters in priority order.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn SourceAdapter>>,
    fallback: GenericAdapter,
}

impl AdapterRegistry {
    /// Create a registry with all built-in adapters.
    pub fn new() -> Self {
        Self {
            adapters: vec![Box::new(WikipediaAdapter), Box::new(BritannicaAdapter)],
            fallback: GenericAdapter,
        }
    }

    /// Detect the best adapter for the given HTML document.
    pub fn detect(&self, doc: &Html, url: &Url) -> &dyn SourceAdapter {
        self.adapters
            .iter()
            .find(|adapter| adapter.detect(doc, url))
            .map(|adapter| adapter.as_ref())
            .unwrap_or(&self.fallback)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Inner HTML of the first element matching any selector, in order.
pub(crate) fn first_match_html(doc: &Html, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|sel_str| {
        let sel = Selector::parse(sel_str).ok()?;
        doc.select(&sel).next().map(|el| el.inner_html())
    })
}

/// Text of the first element matching `selector`, trimmed.
pub(crate) fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Remove every element matching `selector` from an HTML fragment.
pub(crate) fn strip_elements(html: &str, selector: &str) -> String {
    let Ok(sel) = Selector::parse(selector) else {
        return html.to_string();
    };
    let doc = Html::parse_fragment(html);

    // Match against the parsed serialization so removals line up exactly.
    let mut result = doc.root_element().inner_html();
    for el in doc.select(&sel) {
        result = result.replacen(&el.html(), "", 1);
    }
    result
}

/// Host of `url` ends with `domain` on a label boundary.
pub(crate) fn host_matches(url: &Url, domain: &str) -> bool {
    url.host_str().is_some_and(|host| {
        let host = host.to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{domain}"))
    })
}
