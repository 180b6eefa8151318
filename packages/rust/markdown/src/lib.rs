//! HTML-to-text conversion for biography sources.
//!
//! Converts fetched HTML pages to plain Markdown prose with the `htmd` crate,
//! then applies cleanup passes that remove everything the extraction stage
//! should not see: link targets, images, citation markers, and trailing
//! reference sections.

mod cleanup;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

use chronicler_shared::{ChroniclerError, Result};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of converting an HTML page to prose.
#[derive(Debug, Clone)]
pub struct ConvertResult {
    /// Cleaned text, Markdown headings and lists retained.
    pub text: String,
    /// Extracted or supplied page title.
    pub title: Option<String>,
    /// Approximate word count of the text.
    pub word_count: usize,
}

/// Options for the conversion.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Source URL, used for logging only.
    pub source_url: String,
    /// Override title (if `None`, extracted from the first H1).
    pub title: Option<String>,
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert a full HTML document to clean prose.
///
/// Picks the main content container, flattens tables (infoboxes carry birth
/// and death dates), converts with `htmd`, then runs the cleanup pipeline.
#[instrument(skip(html), fields(url = %opts.source_url))]
pub fn convert(html: &str, opts: &ConvertOptions) -> Result<ConvertResult> {
    let content_html = extract_content_html(html);
    convert_extracted(&content_html, opts)
}

/// Convert pre-extracted content HTML (from a source adapter) to prose.
#[instrument(skip(content_html), fields(url = %opts.source_url))]
pub fn convert_extracted(content_html: &str, opts: &ConvertOptions) -> Result<ConvertResult> {
    let content_html = preprocess_tables(content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "iframe", "noscript", "svg", "img", "sup", "figure",
        ])
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| ChroniclerError::Conversion(format!("htmd conversion failed: {e}")))?;

    debug!(raw_len = raw_markdown.len(), "htmd conversion complete");

    let cleaned = cleanup::run_pipeline(&raw_markdown);

    let title = opts
        .title
        .clone()
        .or_else(|| extract_title_from_markdown(&cleaned));
    let word_count = count_words(&cleaned);

    debug!(?title, word_count, final_len = cleaned.len(), "conversion complete");

    Ok(ConvertResult {
        text: cleaned,
        title,
        word_count,
    })
}

// ---------------------------------------------------------------------------
// Table pre-processing
// ---------------------------------------------------------------------------

static TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("valid selector"));
static TR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
static CELL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("th, td").expect("valid selector"));

/// Flatten HTML `<table>` elements into `label: value` lines before conversion.
///
/// `htmd` 0.1 has no table support, and biography infoboxes are two-column
/// tables whose rows read naturally as labelled lines.
fn preprocess_tables(html: &str) -> String {
    let doc = Html::parse_fragment(html);

    if doc.select(&TABLE_SEL).next().is_none() {
        return html.to_string();
    }

    // Replace against the parsed serialization so table markup matches exactly.
    let mut result = doc.root_element().inner_html();
    for table_el in doc.select(&TABLE_SEL) {
        // Nested tables are flattened with their parent.
        if table_el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| a.value().name() == "table")
        {
            continue;
        }
        let flattened = table_to_lines(&table_el);
        result = result.replacen(&table_el.html(), &flattened, 1);
    }

    result
}

fn table_to_lines(table: &ElementRef) -> String {
    let mut out = String::from("\n<p>");
    for tr in table.select(&TR_SEL) {
        let cells: Vec<String> = tr
            .select(&CELL_SEL)
            .map(|cell| collapse_spaces(&cell.text().collect::<Vec<_>>().join(" ")))
            .filter(|text| !text.is_empty())
            .collect();

        match cells.as_slice() {
            [] => {}
            [single] => {
                out.push_str(single);
                out.push_str("<br>");
            }
            [label, rest @ ..] => {
                out.push_str(&format!("{label}: {}<br>", rest.join("; ")));
            }
        }
    }
    out.push_str("</p>\n");
    out
}

fn collapse_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the main content HTML, stripping page chrome.
fn extract_content_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    // Known content containers in priority order
    let selectors = [
        "#mw-content-text",  // MediaWiki
        "article",           // Common
        "[role=\"main\"]",   // Generic
        "main",              // HTML5 semantic
        ".content",          // Generic
    ];

    for sel_str in &selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    if let Ok(body_sel) = Selector::parse("body") {
        if let Some(body) = doc.select(&body_sel).next() {
            return body.inner_html();
        }
    }

    html.to_string()
}

/// Extract title from the first H1 in the Markdown text.
fn extract_title_from_markdown(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));

    H1_RE.captures(md).map(|c| c[1].trim().to_string())
}

fn count_words(md: &str) -> usize {
    md.split_whitespace()
        .filter(|w| !w.starts_with('#') || w.len() > 2)
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
