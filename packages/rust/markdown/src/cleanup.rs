//! Post-conversion cleanup pipeline.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! The pipeline leaves readable prose: no link targets, images, citation
//! markers, stray HTML, or reference sections.

use std::sync::LazyLock;

use regex::Regex;

/// Headings whose sections carry no biographical narrative.
const DROPPED_SECTIONS: &[&str] = &[
    "references",
    "notes",
    "citations",
    "sources",
    "bibliography",
    "further reading",
    "external links",
    "see also",
    "footnotes",
];

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = md.to_string();

    result = drop_reference_sections(&result);
    result = strip_images(&result);
    result = strip_links(&result);
    result = strip_citation_markers(&result);
    result = strip_emphasis(&result);
    result = strip_leftover_html(&result);
    result = unescape_markdown(&result);
    result = normalize_whitespace(&result);
    result = clean_blank_lines(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Drop reference sections
// ---------------------------------------------------------------------------

/// Remove sections such as "References" or "External links", up to the next
/// heading of the same or a higher level.
fn drop_reference_sections(md: &str) -> String {
    static H_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*#*$").expect("valid regex"));

    let mut out: Vec<&str> = Vec::new();
    let mut dropping_level: Option<usize> = None;

    for line in md.lines() {
        if let Some(caps) = H_RE.captures(line.trim()) {
            let level = caps[1].len();
            let title = caps[2].trim().to_lowercase();

            if let Some(dropped) = dropping_level {
                if level > dropped {
                    continue;
                }
                dropping_level = None;
            }
            if DROPPED_SECTIONS.contains(&title.as_str()) {
                dropping_level = Some(level);
                continue;
            }
        } else if dropping_level.is_some() {
            continue;
        }
        out.push(line);
    }

    out.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Strip images
// ---------------------------------------------------------------------------

fn strip_images(md: &str) -> String {
    static IMAGE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("valid regex"));

    IMAGE_RE.replace_all(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Strip links
// ---------------------------------------------------------------------------

/// Replace `[text](url)` with `text`. Anchors without text disappear.
fn strip_links(md: &str) -> String {
    static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"\[([^\]]*)\]\((?:[^)\s]*)(?:\s+"[^"]*")?\)"#).expect("valid regex")
    });

    LINK_RE.replace_all(md, "$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 4: Strip citation markers
// ---------------------------------------------------------------------------

/// Remove `[1]`, `[a]`, `[note 3]` and `[citation needed]` style markers,
/// escaped or not.
fn strip_citation_markers(md: &str) -> String {
    static CITE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"\\?\[(?:\d{1,3}|[a-z]|note \d{1,3}|citation needed|clarification needed|according to whom\?|when\?|who\?)\\?\]",
        )
        .expect("valid regex")
    });

    CITE_RE.replace_all(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 5: Strip strong emphasis
// ---------------------------------------------------------------------------

/// Unwrap `**bold**` and `__bold__`; lead paragraphs bold the subject's name.
fn strip_emphasis(md: &str) -> String {
    static STRONG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\*\*([^*\n]+)\*\*|__([^_\n]+)__").expect("valid regex")
    });

    STRONG_RE.replace_all(md, "$1$2").to_string()
}

// ---------------------------------------------------------------------------
// Pass 6: Strip leftover HTML tags
// ---------------------------------------------------------------------------

/// Remove stray HTML tags that survived the conversion, keeping their text.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?[a-zA-Z][a-zA-Z0-9]*(?:\s[^<>]*)?/?>").expect("valid regex")
    });

    HTML_TAG_RE.replace_all(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 7: Unescape Markdown punctuation
// ---------------------------------------------------------------------------

/// `htmd` escapes punctuation that would otherwise read as Markdown syntax;
/// downstream consumers want the literal characters.
fn unescape_markdown(md: &str) -> String {
    static ESCAPE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\\([\\`*_{}\[\]()#+\-.!<>|~])").expect("valid regex"));

    ESCAPE_RE.replace_all(md, "$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 8: Normalize whitespace
// ---------------------------------------------------------------------------

/// Trim trailing whitespace and collapse inner runs of spaces.
fn normalize_whitespace(md: &str) -> String {
    static SPACES_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\S)[ \t]{2,}").expect("valid regex"));
    static SPACE_BEFORE_PUNCT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(\S) +([.,;:])").expect("valid regex"));

    md.lines()
        .map(|line| {
            let line = SPACES_RE.replace_all(line.trim_end(), "$1 ");
            SPACE_BEFORE_PUNCT_RE.replace_all(&line, "$1$2").to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 9: Clean up excessive blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of blank lines into a single blank line.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE
        .replace_all(md.trim_start_matches('\n'), "\n\n")
        .to_string()
}

// ---------------------------------------------------------------------------
// Pass 10: Ensure trailing newline
// ---------------------------------------------------------------------------

/// Ensure the text ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
