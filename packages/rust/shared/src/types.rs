//! Core domain types for Chronicler research runs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for research run identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Research request
// ---------------------------------------------------------------------------

/// What the caller wants researched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRequest {
    /// The person whose life is being reconstructed.
    pub subject: String,
    /// Narrows relevance to a specific question about the subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_question: Option<String>,
}

impl ResearchRequest {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            research_question: None,
        }
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.research_question = Some(question.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Chronology
// ---------------------------------------------------------------------------

/// When an event happened.
///
/// `year` is a best estimate; `note` carries qualifiers ("c.", "between
/// 1840 and 1842") or, when no estimate exists, the reason why.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChronologyDate {
    /// Best-estimate year, or null when none can be given.
    #[serde(default)]
    pub year: Option<i32>,
    /// Free-text qualifier for approximate or unknown dates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// One identified life event in the final chronology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChronologyEvent {
    /// Lowercase underscore slug, unique within one chronology.
    pub id: String,
    pub name: String,
    pub description: String,
    pub date: ChronologyDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// Life-stage partition used to scope extraction and merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Early,
    Personal,
    Career,
    Legacy,
}

impl Category {
    /// Every category in presentation order.
    pub const ALL: [Category; 4] = [
        Category::Early,
        Category::Personal,
        Category::Career,
        Category::Legacy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Early => "early",
            Self::Personal => "personal",
            Self::Career => "career",
            Self::Legacy => "legacy",
        }
    }

    /// Section heading used in reports.
    pub fn title(self) -> &'static str {
        match self {
            Self::Early => "Early life",
            Self::Personal => "Personal life",
            Self::Career => "Career",
            Self::Legacy => "Legacy",
        }
    }

    /// What belongs in this bucket, phrased for prompts.
    pub fn description(self) -> &'static str {
        match self {
            Self::Early => "childhood, upbringing, family background, and education",
            Self::Personal => "relationships, marriages, children, places of residence, and health",
            Self::Career => "professional journey, major works, publications, and achievements",
            Self::Legacy => "reception, honours, awards, death, and lasting influence",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Four independent bullet-list buckets of accumulated knowledge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CategorizedKnowledge {
    /// Childhood, upbringing, family, education.
    #[serde(default)]
    pub early: String,
    /// Relationships, residence, health.
    #[serde(default)]
    pub personal: String,
    /// Professional journey and works.
    #[serde(default)]
    pub career: String,
    /// Reception, honours, death, influence.
    #[serde(default)]
    pub legacy: String,
}

impl CategorizedKnowledge {
    pub fn get(&self, category: Category) -> &str {
        match category {
            Category::Early => &self.early,
            Category::Personal => &self.personal,
            Category::Career => &self.career,
            Category::Legacy => &self.legacy,
        }
    }

    pub fn set(&mut self, category: Category, text: String) {
        match category {
            Category::Early => self.early = text,
            Category::Personal => self.personal = text,
            Category::Career => self.career = text,
            Category::Legacy => self.legacy = text,
        }
    }

    /// Buckets in [`Category::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (Category, &str)> {
        Category::ALL.into_iter().map(move |c| (c, self.get(c)))
    }

    /// True when every bucket is blank.
    pub fn is_empty(&self) -> bool {
        self.iter().all(|(_, text)| text.trim().is_empty())
    }

    pub fn total_bullets(&self) -> usize {
        self.iter().map(|(_, text)| bullet_lines(text).len()).sum()
    }

    /// Plain-text rendering with one heading per non-empty bucket.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (category, text) in self.iter() {
            if text.trim().is_empty() {
                continue;
            }
            out.push_str(&format!("## {}\n{}\n\n", category.title(), text.trim()));
        }
        out.trim_end().to_string()
    }
}

/// Split bucket text into bullet bodies, dropping list markers and blanks.
pub fn bullet_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    for marker in ["- ", "* ", "• ", "+ "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return rest.trim();
        }
    }
    // "12. text" / "3) text"
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest.trim();
        }
    }
    line.trim_start_matches(['-', '*', '•']).trim()
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

/// Verdict for one chunk of source text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkClassification {
    Relevant,
    Partial,
    Irrelevant,
    /// The classification call failed or was indecisive.
    #[default]
    Unknown,
}

impl ChunkClassification {
    /// Whether any of the chunk is kept for extraction.
    pub fn keeps_content(self) -> bool {
        matches!(self, Self::Relevant | Self::Partial)
    }
}

/// A token-bounded window over fetched source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position in the chunk sequence, starting at 0.
    pub sequence_index: usize,
    /// Byte offset of the first character in the source text.
    pub start_offset: usize,
    /// Byte offset one past the last character in the source text.
    pub end_offset: usize,
    /// Index of the first token covered.
    pub token_start: usize,
    /// Index one past the last token covered.
    pub token_end: usize,
    pub text: String,
    pub classification: ChunkClassification,
    /// Kept text; empty for irrelevant and unknown chunks.
    #[serde(default)]
    pub extracted_content: String,
}
