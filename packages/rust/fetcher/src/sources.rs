//! Candidate biography sources and source-key identity.
//!
//! A *source key* is the registrable domain of a URL (`en.wikipedia.org` and
//! `de.wikipedia.org` are both `wikipedia.org`). Research runs never fetch
//! the same source key twice.

use std::collections::BTreeSet;
use std::net::IpAddr;

use tracing::warn;
use url::Url;

use chronicler_shared::SourceTemplate;

/// Second-level labels that sit under a two-letter country code
/// (`bbc.co.uk`, `abc.net.au`).
const COUNTRY_SECOND_LEVEL: &[&str] = &["co", "com", "org", "net", "ac", "gov", "edu"];

/// Registrable domain of `url`, lowercased. `None` for host-less URLs.
pub fn source_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }
    if host.parse::<IpAddr>().is_ok() || host.starts_with('[') {
        return Some(host);
    }

    let labels: Vec<&str> = host.split('.').collect();
    let keep = match labels.as_slice() {
        [.., second, tld] if tld.len() == 2 && COUNTRY_SECOND_LEVEL.contains(second) => 3,
        _ => 2,
    };
    let start = labels.len().saturating_sub(keep);
    Some(labels[start..].join("."))
}

/// A concrete URL derived from a [`SourceTemplate`] for one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCandidate {
    pub name: String,
    pub url: Url,
    pub key: String,
}

/// Ordered set of source templates.
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    templates: Vec<SourceTemplate>,
}

impl SourceCatalog {
    pub fn new(templates: Vec<SourceTemplate>) -> Self {
        Self { templates }
    }

    /// Candidate URLs for `subject`, in template order. Templates that do not
    /// produce a valid URL are skipped.
    pub fn candidates(&self, subject: &str) -> Vec<SourceCandidate> {
        self.templates
            .iter()
            .filter_map(|template| {
                let raw = fill_template(&template.url_template, subject);
                match Url::parse(&raw) {
                    Ok(url) => {
                        let key = source_key(&url)?;
                        Some(SourceCandidate {
                            name: template.name.clone(),
                            url,
                            key,
                        })
                    }
                    Err(e) => {
                        warn!(template = %template.url_template, error = %e, "invalid source template");
                        None
                    }
                }
            })
            .collect()
    }

    /// First candidate whose source key is not in `used`.
    pub fn next_unused(&self, subject: &str, used: &BTreeSet<String>) -> Option<SourceCandidate> {
        self.candidates(subject)
            .into_iter()
            .find(|candidate| !used.contains(&candidate.key))
    }

    /// Source keys of every template.
    pub fn keys(&self) -> BTreeSet<String> {
        self.candidates("placeholder")
            .into_iter()
            .map(|candidate| candidate.key)
            .collect()
    }
}

/// Substitute `{underscore}`, `{hyphen}` and `{query}` with forms of `subject`.
fn fill_template(template: &str, subject: &str) -> String {
    let words: Vec<&str> = subject.split_whitespace().collect();
    let query: String = url::form_urlencoded::byte_serialize(words.join(" ").as_bytes()).collect();

    template
        .replace("{underscore}", &words.join("_"))
        .replace("{hyphen}", &words.join("-"))
        .replace("{query}", &query)
}
