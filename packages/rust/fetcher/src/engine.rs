//! HTTP fetch engine.
//!
//! Fetches one page per call, picks a source adapter, converts the article
//! body to prose, and enforces SSRF and size limits.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use scraper::Html;
use tracing::{debug, info, instrument, warn};
use url::Url;

use chronicler_markdown::ConvertOptions;
use chronicler_shared::{ChroniclerError, FetchConfig, Result};

use crate::adapters::AdapterRegistry;

// ---------------------------------------------------------------------------
// Fetcher trait
// ---------------------------------------------------------------------------

/// Retrieves the text of a document.
///
/// `None` means the source produced no usable content; callers treat it as a
/// failed action, never as an error to propagate.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Option<String>;
}

/// A fetched and converted page.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// Final URL after redirects.
    pub url: Url,
    pub title: Option<String>,
    /// Article prose.
    pub text: String,
    /// Adapter that extracted the article.
    pub adapter: String,
    /// Whether `text` was cut at `max_content_chars`.
    pub truncated: bool,
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// Fetches pages over HTTP(S) with `reqwest`.
pub struct HttpFetcher {
    client: Client,
    registry: AdapterRegistry,
    max_content_chars: usize,
    max_body_bytes: usize,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_localhost: bool,
}

impl HttpFetcher {
    /// Create a new fetcher with the given configuration.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChroniclerError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            registry: AdapterRegistry::new(),
            max_content_chars: config.max_content_chars,
            max_body_bytes: config.max_body_bytes,
            allow_localhost: false,
        })
    }

    /// Allow fetching localhost/private IPs (for integration tests).
    #[cfg(test)]
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    /// Fetch a page and convert its article body to prose.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch_document(&self, url: &Url) -> Result<FetchedDocument> {
        if !self.allow_localhost && is_ssrf_target(url) {
            return Err(ChroniclerError::validation(format!(
                "SSRF protection: refusing to fetch {url}"
            )));
        }

        debug!("fetching page");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| ChroniclerError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChroniclerError::Network(format!("{url}: HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(ct) = content_type.as_deref().filter(|ct| !is_html_content_type(ct)) {
            return Err(ChroniclerError::validation(format!("{url}: not an HTML page ({ct})")));
        }
        if let Some(len) = response.content_length().filter(|&len| len > self.max_body_bytes as u64) {
            return Err(ChroniclerError::validation(format!(
                "{url}: body of {len} bytes exceeds {} byte limit",
                self.max_body_bytes
            )));
        }

        let final_url = response.url().clone();
        let body = read_body_capped(response, self.max_body_bytes).await?;

        // `Html` is not `Send`; keep it out of any await.
        let (extracted, adapter) = {
            let doc = Html::parse_document(&body);
            let adapter = self.registry.detect(&doc, &final_url);
            (adapter.extract_content(&doc), adapter.name().to_string())
        };

        let converted = chronicler_markdown::convert_extracted(
            &extracted.html,
            &ConvertOptions {
                source_url: final_url.to_string(),
                title: extracted.title,
            },
        )?;

        let (text, truncated) = truncate_chars(&converted.text, self.max_content_chars);

        info!(
            adapter = %adapter,
            words = converted.word_count,
            truncated,
            "page fetched"
        );

        Ok(FetchedDocument {
            url: final_url,
            title: converted.title,
            text,
            adapter,
            truncated,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Option<String> {
        match self.fetch_document(url).await {
            Ok(doc) if !doc.text.trim().is_empty() => Some(doc.text),
            Ok(_) => {
                warn!(%url, "page had no article text");
                None
            }
            Err(e) => {
                warn!(%url, error = %e, "fetch failed");
                None
            }
        }
    }
}

/// A missing header is allowed; an explicit non-HTML type is not.
fn is_html_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    matches!(mime.as_str(), "text/html" | "application/xhtml+xml")
}

/// Read the body chunk by chunk, failing once it passes `max_bytes`.
///
/// The limit applies to bytes received, whatever `Content-Length` said.
async fn read_body_capped(mut response: reqwest::Response, max_bytes: usize) -> Result<String> {
    let url = response.url().clone();
    let mut body: Vec<u8> = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ChroniclerError::Network(format!("{url}: body read failed: {e}")))?
    {
        if body.len() + chunk.len() > max_bytes {
            return Err(ChroniclerError::validation(format!(
                "{url}: body exceeds {max_bytes} byte limit"
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Cut `text` to at most `max` characters on a char boundary.
fn truncate_chars(text: &str, max: usize) -> (String, bool) {
    match text.char_indices().nth(max) {
        Some((idx, _)) => (text[..idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
pub fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
            return true;
        }
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_fetcher() -> HttpFetcher {
        HttpFetcher::new(&FetchConfig::default()).unwrap().allow_localhost()
    }

    fn html_page(body: &str) -> wiremock::ResponseTemplate {
        wiremock::ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html; charset=utf-8")
    }

    #[test]
    fn ssrf_blocks_file_scheme() {
        let url = Url::parse("file:///etc/passwd").unwrap();
        assert!(is_ssrf_target(&url));
    }

    #[test]
    fn ssrf_blocks_private_ips() {
        for raw in [
            "http://192.168.1.1/admin",
            "http://10.0.0.1/",
            "http://127.0.0.1:8080/",
            "http://[::1]/",
            "http://100.64.3.2/",
        ] {
            let url = Url::parse(raw).unwrap();
            assert!(is_ssrf_target(&url), "{raw} should be blocked");
        }
    }

    #[test]
    fn ssrf_allows_public_and_blocks_localhost() {
        assert!(!is_ssrf_target(&Url::parse("https://en.wikipedia.org/wiki/Ada_Lovelace").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://localhost:3000/api").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://printer.local/").unwrap()));
    }

    #[test]
    fn html_content_types() {
        assert!(is_html_content_type("text/html"));
        assert!(is_html_content_type("Text/HTML; charset=UTF-8"));
        assert!(is_html_content_type("application/xhtml+xml"));
        assert!(!is_html_content_type("application/pdf"));
        assert!(!is_html_content_type("text/plain; charset=utf-8"));
        assert!(!is_html_content_type("image/png"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("Łódź 1815", 4), ("Łódź".to_string(), true));
        assert_eq!(truncate_chars("short", 10), ("short".to_string(), false));
    }

    #[tokio::test]
    async fn fetch_refuses_private_targets_by_default() {
        let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let err = fetcher.fetch_document(&url).await.unwrap_err();
        assert!(err.to_string().contains("SSRF"));
        assert!(fetcher.fetch(&url).await.is_none());
    }

    #[tokio::test]
    async fn fetch_converts_mediawiki_page() {
        let server = wiremock::MockServer::start().await;
        let page = r##"<html><head><meta name="generator" content="MediaWiki 1.43"></head><body>
            <div id="mw-navigation"><a href="/">Main page</a></div>
            <h1 id="firstHeading">Ada Lovelace</h1>
            <div id="mw-content-text"><div class="mw-parser-output">
                <div class="hatnote">For other uses, see Ada.</div>
                <p><b>Augusta Ada King, Countess of Lovelace</b> was born 10 December 1815 in <a href="/wiki/London">London</a>.<sup class="reference"><a href="#cite-1">[1]</a></sup></p>
                <div class="navbox">Computing pioneers</div>
            </div></div>
        </body></html>"##;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/wiki/Ada_Lovelace"))
            .respond_with(html_page(page))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/wiki/Ada_Lovelace", server.uri())).unwrap();
        let doc = test_fetcher().fetch_document(&url).await.unwrap();

        assert_eq!(doc.adapter, "wikipedia");
        assert_eq!(doc.title.as_deref(), Some("Ada Lovelace"));
        assert!(doc.text.contains("Augusta Ada King, Countess of Lovelace was born 10 December 1815 in London."));
        assert!(!doc.text.contains("Main page"));
        assert!(!doc.text.contains("For other uses"));
        assert!(!doc.text.contains("Computing pioneers"));
        assert!(!doc.text.contains("[1]"));
        assert!(!doc.truncated);
    }

    #[tokio::test]
    async fn fetch_returns_none_on_http_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/missing"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        let fetcher = test_fetcher();
        assert!(fetcher.fetch(&url).await.is_none());
        assert!(matches!(
            fetcher.fetch_document(&url).await,
            Err(ChroniclerError::Network(_))
        ));
    }

    #[tokio::test]
    async fn fetch_returns_none_for_empty_article() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/blank"))
            .respond_with(html_page("<html><body><nav>Only navigation</nav></body></html>"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/blank", server.uri())).unwrap();
        assert!(test_fetcher().fetch(&url).await.is_none());
    }

    #[tokio::test]
    async fn fetch_truncates_long_pages() {
        let server = wiremock::MockServer::start().await;
        let body = format!("<html><body><main><p>{}</p></main></body></html>", "word ".repeat(500));
        wiremock::Mock::given(wiremock::matchers::path("/long"))
            .respond_with(html_page(&body))
            .mount(&server)
            .await;

        let config = FetchConfig {
            max_content_chars: 100,
            ..FetchConfig::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap().allow_localhost();
        let url = Url::parse(&format!("{}/long", server.uri())).unwrap();
        let doc = fetcher.fetch_document(&url).await.unwrap();

        assert!(doc.truncated);
        assert_eq!(doc.text.chars().count(), 100);
    }

    #[tokio::test]
    async fn fetch_skips_non_html_responses() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/notes.pdf"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_raw(b"%PDF-1.7 Sketch of the Analytical Engine".to_vec(), "application/pdf"),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/notes.pdf", server.uri())).unwrap();
        let fetcher = test_fetcher();
        let err = fetcher.fetch_document(&url).await.unwrap_err();
        assert!(err.to_string().contains("not an HTML page"));
        assert!(fetcher.fetch(&url).await.is_none());
    }

    #[tokio::test]
    async fn fetch_rejects_oversized_bodies() {
        let server = wiremock::MockServer::start().await;
        let body = format!("<html><body><main><p>{}</p></main></body></html>", "Lovelace ".repeat(200));
        wiremock::Mock::given(wiremock::matchers::path("/huge"))
            .respond_with(html_page(&body))
            .mount(&server)
            .await;

        let config = FetchConfig {
            max_body_bytes: 512,
            ..FetchConfig::default()
        };
        let fetcher = HttpFetcher::new(&config).unwrap().allow_localhost();
        let url = Url::parse(&format!("{}/huge", server.uri())).unwrap();

        let err = fetcher.fetch_document(&url).await.unwrap_err();
        assert!(err.to_string().contains("byte limit"));
        assert!(fetcher.fetch(&url).await.is_none());
    }

    #[tokio::test]
    async fn capped_read_stops_past_the_limit() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/page"))
            .respond_with(html_page(&"x".repeat(2048)))
            .mount(&server)
            .await;

        let url = format!("{}/page", server.uri());
        let response = reqwest::get(&url).await.unwrap();
        let err = read_body_capped(response, 1024).await.unwrap_err();
        assert!(err.to_string().contains("1024 byte limit"));

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(read_body_capped(response, 4096).await.unwrap().len(), 2048);
    }
}
