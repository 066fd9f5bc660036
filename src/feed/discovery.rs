use futures::stream::{self, StreamExt};
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use thiserror::Error;
use url::Url;

use super::fetcher::{FetchError, Fetcher};
use super::parser::parse_document;

/// Candidate feeds validated at once.
const VALIDATION_CONCURRENCY: usize = 4;

/// Errors that can occur while fetching the page to scan.
///
/// Candidates that fail validation are dropped silently; only the page fetch
/// itself can fail discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The provided URL could not be parsed or is not http(s)
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    /// HTTP request failed
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the fetch timeout
    #[error("request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("response too large")]
    TooLarge,
    /// Page answered with a non-2xx status
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
}

impl From<FetchError> for DiscoveryError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Network(e) => DiscoveryError::Network(e),
            FetchError::Timeout => DiscoveryError::Timeout,
            FetchError::ResponseTooLarge => DiscoveryError::TooLarge,
        }
    }
}

/// Finds feeds advertised by a web page.
///
/// Looks at `<link rel="alternate">` tags with an RSS/XML type first, and falls
/// back to anchors whose href mentions `xml`, `rss` or `feed` when there are
/// none. Every candidate is fetched; only those that parse as feeds are
/// returned, sorted. A URL that is itself a feed is validated like any other
/// candidate and returned as-is.
///
/// This is a heuristic: it may miss feeds, and malformed HTML simply yields
/// fewer candidates.
pub async fn discover(fetcher: &Fetcher, page_url: &str) -> Result<Vec<String>, DiscoveryError> {
    let base = parse_http_url(page_url)?;

    let response = fetcher.fetch_raw(base.as_str()).await?;
    if !response.status.is_success() {
        return Err(DiscoveryError::HttpStatus(response.status.as_u16()));
    }

    if !parse_document(&response.body).bozo && fetcher.fetch(base.as_str()).await.is_some() {
        tracing::debug!(url = %base, "Discovery target is already a feed");
        return Ok(vec![base.to_string()]);
    }

    let html = String::from_utf8_lossy(&response.body);
    let candidates = find_feed_candidates(&html, &base);
    tracing::debug!(url = %base, candidates = candidates.len(), "Validating feed candidates");

    let mut found: Vec<String> = stream::iter(candidates)
        .map(|candidate| async move {
            fetcher.fetch(&candidate).await.map(|_| candidate)
        })
        .buffer_unordered(VALIDATION_CONCURRENCY)
        .filter_map(|validated| async move { validated })
        .collect()
        .await;
    found.sort();

    Ok(found)
}

fn parse_http_url(raw: &str) -> Result<Url, DiscoveryError> {
    let url = Url::parse(raw).map_err(|e| DiscoveryError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(DiscoveryError::InvalidUrl(format!(
            "unsupported scheme: {scheme}"
        ))),
    }
}

/// Collects candidate feed URLs from an HTML page, resolved against `base`.
fn find_feed_candidates(html: &str, base: &Url) -> BTreeSet<String> {
    let document = Html::parse_document(html);
    let mut candidates = BTreeSet::new();

    if let Ok(links) = Selector::parse(r#"link[rel~="alternate"][href]"#) {
        for link in document.select(&links) {
            let element = link.value();
            let is_feed_type = element
                .attr("type")
                .map(|t| t.to_ascii_lowercase())
                .is_some_and(|t| t.contains("rss") || t.contains("xml"));
            if !is_feed_type {
                continue;
            }
            if let Some(url) = element.attr("href").and_then(|href| resolve(href, base)) {
                candidates.insert(url);
            }
        }
    }

    if !candidates.is_empty() {
        return candidates;
    }

    if let Ok(anchors) = Selector::parse("a[href]") {
        for anchor in document.select(&anchors) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let lowered = href.to_ascii_lowercase();
            if !(lowered.contains("xml") || lowered.contains("rss") || lowered.contains("feed")) {
                continue;
            }
            if let Some(url) = resolve(href, base) {
                candidates.insert(url);
            }
        }
    }

    candidates
}

/// Resolves a possibly relative href; only http(s) results survive.
fn resolve(href: &str, base: &Url) -> Option<String> {
    let resolved = base.join(href.trim()).ok()?;
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FetchEvents;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>T</title>
    <item><guid>1</guid><title>Post</title></item>
</channel></rss>"#;

    fn base(url: &str) -> Url {
        Url::parse(url).unwrap()
    }

    fn fetcher() -> Fetcher {
        Fetcher::new(
            reqwest::Client::new(),
            Duration::from_secs(5),
            FetchEvents::default(),
        )
    }

    // --- Candidate extraction (no network) ---

    #[test]
    fn test_link_alternate_relative_href() {
        let html = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="/feed.xml">
        </head><body></body></html>"#;
        let found = find_feed_candidates(html, &base("https://example.com/"));
        assert_eq!(
            found.into_iter().collect::<Vec<_>>(),
            vec!["https://example.com/feed.xml"]
        );
    }

    #[test]
    fn test_link_requires_feed_type() {
        let html = r#"<link rel="alternate" type="text/html" href="/fr/">
            <link rel="alternate" type="application/atom+xml" href="https://cdn.example.com/atom">
            <link rel="stylesheet" type="text/xml" href="/style.xml">"#;
        let found = find_feed_candidates(html, &base("https://example.com/blog/"));
        assert_eq!(
            found.into_iter().collect::<Vec<_>>(),
            vec!["https://cdn.example.com/atom"]
        );
    }

    #[test]
    fn test_anchor_fallback_when_no_links() {
        let html = r#"<body>
            <a href="/rss">RSS</a>
            <a href="/about">About</a>
            <a href="https://other.example.org/Feed/">Other</a>
            <a href="/rss">duplicate</a>
        </body>"#;
        let found: Vec<_> = find_feed_candidates(html, &base("https://example.com/page"))
            .into_iter()
            .collect();
        assert_eq!(
            found,
            vec!["https://example.com/rss", "https://other.example.org/Feed/"]
        );
    }

    #[test]
    fn test_anchors_ignored_when_links_present() {
        let html = r#"<link rel="alternate" type="application/rss+xml" href="/a.xml">
            <a href="/b.rss">b</a>"#;
        let found: Vec<_> = find_feed_candidates(html, &base("https://example.com/"))
            .into_iter()
            .collect();
        assert_eq!(found, vec!["https://example.com/a.xml"]);
    }

    #[test]
    fn test_malformed_html_does_not_panic() {
        let html = "<html><a href=\"/feed\"<<link rel=alternate type=rss <div></p></html";
        let _ = find_feed_candidates(html, &base("https://example.com/"));
        let _ = find_feed_candidates("", &base("https://example.com/"));
    }

    #[test]
    fn test_non_http_hrefs_dropped() {
        let html = r#"<a href="mailto:feed@example.com">mail</a><a href="javascript:rss()">js</a>"#;
        assert!(find_feed_candidates(html, &base("https://example.com/")).is_empty());
    }

    #[test]
    fn test_invalid_page_url() {
        assert!(matches!(
            parse_http_url("ftp://example.com/"),
            Err(DiscoveryError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_http_url("not a url"),
            Err(DiscoveryError::InvalidUrl(_))
        ));
    }

    // --- End-to-end with a mock server ---

    #[tokio::test]
    async fn test_discover_validates_candidates() {
        let server = MockServer::start().await;
        let page = r#"<html><head>
            <link rel="alternate" type="application/rss+xml" href="/feed.xml">
            <link rel="alternate" type="application/atom+xml" href="/broken.xml">
        </head></html>"#;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(page)
                    .insert_header("Content-Type", "text/html"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let found = discover(&fetcher(), &format!("{}/", server.uri()))
            .await
            .unwrap();
        assert_eq!(found, vec![format!("{}/feed.xml", server.uri())]);
    }

    #[tokio::test]
    async fn test_discover_on_feed_url_returns_it() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&server)
            .await;

        let fetcher = fetcher();
        let mut rx = fetcher.events().subscribe();
        let url = format!("{}/feed", server.uri());
        let found = discover(&fetcher, &url).await.unwrap();
        assert_eq!(found, vec![url.clone()]);

        // Validated through the fetcher like any other candidate
        let event = rx.try_recv().unwrap();
        assert_eq!(event.url, url);
        assert!(!event.bozo);
    }

    #[tokio::test]
    async fn test_discover_page_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = discover(&fetcher(), &format!("{}/", server.uri())).await;
        assert!(matches!(result, Err(DiscoveryError::HttpStatus(500))));
    }

    #[tokio::test]
    async fn test_discover_no_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>nothing here</p>"))
            .mount(&server)
            .await;

        let found = discover(&fetcher(), &format!("{}/", server.uri()))
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}
