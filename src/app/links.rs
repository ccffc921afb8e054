use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use super::error::Tor2TorError;
use super::types::SocksProxy;

/// v3 onion host: a 56 character base32 label, optionally under subdomains.
static ONION_V3_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:[a-z0-9-]+\.)*[a-z2-7]{56}\.onion$").expect("Invalid onion host regex")
});

/// Where the orchestrator gets the links to capture from.
#[async_trait]
pub trait LinkSource: Send + Sync {
    async fn onions_on_page(&self, url: &str) -> Result<Vec<String>, Tor2TorError>;
}

/// Fetches pages through the SOCKS proxy and pulls onion links out of them.
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    client: reqwest::Client,
}

impl LinkExtractor {
    pub fn new(proxy: &SocksProxy, timeout: Duration) -> Result<Self, Tor2TorError> {
        let proxy = reqwest::Proxy::all(proxy.url()).map_err(Tor2TorError::Client)?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(timeout)
            .build()
            .map_err(Tor2TorError::Client)?;
        Ok(Self { client })
    }

    /// Body of `url`, whatever the status code. Only transport failures are errors.
    pub async fn fetch_page(&self, url: &str) -> Result<String, Tor2TorError> {
        let network = |source| Tor2TorError::Network {
            url: url.to_string(),
            source,
        };
        let res = self.client.get(url).send().await.map_err(network)?;
        debug!("GET {url} -> {}", res.status().as_u16());
        res.text().await.map_err(network)
    }
}

#[async_trait]
impl LinkSource for LinkExtractor {
    async fn onions_on_page(&self, url: &str) -> Result<Vec<String>, Tor2TorError> {
        let html = self.fetch_page(url).await?;
        Ok(extract_onion_links(&html))
    }
}

pub fn add_http_to_link(link: &str) -> String {
    let has_scheme = |scheme: &str| {
        link.get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    };
    if has_scheme("http://") || has_scheme("https://") {
        link.to_string()
    } else {
        format!("http://{link}")
    }
}

/// Host of the http-normalized link, used to name its screenshot.
pub fn onion_host(link: &str) -> Option<String> {
    Url::parse(&add_http_to_link(link.trim()))
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// True when the normalized link points at a v3 onion service.
pub fn is_valid_onion(link: &str) -> bool {
    onion_host(link).is_some_and(|host| ONION_V3_HOST.is_match(&host))
}

pub fn extract_onion_links(html: &str) -> Vec<String> {
    extract_links_matching(html, is_valid_onion)
}

/// Normalized hrefs of every anchor accepted by `is_valid`, in document order.
/// Duplicates are kept.
pub fn extract_links_matching(html: &str, is_valid: impl Fn(&str) -> bool) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let doc = Html::parse_document(html);

    doc.select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .map(|href| add_http_to_link(href.trim()))
        .filter(|link| is_valid(link))
        .collect()
}
