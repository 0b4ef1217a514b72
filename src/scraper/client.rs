//! Async HTTP client with a browser identity, a politeness delay between requests, and
//! optional routing through a CORS relay.

use crate::scraper::error::FetchError;
use crate::scraper::{FetchOptions, Fetcher};
use async_trait::async_trait;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, HOST, ORIGIN, REFERER, USER_AGENT,
};
use reqwest::Url;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Mobile Chrome identity; source sites serve their full markup to it.
pub const DEFAULT_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (Linux; Android 14; Pixel 8 Pro) AppleWebKit/537.36 ",
    "(KHTML, like Gecko) Chrome/121.0.6167.178 Mobile Safari/537.36"
);
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DELAY_MS: u64 = 500;
const MAX_REDIRECTS: usize = 10;

/// Markers of Cloudflare-style interstitials served with a 200 status.
const CHALLENGE_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "Checking your browser",
    "Just a moment...",
    "Enable JavaScript and cookies to continue",
    "Attention Required! | Cloudflare",
    "cf-challenge",
    "_cf_chl",
    "Verifying you are human",
];

/// A relay that forwards a request to the real target named in a query parameter.
///
/// `envelope_field` is set for relays that wrap the body in JSON (e.g. `"contents"`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProxyRelay {
    pub url: String,
    #[serde(default = "default_relay_param")]
    pub param: String,
    #[serde(default)]
    pub envelope_field: Option<String>,
}

fn default_relay_param() -> String {
    "url".to_string()
}

impl ProxyRelay {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            param: default_relay_param(),
            envelope_field: None,
        }
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = param.into();
        self
    }

    pub fn with_envelope_field(mut self, field: impl Into<String>) -> Self {
        self.envelope_field = Some(field.into());
        self
    }

    /// Relay URL carrying the percent-encoded target in `param`.
    pub fn request_url(&self, target: &Url) -> Result<Url, FetchError> {
        let mut url = parse_url(&self.url)?;
        url.query_pairs_mut().append_pair(&self.param, target.as_str());
        Ok(url)
    }

    /// Short label for logs: the relay host.
    pub fn label(&self) -> String {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
            .unwrap_or_else(|| self.url.clone())
    }

    fn unwrap_body(&self, body: String, url: &str) -> Result<String, FetchError> {
        let Some(field) = &self.envelope_field else {
            return Ok(body);
        };
        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| FetchError::Network {
                url: url.to_string(),
                reason: format!("relay envelope is not JSON: {}", e),
            })?;
        value
            .get(field)
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| FetchError::Network {
                url: url.to_string(),
                reason: format!("relay envelope has no string field {:?}", field),
            })
    }
}

/// Headers a relay must send upstream so the request looks like it came from the target's
/// own pages: `Host` of the target, `Referer` and `Origin` of the target origin.
pub fn relay_headers(target: &Url) -> Result<HeaderMap, FetchError> {
    let host = match (target.host_str(), target.port()) {
        (Some(h), Some(p)) => format!("{}:{}", h, p),
        (Some(h), None) => h.to_string(),
        (None, _) => {
            return Err(FetchError::InvalidUrl {
                input: target.to_string(),
                reason: "URL has no host".to_string(),
            })
        }
    };
    let origin = target.origin().ascii_serialization();
    let mut headers = HeaderMap::new();
    headers.insert(HOST, header_value(&host, target)?);
    headers.insert(REFERER, header_value(&format!("{}/", origin), target)?);
    headers.insert(ORIGIN, header_value(&origin, target)?);
    Ok(headers)
}

fn header_value(value: &str, target: &Url) -> Result<HeaderValue, FetchError> {
    HeaderValue::from_str(value).map_err(|e| FetchError::InvalidUrl {
        input: target.to_string(),
        reason: e.to_string(),
    })
}

fn parse_url(input: &str) -> Result<Url, FetchError> {
    Url::parse(input).map_err(|e| FetchError::InvalidUrl {
        input: input.to_string(),
        reason: e.to_string(),
    })
}

/// True when the body is an anti-bot interstitial rather than site content.
pub fn is_challenge_page(body: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|m| body.contains(m))
}

/// HTTP client that enforces a delay between requests. No retries: retry policy belongs
/// to the discovery aggregator.
#[derive(Debug)]
pub struct PoliteClient {
    inner: reqwest::Client,
    user_agent: String,
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl PoliteClient {
    /// Build a polite client with default User-Agent, timeout, and delay.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    pub fn builder() -> PoliteClientBuilder {
        PoliteClientBuilder::default()
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    async fn wait_delay(&self) {
        let last = *self.last_request.lock().await;
        if let Some(last) = last {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
    }

    fn request_headers(
        &self,
        target: &Url,
        options: &FetchOptions,
    ) -> Result<HeaderMap, FetchError> {
        let target_headers = relay_headers(target)?;
        let mut headers = HeaderMap::new();
        let ua = options.user_agent.as_deref().unwrap_or(&self.user_agent);
        headers.insert(USER_AGENT, header_value(ua, target)?);
        match options.referer.as_deref() {
            Some(referer) => {
                headers.insert(REFERER, header_value(referer, target)?);
            }
            None => {
                if let Some(v) = target_headers.get(REFERER) {
                    headers.insert(REFERER, v.clone());
                }
            }
        }
        // Behind a relay the Origin must still name the target, never the relay.
        if options.proxy.is_some() {
            if let Some(v) = target_headers.get(ORIGIN) {
                headers.insert(ORIGIN, v.clone());
            }
        }
        Ok(headers)
    }
}

#[async_trait]
impl Fetcher for PoliteClient {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<String, FetchError> {
        let target = parse_url(url)?;
        let request_url = match &options.proxy {
            Some(relay) => relay.request_url(&target)?,
            None => target.clone(),
        };
        let headers = self.request_headers(&target, options)?;

        self.wait_delay().await;
        let sent = self.inner.get(request_url).headers(headers).send().await;
        *self.last_request.lock().await = Some(Instant::now());
        let response = sent.map_err(|e| FetchError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::network(url, e))?;
        let body = match &options.proxy {
            Some(relay) => relay.unwrap_body(body, url)?,
            None => body,
        };
        if is_challenge_page(&body) {
            return Err(FetchError::Blocked {
                url: url.to_string(),
            });
        }
        tracing::debug!(url, bytes = body.len(), "fetched");
        Ok(body)
    }
}

/// Builder for PoliteClient with optional User-Agent, delay, and timeout.
#[derive(Debug)]
pub struct PoliteClientBuilder {
    user_agent: Option<String>,
    delay_ms: u64,
    timeout_secs: u64,
}

impl Default for PoliteClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            delay_ms: DEFAULT_DELAY_MS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl PoliteClientBuilder {
    /// Set a custom User-Agent. If not set, a mobile browser identity is used.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Delay between consecutive requests in milliseconds. Default 500.
    pub fn delay_ms(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Per-request timeout in seconds. Default 30. A timeout surfaces as a network error.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.max(1);
        self
    }

    pub fn build(self) -> Result<PoliteClient, reqwest::Error> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let mut defaults = HeaderMap::new();
        defaults.insert(
            ACCEPT,
            HeaderValue::from_static(concat!(
                "text/html,application/xhtml+xml,application/xml;q=0.9,",
                "image/avif,image/webp,*/*;q=0.8"
            )),
        );
        defaults.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        let inner = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent.clone())
            .default_headers(defaults)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(PoliteClient {
            inner,
            user_agent,
            delay: Duration::from_millis(self.delay_ms),
            last_request: Mutex::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_request_url_encodes_target() -> Result<(), FetchError> {
        let relay = ProxyRelay::new("https://corsproxy.io/");
        let target = parse_url("https://asuracomic.net/series?page=1&name=solo leveling")?;
        let url = relay.request_url(&target)?;
        assert_eq!(url.host_str(), Some("corsproxy.io"));
        let (key, value) = url
            .query_pairs()
            .next()
            .ok_or_else(|| FetchError::InvalidUrl {
                input: url.to_string(),
                reason: "no query".into(),
            })?;
        assert_eq!(key, "url");
        assert_eq!(value, target.as_str());
        assert!(!url.as_str().contains("name=solo"), "target must be encoded");
        Ok(())
    }

    #[test]
    fn relay_custom_param() -> Result<(), FetchError> {
        let relay = ProxyRelay::new("https://api.codetabs.com/v1/proxy").with_param("quest");
        let url = relay.request_url(&parse_url("https://example.com/a")?)?;
        assert!(url.as_str().starts_with("https://api.codetabs.com/v1/proxy?quest="));
        assert_eq!(relay.label(), "api.codetabs.com");
        Ok(())
    }

    #[test]
    fn relay_headers_match_target_not_relay() -> Result<(), FetchError> {
        let headers = relay_headers(&parse_url("https://asuracomic.net/series/abc")?)?;
        assert_eq!(headers.get(HOST).and_then(|v| v.to_str().ok()), Some("asuracomic.net"));
        assert_eq!(
            headers.get(REFERER).and_then(|v| v.to_str().ok()),
            Some("https://asuracomic.net/")
        );
        assert_eq!(
            headers.get(ORIGIN).and_then(|v| v.to_str().ok()),
            Some("https://asuracomic.net")
        );
        Ok(())
    }

    #[test]
    fn relay_headers_keep_explicit_port() -> Result<(), FetchError> {
        let headers = relay_headers(&parse_url("http://localhost:8080/x")?)?;
        assert_eq!(headers.get(HOST).and_then(|v| v.to_str().ok()), Some("localhost:8080"));
        Ok(())
    }

    #[test]
    fn envelope_body_is_unwrapped() -> Result<(), FetchError> {
        let relay =
            ProxyRelay::new("https://api.allorigins.win/get").with_envelope_field("contents");
        let body = relay.unwrap_body(
            r#"{"contents":"<html>ok</html>","status":{"http_code":200}}"#.to_string(),
            "https://example.com",
        )?;
        assert_eq!(body, "<html>ok</html>");
        assert!(relay.unwrap_body("<html>".into(), "https://example.com").is_err());
        Ok(())
    }

    #[test]
    fn challenge_pages_are_detected() {
        assert!(is_challenge_page(
            "<html><title>Just a moment...</title><div id=\"cf-challenge\"></div></html>"
        ));
        assert!(!is_challenge_page("<html><body><a href=\"/series/x\">X</a></body></html>"));
    }

    #[test]
    fn request_headers_use_target_referer_and_options() -> Result<(), Box<dyn std::error::Error>> {
        let client = PoliteClient::builder().user_agent("Test/1.0").build()?;
        let target = parse_url("https://asuracomic.net/series?page=2")?;

        let direct = client.request_headers(&target, &FetchOptions::default())?;
        assert_eq!(direct.get(USER_AGENT).and_then(|v| v.to_str().ok()), Some("Test/1.0"));
        assert_eq!(
            direct.get(REFERER).and_then(|v| v.to_str().ok()),
            Some("https://asuracomic.net/")
        );
        assert!(direct.get(ORIGIN).is_none());

        let proxied = FetchOptions {
            user_agent: Some("Other/2.0".into()),
            referer: Some("https://google.com".into()),
            proxy: Some(ProxyRelay::new("https://corsproxy.io/")),
        };
        let headers = client.request_headers(&target, &proxied)?;
        assert_eq!(headers.get(USER_AGENT).and_then(|v| v.to_str().ok()), Some("Other/2.0"));
        assert_eq!(
            headers.get(REFERER).and_then(|v| v.to_str().ok()),
            Some("https://google.com")
        );
        assert_eq!(
            headers.get(ORIGIN).and_then(|v| v.to_str().ok()),
            Some("https://asuracomic.net")
        );
        Ok(())
    }
}
