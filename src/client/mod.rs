/// HTTP Client Module
///
/// Thin wrapper over reqwest for the retailer JSON APIs. Every non-2xx
/// response and transport failure surfaces as a network error carrying the
/// URL and status; bodies that are not JSON surface as parse errors.
use crate::error::{IngestError, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, SET_COOKIE, USER_AGENT};
use reqwest::Response;
use serde_json::Value;
use std::time::Duration;

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RetailerClient {
    client: reqwest::Client,
}

impl RetailerClient {
    /// Create a client that sends JSON requests with a browser user agent
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));

        let client = reqwest::Client::builder().default_headers(headers).timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self { client })
    }

    pub async fn get_json(&self, url: &str, headers: HeaderMap) -> Result<Value> {
        tracing::debug!("GET {}", url);
        let resp = self.client.get(url).headers(headers).send().await?;
        Self::parse_response(url, Self::check_response(url, resp)?).await
    }

    pub async fn post_json(&self, url: &str, headers: HeaderMap, body: &Value) -> Result<Value> {
        tracing::debug!("POST {}", url);
        let resp = self.client.post(url).headers(headers).json(body).send().await?;
        Self::parse_response(url, Self::check_response(url, resp)?).await
    }

    /// GET `url` and return the value of cookie `name` from its Set-Cookie headers
    pub async fn fetch_cookie(&self, url: &str, name: &str) -> Result<Option<String>> {
        let resp = self.client.get(url).send().await?;
        let resp = Self::check_response(url, resp)?;

        let cookie = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|value| cookie_value(value, name));

        Ok(cookie)
    }

    // Reject anything outside 200-299
    fn check_response(url: &str, resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            Err(IngestError::network(url, Some(status.as_u16()), format!("unexpected status {}", status)))
        }
    }

    async fn parse_response(url: &str, resp: Response) -> Result<Value> {
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| IngestError::Parse(format!("{} returned invalid JSON: {}", url, e)))
    }
}

/// Extract `name`'s value from one Set-Cookie header value
fn cookie_value(header: &str, name: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    let (key, value) = pair.split_once('=')?;
    (key.trim() == name).then(|| value.trim().to_string())
}
