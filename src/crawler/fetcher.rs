//! Scraping proxy client
//!
//! This module handles all requests to the scraping proxy, including:
//! - Building the HTTP client with compression and a per-request timeout
//! - The request and response envelopes
//! - Turning transport errors and non-2xx statuses into a `ProxyReply`
//!
//! Classification of replies lives in the classifier; this module never
//! decides whether something is retryable.

use crate::config::ProxyConfig;
use crate::crawler::credentials::Credential;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Body of a scrape request
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeRequest<'a> {
    pub url: &'a str,

    #[serde(rename = "onlyMainContent")]
    pub only_main_content: bool,

    pub formats: [&'static str; 1],
}

/// Envelope returned by the proxy
///
/// Every field is optional on the wire; missing pieces read as empty.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScrapeResponse {
    #[serde(default)]
    pub success: bool,

    #[serde(default)]
    pub error: Option<Value>,

    #[serde(default)]
    pub data: Option<ScrapeData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScrapeData {
    #[serde(default)]
    pub html: Option<String>,

    #[serde(default)]
    pub metadata: Option<ScrapeMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScrapeMetadata {
    /// Status the upstream target answered with; a number or a string
    #[serde(rename = "statusCode", default)]
    pub status_code: Option<Value>,
}

impl ScrapeResponse {
    /// Returned markup, empty when absent
    pub fn html(&self) -> &str {
        self.data
            .as_ref()
            .and_then(|data| data.html.as_deref())
            .unwrap_or("")
    }

    /// Upstream target status from the response metadata
    pub fn target_status(&self) -> Option<u16> {
        let value = self.data.as_ref()?.metadata.as_ref()?.status_code.as_ref()?;
        match value {
            Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Error text reported by the proxy
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "Unknown error".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

/// What came back from one scrape request
#[derive(Debug, Clone)]
pub enum ProxyReply {
    /// Timeout, connection failure, or an unreadable body
    Transport(String),

    /// The proxy itself answered with a non-2xx status
    Status { code: u16, body: String },

    /// A 2xx answer with a parsed envelope
    Envelope(ScrapeResponse),
}

/// Client for the scraping proxy
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: Client,
    endpoint: String,
    render_full_page: bool,
}

impl ProxyClient {
    /// Builds a client from configuration
    ///
    /// # Arguments
    ///
    /// * `config` - The proxy configuration
    ///
    /// # Returns
    ///
    /// * `Ok(ProxyClient)` - Successfully built client
    /// * `Err(reqwest::Error)` - Failed to build the underlying HTTP client
    pub fn new(config: &ProxyConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(Duration::from_secs(config.timeout_secs))?,
            endpoint: config.endpoint.clone(),
            render_full_page: config.render_full_page,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Performs one scrape request for `url` with `credential`
    ///
    /// Never fails: every error is folded into the reply for the classifier.
    pub async fn scrape(&self, url: &str, credential: &Credential) -> ProxyReply {
        let request = ScrapeRequest {
            url,
            only_main_content: !self.render_full_page,
            formats: ["html"],
        };

        let response = match self
            .client
            .post(&self.endpoint)
            .bearer_auth(credential.key())
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return ProxyReply::Transport(describe_transport_error(&e)),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!("Proxy HTTP {} for {}", status.as_u16(), url);
            return ProxyReply::Status {
                code: status.as_u16(),
                body,
            };
        }

        match response.json::<ScrapeResponse>().await {
            Ok(envelope) => {
                tracing::debug!(
                    "Proxy response for {}: success={}, target status={:?}",
                    url,
                    envelope.success,
                    envelope.target_status()
                );
                ProxyReply::Envelope(envelope)
            }
            Err(e) => ProxyReply::Transport(format!("Unreadable proxy response: {}", e)),
        }
    }
}

/// Builds the HTTP client used to talk to the proxy
pub fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    let user_agent = format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

fn describe_transport_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "Request timeout".to_string()
    } else if error.is_connect() {
        format!("Connection error: {}", error)
    } else {
        format!("Request failed: {}", error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body_shape() {
        let request = ScrapeRequest {
            url: "https://shamela.ws/book/1681/10",
            only_main_content: false,
            formats: ["html"],
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "url": "https://shamela.ws/book/1681/10",
                "onlyMainContent": false,
                "formats": ["html"]
            })
        );
    }

    #[test]
    fn test_target_status_accepts_numbers_and_strings() {
        let numeric: ScrapeResponse = serde_json::from_value(json!({
            "success": true,
            "data": { "html": "<p>", "metadata": { "statusCode": 524 } }
        }))
        .unwrap();
        assert_eq!(numeric.target_status(), Some(524));
        assert_eq!(numeric.html(), "<p>");

        let textual: ScrapeResponse = serde_json::from_value(json!({
            "success": true,
            "data": { "metadata": { "statusCode": " 200 " } }
        }))
        .unwrap();
        assert_eq!(textual.target_status(), Some(200));
        assert_eq!(textual.html(), "");
    }

    #[test]
    fn test_error_message() {
        let response: ScrapeResponse =
            serde_json::from_value(json!({"success": false, "error": "blocked"})).unwrap();
        assert_eq!(response.error_message(), "blocked");

        let response: ScrapeResponse = serde_json::from_value(json!({"success": false})).unwrap();
        assert_eq!(response.error_message(), "Unknown error");

        let response: ScrapeResponse =
            serde_json::from_value(json!({"success": false, "error": {"code": 7}})).unwrap();
        assert_eq!(response.error_message(), r#"{"code":7}"#);
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(Duration::from_secs(5)).is_ok());
    }
}
