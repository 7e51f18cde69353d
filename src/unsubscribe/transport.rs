//! HTTP transport seam for strategy executors.
//!
//! Every call is bounded by the configured timeout, never retried, and never
//! fails past this boundary: network errors come back as `TransportError`
//! data inside the `TransportResult`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use tracing::debug;

use super::types::{HttpResponse, TransportResult};
use crate::config::EngineConfig;
use crate::error::TransportError;

/// Maximum response body kept for classification.
pub const MAX_BODY_BYTES: usize = 512 * 1024;

/// Redirect hops followed for GET requests.
const MAX_GET_REDIRECTS: usize = 10;

/// Transport used by the strategy executors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// GET `url` with `query` appended, following redirects.
    async fn get(&self, url: &str, query: &[(String, String)]) -> TransportResult;

    /// POST `fields` form-encoded to `url`. Redirects are not followed.
    async fn post_form(&self, url: &str, fields: &[(String, String)]) -> TransportResult;
}

/// Production transport backed by `reqwest`.
pub struct ReqwestTransport {
    get_client: reqwest::Client,
    post_client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(config: &EngineConfig) -> Result<Self, reqwest::Error> {
        let get_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .redirect(Policy::limited(MAX_GET_REDIRECTS))
            .build()?;
        // POST redirects are reported, never followed.
        let post_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .redirect(Policy::none())
            .build()?;
        Ok(Self {
            get_client,
            post_client,
            timeout: config.request_timeout,
        })
    }

    async fn finish(&self, url: &str, sent: Result<reqwest::Response, reqwest::Error>) -> TransportResult {
        let resp = sent.map_err(|e| self.map_error(url, e))?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.map_err(|e| self.map_error(url, e))?;
        debug!(url = %url, status, final_url = %final_url, "HTTP response received");
        Ok(HttpResponse {
            status,
            final_url,
            content_type,
            body: truncate_body(body),
        })
    }

    fn map_error(&self, url: &str, e: reqwest::Error) -> TransportError {
        let url = url.to_string();
        if e.is_timeout() {
            TransportError::Timeout {
                url,
                timeout: self.timeout,
            }
        } else if e.is_connect() {
            TransportError::Connect {
                url,
                reason: e.to_string(),
            }
        } else if e.is_builder() {
            TransportError::InvalidUrl {
                url,
                reason: e.to_string(),
            }
        } else if e.is_body() || e.is_decode() {
            TransportError::Body {
                url,
                reason: e.to_string(),
            }
        } else {
            TransportError::Request {
                url,
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, query: &[(String, String)]) -> TransportResult {
        let mut req = self.get_client.get(url);
        if !query.is_empty() {
            req = req.query(query);
        }
        let sent = req.send().await;
        self.finish(url, sent).await
    }

    async fn post_form(&self, url: &str, fields: &[(String, String)]) -> TransportResult {
        let sent = self.post_client.post(url).form(fields).send().await;
        self.finish(url, sent).await
    }
}

/// Cut `body` to at most `MAX_BODY_BYTES`, on a char boundary.
fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_BODY_BYTES {
        let mut cut = MAX_BODY_BYTES;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
