//! HTTP transport: authenticated JSON calls, the streaming call, and raw
//! part uploads.
//!
//! A [`Transport`] is built once and cloned freely; clones share one
//! connection pool. It holds no per-call state, so concurrent orchestration
//! calls can use the same instance.

use std::time::{Duration, Instant};

use futures::stream::BoxStream;
use reqwest::header::{CONTENT_TYPE, ETAG};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::api::retry::{self, retry_call};
use crate::api::streaming::response_lines;
use crate::config::{ClientConfig, Credentials};
use crate::error::{PowerdrillError, Result};

/// Header carrying the project API key.
pub const API_KEY_HEADER: &str = "x-pd-api-key";

/// Boxed stream of SSE lines read off a response body.
pub type LineStream = BoxStream<'static, Result<String>>;

/// Authenticated HTTP transport for the Powerdrill API.
#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    credentials: Credentials,
    config: ClientConfig,
}

impl Transport {
    /// Build the shared HTTP client.
    ///
    /// The request timeout is applied per metadata call rather than on the
    /// client so that the streaming call can stay open as long as data flows.
    pub fn new(credentials: Credentials, config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            credentials,
            config,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.credentials.user_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Issue a metadata call and return the envelope's `data` payload.
    ///
    /// `user_id` is added as a query parameter when there is no body and as a
    /// body field otherwise. GET and DELETE are retried per the configured
    /// [`RetryConfig`](crate::api::retry::RetryConfig); other methods go out once.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<T> {
        let body = body.map(|b| self.with_identity(b));
        let url = self.url(path, query, body.is_none())?;
        let label = format!("{method} {path}");

        let envelope = if retry::is_idempotent(&method) {
            retry_call(&self.config.retry, &label, || {
                self.send_once(method.clone(), url.clone(), body.as_ref())
            })
            .await?
        } else {
            self.send_once(method, url, body.as_ref()).await?
        };

        decode_envelope(envelope)
    }

    async fn send_once(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Value> {
        let start = Instant::now();
        let path = url.path().to_string();
        let mut req = self
            .client
            .request(method.clone(), url)
            .header(API_KEY_HEADER, &self.credentials.api_key)
            .timeout(self.config.request_timeout);
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        debug!(
            "{method} {path}: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(PowerdrillError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(serde_json::from_str(&text)?)
    }

    /// POST `body` with streaming enabled and return the response as lines.
    ///
    /// Not retried. Only the HTTP status is checked; the body is SSE, not an
    /// envelope.
    pub async fn open_stream(&self, path: &str, body: Value) -> Result<LineStream> {
        let body = self.with_identity(body);
        let url = self.url(path, &[], false)?;

        debug!("POST {path} (streaming)");

        let resp = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.credentials.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PowerdrillError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(Box::pin(response_lines(resp)))
    }

    /// PUT raw bytes to a pre-signed part URL and return its entity tag.
    ///
    /// Not retried. The API key is not sent: the URL carries its own
    /// authorization. Surrounding quotes are stripped from the `ETag` header;
    /// a missing header yields an empty tag.
    pub async fn put_part(&self, upload_url: &str, chunk: Vec<u8>) -> Result<String> {
        let len = chunk.len();
        let resp = self
            .client
            .put(upload_url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .timeout(self.config.request_timeout)
            .body(chunk)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PowerdrillError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        let etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string())
            .unwrap_or_default();
        trace!("uploaded {len} bytes, etag={etag}");
        Ok(etag)
    }

    fn with_identity(&self, mut body: Value) -> Value {
        if let Some(obj) = body.as_object_mut() {
            obj.insert(
                "user_id".to_string(),
                Value::String(self.credentials.user_id.clone()),
            );
        }
        body
    }

    fn url(&self, path: &str, query: &[(&str, String)], identity_in_query: bool) -> Result<Url> {
        let raw = format!("{}{path}", self.config.base_url);
        let mut url = Url::parse(&raw)
            .map_err(|e| PowerdrillError::Validation(format!("invalid URL '{raw}': {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            if identity_in_query {
                pairs.append_pair("user_id", &self.credentials.user_id);
            }
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        // An empty serializer still leaves a bare `?` behind.
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }
}

/// Check the envelope `code` and deserialize its `data` field.
///
/// A missing `message` falls back to the whole envelope as JSON, so the
/// caller always has something to report.
pub fn decode_envelope<T: DeserializeOwned>(mut envelope: Value) -> Result<T> {
    let code = envelope.get("code").and_then(Value::as_i64);
    if code != Some(0) {
        let message = envelope
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| envelope.to_string());
        return Err(PowerdrillError::Api {
            code: code.unwrap_or(-1),
            message,
        });
    }
    let data = envelope
        .get_mut("data")
        .map(Value::take)
        .unwrap_or(Value::Null);
    Ok(serde_json::from_value(data)?)
}
