//! Outbound HTTP transport.
//!
//! The worker talks to endpoints through this trait so tests can script
//! outcomes; the production implementation is a reqwest client with a
//! 30-second hard timeout that cancels the in-flight request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

/// Hard cap on one delivery attempt, including connect and body read.
pub(crate) const REQUEST_TIMEOUT_SECS: u64 = 30;

/// At most this many bytes of a response body are retained.
pub(crate) const BODY_PREFIX_BYTES: usize = 1000;

/// What one POST attempt produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostOutcome {
    /// HTTP status, when a response arrived at all.
    pub status: Option<u16>,
    /// Response body prefix (at most [`BODY_PREFIX_BYTES`] bytes).
    pub body_prefix: Option<String>,
    /// Transport diagnostic when no usable response arrived.
    pub error: Option<String>,
}

impl PostOutcome {
    /// True for any 2xx response.
    pub fn is_success(&self) -> bool {
        self.status.map_or(false, |s| (200..300).contains(&s))
    }

    /// A failure description for retry bookkeeping.
    pub fn describe_failure(&self) -> String {
        match (self.status, &self.error) {
            (Some(status), _) => format!("endpoint returned status {status}"),
            (None, Some(error)) => error.clone(),
            (None, None) => "no response".to_string(),
        }
    }
}

/// Truncate to a byte budget without splitting a UTF-8 character.
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= BODY_PREFIX_BYTES {
        return body.to_string();
    }
    let mut end = BODY_PREFIX_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// Abstraction over the outbound HTTP call.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST a signed JSON body. Never returns an `Err`: every failure mode
    /// is folded into the outcome so the worker applies one retry policy.
    async fn post(&self, url: &str, headers: &[(&'static str, String)], body: &str)
        -> PostOutcome;
}

#[async_trait]
impl<T: WebhookTransport + ?Sized> WebhookTransport for std::sync::Arc<T> {
    async fn post(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        body: &str,
    ) -> PostOutcome {
        (**self).post(url, headers, body).await
    }
}

/// Production transport over reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build a client with the delivery timeout baked in.
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        body: &str,
    ) -> PostOutcome {
        let mut request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string());
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body_prefix = response.text().await.ok().map(|t| truncate_body(&t));
                PostOutcome {
                    status: Some(status),
                    body_prefix,
                    error: None,
                }
            }
            Err(e) => PostOutcome {
                status: None,
                body_prefix: None,
                // Timeouts cancel the request and count as failed attempts.
                error: Some(format!("request failed: {e}")),
            },
        }
    }
}
