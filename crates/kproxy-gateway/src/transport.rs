use std::io;
use std::pin::Pin;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use http::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderValue};
use serde_json::{Value as JsonValue, json};

use kproxy_core::GatewayError;

use crate::client::shared_client;

pub const DEFAULT_BASE_URL: &str = "https://codewhisperer.us-east-1.amazonaws.com";
const GENERATE_PATH: &str = "/generateAssistantResponse";

const UPSTREAM_CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const AMZ_TARGET: &str = "AmazonCodeWhispererStreamingService.GenerateAssistantResponse";
const CLIENT_VERSION: &str = concat!("kproxy/", env!("CARGO_PKG_VERSION"));
const CLIENT_TIMEZONE: &str = "UTC";
const AGENT_MODE: &str = "chat";

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// Everything one upstream attempt needs beyond the shared configuration.
#[derive(Debug, Clone)]
pub struct UpstreamAttempt {
    pub credential: String,
    pub fingerprint: String,
    pub trace_id: String,
    pub request_id: String,
    pub body: JsonValue,
}

/// Seam between the orchestrator and the network, so retry behavior can be
/// driven by an in-memory fake under test.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn send(&self, attempt: UpstreamAttempt) -> Result<ChunkStream, GatewayError>;
}

pub struct HttpTransport {
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }

    fn build_headers(&self, attempt: &UpstreamAttempt) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(UPSTREAM_CONTENT_TYPE));
        headers.insert("x-amz-target", HeaderValue::from_static(AMZ_TARGET));
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_VERSION));
        headers.insert(
            "x-amzn-client-version",
            HeaderValue::from_static(CLIENT_VERSION),
        );
        headers.insert(
            "x-amzn-client-timezone",
            HeaderValue::from_static(CLIENT_TIMEZONE),
        );
        headers.insert("x-amzn-agent-mode", HeaderValue::from_static(AGENT_MODE));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", attempt.credential))
                .context("credential is not a valid header value")?,
        );
        headers.insert(
            "x-amzn-machine-id",
            HeaderValue::from_str(&attempt.fingerprint)
                .context("fingerprint is not a valid header value")?,
        );
        headers.insert(
            "x-amzn-trace-id",
            HeaderValue::from_str(&format!("Root={}", attempt.trace_id))
                .context("trace id is not a valid header value")?,
        );
        headers.insert(
            "x-amzn-request-id",
            HeaderValue::from_str(&attempt.request_id)
                .context("request id is not a valid header value")?,
        );
        Ok(headers)
    }
}

#[async_trait]
impl UpstreamTransport for HttpTransport {
    async fn send(&self, attempt: UpstreamAttempt) -> Result<ChunkStream, GatewayError> {
        let url = format!("{}{GENERATE_PATH}", self.base_url.trim_end_matches('/'));
        let headers = self.build_headers(&attempt)?;
        let response = shared_client()
            .post(url)
            .headers(headers)
            .json(&attempt.body)
            .send()
            .await
            .context("upstream request failed")?;

        let status = response.status();
        if !status.is_success() {
            // Error bodies flow through the frame classifier like any other
            // chunk so the retry loop can react to the embedded envelope.
            let body = response
                .bytes()
                .await
                .context("failed to read upstream error body")?;
            let body = if body.is_empty() {
                Bytes::from(
                    json!({ "error": { "message": format!("upstream status {status}") } })
                        .to_string(),
                )
            } else {
                body
            };
            return Ok(Box::pin(stream::iter(vec![Ok(body)])));
        }

        let chunks = response
            .bytes_stream()
            .map(|item| item.map_err(io::Error::other));
        Ok(Box::pin(chunks))
    }
}
