//! Upstream HTTP client abstraction.
//!
//! # Responsibilities
//! - Define the request/response shapes the executor works with
//! - Issue one HTTP call per `send`, exposing the body as a byte stream
//!
//! # Design Decisions
//! - The executor only sees [`UpstreamClient`]; the reqwest-backed
//!   [`HttpUpstream`] is the production implementation
//! - Dropping the future returned by `send` aborts the in-flight call
//! - Invalid request headers are skipped, not turned into transport errors

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use url::Url;

use crate::control::HttpMethod;
use crate::error::TransportError;

/// Response body as delivered by the upstream, chunk by chunk.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// A fully shaped upstream call.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

/// A live upstream response: status and headers received, body pending.
pub struct UpstreamResponse {
    pub status: u16,
    pub reason: String,
    pub headers: BTreeMap<String, String>,
    pub body: BodyStream,
}

impl UpstreamResponse {
    pub fn new(status: u16, reason: impl Into<String>, headers: BTreeMap<String, String>, body: BodyStream) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers,
            body,
        }
    }

    /// Response with an in-memory body delivered as the given chunks.
    pub fn from_chunks<I, C>(status: u16, headers: BTreeMap<String, String>, chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Bytes>,
    {
        let chunks: Vec<Result<Bytes, TransportError>> =
            chunks.into_iter().map(|c| Ok(c.into())).collect();
        Self::new(status, "", headers, stream::iter(chunks).boxed())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Value of the `content-type` header, or an empty string.
    pub fn content_type(&self) -> &str {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
            .unwrap_or("")
    }

    /// Drain the body into text, replacing invalid UTF-8.
    pub async fn text(self) -> Result<String, TransportError> {
        let chunks: Vec<Bytes> = self.body.try_collect().await?;
        let bytes = chunks.concat();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Something that can perform an upstream HTTP call.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError>;
}

/// Production client backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

/// Flatten a header map, joining repeated values with ", ".
fn collect_headers(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    map
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, TransportError> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), request.url);

        for (name, value) in &request.headers {
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                (Ok(name), Ok(value)) => builder = builder.header(name, value),
                _ => tracing::warn!(header = %name, "Skipping invalid request header"),
            }
        }

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = collect_headers(response.headers());
        let body = response
            .bytes_stream()
            .map_err(TransportError::from)
            .boxed();

        Ok(UpstreamResponse::new(
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            headers,
            body,
        ))
    }
}
