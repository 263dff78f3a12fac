//! Upstream request shaping.
//!
//! # Responsibilities
//! - Build the upstream URL from the fixed base and the request path/query
//! - Rewrite fake-streaming requests into their non-streaming equivalent
//! - Strip transport and browser-identity headers
//! - Remove payload fields that image models reject
//!
//! # Design Decisions
//! - The rule set is fixed and explicit, not pluggable
//! - Body shaping failures are non-fatal: the raw body is forwarded

use std::collections::BTreeMap;

use serde_json::Value;
use url::Url;

use crate::control::{RequestSpec, StreamingMode};
use crate::error::{RelayError, RelayResult};
use crate::upstream::client::UpstreamRequest;

const STREAMING_METHOD: &str = ":streamGenerateContent";
const NON_STREAMING_METHOD: &str = ":generateContent";

/// Headers dropped before replaying a request upstream.
const STRIPPED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "origin",
    "referer",
    "user-agent",
];
const STRIPPED_HEADER_PREFIX: &str = "sec-fetch-";

/// Top-level body fields image models reject.
const IMAGE_MODEL_INCOMPATIBLE_KEYS: &[&str] = &["tool_config", "toolChoice", "tools"];

/// Build the complete upstream call for a request description.
pub fn build_request(base: &Url, spec: &RequestSpec) -> RelayResult<UpstreamRequest> {
    let body = if spec.method.is_mutating() {
        spec.body
            .as_deref()
            .filter(|body| !body.is_empty())
            .map(|body| shape_body(&spec.path, body))
    } else {
        None
    };

    Ok(UpstreamRequest {
        method: spec.method,
        url: build_url(base, spec)?,
        headers: sanitize_headers(&spec.headers),
        body,
    })
}

/// Join path and query onto the base URL, applying fake-streaming rewrites.
pub fn build_url(base: &Url, spec: &RequestSpec) -> RelayResult<Url> {
    let mut path = spec.path.strip_prefix('/').unwrap_or(&spec.path).to_string();
    let mut query: Vec<(&str, &str)> = spec
        .query_params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    if spec.streaming_mode == StreamingMode::Fake {
        if path.contains(STREAMING_METHOD) {
            path = path.replacen(STREAMING_METHOD, NON_STREAMING_METHOD, 1);
            tracing::debug!(request_id = %spec.request_id, path = %path, "Fake streaming: using non-streaming endpoint");
        }
        let before = query.len();
        query.retain(|(k, v)| !(*k == "alt" && *v == "sse"));
        if query.len() != before {
            tracing::debug!(request_id = %spec.request_id, "Fake streaming: dropped alt=sse");
        }
    }

    let raw = format!("{}/{}", base.as_str().trim_end_matches('/'), path);
    let mut url = Url::parse(&raw)
        .map_err(|e| RelayError::InvalidRequest(format!("bad upstream URL '{}': {}", raw, e)))?;

    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }

    Ok(url)
}

/// Remove headers that are meaningless or invalid when replayed by the relay.
pub fn sanitize_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| {
            let name = name.to_ascii_lowercase();
            !STRIPPED_HEADERS.contains(&name.as_str()) && !name.starts_with(STRIPPED_HEADER_PREFIX)
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Image-generation models are addressed by `-image-` or `imagen` in the path.
pub fn is_image_model(path: &str) -> bool {
    path.contains("-image-") || path.contains("imagen")
}

/// Apply payload compatibility fixups. Returns the body to send.
pub fn shape_body(path: &str, body: &str) -> String {
    if !is_image_model(path) {
        return body.to_string();
    }

    let mut value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "Request body is not JSON, forwarding unmodified");
            return body.to_string();
        }
    };

    let Some(object) = value.as_object_mut() else {
        return body.to_string();
    };

    let mut modified = false;
    for key in IMAGE_MODEL_INCOMPATIBLE_KEYS {
        modified |= object.remove(*key).is_some();
    }
    if let Some(generation) = object.get_mut("generationConfig").and_then(Value::as_object_mut) {
        modified |= generation.remove("thinkingConfig").is_some();
    }

    if !modified {
        return body.to_string();
    }

    tracing::debug!("Removed fields unsupported by image models");
    match serde_json::to_string(&value) {
        Ok(shaped) => shaped,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to re-encode request body, forwarding unmodified");
            body.to_string()
        }
    }
}
