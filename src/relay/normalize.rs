//! Response format normalization.
//!
//! # Responsibilities
//! - Wrap binary image responses in the upstream API's candidate shape
//! - Rewrite known image-response JSON shapes into a `candidates` array
//!
//! # Design Decisions
//! - Bodies already carrying `candidates` pass through untouched
//! - Shapes are checked in a fixed order; the first match wins
//! - Any parse failure or unknown shape forwards the body verbatim

use serde_json::{json, Map, Value};

const DEFAULT_IMAGE_MIME: &str = "image/png";

/// One candidate holding a single inline-data part.
pub fn inline_candidate(index: usize, mime_type: &str, data: Option<Value>) -> Value {
    let mut inline = Map::new();
    inline.insert("mimeType".to_string(), Value::String(mime_type.to_string()));
    if let Some(data) = data {
        inline.insert("data".to_string(), data);
    }

    json!({
        "content": {
            "parts": [{ "inlineData": inline }],
            "role": "model",
        },
        "finishReason": "STOP",
        "index": index,
    })
}

/// Server-sent-event line carrying a base64 image as a single candidate.
pub fn wrap_binary_image(mime_type: &str, base64_data: String) -> String {
    let response = json!({
        "candidates": [inline_candidate(0, mime_type, Some(Value::String(base64_data)))],
    });
    format!("data: {}\n\n", response)
}

/// Fake-mode body normalizer.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    inline_data_min_len: usize,
}

impl Normalizer {
    pub fn new(inline_data_min_len: usize) -> Self {
        Self { inline_data_min_len }
    }

    /// Normalize `body`, returning it unchanged when no rewrite applies.
    pub fn apply(&self, body: String) -> String {
        match self.normalize(&body) {
            Some(rewritten) => rewritten,
            None => body,
        }
    }

    /// The rewritten body, or `None` when the body should pass through.
    pub fn normalize(&self, body: &str) -> Option<String> {
        if !body.trim_start().starts_with('{') {
            return None;
        }

        let value: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "Body is not JSON, forwarding unmodified");
                return None;
            }
        };
        let object = value.as_object()?;

        let (shape, candidates) = self.detect(object)?;
        tracing::info!(shape, count = candidates.len(), "Normalized response into candidates");
        Some(json!({ "candidates": candidates }).to_string())
    }

    fn detect(&self, object: &Map<String, Value>) -> Option<(&'static str, Vec<Value>)> {
        if object.get("candidates").is_some_and(Value::is_array) {
            return None;
        }

        if let Some(predictions) = object.get("predictions").and_then(Value::as_array) {
            let candidates = predictions
                .iter()
                .enumerate()
                .map(|(i, prediction)| {
                    let mime = prediction
                        .get("mimeType")
                        .and_then(Value::as_str)
                        .filter(|m| !m.is_empty())
                        .unwrap_or(DEFAULT_IMAGE_MIME);
                    inline_candidate(i, mime, prediction.get("bytesBase64Encoded").cloned())
                })
                .collect();
            return Some(("predictions", candidates));
        }

        if let Some(images) = object.get("images").and_then(Value::as_array) {
            let candidates = images
                .iter()
                .enumerate()
                .map(|(i, image)| inline_candidate(i, DEFAULT_IMAGE_MIME, Some(image.clone())))
                .collect();
            return Some(("images", candidates));
        }

        if let Some(image) = object.get("image").and_then(Value::as_str).filter(|s| !s.is_empty()) {
            let candidate = inline_candidate(0, DEFAULT_IMAGE_MIME, Some(Value::String(image.to_string())));
            return Some(("image", vec![candidate]));
        }

        if let Some(data) = object
            .get("data")
            .and_then(Value::as_str)
            .filter(|s| s.len() > self.inline_data_min_len)
        {
            let candidate = inline_candidate(0, DEFAULT_IMAGE_MIME, Some(Value::String(data.to_string())));
            return Some(("data", vec![candidate]));
        }

        None
    }
}
