//! Control channel message schema.
//!
//! # Responsibilities
//! - Decode inbound controller messages into a closed set of variants
//! - Encode the relay's outgoing event kinds
//!
//! # Design Decisions
//! - `event_type` absent or anything other than `cancel_request` is a start request
//! - Outbound messages are internally tagged by `event_type`

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Opaque operation identifier supplied by the controller.
///
/// Echoed back in the JSON shape it arrived in, string or integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationId {
    Text(String),
    Integer(i64),
}

impl From<&str> for OperationId {
    fn from(id: &str) -> Self {
        OperationId::Text(id.to_string())
    }
}

impl From<i64> for OperationId {
    fn from(id: i64) -> Self {
        OperationId::Integer(id)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationId::Text(id) => f.write_str(id),
            OperationId::Integer(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Error)]
#[error("unsupported HTTP method: {0}")]
pub struct UnknownMethod(String);

/// HTTP verbs the controller may ask for. Matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// POST, PUT and PATCH carry a request body upstream.
    pub fn is_mutating(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl FromStr for HttpMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const ALL: [HttpMethod; 7] = [
            HttpMethod::Get,
            HttpMethod::Post,
            HttpMethod::Put,
            HttpMethod::Patch,
            HttpMethod::Delete,
            HttpMethod::Head,
            HttpMethod::Options,
        ];
        ALL.into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownMethod(s.to_string()))
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = UnknownMethod;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the response body is relayed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingMode {
    /// Relay every upstream line as it arrives.
    Real,
    /// Call the non-streaming endpoint and relay one normalized body.
    #[default]
    Fake,
}

/// Description of one upstream call. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    pub request_id: OperationId,
    pub method: HttpMethod,
    pub path: String,
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub streaming_mode: StreamingMode,
}

/// Messages received from the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Start(RequestSpec),
    Cancel { request_id: OperationId },
}

const CANCEL_EVENT: &str = "cancel_request";

/// Inbound decoding failure.
#[derive(Debug, Error)]
#[error("malformed control message: {source}")]
pub struct ProtocolError {
    /// Id of the start request the message belonged to, when recoverable.
    pub request_id: Option<OperationId>,
    #[source]
    pub source: serde_json::Error,
}

impl InboundMessage {
    /// Decode one text frame from the controller.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(raw).map_err(|source| ProtocolError {
            request_id: None,
            source,
        })?;

        let is_cancel = value.get("event_type").and_then(Value::as_str) == Some(CANCEL_EVENT);
        // Errors are only reported back for start requests.
        let request_id = if is_cancel {
            None
        } else {
            value
                .get("request_id")
                .and_then(|id| OperationId::deserialize(id).ok())
        };

        let parsed = if is_cancel {
            #[derive(Deserialize)]
            struct Cancel {
                request_id: OperationId,
            }
            serde_json::from_value::<Cancel>(value).map(|c| InboundMessage::Cancel {
                request_id: c.request_id,
            })
        } else {
            serde_json::from_value::<RequestSpec>(value).map(InboundMessage::Start)
        };

        parsed.map_err(|source| ProtocolError { request_id, source })
    }
}

/// Messages the relay sends to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum OutboundMessage {
    ResponseHeaders {
        request_id: OperationId,
        status: u16,
        headers: BTreeMap<String, String>,
    },
    Chunk {
        request_id: OperationId,
        data: String,
    },
    StreamClose {
        request_id: OperationId,
    },
    Error {
        request_id: OperationId,
        status: u16,
        message: String,
    },
}

impl OutboundMessage {
    pub fn request_id(&self) -> &OperationId {
        match self {
            OutboundMessage::ResponseHeaders { request_id, .. }
            | OutboundMessage::Chunk { request_id, .. }
            | OutboundMessage::StreamClose { request_id }
            | OutboundMessage::Error { request_id, .. } => request_id,
        }
    }

    /// `stream_close` and `error` end an operation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutboundMessage::StreamClose { .. } | OutboundMessage::Error { .. }
        )
    }
}
