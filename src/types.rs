use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing_error::SpanTrace;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct SessionId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl MessageId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Locally generated id for an optimistic placeholder.
    pub fn placeholder() -> Self {
        Self(format!(
            "{}{}",
            crate::constants::PLACEHOLDER_ID_PREFIX,
            uuid::Uuid::new_v4().simple()
        ))
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.starts_with(crate::constants::PLACEHOLDER_ID_PREFIX)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

/// --- REQUEST MODES ---

/// Processing mode of one request. Exactly one is active per request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    #[default]
    Standard,
    DeepReasoning,
    MaximalEffort,
    CodeSearch,
}

impl RequestMode {
    pub fn is_high_effort(self) -> bool {
        matches!(self, Self::DeepReasoning | Self::MaximalEffort)
    }
}

impl fmt::Display for RequestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::DeepReasoning => write!(f, "deep-reasoning"),
            Self::MaximalEffort => write!(f, "maximal-effort"),
            Self::CodeSearch => write!(f, "code-search"),
        }
    }
}

/// --- MESSAGES ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MessageMetadata {
    #[serde(default, alias = "deepReasoning")]
    pub deep_reasoning: bool,
    #[serde(default, alias = "maximalEffort")]
    pub maximal_effort: bool,
    #[serde(default, alias = "modelUsed", skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    #[serde(
        default,
        alias = "reasoningRemaining",
        skip_serializing_if = "Option::is_none"
    )]
    pub reasoning_remaining: Option<u32>,
    #[serde(
        default,
        alias = "maximalRemaining",
        skip_serializing_if = "Option::is_none"
    )]
    pub maximal_remaining: Option<u32>,
    #[serde(default, alias = "codeSearch")]
    pub code_search: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, alias = "name")]
    pub filename: String,
    #[serde(
        default,
        alias = "contentType",
        alias = "mime_type",
        skip_serializing_if = "Option::is_none"
    )]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "WireChatMessage")]
pub struct ChatMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// Inbound shape of a message. Backends differ in naming, and some send
/// both spellings of a field, so each spelling gets its own slot.
#[derive(Deserialize)]
struct WireChatMessage {
    id: MessageId,
    #[serde(default)]
    session_id: Option<SessionId>,
    #[serde(default, rename = "sessionId")]
    session_id_camel: Option<SessionId>,
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
    #[serde(default)]
    created_at: Option<serde_json::Value>,
    #[serde(default, rename = "createdAt")]
    created_at_camel: Option<serde_json::Value>,
    #[serde(default)]
    metadata: Option<MessageMetadata>,
    #[serde(default)]
    attachments: Option<Vec<Attachment>>,
}

impl From<WireChatMessage> for ChatMessage {
    /// A missing session id is left empty for the caller to fill in from the
    /// stream it arrived on.
    fn from(wire: WireChatMessage) -> Self {
        let timestamp = [&wire.timestamp, &wire.created_at, &wire.created_at_camel]
            .into_iter()
            .flatten()
            .find_map(parse_timestamp)
            .unwrap_or_else(Utc::now);
        Self {
            id: wire.id,
            session_id: wire
                .session_id
                .or(wire.session_id_camel)
                .unwrap_or_else(|| SessionId(String::new())),
            role: wire.role.unwrap_or(Role::Assistant),
            content: wire.content.unwrap_or_default(),
            timestamp,
            metadata: wire.metadata,
            attachments: wire.attachments.unwrap_or_default(),
        }
    }
}

impl ChatMessage {
    pub fn user(session_id: SessionId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            session_id,
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
            attachments: Vec::new(),
        }
    }

    pub fn assistant(id: MessageId, session_id: SessionId, content: impl Into<String>) -> Self {
        Self {
            id,
            session_id,
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
            attachments: Vec::new(),
        }
    }
}

/// Accepts RFC 3339, naive ISO-8601 (read as UTC) or epoch milliseconds.
fn parse_timestamp(raw: &serde_json::Value) -> Option<DateTime<Utc>> {
    match raw {
        serde_json::Value::String(s) => parse_timestamp_str(s),
        serde_json::Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// --- STREAM WIRE TYPES ---

/// Quota and model metadata sent out of band on the stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConfigSnapshot {
    #[serde(default, alias = "deepReasoning")]
    pub deep_reasoning: Option<bool>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, alias = "remainingDeepReasoning")]
    pub remaining_deep_reasoning: Option<u32>,
    #[serde(default, alias = "remainingMaximal")]
    pub remaining_maximal: Option<u32>,
}

/// One decoded `data:` payload.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Content {
        #[serde(rename = "content")]
        text: String,
    },
    Message {
        message: ChatMessage,
    },
    Config(ConfigSnapshot),
    Error {
        error: String,
    },
    VisionStart {},
    VisionResult {
        #[serde(rename = "content")]
        text: String,
    },
    Complete {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// --- ERRORS ---

/// Transport-level failure classes. Only these are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// The request could not be dispatched at all.
    ConnectFailed,
    ConnectionClosed,
    IncompleteRead,
    Network,
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed => write!(f, "connection failed"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::IncompleteRead => write!(f, "incomplete read"),
            Self::Network => write!(f, "network failure"),
        }
    }
}

impl TransportFailure {
    pub fn from_io_kind(kind: std::io::ErrorKind) -> Self {
        use std::io::ErrorKind;
        match kind {
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                Self::ConnectionClosed
            }
            ErrorKind::UnexpectedEof => Self::IncompleteRead,
            ErrorKind::ConnectionRefused | ErrorKind::NotConnected | ErrorKind::AddrNotAvailable => {
                Self::ConnectFailed
            }
            _ => Self::Network,
        }
    }
}

/// Which daily quota a rate-limit response refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    DeepReasoning,
    MaximalEffort,
    General,
}

impl QuotaKind {
    pub fn for_mode(mode: RequestMode) -> Self {
        match mode {
            RequestMode::DeepReasoning => Self::DeepReasoning,
            RequestMode::MaximalEffort => Self::MaximalEffort,
            RequestMode::Standard | RequestMode::CodeSearch => Self::General,
        }
    }
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeepReasoning => write!(f, "deep reasoning"),
            Self::MaximalEffort => write!(f, "maximal effort"),
            Self::General => write!(f, "general"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Transport error ({failure}): {detail}")]
    Transport {
        failure: TransportFailure,
        detail: String,
    },

    #[error("Rate limited ({quota}): {message}")]
    RateLimited { quota: QuotaKind, message: String },

    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    #[error("Upstream error (status {status}): {message}")]
    Http { status: u16, message: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Malformed stream: {0}")]
    MalformedStream(String),

    #[error("{} (after {attempts} attempts, last failure: {last}: {detail})", exhausted_copy(*mode))]
    RetriesExhausted {
        mode: RequestMode,
        attempts: u32,
        last: TransportFailure,
        detail: String,
    },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Offline queue error: {0}")]
    Queue(String),
}

impl From<std::io::Error> for ChatError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport {
            failure: TransportFailure::from_io_kind(e.kind()),
            detail: e.to_string(),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        // Misconfiguration fails the same way on every attempt.
        if e.is_builder() {
            return Self::InvalidRequest(format!("Could not build request: {}", e));
        }
        if e.is_redirect() {
            return Self::Http {
                status: e.status().map_or(0, |s| s.as_u16()),
                message: format!("Redirect not followed: {}", e),
            };
        }
        let failure = if e.is_connect() {
            TransportFailure::ConnectFailed
        } else if e.is_body() || e.is_decode() {
            TransportFailure::IncompleteRead
        } else {
            TransportFailure::Network
        };
        Self::Transport {
            failure,
            detail: e.to_string(),
        }
    }
}

impl ChatError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// True when no request ever reached the backend.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::Transport {
                failure: TransportFailure::ConnectFailed,
                ..
            } | Self::RetriesExhausted {
                last: TransportFailure::ConnectFailed,
                ..
            }
        )
    }

    pub fn rate_limited(mode: RequestMode, message: impl Into<String>) -> Self {
        Self::RateLimited {
            quota: QuotaKind::for_mode(mode),
            message: message.into(),
        }
    }

    /// Text shown in place of the assistant reply when a request fails.
    pub fn user_message(&self) -> String {
        match self {
            Self::RateLimited { quota, .. } => rate_limit_copy(*quota).to_string(),
            Self::RetriesExhausted { mode, .. } => exhausted_copy(*mode).to_string(),
            Self::Transport { .. } => exhausted_copy(RequestMode::Standard).to_string(),
            Self::Unauthenticated(_) => {
                "Your session has expired. Please sign in again.".to_string()
            }
            Self::Http { message, .. } | Self::Stream(message) => message.clone(),
            Self::MalformedStream(_) => {
                "The assistant returned an incomplete response. Please try again.".to_string()
            }
            Self::Cancelled => "Request cancelled.".to_string(),
            Self::InvalidRequest(message) => message.clone(),
            Self::Serialization(_) | Self::Queue(_) => {
                "Something went wrong. Please try again.".to_string()
            }
        }
    }
}

fn exhausted_copy(mode: RequestMode) -> &'static str {
    match mode {
        RequestMode::DeepReasoning => {
            "The deep reasoning request lost its connection after several attempts. \
             Complex questions can take a long time to answer; please try again or simplify the question."
        }
        RequestMode::MaximalEffort => {
            "The maximal effort request lost its connection after several attempts. \
             These requests take the longest to process; please try again in a moment."
        }
        RequestMode::Standard | RequestMode::CodeSearch => {
            "Connection to the assistant was interrupted. Please check your network and try again."
        }
    }
}

fn rate_limit_copy(quota: QuotaKind) -> &'static str {
    match quota {
        QuotaKind::DeepReasoning => {
            "You've reached your daily deep reasoning limit. Try again tomorrow or switch to standard mode."
        }
        QuotaKind::MaximalEffort => {
            "You've reached your daily maximal effort limit. Try again tomorrow or switch to standard mode."
        }
        QuotaKind::General => "Too many requests. Please wait a moment and try again.",
    }
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: ChatError,
    pub span_trace: SpanTrace,
}

impl std::fmt::Display for ObservedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n\nSpan Trace:\n{}", self.inner, self.span_trace)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<ChatError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;
