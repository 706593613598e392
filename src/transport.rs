use crate::config::ClientConfig;
use crate::constants::SESSIONS_PATH;
use crate::request::OutboundRequest;
use crate::sync::{SessionDirectory, SessionSummary};
use crate::types::*;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;

/// Response body of an opened stream. Dropping it releases the connection.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Issues a streaming request and hands back its body.
pub trait Transport: Send + Sync {
    fn open<'a>(&'a self, request: &'a OutboundRequest) -> BoxFuture<'a, Result<ByteStream>>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn open<'a>(&'a self, request: &'a OutboundRequest) -> BoxFuture<'a, Result<ByteStream>> {
        (**self).open(request)
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self> {
        // No overall timeout: long reasoning streams are bounded by the backend.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: ClientConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url, path)
    }

    fn bearer_token(&self) -> Result<&str> {
        match self.config.bearer_token.as_deref() {
            Some(token) => Ok(token),
            None => Err(ChatError::Unauthenticated("no bearer token available".to_string()).into()),
        }
    }

    async fn open_stream(&self, request: &OutboundRequest) -> Result<ByteStream> {
        let token = self.bearer_token()?;
        let url = self.url(&request.route.path());
        tracing::debug!("[HTTP] POST {} ({} mode)", url, request.mode);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request.body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response, request.mode).await.into());
        }

        Ok(response.bytes_stream().map(|chunk| chunk.map_err(body_error)).boxed())
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let token = self.bearer_token()?;
        let response = self
            .client
            .get(self.url(SESSIONS_PATH))
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response, RequestMode::Standard).await.into());
        }
        let text = response.text().await?;
        let list: SessionList = serde_json::from_str(&text)?;
        Ok(match list {
            SessionList::Bare(sessions) => sessions,
            SessionList::Wrapped { sessions } => sessions,
        })
    }
}

impl Transport for HttpTransport {
    fn open<'a>(&'a self, request: &'a OutboundRequest) -> BoxFuture<'a, Result<ByteStream>> {
        self.open_stream(request).boxed()
    }
}

impl SessionDirectory for HttpTransport {
    fn refresh_sessions(&self) -> BoxFuture<'_, Result<Vec<SessionSummary>>> {
        self.list_sessions().boxed()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SessionList {
    Bare(Vec<SessionSummary>),
    Wrapped { sessions: Vec<SessionSummary> },
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Turns a non-2xx response into an error, preferring the backend's own
/// message over the status text.
async fn error_from_response(response: reqwest::Response, mode: RequestMode) -> ChatError {
    let status = response.status();
    let body = match response.text().await {
        Ok(text) => text,
        Err(e) => {
            tracing::debug!("[HTTP] Could not read error body: {}", e);
            String::new()
        }
    };
    let parsed = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.error.or(b.message));
    let message = match parsed {
        Some(m) if !m.is_empty() => m,
        _ => match status.canonical_reason() {
            Some(reason) => reason.to_string(),
            None => format!("HTTP {}", status.as_u16()),
        },
    };
    tracing::error!("[HTTP] Request failed with status {}: {}", status, message);

    match status {
        reqwest::StatusCode::TOO_MANY_REQUESTS => ChatError::rate_limited(mode, message),
        reqwest::StatusCode::UNAUTHORIZED => ChatError::Unauthenticated(message),
        _ => ChatError::Http {
            status: status.as_u16(),
            message,
        },
    }
}

fn body_error(e: reqwest::Error) -> std::io::Error {
    let kind = if e.is_timeout() {
        std::io::ErrorKind::TimedOut
    } else if e.is_body() || e.is_decode() {
        std::io::ErrorKind::UnexpectedEof
    } else {
        std::io::ErrorKind::ConnectionReset
    };
    std::io::Error::new(kind, e)
}
