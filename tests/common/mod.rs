#![allow(dead_code)]

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, Stream, StreamExt};
use futures_util::FutureExt;
use sparkstream::request::OutboundRequest;
use sparkstream::sync::{SessionDirectory, SessionSummary};
use sparkstream::transport::{ByteStream, Transport};
use sparkstream::*;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::time::Instant;

/// What one call to `open` produces.
pub enum Script {
    Body(Vec<std::io::Result<Bytes>>),
    /// A body that never yields after the given chunks.
    Stalled(Vec<std::io::Result<Bytes>>),
    Fail(ChatError),
}

impl Script {
    pub fn frames(frames: &[&str]) -> Self {
        Script::Body(
            frames
                .iter()
                .map(|f| Ok(Bytes::copy_from_slice(f.as_bytes())))
                .collect(),
        )
    }

    pub fn chunks(chunks: Vec<Vec<u8>>) -> Self {
        Script::Body(chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect())
    }

    pub fn connect_failed() -> Self {
        Script::Fail(ChatError::Transport {
            failure: TransportFailure::ConnectFailed,
            detail: "connection refused".to_string(),
        })
    }

    /// Streams `frames`, then drops the connection mid-body.
    pub fn reset_after(frames: &[&str]) -> Self {
        let mut chunks: Vec<std::io::Result<Bytes>> = frames
            .iter()
            .map(|f| Ok(Bytes::copy_from_slice(f.as_bytes())))
            .collect();
        chunks.push(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )));
        Script::Body(chunks)
    }
}

pub fn sse(json: &str) -> String {
    format!("data: {}\n\n", json)
}

pub fn content(text: &str) -> String {
    sse(&serde_json::json!({ "type": "content", "content": text }).to_string())
}

#[derive(Default)]
pub struct Counters {
    pub opens: AtomicUsize,
    pub releases: AtomicUsize,
}

/// Transport that replays a fixed list of scripts, one per attempt.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    pub counters: Arc<Counters>,
    pub opened_at: Arc<Mutex<Vec<Instant>>>,
    pub requests: Arc<Mutex<Vec<OutboundRequest>>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            ..Self::default()
        }
    }

    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.counters.releases.load(Ordering::SeqCst)
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.opened_at.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn open<'a>(&'a self, request: &'a OutboundRequest) -> BoxFuture<'a, Result<ByteStream>> {
        async move {
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            self.opened_at.lock().unwrap().push(Instant::now());
            self.requests.lock().unwrap().push(request.clone());
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .expect("transport opened more often than scripted");
            let body: ByteStream = match script {
                Script::Fail(err) => return Err(ObservedError::from(err)),
                Script::Body(chunks) => stream::iter(chunks).boxed(),
                Script::Stalled(chunks) => stream::iter(chunks).chain(stream::pending()).boxed(),
            };
            let counted: ByteStream = CountedStream {
                inner: body,
                counters: self.counters.clone(),
            }
            .boxed();
            Ok(counted)
        }
        .boxed()
    }
}

/// Counts its own drop as a released reader.
struct CountedStream {
    inner: ByteStream,
    counters: Arc<Counters>,
}

impl Stream for CountedStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for CountedStream {
    fn drop(&mut self) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Collects fragments and retry notifications.
#[derive(Default, Debug)]
pub struct RecordingSink {
    pub chunks: Vec<String>,
    pub retries: Vec<u32>,
}

impl RecordingSink {
    pub fn text(&self) -> String {
        self.chunks.concat()
    }
}

impl ChunkSink for RecordingSink {
    fn on_chunk(&mut self, fragment: &str) {
        self.chunks.push(fragment.to_string());
    }

    fn on_retry(&mut self, attempt: u32) {
        self.retries.push(attempt);
        self.chunks.clear();
    }
}

/// Session directory that records when it was asked.
#[derive(Default)]
pub struct RecordingDirectory {
    pub calls: Mutex<Vec<Instant>>,
}

impl RecordingDirectory {
    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl SessionDirectory for RecordingDirectory {
    fn refresh_sessions(&self) -> BoxFuture<'_, Result<Vec<SessionSummary>>> {
        async move {
            self.calls.lock().unwrap().push(Instant::now());
            Ok(vec![SessionSummary {
                id: "s1".into(),
                title: Some("Panel upgrade".to_string()),
            }])
        }
        .boxed()
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl sparkstream::sync::Notifier for RecordingNotifier {
    fn notify_error(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
