use crate::assembler::{ChunkSink, ResponseAssembler};
use crate::events::{parse_frame, LineEvent};
use crate::frame::SseFrameCodec;
use crate::logging::StreamMetric;
use crate::request::{OutboundRequest, StreamRequest};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::transport::Transport;
use crate::types::*;
use futures_util::StreamExt;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Sends a request, decodes its event stream and retries transport
/// failures. Construct one per backend and share it by reference.
pub struct ChatPipeline<T> {
    transport: T,
    retry: RetryPolicy,
}

impl<T: Transport> ChatPipeline<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn send_message(
        &self,
        request: &StreamRequest,
        sink: &mut dyn ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<ChatMessage> {
        let outbound = request.outbound()?;
        let span = tracing::info_span!(
            "stream",
            session = %request.session_id,
            mode = %request.mode,
        );
        self.run(&request.session_id, &outbound, sink, cancel)
            .instrument(span)
            .await
    }

    pub async fn search_code(
        &self,
        session_id: SessionId,
        query: &str,
        sink: &mut dyn ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<ChatMessage> {
        let request = StreamRequest::code_search(session_id, query)?;
        self.send_message(&request, sink, cancel).await
    }

    async fn run(
        &self,
        session_id: &SessionId,
        outbound: &OutboundRequest,
        sink: &mut dyn ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<ChatMessage> {
        let mut retry = self.retry.start(outbound.mode);
        loop {
            let err = match self.attempt(session_id, outbound, sink, cancel).await {
                Ok(message) => return Ok(message),
                Err(err) => err,
            };
            match retry.on_failure(err) {
                RetryDecision::Fail(err) => return Err(err),
                RetryDecision::RetryAfter(delay) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ChatError::Cancelled.into()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    sink.on_retry(retry.attempt());
                }
            }
        }
    }

    /// One request/stream cycle. The framed reader lives in this frame only,
    /// so it is released on every return path before a retry can start.
    async fn attempt(
        &self,
        session_id: &SessionId,
        outbound: &OutboundRequest,
        sink: &mut dyn ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<ChatMessage> {
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled.into()),
            opened = self.transport.open(outbound) => opened?,
        };

        let mut frames = FramedRead::new(StreamReader::new(body), SseFrameCodec::new());
        let mut assembler = ResponseAssembler::new(session_id.clone(), outbound.mode);
        let mut metrics = StreamMetric::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("[STREAM] Cancelled after {} frames", metrics.frames);
                    return Err(ChatError::Cancelled.into());
                }
                next = frames.next() => next,
            };
            let frame = match next {
                Some(frame) => frame?,
                None => break,
            };
            metrics.frames += 1;

            for line in parse_frame(&frame) {
                match line {
                    LineEvent::Event(event) => {
                        metrics.record_event(&event);
                        assembler.push(event, sink)?;
                    }
                    LineEvent::Malformed(_) => metrics.malformed += 1,
                    LineEvent::Unknown(_) => metrics.unknown += 1,
                }
            }
        }

        if !assembler.is_completed() {
            tracing::debug!("[STREAM] Body ended without a complete event");
        }
        metrics.log_summary();
        assembler.finalize()
    }
}
