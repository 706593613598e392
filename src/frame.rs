use crate::constants::FRAME_DELIMITER;
use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Splits an event-stream body into blank-line delimited frames.
///
/// Splitting is done on raw bytes and each frame is decoded only once it is
/// complete, so a UTF-8 sequence or a delimiter straddling two reads is
/// reassembled before it is looked at.
#[derive(Debug, Default, Clone)]
pub struct SseFrameCodec {
    /// Offset up to which the buffer is known to hold no delimiter.
    next_index: usize,
}

impl SseFrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_frame(&mut self, buf: &mut BytesMut) -> Option<String> {
        let start = self.next_index.min(buf.len());
        match find_delimiter(&buf[start..]) {
            Some(offset) => {
                let frame = buf.split_to(start + offset);
                buf.advance(FRAME_DELIMITER.len());
                self.next_index = 0;
                Some(String::from_utf8_lossy(&frame).into_owned())
            }
            None => {
                // The last byte may be the first half of a delimiter.
                self.next_index = buf.len().saturating_sub(FRAME_DELIMITER.len() - 1);
                None
            }
        }
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}

impl Decoder for SseFrameCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, std::io::Error> {
        Ok(self.take_frame(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, std::io::Error> {
        if let Some(frame) = self.take_frame(buf) {
            return Ok(Some(frame));
        }
        self.next_index = 0;
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split();
        let text = String::from_utf8_lossy(&rest).into_owned();
        if text.trim().is_empty() {
            return Ok(None);
        }
        tracing::debug!(
            "[FRAME] Stream ended without a trailing delimiter; flushing {} bytes",
            rest.len()
        );
        Ok(Some(text))
    }
}

/// Push-style wrapper over [`SseFrameCodec`] for callers that receive raw
/// chunks themselves instead of handing over a byte stream.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    codec: SseFrameCodec,
    pending: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one chunk and returns every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.codec.take_frame(&mut self.pending) {
            frames.push(frame);
        }
        frames
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Ends the stream, returning a trailing undelimited frame if any.
    pub fn finish(mut self) -> Option<String> {
        self.codec.decode_eof(&mut self.pending).ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_chunk_multiple_frames() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(b"data: a\n\ndata: b\n\ndata: c");
        assert_eq!(frames, vec!["data: a", "data: b"]);
        assert_eq!(buffer.pending(), b"data: c");
    }

    #[test]
    fn test_delimiter_split_across_chunks() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(b"data: {\"type\":\"complete\"}\n").is_empty());
        let frames = buffer.push(b"\ndata: next");
        assert_eq!(frames, vec!["data: {\"type\":\"complete\"}"]);
        assert_eq!(buffer.pending(), b"data: next");
    }

    #[test]
    fn test_multibyte_sequence_split_across_chunks() {
        let text = "data: voltage ⚡ ok\n\n".as_bytes();
        let bolt = text.iter().position(|b| *b == 0xE2).unwrap();
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(&text[..bolt + 1]).is_empty());
        assert!(buffer.push(&text[bolt + 1..bolt + 2]).is_empty());
        let frames = buffer.push(&text[bolt + 2..]);
        assert_eq!(frames, vec!["data: voltage ⚡ ok"]);
    }

    #[test]
    fn test_pending_never_holds_complete_frame() {
        let mut buffer = FrameBuffer::new();
        for chunk in [&b"data: 1\n"[..], b"\ndata: 2\n\n\n", b"\ndata: 3"] {
            buffer.push(chunk);
            assert!(find_delimiter(buffer.pending()).is_none());
        }
    }

    #[test]
    fn test_finish_flushes_trailing_frame() {
        let mut buffer = FrameBuffer::new();
        buffer.push(b"data: x\n\ndata: tail");
        assert_eq!(buffer.finish().as_deref(), Some("data: tail"));

        let mut blank = FrameBuffer::new();
        blank.push(b"data: x\n\n\n");
        assert_eq!(blank.finish(), None);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(b"data: \xff\n\n");
        assert_eq!(frames, vec!["data: \u{fffd}"]);
    }
}
