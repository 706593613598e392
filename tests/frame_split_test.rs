mod common;

use common::*;
use sparkstream::events::{parse_frame, LineEvent};
use sparkstream::frame::FrameBuffer;
use sparkstream::*;
use tokio_util::sync::CancellationToken;

const FRAGMENTS: [&str; 3] = ["Check the ", "Ω reading ⚡ ", "before re-energizing."];

fn wire() -> Vec<u8> {
    FRAGMENTS
        .iter()
        .map(|f| content(f))
        .collect::<String>()
        .into_bytes()
}

fn fragments_of(frames: &[String]) -> Vec<String> {
    frames
        .iter()
        .flat_map(|frame| parse_frame(frame).collect::<Vec<_>>())
        .filter_map(|line| match line {
            LineEvent::Event(StreamEvent::Content { text }) => Some(text),
            _ => None,
        })
        .collect()
}

fn assert_no_complete_frame_pending(buffer: &FrameBuffer) {
    assert!(
        !buffer.pending().windows(2).any(|w| w == b"\n\n"),
        "a complete frame was left in the buffer"
    );
}

#[test]
fn test_every_two_way_split_yields_same_fragments() {
    let bytes = wire();
    for split in 0..=bytes.len() {
        let mut buffer = FrameBuffer::new();
        let mut frames = buffer.push(&bytes[..split]);
        assert_no_complete_frame_pending(&buffer);
        frames.extend(buffer.push(&bytes[split..]));
        assert_no_complete_frame_pending(&buffer);
        frames.extend(buffer.finish());

        assert_eq!(fragments_of(&frames), FRAGMENTS, "split at byte {}", split);
    }
}

#[test]
fn test_byte_at_a_time() {
    let bytes = wire();
    let mut buffer = FrameBuffer::new();
    let mut frames = Vec::new();
    for byte in &bytes {
        frames.extend(buffer.push(std::slice::from_ref(byte)));
        assert_no_complete_frame_pending(&buffer);
    }
    assert!(buffer.finish().is_none());
    assert_eq!(fragments_of(&frames), FRAGMENTS);
}

#[test]
fn test_three_way_splits() {
    let bytes = wire();
    let step = 7;
    for first in (0..=bytes.len()).step_by(step) {
        for second in (first..=bytes.len()).step_by(step) {
            let mut buffer = FrameBuffer::new();
            let mut frames = buffer.push(&bytes[..first]);
            frames.extend(buffer.push(&bytes[first..second]));
            frames.extend(buffer.push(&bytes[second..]));
            frames.extend(buffer.finish());
            assert_eq!(
                fragments_of(&frames),
                FRAGMENTS,
                "splits at {} and {}",
                first,
                second
            );
        }
    }
}

#[tokio::test]
async fn test_pipeline_output_is_independent_of_chunking() {
    let bytes = wire();
    for split in 0..=bytes.len() {
        let transport = ScriptedTransport::new(vec![Script::chunks(vec![
            bytes[..split].to_vec(),
            bytes[split..].to_vec(),
        ])]);
        let pipeline = ChatPipeline::new(transport);
        let mut sink = RecordingSink::default();
        let request = StreamRequest::chat("s1".into(), "q", ModeFlags::default()).unwrap();

        let message = pipeline
            .send_message(&request, &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.chunks, FRAGMENTS, "split at byte {}", split);
        assert_eq!(message.content, FRAGMENTS.concat());
    }
}
