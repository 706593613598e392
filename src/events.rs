use crate::constants::{DATA_PREFIX, LOG_SNIPPET_CHARS};
use crate::types::StreamEvent;

/// Outcome of interpreting one `data:` line.
#[derive(Debug, PartialEq)]
pub enum LineEvent {
    Event(StreamEvent),
    /// Payload was not valid JSON or did not match its declared type.
    Malformed(String),
    /// Well-formed payload with a `type` this client does not know.
    Unknown(String),
}

/// Interprets every `data:` line of one frame, in order.
pub fn parse_frame(frame: &str) -> impl Iterator<Item = LineEvent> + '_ {
    frame
        .lines()
        .filter_map(data_payload)
        .filter(|payload| !payload.trim().is_empty())
        .map(parse_data_line)
}

fn data_payload(line: &str) -> Option<&str> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let rest = line.strip_prefix(DATA_PREFIX)?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

pub fn parse_data_line(payload: &str) -> LineEvent {
    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(StreamEvent::Unknown) => {
            tracing::debug!("[STREAM] Ignoring unknown event: {}", snippet(payload));
            LineEvent::Unknown(payload.to_string())
        }
        Ok(event) => LineEvent::Event(event),
        Err(e) => {
            tracing::warn!(
                "[STREAM] Skipping malformed event ({}): {}",
                e,
                snippet(payload)
            );
            LineEvent::Malformed(payload.to_string())
        }
    }
}

fn snippet(payload: &str) -> String {
    match payload.char_indices().nth(LOG_SNIPPET_CHARS) {
        Some((idx, _)) => format!("{}...", &payload[..idx]),
        None => payload.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_line_frame() {
        let frame = "event: chunk\ndata: {\"type\":\"content\",\"content\":\"a\"}\nid: 7\ndata:{\"type\":\"vision_result\",\"content\":\"b\"}";
        let events: Vec<_> = parse_frame(frame).collect();
        assert_eq!(
            events,
            vec![
                LineEvent::Event(StreamEvent::Content { text: "a".into() }),
                LineEvent::Event(StreamEvent::VisionResult { text: "b".into() }),
            ]
        );
    }

    #[test]
    fn test_malformed_line_does_not_hide_neighbours() {
        let frame = "data: {not valid json\ndata: {\"type\":\"complete\"}";
        let events: Vec<_> = parse_frame(frame).collect();
        assert!(matches!(events[0], LineEvent::Malformed(_)));
        assert_eq!(
            events[1],
            LineEvent::Event(StreamEvent::Complete { message: None })
        );
    }

    #[test]
    fn test_known_type_with_wrong_shape_is_malformed() {
        assert!(matches!(
            parse_data_line(r#"{"type":"content","content":42}"#),
            LineEvent::Malformed(_)
        ));
    }

    #[test]
    fn test_unknown_type() {
        assert!(matches!(
            parse_data_line(r#"{"type":"usage","tokens":12}"#),
            LineEvent::Unknown(_)
        ));
    }

    #[test]
    fn test_comments_and_blank_data_are_ignored() {
        assert_eq!(parse_frame(": keep-alive\ndata: \n").count(), 0);
    }

    #[test]
    fn test_snippet_respects_char_boundaries() {
        let long = "⚡".repeat(LOG_SNIPPET_CHARS + 5);
        assert!(snippet(&long).ends_with("..."));
    }
}
