use crate::constants::MAXIMAL_EFFORT_MODEL;
use crate::types::*;

/// Receives live fragments while a response streams in.
pub trait ChunkSink: Send {
    /// Called once per fragment, in arrival order, with only the new text.
    fn on_chunk(&mut self, fragment: &str);

    /// Called before a retry; fragments already delivered belong to a
    /// failed attempt and will be sent again.
    fn on_retry(&mut self, _attempt: u32) {}
}

impl<F> ChunkSink for F
where
    F: FnMut(&str) + Send,
{
    fn on_chunk(&mut self, fragment: &str) {
        self(fragment)
    }
}

/// Folds the events of one stream into a single [`ChatMessage`].
#[derive(Debug, Clone)]
pub struct ResponseAssembler {
    session_id: SessionId,
    mode: RequestMode,
    text_buffer: String,
    saw_fragment: bool,
    config: Option<ConfigSnapshot>,
    last_message: Option<ChatMessage>,
    completed: bool,
}

impl ResponseAssembler {
    pub fn new(session_id: SessionId, mode: RequestMode) -> Self {
        Self {
            session_id,
            mode,
            text_buffer: String::new(),
            saw_fragment: false,
            config: None,
            last_message: None,
            completed: false,
        }
    }

    pub fn push(&mut self, event: StreamEvent, sink: &mut dyn ChunkSink) -> Result<()> {
        match event {
            StreamEvent::Content { text } | StreamEvent::VisionResult { text } => {
                self.saw_fragment = true;
                sink.on_chunk(&text);
                self.text_buffer.push_str(&text);
            }
            StreamEvent::Config(config) => {
                tracing::debug!(
                    "[ASSEMBLER] Config: model={:?} deep_reasoning={:?}",
                    config.model,
                    config.deep_reasoning
                );
                self.config = Some(config);
            }
            StreamEvent::Message { message } => {
                self.last_message = Some(message);
            }
            StreamEvent::Error { error } => {
                tracing::error!("[ASSEMBLER] Backend reported error: {}", error);
                return Err(ChatError::Stream(error).into());
            }
            StreamEvent::VisionStart {} => {
                tracing::info!("[ASSEMBLER] Image analysis started");
            }
            StreamEvent::Complete { message } => {
                if let Some(m) = message {
                    tracing::debug!("[ASSEMBLER] Complete: {}", m);
                }
                self.completed = true;
            }
            StreamEvent::Unknown => {}
        }
        Ok(())
    }

    pub fn text(&self) -> &str {
        &self.text_buffer
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn finalize(self) -> Result<ChatMessage> {
        if let Some(mut message) = self.last_message {
            if message.session_id.0.is_empty() {
                message.session_id = self.session_id.clone();
            }
            if let Some(config) = &self.config {
                let metadata = message.metadata.get_or_insert_with(MessageMetadata::default);
                if metadata.reasoning_remaining.is_none() {
                    metadata.reasoning_remaining = config.remaining_deep_reasoning;
                }
                if metadata.maximal_remaining.is_none() {
                    metadata.maximal_remaining = config.remaining_maximal;
                }
                if metadata.model_used.is_none() {
                    metadata.model_used = config.model.clone();
                }
            }
            return Ok(message);
        }

        if !self.saw_fragment {
            return Err(ChatError::MalformedStream(
                "stream ended without content or message events".to_string(),
            )
            .into());
        }

        let code_search = self.mode == RequestMode::CodeSearch;
        let metadata = match &self.config {
            Some(config) => Some(MessageMetadata {
                deep_reasoning: config.deep_reasoning.unwrap_or_default(),
                maximal_effort: config.model.as_deref() == Some(MAXIMAL_EFFORT_MODEL),
                model_used: config.model.clone(),
                reasoning_remaining: config.remaining_deep_reasoning,
                maximal_remaining: config.remaining_maximal,
                code_search,
            }),
            None if code_search => Some(MessageMetadata {
                code_search,
                ..MessageMetadata::default()
            }),
            None => None,
        };

        let mut message = ChatMessage::assistant(MessageId::new(), self.session_id, self.text_buffer);
        message.metadata = metadata;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(text: &str) -> StreamEvent {
        StreamEvent::Content { text: text.into() }
    }

    #[test]
    fn test_fragments_reach_sink_individually() {
        let mut seen = Vec::new();
        let mut sink = |fragment: &str| seen.push(fragment.to_string());
        let mut asm = ResponseAssembler::new("s1".into(), RequestMode::Standard);
        asm.push(content("Hel"), &mut sink).unwrap();
        asm.push(StreamEvent::VisionResult { text: "lo".into() }, &mut sink)
            .unwrap();
        let message = asm.finalize().unwrap();
        assert_eq!(seen, vec!["Hel", "lo"]);
        assert_eq!(message.content, "Hello");
        assert_eq!(message.role, Role::Assistant);
        assert!(message.metadata.is_none());
    }

    #[test]
    fn test_config_last_write_wins() {
        let mut sink = |_: &str| {};
        let mut asm = ResponseAssembler::new("s1".into(), RequestMode::MaximalEffort);
        asm.push(
            StreamEvent::Config(ConfigSnapshot {
                deep_reasoning: Some(true),
                model: Some("gpt-4o".into()),
                remaining_deep_reasoning: Some(3),
                remaining_maximal: None,
            }),
            &mut sink,
        )
        .unwrap();
        asm.push(
            StreamEvent::Config(ConfigSnapshot {
                model: Some(MAXIMAL_EFFORT_MODEL.into()),
                remaining_maximal: Some(1),
                ..ConfigSnapshot::default()
            }),
            &mut sink,
        )
        .unwrap();
        asm.push(content("done"), &mut sink).unwrap();

        let metadata = asm.finalize().unwrap().metadata.unwrap();
        assert!(!metadata.deep_reasoning);
        assert!(metadata.maximal_effort);
        assert_eq!(metadata.reasoning_remaining, None);
        assert_eq!(metadata.maximal_remaining, Some(1));
    }

    #[test]
    fn test_message_takes_precedence_and_merges_quota() {
        let mut sink = |_: &str| {};
        let mut asm = ResponseAssembler::new("s1".into(), RequestMode::DeepReasoning);
        asm.push(content("draft"), &mut sink).unwrap();
        asm.push(
            StreamEvent::Message {
                message: ChatMessage::assistant("m9".into(), "s1".into(), "final"),
            },
            &mut sink,
        )
        .unwrap();
        asm.push(content(" trailing"), &mut sink).unwrap();
        asm.push(
            StreamEvent::Config(ConfigSnapshot {
                remaining_deep_reasoning: Some(4),
                ..ConfigSnapshot::default()
            }),
            &mut sink,
        )
        .unwrap();

        let message = asm.finalize().unwrap();
        assert_eq!(message.id, MessageId::from("m9"));
        assert_eq!(message.content, "final");
        assert_eq!(message.metadata.unwrap().reasoning_remaining, Some(4));
    }

    #[test]
    fn test_error_event_is_terminal() {
        let mut sink = |_: &str| {};
        let mut asm = ResponseAssembler::new("s1".into(), RequestMode::Standard);
        let err = asm
            .push(StreamEvent::Error { error: "boom".into() }, &mut sink)
            .unwrap_err();
        assert!(matches!(err.inner, ChatError::Stream(ref m) if m == "boom"));
    }

    #[test]
    fn test_empty_stream_is_malformed() {
        let mut sink = |_: &str| {};
        let mut asm = ResponseAssembler::new("s1".into(), RequestMode::Standard);
        asm.push(StreamEvent::Complete { message: None }, &mut sink)
            .unwrap();
        assert!(asm.is_completed());
        let err = asm.finalize().unwrap_err();
        assert!(matches!(err.inner, ChatError::MalformedStream(_)));
    }

    #[test]
    fn test_code_search_result_is_flagged() {
        let mut sink = |_: &str| {};
        let mut asm = ResponseAssembler::new("s1".into(), RequestMode::CodeSearch);
        asm.push(content("NEC 210.8"), &mut sink).unwrap();
        let metadata = asm.finalize().unwrap().metadata.unwrap();
        assert!(metadata.code_search);
    }
}
