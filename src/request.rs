use crate::constants::{CODE_SEARCH_SUFFIX, MAXIMAL_EFFORT_MODEL, SESSIONS_PATH, STREAM_SUFFIX};
use crate::types::*;
use serde::Serialize;
use std::borrow::Cow;

/// Removes NUL and other C0 control characters plus DEL.
pub fn sanitize_content(content: &str) -> Cow<'_, str> {
    if content.chars().any(is_stripped) {
        Cow::Owned(content.chars().filter(|c| !is_stripped(*c)).collect())
    } else {
        Cow::Borrowed(content)
    }
}

fn is_stripped(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{1f}' | '\u{7f}')
}

/// Mode toggles as the UI layer reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeFlags {
    pub deep_reasoning: bool,
    pub maximal_effort: bool,
    pub code_search: bool,
}

impl ModeFlags {
    /// Re-applies mutual exclusion at the trust boundary: maximal effort
    /// clears deep reasoning.
    pub fn normalize(self) -> Self {
        if self.deep_reasoning && self.maximal_effort {
            tracing::warn!(
                "[REQUEST] Both deep reasoning and maximal effort requested; using maximal effort"
            );
            return Self {
                deep_reasoning: false,
                ..self
            };
        }
        self
    }

    pub fn mode(self) -> RequestMode {
        let flags = self.normalize();
        if flags.code_search {
            if flags.deep_reasoning || flags.maximal_effort {
                tracing::debug!("[REQUEST] Code search ignores reasoning mode flags");
            }
            RequestMode::CodeSearch
        } else if flags.maximal_effort {
            RequestMode::MaximalEffort
        } else if flags.deep_reasoning {
            RequestMode::DeepReasoning
        } else {
            RequestMode::Standard
        }
    }
}

impl From<RequestMode> for ModeFlags {
    fn from(mode: RequestMode) -> Self {
        Self {
            deep_reasoning: mode == RequestMode::DeepReasoning,
            maximal_effort: mode == RequestMode::MaximalEffort,
            code_search: mode == RequestMode::CodeSearch,
        }
    }
}

/// Body of a standard chat request. Flags appear only when set.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatRequestBody {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deep_reasoning: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_model: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CodeSearchBody {
    pub query: String,
}

/// Backend route of a streaming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    ChatStream(SessionId),
    CodeSearch(SessionId),
}

impl Route {
    pub fn path(&self) -> String {
        match self {
            Self::ChatStream(id) => format!("{}/{}/{}", SESSIONS_PATH, id, STREAM_SUFFIX),
            Self::CodeSearch(id) => format!("{}/{}/{}", SESSIONS_PATH, id, CODE_SEARCH_SUFFIX),
        }
    }
}

/// A request ready for the transport.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub route: Route,
    pub body: serde_json::Value,
    pub mode: RequestMode,
}

/// Input to the pipeline: sanitized content and one resolved mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub session_id: SessionId,
    pub content: String,
    pub mode: RequestMode,
}

impl StreamRequest {
    pub fn chat(session_id: SessionId, content: &str, flags: ModeFlags) -> Result<Self> {
        Self::build(session_id, content, flags.mode())
    }

    /// Code search carries only a query; mode flags do not apply.
    pub fn code_search(session_id: SessionId, query: &str) -> Result<Self> {
        Self::build(session_id, query, RequestMode::CodeSearch)
    }

    fn build(session_id: SessionId, content: &str, mode: RequestMode) -> Result<Self> {
        let content = sanitize_content(content);
        if content.trim().is_empty() {
            return Err(ChatError::InvalidRequest("Message cannot be empty".to_string()).into());
        }
        if session_id.0.is_empty() {
            return Err(ChatError::InvalidRequest("Session id is required".to_string()).into());
        }
        Ok(Self {
            session_id,
            content: content.into_owned(),
            mode,
        })
    }

    pub fn chat_body(&self) -> ChatRequestBody {
        ChatRequestBody {
            content: self.content.clone(),
            deep_reasoning: (self.mode == RequestMode::DeepReasoning).then_some(true),
            preferred_model: (self.mode == RequestMode::MaximalEffort)
                .then_some(MAXIMAL_EFFORT_MODEL),
        }
    }

    pub fn outbound(&self) -> Result<OutboundRequest> {
        let (route, body) = match self.mode {
            RequestMode::CodeSearch => (
                Route::CodeSearch(self.session_id.clone()),
                serde_json::to_value(CodeSearchBody {
                    query: self.content.clone(),
                })?,
            ),
            _ => (
                Route::ChatStream(self.session_id.clone()),
                serde_json::to_value(self.chat_body())?,
            ),
        };
        Ok(OutboundRequest {
            route,
            body,
            mode: self.mode,
        })
    }
}
