use std::time::Duration;

/// Frames on the event stream are separated by one blank line.
pub const FRAME_DELIMITER: &[u8] = b"\n\n";

/// Prefix of the lines that carry an event payload.
pub const DATA_PREFIX: &str = "data:";

/// Model id the backend reserves for maximal-effort requests.
pub const MAXIMAL_EFFORT_MODEL: &str = "o3";

/// Retry defaults: one initial attempt plus two retries, 1s then 2s apart.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Backend routes, relative to the configured API url.
pub const SESSIONS_PATH: &str = "/api/chat/sessions";
pub const STREAM_SUFFIX: &str = "stream";
pub const CODE_SEARCH_SUFFIX: &str = "code-search";

pub const DEFAULT_API_URL: &str = "http://localhost:5000";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Session-list refresh delays after the first exchange of a session.
pub const TITLE_REFRESH_STANDARD: Duration = Duration::from_millis(1500);
pub const TITLE_REFRESH_HIGH_EFFORT: Duration = Duration::from_secs(4);
pub const TITLE_REFRESH_SAFETY_NET: Duration = Duration::from_secs(10);

/// Prefix for ids of optimistic placeholder messages.
pub const PLACEHOLDER_ID_PREFIX: &str = "temp-";

/// Longest payload snippet echoed into logs for a malformed line.
pub const LOG_SNIPPET_CHARS: usize = 200;

pub const OFFLINE_NOTICE: &str =
    "You're offline. This message has been queued and will be sent when the connection returns.";
