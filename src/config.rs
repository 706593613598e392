use crate::constants::{
    DEFAULT_API_URL, DEFAULT_BASE_DELAY_MS, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_MAX_ATTEMPTS,
};
use crate::request::ModeFlags;
use crate::retry::RetryPolicy;
use clap::Parser;
use std::path::PathBuf;

pub const API_URL_ENV: &str = "SPARKSTREAM_API_URL";
pub const TOKEN_ENV: &str = "SPARKSTREAM_TOKEN";
pub const CONNECT_TIMEOUT_ENV: &str = "SPARKSTREAM_CONNECT_TIMEOUT_SECS";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Stream an answer from the field assistant backend", long_about = None)]
pub struct Args {
    #[arg(long, env = API_URL_ENV, default_value = DEFAULT_API_URL)]
    pub api_url: String,
    /// Bearer token issued by the sign-in flow.
    #[arg(long, env = TOKEN_ENV, hide_env_values = true)]
    pub token: Option<String>,
    #[arg(long)]
    pub session: String,
    #[arg(long, default_value_t = false)]
    pub deep_reasoning: bool,
    #[arg(long, default_value_t = false)]
    pub maximal_effort: bool,
    #[arg(long, default_value_t = false)]
    pub code_search: bool,
    /// Wait for the session title refresh before exiting.
    #[arg(long, default_value_t = false)]
    pub show_title: bool,
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout_secs: u64,
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
    #[arg(long, default_value_t = DEFAULT_BASE_DELAY_MS)]
    pub base_delay_ms: u64,
    #[arg(long, default_value = "sparkstream-offline.jsonl")]
    pub offline_queue: PathBuf,
    /// Write logs to a daily rolling file in this directory instead of stderr.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub json_logs: bool,
    #[arg(required = true)]
    pub message: Vec<String>,
}

impl Args {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            api_url: normalize_url(&self.api_url),
            bearer_token: self.token.clone().filter(|t| !t.is_empty()),
            connect_timeout_secs: self.connect_timeout_secs,
            retry: RetryPolicy::new(self.max_attempts, self.base_delay_ms),
        }
    }

    pub fn mode_flags(&self) -> ModeFlags {
        ModeFlags {
            deep_reasoning: self.deep_reasoning,
            maximal_effort: self.maximal_effort,
            code_search: self.code_search,
        }
    }

    pub fn message_text(&self) -> String {
        self.message.join(" ")
    }
}

/// Settings for talking to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_url: String,
    pub bearer_token: Option<String>,
    pub connect_timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            bearer_token: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let api_url = match lookup(API_URL_ENV) {
            Some(url) if !url.trim().is_empty() => normalize_url(&url),
            _ => defaults.api_url,
        };
        let connect_timeout_secs = match lookup(CONNECT_TIMEOUT_ENV).map(|v| v.parse::<u64>()) {
            Some(Ok(secs)) => secs,
            Some(Err(e)) => {
                tracing::warn!("Ignoring invalid {}: {}", CONNECT_TIMEOUT_ENV, e);
                defaults.connect_timeout_secs
            }
            None => defaults.connect_timeout_secs,
        };
        Self {
            api_url,
            bearer_token: lookup(TOKEN_ENV).filter(|t| !t.is_empty()),
            connect_timeout_secs,
            retry: defaults.retry,
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
