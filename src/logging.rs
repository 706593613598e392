use crate::types::StreamEvent;
use std::panic;
use std::path::Path;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

pub const DEFAULT_FILTER: &str = "sparkstream=info,flight_recorder=info";
pub const LOG_FILE_PREFIX: &str = "sparkstream.log";

/// Installs the global subscriber. Logs go to stderr, or to a daily rolling
/// file under `log_dir`; the returned guard must outlive the program's
/// logging.
pub fn init_tracing(log_dir: Option<&Path>, json: bool) -> WorkerGuard {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());

    let (writer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            tracing_appender::non_blocking(appender)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };
    let ansi = log_dir.is_none();

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed()
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(tracing_error::ErrorLayer::default())
        .try_init();
    if let Err(e) = installed {
        eprintln!("Logging already initialized: {}", e);
    }
    guard
}

/// Sets up a global panic hook that logs panics using tracing.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            target: "panic",
            message = %message,
            location = %location,
            backtrace = %backtrace,
            "FATAL: Application panicked"
        );

        original_hook(panic_info);
    }));
}

/// Per-attempt counters, summarized once the stream ends.
#[derive(Debug, Default)]
pub struct StreamMetric {
    pub frames: usize,
    pub events: usize,
    pub fragments: usize,
    pub text_chars: usize,
    pub malformed: usize,
    pub unknown: usize,
    pub saw_message: bool,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&mut self, event: &StreamEvent) {
        self.events += 1;
        match event {
            StreamEvent::Content { text } | StreamEvent::VisionResult { text } => {
                self.fragments += 1;
                self.text_chars += text.chars().count();
            }
            StreamEvent::Message { .. } => self.saw_message = true,
            _ => {}
        }
    }

    pub fn log_summary(&self) {
        info!(
            target: "flight_recorder",
            "[STREAM END] Frames: {} | Events: {} | Fragments: {} ({} chars) | Message: {} | Malformed: {} | Unknown: {}",
            self.frames,
            self.events,
            self.fragments,
            self.text_chars,
            self.saw_message,
            self.malformed,
            self.unknown
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_counts_fragments() {
        let mut metric = StreamMetric::new();
        metric.record_event(&StreamEvent::Content { text: "ab⚡".into() });
        metric.record_event(&StreamEvent::VisionResult { text: "c".into() });
        metric.record_event(&StreamEvent::Complete { message: None });
        assert_eq!(metric.events, 3);
        assert_eq!(metric.fragments, 2);
        assert_eq!(metric.text_chars, 4);
        assert!(!metric.saw_message);
    }
}
