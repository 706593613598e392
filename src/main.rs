use sparkstream::offline::FileOfflineQueue;
use sparkstream::sync::TracingNotifier;
use sparkstream::*;

use clap::Parser;
use colored::*;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let _log_guard = sparkstream::logging::init_tracing(args.log_dir.as_deref(), args.json_logs);
    sparkstream::logging::setup_panic_hook();

    let request = match StreamRequest::chat(
        args.session.as_str().into(),
        &args.message_text(),
        args.mode_flags(),
    ) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{} {}", "error:".bold().red(), e.inner.user_message());
            std::process::exit(2);
        }
    };

    let config = args.client_config();
    let transport = match HttpTransport::new(config.clone()) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            tracing::error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };
    let pipeline = ChatPipeline::new(transport.clone()).with_retry_policy(config.retry);
    let sync = ConversationSync::new(
        Arc::new(FileOfflineQueue::new(&args.offline_queue)),
        transport,
        Arc::new(TracingNotifier),
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling stream");
            ctrl_c.cancel();
        }
    });

    let session_id = request.session_id.clone();
    let mut terminal = TerminalSink::default();
    let outcome = sync
        .send_observed(&pipeline, request, &mut terminal, &cancel)
        .await;
    match outcome {
        Ok(SendOutcome::Delivered(message)) => {
            print_reply(&message, &terminal);
            if args.show_title {
                sync.wait_for_title_refresh().await;
                match pipeline.transport().list_sessions().await {
                    Ok(sessions) => {
                        let title = sessions
                            .into_iter()
                            .find(|s| s.id == session_id)
                            .and_then(|s| s.title);
                        if let Some(title) = title {
                            println!("{} {}", "session:".dimmed(), title.bold());
                        }
                    }
                    Err(e) => tracing::warn!("Could not fetch session title: {}", e.inner),
                }
            }
        }
        Ok(SendOutcome::Queued(action)) => {
            println!("{}", sparkstream::constants::OFFLINE_NOTICE.yellow());
            tracing::info!("Queued as {}", action.id);
        }
        Err(e) => {
            if terminal.streamed() {
                println!();
            }
            eprintln!("{} {}", "error:".bold().red(), e.inner.user_message());
            tracing::debug!("{}", e);
            drop(_log_guard);
            std::process::exit(1);
        }
    }
}

/// Prints fragments as they arrive and remembers what is on screen.
#[derive(Default)]
struct TerminalSink {
    shown: String,
}

impl TerminalSink {
    fn streamed(&self) -> bool {
        !self.shown.is_empty()
    }

    /// True when the final message differs from the draft already printed.
    fn replaced_by(&self, message: &ChatMessage) -> bool {
        self.streamed() && self.shown != message.content
    }
}

impl ChunkSink for TerminalSink {
    fn on_chunk(&mut self, fragment: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = write!(stdout, "{}", fragment);
        let _ = stdout.flush();
        self.shown.push_str(fragment);
    }

    fn on_retry(&mut self, attempt: u32) {
        if self.streamed() {
            println!();
        }
        eprintln!("{}", format!("connection lost, retrying ({})", attempt).yellow());
        self.shown.clear();
    }
}

fn print_reply(message: &ChatMessage, terminal: &TerminalSink) {
    let mut stdout = std::io::stdout().lock();
    if !terminal.streamed() {
        let _ = writeln!(stdout, "{}", message.content);
    } else if terminal.replaced_by(message) {
        // The server sent a final message that replaces the streamed draft.
        let _ = writeln!(stdout);
        let _ = writeln!(stdout, "{}", "final answer:".dimmed());
        let _ = writeln!(stdout, "{}", message.content);
    } else {
        let _ = writeln!(stdout);
    }
    if let Some(meta) = &message.metadata {
        let mut notes = Vec::new();
        if let Some(model) = &meta.model_used {
            notes.push(format!("model {}", model));
        }
        if let Some(left) = meta.reasoning_remaining {
            notes.push(format!("{} deep reasoning left today", left));
        }
        if let Some(left) = meta.maximal_remaining {
            notes.push(format!("{} maximal effort left today", left));
        }
        if !notes.is_empty() {
            let _ = writeln!(stdout, "{}", notes.join(" | ").dimmed());
        }
    }
}
