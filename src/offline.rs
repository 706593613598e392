use crate::request::StreamRequest;
use crate::types::*;
use chrono::{DateTime, Utc};
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

const DRAINING_SUFFIX: &str = ".draining";
const CORRUPT_SUFFIX: &str = ".corrupt";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedAction {
    pub id: uuid::Uuid,
    pub queued_at: DateTime<Utc>,
    pub action: QueuedActionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueuedActionKind {
    SendMessage {
        session_id: SessionId,
        content: String,
        mode: RequestMode,
    },
}

impl QueuedAction {
    pub fn send_message(request: &StreamRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            queued_at: Utc::now(),
            action: QueuedActionKind::SendMessage {
                session_id: request.session_id.clone(),
                content: request.content.clone(),
                mode: request.mode,
            },
        }
    }
}

/// Actions that could not be dispatched, held for later replay.
pub trait OfflineQueue: Send + Sync {
    fn enqueue(&self, action: QueuedAction) -> BoxFuture<'_, Result<()>>;

    /// Removes and returns every queued action, oldest first.
    fn drain(&self) -> BoxFuture<'_, Result<Vec<QueuedAction>>>;

    fn count(&self) -> BoxFuture<'_, Result<usize>>;
}

#[derive(Debug, Default)]
pub struct MemoryOfflineQueue {
    actions: Mutex<VecDeque<QueuedAction>>,
}

impl MemoryOfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_actions<T>(&self, f: impl FnOnce(&mut VecDeque<QueuedAction>) -> T) -> Result<T> {
        let mut actions = self
            .actions
            .lock()
            .map_err(|_| ChatError::Queue("offline queue lock poisoned".to_string()))?;
        Ok(f(&mut actions))
    }
}

impl OfflineQueue for MemoryOfflineQueue {
    fn enqueue(&self, action: QueuedAction) -> BoxFuture<'_, Result<()>> {
        future::ready(self.with_actions(|actions| actions.push_back(action))).boxed()
    }

    fn drain(&self) -> BoxFuture<'_, Result<Vec<QueuedAction>>> {
        future::ready(self.with_actions(|actions| actions.drain(..).collect())).boxed()
    }

    fn count(&self) -> BoxFuture<'_, Result<usize>> {
        future::ready(self.with_actions(|actions| actions.len())).boxed()
    }
}

/// Durable queue stored as one JSON object per line.
///
/// Draining first renames the queue file aside, so a failure part way through
/// leaves the actions on disk for the next drain instead of losing them.
/// Lines that cannot be parsed are moved to a `.corrupt` sidecar file.
#[derive(Debug)]
pub struct FileOfflineQueue {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

fn queue_error(context: &str, path: &Path, e: std::io::Error) -> ObservedError {
    ChatError::Queue(format!("{} {}: {}", context, path.display(), e)).into()
}

impl FileOfflineQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where unreadable entries are kept.
    pub fn corrupt_path(&self) -> PathBuf {
        self.sibling(CORRUPT_SUFFIX)
    }

    fn draining_path(&self) -> PathBuf {
        self.sibling(DRAINING_SUFFIX)
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    async fn read_optional(path: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(queue_error("reading", path, e)),
        }
    }

    /// Splits file contents into parsed actions and unreadable lines.
    fn parse(text: &str, path: &Path) -> (Vec<QueuedAction>, Vec<String>) {
        let mut actions = Vec::new();
        let mut corrupt = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<QueuedAction>(line) {
                Ok(action) => actions.push(action),
                Err(e) => {
                    tracing::warn!(
                        "[OFFLINE] Unreadable entry {} in {}: {}",
                        i + 1,
                        path.display(),
                        e
                    );
                    corrupt.push(line.to_string());
                }
            }
        }
        (actions, corrupt)
    }

    async fn append_lines(path: &Path, lines: &[String]) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| queue_error("opening", path, e))?;
        let mut buf = String::new();
        for line in lines {
            buf.push_str(line);
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| queue_error("writing", path, e))?;
        file.flush()
            .await
            .map_err(|e| queue_error("flushing", path, e))?;
        Ok(())
    }

    /// Reads and removes one file, quarantining bad lines first. On error the
    /// file stays where it is.
    async fn take_file(&self, path: &Path) -> Result<Vec<QueuedAction>> {
        let text = match Self::read_optional(path).await? {
            Some(text) => text,
            None => return Ok(Vec::new()),
        };
        let (actions, corrupt) = Self::parse(&text, path);
        if !corrupt.is_empty() {
            let corrupt_path = self.corrupt_path();
            Self::append_lines(&corrupt_path, &corrupt).await?;
            tracing::warn!(
                "[OFFLINE] Moved {} unreadable entries to {}",
                corrupt.len(),
                corrupt_path.display()
            );
        }
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| queue_error("removing", path, e))?;
        Ok(actions)
    }
}

impl OfflineQueue for FileOfflineQueue {
    fn enqueue(&self, action: QueuedAction) -> BoxFuture<'_, Result<()>> {
        async move {
            let line = serde_json::to_string(&action)?;
            let _guard = self.lock.lock().await;
            Self::append_lines(&self.path, &[line]).await?;
            tracing::info!(
                "[OFFLINE] Queued action {} in {}",
                action.id,
                self.path.display()
            );
            Ok(())
        }
        .boxed()
    }

    fn drain(&self) -> BoxFuture<'_, Result<Vec<QueuedAction>>> {
        async move {
            let _guard = self.lock.lock().await;
            let draining = self.draining_path();

            // Leftovers of an interrupted drain are older than the live file.
            let mut actions = self.take_file(&draining).await?;

            match tokio::fs::rename(&self.path, &draining).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(actions),
                Err(e) if !actions.is_empty() => {
                    tracing::warn!(
                        "[OFFLINE] Could not move {} aside, leaving it for the next drain: {}",
                        self.path.display(),
                        e
                    );
                    return Ok(actions);
                }
                Err(e) => return Err(queue_error("moving", &self.path, e)),
            }

            match self.take_file(&draining).await {
                Ok(current) => actions.extend(current),
                Err(e) if !actions.is_empty() => {
                    tracing::warn!("[OFFLINE] Deferring part of the queue: {}", e.inner);
                }
                Err(e) => return Err(e),
            }
            Ok(actions)
        }
        .boxed()
    }

    fn count(&self) -> BoxFuture<'_, Result<usize>> {
        async move {
            let _guard = self.lock.lock().await;
            let mut total = 0;
            for path in [self.draining_path(), self.path.clone()] {
                if let Some(text) = Self::read_optional(&path).await? {
                    total += Self::parse(&text, &path).0.len();
                }
            }
            Ok(total)
        }
        .boxed()
    }
}
