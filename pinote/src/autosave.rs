/// Debounced persistence of one note's markdown content.
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::notes;

pub const DEBOUNCE: Duration = Duration::from_millis(500);

pub struct AutoSave {
    note_id: String,
    path: PathBuf,
    delay: Duration,
    /// The scheduled write, if one is waiting out its quiet period.
    pending: Mutex<Option<Pending>>,
    writes: Arc<AtomicUsize>,
}

struct Pending {
    content: Arc<str>,
    task: JoinHandle<()>,
}

impl AutoSave {
    /// `note_id` is normalized once here and never re-resolved.
    pub fn new(data_dir: &Path, note_id: &str) -> Self {
        Self::with_delay(data_dir, note_id, DEBOUNCE)
    }

    pub fn with_delay(data_dir: &Path, note_id: &str, delay: Duration) -> Self {
        let note_id = notes::normalize_id(note_id);
        Self {
            path: notes::note_path(data_dir, &note_id),
            note_id,
            delay,
            pending: Mutex::new(None),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn note_id(&self) -> &str {
        &self.note_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the note content, or an empty string if the note does not exist
    /// yet or cannot be read.
    pub async fn load(&self) -> String {
        match self.try_load().await {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(note = %self.note_id, error = %format!("{e:#}"), "note_load_failed");
                String::new()
            }
        }
    }

    async fn try_load(&self) -> Result<String> {
        ensure_parent_dir(&self.path).await?;
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read note {}", self.path.display())),
        }
    }

    /// Schedules `content` to be written once no further call arrives for the
    /// debounce period. A newer call replaces any write still waiting.
    pub fn save(&self, content: impl Into<String>) {
        let content: Arc<str> = Arc::from(content.into());
        let path = self.path.clone();
        let note_id = self.note_id.clone();
        let delay = self.delay;
        let writes = Arc::clone(&self.writes);

        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            previous.task.abort();
        }
        let task = {
            let content = Arc::clone(&content);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                persist(&note_id, &path, &content, &writes).await;
            })
        };
        *pending = Some(Pending { content, task });
    }

    /// Writes any scheduled content now instead of waiting out the quiet
    /// period. Used before the process exits.
    pub async fn flush(&self) {
        let Some(pending) = self.pending.lock().take() else {
            return;
        };
        if pending.task.is_finished() {
            return;
        }
        pending.task.abort();
        persist(&self.note_id, &self.path, &pending.content, &self.writes).await;
    }

    /// True while a write is scheduled but has not completed.
    pub fn has_pending(&self) -> bool {
        self.pending.lock().as_ref().is_some_and(|p| !p.task.is_finished())
    }

    /// Number of writes that reached the disk since this controller was made.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Drop for AutoSave {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.get_mut().take() {
            pending.task.abort();
        }
    }
}

async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(dir) = path.parent() else {
        return Ok(());
    };
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return Ok(());
    }
    // create_dir_all succeeds if another writer created it in the meantime.
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create notes directory {}", dir.display()))
}

async fn persist(note_id: &str, path: &Path, content: &str, writes: &AtomicUsize) {
    match write_note(path, content).await {
        Ok(()) => {
            writes.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(note = %note_id, bytes = content.len(), "note_saved");
        }
        Err(e) => tracing::error!(note = %note_id, error = %format!("{e:#}"), "note_save_failed"),
    }
}

async fn write_note(path: &Path, content: &str) -> Result<()> {
    ensure_parent_dir(path).await?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write note {}", path.display()))
}
