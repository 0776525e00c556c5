/// Process-wide self-update state machine.
///
/// ```text
/// idle ─► checking ─┬─► available ─► downloading ─┬─► readyToRestart ─► (install) ─► restart
///                   ├─► upToDate                  └─► error
///                   └─► error
/// ```
///
/// `error` never blocks a later check. At most one check and one download are
/// in flight at a time: a second caller awaits the same result as the first.
/// A check and a download never overlap, so the release being downloaded is
/// always the one marked ready.
mod channel;
mod error;
mod http;
mod relaunch;

pub use channel::{DownloadEvent, PendingUpdate, ProgressFn, Relauncher, ReleaseChannel, ReleaseInfo};
pub use error::{UpdateError, UpdateErrorKind};
pub use http::HttpReleaseChannel;
pub use relaunch::{spawn_replacement, EventRelauncher};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::pubsub::{Listeners, Subscription};

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub enum UpdateState {
    Idle,
    Checking,
    Available,
    UpToDate,
    Downloading,
    ReadyToRestart,
    Error,
}

/// What triggered a check.
#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum UpdateCheckMode {
    Silent,
    Manual,
}

impl UpdateCheckMode {
    fn as_str(self) -> &'static str {
        match self {
            UpdateCheckMode::Silent => "silent",
            UpdateCheckMode::Manual => "manual",
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub available: bool,
    pub current_version: String,
    pub latest_version: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSnapshot {
    pub state: UpdateState,
    pub mode: Option<UpdateCheckMode>,
    pub available: bool,
    pub current_version: String,
    pub latest_version: Option<String>,
    pub notes: Option<String>,
    /// Classified, user-facing error message.
    pub error: Option<String>,
    /// RFC 3339 timestamp of the last completed check.
    pub last_checked_at: Option<String>,
    /// Percent, 0-100. `None` while the total size is unknown.
    pub download_progress: Option<u8>,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
}

impl Default for UpdateSnapshot {
    fn default() -> Self {
        Self {
            state: UpdateState::Idle,
            mode: None,
            available: false,
            current_version: String::new(),
            latest_version: None,
            notes: None,
            error: None,
            last_checked_at: None,
            download_progress: None,
            downloaded_bytes: 0,
            total_bytes: None,
        }
    }
}

impl UpdateSnapshot {
    fn reset_progress(&mut self) {
        self.download_progress = None;
        self.downloaded_bytes = 0;
        self.total_bytes = None;
    }

    fn apply_download_event(&mut self, event: DownloadEvent) {
        match event {
            DownloadEvent::Started { content_length } => {
                self.state = UpdateState::Downloading;
                self.error = None;
                self.download_progress = Some(0);
                self.downloaded_bytes = 0;
                self.total_bytes = content_length;
            }
            DownloadEvent::Progress { chunk_length } => {
                self.state = UpdateState::Downloading;
                self.downloaded_bytes += chunk_length;
                self.download_progress = match self.total_bytes {
                    Some(total) if total > 0 => Some(percent(self.downloaded_bytes, total)),
                    _ => None,
                };
            }
            DownloadEvent::Finished => {
                self.state = UpdateState::Downloading;
                if let Some(total) = self.total_bytes {
                    self.download_progress = Some(100);
                    self.downloaded_bytes = total;
                }
            }
        }
    }
}

fn percent(done: u64, total: u64) -> u8 {
    ((done as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

type CheckFuture = Shared<BoxFuture<'static, Result<UpdateResult, UpdateError>>>;
type DownloadFuture = Shared<BoxFuture<'static, Result<(), UpdateError>>>;

struct Inner {
    snapshot: UpdateSnapshot,
    active_update: Option<Arc<dyn PendingUpdate>>,
    /// Set once `active_update` has been downloaded.
    downloaded: bool,
    /// Install already ran; only the relaunch is outstanding.
    pending_restart_only: bool,
    active_check: Option<CheckFuture>,
    active_download: Option<DownloadFuture>,
}

/// Lives for the whole process; construct once and share the `Arc`.
pub struct UpdateManager {
    channel: Arc<dyn ReleaseChannel>,
    relauncher: Arc<dyn Relauncher>,
    version: OnceCell<String>,
    inner: Mutex<Inner>,
    listeners: Listeners<UpdateSnapshot>,
}

impl UpdateManager {
    pub fn new(channel: Arc<dyn ReleaseChannel>, relauncher: Arc<dyn Relauncher>) -> Arc<Self> {
        Arc::new(Self {
            channel,
            relauncher,
            version: OnceCell::new(),
            inner: Mutex::new(Inner {
                snapshot: UpdateSnapshot::default(),
                active_update: None,
                downloaded: false,
                pending_restart_only: false,
                active_check: None,
                active_download: None,
            }),
            listeners: Listeners::new(),
        })
    }

    /// A copy of the current snapshot.
    pub fn state(&self) -> UpdateSnapshot {
        self.inner.lock().snapshot.clone()
    }

    /// Calls `listener` with the current snapshot right away, then after every change.
    pub fn subscribe(&self, listener: impl Fn(&UpdateSnapshot) + Send + Sync + 'static) -> Subscription {
        let listener = Arc::new(listener);
        let subscription = {
            let listener = Arc::clone(&listener);
            self.listeners.subscribe(move |s| listener(s))
        };
        listener(&self.state());
        subscription
    }

    /// Mutates state under the lock, then notifies listeners outside it.
    fn transition(&self, f: impl FnOnce(&mut Inner)) {
        let snapshot = {
            let mut inner = self.inner.lock();
            f(&mut inner);
            inner.snapshot.clone()
        };
        self.listeners.notify(&snapshot);
    }

    // ── check ─────────────────────────────────────────────────────────────────

    pub async fn check_for_updates(self: &Arc<Self>, mode: UpdateCheckMode) -> Result<UpdateResult, UpdateError> {
        let check = {
            let mut inner = self.inner.lock();
            if inner.active_download.is_some() {
                return Err(UpdateError::DownloadInProgress);
            }
            match &inner.active_check {
                Some(active) => active.clone(),
                None => {
                    let this = Arc::clone(self);
                    let task = tokio::spawn(async move {
                        let result = this.run_check(mode).await;
                        this.inner.lock().active_check = None;
                        result
                    });
                    let shared = async move { task.await.unwrap_or_else(|e| Err(join_failure(e))) }
                        .boxed()
                        .shared();
                    inner.active_check = Some(shared.clone());
                    shared
                }
            }
        };
        check.await
    }

    async fn resolve_current_version(&self) -> String {
        let version = self
            .version
            .get_or_init(|| async {
                match self.channel.current_version().await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %format!("{e:#}"), "update_version_unresolved");
                        "unknown".to_string()
                    }
                }
            })
            .await
            .clone();
        self.transition(|inner| inner.snapshot.current_version = version.clone());
        version
    }

    async fn run_check(&self, mode: UpdateCheckMode) -> Result<UpdateResult, UpdateError> {
        self.transition(|inner| {
            inner.pending_restart_only = false;
            let s = &mut inner.snapshot;
            s.state = UpdateState::Checking;
            s.mode = Some(mode);
            s.error = None;
            s.reset_progress();
        });

        let current_version = self.resolve_current_version().await;
        let checked_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

        match self.channel.check().await {
            Ok(Some(update)) => {
                let info = update.info().clone();
                let result = UpdateResult {
                    available: true,
                    current_version: info.current_version.filter(|v| !v.is_empty()).unwrap_or(current_version),
                    latest_version: Some(info.version),
                    notes: info.notes,
                };
                self.transition(|inner| {
                    inner.active_update = Some(update);
                    inner.downloaded = false;
                    let s = &mut inner.snapshot;
                    s.state = UpdateState::Available;
                    s.available = true;
                    s.current_version = result.current_version.clone();
                    s.latest_version = result.latest_version.clone();
                    s.notes = result.notes.clone();
                    s.error = None;
                    s.last_checked_at = Some(checked_at);
                    s.reset_progress();
                });
                tracing::info!(
                    mode = mode.as_str(),
                    current = %result.current_version,
                    latest = result.latest_version.as_deref().unwrap_or("unknown"),
                    "update_available"
                );
                Ok(result)
            }
            Ok(None) => {
                let result = UpdateResult {
                    available: false,
                    current_version,
                    latest_version: None,
                    notes: None,
                };
                self.transition(|inner| {
                    inner.active_update = None;
                    inner.downloaded = false;
                    let s = &mut inner.snapshot;
                    s.state = UpdateState::UpToDate;
                    s.available = false;
                    s.current_version = result.current_version.clone();
                    s.latest_version = None;
                    s.notes = None;
                    s.error = None;
                    s.last_checked_at = Some(checked_at);
                    s.reset_progress();
                });
                tracing::info!(mode = mode.as_str(), current = %result.current_version, "update_not_found");
                Ok(result)
            }
            Err(e) => {
                let err = UpdateError::classify(&e);
                self.transition(|inner| {
                    let s = &mut inner.snapshot;
                    s.state = UpdateState::Error;
                    s.error = Some(err.to_string());
                    s.last_checked_at = Some(checked_at);
                    s.reset_progress();
                });
                tracing::warn!(mode = mode.as_str(), message = %format!("{e:#}"), "update_check_failed");
                Err(err)
            }
        }
    }

    // ── download ──────────────────────────────────────────────────────────────

    pub async fn download_update(self: &Arc<Self>) -> Result<(), UpdateError> {
        let download = {
            let mut inner = self.inner.lock();
            match &inner.active_download {
                Some(active) => active.clone(),
                None => {
                    if inner.active_check.is_some() {
                        return Err(UpdateError::CheckInProgress);
                    }
                    let update = inner.active_update.clone().ok_or(UpdateError::NoUpdateAvailable)?;
                    let this = Arc::clone(self);
                    let task = tokio::spawn(async move {
                        let result = this.run_download(update).await;
                        this.inner.lock().active_download = None;
                        result
                    });
                    let shared = async move { task.await.unwrap_or_else(|e| Err(join_failure(e))) }
                        .boxed()
                        .shared();
                    inner.active_download = Some(shared.clone());
                    shared
                }
            }
        };
        download.await
    }

    async fn run_download(self: &Arc<Self>, update: Arc<dyn PendingUpdate>) -> Result<(), UpdateError> {
        self.transition(|inner| {
            inner.pending_restart_only = false;
            inner.downloaded = false;
            let s = &mut inner.snapshot;
            s.state = UpdateState::Downloading;
            s.error = None;
            s.reset_progress();
            s.download_progress = Some(0);
        });

        let on_event: ProgressFn = {
            let this = Arc::clone(self);
            Arc::new(move |event| this.transition(|inner| inner.snapshot.apply_download_event(event)))
        };

        match update.download(on_event).await {
            Ok(()) => {
                self.transition(|inner| {
                    inner.downloaded = true;
                    let s = &mut inner.snapshot;
                    s.state = UpdateState::ReadyToRestart;
                    s.error = None;
                    s.download_progress = Some(100);
                });
                tracing::info!(latest = %update.info().version, "update_downloaded");
                Ok(())
            }
            Err(e) => {
                let err = UpdateError::classify(&e);
                self.transition(|inner| {
                    let s = &mut inner.snapshot;
                    s.state = UpdateState::Error;
                    s.error = Some(err.to_string());
                    s.download_progress = None;
                });
                tracing::error!(message = %format!("{e:#}"), "update_download_failed");
                Err(err)
            }
        }
    }

    // ── install ───────────────────────────────────────────────────────────────

    pub async fn install_update(&self) -> Result<(), UpdateError> {
        let update = {
            let inner = self.inner.lock();
            if inner.pending_restart_only {
                None
            } else if inner.downloaded {
                inner.active_update.clone()
            } else {
                return Err(UpdateError::NothingToInstall);
            }
        };

        let Some(update) = update else {
            return self.restart();
        };

        tracing::info!(latest = %update.info().version, "update_install_started");
        if let Err(e) = update.install().await {
            return Err(self.fail_restart(e.context("install failed")));
        }

        self.transition(|inner| {
            inner.pending_restart_only = true;
            inner.active_update = None;
            inner.downloaded = false;
        });
        tracing::info!("update_install_triggered");
        self.restart()
    }

    fn restart(&self) -> Result<(), UpdateError> {
        self.relauncher
            .relaunch()
            .map_err(|e| self.fail_restart(e.context("relaunch failed")))
    }

    /// Install and restart failures keep the update ready so the user can retry.
    fn fail_restart(&self, e: anyhow::Error) -> UpdateError {
        let err = UpdateError::classify(&e);
        self.transition(|inner| {
            let s = &mut inner.snapshot;
            s.state = UpdateState::ReadyToRestart;
            s.error = Some(err.to_string());
            s.download_progress = None;
        });
        tracing::error!(message = %format!("{e:#}"), "update_install_or_restart_failed");
        err
    }

    pub async fn download_and_install_update(self: &Arc<Self>) -> Result<(), UpdateError> {
        self.download_update().await?;
        self.install_update().await
    }
}

fn join_failure(e: tokio::task::JoinError) -> UpdateError {
    UpdateError::classify(&anyhow::anyhow!("update task aborted: {e}"))
}
