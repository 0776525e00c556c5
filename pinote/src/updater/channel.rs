/// Seams between the update manager and whatever actually serves releases.
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Progress of a package download, in the order the channel reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadEvent {
    Started { content_length: Option<u64> },
    Progress { chunk_length: u64 },
    Finished,
}

pub type ProgressFn = Arc<dyn Fn(DownloadEvent) + Send + Sync>;

/// What the release channel knows about a newer release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Version the channel believes is running, if it reports one.
    pub current_version: Option<String>,
    pub version: String,
    pub notes: Option<String>,
}

/// A newer release found by [`ReleaseChannel::check`].
pub trait PendingUpdate: Send + Sync {
    fn info(&self) -> &ReleaseInfo;

    /// Fetches the package, reporting progress through `on_event`.
    fn download(&self, on_event: ProgressFn) -> BoxFuture<'_, Result<()>>;

    /// Installs the package fetched by [`PendingUpdate::download`].
    fn install(&self) -> BoxFuture<'_, Result<()>>;
}

pub trait ReleaseChannel: Send + Sync {
    fn current_version(&self) -> BoxFuture<'_, Result<String>>;

    /// Returns the newer release, or `None` when already up to date.
    fn check(&self) -> BoxFuture<'_, Result<Option<Arc<dyn PendingUpdate>>>>;
}

/// Restarts the application after an install.
pub trait Relauncher: Send + Sync {
    fn relaunch(&self) -> Result<()>;
}
