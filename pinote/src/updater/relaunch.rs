/// Restarting after an install is a host concern: pending note and settings
/// writes must land and the log writer must drain before the process goes
/// away. [`EventRelauncher`] only asks the host event loop to do that; the
/// host calls [`spawn_replacement`] once everything has shut down.
use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;

use super::channel::Relauncher;
use crate::event::AppEvent;

pub struct EventRelauncher {
    tx: mpsc::Sender<AppEvent>,
}

impl EventRelauncher {
    pub fn new(tx: mpsc::Sender<AppEvent>) -> Self {
        Self { tx }
    }
}

impl Relauncher for EventRelauncher {
    fn relaunch(&self) -> Result<()> {
        self.tx
            .try_send(AppEvent::Restart)
            .map_err(|e| anyhow!("failed to request relaunch: {e}"))?;
        tracing::info!("app_relaunch_requested");
        Ok(())
    }
}

/// Starts the next instance of the app.
///
/// On Windows the installer replaces the executable and starts the app
/// itself, so nothing is spawned. Elsewhere the (already replaced) executable
/// at the current path is started.
pub fn spawn_replacement() -> Result<()> {
    if cfg!(windows) {
        return Ok(());
    }
    let exe = std::env::current_exe().context("failed to relaunch: executable path unknown")?;
    std::process::Command::new(&exe)
        .spawn()
        .with_context(|| format!("failed to relaunch {}", exe.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::updater::UpdateErrorKind;

    #[tokio::test]
    async fn relaunch_posts_restart_to_the_host() {
        let (tx, mut rx) = mpsc::channel(4);
        EventRelauncher::new(tx).relaunch().unwrap();
        assert_eq!(rx.recv().await, Some(AppEvent::Restart));
    }

    #[test]
    fn relaunch_without_host_is_a_restart_failure() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = EventRelauncher::new(tx).relaunch().unwrap_err();
        assert_eq!(UpdateErrorKind::classify(&format!("{err:#}")), UpdateErrorKind::Restart);
    }
}
