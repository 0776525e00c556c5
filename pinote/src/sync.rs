/// Cross-window settings synchronization.
///
/// Every window owns one [`SettingsSync`]. Local edits are merged, queued on
/// the [`SettingsStore`]'s background writer, then broadcast on the shared
/// [`SettingsBus`] tagged with the window's label. Each window replaces its
/// copy with broadcasts from other windows and ignores its own echoes.
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::pubsub::{Listeners, Subscription};
use crate::settings::{Settings, SettingsPatch, SettingsStore};

/// Name of the shared event channel, kept for log correlation.
pub const SETTINGS_EVENT: &str = "settings-updated";
/// Source tag used when the settings file is edited outside the app.
pub const DISK_SOURCE: &str = "disk";

const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettingsMessage {
    pub settings: Settings,
    /// Label of the window that produced this update.
    pub source: String,
}

/// Process-wide broadcast channel shared by all windows.
#[derive(Clone)]
pub struct SettingsBus {
    tx: broadcast::Sender<SettingsMessage>,
}

impl Default for SettingsBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, message: SettingsMessage) {
        // No receivers just means no other window is open.
        let _ = self.tx.send(message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsMessage> {
        self.tx.subscribe()
    }
}

struct Shared {
    label: String,
    current: Mutex<Settings>,
    listeners: Listeners<Settings>,
}

impl Shared {
    /// Applies an inbound broadcast. Returns true if the local value changed.
    fn apply_inbound(&self, message: SettingsMessage) -> bool {
        if message.source == self.label {
            return false;
        }
        {
            let mut current = self.current.lock();
            if *current == message.settings {
                return false;
            }
            *current = message.settings.clone();
        }
        tracing::debug!(window = %self.label, source = %message.source, "settings_applied_remote");
        self.listeners.notify(&message.settings);
        true
    }
}

/// One window's view of the shared settings document.
pub struct SettingsSync {
    shared: Arc<Shared>,
    store: Arc<SettingsStore>,
    bus: SettingsBus,
    listener_task: JoinHandle<()>,
}

impl SettingsSync {
    /// Loads settings for window `label` and starts listening to the bus.
    ///
    /// Nothing can read settings through this window before the load has
    /// resolved, and no broadcast is applied before it either.
    pub async fn open(label: impl Into<String>, store: Arc<SettingsStore>, bus: SettingsBus) -> Self {
        let label = label.into();
        let initial = {
            let store = Arc::clone(&store);
            match tokio::task::spawn_blocking(move || store.load()).await {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::error!(window = %label, error = %e, "settings_load_task_failed");
                    Settings::default()
                }
            }
        };

        let shared = Arc::new(Shared {
            label,
            current: Mutex::new(initial),
            listeners: Listeners::new(),
        });

        let listener_task = tokio::spawn(listen(Arc::clone(&shared), bus.subscribe()));
        tracing::debug!(window = %shared.label, "settings_ready");

        Self { shared, store, bus, listener_task }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Returns a copy of the current settings.
    pub fn get(&self) -> Settings {
        self.shared.current.lock().clone()
    }

    /// Merges `patch`, persists the result and broadcasts it to other windows.
    /// Returns the new settings.
    pub fn update(&self, patch: &SettingsPatch) -> Settings {
        let next = {
            let mut current = self.shared.current.lock();
            current.apply(patch);
            current.clone()
        };
        self.store.save_in_background(next.clone());
        self.bus.publish(SettingsMessage { settings: next.clone(), source: self.shared.label.clone() });
        tracing::debug!(window = %self.shared.label, event = SETTINGS_EVENT, "settings_broadcast");
        self.shared.listeners.notify(&next);
        next
    }

    /// Calls `listener` on every change, local or remote.
    pub fn subscribe(&self, listener: impl Fn(&Settings) + Send + Sync + 'static) -> Subscription {
        self.shared.listeners.subscribe(listener)
    }

    /// Applies an inbound message as if it came off the bus.
    pub fn receive(&self, message: SettingsMessage) -> bool {
        self.shared.apply_inbound(message)
    }
}

impl Drop for SettingsSync {
    fn drop(&mut self) {
        self.listener_task.abort();
    }
}

async fn listen(shared: Arc<Shared>, mut rx: broadcast::Receiver<SettingsMessage>) {
    loop {
        match rx.recv().await {
            Ok(message) => {
                shared.apply_inbound(message);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(window = %shared.label, skipped, "settings_broadcast_lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Watches the directory holding the settings file. Whenever the file is
/// created or modified outside the app, reloads it and broadcasts it with
/// source [`DISK_SOURCE`].
///
/// The app's own writes and files that do not parse are not broadcast, so a
/// half-saved or broken file never replaces the settings windows hold.
pub async fn watch_settings_file(store: Arc<SettingsStore>, bus: SettingsBus) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(error = %e, "settings_watcher_create_failed");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let path: PathBuf = store.path().to_path_buf();
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            tracing::error!(path = %path.display(), "settings_path_has_no_parent");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        tracing::error!(dir = %watch_dir.display(), error = %e, "settings_watch_failed");
        return;
    }
    tracing::debug!(path = %path.display(), "settings_watch_started");

    while let Some(event) = watch_rx.recv().await {
        let affects_settings = event.paths.iter().any(|p| p == &path);
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );
        if !(affects_settings && is_write) {
            continue;
        }

        let reader = Arc::clone(&store);
        match tokio::task::spawn_blocking(move || reader.load_external()).await {
            Ok(Ok(Some(settings))) => {
                tracing::info!(path = %path.display(), "settings_changed_on_disk");
                bus.publish(SettingsMessage { settings, source: DISK_SOURCE.to_string() });
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "settings_external_edit_ignored");
            }
            Err(e) => tracing::error!(error = %e, "settings_reload_task_failed"),
        }
    }
}
