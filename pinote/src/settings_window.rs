/// The settings window: edits the shared settings, owns the launch-at-login
/// toggle and fronts the update manager.
use anyhow::Result;
use std::sync::Arc;

use crate::hotkey::HotkeyBinder;
use crate::pubsub::Subscription;
use crate::settings::{Settings, SettingsPatch, Theme};
use crate::shortcuts::{self, ShortcutAction, ShortcutError};
use crate::startup::Autostart;
use crate::sync::SettingsSync;
use crate::updater::{UpdateCheckMode, UpdateError, UpdateManager, UpdateResult, UpdateSnapshot, UpdateState};

pub const SETTINGS_WINDOW_LABEL: &str = "settings";

pub struct SettingsWindow {
    settings: Arc<SettingsSync>,
    hotkeys: Arc<HotkeyBinder>,
    autostart: Arc<dyn Autostart>,
    updater: Arc<UpdateManager>,
    _check_mirror: Subscription,
}

impl SettingsWindow {
    /// Opens the window: mirrors update-check timestamps into settings,
    /// reconciles launch-at-login with the OS and, if no check was ever
    /// recorded, starts a silent update check in the background.
    pub fn open(
        settings: Arc<SettingsSync>,
        hotkeys: Arc<HotkeyBinder>,
        autostart: Arc<dyn Autostart>,
        updater: Arc<UpdateManager>,
    ) -> Self {
        let check_mirror = {
            let settings = Arc::clone(&settings);
            updater.subscribe(move |snapshot| mirror_last_checked(&settings, snapshot))
        };

        let window = Self { settings, hotkeys, autostart, updater, _check_mirror: check_mirror };

        if let Err(e) = window.reconcile_launch_at_startup() {
            tracing::warn!(error = %format!("{e:#}"), "autostart_query_failed");
        }
        window.maybe_start_silent_check();
        tracing::info!(window = window.settings.label(), "settings_window_open");
        window
    }

    pub fn settings(&self) -> Settings {
        self.settings.get()
    }

    // ── appearance ────────────────────────────────────────────────────────────

    pub fn set_theme(&self, theme: Theme) -> Settings {
        self.settings.update(&SettingsPatch::theme(theme))
    }

    pub fn set_always_on_top(&self, on: bool) -> Settings {
        self.settings.update(&SettingsPatch::always_on_top(on))
    }

    /// Slider value, 30-100.
    pub fn opacity_percent(&self) -> u8 {
        (self.settings.get().opacity * 100.0).round() as u8
    }

    pub fn set_opacity_percent(&self, percent: u8) -> Settings {
        self.settings.update(&SettingsPatch::opacity(f64::from(percent) / 100.0))
    }

    // ── shortcuts ─────────────────────────────────────────────────────────────

    /// Rebinds `action`. Unparseable input leaves settings untouched.
    ///
    /// The toggle-window shortcut is global: it is registered with the OS
    /// first and only committed once that succeeded. If a newer edit overtook
    /// this one while registering, nothing is committed.
    pub async fn update_shortcut(&self, action: ShortcutAction, value: &str) -> Result<Settings, ShortcutError> {
        let normalized = shortcuts::normalize(value).ok_or(ShortcutError::Invalid)?;

        if action == ShortcutAction::ToggleWindow && !self.hotkeys.bind(&normalized).await? {
            return Ok(self.settings.get());
        }
        Ok(self.settings.update(&SettingsPatch::shortcut(action, normalized)))
    }

    // ── launch at startup ─────────────────────────────────────────────────────

    /// Registers or removes the login item, then records the new value. On
    /// failure the setting keeps its old value.
    pub fn set_launch_at_startup(&self, enabled: bool) -> Result<Settings> {
        if enabled {
            self.autostart.enable()?;
        } else {
            self.autostart.disable()?;
        }
        Ok(self.settings.update(&SettingsPatch::launch_at_startup(enabled)))
    }

    pub fn toggle_launch_at_startup(&self) -> Result<Settings> {
        self.set_launch_at_startup(!self.settings.get().launch_at_startup)
    }

    /// Aligns the stored flag with what the OS reports. Returns the OS value.
    pub fn reconcile_launch_at_startup(&self) -> Result<bool> {
        let enabled = self.autostart.is_enabled()?;
        if self.settings.get().launch_at_startup != enabled {
            self.settings.update(&SettingsPatch::launch_at_startup(enabled));
        }
        Ok(enabled)
    }

    // ── updates ───────────────────────────────────────────────────────────────

    pub fn update_state(&self) -> UpdateSnapshot {
        self.updater.state()
    }

    pub fn subscribe_updates(&self, listener: impl Fn(&UpdateSnapshot) + Send + Sync + 'static) -> Subscription {
        self.updater.subscribe(listener)
    }

    fn maybe_start_silent_check(&self) {
        if self.settings.get().last_update_check_at.is_some() || self.updater.state().state != UpdateState::Idle {
            return;
        }
        let updater = Arc::clone(&self.updater);
        tokio::spawn(async move {
            // Silent checks surface their outcome only through the snapshot.
            let _ = updater.check_for_updates(UpdateCheckMode::Silent).await;
        });
    }

    pub async fn check_for_updates(&self) -> Result<UpdateResult, UpdateError> {
        self.updater.check_for_updates(UpdateCheckMode::Manual).await
    }

    pub async fn download_update(&self) -> Result<(), UpdateError> {
        self.updater.download_update().await
    }

    pub async fn install_update(&self) -> Result<(), UpdateError> {
        self.updater.install_update().await
    }
}

fn mirror_last_checked(settings: &SettingsSync, snapshot: &UpdateSnapshot) {
    let Some(checked_at) = &snapshot.last_checked_at else {
        return;
    };
    if settings.get().last_update_check_at.as_ref() != Some(checked_at) {
        settings.update(&SettingsPatch::last_update_check_at(checked_at.clone()));
    }
}

// ── presentation ──────────────────────────────────────────────────────────────

pub fn can_check(snapshot: &UpdateSnapshot) -> bool {
    !matches!(snapshot.state, UpdateState::Checking | UpdateState::Downloading)
}

/// A download is offered when an update is available, including after a
/// failed download of it.
pub fn can_download(snapshot: &UpdateSnapshot) -> bool {
    snapshot.state == UpdateState::Available || (snapshot.available && snapshot.state == UpdateState::Error)
}

pub fn can_install(snapshot: &UpdateSnapshot) -> bool {
    snapshot.state == UpdateState::ReadyToRestart
}

pub fn update_status_text(snapshot: &UpdateSnapshot) -> String {
    match snapshot.state {
        UpdateState::Idle => "No update check has been run yet.".to_string(),
        UpdateState::Checking => "Checking for updates...".to_string(),
        UpdateState::Available => format!(
            "Update {} is available.",
            snapshot.latest_version.as_deref().unwrap_or("unknown")
        ),
        UpdateState::UpToDate => "You are using the latest stable release.".to_string(),
        UpdateState::Downloading => match snapshot.download_progress {
            Some(p) => format!("Downloading update... {p}%"),
            None => "Downloading update...".to_string(),
        },
        UpdateState::ReadyToRestart => "Download complete. Restart to install the update.".to_string(),
        UpdateState::Error => snapshot.error.clone().unwrap_or_else(|| "Update failed.".to_string()),
    }
}

/// `Current 1.0.0 -> Latest 1.1.0`, once a newer version is known.
pub fn version_line(snapshot: &UpdateSnapshot) -> Option<String> {
    let latest = snapshot.latest_version.as_deref()?;
    let current = if snapshot.current_version.is_empty() { "unknown" } else { &snapshot.current_version };
    Some(format!("Current {current} -> Latest {latest}"))
}

pub fn last_checked_text(settings: &Settings) -> Option<String> {
    let raw = settings.last_update_check_at.as_deref()?;
    let shown = match chrono::DateTime::parse_from_rfc3339(raw) {
        Ok(at) => at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string(),
        Err(_) => raw.to_string(),
    };
    Some(format!("Last checked at {shown}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::HotkeyRegistrar;
    use crate::settings::SettingsStore;
    use crate::sync::SettingsBus;
    use crate::updater::{PendingUpdate, Relauncher, ReleaseChannel};
    use futures::future::{BoxFuture, FutureExt};
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    // ── Fakes ─────────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct FakeRegistrar {
        registered: Mutex<HashSet<String>>,
        rejected: Mutex<HashSet<String>>,
    }

    impl HotkeyRegistrar for FakeRegistrar {
        fn register<'a>(&'a self, shortcut: &'a str) -> BoxFuture<'a, Result<()>> {
            let result = if self.rejected.lock().contains(shortcut) {
                Err(anyhow::anyhow!("{shortcut} is held by another application"))
            } else {
                self.registered.lock().insert(shortcut.to_string());
                Ok(())
            };
            futures::future::ready(result).boxed()
        }

        fn unregister<'a>(&'a self, shortcut: &'a str) -> BoxFuture<'a, Result<()>> {
            self.registered.lock().remove(shortcut);
            futures::future::ready(Ok(())).boxed()
        }
    }

    #[derive(Default)]
    struct FakeAutostart {
        enabled: AtomicBool,
        fail: AtomicBool,
    }

    impl Autostart for FakeAutostart {
        fn enable(&self) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("access denied");
            }
            self.enabled.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn disable(&self) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("access denied");
            }
            self.enabled.store(false, Ordering::SeqCst);
            Ok(())
        }
        fn is_enabled(&self) -> Result<bool> {
            Ok(self.enabled.load(Ordering::SeqCst))
        }
    }

    #[derive(Default)]
    struct UpToDateChannel {
        checks: AtomicUsize,
    }

    impl ReleaseChannel for UpToDateChannel {
        fn current_version(&self) -> BoxFuture<'_, Result<String>> {
            futures::future::ready(Ok("1.0.0".to_string())).boxed()
        }
        fn check(&self) -> BoxFuture<'_, Result<Option<Arc<dyn PendingUpdate>>>> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(None)).boxed()
        }
    }

    struct NoRelaunch;

    impl Relauncher for NoRelaunch {
        fn relaunch(&self) -> Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        window: SettingsWindow,
        sync: Arc<SettingsSync>,
        registrar: Arc<FakeRegistrar>,
        binder: Arc<HotkeyBinder>,
        autostart: Arc<FakeAutostart>,
        channel: Arc<UpToDateChannel>,
    }

    async fn fixture_with(stored: Option<&str>, os_autostart: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        if let Some(json) = stored {
            std::fs::write(dir.path().join("settings.json"), json).unwrap();
        }
        let store = Arc::new(SettingsStore::new(dir.path().join("settings.json")));
        let sync = Arc::new(SettingsSync::open(SETTINGS_WINDOW_LABEL, store, SettingsBus::new()).await);

        let registrar = Arc::new(FakeRegistrar::default());
        let binder = Arc::new(HotkeyBinder::new(Arc::clone(&registrar) as Arc<dyn HotkeyRegistrar>));
        binder.bind(&sync.get().shortcuts.toggle_window).await.unwrap();

        let autostart = Arc::new(FakeAutostart::default());
        autostart.enabled.store(os_autostart, Ordering::SeqCst);
        let channel = Arc::new(UpToDateChannel::default());
        let updater = UpdateManager::new(
            Arc::clone(&channel) as Arc<dyn ReleaseChannel>,
            Arc::new(NoRelaunch) as Arc<dyn Relauncher>,
        );

        let window = SettingsWindow::open(
            Arc::clone(&sync),
            Arc::clone(&binder),
            Arc::clone(&autostart) as Arc<dyn Autostart>,
            updater,
        );
        Fixture { _dir: dir, window, sync, registrar, binder, autostart, channel }
    }

    async fn fixture() -> Fixture {
        fixture_with(Some(r#"{"lastUpdateCheckAt": "2026-10-01T08:00:00.000Z"}"#), false).await
    }

    // ── shortcuts ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn invalid_shortcut_is_rejected_and_settings_unchanged() {
        let f = fixture().await;
        let before = f.sync.get();
        let err = f.window.update_shortcut(ShortcutAction::ToggleTheme, "a+b").await.unwrap_err();
        assert_eq!(err, ShortcutError::Invalid);
        assert_eq!(err.to_string(), "Invalid shortcut.");
        assert_eq!(f.sync.get(), before);
    }

    #[tokio::test]
    async fn local_shortcut_is_stored_normalized() {
        let f = fixture().await;
        let s = f.window.update_shortcut(ShortcutAction::HideWindow, "ctrl+w").await.unwrap();
        assert_eq!(s.shortcuts.hide_window, "Ctrl+W");
        assert!(f.registrar.registered.lock().contains("Alt+N"));
    }

    #[tokio::test]
    async fn toggle_window_shortcut_registers_before_commit() {
        let f = fixture().await;
        let s = f.window.update_shortcut(ShortcutAction::ToggleWindow, "ctrl+alt+p").await.unwrap();
        assert_eq!(s.shortcuts.toggle_window, "Ctrl+Alt+P");
        assert_eq!(f.binder.active().as_deref(), Some("Ctrl+Alt+P"));
        let registered = f.registrar.registered.lock().clone();
        assert_eq!(registered, HashSet::from(["Ctrl+Alt+P".to_string()]));
    }

    #[tokio::test]
    async fn toggle_window_registration_failure_keeps_old_shortcut() {
        let f = fixture().await;
        f.registrar.rejected.lock().insert("Ctrl+Space".into());
        let err = f.window.update_shortcut(ShortcutAction::ToggleWindow, "ctrl+space").await.unwrap_err();
        assert!(matches!(err, ShortcutError::Registration(_)));
        assert_eq!(f.sync.get().shortcuts.toggle_window, "Alt+N");
        assert_eq!(f.binder.active().as_deref(), Some("Alt+N"));
    }

    // ── appearance ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn opacity_percent_round_trips_through_clamp() {
        let f = fixture().await;
        f.window.set_opacity_percent(55);
        assert_eq!(f.window.opacity_percent(), 55);
        f.window.set_opacity_percent(10);
        assert_eq!(f.window.opacity_percent(), 30);
    }

    #[tokio::test]
    async fn theme_and_always_on_top_edits() {
        let f = fixture().await;
        assert_eq!(f.window.set_theme(Theme::Dark).theme, Theme::Dark);
        assert!(f.window.set_always_on_top(true).always_on_top);
        assert_eq!(f.window.settings().theme, Theme::Dark);
    }

    // ── launch at startup ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn open_reconciles_launch_at_startup_with_os() {
        let f = fixture_with(None, true).await;
        assert!(f.sync.get().launch_at_startup);
    }

    #[tokio::test]
    async fn launch_at_startup_commits_after_os_call() {
        let f = fixture().await;
        assert!(f.window.toggle_launch_at_startup().unwrap().launch_at_startup);
        assert!(f.autostart.enabled.load(Ordering::SeqCst));

        f.autostart.fail.store(true, Ordering::SeqCst);
        assert!(f.window.set_launch_at_startup(false).is_err());
        assert!(f.sync.get().launch_at_startup, "failed OS call must not change the setting");
    }

    // ── updates ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn first_open_runs_silent_check_and_records_it() {
        let f = fixture_with(None, false).await;
        for _ in 0..100 {
            if f.sync.get().last_update_check_at.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.channel.checks.load(Ordering::SeqCst), 1);
        let snapshot = f.window.update_state();
        assert_eq!(snapshot.state, UpdateState::UpToDate);
        assert_eq!(snapshot.mode, Some(UpdateCheckMode::Silent));
        assert_eq!(f.sync.get().last_update_check_at, snapshot.last_checked_at);
    }

    #[tokio::test]
    async fn open_skips_silent_check_when_one_was_recorded() {
        let f = fixture().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.channel.checks.load(Ordering::SeqCst), 0);
        assert_eq!(f.window.update_state().state, UpdateState::Idle);
    }

    #[tokio::test]
    async fn manual_check_updates_last_checked() {
        let f = fixture().await;
        let before = f.sync.get().last_update_check_at;
        let result = f.window.check_for_updates().await.unwrap();
        assert!(!result.available);
        assert_ne!(f.sync.get().last_update_check_at, before);
    }

    #[tokio::test]
    async fn download_without_update_is_rejected() {
        let f = fixture().await;
        assert_eq!(f.window.download_update().await, Err(UpdateError::NoUpdateAvailable));
        assert_eq!(f.window.install_update().await, Err(UpdateError::NothingToInstall));
    }

    // ── presentation ──────────────────────────────────────────────────────────

    fn snapshot(state: UpdateState) -> UpdateSnapshot {
        UpdateSnapshot { state, ..UpdateSnapshot::default() }
    }

    #[test]
    fn status_text_per_state() {
        assert_eq!(update_status_text(&snapshot(UpdateState::Idle)), "No update check has been run yet.");
        let available = UpdateSnapshot { latest_version: Some("1.2.0".into()), ..snapshot(UpdateState::Available) };
        assert_eq!(update_status_text(&available), "Update 1.2.0 is available.");
        let downloading = UpdateSnapshot { download_progress: Some(42), ..snapshot(UpdateState::Downloading) };
        assert_eq!(update_status_text(&downloading), "Downloading update... 42%");
        assert_eq!(update_status_text(&snapshot(UpdateState::Downloading)), "Downloading update...");
        assert_eq!(update_status_text(&snapshot(UpdateState::Error)), "Update failed.");
    }

    #[test]
    fn action_gating() {
        assert!(can_download(&snapshot(UpdateState::Available)));
        assert!(!can_download(&snapshot(UpdateState::Error)));
        let failed_download = UpdateSnapshot { available: true, ..snapshot(UpdateState::Error) };
        assert!(can_download(&failed_download));
        assert!(can_install(&snapshot(UpdateState::ReadyToRestart)));
        assert!(!can_check(&snapshot(UpdateState::Downloading)));
        assert!(can_check(&snapshot(UpdateState::Error)));
    }

    #[test]
    fn version_line_needs_latest() {
        assert_eq!(version_line(&snapshot(UpdateState::Idle)), None);
        let s = UpdateSnapshot { latest_version: Some("1.1.0".into()), ..snapshot(UpdateState::Available) };
        assert_eq!(version_line(&s).as_deref(), Some("Current unknown -> Latest 1.1.0"));
    }

    #[test]
    fn last_checked_text_falls_back_to_raw_value() {
        let mut s = Settings::default();
        assert_eq!(last_checked_text(&s), None);
        s.last_update_check_at = Some("yesterday".into());
        assert_eq!(last_checked_text(&s).as_deref(), Some("Last checked at yesterday"));
    }
}
