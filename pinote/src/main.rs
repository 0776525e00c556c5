use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use pinote::event::AppEvent;
use pinote::hotkey::{GlobalHotkeys, HotkeyBinder, HotkeyRegistrar};
use pinote::note_window::NoteWindow;
use pinote::settings::SettingsStore;
use pinote::settings_window::{SettingsWindow, SETTINGS_WINDOW_LABEL};
use pinote::startup::{Autostart, SystemAutostart};
use pinote::sync::{self, SettingsBus, SettingsSync};
use pinote::updater::{spawn_replacement, EventRelauncher, HttpReleaseChannel, UpdateManager};
use pinote::window::HeadlessWindow;
use pinote::{config, logging, notes, paths};

#[tokio::main]
async fn main() {
    // ── App data directory ────────────────────────────────────────────────────
    let data_dir = match paths::app_data_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Failed to resolve app data directory: {e:#}");
            std::process::exit(1);
        }
    };
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("Failed to create app data directory {}: {e}", data_dir.display());
        std::process::exit(1);
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = paths::config_file_path(&data_dir);
    let (host_config, config_error) = match config::load_or_default(&config_path) {
        Ok(c) => (c, None),
        Err(e) => (config::HostConfig::default(), Some(e)),
    };

    // ── Logging ───────────────────────────────────────────────────────────────
    let log_guard = logging::init(&paths::logs_dir(&data_dir), &host_config.logging.filter);
    if let Some(e) = config_error {
        tracing::warn!(path = %config_path.display(), error = %format!("{e:#}"), "config_load_failed");
    }

    // ── Settings ──────────────────────────────────────────────────────────────
    let store = Arc::new(SettingsStore::new(paths::settings_file_path(&data_dir)));
    let bus = SettingsBus::new();
    let settings_watcher = tokio::spawn(sync::watch_settings_file(Arc::clone(&store), bus.clone()));

    // ── Main note window ──────────────────────────────────────────────────────
    let main_sync = Arc::new(SettingsSync::open(notes::MAIN_WINDOW_LABEL, Arc::clone(&store), bus.clone()).await);
    let main_window = Arc::new(HeadlessWindow::new(notes::MAIN_WINDOW_LABEL));
    let note = NoteWindow::open(&data_dir, notes::DEFAULT_NOTE_ID, main_window, Arc::clone(&main_sync)).await;

    // ── Global hotkey ─────────────────────────────────────────────────────────
    let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(32);

    let hotkeys = Arc::new(GlobalHotkeys::start(event_tx.clone()).unwrap_or_else(|e| {
        tracing::error!(error = %format!("{e:#}"), "global_hotkeys_start_failed");
        GlobalHotkeys::detached()
    }));
    let binder = Arc::new(HotkeyBinder::new(Arc::clone(&hotkeys) as Arc<dyn HotkeyRegistrar>));

    // Follow toggle-window edits from every source (settings window, other
    // windows, hand edits of settings.json). Only the latest value matters.
    let (shortcut_tx, mut shortcut_rx) = watch::channel(main_sync.get().shortcuts.toggle_window);
    let _shortcut_subscription = main_sync.subscribe(move |s| {
        shortcut_tx.send_if_modified(|current| {
            if *current == s.shortcuts.toggle_window {
                return false;
            }
            *current = s.shortcuts.toggle_window.clone();
            true
        });
    });
    let hotkey_follower = {
        let binder = Arc::clone(&binder);
        tokio::spawn(async move {
            loop {
                let shortcut = shortcut_rx.borrow_and_update().clone();
                if let Err(e) = binder.bind(&shortcut).await {
                    tracing::error!(shortcut = %shortcut, error = %e, "hotkey_rebind_failed");
                }
                if shortcut_rx.changed().await.is_err() {
                    break;
                }
            }
        })
    };

    // ── Updater ───────────────────────────────────────────────────────────────
    let channel = Arc::new(HttpReleaseChannel::new(&host_config.updater, paths::updates_dir(&data_dir)));
    if host_config.updater.pubkey.is_none() {
        tracing::warn!("updater_pubkey_missing");
    }
    let updater = UpdateManager::new(channel, Arc::new(EventRelauncher::new(event_tx.clone())));

    // ── Settings window ───────────────────────────────────────────────────────
    let _settings_window = match SystemAutostart::new() {
        Ok(autostart) => {
            let settings_sync =
                Arc::new(SettingsSync::open(SETTINGS_WINDOW_LABEL, Arc::clone(&store), bus.clone()).await);
            Some(SettingsWindow::open(
                settings_sync,
                Arc::clone(&binder),
                Arc::new(autostart) as Arc<dyn Autostart>,
                Arc::clone(&updater),
            ))
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "autostart_unavailable");
            None
        }
    };

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(AppEvent::Shutdown).await;
            }
        });
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %data_dir.display(),
        note = note.note_id(),
        "pinote_started"
    );

    // ── Event loop ────────────────────────────────────────────────────────────
    let mut restart = false;
    while let Some(evt) = event_rx.recv().await {
        match evt {
            AppEvent::ToggleWindow => note.toggle_visibility(),
            AppEvent::Restart => {
                tracing::info!(unsaved = note.has_unsaved_changes(), "pinote_restarting");
                restart = true;
                break;
            }
            AppEvent::Shutdown => {
                tracing::info!(unsaved = note.has_unsaved_changes(), "pinote_shutting_down");
                break;
            }
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────
    note.flush().await;
    store.flush().await;
    hotkey_follower.abort();
    settings_watcher.abort();
    hotkeys.stop();

    if restart {
        tracing::info!("pinote_relaunching");
        // Drain the log file before the next instance starts writing to it.
        drop(log_guard);
        if let Err(e) = spawn_replacement() {
            eprintln!("Failed to relaunch Pinote: {e:#}");
        }
    }
}
