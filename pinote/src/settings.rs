use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, oneshot};

use crate::shortcuts::{self, ShortcutAction};

pub const MIN_OPACITY: f64 = 0.30;
pub const MAX_OPACITY: f64 = 1.00;

pub const DEFAULT_TOGGLE_WINDOW: &str = "Alt+N";
pub const DEFAULT_TOGGLE_ALWAYS_ON_TOP: &str = "Ctrl+Shift+T";
pub const DEFAULT_TOGGLE_THEME: &str = "Ctrl+Shift+D";
pub const DEFAULT_HIDE_WINDOW: &str = "Escape";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    System,
    Light,
    Dark,
}

/// A theme with the `System` choice resolved against the OS preference.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ResolvedTheme {
    Light,
    Dark,
}

impl Theme {
    pub fn resolve(self, system_prefers_dark: bool) -> ResolvedTheme {
        match self {
            Theme::Light => ResolvedTheme::Light,
            Theme::Dark => ResolvedTheme::Dark,
            Theme::System if system_prefers_dark => ResolvedTheme::Dark,
            Theme::System => ResolvedTheme::Light,
        }
    }

    /// The explicit theme the toggle action switches to from `current`.
    pub fn toggled_from(current: ResolvedTheme) -> Theme {
        match current {
            ResolvedTheme::Dark => Theme::Light,
            ResolvedTheme::Light => Theme::Dark,
        }
    }
}

/// Shortcut bindings, always stored in normalized form.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Shortcuts {
    pub toggle_window: String,
    pub toggle_always_on_top: String,
    pub toggle_theme: String,
    pub hide_window: String,
}

impl Default for Shortcuts {
    fn default() -> Self {
        Self {
            toggle_window: DEFAULT_TOGGLE_WINDOW.to_string(),
            toggle_always_on_top: DEFAULT_TOGGLE_ALWAYS_ON_TOP.to_string(),
            toggle_theme: DEFAULT_TOGGLE_THEME.to_string(),
            hide_window: DEFAULT_HIDE_WINDOW.to_string(),
        }
    }
}

impl Shortcuts {
    pub fn get(&self, action: ShortcutAction) -> &str {
        match action {
            ShortcutAction::ToggleWindow => &self.toggle_window,
            ShortcutAction::ToggleAlwaysOnTop => &self.toggle_always_on_top,
            ShortcutAction::ToggleTheme => &self.toggle_theme,
            ShortcutAction::HideWindow => &self.hide_window,
        }
    }

    fn slot_mut(&mut self, action: ShortcutAction) -> &mut String {
        match action {
            ShortcutAction::ToggleWindow => &mut self.toggle_window,
            ShortcutAction::ToggleAlwaysOnTop => &mut self.toggle_always_on_top,
            ShortcutAction::ToggleTheme => &mut self.toggle_theme,
            ShortcutAction::HideWindow => &mut self.hide_window,
        }
    }

    /// Stores `value` for `action` if it normalizes; otherwise leaves the
    /// binding untouched and returns false.
    fn set(&mut self, action: ShortcutAction, value: &str) -> bool {
        match shortcuts::normalize(value) {
            Some(normalized) => {
                *self.slot_mut(action) = normalized;
                true
            }
            None => false,
        }
    }
}

/// The shared settings document. Serialized as `settings.json`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub theme: Theme,
    pub always_on_top: bool,
    /// Window background opacity. Clamped to [0.30, 1.00].
    pub opacity: f64,
    pub launch_at_startup: bool,
    /// RFC 3339 timestamp of the last completed update check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_check_at: Option<String>,
    pub shortcuts: Shortcuts,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            always_on_top: false,
            opacity: 1.0,
            launch_at_startup: false,
            last_update_check_at: None,
            shortcuts: Shortcuts::default(),
        }
    }
}

/// A partial update. `None` fields are left as they are.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub theme: Option<Theme>,
    pub always_on_top: Option<bool>,
    pub opacity: Option<f64>,
    pub launch_at_startup: Option<bool>,
    pub last_update_check_at: Option<String>,
    pub shortcuts: Option<ShortcutsPatch>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ShortcutsPatch {
    pub toggle_window: Option<String>,
    pub toggle_always_on_top: Option<String>,
    pub toggle_theme: Option<String>,
    pub hide_window: Option<String>,
}

impl ShortcutsPatch {
    pub fn single(action: ShortcutAction, value: impl Into<String>) -> Self {
        let mut patch = Self::default();
        let value = Some(value.into());
        match action {
            ShortcutAction::ToggleWindow => patch.toggle_window = value,
            ShortcutAction::ToggleAlwaysOnTop => patch.toggle_always_on_top = value,
            ShortcutAction::ToggleTheme => patch.toggle_theme = value,
            ShortcutAction::HideWindow => patch.hide_window = value,
        }
        patch
    }

    fn entries(&self) -> [(ShortcutAction, Option<&String>); 4] {
        [
            (ShortcutAction::ToggleWindow, self.toggle_window.as_ref()),
            (ShortcutAction::ToggleAlwaysOnTop, self.toggle_always_on_top.as_ref()),
            (ShortcutAction::ToggleTheme, self.toggle_theme.as_ref()),
            (ShortcutAction::HideWindow, self.hide_window.as_ref()),
        ]
    }
}

impl SettingsPatch {
    pub fn theme(theme: Theme) -> Self {
        Self { theme: Some(theme), ..Self::default() }
    }

    pub fn always_on_top(on: bool) -> Self {
        Self { always_on_top: Some(on), ..Self::default() }
    }

    pub fn opacity(opacity: f64) -> Self {
        Self { opacity: Some(opacity), ..Self::default() }
    }

    pub fn launch_at_startup(enabled: bool) -> Self {
        Self { launch_at_startup: Some(enabled), ..Self::default() }
    }

    pub fn last_update_check_at(at: impl Into<String>) -> Self {
        Self { last_update_check_at: Some(at.into()), ..Self::default() }
    }

    pub fn shortcut(action: ShortcutAction, value: impl Into<String>) -> Self {
        Self { shortcuts: Some(ShortcutsPatch::single(action, value)), ..Self::default() }
    }
}

pub fn clamp_opacity(value: f64) -> f64 {
    if value.is_nan() {
        return MAX_OPACITY;
    }
    value.clamp(MIN_OPACITY, MAX_OPACITY)
}

impl Settings {
    /// Merges `patch` into `self`: top-level fields replace, shortcut entries
    /// merge key by key. Shortcuts that fail to normalize are skipped.
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(theme) = patch.theme {
            self.theme = theme;
        }
        if let Some(on) = patch.always_on_top {
            self.always_on_top = on;
        }
        if let Some(opacity) = patch.opacity {
            self.opacity = clamp_opacity(opacity);
        }
        if let Some(enabled) = patch.launch_at_startup {
            self.launch_at_startup = enabled;
        }
        if let Some(at) = &patch.last_update_check_at {
            self.last_update_check_at = Some(at.clone());
        }
        if let Some(shortcuts) = &patch.shortcuts {
            for (action, value) in shortcuts.entries() {
                if let Some(value) = value {
                    if !self.shortcuts.set(action, value) {
                        tracing::warn!(shortcut = %value, action = action.label(), "settings_shortcut_rejected");
                    }
                }
            }
        }
    }

    pub fn merged(&self, patch: &SettingsPatch) -> Settings {
        let mut next = self.clone();
        next.apply(patch);
        next
    }

    /// Builds settings from a persisted JSON document, filling every missing
    /// or malformed field (and every missing shortcut) from the defaults.
    pub fn from_stored(stored: &Map<String, Value>) -> Settings {
        let mut settings = Settings::default();

        if let Some(theme) = field(stored, "theme") {
            settings.theme = theme;
        }
        if let Some(on) = field(stored, "alwaysOnTop") {
            settings.always_on_top = on;
        }
        if let Some(opacity) = field::<f64>(stored, "opacity") {
            settings.opacity = clamp_opacity(opacity);
        }
        if let Some(enabled) = field(stored, "launchAtStartup") {
            settings.launch_at_startup = enabled;
        }
        settings.last_update_check_at = field(stored, "lastUpdateCheckAt");

        if let Some(Value::Object(stored_shortcuts)) = stored.get("shortcuts") {
            for (action, key) in [
                (ShortcutAction::ToggleWindow, "toggleWindow"),
                (ShortcutAction::ToggleAlwaysOnTop, "toggleAlwaysOnTop"),
                (ShortcutAction::ToggleTheme, "toggleTheme"),
                (ShortcutAction::HideWindow, "hideWindow"),
            ] {
                if let Some(value) = field::<String>(stored_shortcuts, key) {
                    settings.shortcuts.set(action, &value);
                }
            }
        }

        settings
    }
}

fn field<T: DeserializeOwned>(map: &Map<String, Value>, key: &str) -> Option<T> {
    map.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// Durable storage for the settings document. Never fails toward its caller:
/// read problems fall back to defaults and write problems are logged.
///
/// Writes go to `settings.json.tmp` and are renamed over the real file, so a
/// reader never sees a half-written document.
#[derive(Debug)]
pub struct SettingsStore {
    file: Arc<StoreFile>,
    /// Background writer, started on first use inside a tokio runtime.
    writer: OnceLock<mpsc::UnboundedSender<WriteRequest>>,
}

#[derive(Debug)]
struct StoreFile {
    path: PathBuf,
    /// Exact bytes of the last document this process wrote. Held while
    /// writing and while reading back external edits.
    last_written: Mutex<Option<String>>,
}

#[derive(Debug)]
enum WriteRequest {
    Save(Settings),
    Flush(oneshot::Sender<()>),
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Arc::new(StoreFile { path: path.into(), last_written: Mutex::new(None) }),
            writer: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    pub fn load(&self) -> Settings {
        match self.try_load() {
            Ok(Some(settings)) => settings,
            Ok(None) => Settings::default(),
            Err(e) => {
                tracing::warn!(path = %self.path().display(), error = %format!("{e:#}"), "settings_load_failed");
                Settings::default()
            }
        }
    }

    /// Reads the settings file. `Ok(None)` when it does not exist.
    pub fn try_load(&self) -> Result<Option<Settings>> {
        match self.file.read()? {
            Some(content) => self.file.parse(&content).map(Some),
            None => Ok(None),
        }
    }

    /// Reads the file for the change watcher. Returns `Ok(None)` when the file
    /// is absent or still holds exactly what this process last wrote.
    pub fn load_external(&self) -> Result<Option<Settings>> {
        let last_written = self.file.last_written.lock();
        let Some(content) = self.file.read()? else {
            return Ok(None);
        };
        if last_written.as_deref() == Some(content.as_str()) {
            return Ok(None);
        }
        self.file.parse(&content).map(Some)
    }

    /// Writes `settings` on the calling thread.
    pub fn save(&self, settings: &Settings) {
        self.file.save(settings);
    }

    /// Queues `settings` for the background writer. Writes land in the order
    /// they were queued. Outside a tokio runtime this writes immediately.
    pub fn save_in_background(&self, settings: Settings) {
        let Some(writer) = self.writer() else {
            self.file.save(&settings);
            return;
        };
        if let Err(mpsc::error::SendError(request)) = writer.send(WriteRequest::Save(settings)) {
            tracing::warn!(path = %self.path().display(), "settings_writer_closed");
            if let WriteRequest::Save(settings) = request {
                self.file.save(&settings);
            }
        }
    }

    /// Waits until every queued write has reached the disk.
    pub async fn flush(&self) {
        let Some(writer) = self.writer.get() else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if writer.send(WriteRequest::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn writer(&self) -> Option<&mpsc::UnboundedSender<WriteRequest>> {
        if let Some(writer) = self.writer.get() {
            return Some(writer);
        }
        let handle = tokio::runtime::Handle::try_current().ok()?;
        Some(self.writer.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            handle.spawn(run_writer(Arc::clone(&self.file), rx));
            tx
        }))
    }
}

impl StoreFile {
    fn read(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read settings file: {}", self.path.display())),
        }
    }

    fn parse(&self, content: &str) -> Result<Settings> {
        let parsed: Value = serde_json::from_str(content)
            .with_context(|| format!("Failed to parse settings file: {}", self.path.display()))?;
        match parsed {
            Value::Object(map) => Ok(Settings::from_stored(&map)),
            _ => anyhow::bail!("Settings file is not a JSON object: {}", self.path.display()),
        }
    }

    fn save(&self, settings: &Settings) {
        if let Err(e) = self.try_save(settings) {
            tracing::error!(path = %self.path.display(), error = %format!("{e:#}"), "settings_save_failed");
        }
    }

    fn try_save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;

        let mut last_written = self.last_written.lock();
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &content)
            .with_context(|| format!("Failed to write settings file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace settings file: {}", self.path.display()))?;
        *last_written = Some(content);
        Ok(())
    }
}

async fn run_writer(file: Arc<StoreFile>, mut rx: mpsc::UnboundedReceiver<WriteRequest>) {
    while let Some(request) = rx.recv().await {
        match request {
            WriteRequest::Save(settings) => {
                let file = Arc::clone(&file);
                if let Err(e) = tokio::task::spawn_blocking(move || file.save(&settings)).await {
                    tracing::error!(error = %e, "settings_write_task_failed");
                }
            }
            WriteRequest::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}
