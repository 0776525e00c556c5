/// Canonical file paths for Pinote data files.
///
/// Everything lives under the per-user application data directory
/// (`%APPDATA%\Pinote` on Windows, `~/Library/Application Support/Pinote` on
/// macOS, `$XDG_DATA_HOME/pinote` elsewhere):
///   - settings.json  Shared settings document, written by every window.
///   - pinote.toml    Host configuration (updater endpoints, log filter).
///   - notes/         One markdown file per note.
///   - logs/          JSON log files.
///   - updates/       Downloaded update packages awaiting install.
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

#[cfg(any(windows, target_os = "macos"))]
const APP_DIR_NAME: &str = "Pinote";
#[cfg(not(any(windows, target_os = "macos")))]
const APP_DIR_NAME: &str = "pinote";

pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const CONFIG_FILE_NAME: &str = "pinote.toml";
pub const NOTES_DIR_NAME: &str = "notes";
pub const LOGS_DIR_NAME: &str = "logs";
pub const UPDATES_DIR_NAME: &str = "updates";

/// Returns the Pinote application data directory.
pub fn app_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("No per-user data directory on this platform")?;
    Ok(base.join(APP_DIR_NAME))
}

pub fn settings_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SETTINGS_FILE_NAME)
}

pub fn config_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

pub fn notes_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(NOTES_DIR_NAME)
}

pub fn logs_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(LOGS_DIR_NAME)
}

pub fn updates_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(UPDATES_DIR_NAME)
}
