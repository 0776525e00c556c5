use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_LOG_FILTER: &str = "info";

/// Host configuration. Deserialized from `<app-data>/pinote.toml`.
///
/// Unlike the settings document this is operator-facing: it is never written
/// by the app and is only read at startup.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct HostConfig {
    #[serde(default)]
    pub updater: UpdaterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct UpdaterConfig {
    /// Release manifest URLs, tried in order.
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// Accept plain-HTTP endpoints in release builds.
    #[serde(default)]
    pub allow_insecure: bool,
    /// Base64-encoded minisign public key that update packages must be
    /// signed with. Without it no package is installed.
    #[serde(default)]
    pub pubkey: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: default_log_filter() }
    }
}

/// Loads the config file at `path`, returning `HostConfig::default()` if the
/// file does not exist. Returns an error if the file exists but cannot be read
/// or parsed.
pub fn load_or_default(path: &Path) -> Result<HostConfig> {
    if !path.exists() {
        return Ok(HostConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn default_has_no_endpoints_and_info_logging() {
        let c = HostConfig::default();
        assert!(c.updater.endpoints.is_empty());
        assert!(!c.updater.allow_insecure);
        assert_eq!(c.logging.filter, DEFAULT_LOG_FILTER);
    }

    // ── load_or_default ───────────────────────────────────────────────────────

    #[test]
    fn load_or_default_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(&dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(config, HostConfig::default());
    }

    #[test]
    fn load_or_default_parses_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pinote.toml");
        std::fs::write(
            &path,
            r#"
[updater]
endpoints = ["https://releases.example.com/pinote/latest.json", "https://mirror.example.com/latest.json"]
allow_insecure = true
pubkey = "dW50cnVzdGVkIGNvbW1lbnQ="

[logging]
filter = "pinote=debug"
"#,
        )
        .unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.updater.endpoints.len(), 2);
        assert_eq!(config.updater.endpoints[0], "https://releases.example.com/pinote/latest.json");
        assert!(config.updater.allow_insecure);
        assert_eq!(config.updater.pubkey.as_deref(), Some("dW50cnVzdGVkIGNvbW1lbnQ="));
        assert_eq!(config.logging.filter, "pinote=debug");
    }

    #[test]
    fn load_or_default_partial_toml_uses_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pinote.toml");
        std::fs::write(&path, "[updater]\nendpoints = [\"https://x.test/latest.json\"]\n").unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.updater.endpoints, vec!["https://x.test/latest.json".to_string()]);
        assert!(!config.updater.allow_insecure);
        assert!(config.updater.pubkey.is_none());
        assert_eq!(config.logging.filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn load_or_default_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pinote.toml");
        std::fs::write(&path, "this is not valid toml ][[[").unwrap();
        assert!(load_or_default(&path).is_err());
    }
}
