/// Launch-at-login registration.
///
/// - Windows: a `Pinote` value under `HKCU\Software\Microsoft\Windows\CurrentVersion\Run`.
/// - macOS: a LaunchAgent plist in `~/Library/LaunchAgents`.
/// - Other Unix: an XDG autostart entry, `~/.config/autostart/pinote.desktop`.
///
/// Every operation is idempotent.
use anyhow::{Context, Result};
use std::path::PathBuf;

pub trait Autostart: Send + Sync {
    fn enable(&self) -> Result<()>;
    fn disable(&self) -> Result<()>;
    fn is_enabled(&self) -> Result<bool>;
}

/// Registers the running executable with the OS login items.
pub struct SystemAutostart {
    exe: PathBuf,
    #[cfg(not(windows))]
    entry: PathBuf,
}

impl SystemAutostart {
    pub fn new() -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to locate executable")?;
        #[cfg(windows)]
        {
            Ok(Self { exe })
        }
        #[cfg(not(windows))]
        {
            Ok(Self { exe, entry: entry::default_path()? })
        }
    }

    /// Uses `entry` as the login-item file instead of the per-user default.
    #[cfg(not(windows))]
    pub fn with_entry(exe: PathBuf, entry: PathBuf) -> Self {
        Self { exe, entry }
    }
}

// ── Windows implementation ─────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use anyhow::{bail, Result};
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_SUCCESS};
    use windows::Win32::System::Registry::{
        RegCloseKey, RegCreateKeyExW, RegDeleteValueW, RegOpenKeyExW, RegQueryValueExW, RegSetValueExW, HKEY,
        HKEY_CURRENT_USER, KEY_QUERY_VALUE, KEY_SET_VALUE, REG_OPTION_NON_VOLATILE, REG_SZ,
    };

    const RUN_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Run";
    const VALUE_NAME: &str = "Pinote";

    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    pub fn register(exe_path: &str) -> Result<()> {
        let key_w = to_wide(RUN_KEY);
        let val_w = to_wide(VALUE_NAME);
        // Quoted so paths with spaces survive the Run-key parser.
        let data_w = to_wide(&format!("\"{exe_path}\""));
        let data_bytes: &[u8] =
            unsafe { std::slice::from_raw_parts(data_w.as_ptr() as *const u8, data_w.len() * 2) };

        let mut hkey = HKEY::default();
        let err = unsafe {
            RegCreateKeyExW(
                HKEY_CURRENT_USER,
                PCWSTR::from_raw(key_w.as_ptr()),
                0,
                PCWSTR::null(),
                REG_OPTION_NON_VOLATILE,
                KEY_SET_VALUE,
                None,
                &mut hkey,
                None,
            )
        };
        if err != ERROR_SUCCESS {
            bail!("RegCreateKeyExW failed: {:?}", err);
        }

        let err = unsafe { RegSetValueExW(hkey, PCWSTR::from_raw(val_w.as_ptr()), 0, REG_SZ, Some(data_bytes)) };
        unsafe {
            let _ = RegCloseKey(hkey);
        };

        if err != ERROR_SUCCESS {
            bail!("RegSetValueExW failed: {:?}", err);
        }
        Ok(())
    }

    /// Succeeds if the value or the key is already absent.
    pub fn unregister() -> Result<()> {
        let key_w = to_wide(RUN_KEY);
        let val_w = to_wide(VALUE_NAME);

        let mut hkey = HKEY::default();
        let err =
            unsafe { RegOpenKeyExW(HKEY_CURRENT_USER, PCWSTR::from_raw(key_w.as_ptr()), 0, KEY_SET_VALUE, &mut hkey) };
        if err != ERROR_SUCCESS {
            return Ok(());
        }

        let err = unsafe { RegDeleteValueW(hkey, PCWSTR::from_raw(val_w.as_ptr())) };
        unsafe {
            let _ = RegCloseKey(hkey);
        };

        if err != ERROR_SUCCESS && err != ERROR_FILE_NOT_FOUND {
            bail!("RegDeleteValueW failed: {:?}", err);
        }
        Ok(())
    }

    pub fn is_registered() -> Result<bool> {
        let key_w = to_wide(RUN_KEY);
        let val_w = to_wide(VALUE_NAME);

        let mut hkey = HKEY::default();
        let err =
            unsafe { RegOpenKeyExW(HKEY_CURRENT_USER, PCWSTR::from_raw(key_w.as_ptr()), 0, KEY_QUERY_VALUE, &mut hkey) };
        if err == ERROR_FILE_NOT_FOUND {
            return Ok(false);
        }
        if err != ERROR_SUCCESS {
            bail!("RegOpenKeyExW failed: {:?}", err);
        }

        let err = unsafe { RegQueryValueExW(hkey, PCWSTR::from_raw(val_w.as_ptr()), None, None, None, None) };
        unsafe {
            let _ = RegCloseKey(hkey);
        };

        match err {
            e if e == ERROR_SUCCESS => Ok(true),
            e if e == ERROR_FILE_NOT_FOUND => Ok(false),
            e => bail!("RegQueryValueExW failed: {:?}", e),
        }
    }
}

#[cfg(windows)]
impl Autostart for SystemAutostart {
    fn enable(&self) -> Result<()> {
        let exe = self.exe.to_string_lossy();
        imp::register(&exe)?;
        tracing::info!(exe = %exe, "autostart_enabled");
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        imp::unregister()?;
        tracing::info!("autostart_disabled");
        Ok(())
    }

    fn is_enabled(&self) -> Result<bool> {
        imp::is_registered()
    }
}

// ── File-based implementation (macOS, XDG) ─────────────────────────────────────

#[cfg(not(windows))]
mod entry {
    use anyhow::{Context, Result};
    use std::path::{Path, PathBuf};

    #[cfg(target_os = "macos")]
    pub const AGENT_LABEL: &str = "com.pinote.app";

    #[cfg(target_os = "macos")]
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not resolve home directory")?;
        Ok(home.join("Library").join("LaunchAgents").join(format!("{AGENT_LABEL}.plist")))
    }

    #[cfg(not(target_os = "macos"))]
    pub fn default_path() -> Result<PathBuf> {
        let config = dirs::config_dir().context("Could not resolve config directory")?;
        Ok(config.join("autostart").join("pinote.desktop"))
    }

    #[cfg(target_os = "macos")]
    pub fn contents(exe: &Path) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>Label</key>
  <string>{AGENT_LABEL}</string>
  <key>ProgramArguments</key>
  <array>
    <string>{}</string>
  </array>
  <key>RunAtLoad</key>
  <true/>
</dict>
</plist>
"#,
            xml_escape(&exe.to_string_lossy())
        )
    }

    #[cfg(target_os = "macos")]
    fn xml_escape(s: &str) -> String {
        s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
    }

    #[cfg(not(target_os = "macos"))]
    pub fn contents(exe: &Path) -> String {
        format!(
            "[Desktop Entry]\nType=Application\nName=Pinote\nExec=\"{}\"\nX-GNOME-Autostart-enabled=true\n",
            exe.to_string_lossy()
        )
    }

    pub fn write(path: &Path, exe: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create autostart directory {}", dir.display()))?;
        }
        std::fs::write(path, contents(exe))
            .with_context(|| format!("Failed to write autostart entry {}", path.display()))
    }

    pub fn remove(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove autostart entry {}", path.display())),
        }
    }
}

#[cfg(not(windows))]
impl Autostart for SystemAutostart {
    fn enable(&self) -> Result<()> {
        entry::write(&self.entry, &self.exe)?;
        tracing::info!(entry = %self.entry.display(), "autostart_enabled");
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        entry::remove(&self.entry)?;
        tracing::info!(entry = %self.entry.display(), "autostart_disabled");
        Ok(())
    }

    fn is_enabled(&self) -> Result<bool> {
        self.entry
            .try_exists()
            .with_context(|| format!("Failed to inspect autostart entry {}", self.entry.display()))
    }
}

#[cfg(all(test, not(windows)))]
mod tests {
    use super::*;

    fn autostart(dir: &std::path::Path) -> SystemAutostart {
        SystemAutostart::with_entry(
            PathBuf::from("/opt/Pinote/pinote"),
            dir.join("autostart").join("pinote.entry"),
        )
    }

    #[test]
    fn enable_writes_entry_pointing_at_exe() {
        let dir = tempfile::tempdir().unwrap();
        let a = autostart(dir.path());
        assert!(!a.is_enabled().unwrap());

        a.enable().unwrap();
        assert!(a.is_enabled().unwrap());
        let content = std::fs::read_to_string(dir.path().join("autostart").join("pinote.entry")).unwrap();
        assert!(content.contains("/opt/Pinote/pinote"));
    }

    #[test]
    fn enable_and_disable_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let a = autostart(dir.path());
        a.enable().unwrap();
        a.enable().unwrap();
        assert!(a.is_enabled().unwrap());

        a.disable().unwrap();
        a.disable().unwrap();
        assert!(!a.is_enabled().unwrap());
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn desktop_entry_format() {
        let content = entry::contents(std::path::Path::new("/usr/bin/pinote"));
        assert!(content.starts_with("[Desktop Entry]\n"));
        assert!(content.contains("Exec=\"/usr/bin/pinote\"\n"));
        assert!(content.contains("Type=Application\n"));
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn launch_agent_runs_at_load() {
        let content = entry::contents(std::path::Path::new("/Applications/Pinote.app/Contents/MacOS/pinote"));
        assert!(content.contains("<string>com.pinote.app</string>"));
        assert!(content.contains("<key>RunAtLoad</key>\n  <true/>"));
    }
}
