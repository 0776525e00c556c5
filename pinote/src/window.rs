/// Keeps one OS window in line with the shared settings and exposes the
/// window-level actions bound to shortcuts.
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::pubsub::Subscription;
use crate::settings::{Settings, SettingsPatch};
use crate::sync::SettingsSync;

/// The OS window primitives the controller needs.
pub trait NativeWindow: Send + Sync {
    fn label(&self) -> &str;
    fn show(&self) -> Result<()>;
    fn hide(&self) -> Result<()>;
    fn focus(&self) -> Result<()>;
    fn is_visible(&self) -> Result<bool>;
    fn set_always_on_top(&self, on: bool) -> Result<()>;
    fn set_opacity(&self, opacity: f64) -> Result<()>;
}

/// Last values pushed to the OS, so repeated broadcasts don't re-issue calls.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Applied {
    always_on_top: bool,
    opacity: f64,
}

pub struct WindowController {
    window: Arc<dyn NativeWindow>,
    settings: Arc<SettingsSync>,
    _subscription: Subscription,
}

impl WindowController {
    /// Applies the current settings to `window` and keeps applying them on
    /// every change until the controller is dropped.
    pub fn bind(window: Arc<dyn NativeWindow>, settings: Arc<SettingsSync>) -> Self {
        let applied = Arc::new(Mutex::new(None));
        apply(window.as_ref(), &applied, &settings.get());

        let subscription = {
            let window = Arc::clone(&window);
            settings.subscribe(move |s| apply(window.as_ref(), &applied, s))
        };

        Self { window, settings, _subscription: subscription }
    }

    pub fn label(&self) -> &str {
        self.window.label()
    }

    /// Flips `alwaysOnTop` in the shared settings. The window picks the new
    /// value up through its own subscription. Returns the new value.
    pub fn toggle_always_on_top(&self) -> bool {
        let next = !self.settings.get().always_on_top;
        self.settings.update(&SettingsPatch::always_on_top(next));
        next
    }

    pub fn hide_window(&self) {
        if let Err(e) = self.window.hide() {
            tracing::error!(window = %self.window.label(), error = %format!("{e:#}"), "window_hide_failed");
        }
    }

    /// Hides a visible window; shows and focuses a hidden one.
    pub fn toggle_visibility(&self) {
        let label = self.window.label();
        let visible = match self.window.is_visible() {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(window = %label, error = %format!("{e:#}"), "window_visibility_query_failed");
                return;
            }
        };
        let result = if visible {
            self.window.hide()
        } else {
            self.window.show().and_then(|_| self.window.focus())
        };
        match result {
            Ok(()) => tracing::debug!(window = %label, visible = !visible, "window_visibility_toggled"),
            Err(e) => tracing::error!(window = %label, error = %format!("{e:#}"), "window_toggle_failed"),
        }
    }
}

fn apply(window: &dyn NativeWindow, applied: &Mutex<Option<Applied>>, settings: &Settings) {
    let next = Applied { always_on_top: settings.always_on_top, opacity: settings.opacity };
    let mut last = applied.lock();
    let previous = *last;

    if previous.map(|p| p.always_on_top) != Some(next.always_on_top) {
        if let Err(e) = window.set_always_on_top(next.always_on_top) {
            tracing::error!(window = %window.label(), error = %format!("{e:#}"), "window_always_on_top_failed");
        }
    }
    if previous.map(|p| p.opacity) != Some(next.opacity) {
        if let Err(e) = window.set_opacity(next.opacity) {
            tracing::error!(window = %window.label(), error = %format!("{e:#}"), "window_opacity_failed");
        }
    }
    *last = Some(next);
}

// ── Headless window ───────────────────────────────────────────────────────────

/// In-memory window. Used by the host when no GUI toolkit is attached.
pub struct HeadlessWindow {
    label: String,
    visible: AtomicBool,
    always_on_top: AtomicBool,
    opacity: Mutex<f64>,
    focus_count: AtomicUsize,
}

impl HeadlessWindow {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            visible: AtomicBool::new(true),
            always_on_top: AtomicBool::new(false),
            opacity: Mutex::new(1.0),
            focus_count: AtomicUsize::new(0),
        }
    }

    pub fn always_on_top(&self) -> bool {
        self.always_on_top.load(Ordering::SeqCst)
    }

    pub fn opacity(&self) -> f64 {
        *self.opacity.lock()
    }

    pub fn focus_count(&self) -> usize {
        self.focus_count.load(Ordering::SeqCst)
    }
}

impl NativeWindow for HeadlessWindow {
    fn label(&self) -> &str {
        &self.label
    }

    fn show(&self) -> Result<()> {
        self.visible.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn hide(&self) -> Result<()> {
        self.visible.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn focus(&self) -> Result<()> {
        self.focus_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_visible(&self) -> Result<bool> {
        Ok(self.visible.load(Ordering::SeqCst))
    }

    fn set_always_on_top(&self, on: bool) -> Result<()> {
        self.always_on_top.store(on, Ordering::SeqCst);
        Ok(())
    }

    fn set_opacity(&self, opacity: f64) -> Result<()> {
        *self.opacity.lock() = opacity;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsStore;
    use crate::sync::SettingsBus;

    async fn open_sync(dir: &std::path::Path, label: &str, bus: &SettingsBus) -> Arc<SettingsSync> {
        let store = Arc::new(SettingsStore::new(dir.join("settings.json")));
        Arc::new(SettingsSync::open(label, store, bus.clone()).await)
    }

    /// Records every OS call so tests can assert on what was issued.
    #[derive(Default)]
    struct RecordingWindow {
        calls: Mutex<Vec<String>>,
        fail_hide: bool,
    }

    impl NativeWindow for RecordingWindow {
        fn label(&self) -> &str {
            "recording"
        }
        fn show(&self) -> Result<()> {
            self.calls.lock().push("show".into());
            Ok(())
        }
        fn hide(&self) -> Result<()> {
            self.calls.lock().push("hide".into());
            if self.fail_hide {
                anyhow::bail!("hide refused");
            }
            Ok(())
        }
        fn focus(&self) -> Result<()> {
            self.calls.lock().push("focus".into());
            Ok(())
        }
        fn is_visible(&self) -> Result<bool> {
            Ok(true)
        }
        fn set_always_on_top(&self, on: bool) -> Result<()> {
            self.calls.lock().push(format!("on_top={on}"));
            Ok(())
        }
        fn set_opacity(&self, opacity: f64) -> Result<()> {
            self.calls.lock().push(format!("opacity={opacity}"));
            Ok(())
        }
    }

    // ── bind ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn bind_applies_persisted_settings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"alwaysOnTop": true, "opacity": 0.5}"#,
        )
        .unwrap();
        let bus = SettingsBus::new();
        let sync = open_sync(dir.path(), "main", &bus).await;
        let window = Arc::new(HeadlessWindow::new("main"));

        let _controller = WindowController::bind(window.clone(), sync);
        assert!(window.always_on_top());
        assert_eq!(window.opacity(), 0.5);
    }

    #[tokio::test]
    async fn remote_change_reaches_window() {
        let dir = tempfile::tempdir().unwrap();
        let bus = SettingsBus::new();
        let main = open_sync(dir.path(), "main", &bus).await;
        let settings = open_sync(dir.path(), "settings", &bus).await;
        let window = Arc::new(HeadlessWindow::new("main"));
        let _controller = WindowController::bind(window.clone(), main);

        settings.update(&SettingsPatch::always_on_top(true));
        for _ in 0..100 {
            if window.always_on_top() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(window.always_on_top());
    }

    #[tokio::test]
    async fn unchanged_values_are_not_reapplied() {
        let dir = tempfile::tempdir().unwrap();
        let bus = SettingsBus::new();
        let sync = open_sync(dir.path(), "main", &bus).await;
        let window = Arc::new(RecordingWindow::default());
        let _controller = WindowController::bind(window.clone(), Arc::clone(&sync));

        sync.update(&SettingsPatch::launch_at_startup(true));
        sync.update(&SettingsPatch::opacity(0.8));

        assert_eq!(
            *window.calls.lock(),
            vec!["on_top=false".to_string(), "opacity=1".to_string(), "opacity=0.8".to_string()]
        );
    }

    // ── actions ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn toggle_always_on_top_goes_through_settings() {
        let dir = tempfile::tempdir().unwrap();
        let bus = SettingsBus::new();
        let sync = open_sync(dir.path(), "main", &bus).await;
        let window = Arc::new(HeadlessWindow::new("main"));
        let controller = WindowController::bind(window.clone(), Arc::clone(&sync));

        assert!(controller.toggle_always_on_top());
        assert!(sync.get().always_on_top);
        assert!(window.always_on_top());

        assert!(!controller.toggle_always_on_top());
        assert!(!window.always_on_top());
    }

    #[tokio::test]
    async fn toggle_visibility_hides_then_shows_and_focuses() {
        let dir = tempfile::tempdir().unwrap();
        let bus = SettingsBus::new();
        let sync = open_sync(dir.path(), "main", &bus).await;
        let window = Arc::new(HeadlessWindow::new("main"));
        let controller = WindowController::bind(window.clone(), sync);

        controller.toggle_visibility();
        assert!(!window.is_visible().unwrap());
        assert_eq!(window.focus_count(), 0);

        controller.toggle_visibility();
        assert!(window.is_visible().unwrap());
        assert_eq!(window.focus_count(), 1);
    }

    #[tokio::test]
    async fn os_failures_are_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let bus = SettingsBus::new();
        let sync = open_sync(dir.path(), "main", &bus).await;
        let window = Arc::new(RecordingWindow { fail_hide: true, ..Default::default() });
        let controller = WindowController::bind(window.clone(), sync);

        controller.hide_window();
        controller.toggle_visibility();
        assert_eq!(window.calls.lock().iter().filter(|c| *c == "hide").count(), 2);
    }
}
