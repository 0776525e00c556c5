/// A note editor window: one note file, one OS window, one settings view.
use std::path::Path;
use std::sync::Arc;

use crate::autosave::AutoSave;
use crate::notes::{self, DEFAULT_NOTE_ID};
use crate::settings::{SettingsPatch, Theme};
use crate::shortcuts::{self, KeyEvent, ShortcutAction};
use crate::sync::SettingsSync;
use crate::window::{NativeWindow, WindowController};

pub struct NoteWindow {
    settings: Arc<SettingsSync>,
    controller: WindowController,
    autosave: AutoSave,
    initial_content: String,
}

impl NoteWindow {
    /// Resolves `raw_note_id` once, loads the note and binds `window` to the
    /// shared settings.
    pub async fn open(
        data_dir: &Path,
        raw_note_id: &str,
        window: Arc<dyn NativeWindow>,
        settings: Arc<SettingsSync>,
    ) -> Self {
        let autosave = AutoSave::new(data_dir, raw_note_id);
        let initial_content = autosave.load().await;
        let controller = WindowController::bind(window, Arc::clone(&settings));
        tracing::info!(
            note = autosave.note_id(),
            window = controller.label(),
            bytes = initial_content.len(),
            "note_window_open"
        );
        Self { settings, controller, autosave, initial_content }
    }

    pub fn note_id(&self) -> &str {
        self.autosave.note_id()
    }

    pub fn title(&self) -> String {
        title_for(self.note_id())
    }

    /// Content as it was on disk when the window opened.
    pub fn initial_content(&self) -> &str {
        &self.initial_content
    }

    /// Called by the editor on every change.
    pub fn on_change(&self, markdown: impl Into<String>) {
        self.autosave.save(markdown);
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.autosave.has_pending()
    }

    /// Writes any edit still waiting out the auto-save quiet period.
    pub async fn flush(&self) {
        self.autosave.flush().await;
    }

    /// Runs the in-window action bound to `event`, if any, and returns it.
    pub fn handle_key(&self, event: &KeyEvent, system_prefers_dark: bool) -> Option<ShortcutAction> {
        let action = shortcuts::action_for_event(&self.settings.get().shortcuts, event)?;
        match action {
            ShortcutAction::HideWindow => self.controller.hide_window(),
            ShortcutAction::ToggleAlwaysOnTop => {
                self.controller.toggle_always_on_top();
            }
            ShortcutAction::ToggleTheme => self.toggle_theme(system_prefers_dark),
            ShortcutAction::ToggleWindow => self.controller.toggle_visibility(),
        }
        tracing::debug!(note = self.note_id(), action = action.label(), "note_window_shortcut");
        Some(action)
    }

    /// Switches between light and dark, starting from what is on screen.
    pub fn toggle_theme(&self, system_prefers_dark: bool) {
        let shown = self.settings.get().theme.resolve(system_prefers_dark);
        self.settings.update(&SettingsPatch::theme(Theme::toggled_from(shown)));
    }

    /// Global toggle-window hotkey.
    pub fn toggle_visibility(&self) {
        self.controller.toggle_visibility();
    }
}

pub fn title_for(note_id: &str) -> String {
    if note_id == DEFAULT_NOTE_ID {
        "Pinote".to_string()
    } else {
        format!("Pinote - {note_id}")
    }
}

/// Note to open for the "open note" prompt: the typed id, or a fresh one when
/// the prompt was left blank.
pub fn requested_note_id(input: &str) -> String {
    if input.trim().is_empty() {
        notes::generate_id()
    } else {
        notes::normalize_id(input)
    }
}
