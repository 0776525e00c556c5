//! Core of Pinote, a pinned-note utility: settings shared across windows,
//! debounced note persistence, window behaviour driven by settings, the
//! global toggle hotkey, launch at login and self-update.
//!
//! The `pinote` binary wires these together into the host process.

pub mod autosave;
pub mod config;
pub mod event;
pub mod hotkey;
pub mod logging;
pub mod note_window;
pub mod notes;
pub mod paths;
pub mod pubsub;
pub mod settings;
pub mod settings_window;
pub mod shortcuts;
pub mod startup;
pub mod sync;
pub mod updater;
pub mod window;
