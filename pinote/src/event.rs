#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    /// The global toggle-window hotkey was pressed.
    ToggleWindow,
    /// An update was installed; the host should flush pending writes, shut
    /// down and start again.
    Restart,
    /// Ctrl+C received; the host should stop background work and exit.
    Shutdown,
}
