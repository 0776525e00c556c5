/// Keyboard-shortcut codec.
///
/// Shortcut strings are `+`-separated tokens such as `"ctrl+shift+t"` or
/// `"Cmd+Esc"`. The normalized form orders modifiers `Ctrl`, `Alt`, `Shift`,
/// `Meta`, followed by exactly one key with a canonical name, e.g.
/// `"Ctrl+Shift+T"` or `"Meta+Escape"`.
use thiserror::Error;

use crate::settings::Shortcuts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Meta,
}

impl Modifier {
    fn as_str(self) -> &'static str {
        match self {
            Modifier::Ctrl => "Ctrl",
            Modifier::Alt => "Alt",
            Modifier::Shift => "Shift",
            Modifier::Meta => "Meta",
        }
    }
}

enum Token {
    Modifier(Modifier),
    Key(String),
}

/// The subset of a key-down event the codec needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

impl KeyEvent {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), ..Self::default() }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn alt(mut self) -> Self {
        self.alt = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn meta(mut self) -> Self {
        self.meta = true;
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShortcutError {
    #[error("Invalid shortcut.")]
    Invalid,
    #[error("Failed to register shortcut: {0}")]
    Registration(String),
}

/// The four logical actions a shortcut can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutAction {
    ToggleWindow,
    ToggleAlwaysOnTop,
    ToggleTheme,
    HideWindow,
}

impl ShortcutAction {
    pub const ALL: [ShortcutAction; 4] = [
        ShortcutAction::ToggleWindow,
        ShortcutAction::ToggleAlwaysOnTop,
        ShortcutAction::ToggleTheme,
        ShortcutAction::HideWindow,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ShortcutAction::ToggleWindow => "Toggle Window",
            ShortcutAction::ToggleAlwaysOnTop => "Toggle Always On Top",
            ShortcutAction::ToggleTheme => "Toggle Theme",
            ShortcutAction::HideWindow => "Hide Window",
        }
    }
}

fn parse_modifier(lowered: &str) -> Option<Modifier> {
    match lowered {
        "control" | "ctrl" => Some(Modifier::Ctrl),
        "option" | "alt" => Some(Modifier::Alt),
        "shift" => Some(Modifier::Shift),
        "cmd" | "command" | "meta" | "super" | "win" => Some(Modifier::Meta),
        _ => None,
    }
}

fn named_key(lowered: &str) -> Option<&'static str> {
    let name = match lowered {
        "esc" | "escape" => "Escape",
        "enter" | "return" => "Enter",
        "tab" => "Tab",
        "space" | "spacebar" => "Space",
        "backspace" => "Backspace",
        "delete" => "Delete",
        "insert" => "Insert",
        "home" => "Home",
        "end" => "End",
        "pageup" => "PageUp",
        "pagedown" => "PageDown",
        "arrowup" => "ArrowUp",
        "arrowdown" => "ArrowDown",
        "arrowleft" => "ArrowLeft",
        "arrowright" => "ArrowRight",
        _ => return None,
    };
    Some(name)
}

fn function_key(lowered: &str) -> Option<String> {
    let n: u8 = lowered.strip_prefix('f')?.parse().ok()?;
    (1..=24).contains(&n).then(|| format!("F{n}"))
}

fn parse_token(raw: &str) -> Option<Token> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_lowercase();
    if let Some(m) = parse_modifier(&lowered) {
        return Some(Token::Modifier(m));
    }
    if let Some(name) = named_key(&lowered) {
        return Some(Token::Key(name.to_string()));
    }
    if trimmed.chars().count() == 1 {
        return Some(Token::Key(trimmed.to_uppercase()));
    }
    if let Some(f) = function_key(&lowered) {
        return Some(Token::Key(f));
    }
    Some(Token::Key(trimmed.to_string()))
}

/// Normalizes `shortcut`, returning `None` if it has no key or more than one.
pub fn normalize(shortcut: &str) -> Option<String> {
    let mut modifiers: Vec<Modifier> = Vec::new();
    let mut key: Option<String> = None;

    for raw in shortcut.split('+').filter(|t| !t.trim().is_empty()) {
        match parse_token(raw)? {
            Token::Modifier(m) => {
                if !modifiers.contains(&m) {
                    modifiers.push(m);
                }
            }
            Token::Key(k) => {
                if key.is_some() {
                    return None;
                }
                key = Some(k);
            }
        }
    }

    let key = key?;
    modifiers.sort();
    let mut parts: Vec<&str> = modifiers.iter().map(|m| m.as_str()).collect();
    parts.push(&key);
    Some(parts.join("+"))
}

/// Builds the normalized shortcut for a key-down event. A lone modifier press
/// is not a shortcut.
pub fn from_key_event(event: &KeyEvent) -> Option<String> {
    let key = match parse_token(&event.key)? {
        Token::Modifier(_) => return None,
        Token::Key(k) => k,
    };

    let flags = [
        (event.ctrl, Modifier::Ctrl),
        (event.alt, Modifier::Alt),
        (event.shift, Modifier::Shift),
        (event.meta, Modifier::Meta),
    ];
    let mut parts: Vec<&str> = flags
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, m)| m.as_str())
        .collect();
    parts.push(&key);
    normalize(&parts.join("+"))
}

pub fn matches(shortcut: &str, event: &KeyEvent) -> bool {
    match (normalize(shortcut), from_key_event(event)) {
        (Some(expected), Some(incoming)) => expected == incoming,
        _ => false,
    }
}

/// Resolves an in-window key press to the action it triggers.
///
/// `ToggleWindow` is bound globally and never dispatched from here.
pub fn action_for_event(shortcuts: &Shortcuts, event: &KeyEvent) -> Option<ShortcutAction> {
    [
        ShortcutAction::HideWindow,
        ShortcutAction::ToggleAlwaysOnTop,
        ShortcutAction::ToggleTheme,
    ]
    .into_iter()
    .find(|action| matches(shortcuts.get(*action), event))
}
