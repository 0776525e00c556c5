/// Global (system-wide) hotkey for showing and hiding the note window.
///
/// [`HotkeyBinder`] owns the swap from one shortcut to the next on top of any
/// [`HotkeyRegistrar`]. [`GlobalHotkeys`] is the registrar the host uses: on
/// Windows a low-level keyboard hook (`WH_KEYBOARD_LL`) running on a dedicated
/// OS thread with its own message pump; elsewhere it keeps the binding but
/// never fires.
use anyhow::{anyhow, Result};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;

use crate::event::AppEvent;
use crate::shortcuts::{self, ShortcutError};

/// Registers and releases a normalized shortcut with the OS.
pub trait HotkeyRegistrar: Send + Sync {
    fn register<'a>(&'a self, shortcut: &'a str) -> BoxFuture<'a, Result<()>>;
    fn unregister<'a>(&'a self, shortcut: &'a str) -> BoxFuture<'a, Result<()>>;
}

// ── Binder ────────────────────────────────────────────────────────────────────

/// Keeps exactly one toggle-window shortcut registered.
///
/// A swap registers the new shortcut before releasing the old one, so there is
/// never a moment without a working hotkey. A swap overtaken by a newer one
/// while it is still registering releases its own registration and never
/// becomes active.
pub struct HotkeyBinder {
    registrar: Arc<dyn HotkeyRegistrar>,
    generation: AtomicU64,
    active: Mutex<Option<String>>,
}

impl HotkeyBinder {
    pub fn new(registrar: Arc<dyn HotkeyRegistrar>) -> Self {
        Self { registrar, generation: AtomicU64::new(0), active: Mutex::new(None) }
    }

    /// The shortcut currently registered, if any.
    pub fn active(&self) -> Option<String> {
        self.active.lock().clone()
    }

    /// Makes `shortcut` the registered hotkey.
    ///
    /// Returns `Ok(true)` once it is active, `Ok(false)` if a newer call took
    /// over while this one was registering. On error the previous shortcut
    /// stays active.
    pub async fn bind(&self, shortcut: &str) -> Result<bool, ShortcutError> {
        let next = shortcuts::normalize(shortcut).ok_or(ShortcutError::Invalid)?;

        let (generation, previous) = {
            let active = self.active.lock();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            (generation, active.clone())
        };
        if previous.as_deref() == Some(next.as_str()) {
            return Ok(true);
        }

        if let Err(e) = self.registrar.register(&next).await {
            tracing::error!(shortcut = %next, error = %format!("{e:#}"), "hotkey_register_failed");
            return Err(ShortcutError::Registration(format!("{e:#}")));
        }

        let superseded = {
            let mut active = self.active.lock();
            if self.generation.load(Ordering::SeqCst) != generation {
                true
            } else {
                *active = Some(next.clone());
                false
            }
        };

        if superseded {
            tracing::debug!(shortcut = %next, "hotkey_swap_superseded");
            self.release(&next).await;
            return Ok(false);
        }

        if let Some(previous) = previous {
            self.release(&previous).await;
        }
        tracing::info!(shortcut = %next, "hotkey_bound");
        Ok(true)
    }

    async fn release(&self, shortcut: &str) {
        if let Err(e) = self.registrar.unregister(shortcut).await {
            tracing::warn!(shortcut = %shortcut, error = %format!("{e:#}"), "hotkey_unregister_failed");
        }
    }
}

// ── Chord encoding ────────────────────────────────────────────────────────────

const MOD_CTRL: u64 = 1;
const MOD_ALT: u64 = 2;
const MOD_SHIFT: u64 = 4;
const MOD_META: u64 = 8;

/// Channel used to forward [`AppEvent::ToggleWindow`] from the hook callback
/// to the host event loop. Set once by [`GlobalHotkeys::start`].
static HOOK_TX: OnceLock<mpsc::Sender<AppEvent>> = OnceLock::new();

/// Chord table of the hooked [`GlobalHotkeys`], read inside the hook callback.
#[cfg(windows)]
static HOOK_CHORDS: OnceLock<Arc<ChordTable>> = OnceLock::new();

/// Converts a normalized key name (e.g. `"F8"`, `"N"`, `"Escape"`) to a
/// Windows virtual-key code.
pub fn parse_vk(name: &str) -> Option<u32> {
    let vk = match name {
        "Escape" => 0x1B,
        "Enter" => 0x0D,
        "Tab" => 0x09,
        "Space" => 0x20,
        "Backspace" => 0x08,
        "Delete" => 0x2E,
        "Insert" => 0x2D,
        "Home" => 0x24,
        "End" => 0x23,
        "PageUp" => 0x21,
        "PageDown" => 0x22,
        "ArrowLeft" => 0x25,
        "ArrowUp" => 0x26,
        "ArrowRight" => 0x27,
        "ArrowDown" => 0x28,
        s => {
            if let Some(n) = s.strip_prefix('F').and_then(|n| n.parse::<u32>().ok()) {
                // F1=0x70 … F24=0x87
                return (1..=24).contains(&n).then_some(0x6F + n);
            }
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphanumeric() => c.to_ascii_uppercase() as u32,
                _ => return None,
            }
        }
    };
    Some(vk)
}

/// Encodes a normalized shortcut into the chord the hook compares against.
pub fn parse_chord(shortcut: &str) -> Option<u64> {
    let mut parts: Vec<&str> = shortcut.split('+').collect();
    let key = parts.pop()?;
    let mut mods = 0;
    for part in parts {
        mods |= match part {
            "Ctrl" => MOD_CTRL,
            "Alt" => MOD_ALT,
            "Shift" => MOD_SHIFT,
            "Meta" => MOD_META,
            _ => return None,
        };
    }
    Some((u64::from(parse_vk(key)?) << 8) | mods)
}

/// Registered chords, `vk << 8 | modifier bits`.
///
/// Every registration is its own entry, so a chord registered twice while a
/// swap is in flight stays live until both registrations are released.
#[derive(Default)]
struct ChordTable {
    chords: RwLock<Vec<u64>>,
}

impl ChordTable {
    fn register(&self, shortcut: &str) -> Result<()> {
        let chord = parse_chord(shortcut).ok_or_else(|| anyhow!("unsupported global shortcut: {shortcut}"))?;
        self.chords.write().push(chord);
        Ok(())
    }

    fn unregister(&self, shortcut: &str) {
        let Some(chord) = parse_chord(shortcut) else {
            return;
        };
        let mut chords = self.chords.write();
        if let Some(i) = chords.iter().position(|c| *c == chord) {
            chords.swap_remove(i);
        }
    }

    #[cfg_attr(not(windows), allow(dead_code))]
    fn contains(&self, chord: u64) -> bool {
        self.chords.read().contains(&chord)
    }

    fn clear(&self) {
        self.chords.write().clear();
    }
}

// ── Registrar ─────────────────────────────────────────────────────────────────

/// A handle to the running keyboard hook.
pub struct GlobalHotkeys {
    chords: Arc<ChordTable>,
    #[cfg(windows)]
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    /// Thread ID of the message-pump thread, used to post `WM_QUIT`.
    #[cfg(windows)]
    thread_id: u32,
}

impl GlobalHotkeys {
    /// Installs the keyboard hook. Presses of the bound chord are forwarded to
    /// `tx` with a non-blocking `try_send`; a full channel drops the press.
    pub fn start(tx: mpsc::Sender<AppEvent>) -> Result<Self> {
        // Ignore a second call (e.g. in test binaries).
        let _ = HOOK_TX.set(tx);
        let chords = Arc::new(ChordTable::default());

        #[cfg(windows)]
        {
            use anyhow::Context;

            if HOOK_CHORDS.set(Arc::clone(&chords)).is_err() {
                return Err(anyhow!("global hotkeys are already running"));
            }

            let (id_tx, id_rx) = std::sync::mpsc::sync_channel::<Result<u32, String>>(1);
            let thread = std::thread::Builder::new()
                .name("hotkey-pump".into())
                .spawn(move || imp::run_message_pump(id_tx))
                .context("Failed to spawn hotkey thread")?;
            let thread_id = id_rx
                .recv()
                .context("hotkey thread exited before reporting")?
                .map_err(|e| anyhow!(e))?;
            Ok(Self { chords, thread: Mutex::new(Some(thread)), thread_id })
        }

        #[cfg(not(windows))]
        {
            tracing::info!("global_hotkeys_unsupported");
            Ok(Self { chords })
        }
    }

    /// A registrar without a hook: bindings are tracked but never fire.
    pub fn detached() -> Self {
        let chords = Arc::new(ChordTable::default());
        #[cfg(windows)]
        {
            Self { chords, thread: Mutex::new(None), thread_id: 0 }
        }
        #[cfg(not(windows))]
        {
            Self { chords }
        }
    }

    /// Signals the hook thread to stop and blocks until it exits.
    pub fn stop(&self) {
        self.chords.clear();
        #[cfg(windows)]
        if let Some(thread) = self.thread.lock().take() {
            imp::post_quit(self.thread_id);
            let _ = thread.join();
        }
    }
}

impl HotkeyRegistrar for GlobalHotkeys {
    fn register<'a>(&'a self, shortcut: &'a str) -> BoxFuture<'a, Result<()>> {
        futures::future::ready(self.chords.register(shortcut)).boxed()
    }

    fn unregister<'a>(&'a self, shortcut: &'a str) -> BoxFuture<'a, Result<()>> {
        self.chords.unregister(shortcut);
        futures::future::ready(Ok(())).boxed()
    }
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::sync::mpsc as std_mpsc;

    use windows::Win32::Foundation::{HINSTANCE, LPARAM, LRESULT, WPARAM};
    use windows::Win32::System::Threading::GetCurrentThreadId;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        GetAsyncKeyState, VK_CONTROL, VK_LWIN, VK_MENU, VK_RWIN, VK_SHIFT,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        CallNextHookEx, DispatchMessageW, GetMessageW, PostThreadMessageW, SetWindowsHookExW,
        UnhookWindowsHookEx, KBDLLHOOKSTRUCT, MSG, WH_KEYBOARD_LL, WM_KEYDOWN, WM_QUIT,
        WM_SYSKEYDOWN,
    };

    use super::{HOOK_CHORDS, HOOK_TX, MOD_ALT, MOD_CTRL, MOD_META, MOD_SHIFT};
    use crate::event::AppEvent;

    unsafe fn is_down(vk: u16) -> bool {
        GetAsyncKeyState(i32::from(vk)) < 0
    }

    unsafe fn current_modifiers() -> u64 {
        let mut mods = 0;
        if is_down(VK_CONTROL.0) {
            mods |= MOD_CTRL;
        }
        if is_down(VK_MENU.0) {
            mods |= MOD_ALT;
        }
        if is_down(VK_SHIFT.0) {
            mods |= MOD_SHIFT;
        }
        if is_down(VK_LWIN.0) || is_down(VK_RWIN.0) {
            mods |= MOD_META;
        }
        mods
    }

    /// Low-level keyboard hook procedure. Alt chords arrive as
    /// `WM_SYSKEYDOWN`, everything else as `WM_KEYDOWN`.
    unsafe extern "system" fn keyboard_proc(n_code: i32, w_param: WPARAM, l_param: LPARAM) -> LRESULT {
        let msg = w_param.0 as u32;
        if n_code >= 0 && (msg == WM_KEYDOWN || msg == WM_SYSKEYDOWN) {
            let kb = &*(l_param.0 as *const KBDLLHOOKSTRUCT);
            if let Some(chords) = HOOK_CHORDS.get() {
                let chord = (u64::from(kb.vkCode) << 8) | current_modifiers();
                if chords.contains(chord) {
                    if let Some(tx) = HOOK_TX.get() {
                        let _ = tx.try_send(AppEvent::ToggleWindow);
                    }
                }
            }
        }
        CallNextHookEx(None, n_code, w_param, l_param)
    }

    /// Installs `WH_KEYBOARD_LL`, reports the thread ID (or the install error)
    /// on `id_tx`, then runs a message pump until `WM_QUIT`.
    pub fn run_message_pump(id_tx: std_mpsc::SyncSender<Result<u32, String>>) {
        unsafe {
            let hook = match SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_proc), HINSTANCE::default(), 0) {
                Ok(hook) => hook,
                Err(e) => {
                    let _ = id_tx.send(Err(format!("SetWindowsHookExW failed: {e}")));
                    return;
                }
            };
            let _ = id_tx.send(Ok(GetCurrentThreadId()));
            drop(id_tx);

            let mut msg = MSG::default();
            // GetMessageW: >0 = message, 0 = WM_QUIT, <0 = error.
            while GetMessageW(&mut msg, None, 0, 0).0 > 0 {
                DispatchMessageW(&msg);
            }

            let _ = UnhookWindowsHookEx(hook);
            tracing::debug!("hotkey_hook_exited");
        }
    }

    pub fn post_quit(thread_id: u32) {
        unsafe {
            let _ = PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
