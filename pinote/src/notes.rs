/// Note identity: maps a user-supplied note id to its canonical id, storage
/// filename and window label.
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_NOTE_ID: &str = "default";
pub const MAIN_WINDOW_LABEL: &str = "main";
pub const NOTE_WINDOW_PREFIX: &str = "note-";

/// Last id handed out by [`generate_id`], in milliseconds since the epoch.
static LAST_GENERATED: AtomicU64 = AtomicU64::new(0);

/// Keeps only `[a-zA-Z0-9_-]`; an id with nothing left becomes `"default"`.
pub fn normalize_id(raw: &str) -> String {
    let safe: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe.is_empty() {
        DEFAULT_NOTE_ID.to_string()
    } else {
        safe
    }
}

/// Storage filename relative to the app data directory: `notes/<id>.md`.
pub fn filename_for(id: &str) -> String {
    format!("{}/{}.md", crate::paths::NOTES_DIR_NAME, normalize_id(id))
}

pub fn note_path(data_dir: &Path, id: &str) -> PathBuf {
    crate::paths::notes_dir(data_dir).join(format!("{}.md", normalize_id(id)))
}

pub fn window_label_for(id: &str) -> String {
    let id = normalize_id(id);
    if id == DEFAULT_NOTE_ID {
        MAIN_WINDOW_LABEL.to_string()
    } else {
        format!("{NOTE_WINDOW_PREFIX}{id}")
    }
}

/// The normalized id only contains URL-safe characters, so no escaping is needed.
pub fn window_url_for(id: &str) -> String {
    format!("index.html?view=note&note={}", normalize_id(id))
}

/// Returns a fresh note id: the current time in milliseconds, base 36.
/// Two calls in the same millisecond still get distinct ids.
pub fn generate_id() -> String {
    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let mut last = LAST_GENERATED.load(Ordering::Relaxed);
    let value = loop {
        let candidate = now.max(last + 1);
        match LAST_GENERATED.compare_exchange_weak(last, candidate, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break candidate,
            Err(actual) => last = actual,
        }
    };
    to_base36(value)
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn normalize_id_strips_special_characters() {
        assert_eq!(normalize_id("My Note!"), "MyNote");
        assert_eq!(normalize_id("  work_log-2024 "), "work_log-2024");
        assert_eq!(normalize_id("../../etc/passwd"), "etcpasswd");
    }

    #[test]
    fn normalize_id_falls_back_to_default() {
        assert_eq!(normalize_id(""), DEFAULT_NOTE_ID);
        assert_eq!(normalize_id("   "), DEFAULT_NOTE_ID);
        assert_eq!(normalize_id("!!!"), DEFAULT_NOTE_ID);
    }

    #[test]
    fn filename_for_examples() {
        assert_eq!(filename_for("My Note!"), "notes/MyNote.md");
        assert_eq!(filename_for(""), "notes/default.md");
    }

    #[test]
    fn note_path_is_under_notes_dir() {
        let path = note_path(Path::new("/data"), "abc");
        assert_eq!(path, Path::new("/data").join("notes").join("abc.md"));
    }

    #[test]
    fn window_label_for_examples() {
        assert_eq!(window_label_for("default"), "main");
        assert_eq!(window_label_for(""), "main");
        assert_eq!(window_label_for("abc"), "note-abc");
    }

    #[test]
    fn window_url_for_includes_view_and_note() {
        assert_eq!(window_url_for("My Note"), "index.html?view=note&note=MyNote");
    }

    #[test]
    fn generate_id_is_unique_and_already_normalized() {
        let ids: Vec<String> = (0..200).map(|_| generate_id()).collect();
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
        for id in &ids {
            assert_eq!(&normalize_id(id), id);
        }
    }

    #[test]
    fn to_base36_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
