use once_cell::sync::Lazy;
use regex_lite::Regex;

static NON_ALPHANUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9]").unwrap());
static NON_PATH_SAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]").unwrap());

/// Name for the entry at zero-based `index`: `photo_<index+1>_<title>.<ext>`,
/// with the title reduced to `[A-Za-z0-9_]` and cut to `max_len` characters.
pub fn entry_name(index: usize, title: &str, max_len: usize, extension: &str) -> String {
    let sanitized = NON_ALPHANUMERIC.replace_all(title, "_");
    let truncated: String = sanitized.chars().take(max_len).collect();
    format!("photo_{}_{}.{}", index + 1, truncated, extension)
}

/// Filename stem derived from a tag query (`"sunset,beach"` -> `"sunset_beach"`).
pub fn archive_stem(tags: &str) -> String {
    let stem = NON_PATH_SAFE.replace_all(tags.trim(), "_");
    if stem.is_empty() {
        "archive".to_string()
    } else {
        stem.into_owned()
    }
}
