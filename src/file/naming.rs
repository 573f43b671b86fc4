use percent_encoding::percent_decode_str;
use std::path::Path;

const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL",
    "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8", "COM9",
    "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Replace characters no filesystem accepts and neutralize reserved device names.
///
/// Returns an empty string when nothing usable is left, so callers can reject it.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .trim()
        .chars()
        .map(|c| if INVALID_CHARS.contains(&c) || c.is_control() { '_' } else { c })
        .collect();

    let trimmed = replaced.trim_end_matches([' ', '.']);
    if trimmed.chars().all(|c| c == '_' || c == '.') {
        return String::new();
    }

    let upper = trimmed.to_uppercase();
    let stem = upper.split('.').next().unwrap_or("");
    if RESERVED_NAMES.contains(&stem) {
        format!("_{}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Last non-empty path segment of a url, percent-decoded.
pub fn filename_from_url(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let segment = parsed.path_segments()?.rev().find(|s| !s.is_empty())?;
    let decoded = percent_decode_str(segment).decode_utf8().ok()?;
    let name = sanitize_filename(&decoded);
    (!name.is_empty()).then_some(name)
}

/// Collision candidate `n` for `filename`, numbered the way browsers do:
/// `clip.webm`, `clip (1).webm`, `clip (2).webm`, ...
pub fn numbered_name(filename: &str, n: u32) -> String {
    if n == 0 {
        return filename.to_string();
    }

    let path = Path::new(filename);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(filename);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{} ({}).{}", stem, n, ext),
        None => format!("{} ({})", stem, n),
    }
}
