use chrono::DateTime;
use filetime::{set_file_mtime, FileTime};
use std::path::Path;

/// Stamp a saved file with the server's `Last-Modified` time.
///
/// Returns `Ok(false)` when the header is missing or not an RFC 2822 date.
pub fn apply_last_modified(path: &Path, last_modified: Option<&str>) -> std::io::Result<bool> {
    let Some(parsed) = last_modified.and_then(|s| DateTime::parse_from_rfc2822(s).ok()) else {
        return Ok(false);
    };
    set_file_mtime(path, FileTime::from_unix_time(parsed.timestamp(), 0))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_last_modified_sets_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.webm");
        std::fs::write(&path, b"x").unwrap();

        let applied = apply_last_modified(&path, Some("Wed, 21 Oct 2015 07:28:00 GMT")).unwrap();
        assert!(applied);

        let meta = std::fs::metadata(&path).unwrap();
        let mtime = FileTime::from_last_modification_time(&meta);
        assert_eq!(mtime.unix_seconds(), 1445412480);
    }

    #[test]
    fn test_apply_last_modified_ignores_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.webm");
        std::fs::write(&path, b"x").unwrap();

        assert!(!apply_last_modified(&path, Some("yesterday")).unwrap());
        assert!(!apply_last_modified(&path, None).unwrap());
    }
}
