use super::naming::{numbered_name, sanitize_filename};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A fully received response body, held in memory until it is saved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

impl Blob {
    pub fn new(data: Vec<u8>, content_type: Option<String>) -> Self {
        Self { data, content_type }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("filename is empty")]
    EmptyFilename,

    #[error("filename {0:?} has no usable characters")]
    UnusableFilename(String),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Persists a completed download under a filename.
///
/// Validation happens before anything touches the filesystem.
pub trait SaveStrategy: Send + Sync {
    fn save(&self, blob: Blob, filename: &str) -> Result<PathBuf, SaveError>;
}

/// Writes blobs into a directory, never overwriting an existing file.
#[derive(Debug, Clone)]
pub struct FileSaveStrategy {
    directory: PathBuf,
}

impl FileSaveStrategy {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

/// Upper bound on `name (n).ext` candidates tried before giving up.
const MAX_NAME_CANDIDATES: u32 = 10_000;

fn write_err(path: &Path) -> impl FnOnce(std::io::Error) -> SaveError + use<> {
    let path = path.to_path_buf();
    move |source| SaveError::Write { path, source }
}

impl SaveStrategy for FileSaveStrategy {
    fn save(&self, blob: Blob, filename: &str) -> Result<PathBuf, SaveError> {
        if filename.trim().is_empty() {
            return Err(SaveError::EmptyFilename);
        }
        let name = sanitize_filename(filename);
        if name.is_empty() {
            return Err(SaveError::UnusableFilename(filename.to_string()));
        }

        std::fs::create_dir_all(&self.directory).map_err(write_err(&self.directory))?;

        // Each call writes its own temp file, then claims the final name
        // without clobbering. A name taken by a concurrent save moves on to
        // the next numbered candidate.
        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", name))
            .suffix(".part")
            .tempfile_in(&self.directory)
            .map_err(write_err(&self.directory))?;
        temp.write_all(&blob.data).map_err(write_err(temp.path()))?;

        for n in 0..MAX_NAME_CANDIDATES {
            let target = self.directory.join(numbered_name(&name, n));
            match temp.persist_noclobber(&target) {
                Ok(_) => {
                    tracing::debug!("Saved {} bytes to {}", blob.len(), target.display());
                    return Ok(target);
                }
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists => temp = e.file,
                Err(e) => return Err(SaveError::Write { path: target, source: e.error }),
            }
        }

        Err(SaveError::Write {
            path: self.directory.join(&name),
            source: std::io::Error::new(ErrorKind::AlreadyExists, "no free numbered name left"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn blob(bytes: &[u8]) -> Blob {
        Blob::new(bytes.to_vec(), Some("video/webm".to_string()))
    }

    #[test]
    fn test_save_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let strategy = FileSaveStrategy::new(dir.path());

        let path = strategy.save(blob(b"frames"), "clip.webm").unwrap();

        assert_eq!(path, dir.path().join("clip.webm"));
        assert_eq!(std::fs::read(&path).unwrap(), b"frames");
    }

    #[test]
    fn test_save_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("recordings").join("2024");
        let strategy = FileSaveStrategy::new(&nested);

        let path = strategy.save(blob(b"x"), "a.png").unwrap();
        assert!(path.starts_with(&nested));
    }

    #[test]
    fn test_save_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let strategy = FileSaveStrategy::new(dir.path());

        let first = strategy.save(blob(b"one"), "shot.png").unwrap();
        let second = strategy.save(blob(b"two"), "shot.png").unwrap();

        assert_ne!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&second).unwrap(), b"two");
    }

    #[test]
    fn test_save_empty_filename_fails_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("never-created");
        let strategy = FileSaveStrategy::new(&target);

        let result = strategy.save(blob(b"x"), "  ");

        assert!(matches!(result, Err(SaveError::EmptyFilename)));
        assert!(!target.exists());
    }

    #[test]
    fn test_save_unusable_filename_fails_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("never-created");
        let strategy = FileSaveStrategy::new(&target);

        let result = strategy.save(blob(b"x"), "///");

        assert!(matches!(result, Err(SaveError::UnusableFilename(_))));
        assert!(!target.exists());
    }

    #[test]
    fn test_save_sanitizes_name() {
        let dir = tempfile::tempdir().unwrap();
        let strategy = FileSaveStrategy::new(dir.path());

        let path = strategy.save(blob(b"x"), "a:b.mp3").unwrap();
        assert_eq!(path.file_name().unwrap(), "a_b.mp3");
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let strategy = FileSaveStrategy::new(dir.path());
        strategy.save(blob(b"x"), "a.webm").unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.webm".to_string()]);
    }

    #[test]
    fn test_concurrent_saves_claim_distinct_names() {
        use std::sync::{Arc, Barrier};

        const THREADS: usize = 3;
        const ROUNDS: usize = 10;

        for _ in 0..ROUNDS {
            let dir = tempfile::tempdir().unwrap();
            let strategy = Arc::new(FileSaveStrategy::new(dir.path()));
            let barrier = Arc::new(Barrier::new(THREADS));

            let handles: Vec<_> = (0..THREADS)
                .map(|i| {
                    let strategy = Arc::clone(&strategy);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        let data = vec![b'a' + i as u8; 200 * 1024];
                        barrier.wait();
                        let result = strategy.save(Blob::new(data.clone(), None), "clip.webm");
                        (result, data)
                    })
                })
                .collect();

            let mut saved = Vec::new();
            for handle in handles {
                let (result, data) = handle.join().unwrap();
                let path = result.unwrap();
                assert_eq!(std::fs::read(&path).unwrap(), data);
                saved.push(path);
            }

            saved.sort();
            saved.dedup();
            assert_eq!(saved.len(), THREADS);
            assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), THREADS);
        }
    }
}
