use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Compact record of a file's metadata at the moment it was read.
///
/// Used to answer "did this file change under me?" without re-reading or
/// hashing its content: a file is considered modified when its modification
/// time or size differs from the recorded values. A missing file is
/// represented by an absent modification time.
///
/// `last_read` records when the content was last known current. It does not
/// participate in modification checks or equality; `set_clean` advances it
/// after a re-read found identical content, which is legal on shared
/// snapshots because the field is atomic.
#[derive(Debug)]
pub struct FileSnapshot {
    last_modified: Option<SystemTime>,
    size: u64,
    last_read: AtomicI64,
}

impl FileSnapshot {
    /// Snapshot for a file that does not exist.
    pub fn missing() -> Self {
        Self {
            last_modified: None,
            size: 0,
            last_read: AtomicI64::new(now_nanos()),
        }
    }

    /// Capture the current metadata of `path`.
    ///
    /// A file that cannot be stat'ed is recorded as missing.
    pub fn save(path: &Path) -> Self {
        match fs::metadata(path) {
            Ok(meta) => Self {
                last_modified: meta.modified().ok(),
                size: meta.len(),
                last_read: AtomicI64::new(now_nanos()),
            },
            Err(_) => Self::missing(),
        }
    }

    /// Does this snapshot describe a file that did not exist?
    pub fn is_missing(&self) -> bool {
        self.last_modified.is_none()
    }

    /// The recorded size in bytes (0 for a missing file).
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Re-stat `path` and report whether it differs from this snapshot.
    pub fn is_modified(&self, path: &Path) -> bool {
        match fs::metadata(path) {
            Ok(meta) => {
                self.last_modified != meta.modified().ok() || self.size != meta.len()
            }
            Err(_) => !self.is_missing(),
        }
    }

    /// Adopt the fresher read time of `other` after a re-read of the file
    /// found content identical to what this snapshot describes.
    pub fn set_clean(&self, other: &FileSnapshot) {
        self.last_read
            .store(other.last_read.load(Ordering::Relaxed), Ordering::Relaxed);
    }
}

impl Clone for FileSnapshot {
    fn clone(&self) -> Self {
        Self {
            last_modified: self.last_modified,
            size: self.size,
            last_read: AtomicI64::new(self.last_read.load(Ordering::Relaxed)),
        }
    }
}

impl PartialEq for FileSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.last_modified == other.last_modified && self.size == other.size
    }
}

impl Eq for FileSnapshot {}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");

        let snap = FileSnapshot::save(&path);
        assert!(snap.is_missing());
        assert!(!snap.is_modified(&path));
    }

    #[test]
    fn missing_then_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");

        let snap = FileSnapshot::save(&path);
        fs::write(&path, b"content").unwrap();
        assert!(snap.is_modified(&path));
    }

    #[test]
    fn unchanged_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        fs::write(&path, b"content").unwrap();

        let snap = FileSnapshot::save(&path);
        assert!(!snap.is_missing());
        assert!(!snap.is_modified(&path));
    }

    #[test]
    fn size_change_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        fs::write(&path, b"content").unwrap();

        let snap = FileSnapshot::save(&path);
        let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b" and more").unwrap();
        drop(f);
        assert!(snap.is_modified(&path));
    }

    #[test]
    fn deleted_file_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        fs::write(&path, b"content").unwrap();

        let snap = FileSnapshot::save(&path);
        fs::remove_file(&path).unwrap();
        assert!(snap.is_modified(&path));
    }

    #[test]
    fn equality_ignores_read_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        fs::write(&path, b"content").unwrap();

        let a = FileSnapshot::save(&path);
        let b = FileSnapshot::save(&path);
        assert_eq!(a, b);
        a.set_clean(&b);
        assert_eq!(a, b);
    }
}
