use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use crate::error::LockError;
use crate::fsnapshot::FileSnapshot;

/// RAII lock file guard. Creates a `.lock` file on construction,
/// atomically renames on commit, removes on drop if not committed.
///
/// This matches C git's lock file protocol:
/// - Create `<path>.lock` with O_CREAT|O_EXCL
/// - Write new contents to the lock file
/// - Atomically rename `.lock` to target on commit
/// - Remove `.lock` on drop if not committed (rollback)
///
/// A failed commit or an abandoned lock leaves the target untouched.
pub struct LockFile {
    /// The target file path (without .lock suffix).
    path: PathBuf,
    /// The lock file path (with .lock suffix).
    lock_path: PathBuf,
    /// The open file handle for writing.
    file: Option<File>,
    /// Whether commit() or rollback() has run.
    committed: bool,
    fsync: bool,
    need_snapshot: bool,
}

const LOCK_SUFFIX: &str = ".lock";

/// Sleep interval while waiting for the lock file's mtime to diverge.
const WAIT_STEP: Duration = Duration::from_millis(25);

impl LockFile {
    /// Acquire a lock on the given path. Creates `path.lock` using O_CREAT|O_EXCL.
    ///
    /// Returns an error if the lock file already exists (another process holds
    /// the lock) or if the file cannot be created.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        let lock_path = PathBuf::from(format!("{}{}", path.display(), LOCK_SUFFIX));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true) // O_CREAT|O_EXCL equivalent
            .open(&lock_path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    LockError::AlreadyLocked {
                        path: lock_path.clone(),
                    }
                } else {
                    LockError::Create {
                        path: lock_path.clone(),
                        source: e,
                    }
                }
            })?;

        Ok(Self {
            path,
            lock_path,
            file: Some(file),
            committed: false,
            fsync: false,
            need_snapshot: false,
        })
    }

    /// Try to acquire without blocking. Returns Ok(None) if already locked,
    /// Ok(Some(lockfile)) on success, or Err on other failures.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>, LockError> {
        match Self::acquire(path) {
            Ok(lk) => Ok(Some(lk)),
            Err(LockError::AlreadyLocked { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Get the path of the target file (without .lock).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the path of the lock file (with .lock).
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Force a durable flush of the lock file contents before commit.
    pub fn set_fsync(&mut self, on: bool) {
        self.fsync = on;
    }

    /// Capture a `FileSnapshot` of the lock file during commit and return it
    /// from `commit()`. The snapshot describes the committed target, since
    /// rename preserves metadata.
    pub fn set_need_snapshot(&mut self, on: bool) {
        self.need_snapshot = on;
    }

    /// Wait until the lock file's metadata differs from the target's.
    ///
    /// On filesystems with coarse timestamps a rename could otherwise install
    /// a file whose mtime equals the old target's, hiding the change from
    /// snapshot-based observers. Touches the lock file each step so the wait
    /// always terminates.
    pub fn wait_for_stat_change(&self) -> Result<(), LockError> {
        let old = FileSnapshot::save(&self.path);
        let mut cur = FileSnapshot::save(&self.lock_path);
        while old == cur {
            thread::sleep(WAIT_STEP);
            if let Some(file) = &self.file {
                file.set_modified(SystemTime::now())
                    .map_err(|e| LockError::Wait {
                        path: self.lock_path.clone(),
                        source: e,
                    })?;
            }
            cur = FileSnapshot::save(&self.lock_path);
        }
        Ok(())
    }

    /// Commit: close the file and atomically rename .lock onto the target.
    ///
    /// Returns the commit snapshot when `set_need_snapshot(true)` was called.
    pub fn commit(mut self) -> Result<Option<FileSnapshot>, LockError> {
        if let Some(ref mut file) = self.file {
            file.flush().map_err(|e| LockError::Commit {
                path: self.lock_path.clone(),
                source: e,
            })?;
            if self.fsync {
                file.sync_all().map_err(|e| LockError::Commit {
                    path: self.lock_path.clone(),
                    source: e,
                })?;
            }
        }
        // Drop the file handle before rename
        self.file.take();

        let snapshot = self
            .need_snapshot
            .then(|| FileSnapshot::save(&self.lock_path));

        fs::rename(&self.lock_path, &self.path).map_err(|e| LockError::Commit {
            path: self.lock_path.clone(),
            source: e,
        })?;

        self.committed = true;
        Ok(snapshot)
    }

    /// Rollback: remove the .lock file (also happens on Drop).
    pub fn rollback(mut self) -> io::Result<()> {
        self.file.take();
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path)?;
        }
        self.committed = true; // Prevent Drop from trying to clean up again
        Ok(())
    }
}

impl Write for LockFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("lock file already closed"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("lock file already closed"))?
            .flush()
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}
