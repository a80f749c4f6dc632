use std::fs;
use std::io::Write;

use refdb_hash::ObjectId;
use refdb_utils::{FileSnapshot, LockFile};

use crate::error::RefError;
use crate::name::RefName;
use crate::reference::{Ref, Storage};
use crate::reflog::Ident;

use super::RefDirectory;

/// Outcome of committing a ref update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    /// The ref did not exist and was created.
    New,
    /// The ref already had the new value.
    NoChange,
    /// An existing value was overwritten.
    Forced,
    /// The ref was removed.
    Deleted,
    /// The ref was moved to a new name.
    Renamed,
    /// The expected old value did not match, or a non-forced overwrite was
    /// refused.
    Rejected,
    /// The required `.lock` could not be acquired, or the name collides
    /// with an existing ref.
    LockFailure,
}

/// A single-ref write handle obtained from
/// [`RefDirectory::new_update`](super::RefDirectory::new_update).
///
/// Captures the ref's state at construction; the current value is re-read
/// under the file lock when committing, so concurrent writers are detected
/// through the expected-old check rather than the stale snapshot.
pub struct RefUpdate<'a> {
    db: &'a RefDirectory,
    r: Ref,
    /// Replace the symbolic ref at this name by a direct ref, instead of
    /// writing through to its leaf.
    detaching: bool,
    new_id: Option<ObjectId>,
    expected_old_id: Option<Option<ObjectId>>,
    force: bool,
    reflog: Option<(Ident, String)>,
    old_id: Option<ObjectId>,
}

impl<'a> RefUpdate<'a> {
    pub(crate) fn new(db: &'a RefDirectory, r: Ref, detaching: bool) -> Self {
        Self {
            db,
            r,
            detaching,
            new_id: None,
            expected_old_id: None,
            force: false,
            reflog: None,
            old_id: None,
        }
    }

    /// The name this update was opened for.
    pub fn name(&self) -> &RefName {
        self.r.name()
    }

    /// The ref value captured when the update was constructed.
    pub fn reference(&self) -> &Ref {
        &self.r
    }

    /// The value found under the lock by the last `update`/`delete` call.
    pub fn old_object_id(&self) -> Option<ObjectId> {
        self.old_id
    }

    pub fn set_new_object_id(&mut self, id: ObjectId) {
        self.new_id = Some(id);
    }

    /// Require the ref to hold `id` (or, with `None`, to not exist) at
    /// commit time.
    pub fn set_expected_old_object_id(&mut self, id: Option<ObjectId>) {
        self.expected_old_id = Some(id);
    }

    pub fn set_force(&mut self, on: bool) {
        self.force = on;
    }

    /// Arrange for a reflog entry to be appended when the update commits.
    pub fn set_reflog(&mut self, ident: Ident, message: impl Into<String>) {
        self.reflog = Some((ident, message.into()));
    }

    /// Write the new object id to the leaf's loose file.
    pub fn update(&mut self) -> Result<UpdateResult, RefError> {
        let new_id = self
            .new_id
            .ok_or_else(|| RefError::NoNewValue(self.r.name().to_string()))?;
        let name = self.r.leaf().name().clone();

        if self.r.storage() == Storage::New && self.db.is_name_conflicting(name.as_str())? {
            return Ok(UpdateResult::LockFailure);
        }

        let path = self.db.file_for(name.as_str());
        let Some(mut lock) = lock_loose_file(&path)? else {
            return Ok(UpdateResult::LockFailure);
        };

        // Re-read the current value under the lock.
        let packed = self.db.get_packed_refs()?;
        let cur = match self.db.read_ref(name.as_str(), &packed)? {
            Some(r) => self.db.resolve(r, 0, "", None, &packed)?,
            None => None,
        };
        self.old_id = cur.as_ref().and_then(|r| r.object_id());

        if let Some(expected) = self.expected_old_id {
            if expected != self.old_id {
                return Ok(UpdateResult::Rejected);
            }
        }

        let status = match self.old_id {
            None => UpdateResult::New,
            Some(old) if old == new_id && !self.detaching => return Ok(UpdateResult::NoChange),
            Some(old) if old == new_id => UpdateResult::Forced,
            Some(_) if self.force => UpdateResult::Forced,
            Some(_) => return Ok(UpdateResult::Rejected),
        };

        lock.set_need_snapshot(true);
        let mut content = new_id.to_hex();
        content.push('\n');
        lock.write_all(content.as_bytes())
            .map_err(|e| RefError::WriteFailed {
                path: path.clone(),
                source: e,
            })?;
        let snapshot = lock
            .commit()?
            .unwrap_or_else(|| FileSnapshot::save(&path));

        self.db.stored(name.clone(), new_id, snapshot);

        if let Some((ident, message)) = &self.reflog {
            self.db.log_writer().log(
                &name,
                self.old_id.unwrap_or(ObjectId::ZERO),
                new_id,
                ident,
                message,
            )?;
        }
        Ok(status)
    }

    /// Make this name a symbolic ref to `target`. Writes at the name
    /// itself, never through an existing chain.
    pub fn link(&mut self, target: &str) -> Result<UpdateResult, RefError> {
        let target = RefName::new(target)?;
        let name = self.r.name().clone();

        let path = self.db.file_for(name.as_str());
        let Some(mut lock) = lock_loose_file(&path)? else {
            return Ok(UpdateResult::LockFailure);
        };

        lock.set_need_snapshot(true);
        let content = format!("ref: {target}\n");
        lock.write_all(content.as_bytes())
            .map_err(|e| RefError::WriteFailed {
                path: path.clone(),
                source: e,
            })?;
        let snapshot = lock
            .commit()?
            .unwrap_or_else(|| FileSnapshot::save(&path));

        self.db.stored_symbolic(name, target, snapshot);

        Ok(if self.r.storage() == Storage::New {
            UpdateResult::New
        } else {
            UpdateResult::Forced
        })
    }

    /// Remove the leaf from every store it lives in.
    pub fn delete(&mut self) -> Result<UpdateResult, RefError> {
        let leaf = self.r.leaf().clone();
        let name = leaf.name().clone();

        let path = self.db.file_for(name.as_str());
        let Some(lock) = lock_loose_file(&path)? else {
            return Ok(UpdateResult::LockFailure);
        };

        let packed = self.db.get_packed_refs()?;
        let cur = match self.db.read_ref(name.as_str(), &packed)? {
            Some(r) => self.db.resolve(r, 0, "", None, &packed)?,
            None => None,
        };
        self.old_id = cur.as_ref().and_then(|r| r.object_id());

        if let Some(expected) = self.expected_old_id {
            if expected != self.old_id {
                return Ok(UpdateResult::Rejected);
            }
        }

        if self.r.storage() != Storage::New {
            self.db.delete_ref(&name, leaf.storage().is_loose(), Some(lock))?;
        } else {
            lock.rollback().map_err(RefError::Io)?;
        }
        Ok(UpdateResult::Deleted)
    }
}

/// Acquire the `.lock` beside a loose ref file, creating missing parent
/// directories first. `Ok(None)` on contention.
fn lock_loose_file(path: &std::path::Path) -> Result<Option<LockFile>, RefError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    Ok(LockFile::try_acquire(path)?)
}
