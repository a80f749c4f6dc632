use std::fs;

use crate::error::RefError;
use crate::name::RefName;
use crate::reflog::Ident;

use super::loose;
use super::update::{RefUpdate, UpdateResult};
use super::RefDirectory;

/// A rename built from two update handles: a deletion of the source and a
/// creation of the destination carrying the source's leaf id.
///
/// The source reflog follows the ref to its new name, and `HEAD` is
/// re-linked when it pointed at the source. A destination write failure
/// restores the source.
pub struct RefRename<'a> {
    db: &'a RefDirectory,
    source: RefUpdate<'a>,
    destination: RefUpdate<'a>,
    ident: Option<Ident>,
}

impl<'a> RefRename<'a> {
    pub(crate) fn new(
        db: &'a RefDirectory,
        source: RefUpdate<'a>,
        destination: RefUpdate<'a>,
    ) -> Self {
        Self {
            db,
            source,
            destination,
            ident: None,
        }
    }

    /// Identity recorded in the destination's reflog entry.
    pub fn set_reflog_ident(&mut self, ident: Ident) {
        self.ident = Some(ident);
    }

    pub fn rename(&mut self) -> Result<UpdateResult, RefError> {
        let from = self.source.name().clone();
        let to = self.destination.name().clone();

        let src = match self.db.get_ref(from.as_str())? {
            Some(r) => r,
            None => return Ok(UpdateResult::Rejected),
        };
        if src.is_symbolic() {
            return Ok(UpdateResult::Rejected);
        }
        let Some(id) = src.object_id() else {
            return Ok(UpdateResult::Rejected);
        };

        let head_points_at_source = {
            let head = RefName::new_unchecked("HEAD");
            loose::scan_ref(self.db.git_dir(), None, &head)?
                .and_then(|h| {
                    h.as_ref()
                        .symbolic_target()
                        .map(|t| *t.name() == from)
                })
                .unwrap_or(false)
        };

        // The log must survive the deletion below.
        let old_log = fs::read(self.db.log_writer().log_for(from.as_str())).ok();

        self.source.set_expected_old_object_id(Some(id));
        match self.source.delete()? {
            UpdateResult::Deleted => {}
            other => return Ok(other),
        }

        self.destination.set_new_object_id(id);
        self.destination.set_force(true);
        if let Some(ident) = &self.ident {
            self.destination
                .set_reflog(ident.clone(), format!("Branch: renamed {from} to {to}"));
        }
        let result = self.destination.update()?;
        if !matches!(
            result,
            UpdateResult::New | UpdateResult::Forced | UpdateResult::NoChange
        ) {
            // Put the source back rather than losing the ref.
            let mut restore = self.db.new_update(from.as_str(), false)?;
            restore.set_new_object_id(id);
            restore.set_force(true);
            restore.update()?;
            return Ok(result);
        }

        if let Some(old) = old_log {
            let to_path = self.db.log_writer().log_for(to.as_str());
            let newer = fs::read(&to_path).unwrap_or_default();
            if let Some(parent) = to_path.parent() {
                fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            let mut merged = old;
            merged.extend_from_slice(&newer);
            fs::write(&to_path, merged).map_err(|e| RefError::IoPath {
                path: to_path.clone(),
                source: e,
            })?;
        }

        if head_points_at_source {
            let mut head = self.db.new_update("HEAD", false)?;
            head.link(to.as_str())?;
        }

        Ok(UpdateResult::Renamed)
    }
}
