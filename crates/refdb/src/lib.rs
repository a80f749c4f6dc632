//! Filesystem-backed reference database for git repositories.
//!
//! Maps reference names (`refs/heads/main`, `HEAD`, …) to object ids,
//! persists them atomically, and serves concurrent readers and writers.
//! One logical namespace is unified from two storage formats: loose files
//! under `refs/` and the line-oriented `packed-refs` file, with the loose
//! value winning for shared names.
//!
//! Reads are lock-free. Each of the two caches (loose and packed) is an
//! atomic cell holding an immutable, name-sorted list; scans install
//! replacement lists by compare-and-swap and losers discard their result.
//! Writes serialize on sibling `.lock` files committed by atomic rename.

pub mod error;
pub mod files;
mod name;
mod reference;
pub mod reflist;
pub mod reflog;

pub use error::RefError;
pub use files::{RefDirectory, RefRename, RefUpdate, UpdateResult, ADDITIONAL_REF_NAMES, SEARCH_PATH};
pub use name::RefName;
pub use reference::{Ref, Storage, Target};
pub use reflist::{ListBuilder, RefItem, RefList};
pub use reflog::{Ident, ReflogEntry, ReflogWriter};

use refdb_hash::ObjectId;

/// Answers what an object id peels to, on behalf of the object store this
/// crate deliberately knows nothing about.
pub trait ObjectPeeler {
    /// Follow the tag chain from `id`: `Some(peeled)` when `id` names a tag
    /// (with `peeled` the first non-tag object reached), `None` when it is
    /// not a tag.
    fn peel_tag(&self, id: ObjectId) -> Result<Option<ObjectId>, RefError>;
}
