//! Foundation utilities for the refdb reference database.
//!
//! Provides the on-disk building blocks shared by the higher layers: the
//! `.lock`-file single-writer protocol and the cheap file-change detector
//! used to validate cached state.

pub mod error;
pub mod fsnapshot;
pub mod lockfile;

pub use error::LockError;
pub use fsnapshot::FileSnapshot;
pub use lockfile::LockFile;
