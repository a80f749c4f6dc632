//! Object identity for the refdb reference database.
//!
//! Provides the `ObjectId` value type: a 20-byte object hash with its
//! canonical 40-character lowercase hex form.

mod error;
mod oid;

pub use error::HashError;
pub use oid::{ObjectId, HEX_LENGTH, RAW_LENGTH};
