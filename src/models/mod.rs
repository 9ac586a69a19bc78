//! Data models for mirage.
//!
//! This module contains the identity-bearing object wrapper, the trait every
//! mirrored type implements, and the shapes returned by resolved queries.

mod object;
mod row;

pub use object::{Live, Mirrorable, ObjectId, short_type_name};
pub use row::{QueryRow, Resolved};

pub(crate) use object::{LiveCell, Tracked};

/// Scalar value stored in, and read back from, the index.
///
/// This is `rusqlite`'s dynamically typed value, so attribute values pass
/// through to the backend and back without conversion.
pub type Value = rusqlite::types::Value;
