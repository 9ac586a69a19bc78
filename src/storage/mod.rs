//! Index storage: the `SQLite` backend plus the two registries layered on it.
//!
//! - [`sqlite`]: connection setup and SQL statement construction
//! - [`SchemaRegistry`]: per-type column sets and table names
//! - [`IdentityRegistry`]: weak map from identity token to live object

// Allow significant_drop_tightening - registries are borrowed for the whole call.
#![allow(clippy::significant_drop_tightening)]

mod identity;
mod schema;
pub mod sqlite;

pub use identity::IdentityRegistry;
pub use schema::{SchemaRegistry, TableSchema};
