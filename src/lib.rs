//! # Mirage
//!
//! Mirror live, mutable application objects into an in-memory `SQLite` index
//! and query them with SQL, getting the original objects back.
//!
//! Mirage keeps two representations consistent: the object graph owned by the
//! application and a relational copy of each object's attributes. Every write
//! made through a [`Handle`] is applied to the live object first and then
//! re-synchronized into its table, so predicate queries, joins and aggregates
//! always see current state. Query results are resolved back into handles that
//! point at the *same* objects, not copies.
//!
//! ## Features
//!
//! - One table per mirrored type, inferred from the first registered value
//! - Weak identity registry: the index never keeps an object alive
//! - List-like and map-like mirrored collections
//! - Cross-collection joins and aggregate queries with identity-preserving results
//! - Batched write scopes with a guaranteed final flush
//!
//! ## Example
//!
//! ```rust
//! use mirage::{Collection, Engine, Live, mirrorable};
//!
//! #[derive(Debug)]
//! struct Player {
//!     name: String,
//!     score: i64,
//! }
//!
//! mirrorable!(Player { name, score });
//!
//! let alice = Live::new(Player { name: "Alice".into(), score: 100 });
//! let bob = Live::new(Player { name: "Bob".into(), score: 200 });
//!
//! let engine = Engine::in_memory()?;
//! let players = engine.mirror(vec![alice.clone(), bob.clone()])?;
//!
//! let high = players.query("score > 150")?;
//! assert_eq!(high.len(), 1);
//! assert!(high[0].is(&bob));
//!
//! players[0].update(|p| p.score = 500)?;
//! assert!(players.query("score > 400")?[0].is(&alice));
//! # Ok::<(), mirage::Error>(())
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use thiserror::Error as ThisError;

// Module declarations
pub mod collections;
pub mod config;
pub mod engine;
pub mod handle;
pub mod models;
pub mod observability;
pub mod storage;

// Re-exports for convenience
pub use collections::{Collection, IntoMirror, MirroredList, MirroredMap};
pub use config::MirageConfig;
pub use engine::{BatchGuard, Engine};
pub use handle::{AnyHandle, Handle};
pub use models::{Live, Mirrorable, ObjectId, QueryRow, Resolved, Value};

/// Error type for mirage operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `EmptyCollection` | Mirroring an empty collection (no value to infer a schema from) |
/// | `TypeMismatch` | Adding an element whose type differs from the collection's element type |
/// | `Schema` | A type exposes no attributes, uses a reserved column name, or DDL fails |
/// | `Query` | The backend rejects a predicate, join condition or aggregate |
/// | `IndexOutOfBounds` | Positional removal past the end of a list |
/// | `KeyNotFound` | Keyed removal of an absent key |
/// | `EngineMismatch` | Joining collections bound to different engines |
/// | `OperationFailed` | Backend DML, configuration or logging setup fails |
#[derive(Debug, ThisError)]
pub enum Error {
    /// A collection was mirrored from an empty input.
    #[error("cannot mirror an empty collection: no element to infer a schema from")]
    EmptyCollection,

    /// An element does not match the collection's established element type.
    #[error("type mismatch: expected {expected}, got {found}")]
    TypeMismatch {
        /// The collection's element type.
        expected: &'static str,
        /// The type that was offered.
        found: &'static str,
    },

    /// Schema inference or table creation failed.
    ///
    /// The index is left unchanged when this is returned from a sync.
    #[error("schema error for table '{table}': {reason}")]
    Schema {
        /// Table the schema was being registered for.
        table: String,
        /// Why registration failed.
        reason: String,
    },

    /// The backend rejected a read query.
    #[error("query failed: {cause} (sql: {sql})")]
    Query {
        /// The statement that was sent to the backend.
        sql: String,
        /// The backend's error message, unmodified.
        cause: String,
    },

    /// A positional access was out of range.
    #[error("index {index} out of range for collection of length {len}")]
    IndexOutOfBounds {
        /// Requested position.
        index: usize,
        /// Current collection length.
        len: usize,
    },

    /// A keyed access referenced an absent key.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Two collections bound to different engines were combined.
    #[error("collections belong to different engines")]
    EngineMismatch,

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` insert, update or delete statements fail
    /// - Configuration files cannot be read or parsed
    /// - Logging cannot be initialized
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for mirage operations.
pub type Result<T> = std::result::Result<T, Error>;
