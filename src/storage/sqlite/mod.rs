//! Shared `SQLite` infrastructure for the mirror index.
//!
//! ## Module Structure
//!
//! - [`connection`]: opening and configuring the in-memory connection
//! - [`sql`]: identifier quoting, column conventions and statement builders
//!
//! Caller-supplied predicate, join and aggregate text is spliced into the
//! statements verbatim; only identifiers generated by mirage are quoted.

mod connection;
mod sql;

pub use connection::{configure_connection, open_in_memory};
pub use sql::{
    ALWAYS_TRUE, IDENTITY_COLUMN, KEY_LABEL_COLUMN, POINTER_SUFFIX, SELF_JOIN_ALIASES,
    clear_label_sql, create_table_sql, delete_sql, is_pointer_column, join_sql, key_lookup_sql,
    quote_identifier, select_where_sql, table_name_for, upsert_sql,
};
