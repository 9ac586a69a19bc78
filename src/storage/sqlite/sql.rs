//! SQL construction for the mirror index.
//!
//! This module owns the column conventions shared by every mirrored table:
//! - `object_id`: identity token, primary key
//! - `key_label`: logical key for members of keyed collections, otherwise NULL
//! - one untyped column per mirrored attribute
//!
//! Generated identifiers are always double-quoted. Predicates supplied by the
//! caller are inserted verbatim and evaluated by `SQLite` alone.

use crate::storage::TableSchema;

/// Primary key column holding the identity token.
pub const IDENTITY_COLUMN: &str = "object_id";

/// Column holding the logical key of keyed-collection members.
pub const KEY_LABEL_COLUMN: &str = "key_label";

/// Suffix that marks an aliased result column as an identity pointer.
pub const POINTER_SUFFIX: &str = "_object_id";

/// Predicate used when a caller supplies no filter.
pub const ALWAYS_TRUE: &str = "1 = 1";

/// Aliases of the two sides when a table is joined with itself.
pub const SELF_JOIN_ALIASES: (&str, &str) = ("lhs", "rhs");

/// Quotes an identifier for `SQLite`, doubling embedded quotes.
///
/// # Examples
///
/// ```
/// use mirage::storage::sqlite::quote_identifier;
///
/// assert_eq!(quote_identifier("player"), "\"player\"");
/// assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
/// ```
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Derives the table name for a type: optional prefix plus the lower-cased name.
///
/// # Examples
///
/// ```
/// use mirage::storage::sqlite::table_name_for;
///
/// assert_eq!(table_name_for("", "Player"), "player");
/// assert_eq!(table_name_for("game_", "Item"), "game_item");
/// ```
#[must_use]
pub fn table_name_for(prefix: &str, type_name: &str) -> String {
    format!("{prefix}{}", type_name.to_lowercase())
}

/// Returns `true` if a result column follows the identity-pointer convention.
///
/// A column named exactly `object_id` (what `SQLite` reports for both
/// `object_id` and `t.object_id`) or any alias ending in `_object_id` is a
/// pointer. Matching is case-insensitive.
#[must_use]
pub fn is_pointer_column(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == IDENTITY_COLUMN || lower.ends_with(POINTER_SUFFIX)
}

/// Builds the idempotent DDL for a registered type.
#[must_use]
pub fn create_table_sql(schema: &TableSchema) -> String {
    let mut columns = vec![
        format!("{} INTEGER PRIMARY KEY", quote_identifier(IDENTITY_COLUMN)),
        quote_identifier(KEY_LABEL_COLUMN),
    ];
    columns.extend(schema.columns().iter().map(|c| quote_identifier(c)));
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_identifier(schema.table()),
        columns.join(", ")
    )
}

/// Builds the upsert for one row.
///
/// Parameters are `?1` = identity, `?2` = key label, then one per column in
/// schema order.
#[must_use]
pub fn upsert_sql(schema: &TableSchema) -> String {
    let mut names = vec![
        quote_identifier(IDENTITY_COLUMN),
        quote_identifier(KEY_LABEL_COLUMN),
    ];
    names.extend(schema.columns().iter().map(|c| quote_identifier(c)));
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
        quote_identifier(schema.table()),
        names.join(", "),
        placeholders.join(", ")
    )
}

/// Builds the delete of one row by identity (`?1`).
#[must_use]
pub fn delete_sql(table: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?1",
        quote_identifier(table),
        quote_identifier(IDENTITY_COLUMN)
    )
}

/// Builds the reset of one row's key label (`?1` = identity).
#[must_use]
pub fn clear_label_sql(table: &str) -> String {
    format!(
        "UPDATE {} SET {} = NULL WHERE {} = ?1",
        quote_identifier(table),
        quote_identifier(KEY_LABEL_COLUMN),
        quote_identifier(IDENTITY_COLUMN)
    )
}

/// Builds a single-table pointer query with a caller-supplied predicate.
#[must_use]
pub fn select_where_sql(table: &str, predicate: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE {predicate}",
        quote_identifier(IDENTITY_COLUMN),
        quote_identifier(table)
    )
}

/// Builds a pointer query matching one key label (`?1`).
#[must_use]
pub fn key_lookup_sql(table: &str) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        quote_identifier(IDENTITY_COLUMN),
        quote_identifier(table),
        quote_identifier(KEY_LABEL_COLUMN)
    )
}

/// Builds a two-table join selecting both sides' identity pointers.
///
/// Distinct tables are referenced by their own names, so `on` and `filter`
/// may use `table.column` qualifiers. A table joined with itself is aliased
/// as `lhs` and `rhs` instead (see [`SELF_JOIN_ALIASES`]).
#[must_use]
pub fn join_sql(left: &str, right: &str, on: &str, filter: &str) -> String {
    let left_q = quote_identifier(left);
    let right_q = quote_identifier(right);
    let id = quote_identifier(IDENTITY_COLUMN);
    if left == right {
        let (lhs, rhs) = SELF_JOIN_ALIASES;
        return format!(
            "SELECT {lhs}.{id} AS left{POINTER_SUFFIX}, {rhs}.{id} AS right{POINTER_SUFFIX} \
             FROM {left_q} AS {lhs} JOIN {right_q} AS {rhs} ON {on} WHERE {filter}"
        );
    }
    format!(
        "SELECT {left_q}.{id} AS left{POINTER_SUFFIX}, {right_q}.{id} AS right{POINTER_SUFFIX} \
         FROM {left_q} JOIN {right_q} ON {on} WHERE {filter}"
    )
}
