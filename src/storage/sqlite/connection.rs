//! Connection handling for the in-memory index.

use crate::{Error, Result};
use rusqlite::Connection;

/// Opens a private in-memory database and configures it for mirroring.
///
/// Each call returns an independent database; nothing is shared between
/// engines and nothing is written to disk.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if `SQLite` cannot allocate the database.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(|e| Error::OperationFailed {
        operation: "open_sqlite_memory".to_string(),
        cause: e.to_string(),
    })?;
    configure_connection(&conn)?;
    Ok(conn)
}

/// Configures a connection for an ephemeral, single-writer index.
///
/// # Configuration Applied
///
/// - **MEMORY journal**: rollback journal kept in RAM; the index is never persisted
/// - **OFF synchronous**: there is no file to sync
/// - **MEMORY `temp_store`**: temporary tables and sorts for joins stay in RAM
/// - **`case_sensitive_like` off**: `LIKE` predicates behave as users expect
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the connection rejects a required pragma.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns a row, which execute_batch would reject
    let _ = conn.pragma_update(None, "journal_mode", "MEMORY");
    let _ = conn.pragma_update(None, "synchronous", "OFF");

    conn.pragma_update(None, "temp_store", "MEMORY")
        .map_err(|e| Error::OperationFailed {
            operation: "configure_sqlite".to_string(),
            cause: e.to_string(),
        })?;
    conn.pragma_update(None, "case_sensitive_like", false)
        .map_err(|e| Error::OperationFailed {
            operation: "configure_sqlite".to_string(),
            cause: e.to_string(),
        })?;

    Ok(())
}
