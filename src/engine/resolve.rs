//! Query resolution: turning backend rows back into live objects.

use super::{Engine, query_error};
use crate::handle::AnyHandle;
use crate::models::{ObjectId, QueryRow, Resolved, Value};
use crate::storage::IdentityRegistry;
use crate::storage::sqlite::is_pointer_column;
use crate::Result;
use rusqlite::Params;
use std::time::Instant;
use tracing::instrument;

impl Engine {
    /// Runs a read query and resolves each row.
    ///
    /// Every column named `object_id` or ending in `_object_id` (in any case)
    /// is treated as an identity pointer and replaced by a handle to the live
    /// object, or by [`Resolved::Reclaimed`] if that object is gone. Other
    /// columns pass through unchanged. A row with exactly one column is
    /// returned as [`QueryRow::Single`]. Rows of reclaimed objects are
    /// evicted first, so `Reclaimed` only appears for pointers to objects the
    /// engine no longer tracks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`](crate::Error::Query) with the backend's
    /// message if the statement cannot be prepared or executed.
    #[instrument(skip(self, params), fields(sql = %sql))]
    pub fn resolve<P: Params>(&self, sql: &str, params: P) -> Result<Vec<QueryRow>> {
        self.sweep_reclaimed()?;
        let start = Instant::now();
        let result = self.resolve_inner(sql, params);
        self.record("resolve", start, &result);
        result
    }

    fn resolve_inner<P: Params>(&self, sql: &str, params: P) -> Result<Vec<QueryRow>> {
        self.log_statement(sql);
        let mut stmt = self
            .inner
            .conn
            .prepare(sql)
            .map_err(|e| query_error(sql, &e))?;
        let pointers: Vec<bool> = stmt
            .column_names()
            .iter()
            .map(|name| is_pointer_column(name))
            .collect();

        let mut rows = stmt.query(params).map_err(|e| query_error(sql, &e))?;
        let identities = self.inner.identities.borrow();
        let mut resolved = Vec::new();
        while let Some(row) = rows.next().map_err(|e| query_error(sql, &e))? {
            let mut columns = Vec::with_capacity(pointers.len());
            for (index, pointer) in pointers.iter().enumerate() {
                let value: Value = row.get(index).map_err(|e| query_error(sql, &e))?;
                columns.push(self.resolve_column(&identities, *pointer, value));
            }
            resolved.push(QueryRow::from_columns(columns));
        }

        tracing::trace!(rows = resolved.len(), "resolved query");
        Ok(resolved)
    }

    fn resolve_column(&self, identities: &IdentityRegistry, pointer: bool, value: Value) -> Resolved {
        match value {
            Value::Integer(raw) if pointer => {
                let id = ObjectId::from_raw(raw);
                identities.get(id).map_or_else(
                    || {
                        tracing::debug!(%id, "identity pointer names a reclaimed object");
                        Resolved::Reclaimed(id)
                    },
                    |object| Resolved::Object(AnyHandle::new(object, self.clone())),
                )
            },
            other => Resolved::Scalar(other),
        }
    }
}
