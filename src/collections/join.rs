//! Predicate queries and joins over collection tables.

use super::Collection;
use crate::engine::Engine;
use crate::handle::Handle;
use crate::models::{Mirrorable, QueryRow, Resolved};
use crate::storage::sqlite::{join_sql, select_where_sql};
use crate::{Error, Result};

/// Selects the objects of one table matching a predicate.
pub(crate) fn query_table<T: Mirrorable>(
    engine: &Engine,
    table: &str,
    predicate: &str,
) -> Result<Vec<Handle<T>>> {
    let sql = select_where_sql(table, predicate);
    let rows = engine.resolve(&sql, [])?;
    Ok(rows
        .iter()
        .filter_map(QueryRow::as_single)
        .filter_map(typed_handle::<T>)
        .collect())
}

/// Joins two collection tables, returning each side's objects.
pub(crate) fn join_tables<L, R>(
    left: &L,
    right: &R,
    on: &str,
    filter: &str,
) -> Result<Vec<(Handle<L::Item>, Handle<R::Item>)>>
where
    L: Collection + ?Sized,
    R: Collection + ?Sized,
{
    if !Engine::ptr_eq(left.engine(), right.engine()) {
        return Err(Error::EngineMismatch);
    }

    let sql = join_sql(left.table_name(), right.table_name(), on, filter);
    let rows = left.engine().resolve(&sql, [])?;
    let mut pairs = Vec::with_capacity(rows.len());
    for row in &rows {
        if let Some([l, r]) = row.as_tuple()
            && let (Some(l), Some(r)) = (typed_handle(l), typed_handle(r))
        {
            pairs.push((l, r));
        }
    }
    Ok(pairs)
}

fn typed_handle<T: Mirrorable>(slot: &Resolved) -> Option<Handle<T>> {
    match slot {
        Resolved::Object(handle) => {
            let typed = handle.downcast::<T>();
            if typed.is_none() {
                tracing::warn!(
                    expected = T::type_name(),
                    found = handle.type_name(),
                    "row resolved to an object of another type"
                );
            }
            typed
        },
        Resolved::Reclaimed(id) => {
            tracing::debug!(%id, "skipping row of a reclaimed object");
            None
        },
        Resolved::Scalar(_) => None,
    }
}
