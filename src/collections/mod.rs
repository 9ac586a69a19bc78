//! Mirrored collections.
//!
//! A mirrored collection owns its elements (through [`Handle`]s) and keeps
//! one row per element in the element type's table. Collections sharing an
//! engine see each other's tables, which is what makes [`Collection::join`]
//! possible.
//!
//! | Input | Collection |
//! |-------|------------|
//! | `Vec<Live<T>>`, `[Live<T>; N]` | [`MirroredList`] |
//! | `HashMap<K, Live<T>>`, `BTreeMap<K, Live<T>>`, `Vec<(K, Live<T>)>` | [`MirroredMap`] |

mod join;
mod list;
mod map;

pub use list::MirroredList;
pub use map::MirroredMap;

use crate::engine::Engine;
use crate::handle::Handle;
use crate::models::{Live, Mirrorable};
use crate::storage::sqlite::ALWAYS_TRUE;
use crate::Result;
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

/// Query surface shared by all mirrored collections.
pub trait Collection {
    /// Element type.
    type Item: Mirrorable;

    /// Engine the collection is mirrored into.
    fn engine(&self) -> &Engine;

    /// Table holding the element rows.
    fn table_name(&self) -> &str;

    /// Returns handles to the rows of this collection's table matching
    /// `predicate`.
    ///
    /// The predicate is passed to the backend verbatim as a `WHERE` clause.
    /// Rows whose object has been reclaimed are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`](crate::Error::Query) if the backend rejects
    /// the predicate.
    fn query(&self, predicate: &str) -> Result<Vec<Handle<Self::Item>>> {
        join::query_table(self.engine(), self.table_name(), predicate)
    }

    /// Joins this collection's table with `other`'s.
    ///
    /// Returns `(self-side, other-side)` pairs in backend order. The join is
    /// evaluated against current attribute values on every call.
    ///
    /// `on` and `filter` qualify columns by table name. When both collections
    /// share a table, the sides are named `lhs` and `rhs` instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineMismatch`](crate::Error::EngineMismatch) if the
    /// collections use different engines and
    /// [`Error::Query`](crate::Error::Query) if the backend rejects the
    /// condition or filter.
    fn join<C: Collection + ?Sized>(
        &self,
        other: &C,
        on: &str,
        filter: &str,
    ) -> Result<Vec<(Handle<Self::Item>, Handle<C::Item>)>> {
        join::join_tables(self, other, on, filter)
    }

    /// [`Collection::join`] without a filter.
    ///
    /// # Errors
    ///
    /// Same as [`Collection::join`].
    fn join_all<C: Collection + ?Sized>(
        &self,
        other: &C,
        on: &str,
    ) -> Result<Vec<(Handle<Self::Item>, Handle<C::Item>)>> {
        self.join(other, on, ALWAYS_TRUE)
    }
}

/// Conversion accepted by [`Engine::mirror`].
pub trait IntoMirror {
    /// The mirrored collection produced.
    type Output;

    /// Registers, wraps and syncs every element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyCollection`](crate::Error::EmptyCollection) for
    /// empty input, or any error from the initial sync.
    fn into_mirror(self, engine: &Engine) -> Result<Self::Output>;
}

impl<T: Mirrorable> IntoMirror for Vec<Live<T>> {
    type Output = MirroredList<T>;

    fn into_mirror(self, engine: &Engine) -> Result<Self::Output> {
        MirroredList::new(engine, self)
    }
}

impl<T: Mirrorable, const N: usize> IntoMirror for [Live<T>; N] {
    type Output = MirroredList<T>;

    fn into_mirror(self, engine: &Engine) -> Result<Self::Output> {
        MirroredList::new(engine, self.into())
    }
}

impl<K: Into<String>, T: Mirrorable> IntoMirror for Vec<(K, Live<T>)> {
    type Output = MirroredMap<T>;

    fn into_mirror(self, engine: &Engine) -> Result<Self::Output> {
        MirroredMap::new(engine, self)
    }
}

impl<K: Into<String>, T: Mirrorable, S: BuildHasher> IntoMirror for HashMap<K, Live<T>, S> {
    type Output = MirroredMap<T>;

    fn into_mirror(self, engine: &Engine) -> Result<Self::Output> {
        MirroredMap::new(engine, self.into_iter().collect())
    }
}

impl<K: Into<String>, T: Mirrorable> IntoMirror for BTreeMap<K, Live<T>> {
    type Output = MirroredMap<T>;

    fn into_mirror(self, engine: &Engine) -> Result<Self::Output> {
        MirroredMap::new(engine, self.into_iter().collect())
    }
}
