//! Ordered mirrored collection.

use super::Collection;
use crate::engine::{Engine, LabelUpdate};
use crate::handle::{AnyHandle, Handle};
use crate::models::{Live, Mirrorable, ObjectId};
use crate::{Error, Result};
use std::collections::HashSet;
use std::fmt;
use std::ops::Index;

/// List of mirrored objects of one type.
///
/// Elements keep whatever key label a map gave them; objects that only live
/// in lists have none. Every element counts as one membership of its object,
/// and a row is deleted when its last membership goes, whichever collection
/// held it. Dropping the list releases all of its memberships.
pub struct MirroredList<T> {
    engine: Engine,
    table: String,
    items: Vec<Handle<T>>,
}

impl<T: Mirrorable> MirroredList<T> {
    /// Mirrors `objects` into `engine`.
    ///
    /// The first element fixes the table's columns. If a later element fails
    /// to sync, rows inserted by this call are removed again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyCollection`] if `objects` is empty, or the first
    /// registration or sync error.
    pub fn new(engine: &Engine, objects: Vec<Live<T>>) -> Result<Self> {
        let Some(first) = objects.first() else {
            return Err(Error::EmptyCollection);
        };
        let table = engine.register(&*first.borrow())?;

        let mut list = Self {
            engine: engine.clone(),
            table,
            items: Vec::with_capacity(objects.len()),
        };
        let mut fresh: HashSet<ObjectId> = HashSet::new();
        for object in objects {
            if !engine.is_indexed(object.id()) {
                fresh.insert(object.id());
            }
            if let Err(e) = engine.attach(&object.tracked(), LabelUpdate::Keep) {
                list.discard(&fresh);
                return Err(e);
            }
            list.items.push(Handle::new(object, engine));
        }

        tracing::debug!(table = %list.table, len = list.items.len(), "mirrored list");
        Ok(list)
    }

    /// Appends an object, syncing it first.
    ///
    /// Returns a handle to the appended object.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails; the list is unchanged then.
    pub fn append(&mut self, object: Live<T>) -> Result<Handle<T>> {
        self.engine.attach(&object.tracked(), LabelUpdate::Keep)?;
        let handle = Handle::new(object, &self.engine);
        self.items.push(handle.clone());
        Ok(handle)
    }

    /// Appends the object behind an existing handle.
    ///
    /// The handle may come from another engine; the list stores a new handle
    /// bound to its own engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn append_handle(&mut self, handle: Handle<T>) -> Result<Handle<T>> {
        self.append(handle.into_target())
    }

    /// Appends an object whose type is only known at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if the object is not a `T`, or any
    /// sync error.
    pub fn append_dyn(&mut self, handle: &AnyHandle) -> Result<Handle<T>> {
        let typed = handle.downcast::<T>().ok_or_else(|| Error::TypeMismatch {
            expected: T::type_name(),
            found: handle.type_name(),
        })?;
        self.append_handle(typed)
    }

    /// Removes the element at `index` and its row.
    ///
    /// The row stays while the object is still held elsewhere, at another
    /// position of this list or by another collection on the same engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfBounds`] if `index >= len()`, or the
    /// backend error if the row cannot be deleted (the list is unchanged
    /// then).
    pub fn remove_at(&mut self, index: usize) -> Result<Handle<T>> {
        let len = self.items.len();
        let handle = self
            .items
            .get(index)
            .ok_or(Error::IndexOutOfBounds { index, len })?;

        self.engine.detach(&self.table, handle.id(), None)?;
        Ok(self.items.remove(index))
    }

    /// Removes the last element and its row.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the row cannot be deleted.
    pub fn pop(&mut self) -> Result<Option<Handle<T>>> {
        match self.items.len() {
            0 => Ok(None),
            len => self.remove_at(len - 1).map(Some),
        }
    }

    /// Returns `true` if `object` is an element of this list.
    #[must_use]
    pub fn contains(&self, object: &Live<T>) -> bool {
        self.items.iter().any(|handle| handle.is(object))
    }
}

impl<T> MirroredList<T> {
    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the list has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Handle at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Handle<T>> {
        self.items.get(index)
    }

    /// Iterates the handles in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Handle<T>> {
        self.items.iter()
    }

    /// All handles, in order.
    #[must_use]
    pub fn as_slice(&self) -> &[Handle<T>] {
        &self.items
    }

    /// Undoes a partial construction: rows this call created are deleted,
    /// memberships of objects indexed before are released.
    fn discard(&mut self, fresh: &HashSet<ObjectId>) {
        for handle in std::mem::take(&mut self.items) {
            let id = handle.id();
            if !fresh.contains(&id) {
                self.engine.leave(id);
            } else if let Err(e) = self.engine.remove_id(&self.table, id) {
                tracing::warn!(%id, error = %e, "failed to roll back mirrored row");
            }
        }
    }
}

impl<T> Drop for MirroredList<T> {
    fn drop(&mut self) {
        for handle in self.items.drain(..) {
            if let Err(e) = self.engine.detach(&self.table, handle.id(), None) {
                tracing::warn!(id = %handle.id(), error = %e, "failed to release list element");
            }
        }
    }
}

impl<T: Mirrorable> Collection for MirroredList<T> {
    type Item = T;

    fn engine(&self) -> &Engine {
        &self.engine
    }

    fn table_name(&self) -> &str {
        &self.table
    }
}

impl<T> Index<usize> for MirroredList<T> {
    type Output = Handle<T>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.items[index]
    }
}

impl<'a, T> IntoIterator for &'a MirroredList<T> {
    type Item = &'a Handle<T>;
    type IntoIter = std::slice::Iter<'a, Handle<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T: fmt::Debug> fmt::Debug for MirroredList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirroredList")
            .field("table", &self.table)
            .field("items", &self.items)
            .finish_non_exhaustive()
    }
}
