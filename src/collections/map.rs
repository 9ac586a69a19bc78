//! Keyed mirrored collection.

use super::Collection;
use super::join::query_table;
use crate::engine::{Engine, LabelUpdate};
use crate::handle::Handle;
use crate::models::{Live, Mirrorable, ObjectId};
use crate::storage::sqlite::key_lookup_sql;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Map from string keys to mirrored objects of one type.
///
/// Each element is synced with its key as the row's `key_label`, so rows can
/// be found by key from SQL as well as through [`MirroredMap::query_key`].
/// Keys iterate in sorted order.
///
/// A row has one label, so an object held under several keys (in this map or
/// another) carries the key it was last stored under. Dropping the map
/// releases all of its memberships.
pub struct MirroredMap<T> {
    engine: Engine,
    table: String,
    entries: BTreeMap<String, Handle<T>>,
}

impl<T: Mirrorable> MirroredMap<T> {
    /// Mirrors keyed `entries` into `engine`.
    ///
    /// A key given twice keeps its last object. If an entry fails to sync,
    /// rows created by this call are removed again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyCollection`] if `entries` is empty, or the first
    /// registration or sync error.
    pub fn new<K: Into<String>>(engine: &Engine, entries: Vec<(K, Live<T>)>) -> Result<Self> {
        let Some((_, first)) = entries.first() else {
            return Err(Error::EmptyCollection);
        };
        let table = engine.register(&*first.borrow())?;

        let mut map = Self {
            engine: engine.clone(),
            table,
            entries: BTreeMap::new(),
        };
        let mut fresh: HashSet<ObjectId> = HashSet::new();
        for (key, object) in entries {
            if !engine.is_indexed(object.id()) {
                fresh.insert(object.id());
            }
            if let Err(e) = map.insert(key, object) {
                map.discard(&fresh);
                return Err(e);
            }
        }

        tracing::debug!(table = %map.table, len = map.entries.len(), "mirrored map");
        Ok(map)
    }

    /// Inserts or overwrites the object stored under `key`.
    ///
    /// The object is synced with `key` as its label. When a different object
    /// is displaced and no other key holds it, its row is removed. Returns the
    /// displaced handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync or the displaced row's removal fails.
    pub fn insert(&mut self, key: impl Into<String>, object: Live<T>) -> Result<Option<Handle<T>>> {
        let key = key.into();
        self.engine
            .attach(&object.tracked(), LabelUpdate::Set(Some(key.as_str())))?;

        let displaced = self
            .entries
            .insert(key.clone(), Handle::new(object, &self.engine));
        if let Some(old) = &displaced {
            self.release(old, &key)?;
        }
        Ok(displaced)
    }

    /// Removes the object stored under `key`, along with its row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if the key is absent, or the backend
    /// error if the row cannot be deleted.
    pub fn remove(&mut self, key: &str) -> Result<Handle<T>> {
        let handle = self
            .entries
            .remove(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        self.release(&handle, key)?;
        Ok(handle)
    }

    /// Objects whose stored key label equals `key`.
    ///
    /// Answered by the index, so rows written by other maps of the same type
    /// on this engine are included.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the lookup fails.
    pub fn query_key(&self, key: &str) -> Result<Vec<Handle<T>>> {
        let rows = self.engine.resolve(&key_lookup_sql(&self.table), [key])?;
        Ok(rows
            .iter()
            .filter_map(|row| row.as_single()?.to_handle::<T>())
            .collect())
    }

    /// Objects stored under keys matching a `LIKE` pattern.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the lookup fails.
    pub fn query_key_like(&self, pattern: &str) -> Result<Vec<Handle<T>>> {
        let escaped = pattern.replace('\'', "''");
        query_table(&self.engine, &self.table, &format!("key_label LIKE '{escaped}'"))
    }

    /// Releases the membership `handle` held under `key`.
    ///
    /// If another key of this map still holds the object, the row is
    /// relabelled with that key.
    fn release(&self, handle: &Handle<T>, key: &str) -> Result<()> {
        match self
            .entries
            .iter()
            .find(|(_, other)| other.same_object(handle))
        {
            Some((other_key, other)) => {
                self.engine.sync_tracked(
                    &other.target().tracked(),
                    LabelUpdate::Set(Some(other_key.as_str())),
                )?;
                self.engine.leave(handle.id());
                Ok(())
            },
            None => self
                .engine
                .detach(&self.table, handle.id(), Some(key))
                .map(|_| ()),
        }
    }
}

impl<T> MirroredMap<T> {
    /// Handle stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Handle<T>> {
        self.entries.get(key)
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Handles in key order.
    pub fn values(&self) -> impl Iterator<Item = &Handle<T>> {
        self.entries.values()
    }

    /// `(key, handle)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Handle<T>)> {
        self.entries.iter().map(|(key, handle)| (key.as_str(), handle))
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the map has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn discard(&mut self, fresh: &HashSet<ObjectId>) {
        for handle in std::mem::take(&mut self.entries).into_values() {
            let id = handle.id();
            if !fresh.contains(&id) {
                self.engine.leave(id);
            } else if let Err(e) = self.engine.remove_id(&self.table, id) {
                tracing::warn!(%id, error = %e, "failed to roll back mirrored row");
            }
        }
    }
}

impl<T> Drop for MirroredMap<T> {
    fn drop(&mut self) {
        for (key, handle) in std::mem::take(&mut self.entries) {
            if let Err(e) = self.engine.detach(&self.table, handle.id(), Some(&key)) {
                tracing::warn!(
                    id = %handle.id(),
                    key = %key,
                    error = %e,
                    "failed to release map entry"
                );
            }
        }
    }
}

impl<T: Mirrorable> Collection for MirroredMap<T> {
    type Item = T;

    fn engine(&self) -> &Engine {
        &self.engine
    }

    fn table_name(&self) -> &str {
        &self.table
    }
}

impl<T: fmt::Debug> fmt::Debug for MirroredMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirroredMap")
            .field("table", &self.table)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Debug)]
    struct Setting {
        value: String,
        level: i64,
    }

    crate::mirrorable!(Setting { value, level });

    fn setting(value: &str, level: i64) -> Live<Setting> {
        Live::new(Setting {
            value: value.to_string(),
            level,
        })
    }

    fn label_of(engine: &Engine, object: &Live<Setting>) -> Option<String> {
        engine
            .connection()
            .query_row(
                "SELECT key_label FROM setting WHERE object_id = ?1",
                [object.id().as_i64()],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn test_new_stores_keys_as_labels() {
        let engine = Engine::in_memory().unwrap();
        let theme = setting("dark", 1);
        let lang = setting("en", 2);
        let map = engine
            .mirror(HashMap::from([("theme", theme.clone()), ("lang", lang.clone())]))
            .unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["lang", "theme"]);
        assert_eq!(label_of(&engine, &theme).as_deref(), Some("theme"));
        assert_eq!(label_of(&engine, &lang).as_deref(), Some("lang"));
    }

    #[test]
    fn test_empty_input() {
        let engine = Engine::in_memory().unwrap();
        let result = engine.mirror(Vec::<(String, Live<Setting>)>::new());
        assert!(matches!(result, Err(Error::EmptyCollection)));
    }

    #[test]
    fn test_query_key_and_predicate() {
        let engine = Engine::in_memory().unwrap();
        let theme = setting("dark", 1);
        let map = engine
            .mirror(vec![("theme", theme.clone()), ("lang", setting("en", 2))])
            .unwrap();

        let by_key = map.query_key("theme").unwrap();
        assert_eq!(by_key.len(), 1);
        assert!(by_key[0].is(&theme));
        assert!(map.query_key("missing").unwrap().is_empty());

        let by_value = map.query("level > 1").unwrap();
        assert_eq!(by_value.len(), 1);
        assert_eq!(by_value[0].borrow().value, "en");

        let mixed = map.query("key_label = 'theme' AND value = 'dark'").unwrap();
        assert!(mixed[0].is(&theme));

        assert_eq!(map.query_key_like("th%").unwrap().len(), 1);
    }

    #[test]
    fn test_overwrite_replaces_row() {
        let engine = Engine::in_memory().unwrap();
        let old = setting("dark", 1);
        let mut map = engine.mirror(vec![("theme", old.clone())]).unwrap();

        let new = setting("light", 1);
        let displaced = map.insert("theme", new.clone()).unwrap().unwrap();
        assert!(displaced.is(&old));
        assert_eq!(engine.row_count("setting").unwrap(), 1);
        assert!(map.query_key("theme").unwrap()[0].is(&new));
        assert!(!engine.is_registered(old.id()));
    }

    #[test]
    fn test_overwrite_with_same_object_resyncs() {
        let engine = Engine::in_memory().unwrap();
        let theme = setting("dark", 1);
        let mut map = engine.mirror(vec![("theme", theme.clone())]).unwrap();

        theme.borrow_mut().value = "light".to_string();
        map.insert("theme", theme.clone()).unwrap();
        assert_eq!(map.query("value = 'light'").unwrap().len(), 1);
        assert_eq!(engine.row_count("setting").unwrap(), 1);
    }

    #[test]
    fn test_remove() {
        let engine = Engine::in_memory().unwrap();
        let mut map = engine
            .mirror(vec![("a", setting("x", 1)), ("b", setting("y", 2))])
            .unwrap();

        map.remove("a").unwrap();
        assert!(!map.contains_key("a"));
        assert!(map.query_key("a").unwrap().is_empty());
        assert!(matches!(map.remove("a"), Err(Error::KeyNotFound(ref k)) if k == "a"));
    }

    #[test]
    fn test_same_object_under_two_keys() {
        let engine = Engine::in_memory().unwrap();
        let shared = setting("dark", 1);
        let mut map = engine
            .mirror(vec![("first", shared.clone()), ("second", shared.clone())])
            .unwrap();
        assert_eq!(engine.row_count("setting").unwrap(), 1);

        map.remove("second").unwrap();
        assert_eq!(engine.row_count("setting").unwrap(), 1);
        assert_eq!(label_of(&engine, &shared).as_deref(), Some("first"));

        map.remove("first").unwrap();
        assert_eq!(engine.row_count("setting").unwrap(), 0);
    }

    #[test]
    fn test_handle_write_keeps_key_label() {
        let engine = Engine::in_memory().unwrap();
        let theme = setting("dark", 1);
        let map = engine.mirror(vec![("theme", theme.clone())]).unwrap();

        map.get("theme").unwrap().update(|s| s.level = 9).unwrap();
        assert_eq!(label_of(&engine, &theme).as_deref(), Some("theme"));
        assert_eq!(map.query("level = 9").unwrap().len(), 1);
    }

    #[test]
    fn test_failed_mirror_rolls_back() {
        let engine = Engine::in_memory().unwrap();
        let busy = setting("busy", 2);

        let guard = busy.borrow_mut();
        let result = engine.mirror(vec![("a", setting("x", 1)), ("b", busy.clone())]);
        drop(guard);

        assert!(result.is_err());
        assert_eq!(engine.row_count("setting").unwrap(), 0);
    }

    #[test]
    fn test_drop_releases_rows() {
        let engine = Engine::in_memory().unwrap();
        let theme = setting("dark", 1);
        let map = engine.mirror(vec![("theme", theme.clone())]).unwrap();

        drop(map);
        assert_eq!(engine.row_count("setting").unwrap(), 0);
        assert!(!engine.is_registered(theme.id()));
    }

    #[test]
    fn test_remove_clears_label_of_object_held_elsewhere() {
        let engine = Engine::in_memory().unwrap();
        let theme = setting("dark", 1);
        let mut map = engine.mirror(vec![("theme", theme.clone())]).unwrap();
        let _list = engine.mirror(vec![theme.clone()]).unwrap();

        map.remove("theme").unwrap();
        assert_eq!(engine.row_count("setting").unwrap(), 1);
        assert_eq!(label_of(&engine, &theme), None);
        assert!(map.query_key("theme").unwrap().is_empty());
    }
}
