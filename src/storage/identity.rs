//! Weak identity registry.
//!
//! Maps identity tokens to the live objects they name without owning them.
//! An entry whose object has been dropped resolves to a miss; it stays in the
//! registry (with its table name) until the engine purges it.
//!
//! Each entry also counts the collections the object belongs to. Rows are
//! deleted when the last membership is released.

use crate::models::{ObjectId, Tracked};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// One registered object.
pub(crate) struct IdentityEntry {
    object: Weak<dyn Tracked>,
    table: String,
    key_label: Option<String>,
    members: usize,
}

impl IdentityEntry {
    pub(crate) fn table(&self) -> &str {
        &self.table
    }

    pub(crate) fn key_label(&self) -> Option<&str> {
        self.key_label.as_deref()
    }

    pub(crate) fn object(&self) -> &Weak<dyn Tracked> {
        &self.object
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.object.strong_count() > 0
    }
}

/// Registry of the objects currently mirrored by one engine.
#[derive(Default)]
pub struct IdentityRegistry {
    entries: HashMap<ObjectId, IdentityEntry>,
}

impl IdentityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or re-registers) an object under its token.
    ///
    /// Re-registering keeps the membership count.
    pub(crate) fn put(&mut self, object: &Rc<dyn Tracked>, table: &str, key_label: Option<String>) {
        let id = object.object_id();
        let members = self.entries.get(&id).map_or(0, |entry| entry.members);
        self.entries.insert(
            id,
            IdentityEntry {
                object: Rc::downgrade(object),
                table: table.to_string(),
                key_label,
                members,
            },
        );
    }

    /// Counts one more collection holding the object.
    pub(crate) fn join(&mut self, id: ObjectId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.members += 1;
        }
    }

    /// Counts one collection fewer, never going below zero.
    pub(crate) fn leave(&mut self, id: ObjectId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.members = entry.members.saturating_sub(1);
        }
    }

    /// Number of collections holding the object, or `None` if unregistered.
    #[must_use]
    pub fn members(&self, id: ObjectId) -> Option<usize> {
        self.entries.get(&id).map(|entry| entry.members)
    }

    pub(crate) fn clear_key_label(&mut self, id: ObjectId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.key_label = None;
        }
    }

    /// Resolves a token to its object, or `None` if it is unknown or reclaimed.
    pub(crate) fn get(&self, id: ObjectId) -> Option<Rc<dyn Tracked>> {
        self.entries.get(&id).and_then(|entry| entry.object.upgrade())
    }

    pub(crate) fn entry(&self, id: ObjectId) -> Option<&IdentityEntry> {
        self.entries.get(&id)
    }

    /// Forgets a token.
    pub(crate) fn remove(&mut self, id: ObjectId) -> Option<IdentityEntry> {
        self.entries.remove(&id)
    }

    /// Tokens whose objects have been reclaimed, with their tables.
    #[must_use]
    pub fn reclaimed(&self) -> Vec<(ObjectId, String)> {
        let mut dead: Vec<(ObjectId, String)> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_alive())
            .map(|(id, entry)| (*id, entry.table.clone()))
            .collect();
        dead.sort_unstable_by_key(|(id, _)| *id);
        dead
    }

    /// Returns `true` if any registered object has been reclaimed.
    #[must_use]
    pub fn has_reclaimed(&self) -> bool {
        self.entries.values().any(|entry| !entry.is_alive())
    }

    /// Returns `true` if the token is registered and its object is alive.
    #[must_use]
    pub fn is_live(&self, id: ObjectId) -> bool {
        self.entries.get(&id).is_some_and(IdentityEntry::is_alive)
    }

    /// Returns `true` if the token is registered, alive or not.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of registered tokens, including reclaimed ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("entries", &self.entries.len())
            .field("reclaimed", &self.reclaimed().len())
            .finish()
    }
}
