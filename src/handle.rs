//! Intercepting handles.
//!
//! A [`Handle`] pairs a live object with the engine that mirrors it. Reads go
//! straight to the object; writes go through [`Handle::update`], which applies
//! the change and then re-syncs the object (or defers the sync inside a batch).
//! Handles never copy the object they point at.

use crate::engine::Engine;
use crate::models::{Live, LiveCell, Mirrorable, ObjectId, Tracked, Value};
use crate::Result;
use std::any::TypeId;
use std::cell::Ref;
use std::fmt;
use std::rc::Rc;

/// Typed handle to a mirrored object.
///
/// Equality compares the underlying objects, not the handle instances.
///
/// # Examples
///
/// ```rust
/// use mirage::{Engine, Handle, Live, mirrorable};
///
/// struct Account {
///     owner: String,
///     balance: i64,
/// }
///
/// mirrorable!(Account { owner, balance });
///
/// let engine = Engine::in_memory()?;
/// let account = Live::new(Account { owner: "ann".into(), balance: 10 });
/// engine.sync(&account, None)?;
///
/// let handle = Handle::new(account.clone(), &engine);
/// handle.update(|a| a.balance += 5)?;
///
/// assert_eq!(account.borrow().balance, 15);
/// assert!(handle.is(&account));
/// # Ok::<(), mirage::Error>(())
/// ```
pub struct Handle<T> {
    target: Live<T>,
    engine: Engine,
}

impl<T> Handle<T> {
    /// Wraps a live object for the given engine.
    ///
    /// Writes through the handle sync the object into `engine`, indexing it
    /// on the first write if needed. Objects whose rows were removed stay
    /// out of the index until they are synced or mirrored again.
    #[must_use]
    pub fn new(target: Live<T>, engine: &Engine) -> Self {
        Self {
            target,
            engine: engine.clone(),
        }
    }

    /// Borrows the underlying object for reading.
    ///
    /// # Panics
    ///
    /// Panics if the object is currently mutably borrowed.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, T> {
        self.target.borrow()
    }

    /// Reads from the underlying object.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.target.borrow())
    }

    /// The wrapped object.
    #[must_use]
    pub const fn target(&self) -> &Live<T> {
        &self.target
    }

    /// Unwraps the handle.
    #[must_use]
    pub fn into_target(self) -> Live<T> {
        self.target
    }

    /// Identity token of the wrapped object.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.target.id()
    }

    /// The engine writes are synced to.
    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Returns `true` if both handles wrap the same object.
    #[must_use]
    pub fn same_object(&self, other: &Self) -> bool {
        Live::ptr_eq(&self.target, &other.target)
    }

    /// Returns `true` if this handle wraps `object`.
    #[must_use]
    pub fn is(&self, object: &Live<T>) -> bool {
        Live::ptr_eq(&self.target, object)
    }
}

impl<T: Mirrorable> Handle<T> {
    /// Applies a write to the object, then syncs it.
    ///
    /// Inside a batch scope the sync is deferred until the scope ends. The
    /// object's stored key label is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is already borrowed or the sync fails.
    /// The write itself has been applied when a sync error is returned.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let output = {
            let mut value = self.target.try_borrow_mut()?;
            f(&mut value)
        };
        self.engine.write_through(&self.target.tracked())?;
        Ok(output)
    }

    /// Replaces the whole object value, returning the old one.
    ///
    /// # Errors
    ///
    /// Same as [`Handle::update`].
    pub fn replace(&self, value: T) -> Result<T> {
        self.update(|current| std::mem::replace(current, value))
    }

    /// Current attribute values of the object.
    #[must_use]
    pub fn attributes(&self) -> Vec<(&'static str, Value)> {
        self.target.borrow().attributes()
    }

    /// Converts to a type-erased handle.
    #[must_use]
    pub fn erase(&self) -> AnyHandle {
        AnyHandle::new(self.target.tracked(), self.engine.clone())
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            engine: self.engine.clone(),
        }
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.same_object(other)
    }
}

impl<T> Eq for Handle<T> {}

impl<T: fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Handle whose object type is only known at runtime.
///
/// Query resolution yields these; [`AnyHandle::downcast`] recovers the typed
/// handle.
#[derive(Clone)]
pub struct AnyHandle {
    object: Rc<dyn Tracked>,
    engine: Engine,
}

impl AnyHandle {
    pub(crate) fn new(object: Rc<dyn Tracked>, engine: Engine) -> Self {
        Self { object, engine }
    }

    /// Identity token of the object.
    #[must_use]
    pub fn object_id(&self) -> ObjectId {
        self.object.object_id()
    }

    /// Mirrored type name of the object.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.object.type_name()
    }

    /// Returns `true` if the object is a `T`.
    #[must_use]
    pub fn is_type<T: Mirrorable>(&self) -> bool {
        self.object.type_key() == TypeId::of::<T>()
    }

    /// Returns `true` if this handle points at `object`.
    #[must_use]
    pub fn is<T: Mirrorable>(&self, object: &Live<T>) -> bool {
        self.object.object_id() == object.id()
    }

    /// Recovers the typed handle, or `None` if the object is not a `T`.
    #[must_use]
    pub fn downcast<T: Mirrorable>(&self) -> Option<Handle<T>> {
        let cell = Rc::clone(&self.object)
            .into_any()
            .downcast::<LiveCell<T>>()
            .ok()?;
        Some(Handle {
            target: Live::from_cell(cell),
            engine: self.engine.clone(),
        })
    }

    /// Current attribute values of the object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is mutably borrowed.
    pub fn attributes(&self) -> Result<Vec<(&'static str, Value)>> {
        self.object.attributes()
    }

    /// The engine the handle was resolved through.
    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }
}

impl PartialEq for AnyHandle {
    fn eq(&self, other: &Self) -> bool {
        self.object_id() == other.object_id()
    }
}

impl Eq for AnyHandle {}

impl fmt::Debug for AnyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyHandle")
            .field("object_id", &self.object_id())
            .field("type_name", &self.type_name())
            .finish_non_exhaustive()
    }
}
