//! Live objects and their identity tokens.

use super::Value;
use crate::{Error, Result};
use std::any::{Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of identity tokens. Starts at 1 so that 0 never names an object.
static NEXT_OBJECT_ID: AtomicI64 = AtomicI64::new(1);

/// Process-unique identity of one live object instance.
///
/// Tokens are allocated when a value is wrapped in [`Live`] and are never
/// reused, so two tokens are equal iff they name the same instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(i64);

impl ObjectId {
    fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates an ID from the raw value stored in the `object_id` column.
    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw value stored in the index.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Self::Integer(id.0)
    }
}

/// A type whose values can be mirrored into the index.
///
/// Implementations list the attributes in declaration order. The first value
/// of a type that reaches an engine fixes that type's column set; later values
/// are stored against those columns only.
///
/// Most types use the [`mirrorable!`](crate::mirrorable) macro instead of
/// implementing this by hand.
pub trait Mirrorable: 'static {
    /// Name the backing table is derived from (lower-cased).
    ///
    /// Defaults to the unqualified Rust type name.
    fn type_name() -> &'static str
    where
        Self: Sized,
    {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Current attribute values, in declaration order.
    fn attributes(&self) -> Vec<(&'static str, Value)>;
}

/// Strips the module path and generic arguments from a type path.
///
/// # Examples
///
/// ```
/// use mirage::models::short_type_name;
///
/// assert_eq!(short_type_name("game::model::Player"), "Player");
/// assert_eq!(short_type_name("alloc::vec::Vec<u8>"), "Vec");
/// assert_eq!(short_type_name("Item"), "Item");
/// ```
#[must_use]
pub fn short_type_name(path: &'static str) -> &'static str {
    let base = path.split('<').next().unwrap_or(path);
    base.rsplit("::").next().unwrap_or(base)
}

/// Implements [`Mirrorable`] for a struct from its field list.
///
/// Fields are mirrored in the order given and must be `Clone` and convertible
/// into [`Value`](crate::Value). The table name is the struct name unless an
/// explicit name follows `as`.
///
/// ```
/// use mirage::mirrorable;
///
/// struct Item {
///     name: String,
///     owner: i64,
/// }
///
/// mirrorable!(Item { name, owner });
///
/// struct Weapon {
///     damage: f64,
/// }
///
/// mirrorable!(Weapon as "arsenal" { damage });
/// ```
#[macro_export]
macro_rules! mirrorable {
    ($ty:ident { $($field:ident),+ $(,)? }) => {
        $crate::mirrorable!(@impl $ty, ::std::stringify!($ty), $($field),+);
    };
    ($ty:ident as $name:literal { $($field:ident),+ $(,)? }) => {
        $crate::mirrorable!(@impl $ty, $name, $($field),+);
    };
    (@impl $ty:ident, $name:expr, $($field:ident),+) => {
        impl $crate::Mirrorable for $ty {
            fn type_name() -> &'static str {
                $name
            }

            fn attributes(&self) -> ::std::vec::Vec<(&'static str, $crate::Value)> {
                ::std::vec![
                    $((
                        ::std::stringify!($field),
                        $crate::Value::from(::std::clone::Clone::clone(&self.$field)),
                    )),+
                ]
            }
        }
    };
}

/// Shared storage behind a [`Live`] value.
pub(crate) struct LiveCell<T> {
    id: ObjectId,
    value: RefCell<T>,
}

/// An application-owned object that can be mirrored.
///
/// `Live` is a cheap, reference-counted pointer: clones share the same object
/// and the same [`ObjectId`]. Engines only ever keep weak references, so the
/// object lives exactly as long as the application (or a collection) holds a
/// `Live` or [`Handle`](crate::Handle) to it.
///
/// Writes made through [`Live::borrow_mut`] bypass synchronization; use a
/// [`Handle`](crate::Handle) or call [`Engine::sync`](crate::Engine::sync)
/// afterwards.
pub struct Live<T>(Rc<LiveCell<T>>);

impl<T> Live<T> {
    /// Wraps a value, assigning it a fresh identity.
    pub fn new(value: T) -> Self {
        Self(Rc::new(LiveCell {
            id: ObjectId::next(),
            value: RefCell::new(value),
        }))
    }

    /// Returns this object's identity token.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    /// Borrows the object for reading.
    ///
    /// # Panics
    ///
    /// Panics if the object is currently mutably borrowed.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.value.borrow()
    }

    /// Borrows the object for writing without synchronizing the index.
    ///
    /// # Panics
    ///
    /// Panics if the object is currently borrowed.
    #[must_use]
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.value.borrow_mut()
    }

    /// Returns `true` if both pointers refer to the same object instance.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Number of strong references (application, collections and handles).
    #[must_use]
    pub fn strong_count(this: &Self) -> usize {
        Rc::strong_count(&this.0)
    }

    pub(crate) fn try_borrow_mut(&self) -> Result<RefMut<'_, T>> {
        self.0
            .value
            .try_borrow_mut()
            .map_err(|e| Error::OperationFailed {
                operation: "borrow_object".to_string(),
                cause: format!("object {} is already borrowed: {e}", self.0.id),
            })
    }

    pub(crate) const fn from_cell(cell: Rc<LiveCell<T>>) -> Self {
        Self(cell)
    }
}

impl<T: Mirrorable> Live<T> {
    /// Type-erased view used by the engine's registries.
    pub(crate) fn tracked(&self) -> Rc<dyn Tracked> {
        Rc::clone(&self.0) as Rc<dyn Tracked>
    }
}

impl<T> Clone for Live<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: fmt::Debug> fmt::Debug for Live<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.value.try_borrow() {
            Ok(value) => f
                .debug_tuple("Live")
                .field(&self.0.id)
                .field(&*value)
                .finish(),
            Err(_) => f
                .debug_tuple("Live")
                .field(&self.0.id)
                .field(&"<borrowed>")
                .finish(),
        }
    }
}

/// Type-erased access to a live object, independent of its Rust type.
pub(crate) trait Tracked: Any {
    fn object_id(&self) -> ObjectId;

    /// `TypeId` of the mirrored type (not of the cell).
    fn type_key(&self) -> TypeId;

    fn type_name(&self) -> &'static str;

    fn attributes(&self) -> Result<Vec<(&'static str, Value)>>;

    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<T: Mirrorable> Tracked for LiveCell<T> {
    fn object_id(&self) -> ObjectId {
        self.id
    }

    fn type_key(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        T::type_name()
    }

    fn attributes(&self) -> Result<Vec<(&'static str, Value)>> {
        let value = self
            .value
            .try_borrow()
            .map_err(|e| Error::OperationFailed {
                operation: "read_attributes".to_string(),
                cause: format!("object {} is mutably borrowed: {e}", self.id),
            })?;
        Ok(value.attributes())
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Point {
        x: i64,
        y: i64,
    }

    crate::mirrorable!(Point { x, y });

    struct Renamed {
        label: String,
    }

    crate::mirrorable!(Renamed as "custom_name" { label });

    #[test]
    fn test_ids_are_unique_and_shared_by_clones() {
        let a = Live::new(Point { x: 1, y: 2 });
        let b = Live::new(Point { x: 1, y: 2 });
        let a2 = a.clone();

        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a2.id());
        assert!(Live::ptr_eq(&a, &a2));
        assert!(!Live::ptr_eq(&a, &b));
    }

    #[test]
    fn test_macro_preserves_declaration_order() {
        let p = Point { x: 3, y: 4 };
        let attrs = p.attributes();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0], ("x", Value::Integer(3)));
        assert_eq!(attrs[1], ("y", Value::Integer(4)));
        assert_eq!(Point::type_name(), "Point");
    }

    #[test]
    fn test_macro_custom_table_name() {
        assert_eq!(Renamed::type_name(), "custom_name");
        let r = Renamed {
            label: "x".to_string(),
        };
        assert_eq!(r.attributes()[0].1, Value::Text("x".to_string()));
    }

    #[test]
    fn test_tracked_view_reads_current_values() {
        let live = Live::new(Point { x: 1, y: 1 });
        let tracked = live.tracked();
        live.borrow_mut().x = 9;

        let attrs = tracked.attributes().unwrap();
        assert_eq!(attrs[0].1, Value::Integer(9));
        assert_eq!(tracked.object_id(), live.id());
        assert_eq!(tracked.type_name(), "Point");
        assert_eq!(tracked.type_key(), TypeId::of::<Point>());
    }

    #[test]
    fn test_attributes_while_mutably_borrowed_is_an_error() {
        let live = Live::new(Point { x: 1, y: 1 });
        let tracked = live.tracked();
        let _guard = live.borrow_mut();
        assert!(matches!(
            tracked.attributes(),
            Err(Error::OperationFailed { ref operation, .. }) if operation == "read_attributes"
        ));
    }

    #[test]
    fn test_strong_count_tracks_clones() {
        let live = Live::new(Point { x: 0, y: 0 });
        assert_eq!(Live::strong_count(&live), 1);
        let tracked = live.tracked();
        assert_eq!(Live::strong_count(&live), 2);
        drop(tracked);
        assert_eq!(Live::strong_count(&live), 1);
    }
}
