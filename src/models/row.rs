//! Shapes produced by resolving query rows.

use super::{Mirrorable, ObjectId, Value};
use crate::handle::{AnyHandle, Handle};

/// One resolved column of a query row.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// An identity-pointer column whose object is still alive.
    Object(AnyHandle),
    /// An identity-pointer column whose object has been reclaimed.
    ///
    /// Carries the raw token that was stored in the index.
    Reclaimed(ObjectId),
    /// Any other column, passed through unchanged.
    Scalar(Value),
}

impl Resolved {
    /// Returns the handle if this slot resolved to a live object.
    #[must_use]
    pub const fn as_object(&self) -> Option<&AnyHandle> {
        match self {
            Self::Object(handle) => Some(handle),
            _ => None,
        }
    }

    /// Downcasts the resolved object to a typed handle.
    #[must_use]
    pub fn to_handle<T: Mirrorable>(&self) -> Option<Handle<T>> {
        self.as_object().and_then(AnyHandle::downcast)
    }

    /// Returns the scalar value, if this slot is not a pointer.
    #[must_use]
    pub const fn as_scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the scalar as an integer.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Scalar(Value::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    /// Returns the scalar as a float, widening integers.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Scalar(Value::Real(x)) => Some(*x),
            Self::Scalar(Value::Integer(n)) => Some(*n as f64),
            _ => None,
        }
    }

    /// Returns the scalar as text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Scalar(Value::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` for a pointer whose object no longer exists.
    #[must_use]
    pub const fn is_reclaimed(&self) -> bool {
        matches!(self, Self::Reclaimed(_))
    }
}

/// A resolved query row.
///
/// Single-column rows collapse to their only value; anything wider keeps the
/// query's column order as a tuple.
#[derive(Debug, Clone)]
pub enum QueryRow {
    /// The row had exactly one column.
    Single(Resolved),
    /// The row had several columns.
    Tuple(Vec<Resolved>),
}

impl QueryRow {
    pub(crate) fn from_columns(mut columns: Vec<Resolved>) -> Self {
        if columns.len() == 1 {
            if let Some(only) = columns.pop() {
                return Self::Single(only);
            }
        }
        Self::Tuple(columns)
    }

    /// Number of columns in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Tuple(values) => values.len(),
        }
    }

    /// Returns `true` for a zero-column row.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the column at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Resolved> {
        match self {
            Self::Single(value) if index == 0 => Some(value),
            Self::Single(_) => None,
            Self::Tuple(values) => values.get(index),
        }
    }

    /// Returns the value of a single-column row.
    #[must_use]
    pub const fn as_single(&self) -> Option<&Resolved> {
        match self {
            Self::Single(value) => Some(value),
            Self::Tuple(_) => None,
        }
    }

    /// Returns the columns of a multi-column row.
    #[must_use]
    pub fn as_tuple(&self) -> Option<&[Resolved]> {
        match self {
            Self::Single(_) => None,
            Self::Tuple(values) => Some(values),
        }
    }

    /// Consumes the row into its columns, whatever its shape.
    #[must_use]
    pub fn into_columns(self) -> Vec<Resolved> {
        match self {
            Self::Single(value) => vec![value],
            Self::Tuple(values) => values,
        }
    }
}
