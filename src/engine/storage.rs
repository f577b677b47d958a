//! Component column storage.
//!
//! Every archetype stores one column per component type. Columns are typed
//! ([`Attribute<T>`]) but archetypes only ever hold them behind the object-safe
//! [`TypeErasedAttribute`] trait, which exposes the small set of row-level
//! operations structural changes need: push a boxed value, swap-remove a row
//! (keeping or dropping the value), and read a row without knowing its type.
//!
//! ## Invariants
//! - All columns of an archetype have identical lengths; row `r` of every
//!   column belongs to the same entity.
//! - Removal is always swap-remove; the caller is responsible for patching the
//!   location of the entity that was moved into the vacated row.
//! - Zero-sized element types are supported; their columns carry no bytes but
//!   still track length.

use std::any::{type_name, Any, TypeId};

use crate::engine::error::{AttributeError, TypeMismatchError};
use crate::engine::types::RowID;


/// Object-safe interface over a typed component column.
pub trait TypeErasedAttribute: Any + Send + Sync {
    /// Number of rows stored.
    fn length(&self) -> usize;

    /// Returns an immutable `&dyn Any` reference to this column.
    fn as_any(&self) -> &dyn Any;

    /// Returns a mutable `&mut dyn Any` reference to this column.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// `TypeId` of the element type stored by this column.
    fn element_type_id(&self) -> TypeId;

    /// Human-readable element type name.
    fn element_type_name(&self) -> &'static str;

    /// Appends a boxed value and returns its row.
    ///
    /// Fails with [`AttributeError::TypeMismatch`] if the dynamic type of
    /// `value` is not the column's element type.
    fn push_dyn(&mut self, value: Box<dyn Any + Send>) -> Result<RowID, AttributeError>;

    /// Swap-removes `row` and returns the removed value boxed.
    fn swap_remove_dyn(&mut self, row: RowID) -> Result<Box<dyn Any + Send>, AttributeError>;

    /// Swap-removes `row` and drops the value in place.
    fn swap_remove_drop(&mut self, row: RowID) -> Result<(), AttributeError>;

    /// Returns the value at `row` as `&dyn Any`.
    fn get_dyn(&self, row: RowID) -> Option<&dyn Any>;
}

/// Dense column of `T` values.
#[derive(Debug)]
pub struct Attribute<T> {
    values: Vec<T>,
}

impl<T> Default for Attribute<T> {
    fn default() -> Self {
        Self { values: Vec::new() }
    }
}

impl<T> Attribute<T> {
    /// Number of rows stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the column holds no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Appends `value` and returns its row.
    #[inline]
    pub fn push(&mut self, value: T) -> RowID {
        self.values.push(value);
        (self.values.len() - 1) as RowID
    }

    /// Returns the value at `row`.
    #[inline]
    pub fn get(&self, row: RowID) -> Option<&T> {
        self.values.get(row as usize)
    }

    /// Returns the value at `row` mutably.
    #[inline]
    pub fn get_mut(&mut self, row: RowID) -> Option<&mut T> {
        self.values.get_mut(row as usize)
    }

    /// Swap-removes `row`, returning the removed value.
    pub fn swap_remove(&mut self, row: RowID) -> Result<T, AttributeError> {
        if (row as usize) >= self.values.len() {
            return Err(AttributeError::Position { row, length: self.values.len() });
        }
        Ok(self.values.swap_remove(row as usize))
    }

    /// Iterates over all stored values in row order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.values.iter()
    }

    /// Iterates mutably over all stored values in row order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.values.iter_mut()
    }
}

impl<T: 'static + Send + Sync> TypeErasedAttribute for Attribute<T> {
    fn length(&self) -> usize { self.values.len() }

    fn as_any(&self) -> &dyn Any { self }
    fn as_any_mut(&mut self) -> &mut dyn Any { self }

    fn element_type_id(&self) -> TypeId { TypeId::of::<T>() }
    fn element_type_name(&self) -> &'static str { type_name::<T>() }

    fn push_dyn(&mut self, value: Box<dyn Any + Send>) -> Result<RowID, AttributeError> {
        let actual = (*value).type_id();
        match value.downcast::<T>() {
            Ok(value) => Ok(self.push(*value)),
            Err(_) => Err(TypeMismatchError {
                expected: TypeId::of::<T>(),
                expected_name: type_name::<T>(),
                actual,
            }
            .into()),
        }
    }

    fn swap_remove_dyn(&mut self, row: RowID) -> Result<Box<dyn Any + Send>, AttributeError> {
        Ok(Box::new(self.swap_remove(row)?))
    }

    fn swap_remove_drop(&mut self, row: RowID) -> Result<(), AttributeError> {
        self.swap_remove(row).map(drop)
    }

    fn get_dyn(&self, row: RowID) -> Option<&dyn Any> {
        self.get(row).map(|value| value as &dyn Any)
    }
}
