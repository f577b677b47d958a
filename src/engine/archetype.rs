//! # Archetype tables
//!
//! An [`Archetype`] stores every entity that has exactly the same set of
//! components. Component data is column-major: one [`TypeErasedAttribute`]
//! column per component, plus an `entities` column mapping rows back to their
//! entity handle.
//!
//! ## Invariants
//! - All component columns have the same length as `entities`.
//! - Columns are kept sorted by `ComponentID`, so iteration over an archetype's
//!   components is in ascending id order.
//! - Rows are removed by swap-remove. Operations that remove a row report the
//!   entity that was moved into the vacated row so the caller can patch its
//!   location.

use std::any::Any;

use crate::engine::component::{make_empty_component, Bundle, DynamicBundle};
use crate::engine::entity::Entity;
use crate::engine::error::{ECSResult, MoveError, SpawnError};
use crate::engine::storage::{Attribute, TypeErasedAttribute};
use crate::engine::types::{ArchetypeID, ComponentID, RowID, Signature};


/// A row lifted out of an archetype during migration.
pub type RowValues = Vec<(ComponentID, Box<dyn Any + Send>)>;

/// Stores entities that share an identical component signature.
pub struct Archetype {
    archetype_id: ArchetypeID,
    signature: Signature,
    columns: Vec<(ComponentID, Box<dyn TypeErasedAttribute>)>,
    entities: Vec<Entity>,
}

impl Archetype {
    /// Creates an empty archetype with one column per component in `signature`.
    pub fn new(archetype_id: ArchetypeID, signature: Signature) -> ECSResult<Self> {
        let columns = signature
            .iterate_over_components()
            .map(|component_id| Ok((component_id, make_empty_component(component_id)?)))
            .collect::<ECSResult<Vec<_>>>()?;

        Ok(Self { archetype_id, signature, columns, entities: Vec::new() })
    }

    /// Identifier of this archetype.
    #[inline]
    pub fn archetype_id(&self) -> ArchetypeID {
        self.archetype_id
    }

    /// Component signature of this archetype.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Number of entities stored.
    #[inline]
    pub fn length(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if no entity is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities in row order.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Returns `true` if this archetype stores `component_id`.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        self.signature.has(component_id)
    }

    /// Component ids stored by this archetype, ascending.
    pub fn component_ids(&self) -> impl Iterator<Item = ComponentID> + '_ {
        self.columns.iter().map(|(component_id, _)| *component_id)
    }

    fn column_index(&self, component_id: ComponentID) -> Option<usize> {
        self.columns
            .binary_search_by_key(&component_id, |(cid, _)| *cid)
            .ok()
    }

    /// Type-erased column for `component_id`.
    pub fn column(&self, component_id: ComponentID) -> Option<&dyn TypeErasedAttribute> {
        self.column_index(component_id).map(|i| self.columns[i].1.as_ref())
    }

    /// Typed column for `component_id`.
    pub fn typed_column<T: 'static>(&self, component_id: ComponentID) -> Option<&Attribute<T>> {
        self.column(component_id)?.as_any().downcast_ref::<Attribute<T>>()
    }

    /// Typed mutable column for `component_id`.
    pub fn typed_column_mut<T: 'static>(&mut self, component_id: ComponentID) -> Option<&mut Attribute<T>> {
        let index = self.column_index(component_id)?;
        self.columns[index].1.as_any_mut().downcast_mut::<Attribute<T>>()
    }

    /// Value of `component_id` at `row`, type-erased.
    pub fn get_dyn(&self, row: RowID, component_id: ComponentID) -> Option<&dyn Any> {
        self.column(component_id)?.get_dyn(row)
    }

    /// Appends an entity built from `bundle`.
    ///
    /// Every component in the archetype signature must be present in the
    /// bundle. On failure no column is left longer than the others.
    pub fn push_bundle(&mut self, entity: Entity, bundle: &mut Bundle) -> Result<RowID, SpawnError> {
        let row = self.entities.len() as RowID;
        for index in 0..self.columns.len() {
            let component_id = self.columns[index].0;
            let pushed = match bundle.take(component_id) {
                Some(value) => self.columns[index].1.push_dyn(value).map_err(SpawnError::from),
                None => Err(SpawnError::MissingComponent { component_id }),
            };
            if let Err(error) = pushed {
                for (_, column) in &mut self.columns[..index] {
                    let _ = column.swap_remove_drop(row);
                }
                return Err(error);
            }
        }
        self.entities.push(entity);
        Ok(row)
    }

    /// Appends a row lifted from another archetype.
    pub fn push_row(&mut self, entity: Entity, mut values: RowValues) -> Result<RowID, MoveError> {
        let row = self.entities.len() as RowID;
        for (component_id, column) in &mut self.columns {
            let position = values
                .iter()
                .position(|(cid, _)| cid == component_id)
                .ok_or(MoveError::MissingColumn { component_id: *component_id })?;
            let (_, value) = values.swap_remove(position);
            column
                .push_dyn(value)
                .map_err(|source_error| MoveError::PushFailed { component_id: *component_id, source_error })?;
        }
        self.entities.push(entity);
        Ok(row)
    }

    /// Swap-removes `row`, dropping its values.
    ///
    /// Returns the entity that now occupies `row`, if any.
    pub fn swap_remove(&mut self, row: RowID) -> Result<Option<Entity>, MoveError> {
        for (component_id, column) in &mut self.columns {
            column
                .swap_remove_drop(row)
                .map_err(|source_error| MoveError::SwapRemoveError { component_id: *component_id, source_error })?;
        }
        Ok(self.remove_entity_row(row))
    }

    /// Swap-removes `row`, returning its values for migration.
    ///
    /// Returns the lifted values and the entity that now occupies `row`, if any.
    pub fn take_row(&mut self, row: RowID) -> Result<(RowValues, Option<Entity>), MoveError> {
        let mut values = Vec::with_capacity(self.columns.len());
        for (component_id, column) in &mut self.columns {
            let value = column
                .swap_remove_dyn(row)
                .map_err(|source_error| MoveError::SwapRemoveError { component_id: *component_id, source_error })?;
            values.push((*component_id, value));
        }
        Ok((values, self.remove_entity_row(row)))
    }

    fn remove_entity_row(&mut self, row: RowID) -> Option<Entity> {
        let row = row as usize;
        if row >= self.entities.len() {
            return None;
        }
        self.entities.swap_remove(row);
        self.entities.get(row).copied()
    }
}
