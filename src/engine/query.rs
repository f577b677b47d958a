//! Builder-style query construction.
//!
//! A [`QueryBuilder`] accumulates component requirements into a
//! [`QuerySignature`] and the matching [`AccessSets`], then produces an
//! immutable [`Query`] that can be evaluated against
//! [`ECSData`](crate::engine::manager::ECSData).
//!
//! ```ignore
//! let query = QueryBuilder::new()
//!     .read::<Position>()?
//!     .write::<Velocity>()?
//!     .without::<Frozen>()?
//!     .build();
//!
//! data.for_each::<Position>(&query, |entity, position| { /* ... */ })?;
//! ```
//!
//! Event dispatch relies on the *any of* mode: one query covering every
//! registered event shape (`any_of`).

use crate::engine::component::component_id_of;
use crate::engine::error::ECSResult;
use crate::engine::types::{set_all, set_without, AccessSets, ComponentID, QuerySignature};


/// Builder for [`Query`].
#[derive(Clone, Debug, Default)]
pub struct QueryBuilder {
    signature: QuerySignature,
    access: AccessSets,
}

impl QueryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires component `T` and records it as read.
    pub fn read<T: 'static + Send + Sync>(mut self) -> ECSResult<Self> {
        set_all::<T>(&mut self.signature)?;
        self.access.read.set(component_id_of::<T>()?);
        Ok(self)
    }

    /// Requires component `T` and records it as written.
    pub fn write<T: 'static + Send + Sync>(mut self) -> ECSResult<Self> {
        set_all::<T>(&mut self.signature)?;
        self.access.write.set(component_id_of::<T>()?);
        Ok(self)
    }

    /// Requires a component by id without recording access.
    pub fn with_id(mut self, component_id: ComponentID) -> Self {
        self.signature.all.set(component_id);
        self
    }

    /// Requires at least one of `component_ids`; all of them count as read.
    pub fn any_of(mut self, component_ids: &[ComponentID]) -> Self {
        for &component_id in component_ids {
            self.signature.any.set(component_id);
            self.access.read.set(component_id);
        }
        self
    }

    /// Excludes archetypes containing component `T`.
    pub fn without<T: 'static + Send + Sync>(mut self) -> ECSResult<Self> {
        set_without::<T>(&mut self.signature)?;
        Ok(self)
    }

    /// Finishes the query.
    pub fn build(self) -> Query {
        Query { signature: self.signature, access: self.access }
    }
}

/// Immutable archetype filter plus the access it implies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    signature: QuerySignature,
    access: AccessSets,
}

impl Query {
    /// Archetype filter.
    pub fn signature(&self) -> &QuerySignature {
        &self.signature
    }

    /// Component access declared by the query, for use in `System::access`.
    pub fn access(&self) -> &AccessSets {
        &self.access
    }
}

impl From<QuerySignature> for Query {
    fn from(signature: QuerySignature) -> Self {
        let mut access = AccessSets::default();
        for component_id in signature.all.iterate_over_components().chain(signature.any.iterate_over_components()) {
            access.read.set(component_id);
        }
        Self { signature, access }
    }
}
