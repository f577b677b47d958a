//! # Event type registry
//!
//! The catalogue of every record type that carries the [`Event`] capability.
//!
//! ## Design
//! The registry is built once at startup with [`EventTypeRegistryBuilder`]
//! and is read-only afterwards; it is shared as `Arc<EventTypeRegistry>` by the
//! bus and the hook system. Registering an event also registers it as a
//! component.
//!
//! Dispatch and type-erased posting need to act on a record without knowing
//! its Rust type. At registration the registry captures, per type, two
//! monomorphized functions that do the typed work behind a uniform signature:
//! one builds a spawn bundle from a `&dyn Any`, the other copies a stored
//! record out for dispatch.
//!
//! ## Invariants
//! - [`EventTypeRegistry::query`] is the single filter used both to destroy
//!   last cycle's events and to find events to dispatch.
//! - Each registered event maps to exactly one component id and back.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::mem::size_of;

use crate::engine::component::{register_component, Bundle};
use crate::engine::error::ECSResult;
use crate::engine::types::{ComponentID, QuerySignature};
use crate::events::event::{Event, EventTypeId};


type BundleThunk = fn(&dyn Any, ComponentID) -> Option<Bundle>;
type CopyThunk = fn(&dyn Any) -> Option<Box<dyn Any + Send>>;

fn bundle_of<E: Event>(value: &dyn Any, component_id: ComponentID) -> Option<Bundle> {
    let event = value.downcast_ref::<E>()?;
    Some(Bundle::single(component_id, event.clone()))
}

fn copy_of<E: Event>(value: &dyn Any) -> Option<Box<dyn Any + Send>> {
    let event = value.downcast_ref::<E>()?;
    Some(Box::new(event.clone()))
}

/// Registration record of one event type.
#[derive(Clone, Copy)]
pub struct EventTypeInfo {
    id: EventTypeId,
    component_id: ComponentID,
    zero_sized: bool,
    bundle: BundleThunk,
    copy: CopyThunk,
}

impl EventTypeInfo {
    /// Event type identifier.
    pub fn id(&self) -> EventTypeId {
        self.id
    }

    /// Component id the record is stored under.
    pub fn component_id(&self) -> ComponentID {
        self.component_id
    }

    /// Returns `true` for pure signals.
    pub fn is_zero_sized(&self) -> bool {
        self.zero_sized
    }

    /// Builds a single-component bundle from a type-erased record.
    ///
    /// Returns `None` if `value` is not of this event type.
    pub fn bundle_from(&self, value: &dyn Any) -> Option<Bundle> {
        (self.bundle)(value, self.component_id)
    }

    /// Copies a type-erased record out of storage.
    pub fn copy_payload(&self, value: &dyn Any) -> Option<Box<dyn Any + Send>> {
        (self.copy)(value)
    }
}

impl std::fmt::Debug for EventTypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTypeInfo")
            .field("id", &self.id)
            .field("component_id", &self.component_id)
            .field("zero_sized", &self.zero_sized)
            .finish_non_exhaustive()
    }
}

/// Immutable catalogue of registered event types.
#[derive(Debug, Default)]
pub struct EventTypeRegistry {
    types: Vec<EventTypeInfo>,
    ids: Vec<EventTypeId>,
    by_type: HashMap<TypeId, usize>,
    by_component: HashMap<ComponentID, usize>,
    query: QuerySignature,
}

impl EventTypeRegistry {
    /// Starts building a registry.
    pub fn builder() -> EventTypeRegistryBuilder {
        EventTypeRegistryBuilder::default()
    }

    /// Every registered event type, in registration order.
    pub fn all_event_types(&self) -> &[EventTypeId] {
        &self.ids
    }

    /// Filter matching any entity carrying any registered event.
    pub fn query(&self) -> &QuerySignature {
        &self.query
    }

    /// Number of registered event types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if no event type is registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Returns `true` if `id` is registered.
    pub fn contains(&self, id: EventTypeId) -> bool {
        self.by_type.contains_key(&id.type_id())
    }

    /// Registration record for `id`.
    pub fn info(&self, id: EventTypeId) -> Option<&EventTypeInfo> {
        self.info_by_type_id(id.type_id())
    }

    /// Registration record for a runtime `TypeId`.
    pub fn info_by_type_id(&self, type_id: TypeId) -> Option<&EventTypeInfo> {
        self.by_type.get(&type_id).map(|&index| &self.types[index])
    }

    /// Registration record of the event stored under `component_id`.
    pub fn info_by_component(&self, component_id: ComponentID) -> Option<&EventTypeInfo> {
        self.by_component.get(&component_id).map(|&index| &self.types[index])
    }
}

/// Builder for [`EventTypeRegistry`].
#[derive(Debug, Default)]
pub struct EventTypeRegistryBuilder {
    registry: EventTypeRegistry,
}

impl EventTypeRegistryBuilder {
    /// Registers event type `E` (and its component).
    ///
    /// Registering the same type twice is a no-op.
    pub fn with<E: Event>(mut self) -> ECSResult<Self> {
        let id = EventTypeId::of::<E>();
        if self.registry.contains(id) {
            return Ok(self);
        }

        let component_id = register_component::<E>()?;
        let registry = &mut self.registry;
        let index = registry.types.len();
        registry.types.push(EventTypeInfo {
            id,
            component_id,
            zero_sized: size_of::<E>() == 0,
            bundle: bundle_of::<E>,
            copy: copy_of::<E>,
        });
        registry.ids.push(id);
        registry.by_type.insert(id.type_id(), index);
        registry.by_component.insert(component_id, index);
        registry.query.any.set(component_id);
        tracing::debug!(event = %id, component_id, "event type registered");
        Ok(self)
    }

    /// Finishes the registry.
    pub fn build(self) -> EventTypeRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct RegistryPing;
    impl Event for RegistryPing {}

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct RegistryScore(u32);
    impl Event for RegistryScore {}

    #[test]
    fn registers_types_once_and_builds_any_query() {
        let registry = EventTypeRegistry::builder()
            .with::<RegistryPing>()
            .and_then(|b| b.with::<RegistryScore>())
            .and_then(|b| b.with::<RegistryPing>())
            .unwrap()
            .build();

        assert_eq!(registry.len(), 2);
        let ping = registry.info(EventTypeId::of::<RegistryPing>()).unwrap();
        let score = registry.info(EventTypeId::of::<RegistryScore>()).unwrap();
        assert!(ping.is_zero_sized());
        assert!(!score.is_zero_sized());
        assert!(registry.query().any.has(ping.component_id()));
        assert!(registry.query().any.has(score.component_id()));
        assert_eq!(
            registry.info_by_component(score.component_id()).map(|info| info.id()),
            Some(EventTypeId::of::<RegistryScore>())
        );
    }

    #[test]
    fn thunks_reject_foreign_values() {
        let registry = EventTypeRegistry::builder().with::<RegistryScore>().unwrap().build();
        let info = registry.info(EventTypeId::of::<RegistryScore>()).unwrap();

        assert!(info.bundle_from(&RegistryScore(3)).is_some());
        assert!(info.bundle_from(&3u32).is_none());
        let copy = info.copy_payload(&RegistryScore(9)).unwrap();
        assert_eq!(copy.downcast_ref::<RegistryScore>(), Some(&RegistryScore(9)));
    }
}
