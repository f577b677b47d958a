//! # Hook dispatch
//!
//! [`HookSystem`] delivers every live event entity to the hooks registered for
//! its event type, once per cycle.
//!
//! ## Dispatch
//! While dispatching (state [`DispatchState::Dispatching`]):
//! 1. Query every entity carrying any registered event type, using the same
//!    filter the destroyer uses.
//! 2. Take the first event-typed component of each entity (component ids
//!    ascending). Entities with none are skipped.
//! 3. Skip silently if no hook is registered for that type.
//! 4. Zero-sized events are delivered as [`EventPayload::Empty`] without
//!    reading the store; other records are copied out of the store.
//! 5. Invoke the hooks on the dispatching thread, in registration order.
//!
//! Records and hooks are copied out while the store and table locks are
//! held; hooks run after both are released, so a hook may post events or
//! register hooks. Registrations made during dispatch apply from the next
//! dispatch on.
//!
//! ## Skipping
//! The system only runs while at least one event entity exists.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::engine::error::ECSResult;
use crate::engine::manager::{ECSData, ECSReference};
use crate::engine::systems::System;
use crate::engine::types::{AccessSets, SystemID};
use crate::events::event::{Event, EventPayload, EventTypeId};
use crate::events::registry::EventTypeRegistry;


/// Callback invoked with each dispatched event of one type.
pub type Hook = Arc<dyn Fn(&EventPayload<'_>) + Send + Sync>;

/// Hooks by event type. Registering twice accumulates.
#[derive(Default)]
struct HandlerTable {
    hooks: HashMap<EventTypeId, Vec<Hook>>,
}

impl HandlerTable {
    fn register(&mut self, id: EventTypeId, hook: Hook) {
        self.hooks.entry(id).or_default().push(hook);
    }

    fn unregister(&mut self, id: EventTypeId) -> bool {
        self.hooks.remove(&id).is_some()
    }

    fn hooks_for(&self, id: EventTypeId) -> Option<&[Hook]> {
        self.hooks.get(&id).map(Vec::as_slice).filter(|hooks| !hooks.is_empty())
    }
}

/// Whether the hook system is currently invoking hooks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DispatchState {
    /// Not dispatching.
    Idle = 0,
    /// Collecting or delivering events.
    Dispatching = 1,
}

struct Delivery {
    hooks: Vec<Hook>,
    payload: Option<Box<dyn Any + Send>>,
}

struct HookInner {
    id: SystemID,
    registry: Arc<EventTypeRegistry>,
    handlers: RwLock<HandlerTable>,
    state: AtomicU8,
    access: AccessSets,
}

/// Resets the state to idle even if a hook panics.
struct DispatchGuard<'a>(&'a AtomicU8);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(DispatchState::Idle as u8, Ordering::Release);
    }
}

/// Delivers materialized events to registered hooks.
///
/// Cloning is cheap and every clone shares one handler table.
#[derive(Clone)]
pub struct HookSystem {
    inner: Arc<HookInner>,
}

impl HookSystem {
    /// Creates a hook system for the event types in `registry`.
    pub fn new(id: SystemID, registry: Arc<EventTypeRegistry>) -> Self {
        let mut access = AccessSets::default();
        for info in registry.all_event_types().iter().filter_map(|&id| registry.info(id)) {
            access.read.set(info.component_id());
        }
        Self {
            inner: Arc::new(HookInner {
                id,
                registry,
                handlers: RwLock::new(HandlerTable::default()),
                state: AtomicU8::new(DispatchState::Idle as u8),
                access,
            }),
        }
    }

    // The table is only changed by single insert/remove calls, so a poisoned
    // lock still guards a consistent map.
    fn table(&self) -> RwLockReadGuard<'_, HandlerTable> {
        self.inner.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn table_mut(&self) -> RwLockWriteGuard<'_, HandlerTable> {
        self.inner.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current dispatch state.
    pub fn state(&self) -> DispatchState {
        match self.inner.state.load(Ordering::Acquire) {
            0 => DispatchState::Idle,
            _ => DispatchState::Dispatching,
        }
    }

    /// Adds a hook for event type `E`.
    pub fn register_hook<E, F>(&self, hook: F)
    where
        E: Event,
        F: Fn(&EventPayload<'_>) + Send + Sync + 'static,
    {
        self.register_hook_for(EventTypeId::of::<E>(), Arc::new(hook));
    }

    /// Adds a hook for the event type `id`.
    pub fn register_hook_for(&self, id: EventTypeId, hook: Hook) {
        if !self.inner.registry.contains(id) {
            tracing::warn!(event = %id, "hook registered for an unregistered event type");
        }
        if self.state() == DispatchState::Dispatching {
            tracing::debug!(event = %id, "hook registered during dispatch; active from next dispatch");
        }
        self.table_mut().register(id, hook);
    }

    /// Adds every `(event type, hook)` pair.
    pub fn register_hooks<I>(&self, hooks: I)
    where
        I: IntoIterator<Item = (EventTypeId, Hook)>,
    {
        for (id, hook) in hooks {
            self.register_hook_for(id, hook);
        }
    }

    /// Removes every hook for event type `E`.
    pub fn unregister_hook<E: Event>(&self) -> bool {
        self.unregister_hook_for(EventTypeId::of::<E>())
    }

    /// Removes every hook for `id`. Unknown ids are ignored.
    pub fn unregister_hook_for(&self, id: EventTypeId) -> bool {
        self.table_mut().unregister(id)
    }

    /// Number of hooks registered for `id`.
    pub fn hook_count(&self, id: EventTypeId) -> usize {
        self.table().hooks_for(id).map_or(0, <[Hook]>::len)
    }

    fn collect(&self, data: &ECSData) -> Vec<Delivery> {
        let registry = &self.inner.registry;
        let table = self.table();
        let mut deliveries = Vec::new();

        for entity in data.matching_entities(registry.query()) {
            let Some(info) = data
                .component_types(entity)
                .and_then(|types| types.into_iter().find_map(|cid| registry.info_by_component(cid)))
            else {
                continue;
            };
            let Some(hooks) = table.hooks_for(info.id()) else {
                continue;
            };

            let payload = if info.is_zero_sized() {
                None
            } else {
                match data.get_dyn(entity, info.component_id()).and_then(|value| info.copy_payload(value)) {
                    Some(payload) => Some(payload),
                    None => {
                        tracing::warn!(%entity, event = %info.id(), "event record could not be read");
                        continue;
                    }
                }
            };
            deliveries.push(Delivery { hooks: hooks.to_vec(), payload });
        }
        deliveries
    }

    /// Delivers every event entity in `world` to its hooks.
    ///
    /// Returns the number of events delivered (entities with at least one hook).
    pub fn dispatch(&self, world: ECSReference<'_>) -> ECSResult<usize> {
        self.inner.state.store(DispatchState::Dispatching as u8, Ordering::Release);
        let _idle = DispatchGuard(&self.inner.state);

        let deliveries = world.read(|data| self.collect(data))?;
        for delivery in &deliveries {
            let payload = match &delivery.payload {
                None => EventPayload::Empty,
                Some(value) => EventPayload::Data(&**value),
            };
            for hook in &delivery.hooks {
                hook(&payload);
            }
        }

        tracing::debug!(delivered = deliveries.len(), "events dispatched");
        Ok(deliveries.len())
    }
}

impl System for HookSystem {
    fn id(&self) -> SystemID {
        self.inner.id
    }

    fn name(&self) -> &'static str {
        "hook_system"
    }

    fn access(&self) -> AccessSets {
        self.inner.access.clone()
    }

    fn should_run(&self, world: ECSReference<'_>) -> ECSResult<bool> {
        world.read(|data| data.has_matching(self.inner.registry.query()))
    }

    fn run(&self, world: ECSReference<'_>) -> ECSResult<()> {
        self.dispatch(world).map(drop)
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}
