//! Event producer API.
//!
//! [`EventBus`] is the front door for producers and also the system that
//! schedules last cycle's events for destruction. Add it to the scheduler
//! *first* so its update creates the cycle's destroyer buffer before anything
//! posts.
//!
//! Two ways to post:
//! * **Immediate** ([`EventBus::post`], [`EventBus::post_event`]): records a
//!   spawn into the serial creator buffer.
//! * **Job parts** ([`EventBus::job_part`]): for parallel producers. Each part
//!   owns a concurrent writer and a unique slot; the job calls
//!   [`EventJobPart::enqueue`] and the caller registers the job handle with
//!   [`EventBus::add_job_dependency`] so playback waits for it.
//!
//! Either way the event entity appears at the next playback and is visible to
//! the hook system for the rest of that cycle.

use std::any::{type_name, Any};
use std::sync::Arc;

use crate::engine::buffers::{ConcurrentWriter, PlaybackPoint};
use crate::engine::component::Bundle;
use crate::engine::error::ECSResult;
use crate::engine::jobs::JobHandle;
use crate::engine::manager::ECSReference;
use crate::engine::systems::System;
use crate::engine::types::{AccessSets, ComponentID, SlotIndex, SystemID};
use crate::events::coordinator::CommandBufferCoordinator;
use crate::events::error::{EventError, EventResult};
use crate::events::event::{Event, EventTypeId};
use crate::events::registry::EventTypeRegistry;


/// One parallel producer's right to create an event.
pub struct EventJobPart<E: Event> {
    writer: ConcurrentWriter,
    event: E,
    slot: SlotIndex,
    component_id: ComponentID,
}

impl<E: Event> EventJobPart<E> {
    /// Slot assigned to this part.
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// Event record carried by this part.
    pub fn event(&self) -> &E {
        &self.event
    }

    /// Records the creation of one event entity.
    ///
    /// Can be called more than once; each call creates another entity.
    pub fn enqueue(&self) {
        self.writer
            .spawn(self.slot, Bundle::single(self.component_id, self.event.clone()));
    }
}

struct BusInner {
    id: SystemID,
    registry: Arc<EventTypeRegistry>,
    coordinator: CommandBufferCoordinator,
    access: AccessSets,
}

/// Event producer and per-cycle event destroyer.
///
/// Cloning is cheap and every clone drives the same buffers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a bus recording into `point`.
    pub fn new(id: SystemID, registry: Arc<EventTypeRegistry>, point: &Arc<PlaybackPoint>) -> Self {
        let coordinator = CommandBufferCoordinator::new(point, *registry.query());
        let mut access = AccessSets::default();
        for info in registry.all_event_types().iter().filter_map(|&id| registry.info(id)) {
            access.write.set(info.component_id());
        }
        Self { inner: Arc::new(BusInner { id, registry, coordinator, access }) }
    }

    /// Registered event types.
    pub fn registry(&self) -> &Arc<EventTypeRegistry> {
        &self.inner.registry
    }

    /// Buffer coordinator behind this bus.
    pub fn coordinator(&self) -> &CommandBufferCoordinator {
        &self.inner.coordinator
    }

    /// Schedules every current event entity for destruction at the next playback.
    pub fn destroy_pending_events(&self) -> EventResult<()> {
        self.inner.coordinator.destroy_pending_events()
    }

    /// Posts a type-erased event record.
    ///
    /// `event` must be a registered event type (not a box or reference to
    /// one); otherwise [`EventError::InvalidEventType`] is returned and
    /// nothing is recorded.
    pub fn post(&self, event: &dyn Any) -> EventResult<()> {
        let type_id = event.type_id();
        let bundle = self
            .inner
            .registry
            .info_by_type_id(type_id)
            .and_then(|info| info.bundle_from(event))
            .ok_or(EventError::InvalidEventType { type_id, name: None })?;
        self.inner.coordinator.post_serial(bundle)
    }

    /// Posts an event record.
    pub fn post_event<E: Event>(&self, event: E) -> EventResult<()> {
        let component_id = self.component_id_of::<E>()?;
        self.inner.coordinator.post_serial(Bundle::single(component_id, event))
    }

    /// Reserves a slot for a parallel producer.
    pub fn job_part<E: Event>(&self, event: E) -> EventResult<EventJobPart<E>> {
        let component_id = self.component_id_of::<E>()?;
        let (writer, slot) = self.inner.coordinator.acquire_concurrent_slot()?;
        tracing::trace!(event = type_name::<E>(), slot, "job part issued");
        Ok(EventJobPart { writer, event, slot, component_id })
    }

    /// Makes the next playback wait for `job`.
    pub fn add_job_dependency(&self, job: JobHandle) {
        self.inner.coordinator.register_dependency(job);
    }

    fn component_id_of<E: Event>(&self) -> EventResult<ComponentID> {
        self.inner
            .registry
            .info(EventTypeId::of::<E>())
            .map(|info| info.component_id())
            .ok_or(EventError::InvalidEventType {
                type_id: std::any::TypeId::of::<E>(),
                name: Some(type_name::<E>()),
            })
    }
}

impl System for EventBus {
    fn id(&self) -> SystemID {
        self.inner.id
    }

    fn name(&self) -> &'static str {
        "event_bus"
    }

    fn access(&self) -> AccessSets {
        self.inner.access.clone()
    }

    fn exclusive(&self) -> bool {
        true
    }

    fn run(&self, _world: ECSReference<'_>) -> ECSResult<()> {
        Ok(self.destroy_pending_events()?)
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}
