//! # ecs-event-bus
//!
//! Typed event bus on top of an archetype entity-component runtime with
//! deferred, batched mutation.
//!
//! Producers (ordinary code or parallel jobs) post event records. Records
//! become short-lived entities when the begin-of-cycle playback point replays
//! the command buffers, a hook system delivers each one to the callbacks
//! registered for its type, and the next cycle destroys them before creating
//! new ones.
//!
//! ## Design Goals
//! - Destruction of last cycle's events always precedes creation of new ones
//! - Lock-free appends from parallel producers, with collision-free slots
//! - Type-erased storage, typed delivery
//! - Explicit errors instead of panics at the API boundary
//!
//! ## Layout
//! - [`engine`]: store, command buffers, jobs, systems and scheduling
//! - [`events`]: event registry, producer API, dispatcher and lookup
//! - [`config`]: TOML configuration

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]
#![deny(dead_code)]

pub mod config;
pub mod engine;
pub mod events;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use config::{ConfigError, EngineConfig};

pub use engine::manager::{CycleReport, ECSData, ECSManager, ECSReference};

pub use engine::entity::{Entity, EntityLocation, EntityShards};

pub use engine::component::{
    component_id_of,
    freeze_components,
    register_component,
    Bundle,
};

pub use engine::query::{Query, QueryBuilder};

pub use engine::systems::{FnSystem, System};
pub use engine::scheduler::{Scheduler, Stage};

pub use engine::commands::Command;
pub use engine::buffers::{
    CommandWriter,
    ConcurrentWriter,
    DeferredBuffer,
    PlaybackPoint,
    PlaybackStats,
};
pub use engine::jobs::{JobHandle, JobScheduler};

pub use engine::error::{
    AttributeError,
    ECSError,
    ECSResult,
    ExecutionError,
    MoveError,
    RegistryError,
    SpawnError,
};

pub use engine::types::{
    AccessSets,
    ArchetypeID,
    ComponentID,
    EntityID,
    QuerySignature,
    Signature,
    SlotIndex,
    SystemID,
};

pub use events::coordinator::{CommandBufferCoordinator, SlotCounter};
pub use events::dispatcher::{DispatchState, Hook, HookSystem};
pub use events::error::{EventError, EventResult};
pub use events::event::{Event, EventPayload, EventTypeId};
pub use events::lookup::{find_event_bus, EventBusExt};
pub use events::producer::{EventBus, EventJobPart};
pub use events::registry::{EventTypeInfo, EventTypeRegistry, EventTypeRegistryBuilder};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used types.
///
/// Import with:
/// ```rust
/// use ecs_event_bus::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        component_id_of,
        find_event_bus,
        register_component,
        AccessSets,
        Bundle,
        ECSManager,
        ECSReference,
        ECSResult,
        Entity,
        Event,
        EventBus,
        EventBusExt,
        EventError,
        EventPayload,
        EventTypeId,
        EventTypeRegistry,
        FnSystem,
        HookSystem,
        JobScheduler,
        QueryBuilder,
        Scheduler,
        System,
    };
}
