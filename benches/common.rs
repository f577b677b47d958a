#![allow(dead_code)]

use std::sync::Arc;

use ecs_event_bus::engine::entity::EntityShards;
use ecs_event_bus::engine::manager::{ECSData, ECSManager};
use ecs_event_bus::engine::scheduler::Scheduler;
use ecs_event_bus::events::dispatcher::HookSystem;
use ecs_event_bus::events::event::Event;
use ecs_event_bus::events::producer::EventBus;
use ecs_event_bus::events::registry::EventTypeRegistry;

pub const EVENTS_SMALL: usize = 1_000;
pub const EVENTS_MED: usize = 10_000;
pub const EVENTS_LARGE: usize = 100_000;

#[derive(Clone, Copy)]
pub struct Tick;
impl Event for Tick {}

#[derive(Clone, Copy)]
pub struct Damage {
    pub amount: f32,
    pub source: u32,
}
impl Event for Damage {}

pub struct World {
    pub ecs: ECSManager,
    pub scheduler: Scheduler,
    pub bus: EventBus,
    pub hooks: HookSystem,
}

/// Builds a world running `[bus, hooks]` and runs one cycle so the bus can
/// accept events.
pub fn make_world(shards: usize) -> World {
    let registry = EventTypeRegistry::builder()
        .with::<Tick>()
        .and_then(|builder| builder.with::<Damage>())
        .expect("register event types")
        .build();
    let registry = Arc::new(registry);

    let ecs = ECSManager::new(ECSData::new(EntityShards::new(shards).expect("shards")));
    let bus = EventBus::new(1, Arc::clone(&registry), ecs.playback_point());
    let hooks = HookSystem::new(2, registry);

    let mut scheduler = Scheduler::new();
    scheduler.add_system(bus.clone());
    scheduler.add_system(hooks.clone());
    ecs.run(&mut scheduler).expect("warm-up cycle");

    World { ecs, scheduler, bus, hooks }
}

impl World {
    pub fn run(&mut self) {
        self.ecs.run(&mut self.scheduler).expect("cycle");
    }
}
