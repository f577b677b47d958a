#![allow(dead_code)]

use std::sync::{Arc, Once};

use ecs_event_bus::config::EngineConfig;
use ecs_event_bus::engine::component::register_component;
use ecs_event_bus::engine::entity::EntityShards;
use ecs_event_bus::engine::manager::{CycleReport, ECSData, ECSManager};
use ecs_event_bus::engine::scheduler::Scheduler;
use ecs_event_bus::engine::types::SystemID;
use ecs_event_bus::events::dispatcher::HookSystem;
use ecs_event_bus::events::event::Event;
use ecs_event_bus::events::producer::EventBus;
use ecs_event_bus::events::registry::EventTypeRegistry;
use tracing_subscriber::EnvFilter;

pub const BUS_ID: SystemID = 1;
pub const HOOKS_ID: SystemID = 99;

/// Zero-sized event.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Ping;
impl Event for Ping {}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Score {
    pub value: u32,
}
impl Event for Score {}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Health(pub u32);

static INIT: Once = Once::new();

/// Installs a test-writer subscriber honouring `RUST_LOG`, falling back to
/// the default config's `log_filter`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(EngineConfig::default().log_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Registers the plain components used by the tests.
pub fn init_components() {
    INIT.call_once(|| {
        register_component::<Position>().unwrap();
        register_component::<Health>().unwrap();
    });
}

pub fn new_manager() -> ECSManager {
    init_tracing();
    init_components();
    ECSManager::new(ECSData::new(EntityShards::new(4).unwrap()))
}

pub fn event_registry() -> Arc<EventTypeRegistry> {
    let builder = EventTypeRegistry::builder()
        .with::<Ping>()
        .and_then(|builder| builder.with::<Score>())
        .unwrap();
    Arc::new(builder.build())
}

/// A manager, a scheduler running `[bus, ..producers, hooks]`, and handles
/// to the bus and the hook system.
pub struct Harness {
    pub ecs: ECSManager,
    pub scheduler: Scheduler,
    pub bus: EventBus,
    pub hooks: HookSystem,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_producers(|_, _| {})
    }

    /// Lets `producers` add systems between the bus and the hook system.
    pub fn with_producers(producers: impl FnOnce(&mut Scheduler, &EventBus)) -> Self {
        let ecs = new_manager();
        let registry = event_registry();
        let bus = EventBus::new(BUS_ID, Arc::clone(&registry), ecs.playback_point());
        let hooks = HookSystem::new(HOOKS_ID, registry);

        let mut scheduler = Scheduler::new();
        scheduler.add_system(bus.clone());
        producers(&mut scheduler, &bus);
        scheduler.add_system(hooks.clone());

        Self { ecs, scheduler, bus, hooks }
    }

    pub fn run(&mut self) -> CycleReport {
        self.ecs.run(&mut self.scheduler).unwrap()
    }

    /// Live event entities of any registered type.
    pub fn event_count(&self) -> usize {
        let query = *self.bus.registry().query();
        self.ecs
            .world_ref()
            .read(|data| data.matching_entities(&query).len())
            .unwrap()
    }
}
