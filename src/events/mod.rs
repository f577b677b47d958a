//! # Events
//!
//! Typed events materialized as short-lived entities.
//!
//! Producers post event records through an [`EventBus`](producer::EventBus).
//! Records become entities when the begin-of-cycle playback point replays the
//! bus's buffers, the [`HookSystem`](dispatcher::HookSystem) hands each one to
//! the hooks registered for its type, and the bus's next update schedules them
//! for destruction at the following playback.
//!
//! ```ignore
//! let registry = Arc::new(EventTypeRegistry::builder().with::<Ping>()?.build());
//! let bus = EventBus::new(1, Arc::clone(&registry), ecs.playback_point());
//! let hooks = HookSystem::new(99, registry);
//! hooks.register_hook::<Ping, _>(|_| println!("ping"));
//!
//! scheduler.add_system(bus.clone());   // first: creates the destroyer buffer
//! scheduler.add_system(producers);
//! scheduler.add_system(hooks.clone()); // last
//! ```

pub mod event;
pub mod error;
pub mod registry;
pub mod coordinator;
pub mod producer;
pub mod dispatcher;
pub mod lookup;
