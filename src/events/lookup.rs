//! Locating the bus from a scheduler.
//!
//! Code that only has the [`Scheduler`] at hand (setup code, tests, tools)
//! uses [`find_event_bus`] or the [`EventBusExt`] shortcuts instead of
//! threading an [`EventBus`] handle around.

use crate::engine::jobs::JobHandle;
use crate::engine::scheduler::Scheduler;
use crate::events::error::{EventError, EventResult};
use crate::events::event::Event;
use crate::events::producer::{EventBus, EventJobPart};


/// Returns the event bus added to `scheduler`.
///
/// If several were added, the first one wins.
pub fn find_event_bus(scheduler: &Scheduler) -> EventResult<&EventBus> {
    scheduler.find_system::<EventBus>().ok_or_else(|| {
        tracing::warn!("event bus lookup failed");
        EventError::BusNotFound
    })
}

/// Event shortcuts on a scheduler.
pub trait EventBusExt {
    /// The scheduler's event bus.
    fn event_bus(&self) -> EventResult<&EventBus>;

    /// Posts `event` through the scheduler's event bus.
    fn post_event<E: Event>(&self, event: E) -> EventResult<()> {
        self.event_bus()?.post_event(event)
    }

    /// Reserves a job part on the scheduler's event bus.
    fn event_job_part<E: Event>(&self, event: E) -> EventResult<EventJobPart<E>> {
        self.event_bus()?.job_part(event)
    }

    /// Makes the next playback wait for `job`.
    fn add_event_job_dependency(&self, job: JobHandle) -> EventResult<()> {
        self.event_bus()?.add_job_dependency(job);
        Ok(())
    }
}

impl EventBusExt for Scheduler {
    fn event_bus(&self) -> EventResult<&EventBus> {
        find_event_bus(self)
    }
}
