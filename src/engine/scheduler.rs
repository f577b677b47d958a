//! System scheduling and execution.
//!
//! This module is responsible for:
//! * grouping systems into execution stages based on access compatibility,
//! * running the systems of a stage in parallel using Rayon,
//! * applying deferred commands between stages.
//!
//! ## Scheduling model
//!
//! Systems are assigned to **stages** such that:
//! * systems within the same stage do **not** conflict on component access,
//! * exclusive systems are alone in their stage,
//! * stages run sequentially, in the order the systems were added.
//!
//! Grouping never reorders systems. A system joins the *last* stage only when
//! it conflicts with nothing there; otherwise it opens a new stage. A system
//! added after another therefore never runs before it, which is what lets an
//! event bus added first create its buffers before any producer posts, and a
//! hook system added last observe everything the cycle's playback created.

use std::any::Any;
use std::sync::Arc;

use rayon::prelude::*;

use crate::engine::error::{ECSError, ECSResult, ExecutionError};
use crate::engine::manager::ECSManager;
use crate::engine::systems::System;


/// A group of systems that can be executed in parallel.
///
/// ## Invariants
/// * All systems within a `Stage` have non-conflicting access sets.
/// * An exclusive system is the only member of its stage.
pub struct Stage {
    systems: Vec<Arc<dyn System>>,
    exclusive: bool,
}

impl Stage {
    /// Systems of this stage, in insertion order.
    pub fn systems(&self) -> &[Arc<dyn System>] {
        &self.systems
    }

    /// Returns `true` if this stage holds a single exclusive system.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

/// Partitions `systems` into stages without reordering them.
///
/// ## Complexity
/// O(n · s) where `s` is the size of the last stage.
pub fn make_stages(systems: &[Arc<dyn System>]) -> Vec<Stage> {
    let mut stages: Vec<Stage> = Vec::new();

    for system in systems {
        let exclusive = system.exclusive();
        let joins_last = !exclusive
            && stages.last().is_some_and(|stage| {
                !stage.exclusive
                    && !stage
                        .systems
                        .iter()
                        .any(|other| system.access().conflicts_with(&other.access()))
            });

        match stages.last_mut() {
            Some(stage) if joins_last => stage.systems.push(Arc::clone(system)),
            _ => stages.push(Stage { systems: vec![Arc::clone(system)], exclusive }),
        }
    }
    stages
}

/// Counts produced by [`run_stages`].
#[derive(Clone, Debug, Default)]
pub struct StageOutcome {
    /// Systems that ran.
    pub systems_run: usize,
    /// Systems skipped by [`System::should_run`].
    pub systems_skipped: usize,
    /// Deferred commands applied between stages.
    pub deferred: usize,
    /// First deferred command that failed between stages.
    pub failure: Option<ECSError>,
}

fn run_system(ecs_manager: &ECSManager, system: &dyn System) -> ECSResult<bool> {
    let world = ecs_manager.world_ref();
    if !system.should_run(world)? {
        tracing::trace!(system = system.id(), name = system.name(), "system skipped");
        return Ok(false);
    }

    tracing::trace!(system = system.id(), name = system.name(), "system running");
    system.run(world).map_err(|error| ExecutionError::SystemFailed {
        system: system.id(),
        name: system.name(),
        reason: error.to_string(),
    })?;
    Ok(true)
}

/// Runs `stages` in order, applying deferred commands after each one.
///
/// Exclusive stages run on the calling thread; other stages run their systems
/// in parallel. The first system error stops the schedule once its stage has
/// finished. A failed deferred command does not; it is kept in
/// [`StageOutcome::failure`].
pub fn run_stages(ecs_manager: &ECSManager, stages: &[Stage]) -> ECSResult<StageOutcome> {
    let mut outcome = StageOutcome::default();

    for stage in stages {
        let results: Vec<ECSResult<bool>> = if stage.exclusive {
            stage.systems.iter().map(|system| run_system(ecs_manager, system.as_ref())).collect()
        } else {
            stage.systems.par_iter().map(|system| run_system(ecs_manager, system.as_ref())).collect()
        };

        for result in results {
            if result? {
                outcome.systems_run += 1;
            } else {
                outcome.systems_skipped += 1;
            }
        }

        let (applied, failure) = ecs_manager.drain_deferred()?;
        outcome.deferred += applied;
        if outcome.failure.is_none() {
            outcome.failure = failure;
        }
    }
    Ok(outcome)
}

/// Ordered collection of systems with lazily rebuilt stages.
#[derive(Default)]
pub struct Scheduler {
    systems: Vec<Arc<dyn System>>,
    stages: Option<Vec<Stage>>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `system`.
    pub fn add_system<S: System + 'static>(&mut self, system: S) -> &mut Self {
        self.add_shared(Arc::new(system))
    }

    /// Appends an already shared system.
    pub fn add_shared(&mut self, system: Arc<dyn System>) -> &mut Self {
        if self.systems.iter().any(|existing| existing.id() == system.id()) {
            tracing::warn!(system = system.id(), name = system.name(), "duplicate system id");
        }
        self.systems.push(system);
        self.stages = None;
        self
    }

    /// Systems in insertion order.
    pub fn systems(&self) -> &[Arc<dyn System>] {
        &self.systems
    }

    /// First system of concrete type `T` that opts into lookup.
    pub fn find_system<T: Any>(&self) -> Option<&T> {
        self.systems
            .iter()
            .find_map(|system| system.as_any()?.downcast_ref::<T>())
    }

    /// Current stages, rebuilt if systems were added since the last call.
    pub fn stages(&mut self) -> &[Stage] {
        self.stages.get_or_insert_with(|| make_stages(&self.systems))
    }
}
