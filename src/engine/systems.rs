//! System abstractions.
//!
//! A **system** is a unit of logic run once per cycle. Systems:
//! - declare which components they read and write ([`AccessSets`]),
//! - are grouped into stages by the scheduler using those declarations,
//! - operate through an [`ECSReference`] rather than owning the store.
//!
//! ## Scheduling hints
//!
//! - [`System::exclusive`] asks for a stage of its own. The event bus uses it
//!   so its destroyer buffer is created before any producer in the same cycle
//!   can post.
//! - [`System::should_run`] lets a system skip a cycle when it has nothing to
//!   do. The hook system uses it to stay idle while no event entity exists.
//!
//! ## Lookup
//!
//! [`System::as_any`] exposes a concrete system for downcasting, which is how
//! [`Scheduler::find_system`](crate::engine::scheduler::Scheduler::find_system)
//! locates a specific system type. The default returns `None`, which keeps a
//! system out of lookups.
//!
//! All systems must be `Send + Sync`.

use std::any::Any;

use crate::engine::error::ECSResult;
use crate::engine::manager::ECSReference;
use crate::engine::types::{AccessSets, SystemID};


/// A unit of executable logic operating on the store.
pub trait System: Send + Sync {
    /// Unique identifier of this system.
    fn id(&self) -> SystemID;

    /// Human-readable name used in logs and errors.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Component access used for stage grouping.
    fn access(&self) -> AccessSets;

    /// Returns `true` if the system must run alone in its stage.
    fn exclusive(&self) -> bool {
        false
    }

    /// Returns `false` to skip this cycle.
    fn should_run(&self, _world: ECSReference<'_>) -> ECSResult<bool> {
        Ok(true)
    }

    /// Executes the system.
    fn run(&self, world: ECSReference<'_>) -> ECSResult<()>;

    /// Concrete system for downcasting, if it opts into lookup.
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
}

/// A [`System`] backed by a closure.
pub struct FnSystem<F>
where
    F: Fn(ECSReference<'_>) -> ECSResult<()> + Send + Sync + 'static,
{
    id: SystemID,
    name: &'static str,
    access: AccessSets,
    exclusive: bool,
    f: F,
}

impl<F> FnSystem<F>
where
    F: Fn(ECSReference<'_>) -> ECSResult<()> + Send + Sync + 'static,
{
    /// Creates a closure-backed system.
    ///
    /// # Parameters
    /// - `id`: Unique identifier for the system.
    /// - `name`: Human-readable name, used in logs and errors.
    /// - `access`: Declared component access used for stage grouping.
    /// - `f`: The closure executed when the system runs.
    pub fn new(id: SystemID, name: &'static str, access: AccessSets, f: F) -> Self {
        Self { id, name, access, exclusive: false, f }
    }

    /// Marks the system as needing a stage of its own.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

impl<F> System for FnSystem<F>
where
    F: Fn(ECSReference<'_>) -> ECSResult<()> + Send + Sync + 'static,
{
    fn id(&self) -> SystemID {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn access(&self) -> AccessSets {
        self.access.clone()
    }

    fn exclusive(&self) -> bool {
        self.exclusive
    }

    fn run(&self, world: ECSReference<'_>) -> ECSResult<()> {
        (self.f)(world)
    }
}
