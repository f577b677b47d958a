//! Store ownership and the per-cycle driver.
//!
//! This module defines:
//!
//! * [`ECSData`], the archetype store: entity allocation, structural
//!   mutation, typed and type-erased reads, and query evaluation;
//! * [`ECSManager`], which owns the store behind a lock together with the
//!   begin-of-cycle [`PlaybackPoint`] and drives one cycle at a time;
//! * [`ECSReference`], the handle systems receive while they run.
//!
//! ## Concurrency model
//!
//! The store sits behind an `RwLock`. Systems in one stage run in parallel and
//! share the read side; structural changes go through
//! [`ECSReference::defer`] or a deferred buffer and are applied between stages
//! with the write lock held. [`ECSReference::with_exclusive`] is available for
//! setup code and exclusive systems.
//!
//! ## Cycle
//!
//! [`ECSManager::run`] executes, in order:
//! 1. playback of the begin-of-cycle point (jobs completed, buffers replayed
//!    in creation order, carry-over replayed);
//! 2. the manager's own deferred queue;
//! 3. each stage of the scheduler, with the deferred queue applied after every
//!    stage;
//! 4. the tick increment.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::EngineConfig;
use crate::engine::archetype::{Archetype, RowValues};
use crate::engine::buffers::{PlaybackPoint, PlaybackStats};
use crate::engine::commands::Command;
use crate::engine::component::{component_description_by_component_id, component_id_of, Bundle};
use crate::engine::entity::{Entity, EntityLocation, EntityShards};
use crate::engine::error::{
    AttributeError, ECSError, ECSResult, ExecutionError, MoveError, RegistryError, SpawnError,
    TypeMismatchError,
};
use crate::engine::query::{Query, QueryBuilder};
use crate::engine::scheduler::{run_stages, Scheduler};
use crate::engine::types::{ArchetypeID, ComponentID, QuerySignature, Signature, Tick};


/// Archetype store.
///
/// ## Invariants
/// * `signature_map` and `archetypes` agree: every archetype is reachable
///   from its signature and ids equal positions.
/// * The location recorded for every live entity points at its row.
pub struct ECSData {
    archetypes: Vec<Archetype>,
    signature_map: HashMap<Signature, ArchetypeID>,
    shards: EntityShards,
}

impl ECSData {
    /// Creates an empty store over `shards`.
    pub fn new(shards: EntityShards) -> Self {
        Self { archetypes: Vec::new(), signature_map: HashMap::new(), shards }
    }

    /// All archetypes created so far.
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.shards.live_count()
    }

    /// Returns `true` if `entity` is live.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.shards.is_alive(entity)
    }

    fn get_or_create_archetype(&mut self, signature: &Signature) -> ECSResult<ArchetypeID> {
        if let Some(&archetype_id) = self.signature_map.get(signature) {
            return Ok(archetype_id);
        }

        let archetype_id = ArchetypeID::try_from(self.archetypes.len())
            .map_err(|_| ECSError::Internal("archetype id space exhausted".into()))?;
        self.archetypes.push(Archetype::new(archetype_id, *signature)?);
        self.signature_map.insert(*signature, archetype_id);
        tracing::trace!(archetype_id, components = signature.len(), "archetype created");
        Ok(archetype_id)
    }

    /// Creates an entity carrying every component in `bundle`.
    pub fn spawn(&mut self, mut bundle: Bundle) -> ECSResult<Entity> {
        if bundle.is_empty() {
            return Err(SpawnError::EmptyBundle.into());
        }

        let archetype_id = self.get_or_create_archetype(&bundle.signature())?;
        let archetype = &mut self.archetypes[archetype_id as usize];
        let location = EntityLocation { archetype: archetype_id, row: archetype.length() as _ };
        let entity = self.shards.spawn(location)?;

        if let Err(error) = archetype.push_bundle(entity, &mut bundle) {
            self.shards.despawn(entity);
            return Err(error.into());
        }
        Ok(entity)
    }

    /// Destroys `entity`.
    ///
    /// Returns `Ok(false)` if the handle is stale or already despawned.
    pub fn despawn(&mut self, entity: Entity) -> ECSResult<bool> {
        let Some(location) = self.shards.get_location(entity) else {
            return Ok(false);
        };

        let moved = self.archetypes[location.archetype as usize].swap_remove(location.row)?;
        if let Some(moved) = moved {
            if !self.shards.set_location(moved, location) {
                return Err(MoveError::MetadataFailure.into());
            }
        }
        self.shards.despawn(entity);
        Ok(true)
    }

    /// Destroys every entity whose archetype matches `query`.
    ///
    /// An empty query matches nothing. Returns the number of entities destroyed.
    pub fn despawn_matching(&mut self, query: &QuerySignature) -> ECSResult<usize> {
        if query.is_empty() {
            return Ok(0);
        }

        let mut destroyed = 0;
        for archetype in self.archetypes.iter_mut().filter(|a| query.matches(a.signature())) {
            // Popping from the back never moves another row.
            while let Some(&entity) = archetype.entities().last() {
                archetype.swap_remove((archetype.length() - 1) as _)?;
                self.shards.despawn(entity);
                destroyed += 1;
            }
        }
        Ok(destroyed)
    }

    /// Adds `value` as component `component_id` of `entity`, replacing any
    /// existing value.
    ///
    /// Returns `Ok(false)` for stale handles. The value's type is checked
    /// before the entity is touched, so a mismatch leaves it unchanged.
    pub fn add_component(
        &mut self,
        entity: Entity,
        component_id: ComponentID,
        value: Box<dyn Any + Send>,
    ) -> ECSResult<bool> {
        let description = component_description_by_component_id(component_id)
            .ok_or(RegistryError::MissingFactory { component_id })?;
        let actual = (*value).type_id();
        if actual != description.type_id {
            let mismatch = TypeMismatchError {
                expected: description.type_id,
                expected_name: description.name,
                actual,
            };
            return Err(AttributeError::from(mismatch).into());
        }

        let Some(location) = self.shards.get_location(entity) else {
            return Ok(false);
        };

        let mut signature = *self.archetypes[location.archetype as usize].signature();
        signature.set(component_id);
        let destination = self.get_or_create_archetype(&signature)?;

        let mut values = self.take_row(entity, location)?;
        values.retain(|(cid, _)| *cid != component_id);
        values.push((component_id, value));
        self.put_row(entity, destination, values)?;
        Ok(true)
    }

    /// Removes component `component_id` from `entity`.
    ///
    /// Removing the last component despawns the entity. Returns `Ok(false)`
    /// for stale handles and for entities that do not carry the component.
    pub fn remove_component(&mut self, entity: Entity, component_id: ComponentID) -> ECSResult<bool> {
        let Some(location) = self.shards.get_location(entity) else {
            return Ok(false);
        };

        let mut signature = *self.archetypes[location.archetype as usize].signature();
        if !signature.has(component_id) {
            return Ok(false);
        }
        signature.clear(component_id);
        if signature.is_empty() {
            return self.despawn(entity);
        }

        let destination = self.get_or_create_archetype(&signature)?;
        let mut values = self.take_row(entity, location)?;
        values.retain(|(cid, _)| *cid != component_id);
        self.put_row(entity, destination, values)?;
        Ok(true)
    }

    fn take_row(
        &mut self,
        entity: Entity,
        location: EntityLocation,
    ) -> ECSResult<RowValues> {
        let (values, moved) = self.archetypes[location.archetype as usize].take_row(location.row)?;
        if let Some(moved) = moved {
            if moved != entity && !self.shards.set_location(moved, location) {
                return Err(MoveError::MetadataFailure.into());
            }
        }
        Ok(values)
    }

    fn put_row(
        &mut self,
        entity: Entity,
        archetype_id: ArchetypeID,
        values: RowValues,
    ) -> ECSResult<()> {
        let row = self.archetypes[archetype_id as usize].push_row(entity, values)?;
        if !self.shards.set_location(entity, EntityLocation { archetype: archetype_id, row }) {
            return Err(MoveError::MetadataFailure.into());
        }
        Ok(())
    }

    /// Component `T` of `entity`, or `None` if the entity is stale or lacks it.
    pub fn get<T: 'static + Send + Sync>(&self, entity: Entity) -> ECSResult<Option<&T>> {
        let component_id = component_id_of::<T>()?;
        let Some(location) = self.shards.get_location(entity) else {
            return Ok(None);
        };
        Ok(self.archetypes[location.archetype as usize]
            .typed_column::<T>(component_id)
            .and_then(|column| column.get(location.row)))
    }

    /// Component `component_id` of `entity` as `&dyn Any`.
    pub fn get_dyn(&self, entity: Entity, component_id: ComponentID) -> Option<&dyn Any> {
        let location = self.shards.get_location(entity)?;
        self.archetypes[location.archetype as usize].get_dyn(location.row, component_id)
    }

    /// Component ids attached to `entity`, ascending.
    pub fn component_types(&self, entity: Entity) -> Option<Vec<ComponentID>> {
        let location = self.shards.get_location(entity)?;
        Some(self.archetypes[location.archetype as usize].component_ids().collect())
    }

    /// Archetypes matching `query`.
    pub fn matching_archetypes<'a>(
        &'a self,
        query: &'a QuerySignature,
    ) -> impl Iterator<Item = &'a Archetype> + 'a {
        self.archetypes
            .iter()
            .filter(move |archetype| !query.is_empty() && query.matches(archetype.signature()))
    }

    /// Every live entity matching `query`, grouped by archetype.
    pub fn matching_entities(&self, query: &QuerySignature) -> Vec<Entity> {
        self.matching_archetypes(query)
            .flat_map(|archetype| archetype.entities().iter().copied())
            .collect()
    }

    /// Returns `true` if at least one live entity matches `query`.
    pub fn has_matching(&self, query: &QuerySignature) -> bool {
        self.matching_archetypes(query).any(|archetype| !archetype.is_empty())
    }

    /// Calls `f` with every entity matching `query` and its component `T`.
    ///
    /// `T` must be required by the query (`read`/`write`/`with_id`).
    pub fn for_each<T: 'static + Send + Sync>(
        &self,
        query: &Query,
        mut f: impl FnMut(Entity, &T),
    ) -> ECSResult<()> {
        let component_id = component_id_of::<T>()?;
        for archetype in self.matching_archetypes(query.signature()) {
            let column = archetype
                .typed_column::<T>(component_id)
                .ok_or(MoveError::MissingColumn { component_id })?;
            for (entity, value) in archetype.entities().iter().zip(column.iter()) {
                f(*entity, value);
            }
        }
        Ok(())
    }

    /// Calls `f` with every entity matching `query` and mutable component `T`.
    pub fn for_each_mut<T: 'static + Send + Sync>(
        &mut self,
        query: &Query,
        mut f: impl FnMut(Entity, &mut T),
    ) -> ECSResult<()> {
        let component_id = component_id_of::<T>()?;
        let signature = *query.signature();
        for archetype in self.archetypes.iter_mut() {
            if signature.is_empty() || !signature.matches(archetype.signature()) {
                continue;
            }
            let entities = archetype.entities().to_vec();
            let column = archetype
                .typed_column_mut::<T>(component_id)
                .ok_or(MoveError::MissingColumn { component_id })?;
            for (entity, value) in entities.into_iter().zip(column.iter_mut()) {
                f(entity, value);
            }
        }
        Ok(())
    }

    /// Applies one deferred command.
    pub fn apply(&mut self, command: Command) -> ECSResult<()> {
        match command {
            Command::Spawn { bundle } => {
                let entity = self.spawn(bundle)?;
                tracing::trace!(%entity, "spawned");
            }
            Command::Despawn { entity } => {
                if !self.despawn(entity)? {
                    tracing::trace!(%entity, "despawn of stale entity ignored");
                }
            }
            Command::DespawnMatching { query } => {
                let destroyed = self.despawn_matching(&query)?;
                tracing::trace!(destroyed, "despawned matching entities");
            }
            Command::Add { entity, component_id, value } => {
                if !self.add_component(entity, component_id, value)? {
                    tracing::warn!(%entity, component_id, "add to stale entity ignored");
                }
            }
            Command::Remove { entity, component_id } => {
                self.remove_component(entity, component_id)?;
            }
        }
        Ok(())
    }
}

/// Summary of one [`ECSManager::run`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Tick that was executed.
    pub tick: Tick,
    /// Begin-of-cycle playback counts.
    pub playback: PlaybackStats,
    /// Commands applied from the manager's deferred queue.
    pub deferred: usize,
    /// Stages executed.
    pub stages: usize,
    /// Systems that ran.
    pub systems_run: usize,
    /// Systems skipped because they had nothing to do.
    pub systems_skipped: usize,
}

/// Owns the store and drives cycles.
pub struct ECSManager {
    data: RwLock<ECSData>,
    deferred: Mutex<Vec<Command>>,
    playback: Arc<PlaybackPoint>,
    tick: AtomicU64,
}

impl ECSManager {
    /// Creates a manager over `data`.
    pub fn new(data: ECSData) -> Self {
        Self {
            data: RwLock::new(data),
            deferred: Mutex::new(Vec::new()),
            playback: PlaybackPoint::new("begin_cycle"),
            tick: AtomicU64::new(0),
        }
    }

    /// Creates a manager with `config.shards` entity shards.
    pub fn from_config(config: &EngineConfig) -> ECSResult<Self> {
        let shards = EntityShards::new(config.shards).map_err(SpawnError::from)?;
        Ok(Self::new(ECSData::new(shards)))
    }

    /// Handle for systems and setup code.
    #[inline]
    pub fn world_ref(&self) -> ECSReference<'_> {
        ECSReference { manager: self }
    }

    /// Begin-of-cycle playback point.
    pub fn playback_point(&self) -> &Arc<PlaybackPoint> {
        &self.playback
    }

    /// Number of completed cycles.
    pub fn tick(&self) -> Tick {
        self.tick.load(Ordering::Acquire)
    }

    fn read(&self) -> ECSResult<RwLockReadGuard<'_, ECSData>> {
        Ok(self.data.read().map_err(ExecutionError::poisoned("store"))?)
    }

    fn write(&self) -> ECSResult<RwLockWriteGuard<'_, ECSData>> {
        Ok(self.data.write().map_err(ExecutionError::poisoned("store"))?)
    }

    /// Applies every command queued through [`ECSReference::defer`], in FIFO
    /// order. Returns the number applied.
    ///
    /// ## Errors
    /// A failing command is logged and the rest of the queue still applies;
    /// the first failure is returned afterwards.
    pub fn apply_deferred_commands(&self) -> ECSResult<usize> {
        match self.drain_deferred()? {
            (_, Some(error)) => Err(error),
            (applied, None) => Ok(applied),
        }
    }

    pub(crate) fn drain_deferred(&self) -> ECSResult<(usize, Option<ECSError>)> {
        let commands = std::mem::take(
            &mut *self.deferred.lock().map_err(ExecutionError::poisoned("deferred queue"))?,
        );
        if commands.is_empty() {
            return Ok((0, None));
        }

        let mut data = self.write()?;
        let mut applied = 0;
        let mut first_error = None;
        for command in commands {
            let kind = command.kind();
            match data.apply(command) {
                Ok(()) => applied += 1,
                Err(error) => {
                    tracing::error!(kind, %error, "deferred command failed");
                    first_error.get_or_insert(error);
                }
            }
        }
        Ok((applied, first_error))
    }

    /// Runs one cycle of `scheduler`.
    ///
    /// ## Errors
    /// A system failure stops the cycle after its stage. A failed command in
    /// playback or in the deferred queue does not: the cycle completes and
    /// the first such failure is returned at the end.
    pub fn run(&self, scheduler: &mut Scheduler) -> ECSResult<CycleReport> {
        let tick = self.tick();
        let _span = tracing::debug_span!("cycle", tick).entered();

        let (playback, playback_failure) = {
            let mut data = self.write()?;
            self.playback.replay(&mut data)
        };
        let (mut deferred, deferred_failure) = self.drain_deferred()?;

        let stages = scheduler.stages();
        let outcome = run_stages(self, stages)?;
        deferred += outcome.deferred;

        self.tick.fetch_add(1, Ordering::AcqRel);
        let report = CycleReport {
            tick,
            playback,
            deferred,
            stages: stages.len(),
            systems_run: outcome.systems_run,
            systems_skipped: outcome.systems_skipped,
        };
        tracing::debug!(?report, "cycle complete");

        match playback_failure.or(deferred_failure).or(outcome.failure) {
            Some(error) => Err(error),
            None => Ok(report),
        }
    }
}

/// Handle to the manager given to systems.
#[derive(Clone, Copy)]
pub struct ECSReference<'a> {
    manager: &'a ECSManager,
}

impl<'a> ECSReference<'a> {
    /// Runs `f` with shared access to the store.
    pub fn read<R>(&self, f: impl FnOnce(&ECSData) -> R) -> ECSResult<R> {
        let data = self.manager.read()?;
        Ok(f(&data))
    }

    /// Runs `f` with exclusive access to the store.
    ///
    /// Blocks until every shared reader in the current stage is done.
    pub fn with_exclusive<R>(&self, f: impl FnOnce(&mut ECSData) -> ECSResult<R>) -> ECSResult<R> {
        let mut data = self.manager.write()?;
        f(&mut data)
    }

    /// Queues `command` for the end of the current stage.
    pub fn defer(&self, command: Command) -> ECSResult<()> {
        self.manager
            .deferred
            .lock()
            .map_err(ExecutionError::poisoned("deferred queue"))?
            .push(command);
        Ok(())
    }

    /// Starts building a query.
    pub fn query(&self) -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Begin-of-cycle playback point.
    pub fn playback_point(&self) -> &'a Arc<PlaybackPoint> {
        &self.manager.playback
    }

    /// Tick currently executing.
    pub fn tick(&self) -> Tick {
        self.manager.tick()
    }
}
