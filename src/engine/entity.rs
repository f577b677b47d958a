//! Entity handles and the sharded entity allocator.
//!
//! An [`Entity`] is a packed `| version | shard | index |` identifier (see
//! [`types`](crate::engine::types)). Each shard owns its own free list and
//! version table behind a mutex; producers on different threads are spread over
//! shards by thread identity so concurrent spawns rarely touch the same lock.
//!
//! Despawning bumps the slot version, so a handle kept past its entity's
//! lifetime is detected as stale instead of silently aliasing the next entity
//! that reuses the slot.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::engine::error::{CapacityError, ShardBoundsError, SpawnError};
use crate::engine::types::{
    ArchetypeID, EntityCount, EntityID, IndexID, RowID, ShardID, VersionID, INDEX_BITS, INDEX_CAP,
    INDEX_MASK, SHARD_BITS, SHARD_MASK,
};


/// Opaque handle to an entity in the store.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Entity(pub EntityID);

#[inline]
const fn make_id(shard: ShardID, index: IndexID, version: VersionID) -> EntityID {
    ((version as EntityID) << (SHARD_BITS + INDEX_BITS)) |
    ((shard as EntityID) << INDEX_BITS) |
    (index as EntityID)
}

#[inline]
fn make_entity(shard: ShardID, index: IndexID, version: VersionID) -> Entity {
    debug_assert!((index as EntityID) <= INDEX_MASK);
    debug_assert!((shard as EntityID) <= SHARD_MASK);
    Entity(make_id(shard, index, version))
}

impl Entity {
    /// Splits the handle into `(shard, index, version)`.
    #[inline] pub fn components(self) -> (ShardID, IndexID, VersionID) { (self.shard(), self.index(), self.version()) }
    /// Shard that allocated this entity.
    #[inline] pub fn shard(self) -> ShardID { ((self.0 >> INDEX_BITS) & SHARD_MASK) as ShardID }
    /// Slot index within the shard.
    #[inline] pub fn index(self) -> IndexID { (self.0 & INDEX_MASK) as IndexID }
    /// Generation of the slot when this handle was issued.
    #[inline] pub fn version(self) -> VersionID { (self.0 >> (INDEX_BITS + SHARD_BITS)) as VersionID }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}@{}", self.index(), self.version(), self.shard())
    }
}

/// Where an entity's row lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityLocation {
    /// Archetype holding the entity.
    pub archetype: ArchetypeID,
    /// Row inside the archetype.
    pub row: RowID,
}

/// Per-shard slot table.
#[derive(Default)]
struct Entities {
    versions: Vec<VersionID>,
    free_store: Vec<IndexID>,
    alive: Vec<bool>,
    locations: Vec<EntityLocation>,
}

/// Slots added to a shard whenever its free list runs dry.
const GROWTH: EntityCount = 1024;

impl Entities {
    fn ensure_capacity(&mut self, additional_entities: EntityCount) -> Result<(), CapacityError> {
        let current = self.versions.len() as u64;
        let capacity = INDEX_CAP as u64 + 1;
        let entities_needed = (current + additional_entities as u64).min(capacity);
        if entities_needed <= current {
            return Err(CapacityError { entities_needed: current + 1, capacity });
        }

        self.versions.resize(entities_needed as usize, 0);
        self.alive.resize(entities_needed as usize, false);
        self.locations.resize(entities_needed as usize, EntityLocation::default());

        // Reverse so low indices are handed out first.
        for index in (current..entities_needed).rev() {
            self.free_store.push(index as IndexID);
        }
        Ok(())
    }

    fn spawn(&mut self, shard_id: ShardID, location: EntityLocation) -> Result<Entity, CapacityError> {
        if self.free_store.is_empty() {
            self.ensure_capacity(GROWTH)?;
        }
        let Some(index) = self.free_store.pop() else {
            return Err(CapacityError {
                entities_needed: self.versions.len() as u64 + 1,
                capacity: INDEX_CAP as u64 + 1,
            });
        };

        let slot = index as usize;
        self.alive[slot] = true;
        self.locations[slot] = location;
        Ok(make_entity(shard_id, index, self.versions[slot]))
    }

    fn is_alive(&self, entity: Entity) -> bool {
        let index = entity.index() as usize;
        index < self.versions.len()
            && self.alive[index]
            && self.versions[index] == entity.version()
    }

    fn despawn(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let index = entity.index() as usize;
        self.versions[index] = self.versions[index].wrapping_add(1);
        self.alive[index] = false;
        self.locations[index] = EntityLocation::default();
        self.free_store.push(entity.index());
        true
    }

    fn get_location(&self, entity: Entity) -> Option<EntityLocation> {
        self.is_alive(entity).then(|| self.locations[entity.index() as usize])
    }

    fn set_location(&mut self, entity: Entity, location: EntityLocation) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        self.locations[entity.index() as usize] = location;
        true
    }
}

struct Shard {
    entities: Mutex<Entities>,
    live_entity_count: AtomicU32,
}

impl Shard {
    fn new() -> Self {
        Self {
            entities: Mutex::new(Entities::default()),
            live_entity_count: AtomicU32::new(0),
        }
    }

    // The slot table is updated in place without intermediate states a panic
    // could expose, so a poisoned lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, Entities> {
        self.entities.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sharded entity allocator and location tracker.
pub struct EntityShards {
    shards: Vec<Shard>,
}

impl EntityShards {
    /// Creates `n_shards` empty shards.
    ///
    /// ## Errors
    /// Fails with [`ShardBoundsError`] if `n_shards` is zero or exceeds what
    /// `SHARD_BITS` can address.
    pub fn new(n_shards: usize) -> Result<Self, ShardBoundsError> {
        if n_shards == 0 || n_shards > (1usize << SHARD_BITS) {
            return Err(ShardBoundsError {
                index: n_shards.min(ShardID::MAX as usize) as ShardID,
                max_index: (1u32 << SHARD_BITS) - 1,
            });
        }
        Ok(Self { shards: (0..n_shards).map(|_| Shard::new()).collect() })
    }

    /// Number of shards.
    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    fn pick_shard_by_thread(&self) -> ShardID {
        let mut hasher = DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        (hasher.finish() as usize % self.shards.len()) as ShardID
    }

    /// Allocates an entity on the calling thread's shard.
    pub fn spawn(&self, location: EntityLocation) -> Result<Entity, SpawnError> {
        self.spawn_on(self.pick_shard_by_thread(), location)
    }

    /// Allocates an entity on a specific shard.
    pub fn spawn_on(&self, shard_id: ShardID, location: EntityLocation) -> Result<Entity, SpawnError> {
        let Some(shard) = self.shards.get(shard_id as usize) else {
            return Err(ShardBoundsError {
                index: shard_id,
                max_index: (self.shard_count() - 1) as u32,
            }
            .into());
        };

        let entity = shard.lock().spawn(shard_id, location)?;
        shard.live_entity_count.fetch_add(1, Ordering::Relaxed);
        Ok(entity)
    }

    /// Returns `true` if `entity` refers to a live slot of the same version.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.shards
            .get(entity.shard() as usize)
            .is_some_and(|shard| shard.lock().is_alive(entity))
    }

    /// Current location of a live entity.
    pub fn get_location(&self, entity: Entity) -> Option<EntityLocation> {
        self.shards.get(entity.shard() as usize)?.lock().get_location(entity)
    }

    /// Updates the location of a live entity. Returns `false` for stale handles.
    pub fn set_location(&self, entity: Entity, location: EntityLocation) -> bool {
        self.shards
            .get(entity.shard() as usize)
            .is_some_and(|shard| shard.lock().set_location(entity, location))
    }

    /// Releases a live entity. Returns `false` for stale handles.
    pub fn despawn(&self, entity: Entity) -> bool {
        let Some(shard) = self.shards.get(entity.shard() as usize) else { return false; };
        if shard.lock().despawn(entity) {
            shard.live_entity_count.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Total number of live entities across shards.
    pub fn live_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.live_entity_count.load(Ordering::Relaxed) as usize)
            .sum()
    }
}
