//! Error types for the store, the command buffers and the scheduler.
//!
//! This module declares focused, composable error types used across the
//! entity–component storage, deferred command playback and system execution.
//! Each error carries enough context to make failures actionable while
//! remaining small and cheap to pass around or convert into the aggregate
//! [`ECSError`].
//!
//! ## Typical flow
//! Low-level storage operations return small, dedicated error types (e.g.
//! [`AttributeError`]). Higher-level orchestration code uses `?` to bubble
//! failures into [`SpawnError`], [`MoveError`] or [`ExecutionError`], and the
//! public surface returns [`ECSResult`].
//!
//! ```ignore
//! fn spawn_one(data: &mut ECSData, bundle: Bundle) -> ECSResult<Entity> {
//!     // SpawnError -> ECSError via `From`
//!     Ok(data.spawn(bundle)?)
//! }
//! ```
//!
//! ## Display vs. Debug
//! * `Display` is optimized for operator logs (short, imperative phrasing).
//! * `Debug` (derived) retains full structure for diagnostics.

use std::any::TypeId;
use std::sync::PoisonError;

use crate::engine::types::{ComponentID, RowID, ShardID};


/// Result alias used across the engine.
pub type ECSResult<T> = Result<T, ECSError>;

/// Returned when the allocator cannot create more entities in a shard.
///
/// ### Fields
/// * `entities_needed` — Total number of slots the operation required.
/// * `capacity` — The upper bound that prevented the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("entity limit reached ({entities_needed} needed; capacity {capacity})")]
pub struct CapacityError {
    /// Total entities the operation attempted to allocate.
    pub entities_needed: u64,

    /// Current capacity limiting the operation.
    pub capacity: u64,
}

/// Returned when a shard index is outside the configured shard set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("shard index {index} out of bounds (max index {max_index})")]
pub struct ShardBoundsError {
    /// Offending shard index that was requested.
    pub index: ShardID,

    /// Maximum valid shard index (inclusive) for the collection.
    pub max_index: u32,
}

/// Returned when a column write receives a value of the wrong type.
///
/// This is a logic/configuration error surfaced by storage when component
/// type IDs diverge (e.g. writing `Velocity` into a `Position` column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("type mismatch: expected {expected_name}, actual {actual:?}")]
pub struct TypeMismatchError {
    /// Destination storage's declared element type.
    pub expected: TypeId,

    /// Human-readable name of the declared element type.
    pub expected_name: &'static str,

    /// Provided value's dynamic type.
    pub actual: TypeId,
}

/// Aggregate error for attribute (component column) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AttributeError {
    /// A row index addressed storage outside valid bounds.
    #[error("row {row} out of bounds (length {length})")]
    Position {
        /// Row that was addressed.
        row: RowID,
        /// Number of rows in the column.
        length: usize,
    },

    /// The dynamic type of a value did not match the component storage type.
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatchError),
}

/// High-level error for entity spawning.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpawnError {
    /// Entity creation failed due to insufficient capacity.
    #[error(transparent)]
    Capacity(#[from] CapacityError),

    /// A shard index was outside the valid range.
    #[error(transparent)]
    ShardBounds(#[from] ShardBoundsError),

    /// An entity handle was stale or referred to a despawned entity.
    #[error("stale or dead entity reference")]
    StaleEntity,

    /// A bundle with no components cannot form an archetype.
    #[error("cannot spawn an entity without components")]
    EmptyBundle,

    /// A component declared by the bundle signature carried no value.
    #[error("bundle declares component {component_id} but carries no value for it")]
    MissingComponent {
        /// Component whose value was missing.
        component_id: ComponentID,
    },

    /// Failed while pushing component data into storage.
    #[error("failed to push into storage: {0}")]
    StoragePushFailedWith(#[from] AttributeError),
}

/// Errors that can occur while moving an entity between archetypes.
///
/// These generally indicate internal inconsistencies rather than recoverable
/// user-facing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoveError {
    /// A column expected in an archetype was not allocated.
    #[error("archetype has no column for component {component_id}")]
    MissingColumn {
        /// Component whose column was missing.
        component_id: ComponentID,
    },

    /// Failed while inserting component data into the destination archetype.
    #[error("failed to insert component {component_id} into destination archetype: {source_error}")]
    PushFailed {
        /// Component being inserted.
        component_id: ComponentID,
        /// Underlying attribute error.
        source_error: AttributeError,
    },

    /// Failed while removing component data from the source archetype.
    #[error("failed to remove component {component_id} from source archetype: {source_error}")]
    SwapRemoveError {
        /// Component being removed.
        component_id: ComponentID,
        /// Underlying attribute error.
        source_error: AttributeError,
    },

    /// Entity metadata could not be updated consistently after the move.
    #[error("failed to update entity metadata after archetype move")]
    MetadataFailure,
}

/// Errors raised by the global component registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Registration attempted after the registry was frozen.
    #[error("component registry is frozen; cannot register {name}")]
    Frozen {
        /// Type name of the rejected component.
        name: &'static str,
    },

    /// More than `COMPONENT_CAP` component types were registered.
    #[error("exceeded configured component capacity ({cap})")]
    CapacityExceeded {
        /// Configured capacity.
        cap: usize,
    },

    /// A component type was used before it was registered.
    #[error("component not registered: {name}")]
    NotRegistered {
        /// Type name of the missing component.
        name: &'static str,
    },

    /// A component id has no storage factory installed.
    #[error("no storage factory for component id {component_id}")]
    MissingFactory {
        /// Offending component id.
        component_id: ComponentID,
    },

    /// The registry lock was poisoned by a panicking thread.
    #[error("component registry lock poisoned")]
    PoisonedLock,
}

/// Errors raised while executing systems, jobs or command playback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// A lock guarding engine state was poisoned by a panicking thread.
    #[error("{what} lock poisoned")]
    LockPoisoned {
        /// Which lock was poisoned.
        what: &'static str,
    },

    /// A job panicked before completing.
    #[error("job `{name}` panicked")]
    JobPanicked {
        /// Name the job was scheduled under.
        name: String,
    },

    /// The rayon worker pool could not be constructed.
    #[error("failed to build worker pool: {reason}")]
    WorkerPool {
        /// Message reported by rayon.
        reason: String,
    },

    /// A system returned an error while running.
    #[error("system {system} ({name}) failed: {reason}")]
    SystemFailed {
        /// Identifier of the failing system.
        system: crate::engine::types::SystemID,
        /// Name of the failing system.
        name: &'static str,
        /// Rendered error.
        reason: String,
    },
}

/// Aggregate error returned by the public engine API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ECSError {
    /// Entity creation failed.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// Archetype migration failed.
    #[error(transparent)]
    Move(#[from] MoveError),

    /// Component registration or lookup failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// System, job or playback execution failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Column access failed.
    #[error(transparent)]
    Attribute(#[from] AttributeError),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecutionError {
    /// Maps a poisoned lock into an [`ExecutionError::LockPoisoned`].
    pub fn poisoned<T>(what: &'static str) -> impl FnOnce(PoisonError<T>) -> ExecutionError {
        move |_| ExecutionError::LockPoisoned { what }
    }
}
