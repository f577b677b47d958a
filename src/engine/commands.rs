//! # Commands
//!
//! Deferred structural mutations of the store.
//!
//! Systems and producers never change archetype structure directly while other
//! work may be reading it. They record `Command` values into a deferred buffer
//! (see [`buffers`](crate::engine::buffers)) or the manager's deferred queue,
//! and the commands are applied later at a synchronization point with
//! exclusive access to [`ECSData`](crate::engine::manager::ECSData).
//!
//! ## Invariants
//! - Commands recorded into one buffer are applied in their recorded order
//!   (concurrent buffers order by slot first, see `buffers`).
//! - A command that targets a dead or stale entity is a no-op, not an error.
//! - Component values must match the registered type of their component id;
//!   a mismatch is rejected before any row is moved.

use std::any::Any;
use std::fmt;

use crate::engine::component::Bundle;
use crate::engine::entity::Entity;
use crate::engine::types::{ComponentID, QuerySignature};


/// A deferred store mutation.
pub enum Command {
    /// Creates an entity carrying every component of `bundle`.
    Spawn {
        /// Component values of the new entity.
        bundle: Bundle,
    },

    /// Destroys one entity.
    Despawn {
        /// Entity to remove.
        entity: Entity,
    },

    /// Destroys every entity whose archetype matches `query`.
    ///
    /// The match is evaluated when the command is applied, not when it is
    /// recorded, so entities created earlier in the same playback are
    /// included.
    DespawnMatching {
        /// Archetype filter.
        query: QuerySignature,
    },

    /// Adds (or replaces) a component on an existing entity.
    Add {
        /// Target entity.
        entity: Entity,
        /// Component being attached.
        component_id: ComponentID,
        /// Component value; its dynamic type must match `component_id`.
        value: Box<dyn Any + Send>,
    },

    /// Removes a component from an existing entity.
    ///
    /// Removing the last component despawns the entity.
    Remove {
        /// Target entity.
        entity: Entity,
        /// Component being detached.
        component_id: ComponentID,
    },
}

impl Command {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Spawn { .. } => "spawn",
            Command::Despawn { .. } => "despawn",
            Command::DespawnMatching { .. } => "despawn_matching",
            Command::Add { .. } => "add",
            Command::Remove { .. } => "remove",
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Spawn { bundle } => f.debug_struct("Spawn").field("bundle", bundle).finish(),
            Command::Despawn { entity } => f.debug_struct("Despawn").field("entity", entity).finish(),
            Command::DespawnMatching { query } => {
                f.debug_struct("DespawnMatching").field("query", query).finish()
            }
            Command::Add { entity, component_id, .. } => f
                .debug_struct("Add")
                .field("entity", entity)
                .field("component_id", component_id)
                .finish_non_exhaustive(),
            Command::Remove { entity, component_id } => f
                .debug_struct("Remove")
                .field("entity", entity)
                .field("component_id", component_id)
                .finish(),
        }
    }
}
