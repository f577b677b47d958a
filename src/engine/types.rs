//! Core ECS Types, Identifiers, and Bit-Level Layouts
//!
//! This module defines the **fundamental identifiers, bit layouts, and
//! signatures** shared by the store, the command buffers, the scheduler and the
//! event bus built on top of them.
//!
//! ## Entity Representation
//!
//! Entities are encoded as a packed 64-bit integer with the following layout:
//!
//! ```text
//! | version | shard | index |
//! ```
//!
//! - **Index** identifies the slot within a shard.
//! - **Shard** partitions allocation so producers on different threads rarely
//!   contend on the same allocator.
//! - **Version** enables stale-entity detection after despawning. Event
//!   entities live for a single cycle, so slots are recycled constantly and the
//!   version is what keeps last cycle's handles from aliasing this cycle's.
//!
//! ## Signatures
//!
//! Components are identified by compact [`ComponentID`] values. Sets of
//! components are fixed-size bit arrays ([`Signature`]) used for archetype
//! identity, query matching, and access-conflict detection between systems.
//!
//! [`QuerySignature`] extends this with the three matching modes the runtime
//! needs: *all of*, *any of*, and *none of*. The "any of" mode is what lets a
//! single query cover every registered event shape.

use crate::engine::component::component_id_of;
use crate::engine::error::ECSResult;


/// Bit-width type used for compile-time layout calculations.
pub type Bits = u8;

/// Globally unique entity identifier encoded as a packed 64-bit value.
pub type EntityID = u64;
/// Identifier for an entity allocation shard.
pub type ShardID = u16;
/// Index within a shard.
pub type IndexID = u32;
/// Generation counter used to detect stale entities.
pub type VersionID = u32;
/// Count of live entities.
pub type EntityCount = u32;

/// Unique identifier for a system.
pub type SystemID = u16;
/// Simulation tick counter.
pub type Tick = u64;

/// Index handed to a concurrent producer; doubles as the playback sort key.
pub type SlotIndex = u32;

/// Total number of bits in an [`EntityID`].
pub const ENTITY_BITS: Bits = 64;
/// Number of bits reserved for shard identification.
pub const SHARD_BITS: Bits = 10;
/// Number of bits reserved for entity versioning.
pub const VERSION_BITS: Bits = 32;
/// Number of bits reserved for entity index within a shard.
pub const INDEX_BITS: Bits = ENTITY_BITS - SHARD_BITS - VERSION_BITS;

const _: [(); 1] = [(); (VERSION_BITS + SHARD_BITS < ENTITY_BITS) as usize];
const _: [(); 1] = [(); (INDEX_BITS > 0) as usize];
const _: [(); 1] = [(); (INDEX_BITS < ENTITY_BITS) as usize];
const _: [(); 1] = [(); (SHARD_BITS < ENTITY_BITS) as usize];

const fn mask(bits: Bits) -> EntityID {
    if bits == 0 { 0 } else { ((1 as EntityID) << bits) - 1 }
}

/// Mask selecting the index portion of an [`EntityID`].
pub const INDEX_MASK: EntityID = mask(INDEX_BITS);
/// Mask selecting the shard portion of an [`EntityID`].
pub const SHARD_MASK: EntityID = mask(SHARD_BITS);
/// Maximum number of indices per shard.
pub const INDEX_CAP: IndexID = INDEX_MASK as IndexID;

/// Unique identifier for an archetype.
pub type ArchetypeID = u16;
/// Row index within an archetype.
pub type RowID = u32;

/// Unique identifier for a component type.
pub type ComponentID = u16;

/// Maximum number of registered component types.
pub const COMPONENT_CAP: usize = 1024;
/// Number of `u64` words required to represent a full component signature.
pub const SIGNATURE_SIZE: usize = COMPONENT_CAP.div_ceil(64);

/// Bitset representing a set of components.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Packed component bitset.
    pub components: [u64; SIGNATURE_SIZE],
}

impl Default for Signature {
    fn default() -> Self {
        Self {
            components: [0u64; SIGNATURE_SIZE],
        }
    }
}

impl Signature {
    /// Sets the bit corresponding to `component_id`.
    #[inline]
    pub fn set(&mut self, component_id: ComponentID) {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        self.components[index] |= 1u64 << bits;
    }

    /// Clears the bit corresponding to `component_id`.
    #[inline]
    pub fn clear(&mut self, component_id: ComponentID) {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        self.components[index] &= !(1u64 << bits);
    }

    /// Returns `true` if `component_id` is present in this signature.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        (self.components[index] >> bits) & 1 == 1
    }

    /// Returns `true` if no component bit is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.iter().all(|&word| word == 0)
    }

    /// Returns `true` if all components in `signature` are present.
    #[inline]
    pub fn contains_all(&self, signature: &Signature) -> bool {
        for (component_a, component_b) in self.components.iter().zip(signature.components.iter()) {
            if (component_a & component_b) != *component_b { return false; }
        }
        true
    }

    /// Returns `true` if at least one component is shared with `signature`.
    #[inline]
    pub fn intersects(&self, signature: &Signature) -> bool {
        self.components
            .iter()
            .zip(signature.components.iter())
            .any(|(a, b)| (a & b) != 0)
    }

    /// Number of components set in this signature.
    #[inline]
    pub fn len(&self) -> usize {
        self.components.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Iterates over all component IDs set in this signature, in ascending order.
    pub fn iterate_over_components(&self) -> impl Iterator<Item = ComponentID> + '_ {
        iter_bits_from_words(&self.components)
    }
}

/// Builds a component signature from a list of component IDs.
pub fn build_signature(component_ids: &[ComponentID]) -> Signature {
    let mut signature = Signature::default();
    for &component_id in component_ids { signature.set(component_id); }
    signature
}

/// Iterates over component IDs set in a raw signature word array.
#[inline]
pub fn iter_bits_from_words(
    words: &[u64; SIGNATURE_SIZE],
) -> impl Iterator<Item = ComponentID> + '_ {
    words
        .iter()
        .enumerate()
        .flat_map(|(word_index, &word)| {
            let base = word_index * 64;
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some((base + tz) as ComponentID)
            })
        })
}

/// Component signature used for query matching.
///
/// An archetype matches when:
/// * it contains every component of `all`,
/// * it contains at least one component of `any` (ignored when `any` is empty),
/// * it contains none of `without`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuerySignature {
    /// Components that must all be present.
    pub all: Signature,

    /// Components of which at least one must be present.
    pub any: Signature,

    /// Components explicitly excluded from the query.
    pub without: Signature,
}

impl QuerySignature {
    /// Query matching every archetype that has at least one of `component_ids`.
    pub fn any_of(component_ids: &[ComponentID]) -> Self {
        Self { any: build_signature(component_ids), ..Self::default() }
    }

    /// Returns `true` if an archetype satisfies this query.
    pub fn matches(&self, archetype_signature: &Signature) -> bool {
        archetype_signature.contains_all(&self.all)
            && (self.any.is_empty() || archetype_signature.intersects(&self.any))
            && !archetype_signature.intersects(&self.without)
    }

    /// Returns `true` if this query can never match anything.
    ///
    /// An empty query (no `all`, no `any`) would match every archetype; the
    /// runtime treats that as "nothing requested" instead.
    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.any.is_empty()
    }
}

/// Marks a component type as required in a query signature.
pub fn set_all<T: 'static + Send + Sync>(signature: &mut QuerySignature) -> ECSResult<()> {
    signature.all.set(component_id_of::<T>()?);
    Ok(())
}

/// Excludes a component type from a query signature.
pub fn set_without<T: 'static + Send + Sync>(signature: &mut QuerySignature) -> ECSResult<()> {
    signature.without.set(component_id_of::<T>()?);
    Ok(())
}

/// Declares the component access set of a system.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessSets {
    /// Components read by the system.
    pub read: Signature,
    /// Components written by the system.
    pub write: Signature,
}

impl AccessSets {
    /// Returns `true` if this access set conflicts with another.
    #[inline]
    pub fn conflicts_with(&self, other: &AccessSets) -> bool {
        // Conflicts if: (W ∩ W) or (W ∩ R) or (R ∩ W)
        self.write.intersects(&other.write)
            || self.write.intersects(&other.read)
            || self.read.intersects(&other.write)
    }
}
