//! # Component Registry
//!
//! This module provides a global registry that assigns stable `ComponentID` values
//! to Rust component types and exposes type-erased storage factories for archetype
//! column allocation.
//!
//! ## Purpose
//! The registry decouples component type information (`TypeId`, name, size, alignment)
//! from runtime storage, enabling archetypes to store heterogeneous component columns
//! behind `TypeErasedAttribute`.
//!
//! ## Design
//! - Components are registered once and assigned a compact `ComponentID` in `[0, COMPONENT_CAP)`.
//! - A per-component factory function is stored for constructing empty column storage.
//! - The registry can be `freeze()`d to prevent further registrations after world setup.
//!   Re-registering an already known type stays legal after freezing and returns the
//!   existing id.
//!
//! ## Invariants
//! - `ComponentID` values are unique and stable for the lifetime of the process.
//! - A registered component always has a corresponding storage factory.
//!
//! ## Concurrency
//! The registry is protected by `RwLock` for concurrent reads and serialized writes.

use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    mem::{align_of, size_of},
    sync::{OnceLock, RwLock},
};

use crate::engine::error::{ECSResult, RegistryError};
use crate::engine::storage::{Attribute, TypeErasedAttribute};
use crate::engine::types::{ComponentID, Signature, COMPONENT_CAP};


/// Factory function for constructing an empty type-erased component attribute column.
type FactoryFn = fn() -> Box<dyn TypeErasedAttribute>;

fn new_attribute_storage<T: 'static + Send + Sync>() -> Box<dyn TypeErasedAttribute> {
    Box::new(Attribute::<T>::default())
}

/// Global mapping between Rust component types and compact `ComponentID` values.
///
/// ## Design
/// - `by_type` maps `TypeId -> ComponentID`.
/// - `by_id` stores `ComponentDesc` and the storage factory indexed by `ComponentID`.
/// - `frozen` prevents registration of new types once the world is initialized.
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentID>,
    by_id: Vec<(ComponentDesc, FactoryFn)>,
    frozen: bool,
}

static REGISTRY: OnceLock<RwLock<ComponentRegistry>> = OnceLock::new();

fn component_registry() -> &'static RwLock<ComponentRegistry> {
    REGISTRY.get_or_init(|| {
        RwLock::new(ComponentRegistry {
            by_type: HashMap::new(),
            by_id: Vec::new(),
            frozen: false,
        })
    })
}

impl ComponentRegistry {
    /// Freezes the registry, preventing further component registrations.
    pub fn freeze(&mut self) { self.frozen = true; }

    /// Returns `true` if the registry has been frozen.
    pub fn is_frozen(&self) -> bool { self.frozen }

    /// Returns the `ComponentID` associated with a `TypeId`, if registered.
    pub fn component_id_of_type_id(&self, type_id: TypeId) -> Option<ComponentID> {
        self.by_type.get(&type_id).copied()
    }

    /// Returns the component descriptor for a `ComponentID`, if registered.
    pub fn description_by_component_id(&self, component_id: ComponentID) -> Option<&ComponentDesc> {
        self.by_id.get(component_id as usize).map(|(desc, _)| desc)
    }

    /// Registers component type `T` and returns its assigned `ComponentID`.
    ///
    /// ## Behavior
    /// - If `T` is already registered, returns the existing ID (even when frozen).
    /// - Otherwise allocates the next ID and installs the column factory for `T`.
    pub fn register<T: 'static + Send + Sync>(&mut self) -> Result<ComponentID, RegistryError> {
        let type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&type_id) {
            return Ok(existing);
        }

        if self.frozen {
            return Err(RegistryError::Frozen { name: type_name::<T>() });
        }
        if self.by_id.len() >= COMPONENT_CAP {
            return Err(RegistryError::CapacityExceeded { cap: COMPONENT_CAP });
        }

        let id = self.by_id.len() as ComponentID;
        self.by_type.insert(type_id, id);
        self.by_id.push((ComponentDesc::of::<T>().with_id(id), new_attribute_storage::<T>));
        Ok(id)
    }
}

/// Registers component type `T` in the global registry and returns its `ComponentID`.
pub fn register_component<T: 'static + Send + Sync>() -> ECSResult<ComponentID> {
    let mut registry = component_registry()
        .write()
        .map_err(|_| RegistryError::PoisonedLock)?;
    let component_id = registry.register::<T>()?;
    tracing::trace!(component_id, name = type_name::<T>(), "component registered");
    Ok(component_id)
}

/// Freezes the global component registry.
pub fn freeze_components() -> ECSResult<()> {
    let mut registry = component_registry()
        .write()
        .map_err(|_| RegistryError::PoisonedLock)?;
    registry.freeze();
    Ok(())
}

/// Returns the registered `ComponentID` for type `T`.
pub fn component_id_of<T: 'static>() -> ECSResult<ComponentID> {
    component_id_of_type_id(TypeId::of::<T>())
        .ok_or_else(|| RegistryError::NotRegistered { name: type_name::<T>() }.into())
}

/// Returns the `ComponentID` associated with a runtime `TypeId`, if registered.
pub fn component_id_of_type_id(type_id: TypeId) -> Option<ComponentID> {
    let registry = component_registry().read().ok()?;
    registry.component_id_of_type_id(type_id)
}

/// Returns a copy of the descriptor for `component_id`, if registered.
pub fn component_description_by_component_id(component_id: ComponentID) -> Option<ComponentDesc> {
    let registry = component_registry().read().ok()?;
    registry.description_by_component_id(component_id).copied()
}

/// Creates an empty type-erased storage column for `component_id`.
pub fn make_empty_component(component_id: ComponentID) -> ECSResult<Box<dyn TypeErasedAttribute>> {
    let registry = component_registry()
        .read()
        .map_err(|_| RegistryError::PoisonedLock)?;
    let (_, factory) = registry
        .by_id
        .get(component_id as usize)
        .ok_or(RegistryError::MissingFactory { component_id })?;
    Ok(factory())
}

/// Describes a registered component type.
///
/// `ComponentDesc` is `Copy` and safe to clone freely for reporting and diagnostics.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComponentDesc {
    /// Runtime identifier assigned to this component type.
    pub component_id: ComponentID,

    /// Rust type name for diagnostics.
    pub name: &'static str,

    /// Runtime `TypeId` of the component.
    pub type_id: TypeId,

    /// Size of the component type in bytes.
    pub size: usize,

    /// Alignment of the component type in bytes.
    pub align: usize,
}

impl ComponentDesc {
    /// Constructs a descriptor for type `T`; finalize it with [`with_id`](Self::with_id).
    #[inline]
    pub fn of<T: 'static>() -> Self {
        Self {
            component_id: 0,
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            size: size_of::<T>(),
            align: align_of::<T>(),
        }
    }

    /// Returns a copy of this descriptor with `component_id` set to the provided value.
    #[inline]
    pub fn with_id(mut self, component_id: ComponentID) -> Self {
        self.component_id = component_id;
        self
    }

    /// Returns `true` if values of this component carry no data.
    #[inline]
    pub fn is_zero_sized(&self) -> bool {
        self.size == 0
    }
}

impl std::fmt::Display for ComponentDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ComponentDesc {{ id: {}, name: {}, size: {}, align: {} }}",
            self.component_id, self.name, self.size, self.align
        )
    }
}

/// Type-erased container for component values.
pub trait DynamicBundle {
    /// Removes and returns the value for `component_id`, if present.
    fn take(&mut self, component_id: ComponentID) -> Option<Box<dyn Any + Send>>;
}

/// A set of component values used to spawn an entity.
#[derive(Default)]
pub struct Bundle {
    signature: Signature,
    values: Vec<(ComponentID, Box<dyn Any + Send>)>,
}

impl Bundle {
    /// Creates an empty bundle.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle holding a single component value.
    pub fn single<T: Any + Send>(component_id: ComponentID, value: T) -> Self {
        let mut bundle = Self::new();
        bundle.insert(component_id, value);
        bundle
    }

    /// Inserts a component value into the bundle, replacing any previous value.
    #[inline]
    pub fn insert<T: Any + Send>(&mut self, component_id: ComponentID, value: T) {
        self.insert_boxed(component_id, Box::new(value));
    }

    /// Inserts an already boxed component value.
    pub fn insert_boxed(&mut self, component_id: ComponentID, value: Box<dyn Any + Send>) {
        if self.signature.has(component_id) {
            self.values.retain(|(cid, _)| *cid != component_id);
        }
        self.signature.set(component_id);
        self.values.push((component_id, value));
    }

    /// Number of component values carried.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the bundle carries no component.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Signature of the components present in this bundle.
    #[inline]
    pub fn signature(&self) -> Signature {
        self.signature
    }
}

impl DynamicBundle for Bundle {
    #[inline]
    fn take(&mut self, component_id: ComponentID) -> Option<Box<dyn Any + Send>> {
        let index = self
            .values
            .iter()
            .position(|(cid, _)| *cid == component_id)?;

        let (_, value) = self.values.swap_remove(index);
        Some(value)
    }
}

impl std::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundle")
            .field("components", &self.signature.iterate_over_components().collect::<Vec<_>>())
            .finish()
    }
}
