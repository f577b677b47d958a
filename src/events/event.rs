//! Event capability and type-erased payloads.
//!
//! An event is an ordinary component type that opts in by implementing
//! [`Event`]. Once registered with an
//! [`EventTypeRegistry`](crate::events::registry::EventTypeRegistry), posting
//! one materializes an entity whose only component is the event record.
//! Zero-sized events are pure signals.

use std::any::{type_name, Any, TypeId};
use std::fmt;


/// Capability marker for event records.
///
/// Records are copied by value when posted and when dispatched, hence `Clone`.
///
/// ```ignore
/// #[derive(Clone, Copy, Default)]
/// struct Ping;
/// impl Event for Ping {}
/// ```
pub trait Event: Clone + Send + Sync + 'static {}

/// Identifier of an event shape.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventTypeId {
    type_id: TypeId,
    name: &'static str,
}

impl EventTypeId {
    /// Identifier of event type `E`.
    pub fn of<E: Event>() -> Self {
        Self { type_id: TypeId::of::<E>(), name: type_name::<E>() }
    }

    /// Rust `TypeId` of the event type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Rust type name of the event type.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for EventTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventTypeId({})", self.name)
    }
}

impl fmt::Display for EventTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Payload handed to hooks.
#[derive(Clone, Copy)]
pub enum EventPayload<'a> {
    /// Zero-sized event; nothing was read from the store.
    Empty,
    /// Copy of the event record.
    Data(&'a dyn Any),
}

impl<'a> EventPayload<'a> {
    /// The record as `E`, if this payload carries one of that type.
    pub fn get<E: Event>(&self) -> Option<&'a E> {
        match *self {
            EventPayload::Empty => None,
            EventPayload::Data(value) => value.downcast_ref::<E>(),
        }
    }

    /// Returns `true` for zero-sized events.
    pub fn is_empty(&self) -> bool {
        matches!(self, EventPayload::Empty)
    }
}

impl fmt::Debug for EventPayload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventPayload::Empty => f.write_str("Empty"),
            EventPayload::Data(_) => f.write_str("Data(..)"),
        }
    }
}
