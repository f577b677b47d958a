//! Event bus errors.

use std::any::TypeId;

use crate::engine::error::ECSError;

/// Result alias for event bus operations.
pub type EventResult<T> = Result<T, EventError>;

/// Errors raised by the event bus.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// Events were posted before the bus created this cycle's destroyer
    /// buffer. Posting must happen after the bus has run in the cycle, or
    /// the new events could be destroyed together with last cycle's.
    #[error("event posted before the destroyer buffer was allocated for this cycle")]
    DestroyerNotAllocated,

    /// The value is not a registered event type.
    #[error("{} is not a registered event type", describe_type(.type_id, .name))]
    InvalidEventType {
        /// `TypeId` of the rejected value.
        type_id: TypeId,
        /// Type name, when known statically. A value posted through
        /// `&dyn Any` carries only its `TypeId`.
        name: Option<&'static str>,
    },

    /// No event bus was added to the scheduler.
    #[error("no event bus found")]
    BusNotFound,

    /// The underlying store rejected an operation.
    #[error(transparent)]
    Engine(#[from] ECSError),
}

impl From<EventError> for ECSError {
    fn from(error: EventError) -> Self {
        match error {
            EventError::Engine(inner) => inner,
            other => ECSError::Internal(other.to_string()),
        }
    }
}

fn describe_type(type_id: &TypeId, name: &Option<&'static str>) -> String {
    match name {
        Some(name) => (*name).to_owned(),
        None => format!("value of {type_id:?}"),
    }
}
