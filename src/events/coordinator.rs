//! # Command buffer coordination
//!
//! The coordinator owns the three deferred handles the bus writes through:
//!
//! | handle      | written by                     | records                          |
//! |-------------|--------------------------------|----------------------------------|
//! | destroyer   | the bus update, once per cycle | despawn of every event entity    |
//! | creator     | serial posts                   | spawn of one event entity        |
//! | concurrent  | job parts in parallel jobs     | spawn of one event entity / slot |
//!
//! ## Ordering
//! Buffers replay in creation order, so destroy-before-create holds as long as
//! the destroyer's buffer for a cycle is created before any creator buffer of
//! that cycle. The bus creates it in its update. The creator handles only
//! create a buffer through [`DeferredBuffer::buffer_after`] /
//! [`DeferredBuffer::concurrent_after`], which check for the destroyer's
//! buffer and create their own under the playback point's lock, so a playback
//! racing with a post cannot slip between the two. A create without the
//! destroyer's buffer fails with [`EventError::DestroyerNotAllocated`] and
//! records nothing.
//!
//! ## Slots
//! Each job part carries a slot index, unique within the concurrent handle's
//! current buffer. The counter is reset by the handle's new-buffer callback,
//! and "make sure a buffer exists, then take the next slot" runs under one
//! mutex, so two producers can never observe the same slot for one buffer.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::engine::buffers::{ConcurrentWriter, DeferredBuffer, PlaybackPoint};
use crate::engine::component::Bundle;
use crate::engine::jobs::JobHandle;
use crate::engine::types::{QuerySignature, SlotIndex};
use crate::events::error::{EventError, EventResult};


/// Slot allocator for the concurrent handle.
#[derive(Debug, Default)]
pub struct SlotCounter {
    next: AtomicU32,
}

impl SlotCounter {
    /// Returns the next slot and advances the counter.
    pub fn next(&self) -> SlotIndex {
        self.next.fetch_add(1, Ordering::AcqRel)
    }

    /// Restarts numbering at zero.
    pub fn reset(&self) {
        self.next.store(0, Ordering::Release);
    }

    /// Slots handed out since the last reset.
    pub fn issued(&self) -> SlotIndex {
        self.next.load(Ordering::Acquire)
    }
}

/// Owner of the destroyer, creator and concurrent handles.
pub struct CommandBufferCoordinator {
    destroyer: DeferredBuffer,
    creator: DeferredBuffer,
    concurrent: DeferredBuffer,
    slots: Arc<SlotCounter>,
    allocation: Mutex<()>,
    events: QuerySignature,
}

impl CommandBufferCoordinator {
    /// Creates the three handles on `point`.
    ///
    /// `events` is the filter the destroyer uses; it must match every
    /// registered event type.
    pub fn new(point: &Arc<PlaybackPoint>, events: QuerySignature) -> Self {
        let slots = Arc::new(SlotCounter::default());
        let concurrent = point.handle();
        let counter = Arc::clone(&slots);
        concurrent.on_new_buffer(move || {
            counter.reset();
            tracing::trace!("concurrent event buffer created; slots reset");
        });

        Self {
            destroyer: point.handle(),
            creator: point.handle(),
            concurrent,
            slots,
            allocation: Mutex::new(()),
            events,
        }
    }

    /// Destroyer handle.
    pub fn destroyer(&self) -> &DeferredBuffer {
        &self.destroyer
    }

    /// Serial creator handle.
    pub fn creator(&self) -> &DeferredBuffer {
        &self.creator
    }

    /// Concurrent creator handle.
    pub fn concurrent(&self) -> &DeferredBuffer {
        &self.concurrent
    }

    /// Slot counter of the concurrent handle.
    pub fn slots(&self) -> &SlotCounter {
        &self.slots
    }

    /// Records the destruction of every event entity at the next playback.
    ///
    /// Creates this cycle's destroyer buffer if needed. Calling it again in
    /// the same cycle records a second despawn that finds nothing left to
    /// destroy.
    pub fn destroy_pending_events(&self) -> EventResult<()> {
        let writer = self.destroyer.buffer();
        writer.despawn_matching(self.events);
        tracing::trace!(epoch = writer.epoch(), "event destruction recorded");
        Ok(())
    }

    fn destroyer_missing(&self) -> EventError {
        tracing::error!(
            epoch = self.destroyer.point().epoch(),
            "event created before the destroyer buffer exists for this cycle"
        );
        EventError::DestroyerNotAllocated
    }

    /// Records the creation of an event entity through the serial creator.
    pub fn post_serial(&self, bundle: Bundle) -> EventResult<()> {
        let writer = self
            .creator
            .buffer_after(&self.destroyer)
            .ok_or_else(|| self.destroyer_missing())?;
        writer.spawn(bundle);
        Ok(())
    }

    /// Hands out a concurrent writer and a slot unique within its buffer.
    pub fn acquire_concurrent_slot(&self) -> EventResult<(ConcurrentWriter, SlotIndex)> {
        // The guard only serializes allocation; it protects no data.
        let _allocation = self.allocation.lock().unwrap_or_else(PoisonError::into_inner);
        let writer = self
            .concurrent
            .concurrent_after(&self.destroyer)
            .ok_or_else(|| self.destroyer_missing())?;
        let slot = self.slots.next();
        Ok((writer, slot))
    }

    /// Makes the next playback wait for `job`. Dependencies accumulate.
    pub fn register_dependency(&self, job: JobHandle) {
        self.concurrent.add_job_dependency(job);
    }
}
