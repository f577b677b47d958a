//! # Deferred command buffers
//!
//! Buffers that record [`Command`]s now and replay them later, at a single
//! synchronization point, with exclusive access to the store.
//!
//! ## Design
//! - A [`PlaybackPoint`] is the synchronization point. It counts *epochs*
//!   (one per playback) and keeps every buffer created since the last
//!   playback, in creation order.
//! - A [`DeferredBuffer`] is a long-lived handle owned by whoever produces
//!   commands. It holds at most one underlying buffer per epoch: the first
//!   writer request in an epoch creates it and notifies the handle's
//!   `on_new_buffer` listeners.
//! - Underlying buffers are lock-free append queues. Serial writers append
//!   with sort key `0`; concurrent writers pass a slot index. Playback sorts
//!   each buffer by `(sort key, append sequence)`, so concurrent output replays
//!   in slot order regardless of thread timing.
//!
//! ## Invariants
//! - Buffers replay in creation order. Whoever needs its commands to run
//!   first must create its buffer first. [`DeferredBuffer::buffer_after`]
//!   and [`DeferredBuffer::concurrent_after`] enforce that: the check that
//!   the other handle already has a buffer for the epoch and the creation of
//!   the new buffer happen under the same lock that playback holds while it
//!   advances the epoch.
//! - Every job dependency registered on the point is completed before any
//!   buffer is read.
//! - A buffer is sealed when its playback starts. Appends that arrive after
//!   sealing are not lost: they move to the point's carry-over queue and are
//!   applied at the end of the *next* playback.

use std::any::Any;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crossbeam::queue::SegQueue;

use crate::engine::commands::Command;
use crate::engine::component::Bundle;
use crate::engine::entity::Entity;
use crate::engine::error::{ECSError, ECSResult};
use crate::engine::jobs::JobHandle;
use crate::engine::manager::ECSData;
use crate::engine::types::{ComponentID, QuerySignature, SlotIndex};


/// Playback epoch counter.
pub type Epoch = u64;

// Guards below protect plain collections that are never left half-updated,
// so poisoning is recovered rather than propagated.
fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Entry {
    sort_key: SlotIndex,
    sequence: u64,
    command: Command,
}

/// One epoch's worth of recorded commands.
struct RecordedBuffer {
    id: u64,
    epoch: Epoch,
    sealed: RwLock<bool>,
    sequence: AtomicU64,
    entries: SegQueue<Entry>,
    carry_over: Arc<SegQueue<Command>>,
}

impl RecordedBuffer {
    fn append(&self, sort_key: SlotIndex, command: Command) {
        // Appenders share the read side so sealing waits for in-flight pushes.
        let sealed = self.sealed.read().unwrap_or_else(PoisonError::into_inner);
        if *sealed {
            tracing::warn!(
                buffer = self.id,
                epoch = self.epoch,
                kind = command.kind(),
                "write to a played-back buffer; deferring to next playback"
            );
            self.carry_over.push(command);
            return;
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.entries.push(Entry { sort_key, sequence, command });
    }

    fn seal_and_drain(&self) -> Vec<Entry> {
        *self.sealed.write().unwrap_or_else(PoisonError::into_inner) = true;

        let mut entries = Vec::with_capacity(self.entries.len());
        while let Some(entry) = self.entries.pop() {
            entries.push(entry);
        }
        entries.sort_unstable_by_key(|entry| (entry.sort_key, entry.sequence));
        entries
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Serial writer into the current buffer of a [`DeferredBuffer`].
pub struct CommandWriter {
    buffer: Arc<RecordedBuffer>,
}

impl CommandWriter {
    /// Records `command`.
    pub fn push(&self, command: Command) {
        self.buffer.append(0, command);
    }

    /// Records the creation of an entity from `bundle`.
    pub fn spawn(&self, bundle: Bundle) {
        self.push(Command::Spawn { bundle });
    }

    /// Records the destruction of `entity`.
    pub fn despawn(&self, entity: Entity) {
        self.push(Command::Despawn { entity });
    }

    /// Records the destruction of every entity matching `query`.
    pub fn despawn_matching(&self, query: QuerySignature) {
        self.push(Command::DespawnMatching { query });
    }

    /// Records adding `value` as component `component_id` of `entity`.
    pub fn add_component(&self, entity: Entity, component_id: ComponentID, value: Box<dyn Any + Send>) {
        self.push(Command::Add { entity, component_id, value });
    }

    /// Records removing component `component_id` from `entity`.
    pub fn remove_component(&self, entity: Entity, component_id: ComponentID) {
        self.push(Command::Remove { entity, component_id });
    }

    /// Epoch of the underlying buffer.
    pub fn epoch(&self) -> Epoch {
        self.buffer.epoch
    }
}

/// Writer that may be cloned into parallel jobs.
///
/// Every append carries a slot index. Commands from the same slot replay in
/// append order; distinct slots replay in ascending slot order.
#[derive(Clone)]
pub struct ConcurrentWriter {
    buffer: Arc<RecordedBuffer>,
}

impl ConcurrentWriter {
    /// Records `command` under `slot`.
    pub fn push(&self, slot: SlotIndex, command: Command) {
        self.buffer.append(slot, command);
    }

    /// Records the creation of an entity from `bundle` under `slot`.
    pub fn spawn(&self, slot: SlotIndex, bundle: Bundle) {
        self.push(slot, Command::Spawn { bundle });
    }

    /// Records the destruction of `entity` under `slot`.
    pub fn despawn(&self, slot: SlotIndex, entity: Entity) {
        self.push(slot, Command::Despawn { entity });
    }

    /// Epoch of the underlying buffer.
    pub fn epoch(&self) -> Epoch {
        self.buffer.epoch
    }
}

/// Counts reported by one [`PlaybackPoint::playback`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    /// Epoch that was played back.
    pub epoch: Epoch,
    /// Buffers replayed.
    pub buffers: usize,
    /// Commands applied from those buffers.
    pub commands: usize,
    /// Commands applied from the carry-over queue.
    pub carried_over: usize,
    /// Commands that failed to apply.
    pub failed: usize,
}

/// Synchronization point that replays deferred buffers against the store.
pub struct PlaybackPoint {
    name: &'static str,
    epoch: AtomicU64,
    next_buffer_id: AtomicU64,
    pending: Mutex<Vec<Arc<RecordedBuffer>>>,
    dependencies: Mutex<Vec<JobHandle>>,
    carry_over: Arc<SegQueue<Command>>,
}

impl PlaybackPoint {
    /// Creates a playback point at epoch `0`.
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            epoch: AtomicU64::new(0),
            next_buffer_id: AtomicU64::new(0),
            pending: Mutex::new(Vec::new()),
            dependencies: Mutex::new(Vec::new()),
            carry_over: Arc::new(SegQueue::new()),
        })
    }

    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current epoch; incremented by every playback.
    pub fn epoch(&self) -> Epoch {
        self.epoch.load(Ordering::Acquire)
    }

    /// Creates a new handle recording into this point.
    pub fn handle(self: &Arc<Self>) -> DeferredBuffer {
        DeferredBuffer::new(Arc::clone(self))
    }

    /// Buffers waiting for the next playback.
    pub fn pending_buffers(&self) -> usize {
        relock(&self.pending).len()
    }

    /// Commands waiting for the next playback, including carry-over.
    pub fn pending_commands(&self) -> usize {
        let recorded: usize = relock(&self.pending).iter().map(|buffer| buffer.len()).sum();
        recorded + self.carry_over.len()
    }

    /// Makes the next playback wait for `job` first.
    pub fn add_job_dependency(&self, job: JobHandle) {
        relock(&self.dependencies).push(job);
    }

    // Epoch is read under `pending` so a buffer never lands in the list of an
    // epoch that has already been played back. `owner` records the epoch the
    // buffer belongs to, stored as `epoch + 1` (0 = never allocated).
    fn push_buffer(&self, pending: &mut Vec<Arc<RecordedBuffer>>, owner: &AtomicU64) -> Arc<RecordedBuffer> {
        let epoch = self.epoch();
        let buffer = Arc::new(RecordedBuffer {
            id: self.next_buffer_id.fetch_add(1, Ordering::Relaxed),
            epoch,
            sealed: RwLock::new(false),
            sequence: AtomicU64::new(0),
            entries: SegQueue::new(),
            carry_over: Arc::clone(&self.carry_over),
        });
        pending.push(Arc::clone(&buffer));
        owner.store(epoch + 1, Ordering::Release);
        tracing::trace!(point = self.name, buffer = buffer.id, epoch, "buffer created");
        buffer
    }

    fn create_buffer(&self, owner: &AtomicU64) -> Arc<RecordedBuffer> {
        let mut pending = relock(&self.pending);
        self.push_buffer(&mut pending, owner)
    }

    /// Creates a buffer only if `first` already owns one for the current
    /// epoch, so the new buffer replays after it.
    fn create_buffer_after(&self, owner: &AtomicU64, first: &AtomicU64) -> Option<Arc<RecordedBuffer>> {
        let mut pending = relock(&self.pending);
        if first.load(Ordering::Acquire) != self.epoch() + 1 {
            return None;
        }
        Some(self.push_buffer(&mut pending, owner))
    }

    /// Replays every pending buffer against `data`.
    ///
    /// Steps, in order:
    /// 1. Complete every registered job dependency. A panicked job is logged
    ///    and does not stop playback.
    /// 2. Seal and replay buffers in creation order.
    /// 3. Replay commands that were carried over from writes to buffers that
    ///    were already sealed by an earlier playback.
    /// 4. Advance the epoch.
    ///
    /// ## Errors
    /// Every command is attempted. If any fails, the failures are logged and
    /// the first error is returned after the epoch has advanced.
    pub fn playback(&self, data: &mut ECSData) -> ECSResult<PlaybackStats> {
        match self.replay(data) {
            (_, Some(error)) => Err(error),
            (stats, None) => Ok(stats),
        }
    }

    /// [`playback`](Self::playback) that keeps the counts when a command fails.
    pub(crate) fn replay(&self, data: &mut ECSData) -> (PlaybackStats, Option<ECSError>) {
        let dependencies = mem::take(&mut *relock(&self.dependencies));
        for job in &dependencies {
            if let Err(error) = job.complete() {
                tracing::warn!(point = self.name, %error, "job dependency did not finish cleanly");
            }
        }

        // Snapshot before sealing: writes that race with this playback belong
        // to the next one.
        let carried = self.carry_over.len();

        let (buffers, epoch) = {
            let mut pending = relock(&self.pending);
            let buffers = mem::take(&mut *pending);
            let epoch = self.epoch.fetch_add(1, Ordering::AcqRel);
            (buffers, epoch)
        };

        let mut stats = PlaybackStats { epoch, buffers: buffers.len(), ..PlaybackStats::default() };
        let mut first_error: Option<ECSError> = None;
        let mut apply = |command: Command, stats: &mut PlaybackStats| {
            let kind = command.kind();
            if let Err(error) = data.apply(command) {
                tracing::error!(point = self.name, kind, %error, "deferred command failed");
                stats.failed += 1;
                first_error.get_or_insert(error);
            }
        };

        for buffer in &buffers {
            for entry in buffer.seal_and_drain() {
                stats.commands += 1;
                apply(entry.command, &mut stats);
            }
        }

        for _ in 0..carried {
            let Some(command) = self.carry_over.pop() else { break; };
            stats.carried_over += 1;
            apply(command, &mut stats);
        }

        tracing::debug!(
            point = self.name,
            epoch,
            buffers = stats.buffers,
            commands = stats.commands,
            carried_over = stats.carried_over,
            failed = stats.failed,
            "playback complete"
        );

        (stats, first_error)
    }
}

type NewBufferListener = Box<dyn Fn() + Send + Sync>;

/// Long-lived handle that records into at most one buffer per epoch.
pub struct DeferredBuffer {
    point: Arc<PlaybackPoint>,
    current: Mutex<Option<Arc<RecordedBuffer>>>,
    allocated: AtomicU64,
    listeners: Mutex<Vec<NewBufferListener>>,
}

impl DeferredBuffer {
    /// Creates a handle on `point` with no buffer allocated yet.
    pub fn new(point: Arc<PlaybackPoint>) -> Self {
        Self {
            point,
            current: Mutex::new(None),
            allocated: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Playback point this handle records into.
    pub fn point(&self) -> &Arc<PlaybackPoint> {
        &self.point
    }

    /// Returns `true` if a buffer exists for the point's current epoch.
    pub fn is_allocated(&self) -> bool {
        self.allocated.load(Ordering::Acquire) == self.point.epoch() + 1
    }

    /// Ensures a buffer exists for the current epoch.
    ///
    /// Returns `true` if this call created it.
    pub fn request_fresh_buffer(&self) -> bool {
        self.current_buffer().1
    }

    /// Serial writer into the current epoch's buffer, creating it if needed.
    pub fn buffer(&self) -> CommandWriter {
        CommandWriter { buffer: self.current_buffer().0 }
    }

    /// Concurrent writer into the current epoch's buffer, creating it if needed.
    pub fn concurrent(&self) -> ConcurrentWriter {
        ConcurrentWriter { buffer: self.current_buffer().0 }
    }

    /// Like [`buffer`](Self::buffer), but only if `first` already has a
    /// buffer for the current epoch, so this handle's commands replay after
    /// `first`'s. Returns `None` otherwise, without creating anything.
    ///
    /// A handle written through this method should never be written through
    /// the unordered ones in the same epoch.
    pub fn buffer_after(&self, first: &DeferredBuffer) -> Option<CommandWriter> {
        self.current_buffer_after(first).map(|buffer| CommandWriter { buffer })
    }

    /// Concurrent counterpart of [`buffer_after`](Self::buffer_after).
    pub fn concurrent_after(&self, first: &DeferredBuffer) -> Option<ConcurrentWriter> {
        self.current_buffer_after(first).map(|buffer| ConcurrentWriter { buffer })
    }

    /// Registers a callback run every time this handle creates a buffer.
    ///
    /// Callbacks run while the handle is locked and must not call back into it.
    pub fn on_new_buffer<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        relock(&self.listeners).push(Box::new(listener));
    }

    /// Makes the next playback of this handle's point wait for `job`.
    pub fn add_job_dependency(&self, job: JobHandle) {
        self.point.add_job_dependency(job);
    }

    fn reusable(&self, current: &Option<Arc<RecordedBuffer>>) -> Option<Arc<RecordedBuffer>> {
        current
            .as_ref()
            .filter(|buffer| buffer.epoch == self.point.epoch())
            .map(Arc::clone)
    }

    fn install(&self, current: &mut Option<Arc<RecordedBuffer>>, buffer: &Arc<RecordedBuffer>) {
        *current = Some(Arc::clone(buffer));
        for listener in relock(&self.listeners).iter() {
            listener();
        }
    }

    fn current_buffer(&self) -> (Arc<RecordedBuffer>, bool) {
        let mut current = relock(&self.current);
        if let Some(buffer) = self.reusable(&current) {
            return (buffer, false);
        }

        let buffer = self.point.create_buffer(&self.allocated);
        self.install(&mut current, &buffer);
        (buffer, true)
    }

    fn current_buffer_after(&self, first: &DeferredBuffer) -> Option<Arc<RecordedBuffer>> {
        if !Arc::ptr_eq(&self.point, &first.point) {
            tracing::warn!(point = self.point.name, "ordering against a handle on another playback point");
            return None;
        }

        let mut current = relock(&self.current);
        if let Some(buffer) = self.reusable(&current) {
            return Some(buffer);
        }

        let buffer = self.point.create_buffer_after(&self.allocated, &first.allocated)?;
        self.install(&mut current, &buffer);
        Some(buffer)
    }
}
