mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use ecs_event_bus::engine::buffers::PlaybackPoint;
use ecs_event_bus::engine::component::{component_id_of, Bundle};
use ecs_event_bus::engine::error::{ECSError, SpawnError};
use ecs_event_bus::engine::jobs::JobScheduler;
use ecs_event_bus::engine::query::QueryBuilder;

fn position_bundle(x: f32) -> Bundle {
    Bundle::single(component_id_of::<Position>().unwrap(), Position { x, y: 0.0 })
}

fn position_count(ecs: &ecs_event_bus::ECSManager) -> usize {
    let query = QueryBuilder::new().read::<Position>().unwrap().build();
    ecs.world_ref()
        .read(|data| data.matching_entities(query.signature()).len())
        .unwrap()
}

#[test]
fn buffers_replay_in_creation_order() {
    let ecs = new_manager();
    let point = ecs.playback_point();
    let everything = *QueryBuilder::new().read::<Position>().unwrap().build().signature();

    // destroy-then-create keeps the new entity
    let destroyer = point.handle();
    let creator = point.handle();
    destroyer.buffer().despawn_matching(everything);
    creator.buffer().spawn(position_bundle(1.0));

    let stats = ecs.world_ref().with_exclusive(|data| point.playback(data)).unwrap();
    assert_eq!((stats.buffers, stats.commands), (2, 2));
    assert_eq!(position_count(&ecs), 1);

    // create-then-destroy loses it, since the creator now allocates first
    creator.buffer().spawn(position_bundle(2.0));
    destroyer.buffer().despawn_matching(everything);
    ecs.world_ref().with_exclusive(|data| point.playback(data)).unwrap();
    assert_eq!(position_count(&ecs), 0);
}

#[test]
fn concurrent_writes_replay_in_slot_order() {
    let ecs = new_manager();
    let point = ecs.playback_point();
    let writer = point.handle().concurrent();

    for slot in [2_u32, 0, 1] {
        writer.spawn(slot, position_bundle(slot as f32));
    }
    ecs.world_ref().with_exclusive(|data| point.playback(data)).unwrap();

    let query = QueryBuilder::new().read::<Position>().unwrap().build();
    let mut xs = Vec::new();
    ecs.world_ref()
        .read(|data| data.for_each::<Position>(&query, |_, p| xs.push(p.x)))
        .unwrap()
        .unwrap();
    assert_eq!(xs, vec![0.0, 1.0, 2.0]);
}

#[test]
fn playback_waits_for_job_dependencies() {
    let ecs = new_manager();
    let point = Arc::clone(ecs.playback_point());
    let jobs = JobScheduler::with_threads(2).unwrap();
    let handle = point.handle();
    let writer = handle.concurrent();

    let job = jobs.schedule("slow-writer", move || {
        thread::sleep(Duration::from_millis(20));
        writer.spawn(0, position_bundle(0.0));
    });
    handle.add_job_dependency(job.clone());

    ecs.world_ref().with_exclusive(|data| point.playback(data)).unwrap();
    assert!(job.is_completed());
    assert_eq!(position_count(&ecs), 1);
}

#[test]
fn panicking_job_does_not_stop_playback() {
    let ecs = new_manager();
    let point = ecs.playback_point();
    let jobs = JobScheduler::with_threads(1).unwrap();

    point.add_job_dependency(jobs.schedule("boom", || panic!("job failure")));
    point.handle().buffer().spawn(position_bundle(0.0));

    let stats = ecs.world_ref().with_exclusive(|data| point.playback(data)).unwrap();
    assert_eq!(stats.commands, 1);
    assert_eq!(position_count(&ecs), 1);
}

#[test]
fn failed_command_does_not_block_the_rest() {
    let ecs = new_manager();
    let point = ecs.playback_point();
    let writer = point.handle().buffer();
    writer.spawn(Bundle::new());
    writer.spawn(position_bundle(1.0));

    let epoch = point.epoch();
    let result = ecs.world_ref().with_exclusive(|data| point.playback(data));
    assert_eq!(result, Err(ECSError::Spawn(SpawnError::EmptyBundle)));
    assert_eq!(point.epoch(), epoch + 1);
    assert_eq!(position_count(&ecs), 1);
}

#[test]
fn write_after_seal_goes_to_next_playback() {
    let point = PlaybackPoint::new("late");
    let ecs = new_manager();
    let writer = point.handle().buffer();

    ecs.world_ref().with_exclusive(|data| point.playback(data)).unwrap();
    writer.spawn(position_bundle(0.0));
    assert_eq!(point.pending_commands(), 1);

    let stats = ecs.world_ref().with_exclusive(|data| point.playback(data)).unwrap();
    assert_eq!(stats.carried_over, 1);
    assert_eq!(position_count(&ecs), 1);
}

#[test]
fn new_buffer_listener_fires_once_per_epoch() {
    let ecs = new_manager();
    let point = ecs.playback_point();
    let handle = point.handle();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    handle.on_new_buffer(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(!handle.is_allocated());
    assert!(handle.request_fresh_buffer());
    assert!(!handle.request_fresh_buffer());
    assert!(handle.is_allocated());

    ecs.world_ref().with_exclusive(|data| point.playback(data)).unwrap();
    assert!(!handle.is_allocated());
    handle.buffer();
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}
