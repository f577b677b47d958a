mod common;

use std::sync::{Arc, Mutex};

use common::*;
use ecs_event_bus::config::EngineConfig;
use ecs_event_bus::engine::commands::Command;
use ecs_event_bus::engine::component::{component_id_of, Bundle};
use ecs_event_bus::engine::error::{ECSError, ExecutionError, SpawnError};
use ecs_event_bus::engine::jobs::JobScheduler;
use ecs_event_bus::engine::manager::{ECSManager, ECSReference};
use ecs_event_bus::engine::query::QueryBuilder;
use ecs_event_bus::engine::scheduler::{make_stages, Scheduler};
use ecs_event_bus::engine::systems::{FnSystem, System};
use ecs_event_bus::engine::types::{AccessSets, SystemID};

type Log = Arc<Mutex<Vec<&'static str>>>;

struct Recorder {
    id: SystemID,
    name: &'static str,
    access: AccessSets,
    exclusive: bool,
    log: Log,
}

impl System for Recorder {
    fn id(&self) -> SystemID {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn access(&self) -> AccessSets {
        self.access.clone()
    }

    fn exclusive(&self) -> bool {
        self.exclusive
    }

    fn run(&self, _ecs: ECSReference<'_>) -> Result<(), ECSError> {
        self.log.lock().unwrap().push(self.name);
        Ok(())
    }
}

fn recorder(id: SystemID, name: &'static str, access: AccessSets, log: &Log) -> Arc<dyn System> {
    Arc::new(Recorder { id, name, access, exclusive: false, log: Arc::clone(log) })
}

fn writes<T: 'static + Send + Sync>() -> AccessSets {
    QueryBuilder::new().write::<T>().unwrap().build().access().clone()
}

fn reads<T: 'static + Send + Sync>() -> AccessSets {
    QueryBuilder::new().read::<T>().unwrap().build().access().clone()
}

#[test]
fn stages_group_compatible_neighbours_only() {
    init_components();
    let log = Log::default();
    let systems = vec![
        recorder(1, "read_pos", reads::<Position>(), &log),
        recorder(2, "read_pos_again", reads::<Position>(), &log),
        recorder(3, "write_pos", writes::<Position>(), &log),
        recorder(4, "write_health", writes::<Health>(), &log),
        recorder(5, "read_pos_late", reads::<Position>(), &log),
    ];

    let stages = make_stages(&systems);
    let names: Vec<Vec<&str>> = stages
        .iter()
        .map(|stage| stage.systems().iter().map(|s| s.name()).collect())
        .collect();
    assert_eq!(
        names,
        vec![
            vec!["read_pos", "read_pos_again"],
            vec!["write_pos", "write_health"],
            vec!["read_pos_late"],
        ]
    );
}

#[test]
fn exclusive_system_gets_its_own_stage() {
    let log = Log::default();
    let exclusive: Arc<dyn System> = Arc::new(Recorder {
        id: 2,
        name: "exclusive",
        access: AccessSets::default(),
        exclusive: true,
        log: Arc::clone(&log),
    });
    let systems = vec![
        recorder(1, "a", AccessSets::default(), &log),
        exclusive,
        recorder(3, "b", AccessSets::default(), &log),
        recorder(4, "c", AccessSets::default(), &log),
    ];

    let stages = make_stages(&systems);
    assert_eq!(stages.len(), 3);
    assert!(stages[1].is_exclusive());
    assert_eq!(stages[2].systems().len(), 2);
}

#[test]
fn stages_run_in_insertion_order() {
    init_components();
    let ecs = new_manager();
    let log = Log::default();
    let mut scheduler = Scheduler::new();
    scheduler
        .add_shared(recorder(1, "first", writes::<Position>(), &log))
        .add_shared(recorder(2, "second", writes::<Position>(), &log))
        .add_shared(recorder(3, "third", writes::<Position>(), &log));

    let report = ecs.run(&mut scheduler).unwrap();
    assert_eq!(report.stages, 3);
    assert_eq!(report.systems_run, 3);
    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    assert_eq!(ecs.tick(), 1);
}

#[test]
fn deferred_commands_are_visible_to_the_next_stage() {
    let ecs = new_manager();
    let position = component_id_of::<Position>().unwrap();
    let seen = Arc::new(Mutex::new(None));

    let mut scheduler = Scheduler::new();
    scheduler.add_system(
        FnSystem::new(1, "spawner", writes::<Position>(), move |ecs| {
            ecs.defer(Command::Spawn { bundle: Bundle::single(position, Position { x: 1.0, y: 1.0 }) })
        }),
    );
    let observed = Arc::clone(&seen);
    scheduler.add_system(FnSystem::new(2, "observer", writes::<Position>(), move |ecs| {
        let query = ecs.query().read::<Position>()?.build();
        let count = ecs.read(|data| data.matching_entities(query.signature()).len())?;
        *observed.lock().unwrap() = Some(count);
        Ok(())
    }));

    let report = ecs.run(&mut scheduler).unwrap();
    assert_eq!(report.deferred, 1);
    assert_eq!(*seen.lock().unwrap(), Some(1));
}

#[test]
fn playback_runs_before_any_system() {
    let ecs = new_manager();
    let point = ecs.playback_point();
    point
        .handle()
        .buffer()
        .spawn(Bundle::single(component_id_of::<Health>().unwrap(), Health(1)));

    let seen = Arc::new(Mutex::new(0));
    let observed = Arc::clone(&seen);
    let mut scheduler = Scheduler::new();
    scheduler.add_system(FnSystem::new(1, "observer", reads::<Health>(), move |ecs| {
        let query = ecs.query().read::<Health>()?.build();
        *observed.lock().unwrap() = ecs.read(|data| data.matching_entities(query.signature()).len())?;
        Ok(())
    }));

    let report = ecs.run(&mut scheduler).unwrap();
    assert_eq!(report.playback.commands, 1);
    assert_eq!(*seen.lock().unwrap(), 1);
}

#[test]
fn failing_system_is_reported_with_its_name() {
    let ecs = new_manager();
    let mut scheduler = Scheduler::new();
    scheduler.add_system(FnSystem::new(7, "broken", AccessSets::default(), |_| {
        Err(ECSError::Internal("nope".into()))
    }));

    let error = ecs.run(&mut scheduler).unwrap_err();
    assert!(matches!(
        error,
        ECSError::Execution(ExecutionError::SystemFailed { system: 7, name: "broken", .. })
    ));
}

#[test]
fn find_system_downcasts_opted_in_systems() {
    let harness = Harness::new();
    assert!(harness.scheduler.find_system::<ecs_event_bus::EventBus>().is_some());
    assert!(harness.scheduler.find_system::<ecs_event_bus::HookSystem>().is_some());
    assert_eq!(harness.scheduler.systems().len(), 2);
}

#[test]
fn manager_and_jobs_build_from_config() {
    init_components();
    let config = EngineConfig::from_toml_str("shards = 2\nworker_threads = 3\n").unwrap();
    let ecs = ECSManager::from_config(&config).unwrap();
    let jobs = JobScheduler::from_config(&config).unwrap();
    assert_eq!(jobs.thread_count(), 3);

    let mut scheduler = Scheduler::new();
    let report = ecs.run(&mut scheduler).unwrap();
    assert_eq!(report.tick, 0);
    assert_eq!(ecs.tick(), 1);
}

#[test]
fn failed_commands_do_not_skip_the_cycle() {
    let ecs = new_manager();
    let health = component_id_of::<Health>().unwrap();
    let writer = ecs.playback_point().handle().buffer();
    writer.spawn(Bundle::new());
    writer.spawn(Bundle::single(health, Health(1)));
    ecs.world_ref().defer(Command::Spawn { bundle: Bundle::new() }).unwrap();
    ecs.world_ref()
        .defer(Command::Spawn { bundle: Bundle::single(health, Health(2)) })
        .unwrap();

    let seen = Arc::new(Mutex::new(0));
    let observed = Arc::clone(&seen);
    let mut scheduler = Scheduler::new();
    scheduler.add_system(FnSystem::new(1, "observer", reads::<Health>(), move |ecs| {
        let query = ecs.query().read::<Health>()?.build();
        *observed.lock().unwrap() = ecs.read(|data| data.matching_entities(query.signature()).len())?;
        Ok(())
    }));

    let result = ecs.run(&mut scheduler);
    assert_eq!(result.unwrap_err(), ECSError::Spawn(SpawnError::EmptyBundle));
    assert_eq!(*seen.lock().unwrap(), 2, "both valid spawns landed before the stage");
    assert_eq!(ecs.tick(), 1);

    assert!(ecs.run(&mut scheduler).is_ok());
}

#[test]
fn failed_command_between_stages_is_reported_after_the_cycle() {
    let ecs = new_manager();
    let position = component_id_of::<Position>().unwrap();
    let log = Log::default();

    let mut scheduler = Scheduler::new();
    scheduler.add_system(FnSystem::new(1, "bad_spawner", writes::<Position>(), move |ecs| {
        ecs.defer(Command::Spawn { bundle: Bundle::new() })?;
        ecs.defer(Command::Spawn { bundle: Bundle::single(position, Position { x: 0.0, y: 0.0 }) })
    }));
    scheduler.add_shared(recorder(2, "after", writes::<Position>(), &log));

    let error = ecs.run(&mut scheduler).unwrap_err();
    assert_eq!(error, ECSError::Spawn(SpawnError::EmptyBundle));
    assert_eq!(*log.lock().unwrap(), vec!["after"]);
    assert_eq!(ecs.tick(), 1);
}
