mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::*;
use ecs_event_bus::events::dispatcher::{DispatchState, Hook};
use ecs_event_bus::events::event::{EventPayload, EventTypeId};

fn counter() -> (Arc<AtomicUsize>, Hook) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let hook: Hook = Arc::new(move |_: &EventPayload<'_>| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (count, hook)
}

#[test]
fn hooks_for_one_type_accumulate_in_registration_order() {
    let mut harness = Harness::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for tag in ["first", "second"] {
        let order = Arc::clone(&order);
        harness.hooks.register_hook::<Score, _>(move |payload| {
            let score = payload.get::<Score>().unwrap();
            order.lock().unwrap().push((tag, score.value));
        });
    }
    assert_eq!(harness.hooks.hook_count(EventTypeId::of::<Score>()), 2);

    harness.run();
    harness.bus.post_event(Score { value: 9 }).unwrap();
    harness.run();

    assert_eq!(*order.lock().unwrap(), vec![("first", 9), ("second", 9)]);
}

#[test]
fn register_hooks_installs_every_pair() {
    let mut harness = Harness::new();
    let (pings, ping_hook) = counter();
    let (scores, score_hook) = counter();
    harness.hooks.register_hooks([
        (EventTypeId::of::<Ping>(), ping_hook),
        (EventTypeId::of::<Score>(), score_hook),
    ]);

    harness.run();
    harness.bus.post_event(Ping).unwrap();
    harness.bus.post_event(Score { value: 1 }).unwrap();
    harness.bus.post_event(Score { value: 2 }).unwrap();
    harness.run();

    assert_eq!(pings.load(Ordering::SeqCst), 1);
    assert_eq!(scores.load(Ordering::SeqCst), 2);
}

#[test]
fn unregistering_unknown_type_is_a_no_op() {
    let harness = Harness::new();
    assert!(!harness.hooks.unregister_hook::<Ping>());

    let (_, hook) = counter();
    harness.hooks.register_hook_for(EventTypeId::of::<Ping>(), hook);
    assert!(harness.hooks.unregister_hook_for(EventTypeId::of::<Ping>()));
    assert!(!harness.hooks.unregister_hook_for(EventTypeId::of::<Ping>()));
    assert_eq!(harness.hooks.hook_count(EventTypeId::of::<Ping>()), 0);
}

#[test]
fn dispatch_is_skipped_without_events() {
    let mut harness = Harness::new();
    let (pings, hook) = counter();
    harness.hooks.register_hook_for(EventTypeId::of::<Ping>(), hook);

    let report = harness.run();
    assert_eq!(report.systems_skipped, 1);
    assert_eq!(report.systems_run, 1, "only the bus ran");

    harness.bus.post_event(Ping).unwrap();
    let report = harness.run();
    assert_eq!(report.systems_skipped, 0);
    assert_eq!(pings.load(Ordering::SeqCst), 1);
}

#[test]
fn hooks_run_in_dispatching_state_and_may_post() {
    let mut harness = Harness::new();
    let states = Arc::new(Mutex::new(Vec::new()));
    let (scores, score_hook) = counter();
    harness.hooks.register_hook_for(EventTypeId::of::<Score>(), score_hook);

    {
        let hooks = harness.hooks.clone();
        let bus = harness.bus.clone();
        let states = Arc::clone(&states);
        harness.hooks.register_hook::<Ping, _>(move |_| {
            states.lock().unwrap().push(hooks.state());
            // Re-entrant: the store and table locks are released by now.
            bus.post_event(Score { value: 3 }).unwrap();
        });
    }

    harness.run();
    harness.bus.post_event(Ping).unwrap();
    harness.run();
    assert_eq!(*states.lock().unwrap(), vec![DispatchState::Dispatching]);
    assert_eq!(harness.hooks.state(), DispatchState::Idle);

    harness.run();
    assert_eq!(scores.load(Ordering::SeqCst), 1, "event posted from a hook arrives next cycle");
}

#[test]
fn hook_registered_during_dispatch_applies_next_time() {
    let mut harness = Harness::new();
    let (late, late_hook) = counter();
    {
        let hooks = harness.hooks.clone();
        let late_hook = Mutex::new(Some(late_hook));
        harness.hooks.register_hook::<Ping, _>(move |_| {
            if let Some(hook) = late_hook.lock().unwrap().take() {
                hooks.register_hook_for(EventTypeId::of::<Ping>(), hook);
            }
        });
    }

    harness.run();
    harness.bus.post_event(Ping).unwrap();
    harness.run();
    assert_eq!(late.load(Ordering::SeqCst), 0);

    harness.bus.post_event(Ping).unwrap();
    harness.run();
    assert_eq!(late.load(Ordering::SeqCst), 1);
}

#[test]
fn direct_dispatch_counts_delivered_events() {
    let mut harness = Harness::new();
    let (_, hook) = counter();
    harness.hooks.register_hook_for(EventTypeId::of::<Score>(), hook);

    harness.run();
    harness.bus.post_event(Score { value: 1 }).unwrap();
    harness.bus.post_event(Ping).unwrap();
    harness.run();

    // Ping has no hook, so only the score counts.
    let delivered = harness.hooks.dispatch(harness.ecs.world_ref()).unwrap();
    assert_eq!(delivered, 1);
}
