use criterion::*;
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

mod common;
use common::*;

fn dispatch_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.sample_size(20);

    for &count in &[EVENTS_MED, EVENTS_LARGE] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("data_events", count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let world = make_world(4);
                    let total = Arc::new(AtomicU64::new(0));
                    let sink = Arc::clone(&total);
                    world.hooks.register_hook::<Damage, _>(move |payload| {
                        if let Some(damage) = payload.get::<Damage>() {
                            sink.fetch_add(damage.amount as u64, Ordering::Relaxed);
                        }
                    });
                    for i in 0..count {
                        world.bus.post_event(Damage { amount: 1.0, source: i as u32 }).unwrap();
                    }
                    // Materialize without dispatching: the hook system is invoked directly below.
                    world.ecs.world_ref().with_exclusive(|data| world.ecs.playback_point().playback(data)).unwrap();
                    (world, total)
                },
                |(world, total)| {
                    let delivered = world.hooks.dispatch(world.ecs.world_ref()).unwrap();
                    black_box((delivered, total.load(Ordering::Relaxed)))
                },
                BatchSize::LargeInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("cycle_zero_sized", count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let world = make_world(4);
                    let seen = Arc::new(AtomicU64::new(0));
                    let sink = Arc::clone(&seen);
                    world.hooks.register_hook::<Tick, _>(move |_| {
                        sink.fetch_add(1, Ordering::Relaxed);
                    });
                    for _ in 0..count {
                        world.bus.post_event(Tick).unwrap();
                    }
                    world
                },
                |mut world| {
                    // Playback materializes the events, then the hook system delivers them.
                    world.run();
                    black_box(world)
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, dispatch_benchmark);
criterion_main!(benches);
