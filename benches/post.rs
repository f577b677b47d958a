use criterion::*;
use std::hint::black_box;

use ecs_event_bus::engine::jobs::{JobHandle, JobScheduler};
use rayon::prelude::*;

mod common;
use common::*;

fn post_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("post");

    for &count in &[EVENTS_SMALL, EVENTS_MED] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("serial", count), &count, |b, &count| {
            b.iter_batched(
                || make_world(4),
                |mut world| {
                    for i in 0..count {
                        world.bus.post_event(Damage { amount: 1.0, source: i as u32 }).unwrap();
                    }
                    world.run();
                    black_box(world)
                },
                BatchSize::LargeInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("job_parts", count), &count, |b, &count| {
            let jobs = JobScheduler::new().unwrap();
            b.iter_batched(
                || make_world(4),
                |mut world| {
                    let handles: Vec<JobHandle> = (0..count)
                        .map(|i| {
                            let part = world.bus.job_part(Damage { amount: 1.0, source: i as u32 }).unwrap();
                            jobs.schedule("damage", move || part.enqueue())
                        })
                        .collect();
                    world.bus.add_job_dependency(JobHandle::combine(handles));
                    world.run();
                    black_box(world)
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.bench_function("slot_contention_10k", |b| {
        b.iter_batched(
            || make_world(4),
            |world| {
                let bus = &world.bus;
                let slots: u32 = (0..EVENTS_MED)
                    .into_par_iter()
                    .map(|_| bus.job_part(Tick).unwrap().slot())
                    .max()
                    .unwrap_or(0);
                black_box(slots)
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, post_benchmark);
criterion_main!(benches);
