use criterion::{BatchSize, Criterion};
use libiot_connect::system::scheduler::Scheduler;
use rand::{Rng, SeedableRng, rngs::StdRng};

pub fn bench_pop_due(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let delays: Vec<u64> = (0..64).map(|_| rng.gen_range(0..10_000)).collect();

    c.bench_function("scheduler_drain_64", |b| {
        b.iter_batched_ref(
            || {
                let mut scheduler: Scheduler<u32> = Scheduler::new();
                for (job, delay) in delays.iter().enumerate() {
                    scheduler
                        .schedule(0, *delay, None, job as u32)
                        .expect("room");
                }
                scheduler
            },
            |scheduler| {
                let mut ran = 0;
                while scheduler.pop_due(10_000).is_some() {
                    ran += 1;
                }
                ran
            },
            BatchSize::SmallInput,
        )
    });
}
