use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Instant;

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;

use governor::Quota;
use governor::RateLimiter;
use governor::clock::QuantaClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;

use recycle_limit::RecyclingLimiter;

type GovernorLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

fn bench_single<F>(group_name: &str, c: &mut Criterion, op: Arc<F>)
where
    F: Fn() + Send + Sync + 'static,
{
    let mut group = c.benchmark_group(group_name);

    group.bench_function("single-threaded", |b| {
        b.iter(|| {
            black_box(op.as_ref())();
        })
    });

    group.finish();
}

fn bench_parallel<F>(group_name: &str, c: &mut Criterion, op: Arc<F>)
where
    F: Fn() + Send + Sync + 'static,
{
    let mut group = c.benchmark_group(group_name);

    for threads in [2, 4, 8].iter() {
        let num_threads = *threads;
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}-threads", num_threads)),
            &num_threads,
            |b, &n| {
                b.iter_custom(|iters| {
                    let barrier = Arc::new(Barrier::new(n + 1));
                    let mut handles = Vec::with_capacity(n);

                    for _ in 0..n {
                        let op = Arc::clone(&op);
                        let bar = Arc::clone(&barrier);
                        let iters_per_thread = iters / n as u64;

                        handles.push(thread::spawn(move || {
                            bar.wait(); // Wait for the start signal
                            for _ in 0..iters_per_thread {
                                black_box(op.as_ref())();
                            }
                        }));
                    }

                    // Synchronize the start across all threads
                    barrier.wait();
                    let start = Instant::now();

                    for handle in handles {
                        let _ = handle.join();
                    }

                    start.elapsed()
                });
            },
        );
    }
    group.finish();
}

fn run_all_benches(c: &mut Criterion) {
    // A rate high enough that reservations are always immediate; the
    // recycle keeps the cursor from drifting over a long run.
    let limiter = Arc::new(RecyclingLimiter::new(1_000_000.0, 1.0).unwrap());

    let reserve_recycle = {
        let limiter = Arc::clone(&limiter);
        Arc::new(move || {
            let _ = black_box(limiter.reserve(1));
            limiter.recycle(1);
        })
    };
    bench_single("RecycleLimit-ReserveRecycle", c, Arc::clone(&reserve_recycle));
    bench_parallel("RecycleLimit-ReserveRecycle", c, reserve_recycle);

    let peek = {
        let limiter = Arc::clone(&limiter);
        Arc::new(move || {
            let _ = black_box(limiter.earliest_available());
        })
    };
    bench_single("RecycleLimit-Peek", c, Arc::clone(&peek));
    bench_parallel("RecycleLimit-Peek", c, peek);

    // Governor setup, for comparison with an established limiter
    let gov_quota = Quota::per_second(NonZeroU32::new(1_000_000).unwrap());
    let gov_clock = QuantaClock::default();
    let gov_limiter: Arc<GovernorLimiter> =
        Arc::new(RateLimiter::direct_with_clock(gov_quota, gov_clock));

    let gov_check = {
        let gov_limiter = Arc::clone(&gov_limiter);
        Arc::new(move || {
            let _ = black_box(gov_limiter.check());
        })
    };
    bench_single("Governor-Check", c, Arc::clone(&gov_check));
    bench_parallel("Governor-Check", c, gov_check);
}

criterion_group!(benches, run_all_benches);
criterion_main!(benches);
