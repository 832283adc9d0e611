//! Ring buffer throughput and round-trip benchmark.
//!
//! Usage:
//!     cargo run --release --bin ring_bench
//!
//! Environment variables:
//!     PRODUCER_CPU=0        Pin the first producer to CPU 0 (default: 0)
//!     CONSUMER_CPU=2        Pin the first consumer to CPU 2 (default: 2)
//!     QUEUE_CAPACITY=1024   Slots in the ring (default: 1024)
//!     ITERATIONS=4194304    Values moved per run (default: 1 << 22)
//!     PRODUCERS=1           Producer threads for the throughput run (default: 1)
//!     CONSUMERS=1           Consumer threads for the throughput run (default: 1)
//!     RTT_ITERATIONS=100000 Round trips for the ping-pong run (default: 100000)
//!
//! Further producers/consumers are pinned to the CPUs following their
//! role's base CPU.

use std::env;
use std::hint;
use std::str::FromStr;
use std::thread;
use std::time::Instant;

use baton::sync::RingBuffer;

type Payload = u64;

struct Config {
    producer_cpu: Option<usize>,
    consumer_cpu: Option<usize>,
    capacity: usize,
    iterations: usize,
    producers: usize,
    consumers: usize,
    rtt_iterations: usize,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    fn from_env() -> Self {
        Self {
            producer_cpu: Some(env_or("PRODUCER_CPU", 0)),
            consumer_cpu: Some(env_or("CONSUMER_CPU", 2)),
            capacity: env_or("QUEUE_CAPACITY", 1024),
            iterations: env_or("ITERATIONS", 1 << 22),
            producers: env_or("PRODUCERS", 1).max(1),
            consumers: env_or("CONSUMERS", 1).max(1),
            rtt_iterations: env_or("RTT_ITERATIONS", 100_000),
        }
    }
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

/// Releases every consumer blocked on an empty, quiescent `queue`.
///
/// Each interrupt cancels exactly one dequeue, so raise them one at a time
/// and wait for each to be consumed.
fn shutdown_consumers(queue: &RingBuffer<'_, Payload>, consumers: usize) {
    while !queue.is_empty() {
        thread::yield_now();
    }
    for _ in 0..consumers {
        queue.interrupt();
        while queue.is_interrupted() {
            thread::yield_now();
        }
    }
}

fn bench_throughput(config: &Config) {
    let mut storage = vec![0 as Payload; config.capacity];
    let queue = RingBuffer::from_slice(&mut storage).unwrap();
    let per_producer = config.iterations / config.producers;
    let ordered = config.producers == 1 && config.consumers == 1;

    let start = Instant::now();

    let received: usize = thread::scope(|s| {
        let consumers: Vec<_> = (0..config.consumers)
            .map(|i| {
                let queue = &queue;
                let cpu = config.consumer_cpu.map(|c| c + i);
                s.spawn(move || {
                    pin_to_cpu(cpu);
                    let mut count = 0usize;
                    while let Some(value) = queue.dequeue() {
                        if ordered && value != count as Payload {
                            panic!("Data corruption: expected {}, got {}", count, value);
                        }
                        count += 1;
                    }
                    count
                })
            })
            .collect();

        let producers: Vec<_> = (0..config.producers)
            .map(|i| {
                let queue = &queue;
                let cpu = config.producer_cpu.map(|c| c + i);
                s.spawn(move || {
                    pin_to_cpu(cpu);
                    for value in 0..per_producer as Payload {
                        queue.enqueue(value);
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        shutdown_consumers(&queue, config.consumers);

        consumers.into_iter().map(|c| c.join().unwrap()).sum()
    });

    let elapsed = start.elapsed();
    assert_eq!(received, per_producer * config.producers, "lost values");

    let ops_per_ms = received as u128 * 1_000_000 / elapsed.as_nanos().max(1);
    println!(
        "throughput ({}P/{}C, capacity {}): {} ops/ms",
        config.producers, config.consumers, config.capacity, ops_per_ms
    );
}

fn bench_rtt(config: &Config) {
    let mut ping_storage = vec![0 as Payload; config.capacity];
    let mut pong_storage = vec![0 as Payload; config.capacity];
    let ping = RingBuffer::from_slice(&mut ping_storage).unwrap();
    let pong = RingBuffer::from_slice(&mut pong_storage).unwrap();

    thread::scope(|s| {
        let responder = s.spawn(|| {
            pin_to_cpu(config.consumer_cpu);
            while let Some(value) = ping.dequeue() {
                pong.enqueue(value);
            }
        });

        pin_to_cpu(config.producer_cpu);

        // Warm up both threads before timing.
        for i in 0..1024 {
            ping.enqueue(i);
            hint::black_box(pong.dequeue());
        }

        let start = Instant::now();
        for i in 0..config.rtt_iterations as Payload {
            ping.enqueue(i);
            assert_eq!(pong.dequeue(), Some(i));
        }
        let elapsed = start.elapsed();

        ping.interrupt();
        responder.join().unwrap();

        println!(
            "rtt: {} ns",
            elapsed.as_nanos() / config.rtt_iterations.max(1) as u128
        );
    });
}

fn main() {
    baton::init_tracing();

    let config = Config::from_env();

    bench_throughput(&config);
    bench_rtt(&config);
}
