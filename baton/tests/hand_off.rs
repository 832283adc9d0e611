//! Multi-threaded hand-off tests for the blocking ring buffer.
//!
//! These tests drive the buffer the way an application does:
//! 1. Producers and consumers run on separate threads
//! 2. Values cross the buffer under back-pressure (small capacity)
//! 3. Consumers are shut down with `interrupt`, one per consumer
//!
//! # Running with tracing
//!
//! ```bash
//! RUST_LOG=baton=trace cargo test --features tracing --test hand_off -- --nocapture
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use baton::sync::{DequeueError, RingBuffer};

static INIT_TRACING: Once = Once::new();

/// Initialize tracing for tests (only once).
fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        baton::init_tracing();
    });
}

/// Spins until no interrupt is pending, i.e. some dequeue consumed it.
fn wait_interrupt_consumed(queue: &RingBuffer<'_, u64>) {
    while queue.is_interrupted() {
        thread::yield_now();
    }
}

#[test]
fn single_producer_single_consumer_preserves_order() {
    init_test_tracing();

    const COUNT: u64 = 50_000;
    let mut storage = [0u64; 4];
    let queue = RingBuffer::from_slice(&mut storage).unwrap();

    let received = thread::scope(|s| {
        s.spawn(|| {
            for i in 0..COUNT {
                queue.enqueue(i);
            }
        });

        let consumer = s.spawn(|| {
            let mut received = Vec::with_capacity(COUNT as usize);
            while received.len() < COUNT as usize {
                received.push(queue.dequeue().unwrap());
            }
            received
        });

        consumer.join().unwrap()
    });

    assert!(received.iter().copied().eq(0..COUNT));
    assert!(queue.is_empty());
}

#[test]
fn many_producers_many_consumers_deliver_every_value_once() {
    init_test_tracing();

    const PRODUCERS: u64 = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: u64 = 10_000;

    let mut storage = [0u64; 8];
    let queue = RingBuffer::from_slice(&mut storage).unwrap();

    let batches: Vec<Vec<u64>> = thread::scope(|s| {
        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let queue = &queue;
                s.spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(value) = queue.dequeue() {
                        seen.push(value);
                    }
                    seen
                })
            })
            .collect();

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|id| {
                let queue = &queue;
                s.spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        queue.enqueue(id * PER_PRODUCER + seq);
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }

        // Drain, then release consumers one interrupt at a time.
        while !queue.is_empty() {
            thread::yield_now();
        }
        for _ in 0..CONSUMERS {
            queue.interrupt();
            wait_interrupt_consumed(&queue);
        }

        consumers.into_iter().map(|c| c.join().unwrap()).collect()
    });

    // Each consumer sees every producer's values in increasing order.
    for batch in &batches {
        for id in 0..PRODUCERS {
            let from_id: Vec<_> = batch
                .iter()
                .filter(|&&v| v / PER_PRODUCER == id)
                .collect();
            assert!(from_id.windows(2).all(|w| w[0] < w[1]));
        }
    }

    let all: HashSet<u64> = batches.iter().flatten().copied().collect();
    let total: usize = batches.iter().map(Vec::len).sum();
    assert_eq!(total, (PRODUCERS * PER_PRODUCER) as usize);
    assert_eq!(all.len(), total, "a value was delivered twice");
}

#[test]
fn occupancy_never_exceeds_capacity() {
    init_test_tracing();

    const CAPACITY: usize = 3;
    let mut storage = [0u64; CAPACITY];
    let queue = RingBuffer::from_slice(&mut storage).unwrap();
    let max_seen = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..3 {
            s.spawn(|| {
                for i in 0..2_000 {
                    queue.enqueue(i);
                    max_seen.fetch_max(queue.len(), Ordering::Relaxed);
                }
            });
        }

        for _ in 0..6_000 {
            max_seen.fetch_max(queue.len(), Ordering::Relaxed);
            let _ = queue.dequeue();
        }
    });

    assert!(max_seen.load(Ordering::Relaxed) <= CAPACITY);
    assert!(queue.is_empty());
}

#[test]
fn interrupt_releases_blocked_consumer_then_queue_keeps_working() {
    init_test_tracing();

    let mut storage = [0u64; 1];
    let queue = RingBuffer::from_slice(&mut storage).unwrap();

    thread::scope(|s| {
        let consumer = s.spawn(|| queue.dequeue());
        thread::sleep(Duration::from_millis(50));
        queue.interrupt();
        assert_eq!(consumer.join().unwrap(), None);
    });

    queue.enqueue(5);
    assert_eq!(queue.dequeue(), Some(5));
}

#[test]
fn interrupt_leaves_buffered_values_for_next_consumer() {
    init_test_tracing();

    let mut storage = [0u64; 4];
    let queue = RingBuffer::from_slice(&mut storage).unwrap();

    queue.enqueue(1);
    queue.enqueue(2);
    queue.interrupt();

    thread::scope(|s| {
        let first = s.spawn(|| queue.dequeue()).join().unwrap();
        assert_eq!(first, None);

        let rest = s
            .spawn(|| [queue.dequeue(), queue.dequeue()])
            .join()
            .unwrap();
        assert_eq!(rest, [Some(1), Some(2)]);
    });
}

#[test]
fn interrupted_consumer_hands_wakeup_to_waiting_peer() {
    init_test_tracing();

    let mut storage = [0u64; 2];
    let queue = RingBuffer::from_slice(&mut storage).unwrap();
    let cancelled = AtomicUsize::new(0);
    let delivered = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..3 {
            s.spawn(|| match queue.dequeue_timeout(Duration::from_secs(5)) {
                Ok(_) => {
                    delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(DequeueError::Interrupted) => {
                    cancelled.fetch_add(1, Ordering::Relaxed);
                }
                Err(DequeueError::TimedOut) => panic!("consumer stranded"),
            });
        }
        thread::sleep(Duration::from_millis(50));

        queue.interrupt();
        queue.enqueue(10);
        queue.enqueue(11);
    });

    assert_eq!(cancelled.load(Ordering::Relaxed), 1);
    assert_eq!(delivered.load(Ordering::Relaxed), 2);
}

#[test]
fn shared_through_arc_with_static_storage() {
    init_test_tracing();

    let storage: &'static mut [u64] = Box::leak(vec![0u64; 16].into_boxed_slice());
    let queue = Arc::new(RingBuffer::from_slice(storage).unwrap());

    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut sum = 0;
            while let Some(value) = queue.dequeue() {
                sum += value;
            }
            sum
        })
    };

    for i in 1..=100 {
        queue.enqueue(i);
    }
    while !queue.is_empty() {
        thread::yield_now();
    }
    queue.interrupt();

    assert_eq!(consumer.join().unwrap(), 5050);
}
