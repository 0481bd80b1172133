//! Mutual exclusion under real parallelism.
//!
//! These run producers on separate OS threads, each driving its own futures
//! with `block_on`, so that the strategies are exercised the way they would be
//! on a multi-core part. They're plain functions rather than `async fn`s, and
//! are called from `tests/contention.rs`.

use std::thread;

use futures::executor::block_on;
use ratesink::accessor::SynchronizedAccessor;
use ratesink::buffer::{BufferConfig, RateLimitedBuffer};
use ratesink::lock::Lock;
use ratesink::queue::RequestQueue;
use ratesink::time::TickCounter;

use crate::buffer_on;

/// Number of concurrent producers in the counting tests.
pub const PRODUCERS: u64 = 2;

/// Increments each producer makes in the counting tests.
pub const INCREMENTS: u64 = 1_000_000;

/// A buffer with room for every byte the counting tests send. The clock never
/// moves in these tests, so nothing drains and `occupied` is the counter.
fn counting_buffer(clock: &TickCounter, increments: u64) -> RateLimitedBuffer<&TickCounter> {
    let capacity = usize::try_from(PRODUCERS * increments).expect("count fits in usize");
    buffer_on(clock, BufferConfig::new(capacity, 1))
}

/// Each producer takes the accessor's region once and sends one byte
/// `INCREMENTS` times inside it, keeping a private tally alongside. If
/// anything else touched the buffer while the region was held, the two
/// disagree.
pub fn whole_loop_in_one_region<L: Lock + Sync>(lock: L) {
    let clock = TickCounter::new();
    let sink = SynchronizedAccessor::new(lock, counting_buffer(&clock, INCREMENTS));

    thread::scope(|s| {
        for _ in 0..PRODUCERS {
            s.spawn(|| {
                block_on(sink.perform(|buffer| {
                    let start = buffer.occupied();
                    let mut temp = 0_usize;
                    for _ in 0..INCREMENTS {
                        temp += buffer.offer(&[1]);
                    }
                    assert_eq!(buffer.occupied() - start, temp, "buffer changed under us");
                }));
            });
        }
    });

    let buffer = sink.into_inner();
    assert_eq!(buffer.occupied() as u64, PRODUCERS * INCREMENTS);
    assert_eq!(buffer.stats().offers, PRODUCERS * INCREMENTS);
}

/// Each producer calls `send` once per increment, so the producers
/// interleave as finely as the strategy allows.
pub fn region_per_increment<L: Lock + Sync>(lock: L, increments: u64) {
    let clock = TickCounter::new();
    let sink = SynchronizedAccessor::new(lock, counting_buffer(&clock, increments));

    let accepted: u64 = thread::scope(|s| {
        let sink = &sink;
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|_| s.spawn(move || {
                block_on(async {
                    let mut count = 0_u64;
                    for _ in 0..increments {
                        count += sink.send(&[1]).await as u64;
                    }
                    count
                })
            }))
            .collect();
        handles.into_iter().map(|h| h.join().expect("producer panicked")).sum::<u64>()
    });

    assert_eq!(accepted, PRODUCERS * increments);
    assert_eq!(sink.into_inner().occupied() as u64, PRODUCERS * increments);
}

/// The queue strategy's version of the counting test: every increment is a
/// one-byte request, answered by a consumer thread.
pub fn queue_per_increment(increments: u64) {
    let clock = TickCounter::new();
    let queue: RequestQueue<&TickCounter> = RequestQueue::new(&clock);
    let mut buffer = counting_buffer(&clock, increments);

    let accepted: u64 = thread::scope(|s| {
        let q = &queue;
        let consumer_buffer = &mut buffer;
        let consumer = s.spawn(move || {
            block_on(async {
                for _ in 0..PRODUCERS * increments {
                    q.serve_one(consumer_buffer).await;
                }
            });
        });
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|_| s.spawn(move || {
                block_on(async {
                    let mut count = 0_u64;
                    for _ in 0..increments {
                        count += q.send(&[1]).await as u64;
                    }
                    count
                })
            }))
            .collect();
        let accepted = producers.into_iter()
            .map(|h| h.join().expect("producer panicked"))
            .sum::<u64>();
        consumer.join().expect("consumer panicked");
        accepted
    });

    assert_eq!(accepted, PRODUCERS * increments);
    assert_eq!(buffer.occupied() as u64, PRODUCERS * increments);
    assert_eq!(queue.outstanding(), 0);
}

/// Producer threads hammering one accessor with no time passing. The buffer
/// must end up exactly full, and the per-thread acceptances must add up to
/// its capacity.
pub fn accessor_conservation<L: Lock + Sync>(lock: L) {
    const THREADS: usize = 4;
    const SENDS: usize = 50;
    const PIECE: [u8; 10] = [0xC3; 10];

    let clock = TickCounter::new();
    let sink = SynchronizedAccessor::new(lock, buffer_on(&clock, BufferConfig::SIMULATED));

    let accepted: u64 = thread::scope(|s| {
        let sink = &sink;
        let handles: Vec<_> = (0..THREADS)
            .map(|_| s.spawn(move || {
                block_on(async {
                    let mut total = 0_u64;
                    for _ in 0..SENDS {
                        let n = sink.send(&PIECE).await;
                        assert!(n <= PIECE.len());
                        total += n as u64;
                    }
                    total
                })
            }))
            .collect();
        handles.into_iter().map(|h| h.join().expect("producer panicked")).sum::<u64>()
    });

    // 4 * 50 * 10 = 2000 offered into 1000 slots.
    assert_eq!(accepted, 1000);
    let buffer = sink.into_inner();
    assert_eq!(buffer.occupied(), 1000);
    let stats = buffer.stats();
    assert_eq!(stats.offers, (THREADS * SENDS) as u64);
    assert_eq!(stats.bytes_accepted, 1000);
}

/// The queue strategy with producer threads and a consumer thread. Every send
/// is a single request, so the consumer knows exactly how many to serve.
pub fn queue_conservation() {
    const THREADS: usize = 4;
    const SENDS: usize = 50;
    const PIECE: [u8; 10] = [0x3C; 10];

    let clock = TickCounter::new();
    let queue: RequestQueue<&TickCounter> = RequestQueue::new(&clock);
    let mut buffer = buffer_on(&clock, BufferConfig::SIMULATED);

    let accepted: u64 = thread::scope(|s| {
        let q = &queue;
        let consumer_buffer = &mut buffer;
        let consumer = s.spawn(move || {
            block_on(async {
                for _ in 0..THREADS * SENDS {
                    q.serve_one(consumer_buffer).await;
                }
            });
        });
        let producers: Vec<_> = (0..THREADS)
            .map(|_| s.spawn(move || {
                block_on(async {
                    let mut total = 0_u64;
                    for _ in 0..SENDS {
                        total += q.send(&PIECE).await as u64;
                    }
                    total
                })
            }))
            .collect();
        let accepted = producers.into_iter()
            .map(|h| h.join().expect("producer panicked"))
            .sum::<u64>();
        consumer.join().expect("consumer panicked");
        accepted
    });

    assert_eq!(accepted, 1000);
    assert_eq!(buffer.occupied(), 1000);
    assert_eq!(buffer.stats().offers, (THREADS * SENDS) as u64);
    assert_eq!(queue.outstanding(), 0);
}
