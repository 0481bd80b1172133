use core::cell::Cell;

use futures::FutureExt;
use ratesink::accessor::{CriticalAccessor, MutexAccessor};
use ratesink::buffer::BufferConfig;
use ratesink::critical::CriticalSection;
use ratesink::mutex::Mutex;
use ratesink::producer::{produce, ProducerParams, ProducerReport};
use ratesink::queue::RequestQueue;
use ratesink::time::{Clock, TickCounter, TickTime, Ticks};

use crate::{buffer_on, run_clock};

/// The payload a producer task pushes on every run.
const PAYLOAD: [u8; 2000] = [0x42; 2000];

/// Twice the buffer's capacity, back-to-back: the producer has to ride the
/// drain to get it all through.
pub async fn test_delivers_whole_payload() {
    let clock = TickCounter::new();
    let sink = MutexAccessor::new(Mutex::new(), buffer_on(&clock, BufferConfig::SIMULATED));
    let stop = Cell::new(false);

    let (report, ()) = futures::join!(
        async {
            let r = produce(&sink, &clock, ProducerParams::new(300), &PAYLOAD).await;
            stop.set(true);
            r
        },
        run_clock(&clock, &stop),
    );

    assert_eq!(report.sent, PAYLOAD.len());
    // At 100 bytes per tick, the second thousand bytes can't have gone
    // through in fewer than 10 ticks.
    assert!(clock.now() >= TickTime::from_ticks(10));
    let stats = sink.inspect(|b| b.stats()).await;
    assert_eq!(stats.bytes_accepted, PAYLOAD.len() as u64);
    assert_eq!(stats.offers, u64::from(report.iterations));
}

pub async fn test_delay_between_iterations() {
    let clock = TickCounter::new();
    let sink = MutexAccessor::new(Mutex::new(), buffer_on(&clock, BufferConfig::SIMULATED));
    let stop = Cell::new(false);
    let params = ProducerParams::new(100).with_delay(Ticks(2));

    let (report, ()) = futures::join!(
        async {
            let r = produce(&sink, &clock, params, &PAYLOAD[..500]).await;
            stop.set(true);
            r
        },
        run_clock(&clock, &stop),
    );

    assert_eq!(report, ProducerReport { sent: 500, iterations: 5, stalls: 0 });
    // Four pauses between five iterations.
    assert!(clock.now() >= TickTime::from_ticks(8));
}

/// A zero delay under a strategy that never suspends must still let the clock
/// run when the sink is full.
pub async fn test_zero_delay_waits_for_drain() {
    let clock = TickCounter::new();
    let sink = CriticalAccessor::new(
        CriticalSection::new(),
        buffer_on(&clock, BufferConfig::SIMULATED),
    );
    let stop = Cell::new(false);
    let params = ProducerParams::new(300).with_delay(Ticks(0));

    let (report, ()) = futures::join!(
        async {
            let r = produce(&sink, &clock, params, &PAYLOAD).await;
            stop.set(true);
            r
        },
        run_clock(&clock, &stop),
    );

    assert_eq!(report.sent, PAYLOAD.len());
    assert!(clock.now() >= TickTime::from_ticks(10));
    // At most one retry per tick once the buffer is full.
    assert!(u64::from(report.stalls) <= clock.now().ticks());
}

pub async fn test_through_queue() {
    let clock = TickCounter::new();
    let queue: RequestQueue<&TickCounter> = RequestQueue::new(&clock);
    let mut buffer = buffer_on(&clock, BufferConfig::SIMULATED);
    let stop = Cell::new(false);

    let (report, ()) = futures::join!(
        async {
            let r = futures::select_biased! {
                r = produce(&queue, &clock, ProducerParams::new(250), &PAYLOAD).fuse() => r,
                never = queue.run(&mut buffer).fuse() => match never {},
            };
            stop.set(true);
            r
        },
        run_clock(&clock, &stop),
    );

    assert_eq!(report.sent, PAYLOAD.len());
    assert_eq!(buffer.stats().bytes_accepted, PAYLOAD.len() as u64);
    assert_eq!(queue.outstanding(), 0);
}
