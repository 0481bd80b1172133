use core::pin::pin;

use ratesink::accessor::{CriticalAccessor, MutexAccessor, SynchronizedAccessor};
use ratesink::buffer::BufferConfig;
use ratesink::critical::CriticalSection;
use ratesink::lock::Lock;
use ratesink::mutex::Mutex;
use ratesink::sink::{SendError, Sink};
use ratesink::time::{TickCounter, Ticks};
use ratesink_semaphore::BinarySemaphore;

use crate::{buffer_on, poll_and_assert_not_ready, poll_and_assert_ready};

const PAYLOAD: [u8; 1000] = [0x5A; 1000];

pub async fn test_critical_send() {
    send_through(CriticalSection::new()).await;
}

pub async fn test_mutex_send() {
    send_through(Mutex::new()).await;
}

pub async fn test_semaphore_send() {
    send_through(BinarySemaphore::new()).await;
}

/// The buffer's laws hold unchanged behind any strategy.
async fn send_through<L: Lock>(lock: L) {
    let clock = TickCounter::new();
    let sink = SynchronizedAccessor::new(lock, buffer_on(&clock, BufferConfig::SIMULATED));

    let (a, b) = futures::join!(sink.send(&PAYLOAD[..600]), sink.send(&PAYLOAD[..600]));
    assert_eq!(a + b, 1000);
    assert_eq!(sink.send(&PAYLOAD[..1]).await, 0);
    assert_eq!(sink.send(&[]).await, 0);

    clock.advance(Ticks(5));
    assert_eq!(sink.send(&PAYLOAD).await, 500);
    assert_eq!(sink.inspect(|b| b.occupied()).await, 1000);
}

pub async fn test_mutex_timeout_is_not_zero() {
    let clock = TickCounter::new();
    let sink = MutexAccessor::new(Mutex::new(), buffer_on(&clock, BufferConfig::SIMULATED));
    timeout_while_held(&clock, &sink).await;
}

pub async fn test_semaphore_timeout_is_not_zero() {
    let clock = TickCounter::new();
    let sink = SynchronizedAccessor::new(
        BinarySemaphore::new(),
        buffer_on(&clock, BufferConfig::SIMULATED),
    );
    timeout_while_held(&clock, &sink).await;
}

/// Holds the accessor's lock from outside, and checks that a bounded send
/// reports a timeout, not a zero-byte acceptance, and leaves the buffer alone.
async fn timeout_while_held<L: Lock>(
    clock: &TickCounter,
    sink: &SynchronizedAccessor<L, &TickCounter>,
) {
    assert!(sink.lock().try_acquire());
    {
        let mut fut = pin!(sink.send_within(Ticks(3), &PAYLOAD[..10]));
        poll_and_assert_not_ready!(fut);
        clock.advance(Ticks(2));
        poll_and_assert_not_ready!(fut);
        clock.tick();
        let result = poll_and_assert_ready!(fut);
        assert_eq!(result, Err(SendError::Timeout));
    }
    unsafe { sink.lock().release() };

    assert_eq!(sink.inspect(|b| b.stats().offers).await, 0, "timed-out send reached the buffer");
    assert_eq!(sink.send_within(Ticks(3), &PAYLOAD[..10]).await, Ok(10));
}

pub async fn test_full_is_not_timeout() {
    let clock = TickCounter::new();
    let full = BufferConfig::SIMULATED.prefilled(1000);

    let sink = CriticalAccessor::new(CriticalSection::new(), buffer_on(&clock, full));
    assert_eq!(sink.send_within(Ticks(1), &PAYLOAD[..10]).await, Ok(0));

    let sink = MutexAccessor::new(Mutex::new(), buffer_on(&clock, full));
    assert_eq!(sink.send_within(Ticks(1), &PAYLOAD[..10]).await, Ok(0));

    let sink = SynchronizedAccessor::new(BinarySemaphore::new(), buffer_on(&clock, full));
    assert_eq!(sink.send_within(Ticks(1), &PAYLOAD[..10]).await, Ok(0));
}

pub async fn test_zero_timeout_when_free() {
    let clock = TickCounter::new();
    let sink = MutexAccessor::new(Mutex::new(), buffer_on(&clock, BufferConfig::SIMULATED));
    assert_eq!(sink.send_within(Ticks(0), &PAYLOAD[..10]).await, Ok(10));

    assert!(sink.lock().try_lock());
    assert_eq!(
        sink.send_within(Ticks(0), &PAYLOAD[..10]).await,
        Err(SendError::Timeout),
    );
    unsafe { sink.lock().unlock() };
}

pub async fn test_try_send_would_block() {
    let clock = TickCounter::new();
    let sink = MutexAccessor::new(Mutex::new(), buffer_on(&clock, BufferConfig::SIMULATED));
    assert_eq!(sink.try_send(&PAYLOAD[..10]), Ok(10));

    assert!(sink.lock().try_lock());
    assert_eq!(sink.try_send(&PAYLOAD[..10]), Err(SendError::WouldBlock));
    unsafe { sink.lock().unlock() };

    assert_eq!(sink.try_send(&PAYLOAD), Ok(990));
    assert_eq!(sink.try_send(&PAYLOAD), Ok(0));
    assert_eq!(SendError::WouldBlock.to_string(), "sink is busy");
}

pub async fn test_inspect() {
    let clock = TickCounter::new();
    let sink = CriticalAccessor::new(
        CriticalSection::new(),
        buffer_on(&clock, BufferConfig::SIMULATED.prefilled(300)),
    );
    assert_eq!(sink.inspect(|b| (b.occupied(), b.free())).await, (300, 700));

    // `perform` can do anything `offer` can.
    let accepted = sink.perform(|b| b.offer(&PAYLOAD[..50]) + b.offer(&PAYLOAD[..50])).await;
    assert_eq!(accepted, 100);
    assert_eq!(sink.inspect(|b| b.stats().offers).await, 2);
}

pub async fn test_via_sink_trait() {
    let clock = TickCounter::new();
    let sink = MutexAccessor::new(Mutex::new(), buffer_on(&clock, BufferConfig::new(100, 10)));
    assert_eq!(fill(&sink).await, 100);
    assert_eq!(fill(&&sink).await, 0);
}

async fn fill<S: Sink>(sink: &S) -> usize {
    let mut total = 0;
    for chunk in PAYLOAD[..200].chunks(30) {
        total += match sink.send_within(Ticks(1), chunk).await {
            Ok(n) => n,
            Err(e) => panic!("uncontended send failed: {e}"),
        };
    }
    total
}

pub async fn test_into_inner() {
    let clock = TickCounter::new();
    let mut sink = MutexAccessor::new(Mutex::new(), buffer_on(&clock, BufferConfig::SIMULATED));
    sink.send(&PAYLOAD[..10]).await;
    assert_eq!(sink.buffer_mut().occupied(), 10);
    let buffer = sink.into_inner();
    assert_eq!(buffer.occupied(), 10);
    assert_eq!(buffer.last_transmitted(), 0x5A);
}
