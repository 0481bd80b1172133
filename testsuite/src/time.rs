use core::cell::Cell;
use core::pin::pin;

use futures::FutureExt;
use ratesink::exec::yield_cpu;
use ratesink::time::{
    sleep_for, sleep_until, with_deadline, with_timeout, Clock, TickCounter, TickTime, Ticks,
};

use crate::{poll_and_assert_not_ready, poll_and_assert_ready, run_clock};

pub async fn test_clock_advancing() {
    let clock = TickCounter::new();
    let t1 = clock.now();
    clock.tick();
    let t2 = clock.now();
    assert!(t2 > t1);
    assert_eq!(t2.ticks_since(t1), Ticks(1));
}

pub async fn test_advance_by_zero() {
    let clock = TickCounter::starting_at(TickTime::from_ticks(7));
    let mut s = pin!(sleep_for(&clock, Ticks(1)));
    poll_and_assert_not_ready!(s);
    clock.advance(Ticks(0));
    assert_eq!(clock.now(), TickTime::from_ticks(7));
    poll_and_assert_not_ready!(s);
}

pub async fn test_sleep_until_basic() {
    let clock = TickCounter::new();
    let target = clock.now() + Ticks(10);

    let mut s = pin!(sleep_until(&clock, target));
    poll_and_assert_not_ready!(s);
    clock.advance(Ticks(9));
    poll_and_assert_not_ready!(s);
    clock.tick();
    poll_and_assert_ready!(s);
    assert_eq!(clock.now(), target);
}

pub async fn test_sleep_until_past() {
    let clock = TickCounter::starting_at(TickTime::from_ticks(100));
    let mut s = pin!(sleep_until(&clock, TickTime::from_ticks(50)));
    poll_and_assert_ready!(s);
    let mut s = pin!(sleep_for(&clock, Ticks(0)));
    poll_and_assert_ready!(s);
}

pub async fn test_sleep_until_multi() {
    let clock = TickCounter::new();
    let stop = Cell::new(false);
    futures::join!(
        async {
            futures::select_biased! {
                _ = sleep_for(&clock, Ticks(2)).fuse() => (),
                _ = sleep_for(&clock, Ticks(4)).fuse() => {
                    panic!("longer sleep should not wake first")
                }
            }
            stop.set(true);
        },
        run_clock(&clock, &stop),
    );
}

/// Evaluates basic behavior of `with_deadline` when its task doesn't need
/// waking at expiration.
pub async fn test_with_deadline_actively_polled() {
    let clock = TickCounter::new();
    let start = clock.now();
    let deadline = start + Ticks(10);
    let last_poll = Cell::new(start);
    let result = with_deadline(&clock, deadline, async {
        loop {
            last_poll.set(clock.now());
            clock.tick();
            yield_cpu().await;
        }
    }).await;
    assert_eq!(result, None::<()>);
    assert_eq!(clock.now(), deadline);
    assert!(last_poll.get() < deadline);
}

/// Tests `with_deadline` in cases where the deadline is responsible for waking
/// the task to make progress.
pub async fn test_with_deadline_blocking() {
    let clock = TickCounter::new();
    let deadline = clock.now() + Ticks(10);
    let last_poll = Cell::new(clock.now());
    let stop = Cell::new(false);

    let (result, ()) = futures::join!(
        async {
            let r = with_deadline(&clock, deadline, async {
                loop {
                    last_poll.set(clock.now());
                    sleep_for(&clock, Ticks(100)).await;
                }
            }).await;
            stop.set(true);
            r
        },
        run_clock(&clock, &stop),
    );
    assert_eq!(result, None::<()>);
    assert!(clock.now() >= deadline);
    assert!(last_poll.get() < deadline);
}

pub async fn test_with_timeout_ready() {
    let clock = TickCounter::new();
    let result = with_timeout(&clock, Ticks(5), async { 42 }).await;
    assert_eq!(result, Some(42));

    // A zero timeout has already expired by the first poll, and the deadline
    // is checked first.
    let result = with_timeout(&clock, Ticks(0), async { 42 }).await;
    assert_eq!(result, None);
}

pub async fn test_tick_time_arithmetic() {
    let t = TickTime::from_ticks(10);
    assert_eq!(t + Ticks(5), TickTime::from_ticks(15));
    assert_eq!(t.checked_sub(Ticks(11)), None);
    assert_eq!(t.checked_sub(Ticks(10)), Some(TickTime::ZERO));
    assert_eq!(TickTime::from_ticks(u64::MAX).checked_add(Ticks(1)), None);
    assert_eq!(
        TickTime::from_ticks(u64::MAX) + Ticks(1),
        TickTime::from_ticks(u64::MAX),
        "addition saturates",
    );
    // Elapsed time never goes negative.
    assert_eq!(TickTime::from_ticks(3).ticks_since(t), Ticks(0));
    assert_eq!(u64::from(t), 10);

    let mut u = t;
    u += Ticks(1);
    assert_eq!(u.ticks(), 11);
}
