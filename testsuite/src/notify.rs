use core::cell::Cell;
use core::future::Future;
use core::pin::pin;
use core::task::Context;

use ratesink::exec::{self, Notify, MAX_SUBSCRIBERS};

use crate::{poll_and_assert_not_ready, poll_and_assert_ready, CountingWaker};

/// Make sure that yield CPU handles waking correctly -- otherwise the tests
/// will just halt here.
pub async fn test_yield_cpu() {
    let mut y = pin!(exec::yield_cpu());
    poll_and_assert_not_ready!(y);
    poll_and_assert_ready!(y);
}

pub async fn test_notify_until_bool() {
    let notify = Notify::new();
    let flag = Cell::new(false);

    let mut fut = pin!(notify.until(|| flag.get()));
    poll_and_assert_not_ready!(fut);
    assert_eq!(notify.subscribers(), 1);

    // Notifying without changing the condition wakes, but doesn't resolve.
    notify.notify();
    assert_eq!(notify.subscribers(), 0);
    poll_and_assert_not_ready!(fut);

    flag.set(true);
    notify.notify();
    poll_and_assert_ready!(fut);
}

pub async fn test_notify_until_option() {
    let notify = Notify::new();
    let slot = Cell::new(None);

    let mut fut = pin!(notify.until(|| slot.take()));
    poll_and_assert_not_ready!(fut);
    slot.set(Some(42_u32));
    notify.notify();
    let v = poll_and_assert_ready!(fut);
    assert_eq!(v, 42);
}

pub async fn test_until_next() {
    let notify = Notify::new();

    let mut fut = pin!(notify.until_next());
    poll_and_assert_not_ready!(fut);
    poll_and_assert_not_ready!(fut, "until_next should not resolve without a notify");
    notify.notify();
    poll_and_assert_ready!(fut);
}

pub async fn test_subscribers_coalesce() {
    let notify = Notify::new();
    let (counter, waker) = CountingWaker::new();

    notify.subscribe(&waker);
    notify.subscribe(&waker.clone());
    assert_eq!(notify.subscribers(), 1, "same task subscribed twice");

    notify.notify();
    assert_eq!(counter.wakes(), 1);
    assert_eq!(notify.subscribers(), 0);

    // A notify with nobody listening is harmless.
    notify.notify();
    assert_eq!(counter.wakes(), 1);
}

pub async fn test_subscriber_overflow_wakes_immediately() {
    let notify = Notify::new();
    let mut counters = Vec::new();
    for _ in 0..MAX_SUBSCRIBERS {
        let (counter, waker) = CountingWaker::new();
        notify.subscribe(&waker);
        counters.push(counter);
    }
    assert_eq!(notify.subscribers(), MAX_SUBSCRIBERS);

    // One more can't be stored, so it's woken right away rather than lost.
    let (extra, waker) = CountingWaker::new();
    notify.subscribe(&waker);
    assert_eq!(extra.wakes(), 1);
    assert_eq!(notify.subscribers(), MAX_SUBSCRIBERS);

    // Exercise the until path with a context whose waker we can watch.
    let mut fut = pin!(notify.until(|| false));
    let (watched, waker) = CountingWaker::new();
    let mut cx = Context::from_waker(&waker);
    assert!(fut.as_mut().poll(&mut cx).is_pending());
    assert_eq!(watched.wakes(), 1, "overflowed until should self-wake");

    notify.notify();
    for c in &counters {
        assert_eq!(c.wakes(), 1);
    }
}
