//! Test suite for `ratesink` and its strategies.
//!
//! The suite is executor-independent: every test is an `async fn`, and
//! [`run_test_suite`] drives them one after another on the current thread,
//! using a [`TickCounter`] that the tests advance by hand. The tests that need
//! real parallelism live in [`contention`] and are driven from
//! `tests/contention.rs`.

mod accessor;
mod buffer;
mod critical;
mod mutex;
mod notify;
mod producer;
mod queue;
mod semaphore;
mod time;

pub mod contention;

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Waker;

use futures::task::ArcWake;
use ratesink::buffer::{BufferConfig, RateLimitedBuffer};
use ratesink::exec;
use ratesink::time::TickCounter;

/// Runs every single-threaded test, printing `name... OK` for each.
///
/// Panics on the first failure.
pub fn run_test_suite() {
    // Tests may run in any order alongside each other; only the first init
    // wins, which is fine.
    let _ = env_logger::builder().is_test(true).try_init();

    log::info!("starting test suite");
    futures::executor::block_on(task_coordinator());
    println!("tests complete.");
}

macro_rules! async_tests {
    ($($(#[$attr:meta])* $name:path,)*) => {
        $(
            $(#[$attr])*
            {
                print!(concat!(stringify!($name), "... "));
                log::debug!(concat!("running ", stringify!($name)));
                $name().await;
                println!("OK");
            }
         )*
    };
}

async fn task_coordinator() {
    async_tests! {
        notify::test_yield_cpu,
        notify::test_notify_until_bool,
        notify::test_notify_until_option,
        notify::test_until_next,
        notify::test_subscribers_coalesce,
        notify::test_subscriber_overflow_wakes_immediately,

        time::test_clock_advancing,
        time::test_advance_by_zero,
        time::test_sleep_until_basic,
        time::test_sleep_until_past,
        time::test_sleep_until_multi,
        time::test_with_deadline_actively_polled,
        time::test_with_deadline_blocking,
        time::test_with_timeout_ready,
        time::test_tick_time_arithmetic,

        buffer::test_config_presets,
        buffer::test_config_validation,
        buffer::test_accepts_up_to_capacity,
        buffer::test_conservation_same_tick,
        buffer::test_drain_after_five_ticks,
        buffer::test_full_buffer_accepts_nothing,
        buffer::test_zero_length_offer,
        buffer::test_drain_stops_at_empty,
        buffer::test_almost_full_prefill,
        buffer::test_backwards_clock,
        buffer::test_huge_elapsed_saturates,
        buffer::test_transmit_register,
        buffer::test_partial_acceptance_law,

        critical::test_perform,
        critical::test_try_perform,
        critical::test_release_on_panic,
        critical::test_nested_entry_refused,

        mutex::test_uncontended,
        mutex::test_exclusive_join,
        mutex::test_lock_cancel_before_poll,
        mutex::test_lock_cancel_while_blocked,
        mutex::test_fairness,
        mutex::test_rewake_on_cancel,
        mutex::test_try_perform_while_held,
        mutex::test_release_on_panic,
        mutex::test_lock_in_select,

        semaphore::test_create_drop,
        semaphore::test_acquire_release,
        semaphore::test_exhaustion,
        semaphore::test_fairness,
        semaphore::test_cancellation,
        semaphore::test_cancel_after_grant,
        semaphore::test_binary_gate,
        semaphore::test_binary_gate_never_exceeds_one,

        accessor::test_critical_send,
        accessor::test_mutex_send,
        accessor::test_semaphore_send,
        accessor::test_mutex_timeout_is_not_zero,
        accessor::test_semaphore_timeout_is_not_zero,
        accessor::test_full_is_not_timeout,
        accessor::test_zero_timeout_when_free,
        accessor::test_try_send_would_block,
        accessor::test_inspect,
        accessor::test_via_sink_trait,
        accessor::test_into_inner,

        queue::test_round_trip,
        queue::test_empty_send,
        queue::test_fifo_order,
        queue::test_chunking,
        queue::test_full_queue_blocks_poster,
        queue::test_retraction_on_drop,
        queue::test_timeout_before_service,
        queue::test_answer_beats_deadline,
        queue::test_via_sink_trait,

        producer::test_delivers_whole_payload,
        producer::test_delay_between_iterations,
        producer::test_zero_delay_waits_for_drain,
        producer::test_through_queue,
    }
}

///////////////////////////////////////////////////////////////////////////////
// Utility functions

/// Creates a buffer reading `clock`, panicking on a bad configuration.
fn buffer_on(clock: &TickCounter, config: BufferConfig) -> RateLimitedBuffer<&TickCounter> {
    RateLimitedBuffer::new(clock, config).expect("test configuration should be valid")
}

/// Advances `clock` by one tick every time it's polled, until `stop` is set.
async fn run_clock(clock: &TickCounter, stop: &Cell<bool>) {
    while !stop.get() {
        clock.tick();
        exec::yield_cpu().await;
    }
}

/// A waker that counts how often it's been woken.
#[derive(Default)]
struct CountingWaker {
    wakes: AtomicUsize,
}

impl CountingWaker {
    fn new() -> (Arc<Self>, Waker) {
        let counter = Arc::new(Self::default());
        let waker = futures::task::waker(counter.clone());
        (counter, waker)
    }

    fn wakes(&self) -> usize {
        self.wakes.load(Ordering::SeqCst)
    }
}

impl ArcWake for CountingWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.wakes.fetch_add(1, Ordering::SeqCst);
    }
}

#[macro_export]
macro_rules! poll_and_assert_ready {
    ($fut:expr) => { poll_and_assert_ready!($fut, concat!("future not ready: ", stringify!($fut))) };
    ($fut:expr, $msg:expr $(, $args:tt)*) => {
        if let core::task::Poll::Ready(v) = futures::poll!($fut.as_mut()) {
            v
        } else {
            panic!($msg $($args)*);
        }
    }
}

#[macro_export]
macro_rules! poll_and_assert_not_ready {
    ($fut:expr) => { poll_and_assert_not_ready!($fut, concat!("future unexpectedly ready: ", stringify!($fut))) };
    ($fut:expr, $msg:expr $(, $args:tt)*) => {
        if !futures::poll!($fut.as_mut()).is_pending() {
            panic!($msg $($args)*);
        }
    }
}
