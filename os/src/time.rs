//! Timekeeping in discrete ticks.
//!
//! The sink model only understands one unit of time: the *tick*, advanced by
//! something outside this crate (a timer interrupt, a scheduler, a test). This
//! module defines how ticks are represented, the [`Clock`] trait through which
//! the rest of the crate reads them, and the futures for waiting on them.
//!
//! # Types for describing time
//!
//! `TickTime` represents a specific point in time, measured as a number of
//! ticks since the clock started. It's a 64-bit count, which means a 1 kHz
//! tick overflows every 584 million years. This lets us ignore overflows in
//! timestamps, making everything simpler. `TickTime` is analogous to
//! `std::time::Instant`.
//!
//! `Ticks` represents a relative interval. It uses the same representation as
//! `TickTime`, so adding them together is cheap.
//!
//! # Where ticks come from
//!
//! Anything implementing [`Clock`] can drive the crate. The provided
//! implementation, [`TickCounter`], is a counter that you advance yourself --
//! call [`TickCounter::tick`] from your timer interrupt, or
//! [`TickCounter::advance`] from a simulation or test. Each advance wakes any
//! task sleeping on the clock.
//!
//! # Imposing a timeout on an operation
//!
//! If you want to stop a concurrent process if it's not done by a certain time,
//! see the [`with_deadline`] function (and its relative friend,
//! [`with_timeout`]). These let you impose a deadline on any future, such that
//! if it hasn't resolved by a certain time, it will be dropped (cancelled).

use core::cell::Cell;
use core::future::Future;
use core::ops::{Add, AddAssign};
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

use pin_project::pin_project;

use crate::exec::Notify;

/// Represents a moment in time by the value of a tick counter.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default, Hash)]
pub struct TickTime(u64);

impl TickTime {
    /// The moment the clock started.
    pub const ZERO: Self = Self(0);

    /// Constructs a `TickTime` value describing a certain number of ticks
    /// since the clock started.
    pub const fn from_ticks(t: u64) -> Self {
        Self(t)
    }

    /// Returns the raw tick count.
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Computes the number of ticks between an earlier time and `self`.
    ///
    /// If `earlier` is actually later than `self` (because the clock was
    /// reset, or someone handed us readings from two different clocks), the
    /// result is zero rather than a panic.
    pub fn ticks_since(self, earlier: TickTime) -> Ticks {
        Ticks(self.0.saturating_sub(earlier.0))
    }

    /// Adds some ticks to `self`, checking for overflow. Note that since we
    /// use 64 bit ticks, overflow is unlikely in practice.
    pub fn checked_add(self, ticks: Ticks) -> Option<Self> {
        self.0.checked_add(ticks.0).map(TickTime)
    }

    /// Subtracts some ticks from `self`, checking for overflow. Overflow can
    /// occur if `ticks` is longer than the time from the clock's start to
    /// `self`.
    pub fn checked_sub(self, ticks: Ticks) -> Option<Self> {
        self.0.checked_sub(ticks.0).map(TickTime)
    }
}

/// Adds a number of ticks to a `TickTime`, saturating at the end of time.
impl Add<Ticks> for TickTime {
    type Output = Self;
    fn add(self, other: Ticks) -> Self::Output {
        TickTime(self.0.saturating_add(other.0))
    }
}

impl AddAssign<Ticks> for TickTime {
    fn add_assign(&mut self, other: Ticks) {
        *self = *self + other;
    }
}

impl From<TickTime> for u64 {
    fn from(t: TickTime) -> Self {
        t.0
    }
}

/// A period of time measured in ticks.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default, Hash)]
pub struct Ticks(pub u64);

impl From<Ticks> for u64 {
    fn from(x: Ticks) -> Self {
        x.0
    }
}

impl From<u64> for Ticks {
    fn from(x: u64) -> Self {
        Self(x)
    }
}

/// A monotonic source of ticks.
///
/// Implementations must never go backwards while anyone is using them, and
/// must wake every subscribed waker each time the tick count changes.
pub trait Clock {
    /// Reads the current tick count.
    fn now(&self) -> TickTime;

    /// Arranges for `waker` to be woken the next time the tick count
    /// advances.
    fn subscribe(&self, waker: &Waker);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> TickTime {
        (**self).now()
    }

    fn subscribe(&self, waker: &Waker) {
        (**self).subscribe(waker)
    }
}

/// A tick counter that you advance by hand or from a timer interrupt.
///
/// The count is protected by a critical section, so `tick` is safe to call
/// from an ISR and `now` is safe to call from anywhere, even on targets
/// without 64-bit atomics.
pub struct TickCounter {
    ticks: critical_section::Mutex<Cell<u64>>,
    advanced: Notify,
}

impl TickCounter {
    /// Creates a counter at `TickTime::ZERO`.
    pub const fn new() -> Self {
        Self::starting_at(TickTime::ZERO)
    }

    /// Creates a counter starting at an arbitrary time.
    pub const fn starting_at(t: TickTime) -> Self {
        Self {
            ticks: critical_section::Mutex::new(Cell::new(t.0)),
            advanced: Notify::new(),
        }
    }

    /// Advances the counter by one tick. Intended to be called from a periodic
    /// timer interrupt.
    pub fn tick(&self) {
        self.advance(Ticks(1));
    }

    /// Advances the counter by `by` ticks and wakes any sleepers.
    ///
    /// Advancing by zero ticks does nothing, and wakes nobody.
    pub fn advance(&self, by: Ticks) {
        if by.0 == 0 {
            return;
        }
        critical_section::with(|cs| {
            let t = self.ticks.borrow(cs);
            t.set(t.get().saturating_add(by.0));
        });
        self.advanced.notify();
    }
}

impl Default for TickCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TickCounter {
    fn now(&self) -> TickTime {
        TickTime(critical_section::with(|cs| self.ticks.borrow(cs).get()))
    }

    fn subscribe(&self, waker: &Waker) {
        self.advanced.subscribe(waker);
    }
}

impl core::fmt::Debug for TickCounter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TickCounter")
            .field("now", &self.now())
            .field("advanced", &self.advanced)
            .finish()
    }
}

/// Sleeps until `clock` reads equal to or greater than `deadline`.
///
/// More precisely, `sleep_until(c, d)` returns a `Future` that will poll as
/// `Pending` until `c.now() >= d`; then it will poll `Ready`.
///
/// If `deadline` is already in the past, this will instantly become `Ready`.
///
/// # Cancellation
///
/// **Cancel safety:** Strict.
///
/// Dropping this future does nothing in particular, other than possibly
/// leaving a stale subscription on the clock.
pub fn sleep_until<C: Clock>(clock: C, deadline: TickTime) -> Sleep<C> {
    Sleep { clock, deadline }
}

/// Sleeps until `clock` has advanced by `d`.
///
/// The current time is captured when `sleep_for` is called (_not_ at first
/// poll). If `d` is zero, this will instantly become `Ready`.
///
/// This function is a thin wrapper around [`sleep_until`].
pub fn sleep_for<C: Clock>(clock: C, d: Ticks) -> Sleep<C> {
    let deadline = clock.now() + d;
    sleep_until(clock, deadline)
}

/// Future returned by [`sleep_until`] and [`sleep_for`].
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Sleep<C> {
    clock: C,
    deadline: TickTime,
}

impl<C> Sleep<C> {
    /// Returns the time this sleep resolves at.
    pub fn deadline(&self) -> TickTime {
        self.deadline
    }
}

impl<C: Clock> Future for Sleep<C> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.clock.now() >= self.deadline {
            return Poll::Ready(());
        }
        self.clock.subscribe(cx.waker());
        // The clock may have advanced between the check and the
        // subscription.
        if self.clock.now() >= self.deadline {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Alters a future to impose a deadline on its completion.
///
/// Concretely,
/// - The output type is changed from `T` to `Option<T>`.
/// - If the future resolves on any polling that starts before `deadline`, its
///   result will be produced, wrapped in `Some`.
/// - If poll is called at or after `deadline`, the future resolves to `None`.
///
/// The wrapped future is _not_ immediately dropped if the timeout expires. It
/// will be dropped when you drop the wrapped version. Under normal
/// circumstances this happens automatically, e.g. if you do:
///
/// ```ignore
/// with_deadline(&clock, MY_DEADLINE, some_operation()).await;
/// ```
pub fn with_deadline<C, F>(
    clock: C,
    deadline: TickTime,
    code: F,
) -> impl Future<Output = Option<F::Output>>
    where C: Clock,
          F: Future,
{
    TimeLimited {
        limiter: sleep_until(clock, deadline),
        process: code,
    }
}

/// Alters a future to impose a timeout on its completion.
///
/// This is equivalent to [`with_deadline`] using a deadline of `clock.now() +
/// timeout`. That is, the current time is captured when `with_timeout` is
/// called (_not_ at first poll), the provided timeout is added, and that's used
/// as the deadline for the returned future.
pub fn with_timeout<C, F>(
    clock: C,
    timeout: Ticks,
    code: F,
) -> impl Future<Output = Option<F::Output>>
    where C: Clock,
          F: Future,
{
    let deadline = clock.now() + timeout;
    with_deadline(clock, deadline, code)
}

/// A future-wrapper that gates polling a future `B` on whether another
/// future `A` has resolved.
///
/// Once `A` resolved, `B` is no longer polled and the combined future
/// resolves to `None`. If `B` resolves first, its result is produced
/// wrapped in `Some`.
#[derive(Debug)]
#[pin_project]
struct TimeLimited<A, B> {
    #[pin]
    limiter: A,
    #[pin]
    process: B,
}

impl<A, B> Future for TimeLimited<A, B>
    where A: Future<Output = ()>,
          B: Future,
{
    type Output = Option<B::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let p = self.project();
        // We always check the limiter first. If the limiter's condition has
        // occurred, we bail, even if the limited process is also ready.
        if let Poll::Ready(()) = p.limiter.poll(cx) {
            return Poll::Ready(None);
        }
        p.process.poll(cx).map(Some)
    }
}
