//! Wakeup plumbing shared by the rest of the crate.
//!
//! This crate doesn't ship an executor -- you bring your own. What it does need
//! is a way for one piece of code (a task releasing a lock, an interrupt handler
//! advancing the clock, a consumer answering a request) to wake whoever is
//! waiting for that event. That's [`Notify`].
//!
//! # Using `Notify`
//!
//! A `Notify` is a broadcast event. Futures that care about some condition
//! subscribe to it, and code that changes the condition calls
//! [`Notify::notify`] afterwards. The usual way to wait is
//! [`Notify::until`], which re-checks a condition each time the event fires:
//!
//! ```ignore
//! static DATA_READY: Notify = Notify::new();
//!
//! async fn wait_for_data(port: &Port) -> u8 {
//!     DATA_READY.until(|| port.try_read()).await
//! }
//! ```
//!
//! # Waker storage
//!
//! A `Notify` keeps up to [`MAX_SUBSCRIBERS`] distinct `Waker`s in a
//! fixed-size list, guarded by a critical section so that it can be signaled
//! from an interrupt handler or another thread. Wakers that would wake the
//! same task are coalesced. If the list is full, the subscribing task is woken
//! immediately instead of being remembered, so it will simply poll again --
//! wasteful, but it can't sleep through an event.

use core::cell::RefCell;
use core::future::Future;
use core::mem;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

use heapless::Vec;
use pin_project::pin_project;

/// Number of distinct wakers a single [`Notify`] can remember at once.
pub const MAX_SUBSCRIBERS: usize = 16;

/// A lightweight task notification scheme, safe to signal from any context.
///
/// See the module docs for details.
pub struct Notify {
    wakers: critical_section::Mutex<RefCell<Vec<Waker, MAX_SUBSCRIBERS>>>,
}

impl Notify {
    /// Creates a new `Notify` with no tasks waiting.
    pub const fn new() -> Self {
        Self {
            wakers: critical_section::Mutex::new(RefCell::new(Vec::new())),
        }
    }

    /// Adds the `Waker` to the set of waiters.
    ///
    /// This is a low-level operation. For using a `Notify` in practice, you
    /// probably want [`until`][Notify::until] instead.
    pub fn subscribe(&self, waker: &Waker) {
        let overflowed = critical_section::with(|cs| {
            let mut wakers = self.wakers.borrow_ref_mut(cs);
            if wakers.iter().any(|w| w.will_wake(waker)) {
                return false;
            }
            wakers.push(waker.clone()).is_err()
        });
        if overflowed {
            waker.wake_by_ref();
        }
    }

    /// Wakes every task subscribed since the last `notify`.
    ///
    /// The wakers are taken out of the list inside a critical section and
    /// invoked after it ends.
    pub fn notify(&self) {
        let wakers = critical_section::with(|cs| {
            mem::take(&mut *self.wakers.borrow_ref_mut(cs))
        });
        for waker in wakers {
            waker.wake();
        }
    }

    /// Returns the number of wakers currently remembered.
    pub fn subscribers(&self) -> usize {
        critical_section::with(|cs| self.wakers.borrow_ref(cs).len())
    }

    /// Waits for a condition to become true, checking only when signaled by
    /// this `Notify`. This is generally the right way to synchronize with an
    /// event through a `Notify`.
    ///
    /// `until` calls `cond` on every poll. If it doesn't pass, the future
    /// subscribes to `self` and calls `cond` one more time before going to
    /// sleep, so an event signaled between the first check and the
    /// subscription is not missed.
    ///
    /// The meaning of `cond` "passing" is defined by the [`TestResult`] trait:
    ///
    /// - If `cond` returns a `bool`, `until` resolves when it returns `true`.
    ///
    /// - If `cond` returns an `Option<T>`, `until` resolves when it returns
    ///   `Some(value)`, producing `value`.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict, if no data is moved into `cond`.
    ///
    /// Dropping this future drops `cond`, and may leave the current task
    /// subscribed to `self` (meaning one potential spurious wakeup in the
    /// future is possible).
    pub fn until<F, T: TestResult>(&self, cond: F) -> Until<'_, F>
    where
        F: FnMut() -> T,
    {
        Until {
            cond,
            notify: self,
        }
    }

    /// Subscribes to `self` and blocks until the task is awoken. This may
    /// produce spurious wakeups, and is appropriate only when you're checking
    /// some condition separately. Otherwise, use [`until`][Notify::until].
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict.
    pub fn until_next(&self) -> impl Future<Output = ()> + '_ {
        let mut subscribed = false;
        core::future::poll_fn(move |cx| {
            if mem::replace(&mut subscribed, true) {
                Poll::Ready(())
            } else {
                self.subscribe(cx.waker());
                Poll::Pending
            }
        })
    }
}

impl Default for Notify {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Notify {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Notify")
            .field("subscribers", &self.subscribers())
            .finish()
    }
}

/// Trait implemented by things that indicate success or failure, to be used
/// with [`Notify::until`].
///
/// In practice this is `bool` (if there's no output associated with success) or
/// `Option<T>` (if there is).
pub trait TestResult {
    /// Type of content produced on success.
    type Output;
    /// Converts `self` into an `Option` that is `Some` on success, `None` on
    /// failure.
    fn into_test_result(self) -> Option<Self::Output>;
}

impl TestResult for bool {
    type Output = ();
    fn into_test_result(self) -> Option<Self::Output> {
        if self {
            Some(())
        } else {
            None
        }
    }
}

impl<T> TestResult for Option<T> {
    type Output = T;
    fn into_test_result(self) -> Option<Self::Output> {
        self
    }
}

/// Internal future type used to implement `Notify::until`. This makes it
/// much easier to recognize the future in a debugger.
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[pin_project]
pub struct Until<'n, F> {
    cond: F,
    notify: &'n Notify,
}

impl<F, T> Future for Until<'_, F>
    where F: FnMut() -> T,
          T: TestResult,
{
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let p = self.project();
        if let Some(x) = (p.cond)().into_test_result() {
            return Poll::Ready(x);
        }
        p.notify.subscribe(cx.waker());
        match (p.cond)().into_test_result() {
            Some(x) => Poll::Ready(x),
            None => Poll::Pending,
        }
    }
}

/// Returns a future that will be pending exactly once before resolving.
///
/// This can be used to give up CPU to any other tasks that are currently ready
/// to run, and then take it back without waiting for an event.
///
/// # Cancellation
///
/// **Cancel safety:** Strict.
///
/// Dropping this future does nothing in particular.
pub fn yield_cpu() -> impl Future<Output = ()> {
    YieldCpu { polled: false }
}

#[must_use = "futures do nothing unless you `.await` or poll them"]
struct YieldCpu {
    polled: bool,
}

impl Future for YieldCpu {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if mem::replace(&mut self.polled, true) {
            Poll::Ready(())
        } else {
            // Ensure that we get called next round.
            cx.waker().wake_by_ref();

            Poll::Pending
        }
    }
}
