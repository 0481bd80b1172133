//! A counting semaphore for use with [`ratesink`].
//!
//! See the docs on [`Semaphore`] for more details, and [`BinarySemaphore`] for
//! using one as a sink's lock strategy.
//!
//! [`ratesink`]: https://docs.rs/ratesink/

#![no_std]
#![warn(
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    missing_debug_implementations,
    missing_docs,
    semicolon_in_expressions_from_macros,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unsafe_op_in_unsafe_fn,
    unused_qualifications
)]

use core::cell::RefCell;
use core::future::Future;
use core::mem;
use core::pin::Pin;
use core::task::{Context, Poll};

use ratesink::lock::Lock;
use ratesink::waiters::{Ticket, Waiters, Withdrawn};

/// A counting semaphore.
///
/// A `Semaphore` gets initialized with a certain number of _permits._
/// Callers can take one permit from the semaphore using the `acquire`
/// operation, which will block if there are none available, and wake when
/// one becomes available.
///
/// `acquire` returns a `Permit`, which is a resource object that represents
/// holding one permit. When it is dropped, it restores its permit back to
/// the `Semaphore`, potentially waking a blocked caller.
///
/// Semaphores are useful for restricting concurrent access to something.
///
/// ```ignore
/// use ratesink_semaphore::Semaphore;
///
/// static FIVE_PERMITS: Semaphore = Semaphore::new(5);
///
/// let _one_permit = FIVE_PERMITS.acquire().await;
/// ```
///
/// The count and the wait list live in a critical section, so a `Semaphore`
/// can be shared between tasks, threads, and interrupt handlers (which may
/// `try_acquire` and release, but of course not wait).
///
/// # Fairness
///
/// This semaphore implementation is _fair,_ which in this context means
/// that permits are handed out in the order they're requested. If the
/// semaphore runs out of permits, tasks requesting permits are queued in
/// order and will be issued permits in order as they are returned to the
/// semaphore.
pub struct Semaphore {
    state: critical_section::Mutex<RefCell<State>>,
}

#[derive(Debug)]
struct State {
    available: usize,
    waiters: Waiters,
}

impl Semaphore {
    /// Creates a semaphore holding `permits` permits.
    pub const fn new(permits: usize) -> Self {
        Self {
            state: critical_section::Mutex::new(RefCell::new(State {
                available: permits,
                waiters: Waiters::new(),
            })),
        }
    }

    /// Creates a future that will resolve when it can take a single permit from
    /// the semaphore. Until then, the future will remain pending (i.e. block).
    ///
    /// Normally, once this future resolves, you'd keep the [`Permit`] object
    /// around until you're ready to give up the permit, at which point you'd
    /// drop it.
    ///
    /// To take a permit in a context where you can't keep a `Permit` around,
    /// for whatever reason, you can instead call [`core::mem::forget`] on the
    /// `Permit`. If you do this, be sure to call
    /// [`Semaphore::out_of_band_release`] to return your permit once you're
    /// ready -- otherwise the semaphore can be drained of all permits and
    /// nobody can make progress again.
    ///
    /// # Cancellation
    ///
    /// Cancel-safe but affects fairness.
    ///
    /// If you drop the returned future before it resolves...
    /// - If it had not successfully acquired a permit, nothing happens.
    /// - If it had, the permit is released.
    ///
    /// Dropping the future and re-calling `acquire` bumps the caller to the
    /// back of the priority list, to maintain fairness. Otherwise, the result
    /// is indistinguishable.
    pub fn acquire(&self) -> Acquire<'_> {
        Acquire {
            semaphore: self,
            ticket: None,
            done: false,
        }
    }

    /// Attempts to take a single permit from the semaphore, returning
    /// `Some(permit)` if one is available immediately, or `None` if they are
    /// all taken.
    ///
    /// The same rules about `forget` apply as for [`Semaphore::acquire`].
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let taken = critical_section::with(|cs| {
            let mut s = self.state.borrow_ref_mut(cs);
            match s.available.checked_sub(1) {
                Some(rest) => {
                    s.available = rest;
                    true
                }
                None => false,
            }
        });
        taken.then_some(Permit { semaphore: self })
    }

    /// Stuffs one permit back into the semaphore.
    ///
    /// Use this if you have called [`core::mem::forget`] on a [`Permit`], when
    /// you want to restore that permit to the semaphore. Note that this is an
    /// unusual use case and should only be done with good reason.
    ///
    /// It is, however, safe, in the Rust sense.
    ///
    /// It's possible to use this operation to increase the total number of
    /// permits available in the `Semaphore`. That's an even weirder use case,
    /// so be careful.
    pub fn out_of_band_release(&self) {
        self.release_up_to(usize::MAX);
    }

    /// Returns one permit, handing it to the oldest waiter if there is one,
    /// and otherwise adding it to the count unless that would exceed `limit`.
    fn release_up_to(&self, limit: usize) {
        let next = critical_section::with(|cs| {
            let mut s = self.state.borrow_ref_mut(cs);
            let next = s.waiters.grant_next();
            if next.is_none() {
                // Saturate rather than wrap: a wrapped count would hand out
                // permits that were never returned.
                s.available = s.available.saturating_add(1).min(limit);
            }
            // Otherwise the permit went straight to the oldest waiter, and
            // the count stays where it is.
            next
        });
        if let Some(waker) = next {
            waker.wake();
        }
    }

    /// Returns the number of permits that could be taken right now without
    /// waiting.
    pub fn permits_available(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).available)
    }

    /// Returns the number of futures queued for a permit.
    pub fn waiting(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).waiters.len())
    }
}

impl core::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        critical_section::with(|cs| {
            let s = self.state.borrow_ref(cs);
            f.debug_struct("Semaphore")
                .field("available", &s.available)
                .field("waiting", &s.waiters.len())
                .finish()
        })
    }
}

/// Future returned by [`Semaphore::acquire`].
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Acquire<'a> {
    semaphore: &'a Semaphore,
    ticket: Option<Ticket>,
    done: bool,
}

impl<'a> Future for Acquire<'a> {
    type Output = Permit<'a>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        assert!(!this.done, "Acquire polled after completion");

        let (acquired, spin) = critical_section::with(|cs| {
            let mut s = this.semaphore.state.borrow_ref_mut(cs);
            match this.ticket {
                Some(ticket) => (s.waiters.check(ticket, cx.waker()), false),
                None => {
                    if let Some(rest) = s.available.checked_sub(1) {
                        s.available = rest;
                        return (true, false);
                    }
                    match s.waiters.enqueue(cx.waker()) {
                        Some(ticket) => {
                            this.ticket = Some(ticket);
                            (false, false)
                        }
                        // No room on the wait list. Try again later.
                        None => (false, true),
                    }
                }
            }
        });

        if acquired {
            this.ticket = None;
            this.done = true;
            Poll::Ready(Permit {
                semaphore: this.semaphore,
            })
        } else {
            if spin {
                cx.waker().wake_by_ref();
            }
            Poll::Pending
        }
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket else {
            return;
        };
        let withdrawn = critical_section::with(|cs| {
            self.semaphore.state.borrow_ref_mut(cs).waiters.withdraw(ticket)
        });
        if withdrawn == Withdrawn::Granted {
            // This is the case where a permit was transferred to us, but we
            // haven't been polled -- and won't ever be polled, for we are
            // being dropped. Release the permit, which might wake another
            // task.
            self.semaphore.out_of_band_release();
        }
    }
}

/// A resource object that represents holding a single permit from a
/// [`Semaphore`].
///
/// You can obtain a `Permit` by calling [`Semaphore::acquire`] or
/// [`Semaphore::try_acquire`]. This decrements the semaphore's internal permit
/// counter by 1. When you `drop` the `Permit`, it increments the counter by
/// 1, possibly waking a task that was blocked.
#[derive(Debug)]
pub struct Permit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.semaphore.out_of_band_release();
    }
}

/// A [`Semaphore`] with a single permit, used as a mutual exclusion gate.
///
/// This is what a sink's `SynchronizedAccessor` uses for its semaphore
/// strategy. Holding the one permit is holding the lock; waiting callers are
/// queued fairly, exactly as for the semaphore itself.
///
/// ```ignore
/// let sink = SynchronizedAccessor::new(BinarySemaphore::new(), buffer);
/// ```
#[derive(Debug)]
pub struct BinarySemaphore {
    inner: Semaphore,
}

impl BinarySemaphore {
    /// Creates an open gate.
    pub const fn new() -> Self {
        Self {
            inner: Semaphore::new(1),
        }
    }

    /// Checks whether the gate's permit is currently taken.
    pub fn is_taken(&self) -> bool {
        self.inner.permits_available() == 0
    }

    /// Returns the number of futures queued for the gate.
    pub fn waiting(&self) -> usize {
        self.inner.waiting()
    }
}

impl Default for BinarySemaphore {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: the inner semaphore is private and starts with one permit, and
// `release` never raises the count above one, so at most one holder exists at
// a time.
unsafe impl Lock for BinarySemaphore {
    fn try_acquire(&self) -> bool {
        // The permit is returned explicitly by `release`.
        self.inner.try_acquire().map(mem::forget).is_some()
    }

    fn acquire(&self) -> impl Future<Output = ()> + '_ {
        let permit = self.inner.acquire();
        async move {
            mem::forget(permit.await);
        }
    }

    unsafe fn release(&self) {
        // Never more than the one permit, even if `release` is misused.
        self.inner.release_up_to(1);
    }
}
