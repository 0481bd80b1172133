//! Fair async mutex.
//!
//! **Note:** this module is only available if the `mutex` feature is present;
//! it is on by default.
//!
//! This implements a mutual exclusion [`Lock`] that suspends contending
//! callers instead of spinning. To guard data with it, wrap the data in an
//! [`Exclusive`][crate::lock::Exclusive], or use it as the strategy of a
//! [`SynchronizedAccessor`][crate::accessor::SynchronizedAccessor].
//!
//! # Implementation details
//!
//! This implementation uses a wait-list to track all futures that are waiting
//! to lock the mutex. This makes unlocking more expensive, but means that the
//! unlock operation is *fair*, preventing starvation of contending tasks: the
//! mutex is handed directly to the oldest waiter, and stays locked in the
//! meantime so no interloper can steal it before that waiter is polled.
//!
//! All state lives in a `critical_section::Mutex`, so the lock works between
//! tasks on one executor, between threads, and between cores -- whatever the
//! installed critical-section implementation covers. The critical section is
//! only held for the few instructions it takes to update the state, never
//! while the mutex is held.
//!
//! There is no priority inheritance: the executor-agnostic futures here have
//! no notion of task priority. Fairness is what bounds the wait instead.

use core::cell::RefCell;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use futures::future::FusedFuture;

use crate::lock::Lock;
use crate::waiters::{Ticket, Waiters, Withdrawn};

/// A fair, async mutual exclusion lock. See the module docs.
pub struct Mutex {
    state: critical_section::Mutex<RefCell<State>>,
}

#[derive(Debug)]
struct State {
    locked: bool,
    waiters: Waiters,
}

impl Mutex {
    /// Creates an unlocked mutex.
    pub const fn new() -> Self {
        Self {
            state: critical_section::Mutex::new(RefCell::new(State {
                locked: false,
                waiters: Waiters::new(),
            })),
        }
    }

    /// Checks whether the mutex is currently held (or handed to a waiter that
    /// hasn't picked it up yet).
    pub fn is_locked(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).locked)
    }

    /// Number of futures currently queued for the mutex.
    pub fn waiting(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).waiters.len())
    }

    /// Locks the mutex if it is free, returning `true` on success.
    ///
    /// This will not jump the queue: a mutex that has just been handed to a
    /// waiter is still considered locked.
    pub fn try_lock(&self) -> bool {
        critical_section::with(|cs| {
            let mut s = self.state.borrow_ref_mut(cs);
            if s.locked {
                false
            } else {
                s.locked = true;
                true
            }
        })
    }

    /// Returns a future that resolves once this mutex has been locked on the
    /// caller's behalf.
    ///
    /// If the mutex is free at the time of the first `poll`, the future will
    /// resolve cheaply without touching the wait-list.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict.
    ///
    /// - If dropped before it's polled _at all_ it does essentially nothing.
    /// - If dropped once it's added itself to the wait list for the mutex, but
    ///   before it has been given the mutex, it will detach from the wait list.
    /// - If dropped after it has been given the mutex, but before it's been
    ///   polled (and thus given a chance to notice that), it will pass the
    ///   mutex on to the next waiter.
    pub fn lock(&self) -> LockFuture<'_> {
        LockFuture {
            mutex: self,
            ticket: None,
            done: false,
        }
    }

    /// Unlocks the mutex, handing it to the oldest waiter if there is one.
    ///
    /// # Safety
    ///
    /// You can use this safely _only_ if you know that no other code thinks it
    /// still has the mutex locked, including the code calling `unlock`.
    pub unsafe fn unlock(&self) {
        let next = critical_section::with(|cs| {
            let mut s = self.state.borrow_ref_mut(cs);
            let next = s.waiters.grant_next();
            if next.is_none() {
                // Nobody was waiting. Allow whoever tries next to get the
                // mutex.
                s.locked = false;
            }
            // Otherwise someone was waiting. We leave the state as taken to
            // ensure that no interloper can steal the mutex from the new
            // rightful owner before that owner is polled next.
            next
        });
        if let Some(waker) = next {
            waker.wake();
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        critical_section::with(|cs| {
            let s = self.state.borrow_ref(cs);
            f.debug_struct("Mutex")
                .field("locked", &s.locked)
                .field("waiting", &s.waiters.len())
                .finish()
        })
    }
}

// Safety: `locked` is only flipped false->true inside a critical section, and
// is only cleared (or handed to exactly one waiter) by `unlock`.
unsafe impl Lock for Mutex {
    fn try_acquire(&self) -> bool {
        self.try_lock()
    }

    fn acquire(&self) -> impl Future<Output = ()> + '_ {
        self.lock()
    }

    unsafe fn release(&self) {
        // Safety: passed through from our caller.
        unsafe { self.unlock() }
    }
}

/// Future returned by [`Mutex::lock`].
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct LockFuture<'a> {
    mutex: &'a Mutex,
    ticket: Option<Ticket>,
    done: bool,
}

impl Future for LockFuture<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(());
        }
        let (acquired, spin) = critical_section::with(|cs| {
            let mut s = this.mutex.state.borrow_ref_mut(cs);
            match this.ticket {
                Some(ticket) => (s.waiters.check(ticket, cx.waker()), false),
                None if !s.locked => {
                    s.locked = true;
                    (true, false)
                }
                None => match s.waiters.enqueue(cx.waker()) {
                    Some(ticket) => {
                        this.ticket = Some(ticket);
                        (false, false)
                    }
                    // Wait-list is full. We'll have to try again later.
                    None => (false, true),
                },
            }
        });
        if acquired {
            this.ticket = None;
            this.done = true;
            Poll::Ready(())
        } else {
            if spin {
                cx.waker().wake_by_ref();
            }
            Poll::Pending
        }
    }
}

impl FusedFuture for LockFuture<'_> {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

impl Drop for LockFuture<'_> {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket else {
            return;
        };
        let withdrawn = critical_section::with(|cs| {
            self.mutex.state.borrow_ref_mut(cs).waiters.withdraw(ticket)
        });
        if withdrawn == Withdrawn::Granted {
            // We were handed the mutex but will never use it. Pass it on.
            // Safety: the grant made us the owner.
            unsafe {
                self.mutex.unlock();
            }
        }
    }
}
