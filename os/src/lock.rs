//! The mutual exclusion capability, and a cell that relies on it.
//!
//! [`Lock`] is the seam where synchronization strategies plug in. A `Lock`
//! doesn't guard any data by itself; it only promises that at most one holder
//! exists at a time. [`Exclusive`] pairs a `Lock` with a value and uses that
//! promise to hand out `&mut` access.
//!
//! # `perform` instead of guards
//!
//! `Exclusive` does not expose an RAII-style guard-based `lock` operation. The
//! operation you get is `perform`: you pass a normal Rust closure (_not_ an
//! `async` block), and when the lock is acquired, the closure is applied to the
//! contents, and the lock is released -- on every exit path, including a panic
//! inside the closure.
//!
//! This means there is no opportunity to `await` with the lock held, so a
//! cancelled task can never leave the contents half-updated, and an
//! interrupt-masking strategy can never be held across a suspension point.

use core::cell::UnsafeCell;
use core::future::Future;

use scopeguard::defer;

use crate::time::{with_timeout, Clock, Ticks};

/// A mutual exclusion primitive.
///
/// # Safety
///
/// Implementations must guarantee that between a successful acquisition
/// (`try_acquire` returning `true`, or the `acquire` future resolving) and
/// the matching `release`, no other acquisition succeeds. [`Exclusive`]
/// relies on this to hand out `&mut` references, so a broken implementation
/// produces aliasing `&mut`.
pub unsafe trait Lock {
    /// Acquires the lock if that can be done without waiting, returning
    /// `true` on success.
    fn try_acquire(&self) -> bool;

    /// Returns a future that resolves once the lock has been acquired.
    ///
    /// # Cancellation
    ///
    /// Implementations must be cancel-safe: dropping the future before it
    /// resolves must leave the lock as if `acquire` was never called, even if
    /// ownership had already been handed to this future.
    fn acquire(&self) -> impl Future<Output = ()> + '_;

    /// Releases the lock.
    ///
    /// # Safety
    ///
    /// The caller must hold the lock, acquired through `try_acquire` or
    /// `acquire` on this same object, and must not use anything the lock
    /// protects afterwards.
    unsafe fn release(&self);
}

/// Holds a `T` that can be accessed from multiple concurrent futures/tasks, but
/// only one at a time, as arbitrated by the lock `L`.
#[derive(Debug)]
pub struct Exclusive<L, T: ?Sized> {
    lock: L,
    /// Safe to access only while `lock` is held.
    value: UnsafeCell<T>,
}

// Safety: all access to `value` goes through `perform`/`try_perform`, which
// hold `lock`, so sharing an `Exclusive` only ever yields one `&mut T` at a
// time, possibly on another thread (hence `T: Send`).
unsafe impl<L: Lock + Sync, T: ?Sized + Send> Sync for Exclusive<L, T> {}

impl<L: Lock, T> Exclusive<L, T> {
    /// Creates an `Exclusive` guarding `value` with `lock`.
    pub const fn new(lock: L, value: T) -> Self {
        Self {
            lock,
            value: UnsafeCell::new(value),
        }
    }

    /// Consumes `self`, returning the guarded value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<L: Lock, T: ?Sized> Exclusive<L, T> {
    /// Returns the lock.
    pub fn lock(&self) -> &L {
        &self.lock
    }

    /// Gets direct access to the contents. Having `&mut self` proves nobody
    /// else can be using them, so no locking happens.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Acquires the lock immediately if it is free, and applies `op` to the
    /// contents before releasing it.
    ///
    /// Returns `Some` with the closure's result, or `None` if the lock was
    /// held.
    pub fn try_perform<R>(&self, op: impl FnOnce(&mut T) -> R) -> Option<R> {
        if self.lock.try_acquire() {
            defer! { unsafe { self.lock.release(); } }
            // Safety: we hold the lock, and release it only after `op` has
            // finished with the reference.
            Some(op(unsafe { &mut *self.value.get() }))
        } else {
            None
        }
    }

    /// Waits for the lock, applies `op` to the contents, and releases the lock.
    /// The future resolves to the value returned by `op`.
    ///
    /// If the lock is free at the time of the first `poll`, this completes
    /// without blocking (for strategies that allow it).
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict, with a caveat about the closure you pass in.
    ///
    /// Dropping the future before it has acquired the lock leaves the lock
    /// untouched. `op` is dropped without being called; if you moved
    /// resources into it, they are lost.
    pub async fn perform<R>(&self, op: impl FnOnce(&mut T) -> R) -> R {
        self.lock.acquire().await;
        defer! { unsafe { self.lock.release(); } }
        // Safety: we hold the lock until the deferred release above runs,
        // which is after `op` has returned.
        op(unsafe { &mut *self.value.get() })
    }

    /// Like [`perform`][Exclusive::perform], but gives up if the lock can't
    /// be acquired within `timeout` ticks of `clock`.
    ///
    /// Resolves to `Some(result)` if `op` ran, `None` on timeout. `op` is only
    /// ever called with the lock held, so a `None` means nothing was touched.
    ///
    /// A lock that is free on the first poll is taken even if `timeout` is
    /// zero.
    pub async fn perform_within<C, R>(
        &self,
        clock: C,
        timeout: Ticks,
        op: impl FnOnce(&mut T) -> R,
    ) -> Option<R>
        where C: Clock,
    {
        if !self.lock.try_acquire() {
            with_timeout(clock, timeout, self.lock.acquire()).await?;
        }
        defer! { unsafe { self.lock.release(); } }
        // Safety: as in `perform`.
        Some(op(unsafe { &mut *self.value.get() }))
    }
}
