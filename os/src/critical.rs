//! Exclusion by critical section.
//!
//! **Note:** this module is only available if the `critical` feature is
//! present; it is on by default.
//!
//! [`CriticalSection`] is the cheapest strategy: acquiring it enters a
//! critical section as defined by the [`critical-section`] crate, and releasing
//! it leaves. It never suspends the caller -- instead, it stops everything else
//! that the installed implementation knows how to stop.
//!
//! What that means depends entirely on the implementation linked into your
//! final binary:
//!
//! - On a single-core microcontroller it typically masks interrupts. That
//!   excludes every other task and ISR *on that core*, and nothing else. On a
//!   multi-core part, tasks on the other core are not excluded, and this
//!   strategy is **not** a correct way to share a sink between cores. Use
//!   [`Mutex`][crate::mutex::Mutex] or a
//!   [`RequestQueue`][crate::queue::RequestQueue] there instead.
//! - Multi-core aware implementations (hardware spinlocks, or the `std`
//!   implementation used on hosts) do exclude other cores, at the cost of
//!   spinning or blocking the thread.
//!
//! Because the section is held for the whole of the guarded operation, keep
//! guarded operations short.
//!
//! Most implementations let a context that is already inside a critical
//! section enter again (nesting). `CriticalSection` does not pass that on: while
//! it is held, a second acquisition from inside the guarded operation fails
//! instead of handing out a second `&mut`.
//!
//! [`critical-section`]: https://docs.rs/critical-section/

use core::cell::{Cell, UnsafeCell};
use core::future::Future;
use core::task::Poll;

use critical_section::RestoreState;

use crate::lock::Lock;

/// Lock strategy that enters a critical section. See the module docs.
pub struct CriticalSection {
    /// Restore token from the `acquire` that is currently in effect. Only
    /// touched while the critical section is held.
    restore: UnsafeCell<RestoreState>,
    /// Set while some holder is inside. Only touched inside the critical
    /// section.
    held: Cell<bool>,
}

// Safety: `restore` and `held` are only touched inside the critical section,
// so no two contexts touch them at once.
unsafe impl Sync for CriticalSection {}

impl CriticalSection {
    /// Creates the strategy. Its only state is the current holder's restore
    /// token and whether there is a holder at all.
    pub const fn new() -> Self {
        Self {
            restore: UnsafeCell::new(RestoreState::invalid()),
            held: Cell::new(false),
        }
    }

    /// Enters the section, returning `false` (and leaving again) if this
    /// strategy is already held by the context we're running in.
    fn enter(&self) -> bool {
        // Safety: paired either with the `release` below, or with the one in
        // our `Lock::release`, which the `Lock` contract obliges the holder to
        // call exactly once.
        let token = unsafe { critical_section::acquire() };
        if self.held.replace(true) {
            // Nested entry. The outer holder's token stays in `restore`.
            // Safety: `token` is the one we just got, and nothing was done
            // with it.
            unsafe { critical_section::release(token) };
            return false;
        }
        // Safety: we're inside the critical section now, so nobody else is
        // touching `restore`.
        unsafe {
            *self.restore.get() = token;
        }
        true
    }
}

impl Default for CriticalSection {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for CriticalSection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("CriticalSection")
    }
}

// Safety: the critical-section implementation guarantees exclusion between
// `acquire` and `release` from other contexts (within whatever scope it covers;
// see the module docs for the multi-core caveat), and `held` turns away nested
// entries from the holder's own context.
unsafe impl Lock for CriticalSection {
    /// Succeeds unless called from inside the guarded operation. Depending on
    /// the implementation, entering may spin or block the thread first.
    fn try_acquire(&self) -> bool {
        self.enter()
    }

    /// Resolves on the first poll, unless polled from inside the guarded
    /// operation, in which case it stays pending until the holder leaves.
    fn acquire(&self) -> impl Future<Output = ()> + '_ {
        core::future::poll_fn(move |cx| {
            if self.enter() {
                Poll::Ready(())
            } else {
                // No wait list to join. The holder leaves without suspending,
                // so just ask to be polled again.
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        })
    }

    unsafe fn release(&self) {
        // Safety: the caller holds the section, so `restore` holds the token
        // from the matching `enter`.
        unsafe {
            let token = *self.restore.get();
            self.held.set(false);
            critical_section::release(token);
        }
    }
}
