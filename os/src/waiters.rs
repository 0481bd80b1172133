//! FIFO bookkeeping for tasks waiting on a resource.
//!
//! [`Waiters`] is the building block behind the fair primitives in this
//! workspace ([`Mutex`][crate::mutex::Mutex], and the semaphore crate). It
//! records, in arrival order, which futures are waiting for a resource and how
//! to wake them, and it tracks which of them have been *granted* the resource
//! but haven't yet noticed.
//!
//! `Waiters` is a plain data structure with no internal synchronization. The
//! primitive that owns it is expected to keep it next to its own state inside a
//! `critical_section::Mutex<RefCell<_>>`, so that checking the resource and
//! joining the queue happen atomically.
//!
//! # Protocol
//!
//! 1. A future that can't get the resource calls [`Waiters::enqueue`] and
//!    keeps the returned [`Ticket`].
//! 2. Whoever releases the resource calls [`Waiters::grant_next`] instead of
//!    making the resource available. The oldest waiter is moved to the granted
//!    set, and its waker is returned for the releaser to invoke.
//! 3. On each poll, the waiting future calls [`Waiters::check`]. Once it
//!    reports `true`, the future owns the resource.
//! 4. If the future is dropped before step 3 succeeds, it calls
//!    [`Waiters::withdraw`]. If that reports [`Withdrawn::Granted`], the
//!    future was handed the resource without ever seeing it, and must release
//!    it again -- usually by granting it to the next waiter.
//!
//! Handing the resource straight to a waiter, rather than freeing it and
//! letting everyone race, is what makes the primitives fair: nobody can barge
//! in between the release and the moment the rightful owner is polled.

use core::task::Waker;

use heapless::Vec;

/// Maximum number of futures that can be queued on (or granted by) a single
/// `Waiters` at once.
///
/// Futures arriving when the list is full can't be recorded; primitives handle
/// this by having the future poll again later.
pub const MAX_WAITERS: usize = 16;

/// Identifies one queued waiter. Tickets are handed out in increasing order
/// (wrapping) and are only meaningful to the `Waiters` that issued them.
pub type Ticket = u32;

/// FIFO list of waiting futures. See the module docs.
#[derive(Debug)]
pub struct Waiters {
    queue: Vec<(Ticket, Waker), MAX_WAITERS>,
    granted: Vec<Ticket, MAX_WAITERS>,
    next_ticket: Ticket,
}

/// Result of [`Waiters::withdraw`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Withdrawn {
    /// The ticket was still queued and has been removed. Nothing else to do.
    Waiting,
    /// The ticket had already been granted the resource. The caller now
    /// holds it and must release it.
    Granted,
    /// The ticket is unknown (already consumed by `check`, or never issued).
    Unknown,
}

impl Waiters {
    /// Creates an empty list.
    pub const fn new() -> Self {
        Self {
            queue: Vec::new(),
            granted: Vec::new(),
            next_ticket: 0,
        }
    }

    /// Returns `true` if nobody is queued. Granted-but-unobserved tickets
    /// don't count.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of futures queued and not yet granted.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Number of grants that haven't been picked up yet.
    pub fn pending_grants(&self) -> usize {
        self.granted.len()
    }

    /// Appends a waiter to the back of the queue, returning its ticket.
    ///
    /// Returns `None` if the list has no room.
    pub fn enqueue(&mut self, waker: &Waker) -> Option<Ticket> {
        if self.queue.len() + self.granted.len() >= MAX_WAITERS {
            return None;
        }
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        // Can't fail: we checked the combined length above.
        self.queue.push((ticket, waker.clone())).ok()?;
        Some(ticket)
    }

    /// Checks whether `ticket` has been granted the resource.
    ///
    /// If it has, the grant is consumed and this returns `true`: the caller
    /// owns the resource from here on. Otherwise, the stored waker is refreshed
    /// with `waker` and this returns `false`.
    pub fn check(&mut self, ticket: Ticket, waker: &Waker) -> bool {
        if let Some(i) = self.granted.iter().position(|&t| t == ticket) {
            self.granted.swap_remove(i);
            return true;
        }
        if let Some(entry) = self.queue.iter_mut().find(|(t, _)| *t == ticket) {
            if !entry.1.will_wake(waker) {
                entry.1 = waker.clone();
            }
        }
        false
    }

    /// Grants the resource to the oldest waiter, returning its waker.
    ///
    /// Returns `None` if nobody is waiting, in which case the caller should
    /// make the resource generally available instead.
    pub fn grant_next(&mut self) -> Option<Waker> {
        if self.queue.is_empty() {
            return None;
        }
        let (ticket, waker) = self.queue.remove(0);
        // Can't fail: every granted ticket came out of the queue, and the two
        // together never exceed capacity.
        self.granted.push(ticket).ok()?;
        Some(waker)
    }

    /// Removes `ticket` from the list, reporting what state it was in.
    pub fn withdraw(&mut self, ticket: Ticket) -> Withdrawn {
        if let Some(i) = self.granted.iter().position(|&t| t == ticket) {
            self.granted.swap_remove(i);
            return Withdrawn::Granted;
        }
        if let Some(i) = self.queue.iter().position(|(t, _)| *t == ticket) {
            self.queue.remove(i);
            return Withdrawn::Waiting;
        }
        Withdrawn::Unknown
    }
}

impl Default for Waiters {
    fn default() -> Self {
        Self::new()
    }
}
