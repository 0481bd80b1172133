//! Sharing one buffer between concurrent producers behind a lock.
//!
//! A [`SynchronizedAccessor`] owns a [`RateLimitedBuffer`] and a [`Lock`]
//! strategy. Every `send` acquires the lock, offers the data, and releases the
//! lock again before returning, so the buffer's reconcile-then-accept sequence
//! is never observed half-done by another producer.
//!
//! Pick the strategy when you construct the accessor:
//!
//! ```ignore
//! let sink = SynchronizedAccessor::new(CriticalSection::new(), buffer);
//! // or
//! let sink = SynchronizedAccessor::new(Mutex::new(), buffer);
//! // or
//! let sink = SynchronizedAccessor::new(BinarySemaphore::new(), buffer);
//! ```
//!
//! Apart from how long a caller may be suspended, they all behave the same.

use core::future::Future;

use crate::buffer::RateLimitedBuffer;
use crate::lock::{Exclusive, Lock};
use crate::sink::{SendError, Sink};
use crate::time::{Clock, Ticks};

/// A rate-limited buffer guarded by a lock strategy `L`, reading time from
/// clock `C`.
#[derive(Debug)]
pub struct SynchronizedAccessor<L, C> {
    /// Copy of the buffer's clock, for timing out acquisitions without
    /// touching the guarded buffer.
    clock: C,
    inner: Exclusive<L, RateLimitedBuffer<C>>,
}

impl<L, C> SynchronizedAccessor<L, C>
    where L: Lock,
          C: Clock + Clone,
{
    /// Wraps `buffer` so that it's only ever touched while `lock` is held.
    pub fn new(lock: L, buffer: RateLimitedBuffer<C>) -> Self {
        Self {
            clock: buffer.clock().clone(),
            inner: Exclusive::new(lock, buffer),
        }
    }

    /// Offers `data` to the buffer once the lock is acquired. Resolves to the
    /// number of leading bytes accepted.
    ///
    /// The lock is released before this resolves, on every path.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict. Dropping the future before it resolves means
    /// `data` was not offered.
    pub async fn send(&self, data: &[u8]) -> usize {
        self.inner.perform(|buffer| buffer.offer(data)).await
    }

    /// Offers `data` only if the lock can be acquired without waiting.
    pub fn try_send(&self, data: &[u8]) -> Result<usize, SendError> {
        self.inner
            .try_perform(|buffer| buffer.offer(data))
            .ok_or(SendError::WouldBlock)
    }

    /// Offers `data`, waiting at most `timeout` ticks for the lock.
    ///
    /// Resolves to `Err(SendError::Timeout)` if the lock wasn't acquired in
    /// time, in which case none of `data` was offered. A full buffer is still
    /// `Ok(0)`.
    pub async fn send_within(
        &self,
        timeout: Ticks,
        data: &[u8],
    ) -> Result<usize, SendError> {
        let result = self.inner
            .perform_within(&self.clock, timeout, |buffer| buffer.offer(data))
            .await;
        match result {
            Some(accepted) => Ok(accepted),
            None => {
                log::warn!("no access to sink within {:?}", timeout);
                Err(SendError::Timeout)
            }
        }
    }

    /// Runs `op` on the buffer with the lock held, and resolves to its result.
    ///
    /// `op` can do anything `offer` can, so the same rules apply: keep it
    /// short, particularly under the critical-section strategy.
    pub async fn perform<R>(&self, op: impl FnOnce(&mut RateLimitedBuffer<C>) -> R) -> R {
        self.inner.perform(op).await
    }

    /// Runs `op` on a shared view of the buffer with the lock held. Handy for
    /// reading the occupancy or statistics consistently.
    pub async fn inspect<R>(&self, op: impl FnOnce(&RateLimitedBuffer<C>) -> R) -> R {
        self.inner.perform(|buffer| op(buffer)).await
    }

    /// Returns the lock strategy.
    pub fn lock(&self) -> &L {
        self.inner.lock()
    }

    /// Gets direct access to the buffer. Having `&mut self` proves nobody else
    /// can be using it.
    pub fn buffer_mut(&mut self) -> &mut RateLimitedBuffer<C> {
        self.inner.get_mut()
    }

    /// Unwraps the buffer.
    pub fn into_inner(self) -> RateLimitedBuffer<C> {
        self.inner.into_inner()
    }
}

impl<L, C> Sink for SynchronizedAccessor<L, C>
    where L: Lock,
          C: Clock + Clone,
{
    fn send(&self, data: &[u8]) -> impl Future<Output = usize> {
        SynchronizedAccessor::send(self, data)
    }

    fn send_within(
        &self,
        timeout: Ticks,
        data: &[u8],
    ) -> impl Future<Output = Result<usize, SendError>> {
        SynchronizedAccessor::send_within(self, timeout, data)
    }
}

/// Accessor using the critical-section strategy.
#[cfg(feature = "critical")]
pub type CriticalAccessor<C> = SynchronizedAccessor<crate::critical::CriticalSection, C>;

/// Accessor using the fair mutex strategy.
#[cfg(feature = "mutex")]
pub type MutexAccessor<C> = SynchronizedAccessor<crate::mutex::Mutex, C>;
