//! The interface producers write against.
//!
//! Every way of sharing a [`RateLimitedBuffer`][crate::buffer::RateLimitedBuffer]
//! between producers implements [`Sink`]. From the caller's side, `send`
//! behaves exactly like the buffer's own `offer`: it returns how many leading
//! bytes were accepted, which may be fewer than offered. The difference is that
//! `send` is safe to call from any number of concurrent producers.

use core::future::Future;

use crate::time::Ticks;

/// Outcomes of a send that never reached the buffer.
///
/// A full buffer is _not_ an error -- it's `Ok(0)`. These variants mean the
/// data was never offered at all, so the caller knows nothing was accepted
/// and nothing about the buffer's fill level was learned.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum SendError {
    /// Access to the buffer could not be obtained before the timeout expired.
    #[error("timed out waiting for access to the sink")]
    Timeout,
    /// Access to the buffer was not immediately available, and the caller
    /// asked not to wait.
    #[error("sink is busy")]
    WouldBlock,
}

/// A shared, rate-limited destination for bytes.
pub trait Sink {
    /// Offers `data`, waiting as long as needed for access, and resolves to
    /// the number of leading bytes accepted.
    fn send(&self, data: &[u8]) -> impl Future<Output = usize>;

    /// Like [`send`][Sink::send], but gives up with [`SendError::Timeout`] if
    /// access can't be obtained within `timeout` ticks.
    ///
    /// A timeout means none of `data` was accepted.
    fn send_within(
        &self,
        timeout: Ticks,
        data: &[u8],
    ) -> impl Future<Output = Result<usize, SendError>>;
}

impl<S: Sink + ?Sized> Sink for &S {
    fn send(&self, data: &[u8]) -> impl Future<Output = usize> {
        (**self).send(data)
    }

    fn send_within(
        &self,
        timeout: Ticks,
        data: &[u8],
    ) -> impl Future<Output = Result<usize, SendError>> {
        (**self).send_within(timeout, data)
    }
}
