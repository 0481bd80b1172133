//! A producer task that pushes a payload into a sink at a configured pace.
//!
//! **Note:** this module is only available if the `producer` feature is
//! present; it is on by default.
//!
//! Because a [`Sink`] may accept only part of what it's offered, a producer
//! that needs its whole payload delivered has to retry. [`produce`] does that,
//! sending `bytes_per_iteration` bytes per iteration and optionally pausing
//! between iterations, the way a periodic producer task would.

use crate::sink::Sink;
use crate::time::{sleep_for, sleep_until, Clock, Ticks};

/// Pacing for [`produce`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProducerParams {
    /// Largest piece offered per iteration. Zero is treated as one.
    pub bytes_per_iteration: usize,
    /// Pause after each iteration, or `None` to go again right away. `Some`
    /// of zero ticks behaves like `None`.
    pub delay_between_iterations: Option<Ticks>,
}

impl ProducerParams {
    /// Sends `bytes_per_iteration` bytes per iteration, back-to-back.
    pub const fn new(bytes_per_iteration: usize) -> Self {
        Self {
            bytes_per_iteration,
            delay_between_iterations: None,
        }
    }

    /// Returns a copy of these parameters that pauses `delay` ticks after
    /// every iteration.
    pub const fn with_delay(self, delay: Ticks) -> Self {
        Self {
            delay_between_iterations: Some(delay),
            ..self
        }
    }
}

/// What [`produce`] did.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ProducerReport {
    /// Bytes the sink accepted. Equals the payload length on return.
    pub sent: usize,
    /// Calls made to `send`.
    pub iterations: u32,
    /// Iterations where the sink accepted nothing.
    pub stalls: u32,
}

/// Sends all of `payload` into `sink`, paced according to `params`, and
/// resolves once every byte has been accepted.
///
/// When the sink falls short and no (or a zero) delay is configured, this
/// waits for the next tick of `clock` before retrying, since the sink can't
/// drain any sooner.
///
/// # Cancellation
///
/// **Cancel safety:** Weak. Bytes accepted before the future is dropped stay
/// accepted, and there's no way to learn how many that was.
pub async fn produce<S, C>(
    sink: S,
    clock: C,
    params: ProducerParams,
    payload: &[u8],
) -> ProducerReport
    where S: Sink,
          C: Clock,
{
    let step = params.bytes_per_iteration.max(1);
    let mut report = ProducerReport::default();

    while report.sent < payload.len() {
        let rest = &payload[report.sent..];
        let piece = &rest[..step.min(rest.len())];

        let accepted = sink.send(piece).await;
        report.sent += accepted;
        report.iterations += 1;
        if accepted == 0 {
            report.stalls += 1;
        }
        if report.sent == payload.len() {
            break;
        }

        match params.delay_between_iterations {
            Some(delay) if delay > Ticks(0) => sleep_for(&clock, delay).await,
            // A zero delay is no delay, and must not turn a full sink into a
            // spin.
            _ if accepted < piece.len() => {
                let next = clock.now() + Ticks(1);
                sleep_until(&clock, next).await;
            }
            _ => (),
        }
    }

    log::debug!(
        "produced {} bytes in {} iterations ({} stalled)",
        report.sent,
        report.iterations,
        report.stalls,
    );
    report
}
