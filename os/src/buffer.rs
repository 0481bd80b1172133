//! The simulated rate-limited sink.
//!
//! A [`RateLimitedBuffer`] stands in for a peripheral with a finite transmit
//! buffer that the hardware empties at a constant rate: `drain_rate` bytes per
//! tick. Software can only hand it bytes, and only as many as currently fit.
//!
//! There is no background thread doing the draining. The drain is computed
//! lazily, when [`offer`][RateLimitedBuffer::offer] is called: the buffer looks
//! at how many ticks have passed since the previous call and removes
//! `elapsed * drain_rate` bytes (stopping at empty). If nobody calls `offer`
//! for a long time, the drain appears to happen all at once on the next call.
//! That's fine -- it's what software sampling a hardware FIFO's fill level
//! would see, too. Because the drain stops at empty, reconciling at several
//! intermediate points gives the same result as reconciling once.
//!
//! Accepted bytes are written one at a time into a single-byte transmit
//! register, the way a driver feeds a UART data register.
//!
//! The buffer itself is not synchronized -- `offer` takes `&mut self`. To share
//! one, see [`accessor`][crate::accessor] or [`queue`][crate::queue].

use crate::time::{Clock, TickTime};

/// Sizing and initial state for a [`RateLimitedBuffer`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BufferConfig {
    /// Total slots in the buffer, in bytes. Must be positive.
    pub capacity: usize,
    /// Bytes the hardware drains per tick. Must be positive.
    pub drain_rate: usize,
    /// Bytes already in the buffer when it's created. At most `capacity`.
    pub prefill: usize,
}

impl BufferConfig {
    /// A small peripheral: 1000 bytes, draining 100 bytes per tick.
    pub const SIMULATED: Self = Self::new(1000, 100);

    /// A roomier consumer: 10000 bytes, draining 5000 bytes per tick.
    pub const CONSUMER: Self = Self::new(10_000, 5000);

    /// Creates an empty-at-start configuration.
    pub const fn new(capacity: usize, drain_rate: usize) -> Self {
        Self {
            capacity,
            drain_rate,
            prefill: 0,
        }
    }

    /// Returns a copy of this configuration that starts with `prefill` bytes
    /// already occupied.
    pub const fn prefilled(self, prefill: usize) -> Self {
        Self { prefill, ..self }
    }

    /// Returns a copy of this configuration that starts one byte short of
    /// full. Handy for watching the drain timing from the very first tick.
    pub const fn almost_full(self) -> Self {
        self.prefilled(self.capacity.saturating_sub(1))
    }

    /// Checks that this configuration describes a usable buffer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.drain_rate == 0 {
            return Err(ConfigError::ZeroDrainRate);
        }
        if self.prefill > self.capacity {
            return Err(ConfigError::PrefillExceedsCapacity {
                prefill: self.prefill,
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::SIMULATED
    }
}

/// Reasons a [`BufferConfig`] can be rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A buffer with no room can never accept anything.
    #[error("buffer capacity must be positive")]
    ZeroCapacity,
    /// A buffer that never drains fills up once and stays full.
    #[error("drain rate must be positive")]
    ZeroDrainRate,
    /// The initial fill level doesn't fit.
    #[error("prefill of {prefill} bytes exceeds capacity of {capacity}")]
    PrefillExceedsCapacity {
        /// Requested initial fill.
        prefill: usize,
        /// Configured capacity.
        capacity: usize,
    },
}

/// Running totals kept by a [`RateLimitedBuffer`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BufferStats {
    /// Calls to `offer`.
    pub offers: u64,
    /// Sum of the lengths passed to `offer`.
    pub bytes_offered: u64,
    /// Sum of the values returned from `offer`.
    pub bytes_accepted: u64,
    /// Bytes removed by reconciliation.
    pub bytes_drained: u64,
}

/// A fixed-capacity sink that drains at a constant rate. See the module docs.
#[derive(Debug)]
pub struct RateLimitedBuffer<C> {
    clock: C,
    capacity: usize,
    drain_rate: usize,
    /// Bytes not yet drained. Always in `0..=capacity`.
    occupied: usize,
    /// Tick at which `occupied` was last reconciled.
    last_tick: TickTime,
    /// Staging cell for the byte being handed to the "hardware".
    transmit_register: u8,
    stats: BufferStats,
}

impl<C: Clock> RateLimitedBuffer<C> {
    /// Creates a buffer reading time from `clock`.
    ///
    /// Reconciliation starts from the clock's current reading, so any prefill
    /// in `config` is still there on the first `offer` made in the same tick.
    pub fn new(clock: C, config: BufferConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let last_tick = clock.now();
        Ok(Self {
            clock,
            capacity: config.capacity,
            drain_rate: config.drain_rate,
            occupied: config.prefill,
            last_tick,
            transmit_register: 0,
            stats: BufferStats::default(),
        })
    }

    /// Offers `data` to the sink, returning how many leading bytes of it were
    /// accepted.
    ///
    /// This reads the clock, drains whatever the elapsed ticks account for,
    /// and accepts `min(free space, data.len())` bytes. It never fails:
    /// offering more than fits just returns a smaller number, possibly zero.
    /// Callers that need every byte delivered must retry the remainder.
    pub fn offer(&mut self, data: &[u8]) -> usize {
        let now = self.clock.now();
        self.offer_at(now, data)
    }

    /// Does the work of [`offer`][Self::offer] given a clock reading `now`
    /// taken by the caller.
    ///
    /// A `now` earlier than the last reconciliation counts as no time having
    /// passed.
    pub fn offer_at(&mut self, now: TickTime, data: &[u8]) -> usize {
        self.check_invariant();
        self.reconcile(now);

        let accept = self.free().min(data.len());
        for &byte in &data[..accept] {
            // Safety: the pointer comes from a live `&mut u8`. The store is
            // volatile so that it happens once per byte, as a register write
            // would.
            unsafe {
                core::ptr::write_volatile(&mut self.transmit_register, byte);
            }
            self.occupied += 1;
        }

        self.stats.offers += 1;
        self.stats.bytes_offered += data.len() as u64;
        self.stats.bytes_accepted += accept as u64;
        if accept < data.len() {
            log::debug!(
                "sink accepted {} of {} bytes ({} of {} occupied)",
                accept,
                data.len(),
                self.occupied,
                self.capacity,
            );
        }

        self.check_invariant();
        accept
    }

    /// Applies the drain for the ticks between `last_tick` and `now`.
    fn reconcile(&mut self, now: TickTime) {
        let elapsed = now.ticks_since(self.last_tick).0;
        if elapsed == 0 {
            return;
        }
        self.last_tick = now;

        let rate = self.drain_rate as u64;
        let drained = elapsed.saturating_mul(rate);
        let removed = if drained >= self.occupied as u64 {
            self.occupied
        } else {
            // Fits in usize: it's less than `occupied`.
            drained as usize
        };
        self.occupied -= removed;
        self.stats.bytes_drained += removed as u64;
        log::trace!(
            "reconciled {} ticks at {:?}: drained {} bytes, {} occupied",
            elapsed,
            now,
            removed,
            self.occupied,
        );
    }

    /// Returns the clock this buffer reads.
    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<C> RateLimitedBuffer<C> {
    /// Total slots, in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes drained per tick.
    pub fn drain_rate(&self) -> usize {
        self.drain_rate
    }

    /// Bytes occupied as of the last reconciliation. This does not read the
    /// clock; call `offer` (possibly with no data) to bring it up to date.
    pub fn occupied(&self) -> usize {
        self.occupied
    }

    /// Free slots as of the last reconciliation.
    pub fn free(&self) -> usize {
        self.capacity - self.occupied
    }

    /// Tick of the last reconciliation.
    pub fn last_tick(&self) -> TickTime {
        self.last_tick
    }

    /// The last byte written to the transmit register, or zero if none has
    /// been written yet.
    pub fn last_transmitted(&self) -> u8 {
        self.transmit_register
    }

    /// Running totals.
    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    /// Halts (in debug builds) if the occupancy is out of range. That can only
    /// happen if the buffer was mutated concurrently without exclusion.
    fn check_invariant(&self) {
        debug_assert!(
            self.occupied <= self.capacity,
            "occupied {} exceeds capacity {}: concurrent unsynchronized access?",
            self.occupied,
            self.capacity,
        );
    }
}
