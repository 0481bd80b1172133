use ratesink::buffer::{BufferConfig, BufferStats, ConfigError, RateLimitedBuffer};
use ratesink::time::{TickCounter, TickTime, Ticks};

use crate::buffer_on;

const PAYLOAD: [u8; 2000] = [0xA5; 2000];

pub async fn test_config_presets() {
    assert_eq!(BufferConfig::SIMULATED, BufferConfig::new(1000, 100));
    assert_eq!(BufferConfig::CONSUMER, BufferConfig::new(10_000, 5000));
    assert_eq!(BufferConfig::default(), BufferConfig::SIMULATED);
    assert_eq!(BufferConfig::SIMULATED.almost_full().prefill, 999);
    assert!(BufferConfig::CONSUMER.validate().is_ok());
}

pub async fn test_config_validation() {
    assert_eq!(BufferConfig::new(0, 100).validate(), Err(ConfigError::ZeroCapacity));
    assert_eq!(BufferConfig::new(100, 0).validate(), Err(ConfigError::ZeroDrainRate));
    let err = BufferConfig::new(10, 1).prefilled(11).validate().unwrap_err();
    assert_eq!(err, ConfigError::PrefillExceedsCapacity { prefill: 11, capacity: 10 });
    assert_eq!(err.to_string(), "prefill of 11 bytes exceeds capacity of 10");

    let clock = TickCounter::new();
    assert!(RateLimitedBuffer::new(&clock, BufferConfig::new(0, 1)).is_err());
    assert!(BufferConfig::new(10, 1).prefilled(10).validate().is_ok());
}

pub async fn test_accepts_up_to_capacity() {
    let clock = TickCounter::new();
    let mut sink = buffer_on(&clock, BufferConfig::SIMULATED);
    assert_eq!(sink.capacity(), 1000);
    assert_eq!(sink.drain_rate(), 100);
    assert_eq!(sink.offer(&PAYLOAD[..1200]), 1000);
    assert_eq!(sink.occupied(), 1000);
    assert_eq!(sink.free(), 0);
}

/// With no time passing, everything accepted stays accepted.
pub async fn test_conservation_same_tick() {
    let clock = TickCounter::new();
    let mut sink = buffer_on(&clock, BufferConfig::SIMULATED);

    let results: Vec<usize> = (0..4).map(|_| sink.offer(&PAYLOAD[..300])).collect();
    assert_eq!(results, [300, 300, 300, 100]);
    assert_eq!(results.iter().sum::<usize>(), sink.capacity());
    assert_eq!(sink.stats(), BufferStats {
        offers: 4,
        bytes_offered: 1200,
        bytes_accepted: 1000,
        bytes_drained: 0,
    });
}

pub async fn test_drain_after_five_ticks() {
    let clock = TickCounter::new();
    let mut sink = buffer_on(&clock, BufferConfig::SIMULATED);
    assert_eq!(sink.offer(&PAYLOAD[..1000]), 1000);

    clock.advance(Ticks(5));
    assert_eq!(sink.offer(&PAYLOAD[..1000]), 500);
    assert_eq!(sink.occupied(), 1000);
    assert_eq!(sink.last_tick(), TickTime::from_ticks(5));
    assert_eq!(sink.stats().bytes_drained, 500);
}

pub async fn test_full_buffer_accepts_nothing() {
    let clock = TickCounter::new();
    let mut sink = buffer_on(&clock, BufferConfig::SIMULATED.prefilled(1000));
    assert_eq!(sink.offer(&PAYLOAD[..10]), 0);
    assert_eq!(sink.offer(&PAYLOAD[..1]), 0);
    assert_eq!(sink.occupied(), 1000);
}

pub async fn test_zero_length_offer() {
    let clock = TickCounter::new();
    let mut sink = buffer_on(&clock, BufferConfig::SIMULATED.prefilled(250));

    assert_eq!(sink.offer(&[]), 0);
    assert_eq!(sink.offer(&[]), 0);
    assert_eq!(sink.occupied(), 250);

    // An empty offer still reconciles.
    clock.advance(Ticks(2));
    assert_eq!(sink.offer(&[]), 0);
    assert_eq!(sink.occupied(), 50);
    assert_eq!(sink.offer(&[]), 0);
    assert_eq!(sink.occupied(), 50);
}

pub async fn test_drain_stops_at_empty() {
    let clock = TickCounter::new();
    let mut sink = buffer_on(&clock, BufferConfig::SIMULATED.prefilled(150));

    clock.advance(Ticks(100));
    assert_eq!(sink.offer(&[]), 0);
    assert_eq!(sink.occupied(), 0);
    assert_eq!(sink.stats().bytes_drained, 150);
    // A long idle period doesn't bank free space beyond capacity.
    assert_eq!(sink.offer(&PAYLOAD), 1000);
}

/// One byte of room at start; watch the drain open up tick by tick.
pub async fn test_almost_full_prefill() {
    let clock = TickCounter::new();
    let mut sink = buffer_on(&clock, BufferConfig::SIMULATED.almost_full());

    assert_eq!(sink.offer(&PAYLOAD[..2]), 1);
    assert_eq!(sink.offer(&PAYLOAD[..2]), 0);
    clock.tick();
    assert_eq!(sink.offer(&PAYLOAD[..200]), 100);
    clock.tick();
    assert_eq!(sink.offer(&PAYLOAD[..50]), 50);
    assert_eq!(sink.offer(&PAYLOAD[..200]), 50);
}

pub async fn test_backwards_clock() {
    let clock = TickCounter::new();
    let mut sink = buffer_on(&clock, BufferConfig::SIMULATED.prefilled(1000));

    assert_eq!(sink.offer_at(TickTime::from_ticks(1), &PAYLOAD[..200]), 100);
    assert_eq!(sink.last_tick(), TickTime::from_ticks(1));

    // An earlier reading counts as no time passing.
    assert_eq!(sink.offer_at(TickTime::ZERO, &PAYLOAD[..100]), 0);
    assert_eq!(sink.last_tick(), TickTime::from_ticks(1));
    assert_eq!(sink.occupied(), 1000);

    // And doesn't cause a double drain when time catches up.
    assert_eq!(sink.offer_at(TickTime::from_ticks(2), &PAYLOAD[..200]), 100);
}

pub async fn test_huge_elapsed_saturates() {
    let clock = TickCounter::new();
    let mut sink = buffer_on(&clock, BufferConfig::new(10_000, usize::MAX).prefilled(10_000));
    assert_eq!(sink.offer_at(TickTime::from_ticks(u64::MAX), &PAYLOAD[..10]), 10);
    assert_eq!(sink.occupied(), 10);
}

pub async fn test_transmit_register() {
    let clock = TickCounter::new();
    let mut sink = buffer_on(&clock, BufferConfig::new(4, 1));
    assert_eq!(sink.last_transmitted(), 0);
    assert_eq!(sink.offer(b"abc"), 3);
    assert_eq!(sink.last_transmitted(), b'c');
    // Only accepted bytes reach the register.
    assert_eq!(sink.offer(b"xyz"), 1);
    assert_eq!(sink.last_transmitted(), b'x');
}

/// Sweeps a mix of lengths and tick gaps, checking the acceptance law and the
/// occupancy bounds after every call.
pub async fn test_partial_acceptance_law() {
    let clock = TickCounter::new();
    let mut sink = buffer_on(&clock, BufferConfig::new(1000, 37));
    let mut expected = 0_usize;

    for i in 0..500_usize {
        let len = (i * 131) % 700;
        let gap = (i * 7) % 5;
        clock.advance(Ticks(gap as u64));

        let occupied_before = sink.occupied();
        let drained = (gap * 37).min(occupied_before);
        let free = sink.capacity() - (occupied_before - drained);

        let accepted = sink.offer(&PAYLOAD[..len]);
        assert!(accepted <= len);
        assert_eq!(accepted, free.min(len));
        assert!(sink.occupied() <= sink.capacity());
        expected = expected - drained + accepted;
        assert_eq!(sink.occupied(), expected);
    }
    let stats = sink.stats();
    assert_eq!(stats.bytes_accepted - stats.bytes_drained, expected as u64);
}
