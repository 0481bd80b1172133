//! Threaded mutual exclusion tests, one per strategy.
//!
//! The per-increment variants for the suspending strategies and the queue use
//! fewer iterations: with a fair lock every handoff between two threads is a
//! wakeup, and every queued send is a round trip through the consumer, both of
//! which cost far more than the increment itself.

use ratesink::critical::CriticalSection;
use ratesink::mutex::Mutex;
use ratesink_semaphore::BinarySemaphore;
use ratesink_testsuite::contention::{self, INCREMENTS};

const FAIR_INCREMENTS: u64 = 100_000;
const QUEUE_INCREMENTS: u64 = 20_000;

#[test]
fn critical_section_whole_loop() {
    contention::whole_loop_in_one_region(CriticalSection::new());
}

#[test]
fn mutex_whole_loop() {
    contention::whole_loop_in_one_region(Mutex::new());
}

#[test]
fn semaphore_whole_loop() {
    contention::whole_loop_in_one_region(BinarySemaphore::new());
}

#[test]
fn critical_section_per_increment() {
    contention::region_per_increment(CriticalSection::new(), INCREMENTS);
}

#[test]
fn mutex_per_increment() {
    contention::region_per_increment(Mutex::new(), FAIR_INCREMENTS);
}

#[test]
fn semaphore_per_increment() {
    contention::region_per_increment(BinarySemaphore::new(), FAIR_INCREMENTS);
}

#[test]
fn queue_per_increment() {
    contention::queue_per_increment(QUEUE_INCREMENTS);
}

#[test]
fn critical_section_accessor_conservation() {
    contention::accessor_conservation(CriticalSection::new());
}

#[test]
fn mutex_accessor_conservation() {
    contention::accessor_conservation(Mutex::new());
}

#[test]
fn semaphore_accessor_conservation() {
    contention::accessor_conservation(BinarySemaphore::new());
}

#[test]
fn queue_conservation() {
    contention::queue_conservation();
}
