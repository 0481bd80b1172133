//! A simulated rate-limited sink, and the tools to share it between tasks.
//!
//! This crate models a hardware peripheral with a finite transmit buffer that
//! drains at a constant rate, measured in discrete clock ticks. It provides the
//! model itself, plus several interchangeable ways of letting many concurrent
//! producers feed bytes into it without corrupting its state.
//!
//! # `ratesink` design principles
//!
//! 1. Be compact. No heap allocation anywhere; all bookkeeping lives in
//!    fixed-size structures whose size is visible at build time.
//!
//! 2. No magic. Strategies are plain types implementing plain traits. You pick
//!    one when you construct your accessor, and you can read the whole path a
//!    byte takes from `send` to the transmit register.
//!
//! 3. Be portable. Everything is expressed as a `Future`, and wakeups go through
//!    ordinary `core::task::Waker`s, so any executor works -- a cooperative
//!    single-core executor on a microcontroller, or `block_on` on a host
//!    thread. Interrupt masking is delegated to the [`critical-section`] crate,
//!    so the final binary decides what "critical section" means on its
//!    platform.
//!
//! 4. Be predictable. Fair primitives, FIFO queues, and documented
//!    cancellation behavior on every future that can block.
//!
//! # About the model
//!
//! The core type is [`buffer::RateLimitedBuffer`]. It does not run a background
//! drain thread. Instead, every call to [`offer`][buffer::RateLimitedBuffer::offer]
//! samples the clock, works out how many bytes the "hardware" would have
//! drained since the previous call, and then accepts as many new bytes as will
//! fit. Offering more than fits is not an error -- you simply get back a
//! smaller count, and it's up to you whether to retry the rest.
//!
//! # Sharing the sink
//!
//! A bare `RateLimitedBuffer` needs `&mut` access. To share one between
//! producers, wrap it in an [`accessor::SynchronizedAccessor`] parameterized
//! by one of the [`lock::Lock`] strategies:
//!
//! - [`critical::CriticalSection`] -- masks interrupts (or whatever your
//!   `critical-section` implementation does) for the duration of the call.
//!   Never suspends the caller.
//! - [`mutex::Mutex`] -- a fair async mutex. Callers wait their turn.
//! - `ratesink_semaphore::BinarySemaphore` -- a counting semaphore with one
//!   permit, used as a gate. Lives in its own crate.
//!
//! Or skip locking entirely and hand the buffer to a single consumer task
//! through a [`queue::RequestQueue`]. Producers post requests; the consumer
//! serves them in arrival order.
//!
//! All of these implement [`sink::Sink`], so code that produces data can be
//! written once and pointed at any strategy.
//!
//! ```ignore
//! static CLOCK: TickCounter = TickCounter::new();
//!
//! let buffer = RateLimitedBuffer::new(&CLOCK, BufferConfig::SIMULATED)?;
//! let sink = SynchronizedAccessor::new(Mutex::new(), buffer);
//!
//! let accepted = sink.send(b"hello").await;
//! ```
//!
//! # Cancellation
//!
//! Every future in this crate is just a `Future`, which means it can be
//! dropped before it resolves. Wherever a future can block, its docs describe
//! what dropping it does. In short: dropping a pending acquisition never leaks
//! the lock, and dropping a pending queued request retracts it.
//!
//! [`critical-section`]: https://docs.rs/critical-section/

#![no_std]

#![warn(
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    missing_debug_implementations,
    missing_docs,
    semicolon_in_expressions_from_macros,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unsafe_op_in_unsafe_fn,
    unused_qualifications,
)]

pub mod exec;
pub mod time;
pub mod waiters;

pub mod buffer;
pub mod lock;
pub mod sink;

#[cfg(feature = "critical")]
pub mod critical;
#[cfg(feature = "mutex")]
pub mod mutex;

pub mod accessor;
#[cfg(feature = "queue")]
pub mod queue;
#[cfg(feature = "producer")]
pub mod producer;
