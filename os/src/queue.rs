//! Sharing a sink by handing requests to a single consumer.
//!
//! **Note:** this module is only available if the `queue` feature is present;
//! it is on by default.
//!
//! Instead of locking the buffer, a [`RequestQueue`] gives the buffer to one
//! consumer task, which holds `&mut` to it and never shares it. Producers copy
//! their bytes into a bounded set of request slots, each tagged with a
//! [`Token`], and wait for the consumer to post an answer against that token.
//!
//! ```ignore
//! static CLOCK: TickCounter = TickCounter::new();
//! static QUEUE: RequestQueue<&TickCounter> = RequestQueue::new(&CLOCK);
//!
//! // consumer task
//! let mut buffer = RateLimitedBuffer::new(&CLOCK, BufferConfig::SIMULATED)?;
//! QUEUE.run(&mut buffer).await;
//!
//! // any number of producer tasks
//! let accepted = QUEUE.send(b"hello").await;
//! ```
//!
//! # Ordering
//!
//! Requests are served in the order they were posted. A `send` longer than
//! `CHUNK` bytes is split into several requests, which are posted one after
//! another; requests from other producers may be served in between them.
//!
//! # Sizing
//!
//! `CHUNK` (the largest request payload) and `DEPTH` (the number of requests
//! outstanding at once) are const parameters, 64 and 8 by default. Producers
//! arriving while all `DEPTH` slots are in use wait for one to free up.

use core::cell::RefCell;
use core::convert::Infallible;
use core::future::Future;
use core::mem;
use core::pin::Pin;
use core::task::{Context, Poll};

use heapless::Vec;

use crate::buffer::RateLimitedBuffer;
use crate::exec::Notify;
use crate::sink::{SendError, Sink};
use crate::time::{Clock, TickTime, Ticks};

/// Correlates a request with its answer. Tokens are issued in increasing
/// (wrapping) order per queue.
pub type Token = u32;

/// A bounded queue of send requests, served by one consumer. See the module
/// docs.
pub struct RequestQueue<C, const CHUNK: usize = 64, const DEPTH: usize = 8> {
    clock: C,
    exchange: critical_section::Mutex<RefCell<Exchange<CHUNK, DEPTH>>>,
    /// Signaled when a request is posted. The consumer waits on this.
    posted: Notify,
    /// Signaled when a request is answered or a slot is freed. Producers wait
    /// on this.
    progress: Notify,
}

#[derive(Debug)]
struct Exchange<const CHUNK: usize, const DEPTH: usize> {
    next_token: Token,
    /// Outstanding requests in arrival order.
    slots: Vec<Slot<CHUNK>, DEPTH>,
}

#[derive(Debug)]
struct Slot<const CHUNK: usize> {
    token: Token,
    state: SlotState<CHUNK>,
}

#[derive(Debug)]
enum SlotState<const CHUNK: usize> {
    /// Waiting for the consumer.
    Posted(Vec<u8, CHUNK>),
    /// Taken by the consumer, which is offering it to the buffer right now.
    Serving,
    /// Served. The number of bytes the buffer accepted.
    Answered(usize),
}

impl<C, const CHUNK: usize, const DEPTH: usize> RequestQueue<C, CHUNK, DEPTH> {
    /// Creates an empty queue whose timeouts are measured by `clock`.
    pub const fn new(clock: C) -> Self {
        Self {
            clock,
            exchange: critical_section::Mutex::new(RefCell::new(Exchange {
                next_token: 0,
                slots: Vec::new(),
            })),
            posted: Notify::new(),
            progress: Notify::new(),
        }
    }

    /// Number of slots in use: posted, being served, or answered but not yet
    /// collected.
    pub fn outstanding(&self) -> usize {
        critical_section::with(|cs| self.exchange.borrow_ref(cs).slots.len())
    }

    /// Number of requests waiting for the consumer.
    pub fn pending(&self) -> usize {
        critical_section::with(|cs| {
            self.exchange.borrow_ref(cs).slots.iter()
                .filter(|s| matches!(s.state, SlotState::Posted(_)))
                .count()
        })
    }

    /// Takes the oldest posted request, if any, marking it as being served.
    fn take_next(&self) -> Option<(Token, Vec<u8, CHUNK>)> {
        critical_section::with(|cs| {
            let mut ex = self.exchange.borrow_ref_mut(cs);
            ex.slots.iter_mut().find_map(|slot| match &mut slot.state {
                SlotState::Posted(data) => {
                    let data = mem::take(data);
                    slot.state = SlotState::Serving;
                    Some((slot.token, data))
                }
                _ => None,
            })
        })
    }

    /// Records the answer for `token` and wakes producers.
    fn answer(&self, token: Token, accepted: usize) {
        let delivered = critical_section::with(|cs| {
            let mut ex = self.exchange.borrow_ref_mut(cs);
            match ex.slots.iter_mut().find(|s| s.token == token) {
                Some(slot) => {
                    slot.state = SlotState::Answered(accepted);
                    true
                }
                None => false,
            }
        });
        if !delivered {
            log::debug!("request {} retracted while in service", token);
        }
        self.progress.notify();
    }

    /// Serves the oldest posted request, if there is one, by offering it to
    /// `buffer`. Returns the number of bytes accepted, or `None` if no request
    /// was waiting.
    pub fn try_serve_one<B: Clock>(&self, buffer: &mut RateLimitedBuffer<B>) -> Option<usize> {
        let (token, data) = self.take_next()?;
        Some(self.serve(buffer, token, &data))
    }

    /// Waits for a request to be posted, then serves it as
    /// [`try_serve_one`][Self::try_serve_one] does.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict. Dropping the future before it resolves
    /// leaves all requests where they were.
    pub async fn serve_one<B: Clock>(&self, buffer: &mut RateLimitedBuffer<B>) -> usize {
        let (token, data) = self.posted.until(|| self.take_next()).await;
        self.serve(buffer, token, &data)
    }

    /// Serves requests forever.
    pub async fn run<B: Clock>(&self, buffer: &mut RateLimitedBuffer<B>) -> Infallible {
        loop {
            self.serve_one(buffer).await;
        }
    }

    fn serve<B: Clock>(
        &self,
        buffer: &mut RateLimitedBuffer<B>,
        token: Token,
        data: &[u8],
    ) -> usize {
        let accepted = buffer.offer(data);
        log::debug!("served request {}: {} of {} bytes", token, accepted, data.len());
        self.answer(token, accepted);
        accepted
    }
}

impl<C: Clock, const CHUNK: usize, const DEPTH: usize> RequestQueue<C, CHUNK, DEPTH> {
    /// Sends `data` through the consumer, resolving to the number of leading
    /// bytes accepted.
    ///
    /// `data` is sent `CHUNK` bytes at a time. If a chunk is only partly
    /// accepted, the rest of `data` is not sent.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Weak. Dropping the future retracts its outstanding
    /// request, but chunks that were already answered stay accepted, and a
    /// request the consumer has started serving will still be offered.
    pub async fn send(&self, data: &[u8]) -> usize {
        // With no deadline there's nothing to time out.
        self.transfer(None, data).await.unwrap_or_default()
    }

    /// Like [`send`][Self::send], but gives up after `timeout` ticks.
    ///
    /// If the time runs out before the first chunk was accepted, this resolves
    /// to `Err(SendError::Timeout)` and none of `data` was accepted. If it runs
    /// out later, the bytes accepted so far are reported as `Ok`. A request
    /// that was already answered when the deadline passed still reports its
    /// answer.
    pub async fn send_within(&self, timeout: Ticks, data: &[u8]) -> Result<usize, SendError> {
        let deadline = self.clock.now() + timeout;
        let result = self.transfer(Some(deadline), data).await;
        if result.is_err() {
            log::warn!("no answer from consumer within {:?}", timeout);
        }
        result
    }

    async fn transfer(&self, deadline: Option<TickTime>, data: &[u8]) -> Result<usize, SendError> {
        let mut sent = 0;
        for chunk in data.chunks(CHUNK) {
            let accepted = match self.request(chunk, deadline).await {
                Ok(n) => n,
                Err(e) if sent == 0 => return Err(e),
                Err(_) => break,
            };
            sent += accepted;
            if accepted < chunk.len() {
                break;
            }
        }
        Ok(sent)
    }

    /// Returns a future that posts `chunk` (at most `CHUNK` bytes) and waits
    /// for its answer.
    fn request<'a>(
        &'a self,
        chunk: &'a [u8],
        deadline: Option<TickTime>,
    ) -> RoundTrip<'a, C, CHUNK, DEPTH> {
        debug_assert!(chunk.len() <= CHUNK);
        RoundTrip {
            queue: self,
            chunk,
            deadline,
            stage: Stage::Unposted,
        }
    }
}

impl<C, const CHUNK: usize, const DEPTH: usize> core::fmt::Debug for RequestQueue<C, CHUNK, DEPTH> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        critical_section::with(|cs| {
            let ex = self.exchange.borrow_ref(cs);
            f.debug_struct("RequestQueue")
                .field("outstanding", &ex.slots.len())
                .field("next_token", &ex.next_token)
                .finish_non_exhaustive()
        })
    }
}

impl<C: Clock, const CHUNK: usize, const DEPTH: usize> Sink for RequestQueue<C, CHUNK, DEPTH> {
    fn send(&self, data: &[u8]) -> impl Future<Output = usize> {
        RequestQueue::send(self, data)
    }

    fn send_within(
        &self,
        timeout: Ticks,
        data: &[u8],
    ) -> impl Future<Output = Result<usize, SendError>> {
        RequestQueue::send_within(self, timeout, data)
    }
}

/// One request's trip through the queue: post, then wait for the answer.
#[must_use = "futures do nothing unless you `.await` or poll them"]
struct RoundTrip<'a, C, const CHUNK: usize, const DEPTH: usize> {
    queue: &'a RequestQueue<C, CHUNK, DEPTH>,
    chunk: &'a [u8],
    deadline: Option<TickTime>,
    stage: Stage,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Stage {
    Unposted,
    Posted(Token),
    Finished,
}

impl<C: Clock, const CHUNK: usize, const DEPTH: usize> RoundTrip<'_, C, CHUNK, DEPTH> {
    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| self.queue.clock.now() >= d)
    }

    /// Tries to claim a slot. Subscribes to progress while holding the
    /// exchange, so a slot freed right after a failed attempt still wakes us.
    fn try_post(&self, cx: &mut Context<'_>) -> Option<Token> {
        critical_section::with(|cs| {
            let mut ex = self.queue.exchange.borrow_ref_mut(cs);
            if ex.slots.is_full() {
                self.queue.progress.subscribe(cx.waker());
                return None;
            }
            // The chunk length was checked against CHUNK when the future was
            // made, so this copy can't fail.
            let data = Vec::from_slice(self.chunk).ok()?;
            let token = ex.next_token;
            ex.next_token = ex.next_token.wrapping_add(1);
            ex.slots.push(Slot {
                token,
                state: SlotState::Posted(data),
            }).ok()?;
            self.queue.progress.subscribe(cx.waker());
            Some(token)
        })
    }

    /// Checks for an answer to `token`. Removes the slot if the answer is in,
    /// or if the request was never taken and `give_up` is set.
    fn collect(
        &self,
        token: Token,
        give_up: bool,
        cx: &mut Context<'_>,
    ) -> Option<Result<usize, SendError>> {
        critical_section::with(|cs| {
            let mut ex = self.queue.exchange.borrow_ref_mut(cs);
            let Some(i) = ex.slots.iter().position(|s| s.token == token) else {
                // Only this future removes its own slot.
                debug_assert!(false, "request {} vanished", token);
                return Some(Err(SendError::Timeout));
            };
            let outcome = match ex.slots[i].state {
                SlotState::Answered(n) => Some(Ok(n)),
                SlotState::Posted(_) if give_up => Some(Err(SendError::Timeout)),
                // A request in service is answered shortly. Wait for it even
                // past the deadline, since its bytes may already be accepted.
                _ => None,
            };
            if outcome.is_some() {
                ex.slots.remove(i);
            } else {
                self.queue.progress.subscribe(cx.waker());
            }
            outcome
        })
    }
}

impl<C: Clock, const CHUNK: usize, const DEPTH: usize> Future for RoundTrip<'_, C, CHUNK, DEPTH> {
    type Output = Result<usize, SendError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let expired = this.expired();
        if this.stage == Stage::Unposted {
            if expired {
                this.stage = Stage::Finished;
                return Poll::Ready(Err(SendError::Timeout));
            }
            match this.try_post(cx) {
                Some(token) => {
                    this.stage = Stage::Posted(token);
                    this.queue.posted.notify();
                }
                None => {
                    this.subscribe_deadline(cx);
                    return Poll::Pending;
                }
            }
        }
        let Stage::Posted(token) = this.stage else {
            panic!("request polled after completion");
        };
        match this.collect(token, expired, cx) {
            Some(result) => {
                this.stage = Stage::Finished;
                // A slot was freed.
                this.queue.progress.notify();
                Poll::Ready(result)
            }
            None => {
                if !expired {
                    this.subscribe_deadline(cx);
                }
                Poll::Pending
            }
        }
    }
}

impl<C: Clock, const CHUNK: usize, const DEPTH: usize> RoundTrip<'_, C, CHUNK, DEPTH> {
    fn subscribe_deadline(&self, cx: &mut Context<'_>) {
        if let Some(deadline) = self.deadline {
            self.queue.clock.subscribe(cx.waker());
            // The clock may have reached the deadline before we subscribed.
            if self.queue.clock.now() >= deadline {
                cx.waker().wake_by_ref();
            }
        }
    }
}

impl<C, const CHUNK: usize, const DEPTH: usize> Drop for RoundTrip<'_, C, CHUNK, DEPTH> {
    fn drop(&mut self) {
        let Stage::Posted(token) = self.stage else {
            return;
        };
        critical_section::with(|cs| {
            let mut ex = self.queue.exchange.borrow_ref_mut(cs);
            if let Some(i) = ex.slots.iter().position(|s| s.token == token) {
                ex.slots.remove(i);
            }
        });
        self.queue.progress.notify();
    }
}
