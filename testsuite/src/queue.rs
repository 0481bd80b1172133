use core::pin::pin;

use ratesink::buffer::BufferConfig;
use ratesink::queue::RequestQueue;
use ratesink::sink::{SendError, Sink};
use ratesink::time::{TickCounter, Ticks};

use crate::{buffer_on, poll_and_assert_not_ready, poll_and_assert_ready};

pub async fn test_round_trip() {
    let clock = TickCounter::new();
    let queue: RequestQueue<&TickCounter> = RequestQueue::new(&clock);
    let mut buffer = buffer_on(&clock, BufferConfig::SIMULATED);

    let (sent, served) = futures::join!(queue.send(b"hello"), queue.serve_one(&mut buffer));
    assert_eq!(sent, 5);
    assert_eq!(served, 5);
    assert_eq!(buffer.occupied(), 5);
    assert_eq!(buffer.last_transmitted(), b'o');
    assert_eq!(queue.outstanding(), 0);
}

pub async fn test_empty_send() {
    let clock = TickCounter::new();
    let queue: RequestQueue<&TickCounter> = RequestQueue::new(&clock);
    // Nothing to deliver, so no consumer is needed.
    assert_eq!(queue.send(&[]).await, 0);
    assert_eq!(queue.send_within(Ticks(0), &[]).await, Ok(0));
    assert_eq!(queue.outstanding(), 0);
}

pub async fn test_fifo_order() {
    let clock = TickCounter::new();
    let queue: RequestQueue<&TickCounter> = RequestQueue::new(&clock);
    let mut buffer = buffer_on(&clock, BufferConfig::SIMULATED);

    let mut a = pin!(queue.send(&[1]));
    let mut b = pin!(queue.send(&[2, 2]));
    let mut c = pin!(queue.send(&[3, 3, 3]));
    // Post in the order b, a, c.
    poll_and_assert_not_ready!(b);
    poll_and_assert_not_ready!(a);
    poll_and_assert_not_ready!(c);
    assert_eq!(queue.pending(), 3);

    assert_eq!(queue.try_serve_one(&mut buffer), Some(2));
    assert_eq!(buffer.last_transmitted(), 2);
    assert_eq!(queue.try_serve_one(&mut buffer), Some(1));
    assert_eq!(buffer.last_transmitted(), 1);
    assert_eq!(queue.try_serve_one(&mut buffer), Some(3));
    assert_eq!(buffer.last_transmitted(), 3);
    assert_eq!(queue.try_serve_one(&mut buffer), None);

    // Answers are collected in any order.
    assert_eq!(poll_and_assert_ready!(c), 3);
    assert_eq!(poll_and_assert_ready!(a), 1);
    assert_eq!(poll_and_assert_ready!(b), 2);
    assert_eq!(queue.outstanding(), 0);
}

pub async fn test_chunking() {
    let clock = TickCounter::new();
    let queue: RequestQueue<&TickCounter, 4, 2> = RequestQueue::new(&clock);
    let mut buffer = buffer_on(&clock, BufferConfig::new(6, 1));

    let data = [7_u8; 10];
    let (sent, ()) = futures::join!(queue.send(&data), async {
        // 4 of 4, then 2 of 4, and the rest isn't sent.
        assert_eq!(queue.serve_one(&mut buffer).await, 4);
        assert_eq!(queue.serve_one(&mut buffer).await, 2);
    });
    assert_eq!(sent, 6);
    assert_eq!(queue.outstanding(), 0);
    assert_eq!(buffer.stats().offers, 2);
}

pub async fn test_full_queue_blocks_poster() {
    let clock = TickCounter::new();
    let queue: RequestQueue<&TickCounter, 8, 2> = RequestQueue::new(&clock);
    let mut buffer = buffer_on(&clock, BufferConfig::SIMULATED);

    let mut a = pin!(queue.send(b"a"));
    let mut b = pin!(queue.send(b"b"));
    let mut c = pin!(queue.send(b"c"));
    poll_and_assert_not_ready!(a);
    poll_and_assert_not_ready!(b);
    poll_and_assert_not_ready!(c);
    assert_eq!(queue.outstanding(), 2, "third request should not have fit");

    assert_eq!(queue.try_serve_one(&mut buffer), Some(1));
    // Served but uncollected: the slot is still taken.
    poll_and_assert_not_ready!(c);
    assert_eq!(poll_and_assert_ready!(a), 1);
    // Now there's room.
    poll_and_assert_not_ready!(c);
    assert_eq!(queue.pending(), 2);

    assert_eq!(queue.try_serve_one(&mut buffer), Some(1));
    assert_eq!(queue.try_serve_one(&mut buffer), Some(1));
    assert_eq!(poll_and_assert_ready!(c), 1);
    assert_eq!(poll_and_assert_ready!(b), 1);
    assert_eq!(buffer.last_transmitted(), b'c');
}

pub async fn test_retraction_on_drop() {
    let clock = TickCounter::new();
    let queue: RequestQueue<&TickCounter> = RequestQueue::new(&clock);
    let mut buffer = buffer_on(&clock, BufferConfig::SIMULATED);

    {
        let mut fut = pin!(queue.send(b"never"));
        poll_and_assert_not_ready!(fut);
        assert_eq!(queue.pending(), 1);
    }
    assert_eq!(queue.outstanding(), 0);
    assert_eq!(queue.try_serve_one(&mut buffer), None);

    // An answered-but-uncollected request is cleaned up too.
    {
        let mut fut = pin!(queue.send(b"lost"));
        poll_and_assert_not_ready!(fut);
        assert_eq!(queue.try_serve_one(&mut buffer), Some(4));
    }
    assert_eq!(queue.outstanding(), 0);
}

pub async fn test_timeout_before_service() {
    let clock = TickCounter::new();
    let queue: RequestQueue<&TickCounter> = RequestQueue::new(&clock);
    let mut buffer = buffer_on(&clock, BufferConfig::SIMULATED);

    let mut fut = pin!(queue.send_within(Ticks(2), b"late"));
    poll_and_assert_not_ready!(fut);
    clock.tick();
    poll_and_assert_not_ready!(fut);
    clock.tick();
    assert_eq!(poll_and_assert_ready!(fut), Err(SendError::Timeout));

    // Retracted, so the consumer never sees it.
    assert_eq!(queue.outstanding(), 0);
    assert_eq!(queue.try_serve_one(&mut buffer), None);
    assert_eq!(buffer.stats().offers, 0);
}

pub async fn test_answer_beats_deadline() {
    let clock = TickCounter::new();
    let queue: RequestQueue<&TickCounter> = RequestQueue::new(&clock);
    let mut buffer = buffer_on(&clock, BufferConfig::SIMULATED);

    let mut fut = pin!(queue.send_within(Ticks(2), b"prompt"));
    poll_and_assert_not_ready!(fut);
    assert_eq!(queue.try_serve_one(&mut buffer), Some(6));

    // Collected only after the deadline, but the answer was already in.
    clock.advance(Ticks(10));
    assert_eq!(poll_and_assert_ready!(fut), Ok(6));
}

pub async fn test_via_sink_trait() {
    let clock = TickCounter::new();
    let queue: RequestQueue<&TickCounter> = RequestQueue::new(&clock);
    let mut buffer = buffer_on(&clock, BufferConfig::new(100, 10));

    let (sent, ()) = futures::join!(send_generic(&queue), async {
        for _ in 0..4 {
            queue.serve_one(&mut buffer).await;
        }
    });
    // 30 + 30 + 30 + 10 of 30, then stop.
    assert_eq!(sent, 100);
    assert_eq!(buffer.occupied(), 100);
}

async fn send_generic<S: Sink>(sink: S) -> usize {
    let mut total = 0;
    for chunk in [0xEE_u8; 200].chunks(30) {
        let accepted = sink.send(chunk).await;
        total += accepted;
        if accepted < chunk.len() {
            break;
        }
    }
    total
}
