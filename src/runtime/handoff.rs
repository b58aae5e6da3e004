//! Cross-thread buffer handoff.
//!
//! A lane is a [`SharedQueue`] of [`Buffer`]s coupled to the `mio::Waker` of
//! the reactor that consumes it. Sending enqueues and then raises the wake,
//! so the consumer is woken only after the buffer is visible in the queue.
//!
//! The waker coalesces: any number of wakes raised before the consumer polls
//! produce at least one wake event, and a wake raised after the consumer
//! polled produces another. Nothing is lost as long as the consumer drains
//! the lane to empty every time it sees the wake token.

use crate::runtime::buffer::Buffer;
use crate::runtime::queue::SharedQueue;
use mio::Waker;
use std::io;
use std::sync::Arc;

/// Create a lane whose sends wake the reactor owning `waker`.
pub fn lane(waker: Arc<Waker>) -> (LaneSender, LaneReceiver) {
    let queue = Arc::new(SharedQueue::new());
    let sender = LaneSender {
        queue: Arc::clone(&queue),
        waker: Arc::clone(&waker),
    };
    (sender, LaneReceiver { queue, _waker: waker })
}

/// Producer half of a lane.
pub struct LaneSender {
    queue: Arc<SharedQueue<Buffer>>,
    waker: Arc<Waker>,
}

impl LaneSender {
    /// Hand `buffer` to the consumer and wake it.
    ///
    /// An error means the OS wake primitive failed; the buffer is already
    /// queued but the consumer may never learn about it.
    pub fn send(&self, buffer: Buffer) -> io::Result<()> {
        self.queue.enqueue(buffer);
        self.waker.wake()
    }
}

/// Consumer half of a lane.
pub struct LaneReceiver {
    queue: Arc<SharedQueue<Buffer>>,
    // Dropping the last waker closes its fd and discards a wake that has not
    // been polled yet, so the receiving side holds one too.
    _waker: Arc<Waker>,
}

impl LaneReceiver {
    /// Iterate until the lane is observed empty.
    ///
    /// Buffers sent while draining are picked up by the same drain. The
    /// iterator does not borrow the receiver, so the owning reactor stays
    /// free to handle each buffer mutably.
    pub fn drain(&self) -> Drain {
        Drain {
            queue: Arc::clone(&self.queue),
        }
    }

    /// Number of buffers waiting.
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Iterator returned by [`LaneReceiver::drain`].
pub struct Drain {
    queue: Arc<SharedQueue<Buffer>>,
}

impl Iterator for Drain {
    type Item = Buffer;

    fn next(&mut self) -> Option<Buffer> {
        self.queue.dequeue()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::token::{ConnId, WAKE_TOKEN};
    use mio::{Events, Poll};
    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;

    fn tagged(generation: u64) -> Buffer {
        Buffer::copy_from(
            ConnId {
                slot: 0,
                generation,
            },
            &generation.to_le_bytes(),
        )
    }

    fn wake_seen(poll: &mut Poll, events: &mut Events, timeout: Duration) -> bool {
        poll.poll(events, Some(timeout)).unwrap();
        events.iter().any(|event| event.token() == WAKE_TOKEN)
    }

    #[test]
    fn test_send_then_drain_in_order() {
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN).unwrap());
        let (tx, rx) = lane(waker);

        for generation in 0..5 {
            tx.send(tagged(generation)).unwrap();
        }
        assert_eq!(rx.len(), 5);

        let order: Vec<u64> = rx.drain().map(|buf| buf.conn().generation).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert_eq!(rx.len(), 0);
        assert!(rx.drain().next().is_none());
    }

    #[test]
    fn test_wakes_coalesce_without_loss() {
        let mut poll = Poll::new().unwrap();
        let mut events = Events::with_capacity(16);
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN).unwrap());
        let (tx, rx) = lane(waker);

        // Many sends before the consumer polls.
        for generation in 0..32 {
            tx.send(tagged(generation)).unwrap();
        }
        assert!(wake_seen(&mut poll, &mut events, Duration::from_secs(5)));
        assert_eq!(rx.drain().count(), 32);

        // A send after the previous wake was consumed wakes again.
        tx.send(tagged(32)).unwrap();
        assert!(wake_seen(&mut poll, &mut events, Duration::from_secs(5)));
        assert_eq!(rx.drain().count(), 1);
    }

    #[test]
    fn test_wake_survives_sender_drop() {
        let mut poll = Poll::new().unwrap();
        let mut events = Events::with_capacity(16);
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN).unwrap());
        let (tx, rx) = lane(waker);

        // The sender goes away before the consumer has polled.
        thread::spawn(move || tx.send(tagged(7)).unwrap())
            .join()
            .unwrap();

        assert!(wake_seen(&mut poll, &mut events, Duration::from_secs(5)));
        let generations: Vec<u64> = rx.drain().map(|buf| buf.conn().generation).collect();
        assert_eq!(generations, vec![7]);
    }

    #[test]
    fn test_concurrent_sends_observed_exactly_once() {
        const COUNT: u64 = 5_000;

        let mut poll = Poll::new().unwrap();
        let mut events = Events::with_capacity(64);
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN).unwrap());
        let (tx, rx) = lane(waker);

        let producer = thread::spawn(move || {
            for generation in 0..COUNT {
                tx.send(tagged(generation)).unwrap();
            }
        });

        // Consume the way the reactors do: wait for the wake, drain to empty.
        let mut seen = HashSet::new();
        let mut last = None;
        while (seen.len() as u64) < COUNT {
            assert!(
                wake_seen(&mut poll, &mut events, Duration::from_secs(10)),
                "wake lost with {} of {} buffers seen",
                seen.len(),
                COUNT
            );
            for buf in rx.drain() {
                let generation = buf.conn().generation;
                assert!(seen.insert(generation), "duplicate buffer {generation}");
                if let Some(prev) = last {
                    assert!(generation > prev, "buffer {generation} out of order");
                }
                last = Some(generation);
            }
        }
        producer.join().unwrap();

        assert_eq!(seen.len() as u64, COUNT);
        assert_eq!(rx.len(), 0);
    }
}
