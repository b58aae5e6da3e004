//! Worker reactor.
//!
//! Owns its own `mio::Poll` with nothing registered but the wake token.
//! Every wake drains the pending lane to empty, reverses each buffer in
//! place and sends it on the completed lane, which wakes the network
//! reactor.

use crate::runtime::buffer::Buffer;
use crate::runtime::handoff::{LaneReceiver, LaneSender};
use crate::runtime::token::WAKE_TOKEN;
use mio::{Events, Poll};
use std::io;
use tracing::{info, trace};

/// Reverse the payload in place.
///
/// Total over every length: empty payloads are untouched and the middle
/// byte of an odd-length payload stays where it is.
pub fn transform(buffer: &mut Buffer) {
    buffer.payload_mut().reverse();
}

/// Reactor that transforms buffers handed over by the network reactor.
pub struct WorkerReactor {
    poll: Poll,
    events: Events,
    pending: LaneReceiver,
    completed: LaneSender,
}

impl WorkerReactor {
    /// `poll` must be the poll the pending lane's waker was created on.
    pub fn new(
        poll: Poll,
        pending: LaneReceiver,
        completed: LaneSender,
        event_capacity: usize,
    ) -> Self {
        Self {
            poll,
            events: Events::with_capacity(event_capacity),
            pending,
            completed,
        }
    }

    /// Run forever. Returns only if polling or waking the network reactor
    /// fails.
    pub fn run(mut self) -> io::Result<()> {
        info!("Worker reactor started");
        loop {
            self.poll_once(None)?;
        }
    }

    /// Wait for one readiness cycle and drain if woken.
    ///
    /// Returns the number of buffers processed.
    pub fn poll_once(&mut self, timeout: Option<std::time::Duration>) -> io::Result<usize> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e),
        }

        let woken = self.events.iter().any(|event| event.token() == WAKE_TOKEN);
        if woken {
            trace!(backlog = self.pending.len(), "Worker woken");
            self.drain_pending()
        } else {
            Ok(0)
        }
    }

    /// Transform everything currently pending, including buffers that
    /// arrive while draining.
    pub fn drain_pending(&mut self) -> io::Result<usize> {
        let mut processed = 0;
        for mut buffer in self.pending.drain() {
            trace!(
                conn_id = buffer.conn().slot,
                bytes = buffer.len(),
                "Transforming buffer"
            );
            transform(&mut buffer);
            self.completed.send(buffer)?;
            processed += 1;
        }
        Ok(processed)
    }
}
