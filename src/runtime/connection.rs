//! Connection state machine for the network reactor.
//!
//! Each connection tracks whether the peer may still send, how many of its
//! buffers are on the other side of the handoff, and the transformed buffers
//! waiting to be written back.

use crate::runtime::buffer::Buffer;
use crate::runtime::token::ConnId;
use mio::net::TcpStream;
use mio::Interest;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::net::SocketAddr;
use tracing::{trace, warn};

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Peer may send more data.
    Open,
    /// Peer closed its side; waiting for in-flight buffers to be written.
    Draining,
}

/// Result of flushing the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Everything queued has been written or discarded.
    Idle,
    /// The socket is full; resume on the next writable event.
    Blocked,
}

/// A single client connection owned by the network reactor.
pub struct Connection {
    pub id: ConnId,
    pub peer: SocketAddr,
    pub stream: TcpStream,
    pub state: ConnState,
    /// Buffers read from this connection that have not yet been written back
    /// or discarded.
    in_flight: usize,
    /// Transformed buffers waiting for the socket, oldest first.
    outbox: VecDeque<Buffer>,
    /// Bytes of the front outbox buffer already written.
    written: usize,
    /// Whether the last flush stopped on `WouldBlock`.
    blocked: bool,
    /// Interest currently registered with the poll, if any.
    registered: Option<Interest>,
}

impl Connection {
    /// Create a connection in the open state. It is not yet registered.
    pub fn new(id: ConnId, peer: SocketAddr, stream: TcpStream) -> Self {
        Self {
            id,
            peer,
            stream,
            state: ConnState::Open,
            in_flight: 0,
            outbox: VecDeque::new(),
            written: 0,
            blocked: false,
            registered: None,
        }
    }

    /// Record a buffer handed to the worker.
    pub fn dispatched(&mut self) {
        self.in_flight += 1;
    }

    /// Number of buffers not yet written back.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Peer closed its side.
    pub fn start_draining(&mut self) {
        self.state = ConnState::Draining;
    }

    /// Nothing left to do: peer is gone and every buffer has come back.
    pub fn is_finished(&self) -> bool {
        self.state == ConnState::Draining && self.in_flight == 0
    }

    /// Queue a transformed buffer for writing.
    pub fn push_outbound(&mut self, buffer: Buffer) {
        self.outbox.push_back(buffer);
    }

    /// Write queued buffers until the outbox empties or the socket is full.
    ///
    /// A write error discards the buffer being written and moves on to the
    /// next; the connection stays up until its read side says otherwise.
    pub fn flush(&mut self) -> FlushOutcome {
        self.blocked = false;
        while let Some(front) = self.outbox.front() {
            let remaining = &front.payload()[self.written..];
            if remaining.is_empty() {
                self.complete_front();
                continue;
            }
            match self.stream.write(remaining) {
                Ok(0) => {
                    warn!(conn_id = self.id.slot, peer = %self.peer, "Write returned zero, discarding buffer");
                    self.complete_front();
                }
                Ok(n) => {
                    self.written += n;
                    trace!(conn_id = self.id.slot, bytes = n, "Wrote");
                    if self.written == front.len() {
                        self.complete_front();
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.blocked = true;
                    return FlushOutcome::Blocked;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(conn_id = self.id.slot, peer = %self.peer, error = %e, "Write failed, discarding buffer");
                    self.complete_front();
                }
            }
        }
        FlushOutcome::Idle
    }

    /// Interest this connection needs given its state.
    pub fn wanted_interest(&self) -> Option<Interest> {
        match (self.state, self.blocked) {
            (ConnState::Open, false) => Some(Interest::READABLE),
            (ConnState::Open, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (ConnState::Draining, true) => Some(Interest::WRITABLE),
            (ConnState::Draining, false) => None,
        }
    }

    /// Bring the poll registration in line with [`Self::wanted_interest`].
    pub fn sync_interest(&mut self, registry: &mio::Registry) -> io::Result<()> {
        let wanted = self.wanted_interest();
        if wanted == self.registered {
            return Ok(());
        }
        let token = self.id.token();
        match (self.registered, wanted) {
            (None, Some(interest)) => registry.register(&mut self.stream, token, interest)?,
            (Some(_), Some(interest)) => registry.reregister(&mut self.stream, token, interest)?,
            (Some(_), None) => registry.deregister(&mut self.stream)?,
            (None, None) => {}
        }
        self.registered = wanted;
        Ok(())
    }

    /// Remove the stream from the poll if it is registered.
    pub fn deregister(&mut self, registry: &mio::Registry) {
        if self.registered.take().is_some() {
            let _ = registry.deregister(&mut self.stream);
        }
    }

    fn complete_front(&mut self) {
        // Dropping the buffer releases it.
        self.outbox.pop_front();
        self.written = 0;
        self.in_flight -= 1;
    }
}
