//! Network reactor.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking accept/read/write syscalls. Uses epoll on Linux,
//! kqueue on macOS.
//!
//! Every chunk read from a connection is copied into a [`Buffer`] and sent
//! to the worker on the pending lane. Transformed buffers come back on the
//! completed lane; the wake token tells us to drain it and write each
//! buffer to the connection it was read from.
//!
//! ## Closing
//!
//! When a peer closes its side while some of its buffers are still with the
//! worker, the connection stops reading but stays alive until those buffers
//! have been written back. A read error closes the connection at once, and
//! buffers that return for it afterwards are dropped.

use crate::runtime::buffer::Buffer;
use crate::runtime::connection::{ConnState, Connection, FlushOutcome};
use crate::runtime::handoff::{LaneReceiver, LaneSender};
use crate::runtime::token::{GenerationCounter, LISTENER_TOKEN, WAKE_TOKEN};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Reactor that owns the listener and every client connection.
pub struct NetworkReactor {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: Slab<Connection>,
    generations: GenerationCounter,
    pending: LaneSender,
    completed: LaneReceiver,
    /// Scratch space for reads; each chunk is copied out into its own buffer.
    read_buf: Vec<u8>,
    /// Readiness copied out of `events` each turn: (token, readable, writable).
    ready: Vec<(Token, bool, bool)>,
}

impl NetworkReactor {
    /// `poll` must be the poll the completed lane's waker was created on.
    pub fn new(
        poll: Poll,
        listener: std::net::TcpListener,
        pending: LaneSender,
        completed: LaneReceiver,
        chunk_size: usize,
        event_capacity: usize,
    ) -> io::Result<Self> {
        let mut listener = TcpListener::from_std(listener);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(event_capacity),
            listener,
            connections: Slab::new(),
            generations: GenerationCounter::new(),
            pending,
            completed,
            read_buf: vec![0u8; chunk_size],
            ready: Vec::with_capacity(event_capacity),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run forever. Returns only on a fatal error: a failed poll, a failed
    /// accept, or a failed wake of the worker.
    pub fn run(mut self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "Network reactor started");
        loop {
            self.turn(None)?;
        }
    }

    /// Wait for readiness once and dispatch every event.
    fn turn(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        // Copy readiness out so handlers can borrow the reactor mutably.
        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();
        ready.extend(
            self.events
                .iter()
                .map(|event| (event.token(), event.is_readable(), event.is_writable())),
        );

        for &(token, readable, writable) in &ready {
            match token {
                LISTENER_TOKEN => self.accept_connections()?,
                WAKE_TOKEN => self.flush_completed(),
                Token(slot) => self.handle_connection_event(slot, readable, writable)?,
            }
        }

        self.ready = ready;
        Ok(())
    }

    fn accept_connections(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }

                    let entry = self.connections.vacant_entry();
                    let id = self.generations.issue(entry.key());
                    let conn = entry.insert(Connection::new(id, peer, stream));
                    conn.sync_interest(self.poll.registry())?;

                    debug!(conn_id = id.slot, generation = id.generation, peer = %peer, "Accepted connection");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    return Err(e);
                }
            }
        }
    }

    fn handle_connection_event(
        &mut self,
        slot: usize,
        readable: bool,
        writable: bool,
    ) -> io::Result<()> {
        trace!(conn_id = slot, readable, writable, "Socket event");

        if readable {
            self.handle_readable(slot)?;
        }

        // The read may have closed the connection.
        if writable && self.connections.contains(slot) {
            self.flush_connection(slot);
        }

        Ok(())
    }

    /// Read until `WouldBlock`, handing each chunk to the worker.
    ///
    /// Connection failures are handled here; the only error returned is a
    /// failed wake of the worker, which is fatal.
    fn handle_readable(&mut self, slot: usize) -> io::Result<()> {
        loop {
            let Some(conn) = self.connections.get_mut(slot) else {
                return Ok(());
            };
            if conn.state != ConnState::Open {
                return Ok(());
            }

            match conn.stream.read(&mut self.read_buf) {
                Ok(0) => {
                    self.peer_closed(slot);
                    return Ok(());
                }
                Ok(n) => {
                    let buffer = Buffer::copy_from(conn.id, &self.read_buf[..n]);
                    conn.dispatched();
                    trace!(conn_id = slot, bytes = n, "Read chunk");
                    self.pending.send(buffer)?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(conn_id = slot, peer = %conn.peer, error = %e, "Read failed");
                    self.close_connection(slot);
                    return Ok(());
                }
            }
        }
    }

    /// Orderly close from the peer: stop reading, finish pending writes.
    fn peer_closed(&mut self, slot: usize) {
        let Some(conn) = self.connections.get_mut(slot) else {
            return;
        };
        conn.start_draining();

        if conn.is_finished() {
            self.close_connection(slot);
            return;
        }

        debug!(conn_id = slot, in_flight = conn.in_flight(), "Peer closed, draining");
        self.refresh_interest(slot);
    }

    /// Drain the completed lane and write each buffer back.
    fn flush_completed(&mut self) {
        for buffer in self.completed.drain() {
            self.deliver(buffer);
        }
    }

    fn deliver(&mut self, buffer: Buffer) {
        let id = buffer.conn();
        match self.connections.get_mut(id.slot) {
            Some(conn) if conn.id == id => {
                conn.push_outbound(buffer);
                self.flush_connection(id.slot);
            }
            _ => {
                debug!(
                    conn_id = id.slot,
                    generation = id.generation,
                    bytes = buffer.len(),
                    "Dropping buffer for closed connection"
                );
            }
        }
    }

    fn flush_connection(&mut self, slot: usize) {
        let Some(conn) = self.connections.get_mut(slot) else {
            return;
        };
        if conn.flush() == FlushOutcome::Blocked {
            trace!(conn_id = slot, "Socket full, waiting for writable");
        }

        if conn.is_finished() {
            self.close_connection(slot);
        } else {
            self.refresh_interest(slot);
        }
    }

    /// Update the poll registration; a failure closes the connection.
    fn refresh_interest(&mut self, slot: usize) {
        let Some(conn) = self.connections.get_mut(slot) else {
            return;
        };
        if let Err(e) = conn.sync_interest(self.poll.registry()) {
            warn!(conn_id = slot, error = %e, "Failed to update registration");
            self.close_connection(slot);
        }
    }

    fn close_connection(&mut self, slot: usize) {
        if let Some(mut conn) = self.connections.try_remove(slot) {
            conn.deregister(self.poll.registry());
            debug!(
                conn_id = slot,
                generation = conn.id.generation,
                peer = %conn.peer,
                dropped = conn.in_flight(),
                "Connection closed"
            );
        }
    }

    #[cfg(test)]
    fn connection_count(&self) -> usize {
        self.connections.len()
    }

    #[cfg(test)]
    fn connection_id(&self, slot: usize) -> Option<crate::runtime::token::ConnId> {
        self.connections.get(slot).map(|conn| conn.id)
    }
}

/// Create the non-blocking listening socket.
pub fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
