//! Poll token layout and connection identity.
//!
//! Connection slab slots map directly onto `mio::Token` values. The two
//! highest token values are reserved for the listener and the cross-thread
//! wake signal, so slab keys never collide with them in practice.

use mio::Token;

/// Token for the listening socket.
pub const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Token raised by the `mio::Waker` of each reactor.
pub const WAKE_TOKEN: Token = Token(usize::MAX - 1);

/// Identity of the connection a buffer was read from.
///
/// Slab slots are reused after a connection closes, so the slot alone is
/// not enough to route a buffer that comes back from the worker. The
/// generation is unique per accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId {
    /// Slot in the connection slab (also the poll token).
    pub slot: usize,
    /// Accept sequence number.
    pub generation: u64,
}

impl ConnId {
    /// Poll token for this connection's stream.
    pub fn token(&self) -> Token {
        Token(self.slot)
    }
}

/// Hands out increasing generation numbers for accepted connections.
#[derive(Debug, Default)]
pub struct GenerationCounter {
    next: u64,
}

impl GenerationCounter {
    /// Create a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the identity for a connection stored at `slot`.
    pub fn issue(&mut self, slot: usize) -> ConnId {
        let generation = self.next;
        self.next += 1;
        ConnId { slot, generation }
    }
}
