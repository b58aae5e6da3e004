//! Owned chunk of bytes travelling between the reactors.
//!
//! A `Buffer` is deliberately neither `Clone` nor `Copy`: handing it to a
//! queue moves it, so the previous owner cannot touch it again. It is
//! released by dropping it.

use crate::runtime::token::ConnId;
use bytes::BytesMut;

/// One chunk read from a connection, tagged with where it came from.
#[derive(Debug)]
pub struct Buffer {
    payload: BytesMut,
    conn: ConnId,
}

impl Buffer {
    /// Copy `data` into a new buffer owned by connection `conn`.
    pub fn copy_from(conn: ConnId, data: &[u8]) -> Self {
        Self {
            payload: BytesMut::from(data),
            conn,
        }
    }

    /// Connection the payload was read from and must be written back to.
    pub fn conn(&self) -> ConnId {
        self.conn
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Mutable payload bytes, used by the worker to transform in place.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }
}
