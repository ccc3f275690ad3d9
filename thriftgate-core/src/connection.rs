//! Minimal network-connection surface shared by the downstream and upstream
//! sides of a filter.
//!
//! The router never performs I/O itself: writes are buffered by the owning
//! connection and failures surface later as [`ConnectionEvent`]s, so `write`
//! is infallible at this seam.

use bytes::Bytes;

/// How a connection should be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionCloseType {
    /// Close immediately, discarding any pending write data.
    NoFlush,
    /// Flush pending write data before closing.
    FlushWrite,
}

/// Connection lifecycle events delivered to the read-side owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    Connected,
    RemoteClose,
    LocalClose,
}

/// A raw L4 connection.
pub trait Connection {
    /// Queues `data` for delivery to the peer.
    fn write(&mut self, data: Bytes, end_stream: bool);

    /// Closes the connection.
    fn close(&mut self, close_type: ConnectionCloseType);
}
