//! Upstream side of an in-flight routed request.
//!
//! [`UpstreamRequest`] owns everything tied to one upstream interaction:
//! the buffered message metadata, the encoder transport/protocol instances,
//! the encoder buffer, and a tagged state holding whatever resource is
//! currently alive (a pending pool acquisition, an upgrade handshake, or
//! the checked-out connection). Keeping the connection inside the state
//! variants means release and close each consume it, so neither can happen
//! twice.

use std::mem;

use bytes::BytesMut;
use thriftgate_core::{
    connection::ConnectionCloseType,
    filter::{DecoderFilterCallbacks, UpstreamResponseStatus},
    thrift::{
        protocol::{Protocol, ThriftObject},
        transport::Transport,
        MessageMetadata,
    },
    upstream::{CancelHandle, ConnectionData},
};

/// When the upstream connection goes back to the pool.
///
/// Chosen once at `message_begin` from the message type, so the release
/// point is decided in exactly one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseAt {
    /// Right after the request frame is written (one-way messages).
    AfterWrite,
    /// After a complete reply has been parsed (two-way calls).
    AfterResponse,
}

pub(crate) enum UpstreamState {
    /// Route and cluster resolved, no pool interaction yet.
    Idle,
    PoolPending {
        cancel: Box<dyn CancelHandle>,
    },
    Upgrading {
        conn: Box<dyn ConnectionData>,
        parser: Box<dyn ThriftObject>,
    },
    Connected {
        conn: Box<dyn ConnectionData>,
    },
    AwaitingResponse {
        conn: Box<dyn ConnectionData>,
        response: ResponseCoordinator,
    },
    Released,
    Closed,
}

pub(crate) struct UpstreamRequest {
    pub cluster: String,
    pub metadata: MessageMetadata,
    pub transport: Box<dyn Transport>,
    pub protocol: Box<dyn Protocol>,
    /// Encoder buffer; flushed to the socket once per message.
    pub buffer: BytesMut,
    pub state: UpstreamState,
    pub release_at: ReleaseAt,
}

impl UpstreamRequest {
    pub fn new(
        cluster: String,
        metadata: MessageMetadata,
        transport: Box<dyn Transport>,
        protocol: Box<dyn Protocol>,
        release_at: ReleaseAt,
    ) -> Self {
        UpstreamRequest {
            cluster,
            metadata,
            transport,
            protocol,
            buffer: BytesMut::new(),
            state: UpstreamState::Idle,
            release_at,
        }
    }

    pub fn holds_connection(&self) -> bool {
        matches!(
            self.state,
            UpstreamState::Upgrading { .. }
                | UpstreamState::Connected { .. }
                | UpstreamState::AwaitingResponse { .. }
        )
    }

    pub fn write_message_begin(&mut self) {
        self.protocol.write_message_begin(&mut self.buffer, &self.metadata);
    }

    /// Finishes the encoded message, wraps it in a transport frame and
    /// writes the frame to the upstream connection.
    pub fn send_request_frame(&mut self) {
        self.protocol.write_message_end(&mut self.buffer);
        let message = mem::take(&mut self.buffer);
        let mut frame = BytesMut::with_capacity(message.len());
        self.transport.encode_frame(&mut frame, &self.metadata, message);
        if let UpstreamState::Connected { conn } = &mut self.state {
            conn.connection().write(frame.freeze(), false);
        }
    }

    /// Switches a connected request to response ownership.
    pub fn begin_response(&mut self) {
        self.state = match mem::replace(&mut self.state, UpstreamState::Idle) {
            UpstreamState::Connected { conn } => UpstreamState::AwaitingResponse {
                conn,
                response: ResponseCoordinator::new(),
            },
            other => other,
        };
    }

    /// Returns the held connection to the pool.
    pub fn release_connection(&mut self) {
        self.state = match mem::replace(&mut self.state, UpstreamState::Released) {
            UpstreamState::Connected { conn }
            | UpstreamState::AwaitingResponse { conn, .. } => {
                conn.release();
                UpstreamState::Released
            }
            other => other,
        };
    }

    /// Closes the held connection without returning it to the pool.
    pub fn close_connection(&mut self) {
        self.state = match mem::replace(&mut self.state, UpstreamState::Closed) {
            UpstreamState::Upgrading { mut conn, .. }
            | UpstreamState::Connected { mut conn }
            | UpstreamState::AwaitingResponse { mut conn, .. } => {
                conn.connection().close(ConnectionCloseType::NoFlush);
                UpstreamState::Closed
            }
            other => other,
        };
    }

    /// Destroy-time teardown: cancels a pending acquisition, closes a held
    /// connection without flush. Nothing is ever released here; a tenant
    /// torn down mid-request cannot vouch for the connection.
    pub fn teardown(&mut self) {
        self.state = match mem::replace(&mut self.state, UpstreamState::Closed) {
            UpstreamState::PoolPending { cancel } => {
                cancel.cancel();
                UpstreamState::Closed
            }
            UpstreamState::Upgrading { mut conn, .. }
            | UpstreamState::Connected { mut conn }
            | UpstreamState::AwaitingResponse { mut conn, .. } => {
                conn.connection().close(ConnectionCloseType::NoFlush);
                UpstreamState::Closed
            }
            other => other,
        };
    }
}

/// What an upstream data event did to the in-flight response.
pub(crate) enum ResponseOutcome {
    Incomplete,
    Complete,
    /// End of stream arrived before a full reply was parsed. Partial
    /// response bytes may already have reached the client, so the only safe
    /// signal is dropping the downstream connection.
    Truncated,
    /// The downstream chain forced a reset mid-response.
    Reset,
}

/// Feeds upstream bytes into the downstream response decoder until a
/// complete reply has been parsed.
pub(crate) struct ResponseCoordinator {
    started: bool,
}

impl ResponseCoordinator {
    pub fn new() -> Self {
        ResponseCoordinator { started: false }
    }

    pub fn on_data<CX: DecoderFilterCallbacks>(
        &mut self,
        cx: &mut CX,
        transport: &dyn Transport,
        protocol: &dyn Protocol,
        buffer: &mut BytesMut,
        end_stream: bool,
    ) -> ResponseOutcome {
        if !self.started {
            cx.start_upstream_response(transport, protocol);
            self.started = true;
        }
        match cx.upstream_data(buffer) {
            UpstreamResponseStatus::Complete => ResponseOutcome::Complete,
            UpstreamResponseStatus::Reset => ResponseOutcome::Reset,
            UpstreamResponseStatus::MoreData if end_stream => ResponseOutcome::Truncated,
            UpstreamResponseStatus::MoreData => ResponseOutcome::Incomplete,
        }
    }
}
