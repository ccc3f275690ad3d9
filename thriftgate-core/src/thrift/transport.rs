//! Encoder-side transport abstraction.
//!
//! A transport wraps a fully encoded Thrift message in a transport frame
//! (length prefix, header block, or nothing at all for unframed transports).
//! Concrete codecs live outside this crate; the router only drives the
//! framing step once per request.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use super::MessageMetadata;

/// Configurable transport kinds.
///
/// `Auto` defers the choice: on the downstream side it means
/// "sniff the wire", and in upstream cluster configuration it means
/// "inherit whatever the downstream connection decoded".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Framed,
    Unframed,
    Header,
    #[default]
    Auto,
}

/// Encoder-side transport.
pub trait Transport {
    fn name(&self) -> &'static str;

    fn transport_type(&self) -> TransportType;

    /// Wraps `message` in a transport frame appended to `buffer`.
    ///
    /// Called exactly once per request, after `write_message_end`.
    fn encode_frame(&mut self, buffer: &mut BytesMut, metadata: &MessageMetadata, message: BytesMut);
}
