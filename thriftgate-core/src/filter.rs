//! Decoder-filter surface.
//!
//! A decoder filter receives a downstream Thrift message as a SAX-style
//! stream of structural events and steers the decoder with its return
//! values: [`FilterStatus::Continue`] lets the decoder proceed to the next
//! event, [`FilterStatus::StopIteration`] suspends it until the filter calls
//! [`DecoderFilterCallbacks::continue_decoding`].
//!
//! Every event receives the per-stream filter context `CX` provided by the
//! dispatch loop. The context answers queries about the downstream side
//! (route, connection, negotiated codec types) and carries the response and
//! failure surfaces back to it.

use std::rc::Rc;

use bytes::BytesMut;

use crate::{
    connection::Connection,
    route::Route,
    thrift::{
        protocol::{Protocol, ProtocolType},
        transport::{Transport, TransportType},
        AppException, FieldType, MessageMetadata,
    },
};

/// Result of a single decoder filter callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    /// The decoder may proceed with the next event.
    Continue,
    /// The decoder must suspend until `continue_decoding` is signalled.
    StopIteration,
}

/// Result of feeding upstream response bytes to the downstream decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamResponseStatus {
    /// More data is needed before the reply is complete.
    MoreData,
    /// A full reply has been decoded and forwarded downstream.
    Complete,
    /// The downstream chain forced a reset; the upstream connection must
    /// not be reused.
    Reset,
}

/// Per-stream filter context, implemented by the dispatch loop.
pub trait DecoderFilterCallbacks {
    /// The downstream connection driving this stream. Resolvable from
    /// `transport_begin` until teardown.
    fn downstream_connection(&mut self) -> &mut dyn Connection;

    /// Route for the current message, if the route table has one.
    fn route(&self) -> Option<Rc<dyn Route>>;

    /// Transport type decoded on the downstream connection.
    fn downstream_transport_type(&self) -> TransportType;

    /// Protocol type decoded on the downstream connection.
    fn downstream_protocol_type(&self) -> ProtocolType;

    /// Sends a local error reply in place of an upstream response. The
    /// chain serializes it as an exception reply on the downstream
    /// transport.
    fn send_local_reply(&mut self, reply: AppException, end_stream: bool);

    /// Configures the downstream response decoder for an upstream reply
    /// encoded with the given transport and protocol. Called once per
    /// request, before the first `upstream_data`.
    fn start_upstream_response(&mut self, transport: &dyn Transport, protocol: &dyn Protocol);

    /// Feeds upstream response bytes to the downstream response decoder.
    fn upstream_data(&mut self, buffer: &mut BytesMut) -> UpstreamResponseStatus;

    /// Drops the downstream connection. Used when no reply channel exists
    /// or a partial response has already been forwarded.
    fn reset_downstream_connection(&mut self);

    /// Resumes a decoder previously suspended by `StopIteration`.
    fn continue_decoding(&mut self);
}

/// Lifecycle surface of a decoder filter, independent of the stream
/// context.
pub trait DecoderFilterBase {
    /// Tears down the filter. Any pending upstream acquisition is
    /// cancelled; a held upstream connection is closed, not released.
    fn on_destroy(&mut self);

    /// Closes the held upstream connection immediately. Used by the chain
    /// when it decides the response can no longer be delivered downstream.
    fn reset_upstream_connection(&mut self);
}

/// A decoder filter. The event surface mirrors the Thrift event stream
/// one-to-one.
pub trait DecoderFilter<CX>: DecoderFilterBase {
    fn transport_begin(&mut self, cx: &mut CX, metadata: Option<&MessageMetadata>) -> FilterStatus;
    fn transport_end(&mut self, cx: &mut CX) -> FilterStatus;
    fn message_begin(&mut self, cx: &mut CX, metadata: &MessageMetadata) -> FilterStatus;
    fn message_end(&mut self, cx: &mut CX) -> FilterStatus;
    fn struct_begin(&mut self, cx: &mut CX, name: &str) -> FilterStatus;
    fn struct_end(&mut self, cx: &mut CX) -> FilterStatus;
    fn field_begin(
        &mut self,
        cx: &mut CX,
        name: &str,
        field_type: FieldType,
        field_id: i16,
    ) -> FilterStatus;
    fn field_end(&mut self, cx: &mut CX) -> FilterStatus;
    fn map_begin(
        &mut self,
        cx: &mut CX,
        key_type: FieldType,
        value_type: FieldType,
        size: u32,
    ) -> FilterStatus;
    fn map_end(&mut self, cx: &mut CX) -> FilterStatus;
    fn list_begin(&mut self, cx: &mut CX, elem_type: FieldType, size: u32) -> FilterStatus;
    fn list_end(&mut self, cx: &mut CX) -> FilterStatus;
    fn set_begin(&mut self, cx: &mut CX, elem_type: FieldType, size: u32) -> FilterStatus;
    fn set_end(&mut self, cx: &mut CX) -> FilterStatus;
    fn bool_value(&mut self, cx: &mut CX, value: bool) -> FilterStatus;
    fn byte_value(&mut self, cx: &mut CX, value: i8) -> FilterStatus;
    fn int16_value(&mut self, cx: &mut CX, value: i16) -> FilterStatus;
    fn int32_value(&mut self, cx: &mut CX, value: i32) -> FilterStatus;
    fn int64_value(&mut self, cx: &mut CX, value: i64) -> FilterStatus;
    fn double_value(&mut self, cx: &mut CX, value: f64) -> FilterStatus;
    fn string_value(&mut self, cx: &mut CX, value: &str) -> FilterStatus;
}
