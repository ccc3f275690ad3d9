//! Encoder-side protocol abstraction and the optional upgrade handshake.
//!
//! A protocol turns structural write calls into encoded bytes. The write
//! surface mirrors the decoder event stream one-to-one so a filter can
//! re-encode a message by forwarding each decoded event.
//!
//! Protocols that support an upgraded encoding negotiate it once per fresh
//! connection via [`Protocol::attempt_upgrade`] /
//! [`Protocol::complete_upgrade`]; the completion memo is persisted on the
//! pooled connection's [`ConnectionStateSlot`] so subsequent tenants skip
//! the handshake.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use super::{
    transport::{Transport, TransportType},
    FieldType, MessageMetadata,
};
use crate::upstream::ConnectionStateSlot;

/// Configurable protocol kinds. See [`TransportType`] for `Auto` semantics.
///
/// [`TransportType`]: super::transport::TransportType
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolType {
    Binary,
    Compact,
    #[default]
    Auto,
}

/// An incrementally parsed Thrift object fed from raw upstream bytes.
///
/// Used for upgrade-handshake responses, which arrive before the router
/// hands response ownership to the downstream decoder.
pub trait ThriftObject {
    /// Consumes bytes from `buffer`. Returns `true` once the object is
    /// complete; remaining bytes are left in the buffer.
    fn on_data(&mut self, buffer: &mut BytesMut) -> bool;
}

/// Encoder-side protocol.
pub trait Protocol {
    fn name(&self) -> &'static str;

    fn protocol_type(&self) -> ProtocolType;

    fn write_message_begin(&mut self, buffer: &mut BytesMut, metadata: &MessageMetadata);
    fn write_message_end(&mut self, buffer: &mut BytesMut);
    fn write_struct_begin(&mut self, buffer: &mut BytesMut, name: &str);
    fn write_struct_end(&mut self, buffer: &mut BytesMut);
    fn write_field_begin(
        &mut self,
        buffer: &mut BytesMut,
        name: &str,
        field_type: FieldType,
        field_id: i16,
    );
    fn write_field_end(&mut self, buffer: &mut BytesMut);
    fn write_map_begin(
        &mut self,
        buffer: &mut BytesMut,
        key_type: FieldType,
        value_type: FieldType,
        size: u32,
    );
    fn write_map_end(&mut self, buffer: &mut BytesMut);
    fn write_list_begin(&mut self, buffer: &mut BytesMut, elem_type: FieldType, size: u32);
    fn write_list_end(&mut self, buffer: &mut BytesMut);
    fn write_set_begin(&mut self, buffer: &mut BytesMut, elem_type: FieldType, size: u32);
    fn write_set_end(&mut self, buffer: &mut BytesMut);
    fn write_bool(&mut self, buffer: &mut BytesMut, value: bool);
    fn write_byte(&mut self, buffer: &mut BytesMut, value: i8);
    fn write_i16(&mut self, buffer: &mut BytesMut, value: i16);
    fn write_i32(&mut self, buffer: &mut BytesMut, value: i32);
    fn write_i64(&mut self, buffer: &mut BytesMut, value: i64);
    fn write_double(&mut self, buffer: &mut BytesMut, value: f64);
    fn write_string(&mut self, buffer: &mut BytesMut, value: &str);

    /// Whether this protocol can negotiate an upgraded encoding on a fresh
    /// upstream connection.
    fn supports_upgrade(&self) -> bool {
        false
    }

    /// Starts an upgrade handshake on a freshly pooled connection.
    ///
    /// Returns `None` when the connection's sticky state shows the upgrade
    /// has already been settled (the caller proceeds directly to the
    /// request). Otherwise fills `buffer` with the upgrade-request bytes and
    /// returns the parser for the upgrade response.
    fn attempt_upgrade(
        &mut self,
        transport: &mut dyn Transport,
        conn_state: &mut ConnectionStateSlot,
        buffer: &mut BytesMut,
    ) -> Option<Box<dyn ThriftObject>> {
        let _ = (transport, conn_state, buffer);
        None
    }

    /// Persists the outcome of a completed upgrade handshake on the
    /// connection record.
    ///
    /// This is the only place connection-sticky upgrade state may be
    /// mutated.
    fn complete_upgrade(&mut self, conn_state: &mut ConnectionStateSlot, response: Box<dyn ThriftObject>) {
        let _ = (conn_state, response);
    }
}

/// Creates per-request encoder instances from resolved (non-`Auto`)
/// configured types.
pub trait CodecFactory {
    fn create_transport(&self, transport_type: TransportType) -> Box<dyn Transport>;
    fn create_protocol(&self, protocol_type: ProtocolType) -> Box<dyn Protocol>;
}
