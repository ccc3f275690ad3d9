//! Core Thrift message model.
//!
//! This module defines the types shared between the decoder-filter surface
//! and the upstream encoder contract: message envelopes, wire-level field
//! types, and the Thrift application exception returned in place of a normal
//! reply when a request cannot be forwarded.
//!
//! # Key Components
//!
//! - [`MessageMetadata`]: envelope of a single decoded Thrift message.
//! - [`MessageType`] / [`FieldType`]: wire-level enumerations.
//! - [`AppException`]: Thrift-level application error.

pub mod protocol;
pub mod transport;

/// Thrift message envelope kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// A request that expects a `Reply`.
    Call,
    /// A response to a `Call`.
    Reply,
    /// A request that expects no response.
    Oneway,
    /// A server-produced error reply.
    Exception,
}

/// Wire-level Thrift field types.
///
/// `Stop` is the sentinel (field id 0) marking the end of a struct on the
/// wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Stop,
    Bool,
    Byte,
    Double,
    I16,
    I32,
    I64,
    String,
    Struct,
    Map,
    Set,
    List,
}

/// Envelope of a single Thrift message.
///
/// Immutable from the router's perspective once decoded; the router clones
/// it into the upstream request so it can be re-emitted after asynchronous
/// pool acquisition or an upgrade handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMetadata {
    /// Method name, never empty for a decoded message.
    pub method_name: String,
    pub message_type: MessageType,
    pub sequence_id: i32,
}

impl MessageMetadata {
    pub fn new(method_name: impl Into<String>, message_type: MessageType, sequence_id: i32) -> Self {
        MessageMetadata {
            method_name: method_name.into(),
            message_type,
            sequence_id,
        }
    }
}

/// Numeric exception codes defined by the Thrift application-level wire
/// contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum AppExceptionType {
    Unknown = 0,
    UnknownMethod = 1,
    InvalidMessageType = 2,
    WrongMethodName = 3,
    BadSequenceId = 4,
    MissingResult = 5,
    InternalError = 6,
    ProtocolError = 7,
    InvalidTransform = 8,
    InvalidProtocol = 9,
    UnsupportedClientType = 10,
}

/// A Thrift-level error returned in place of a normal `Reply`.
///
/// The surrounding filter chain serializes it as an exception reply on the
/// downstream transport; the `message` text is what the client sees.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AppException {
    pub kind: AppExceptionType,
    pub message: String,
}

impl AppException {
    pub fn new(kind: AppExceptionType, message: impl Into<String>) -> Self {
        AppException {
            kind,
            message: message.into(),
        }
    }
}
