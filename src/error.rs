//! # Error Types
//!
//! Error handling for the mux transport, message envelopes and property replication.
//!
//! Every fallible operation in this crate returns [`Result`], whose error type is
//! [`ProtocolError`]. Variants fall into three classes (see [`ErrorClass`]):
//!
//! - **Validation**: untrusted input failed to parse. Fatal to the originating
//!   connection, never to the process.
//! - **Anomaly**: the peer did something unexpected but harmless. Logged, the
//!   connection continues.
//! - **Fatal**: I/O, configuration and service lifecycle failures.
//!
//! ## Example Usage
//! ```rust
//! use mmo_netcore::core::envelope::Envelope;
//! use mmo_netcore::error::{ErrorClass, ProtocolError};
//!
//! let truncated = [0x07, 0x03, 0x01];
//! match Envelope::from_bytes(&truncated) {
//!     Err(e) => assert_eq!(e.class(), ErrorClass::Validation),
//!     Ok(_) => unreachable!(),
//! }
//! assert!(matches!(Envelope::from_bytes(&truncated), Err(ProtocolError::TruncatedInput)));
//! ```

use crate::protocol::message::ProtocolContext;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Packet validation errors
    pub const ERR_NON_DATA_MESSAGES: &str = "Only Data mux packets may carry messages";
    pub const ERR_BODY_NOT_CONSUMED: &str = "Mux packet body has trailing bytes";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";

    /// Property errors
    pub const ERR_ENUM_INDEX_RANGE: &str = "Property enum index does not fit in 11 bits";
    pub const ERR_PARAM_BIT_WIDTH: &str = "Property param bit width exceeds 53 bits";
    pub const ERR_PARAM_VALUE_RANGE: &str = "Property param value does not fit in its bit width";
    pub const ERR_DUPLICATE_PROPERTY: &str = "Property collection repeats a key";
    pub const ERR_STRING_UTF8: &str = "Replicated string is not valid UTF-8";

    /// Service errors
    pub const ERR_SERVICE_REGISTERED: &str = "Service type is already registered";
    pub const ERR_SERVICE_MISSING: &str = "No service is registered for this server type";
}

/// Coarse classification used to decide how a failure is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Untrusted input failed validation; disconnect the peer
    Validation,
    /// Unexpected but recoverable peer behavior; log and continue
    Anomaly,
    /// I/O, configuration or lifecycle failure
    Fatal,
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Input ended before the value was complete")]
    TruncatedInput,

    #[error("Malformed varint")]
    MalformedVarint,

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Invalid mux command: 0x{0:02X}")]
    InvalidMuxCommand(u8),

    #[error("Invalid packet: {0}")]
    InvalidPacket(&'static str),

    #[error("Unknown message {id} for protocol {protocol:?}")]
    UnknownMessage { protocol: ProtocolContext, id: u32 },

    #[error("Message decode failed: {0}")]
    DecodeFailed(String),

    #[error("Message encode failed: {0}")]
    EncodeFailed(String),

    #[error("Message has no protocol context")]
    MissingProtocol,

    #[error("Property out of range: {0}")]
    PropertyOutOfRange(&'static str),

    #[error("Session already registered for this client")]
    DuplicateSession,

    #[error("Unexpected mux command {command:?} on channel {mux_id}")]
    UnexpectedMuxCommand {
        mux_id: u16,
        command: crate::core::packet::MuxCommand,
    },

    #[error("Invalid mux channel {0}")]
    InvalidChannel(u16),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Classify this error for disconnect/log decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            ProtocolError::TruncatedInput
            | ProtocolError::MalformedVarint
            | ProtocolError::OversizedPacket(_)
            | ProtocolError::InvalidMuxCommand(_)
            | ProtocolError::InvalidPacket(_)
            | ProtocolError::UnknownMessage { .. }
            | ProtocolError::DecodeFailed(_)
            | ProtocolError::MissingProtocol
            | ProtocolError::PropertyOutOfRange(_) => ErrorClass::Validation,

            ProtocolError::DuplicateSession
            | ProtocolError::UnexpectedMuxCommand { .. }
            | ProtocolError::InvalidChannel(_) => ErrorClass::Anomaly,

            ProtocolError::Io(_)
            | ProtocolError::EncodeFailed(_)
            | ProtocolError::ConnectionClosed
            | ProtocolError::ConfigError(_)
            | ProtocolError::ServiceError(_)
            | ProtocolError::Custom(_) => ErrorClass::Fatal,
        }
    }

    /// Returns true if the peer that produced this error must be disconnected
    pub fn is_validation_failure(&self) -> bool {
        self.class() == ErrorClass::Validation
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_class() {
        assert_eq!(ProtocolError::MalformedVarint.class(), ErrorClass::Validation);
        assert_eq!(
            ProtocolError::UnknownMessage {
                protocol: ProtocolContext::ClientToGameServer,
                id: 9
            }
            .class(),
            ErrorClass::Validation
        );
        assert!(ProtocolError::TruncatedInput.is_validation_failure());
    }

    #[test]
    fn test_anomaly_and_fatal_class() {
        assert_eq!(ProtocolError::InvalidChannel(0).class(), ErrorClass::Anomaly);
        assert_eq!(ProtocolError::DuplicateSession.class(), ErrorClass::Anomaly);
        assert_eq!(ProtocolError::ConnectionClosed.class(), ErrorClass::Fatal);
        assert!(!ProtocolError::ConnectionClosed.is_validation_failure());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ProtocolError::InvalidMuxCommand(0x7F).to_string(),
            "Invalid mux command: 0x7F"
        );
        assert_eq!(
            ProtocolError::OversizedPacket(20).to_string(),
            "Packet too large: 20 bytes"
        );
    }
}
