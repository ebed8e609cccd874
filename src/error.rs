//! # Error Types
//!
//! Error handling for the chat relay protocol core.
//!
//! Errors fall into the categories the protocol distinguishes:
//! - **Malformed wire data**: truncated envelopes, bad length prefixes, unknown type codes.
//!   Fatal to the single frame; the connection owner decides whether to drop the peer.
//! - **Field preconditions**: caught when a message is constructed, never reaching the wire.
//! - **Protocol-state violations**: a message legal in isolation but illegal for the
//!   ticket's current stage.
//! - **Ambient**: I/O, configuration and lock poisoning.
//!
//! Application-level failures (a login refused, a punishment not committed) are *not*
//! errors here: they are ordinary messages carrying a failure payload.
//!
//! ## Example Usage
//! ```rust
//! use relay_chat_protocol::error::{ProtocolError, Result};
//! use relay_chat_protocol::protocol::message::Message;
//! use tracing::{error, info};
//!
//! fn parse(frame: &[u8]) -> Result<Message> {
//!     Message::decode(frame)
//! }
//!
//! match parse(b"CHAT\x00\x00") {
//!     Ok(msg) => info!(type_code = %msg.type_code(), "decoded"),
//!     Err(e) if e.is_malformed() => error!(error = %e, "dropping frame"),
//!     Err(e) => error!(error = %e, "unexpected failure"),
//! }
//! ```

use crate::protocol::message::TypeCode;
use crate::protocol::transfer::TransferStage;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Registry / dispatcher locks
    pub const ERR_REGISTRY_LOCK: &str = "Failed to acquire transfer registry lock";
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";
    pub const ERR_DIRECTORY_LOCK: &str = "Failed to acquire punishment directory lock";

    /// Wire decoding
    pub const ERR_NEGATIVE_LENGTH: &str = "Negative length prefix";
    pub const ERR_INCOMPLETE: &str = "Message ends before its last field";
    pub const ERR_TRAILING_BYTES: &str = "Trailing bytes after message";
    pub const ERR_FRAME_TOO_LARGE: &str = "Buffered frame exceeds maximum size";

    /// Field preconditions
    pub const ERR_EMPTY_NAME: &str = "Name must not be empty";
    pub const ERR_ABSENT_VALUE: &str = "Value must be present";
    pub const ERR_MISSING_REMOVAL_IP: &str = "Punishment removal requires a target IP";
    pub const ERR_UNEXPECTED_SET_IP: &str = "Punishment application does not carry a target IP";
    pub const ERR_UNSET_DIRECTION: &str = "Punishment direction must be SET or REMOVE";
}

/// Primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Input ended before the message did; a stream decoder waits for more bytes
    #[error("Frame truncated")]
    Truncated,

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Unknown type code: {0:?}")]
    UnknownTypeCode([u8; 4]),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Body too long: {len} characters (max {max})")]
    BodyTooLong { len: usize, max: usize },

    #[error("Invalid file size: {0}")]
    InvalidFileSize(i64),

    #[error("Invalid segment index {index} of {total}")]
    InvalidSegmentIndex { index: i32, total: i32 },

    #[error("Invalid segment size: {0}")]
    InvalidSegmentSize(i64),

    #[error("Sender and receiver must differ")]
    SameParty,

    #[error("Concurrent file send limit reached ({0})")]
    TransferLimitReached(usize),

    #[error("Unexpected message type: {0}")]
    UnexpectedMessage(TypeCode),

    #[error("Transfer {0} is not addressed to this party")]
    NotAddressed(i32),

    #[error("Unknown transfer: {0}")]
    UnknownTransfer(i32),

    #[error("Transfer already exists: {0}")]
    DuplicateTransfer(i32),

    #[error("Illegal transition from {from:?} to {to:?}")]
    IllegalTransition {
        from: TransferStage,
        to: TransferStage,
    },

    #[error("Out-of-order segment: expected {expected}, got {got}")]
    OutOfOrderSegment { expected: i32, got: i32 },

    #[error("Transfer {0} is finishing or finished")]
    TransferClosed(i32),

    #[error("Transfer {0} is still active and cannot be cleared")]
    NotClearable(i32),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Synchronization primitive poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl ProtocolError {
    /// True for errors raised while decoding bytes off the wire
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProtocolError::Truncated
                | ProtocolError::MalformedMessage(_)
                | ProtocolError::UnknownTypeCode(_)
        )
    }

    /// True if the input only stopped short; more bytes may complete the frame
    pub fn is_truncated(&self) -> bool {
        matches!(self, ProtocolError::Truncated)
    }

    /// True for messages that were well-formed but illegal for a ticket's stage
    pub fn is_state_violation(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnknownTransfer(_)
                | ProtocolError::DuplicateTransfer(_)
                | ProtocolError::NotAddressed(_)
                | ProtocolError::IllegalTransition { .. }
                | ProtocolError::OutOfOrderSegment { .. }
                | ProtocolError::TransferClosed(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
