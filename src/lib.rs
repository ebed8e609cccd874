//! # relay-chat-protocol
//!
//! Wire protocol core for a small relayed chat service: a big-endian binary
//! envelope, the catalog of chat, presence, login, moderation and file-transfer
//! messages, and the per-ticket state machine that drives segmented transfers
//! between a sender, a receiver and the relay in between.
//!
//! Transport is left to the caller. [`MessageCodec`] plugs into any
//! `tokio_util::codec::Framed` stream.
//!
//! ```rust
//! use relay_chat_protocol::{Message, protocol::message::ChatMessage};
//!
//! let msg = Message::Chat(ChatMessage::new("alice", "hi").unwrap());
//! let bytes = msg.to_bytes();
//! assert_eq!(Message::decode(&bytes).unwrap(), msg);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod utils;

pub use crate::config::ProtocolConfig;
pub use crate::core::codec::MessageCodec;
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::dispatcher::Dispatcher;
pub use crate::protocol::message::{Message, TypeCode};
pub use crate::protocol::registry::{TransferRegistry, TransferUpdate};
pub use crate::protocol::session::{AdminSession, LoginPolicy};
pub use crate::protocol::transfer::{TransferKey, TransferStage, TransferTicket};
