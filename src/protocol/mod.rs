//! # Protocol Layer
//!
//! Message catalog, file-transfer tickets and their state machine, and the
//! session and moderation rules that sit on top of the wire format.
//!
//! ## Components
//! - **Message**: every message kind with its type code and payload
//! - **Transfer**: tickets, segment planning and the stage lattice
//! - **Registry**: per-party ticket bookkeeping driven by inbound messages
//! - **Session**: login classification, admin login and punishments
//! - **Dispatcher**: routes decoded messages to handlers by type code

pub mod dispatcher;
pub mod message;
pub mod registry;
pub mod session;
pub mod transfer;
