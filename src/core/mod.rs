//! # Core Wire Components
//!
//! Low-level byte handling shared by every message type.
//!
//! ## Components
//! - **Wire**: big-endian primitive reader/writer (integers, tags, length-prefixed strings)
//! - **Codec**: Tokio codec for framing messages over byte streams
//!
//! ## Wire Format
//! ```text
//! [TypeCode(4 ASCII)] [Payload(type-specific)]
//! String := [Length(i32 BE)] [Bytes(Length)]
//! ```
//!
//! There is no outer length field; the payload layout is fixed by the type code.

pub mod codec;
pub mod wire;
