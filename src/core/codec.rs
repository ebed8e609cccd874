//! Tokio codec for framing messages over a byte stream.
//!
//! The envelope has no outer length, so decoding parses the buffered bytes directly:
//! a parse that runs out of input means the frame is still arriving and the buffer is
//! left untouched. Only once a whole message parses are exactly its bytes split off.
//!
//! ```rust,no_run
//! use relay_chat_protocol::core::codec::MessageCodec;
//! use tokio_util::codec::Framed;
//! # fn run<T: tokio::io::AsyncRead + tokio::io::AsyncWrite>(stream: T) {
//! let framed = Framed::new(stream, MessageCodec::new());
//! # let _ = framed;
//! # }
//! ```

use crate::config::{TransferConfig, MAX_FRAME_SIZE};
use crate::error::{constants, ProtocolError};
use crate::protocol::message::Message;
use crate::utils::metrics::Metrics;
use bytes::{Buf, BytesMut};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Envelope codec for `Framed` streams
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_frame_size: usize,
    metrics: Option<Arc<Metrics>>,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            metrics: None,
        }
    }

    /// Codec bounded by the configured frame size
    pub fn from_config(config: &TransferConfig) -> Self {
        Self::new().with_max_frame_size(config.max_frame_size)
    }

    /// Refuse to buffer more than `max_frame_size` bytes waiting for one frame
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn malformed(&self) {
        if let Some(m) = &self.metrics {
            m.malformed_frame();
        }
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        match Message::decode_prefix(src) {
            Ok((message, consumed)) => {
                src.advance(consumed);
                if let Some(m) = &self.metrics {
                    m.message_decoded(consumed as u64);
                }
                Ok(Some(message))
            }
            Err(e) if e.is_truncated() => {
                if src.len() > self.max_frame_size {
                    self.malformed();
                    warn!(buffered = src.len(), "Frame exceeds maximum size");
                    return Err(ProtocolError::MalformedMessage(format!(
                        "{}: {} bytes",
                        constants::ERR_FRAME_TOO_LARGE,
                        src.len()
                    )));
                }
                Ok(None)
            }
            Err(e) => {
                self.malformed();
                warn!(error = %e, "Dropping malformed frame");
                Err(e)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            // Stream ended mid-frame: truncation is final now
            None => {
                self.malformed();
                Err(ProtocolError::Truncated)
            }
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        item.encode(dst);
        if let Some(m) = &self.metrics {
            m.message_encoded((dst.len() - start) as u64);
        }
        Ok(())
    }
}
