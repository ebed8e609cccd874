#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use relay_chat_protocol::{Message, MessageCodec};
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Whole-slice decode must never panic, and anything it accepts re-encodes to the same bytes
    if let Ok(msg) = Message::decode(data) {
        assert_eq!(&msg.to_bytes()[..], data);
    }

    // Streaming decode drains complete frames and stops cleanly
    let mut buf = BytesMut::from(data);
    let mut codec = MessageCodec::new();
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
});
