//! End-to-end transfer flows through the public API, with every message
//! crossing the wire encoding between parties

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bytes::Bytes;
use relay_chat_protocol::config::TransferConfig;
use relay_chat_protocol::protocol::message::{
    Message, TransferEnd, TransferHeader, TransferRequest, TransferSegment, MAX_SEGMENT_SIZE,
};
use relay_chat_protocol::protocol::registry::{Disposition, TransferRegistry};
use relay_chat_protocol::protocol::transfer::{TicketRole, TransferStage};
use relay_chat_protocol::utils::metrics::Metrics;
use relay_chat_protocol::ProtocolError;
use std::path::PathBuf;
use std::sync::Arc;

fn wire(msg: &Message) -> Message {
    Message::decode(&msg.to_bytes()).unwrap()
}

fn parties() -> (TransferRegistry, TransferRegistry) {
    let config = TransferConfig::default();
    (
        TransferRegistry::new("alice", &config),
        TransferRegistry::new("bob", &config),
    )
}

#[test]
fn test_progress_tracks_bytes() {
    let (alice, bob) = parties();
    let payload = Bytes::from(vec![1u8; 4 * MAX_SEGMENT_SIZE]);
    let (id, request) = alice.request_send("bob", "four.bin", payload.len() as i64).unwrap();
    bob.apply(&wire(&request)).unwrap();

    let ticket = bob.get(&id).unwrap();
    assert_eq!(ticket.role(), TicketRole::Receiver);
    assert_eq!(ticket.file_name(), "four.bin");
    assert_eq!(ticket.plan().total(), 4);
    assert_eq!(ticket.progress(), 0.0);

    for reply in bob.respond(&id, Some(PathBuf::from("/downloads/four.bin"))).unwrap() {
        alice.apply(&wire(&reply)).unwrap();
    }
    assert_eq!(
        bob.get(&id).unwrap().file_path(),
        Some(std::path::Path::new("/downloads/four.bin"))
    );

    let segments = alice.segments_for(&id, &payload).unwrap();
    let mut seen = Vec::new();
    for segment in &segments {
        seen.push(bob.apply(&wire(segment)).unwrap().progress);
    }
    assert_eq!(seen, vec![0.25, 0.5, 0.75, 1.0]);
}

#[test]
fn test_sender_limit_frees_after_completion() {
    let (alice, bob) = parties();
    let mut ids = Vec::new();
    for n in 0..3 {
        let (id, request) = alice.request_send("bob", &format!("f{n}"), 10).unwrap();
        bob.apply(&wire(&request)).unwrap();
        ids.push(id);
    }
    assert!(matches!(
        alice.request_send("bob", "f3", 10),
        Err(ProtocolError::TransferLimitReached(3))
    ));

    // Finish the first transfer; its slot opens before it is cleared
    let id = ids[0].clone();
    for reply in bob.respond(&id, Some(PathBuf::from("f0"))).unwrap() {
        alice.apply(&wire(&reply)).unwrap();
    }
    let payload = Bytes::from(vec![9u8; 10]);
    let mut completion = None;
    for segment in alice.segments_for(&id, &payload).unwrap() {
        completion = bob.apply(&wire(&segment)).unwrap().reply;
    }
    alice.apply(&wire(&completion.unwrap())).unwrap();
    assert_eq!(alice.get(&id).unwrap().stage(), TransferStage::Done);

    assert!(alice.request_send("bob", "f3", 10).is_ok());
}

#[test]
fn test_wrong_chunk_size_refused_locally() {
    let (alice, bob) = parties();
    let (id, request) = alice.request_send("bob", "f", 40_000).unwrap();
    bob.apply(&request).unwrap();
    for reply in bob.respond(&id, Some(PathBuf::from("f"))).unwrap() {
        alice.apply(&reply).unwrap();
    }

    let short = Bytes::from(vec![0u8; 100]);
    assert!(matches!(
        alice.next_segment(&id, short),
        Err(ProtocolError::InvalidSegmentSize(100))
    ));
    // Nothing was sent, so the ticket is untouched
    assert_eq!(alice.get(&id).unwrap().stage(), TransferStage::ResponseToRequest);
    assert!(alice.segments_for(&id, &Bytes::from(vec![0u8; 39_999])).is_err());
}

#[test]
fn test_data_before_acceptance_aborts() {
    let (alice, bob) = parties();
    let (id, request) = alice.request_send("bob", "f", 10).unwrap();
    bob.apply(&request).unwrap();

    // Bob never answered, yet data arrives
    let header = bob.get(&id).unwrap().header().clone();
    let rogue = TransferSegment::new(
        header,
        1,
        1,
        Bytes::from(vec![0u8; 10]),
    )
    .unwrap();

    let update = bob.apply(&Message::TransferData(rogue)).unwrap();
    assert!(!update.is_accepted());
    assert_eq!(update.stage, TransferStage::Error);
}

#[test]
fn test_completion_after_cancel_is_ignored() {
    let (alice, bob) = parties();
    let (id, request) = alice.request_send("bob", "f", 10).unwrap();
    bob.apply(&request).unwrap();
    for reply in bob.respond(&id, Some(PathBuf::from("f"))).unwrap() {
        alice.apply(&reply).unwrap();
    }
    let segments = alice.segments_for(&id, &Bytes::from(vec![0u8; 10])).unwrap();
    assert_eq!(alice.get(&id).unwrap().stage(), TransferStage::TransEndResponse);

    // Already finishing: cancel has no effect
    assert!(alice.cancel(&id).unwrap().is_none());

    let completion = bob.apply(&segments[0]).unwrap().reply.unwrap();
    alice.apply(&completion).unwrap();
    assert_eq!(alice.get(&id).unwrap().stage(), TransferStage::Done);

    // A stray notice for a finished ticket is dropped
    let header = alice.get(&id).unwrap().header().clone();
    let stray = Message::TransferError(TransferEnd::aborted(header, "late"));
    let update = alice.apply(&stray).unwrap();
    assert!(matches!(
        update.disposition,
        Disposition::Discarded(ProtocolError::TransferClosed(_))
    ));
    assert_eq!(update.stage, TransferStage::Done);
}

#[test]
fn test_unknown_and_duplicate_ids() {
    let (alice, bob) = parties();
    let (id, request) = alice.request_send("bob", "f", 10).unwrap();
    bob.apply(&request).unwrap();
    assert!(matches!(
        bob.apply(&request),
        Err(ProtocolError::DuplicateTransfer(dup)) if dup == id.transfer_id()
    ));

    let (other_id, other) = {
        let carol = TransferRegistry::new("carol", &TransferConfig::default());
        carol.request_send("bob", "g", 10).unwrap()
    };
    let header = match &other {
        Message::TransferRequest(r) => r.header().clone(),
        _ => unreachable!(),
    };
    let end = Message::TransferError(TransferEnd::aborted(header, "x"));
    assert!(matches!(
        alice.apply(&end),
        Err(ProtocolError::UnknownTransfer(unknown)) if unknown == other_id.transfer_id()
    ));
}

#[test]
fn test_metrics_follow_transfer() {
    let (alice, _) = parties();
    let shared = Arc::new(Metrics::new());
    let bob =
        TransferRegistry::new("bob", &TransferConfig::default()).with_metrics(Arc::clone(&shared));

    let payload = Bytes::from(vec![3u8; 70_000]);
    let (id, request) = alice.request_send("bob", "m", 70_000).unwrap();
    bob.apply(&request).unwrap();
    for reply in bob.respond(&id, Some(PathBuf::from("m"))).unwrap() {
        alice.apply(&reply).unwrap();
    }
    for segment in alice.segments_for(&id, &payload).unwrap() {
        bob.apply(&segment).unwrap();
    }

    let snap = shared.snapshot();
    assert_eq!(snap.transfers_started, 1);
    assert_eq!(snap.segments_received, 3);
    assert_eq!(snap.transfers_completed, 1);
    assert_eq!(alice.metrics().snapshot().segments_sent, 3);
}

#[test]
fn test_same_id_from_two_senders_stays_separate() {
    let (alice, bob) = parties();
    let relay = TransferRegistry::relay(&TransferConfig::default());

    let (from_alice, request) = alice.request_send("bob", "a.txt", 10).unwrap();
    relay.apply(&wire(&request)).unwrap();
    bob.apply(&wire(&request)).unwrap();

    // carol's client numbered its transfer independently and landed on the same id
    let header = TransferHeader::new(from_alice.transfer_id(), "carol", "bob").unwrap();
    let colliding = Message::TransferRequest(TransferRequest::new(header, "c.txt", 20).unwrap());
    let from_carol = relay.apply(&wire(&colliding)).unwrap().key;
    assert_eq!(bob.apply(&wire(&colliding)).unwrap().key, from_carol);
    assert_eq!(from_carol.transfer_id(), from_alice.transfer_id());

    assert_eq!(bob.get(&from_carol).unwrap().file_name(), "c.txt");
    assert_eq!(bob.get(&from_alice).unwrap().file_name(), "a.txt");

    // Bob takes alice's file and refuses carol's
    for reply in bob.respond(&from_alice, Some(PathBuf::from("a.txt"))).unwrap() {
        relay.apply(&wire(&reply)).unwrap();
        alice.apply(&wire(&reply)).unwrap();
    }
    for reply in bob.respond(&from_carol, None).unwrap() {
        relay.apply(&wire(&reply)).unwrap();
    }

    let payload = Bytes::from_static(b"0123456789");
    for segment in alice.segments_for(&from_alice, &payload).unwrap() {
        relay.apply(&wire(&segment)).unwrap();
        if let Some(done) = bob.apply(&wire(&segment)).unwrap().reply {
            relay.apply(&wire(&done)).unwrap();
            alice.apply(&wire(&done)).unwrap();
        }
    }

    for registry in [&relay, &bob] {
        assert_eq!(registry.get(&from_alice).unwrap().stage(), TransferStage::Done);
        assert_eq!(registry.get(&from_carol).unwrap().stage(), TransferStage::Error);
    }
    assert_eq!(alice.get(&from_alice).unwrap().stage(), TransferStage::Done);
    assert_eq!(bob.take_received(&from_alice).unwrap(), payload);
}
