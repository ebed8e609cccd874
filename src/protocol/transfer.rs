//! # File Transfer Tickets
//!
//! A [`TransferTicket`] tracks one file exchange from the moment it is requested until
//! it is cleared. Its [`TransferStage`] only ever moves forward:
//!
//! ```text
//! REQUEST -> RESPONSE_TO_REQUEST -> DATA_SEGMENTS -> TRANS_END_RESPONSE -> DONE
//!     \______________\___________________\__________________\_________-> ERROR
//! ```
//!
//! Files move as `ceil(file_size / 32768)` segments. [`SegmentPlan`] holds the
//! segmentation math shared by the sending side (cutting) and the receiving side
//! (validating each declared size).
//!
//! Ids are only unique within the process that allocated them, so a ticket is
//! identified by its [`TransferKey`]: the sender's name together with the id.

use crate::error::{ProtocolError, Result};
use crate::protocol::message::{
    TransferEnd, TransferHeader, TransferSegment, MAX_FILE_SIZE, MAX_SEGMENT_SIZE,
};
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::debug;

static NEXT_TRANSFER_ID: AtomicI32 = AtomicI32::new(1);

/// Allocate a process-unique transfer id
pub fn next_transfer_id() -> i32 {
    NEXT_TRANSFER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Identity of a transfer: the id is scoped to the sender that allocated it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferKey {
    sender: String,
    transfer_id: i32,
}

impl TransferKey {
    pub fn new(sender: impl Into<String>, transfer_id: i32) -> Self {
        Self {
            sender: sender.into(),
            transfer_id,
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn transfer_id(&self) -> i32 {
        self.transfer_id
    }
}

impl From<&TransferHeader> for TransferKey {
    fn from(header: &TransferHeader) -> Self {
        Self::new(header.sender(), header.transfer_id())
    }
}

impl fmt::Display for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.sender, self.transfer_id)
    }
}

/// Position of a ticket in the transfer state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransferStage {
    Request,
    ResponseToRequest,
    DataSegments,
    TransEndResponse,
    Done,
    Error,
}

impl TransferStage {
    /// DONE and ERROR accept no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStage::Done | TransferStage::Error)
    }

    /// Finishing or finished: no more data segments are accepted
    pub fn is_closing(self) -> bool {
        self >= TransferStage::TransEndResponse
    }

    /// Forward-only transitions; ERROR is reachable from any non-terminal stage.
    /// DATA_SEGMENTS may repeat while segments keep arriving.
    pub fn can_transition(self, to: TransferStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == TransferStage::Error
            || to > self
            || (to == self && self == TransferStage::DataSegments)
    }
}

/// Which side of the exchange this ticket mirrors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketRole {
    Sender,
    Receiver,
    /// Server-side authoritative copy, advanced by messages flowing both ways
    Relay,
}

/// Segmentation of a file into [`MAX_SEGMENT_SIZE`] chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPlan {
    file_size: i32,
    total: i32,
}

impl SegmentPlan {
    pub fn new(file_size: i64) -> Result<Self> {
        if !(0..=MAX_FILE_SIZE).contains(&file_size) {
            return Err(ProtocolError::InvalidFileSize(file_size));
        }
        let total = (file_size as u64).div_ceil(MAX_SEGMENT_SIZE as u64) as i32;
        Ok(Self {
            file_size: file_size as i32,
            total,
        })
    }

    /// Number of segments; zero for an empty file
    pub fn total(&self) -> i32 {
        self.total
    }

    pub fn file_size(&self) -> i32 {
        self.file_size
    }

    /// Byte range of the 1-based segment `index` within the file
    pub fn range_of(&self, index: i32) -> Result<Range<usize>> {
        if index < 1 || index > self.total {
            return Err(ProtocolError::InvalidSegmentIndex {
                index,
                total: self.total,
            });
        }
        let start = (index as usize - 1) * MAX_SEGMENT_SIZE;
        let end = (start + MAX_SEGMENT_SIZE).min(self.file_size as usize);
        Ok(start..end)
    }

    /// Declared size of segment `index`; only the last one may be short
    pub fn size_of(&self, index: i32) -> Result<usize> {
        self.range_of(index).map(|r| r.len())
    }

    /// All segment ranges in send order
    pub fn ranges(&self) -> impl Iterator<Item = (i32, Range<usize>)> + '_ {
        (1..=self.total).filter_map(move |i| self.range_of(i).ok().map(|r| (i, r)))
    }
}

/// Mutable record of one file exchange
#[derive(Debug, Clone)]
pub struct TransferTicket {
    header: TransferHeader,
    file_name: String,
    file_path: Option<PathBuf>,
    plan: SegmentPlan,
    stage: TransferStage,
    role: TicketRole,
    segments_done: i32,
    bytes_done: u64,
    cancelled: bool,
    failure: Option<String>,
    received: BytesMut,
}

impl TransferTicket {
    /// New ticket at REQUEST
    pub fn new(
        header: TransferHeader,
        file_name: impl Into<String>,
        file_size: i64,
        role: TicketRole,
    ) -> Result<Self> {
        let plan = SegmentPlan::new(file_size)?;
        let file_name = file_name.into();
        if file_name.is_empty() {
            return Err(ProtocolError::InvalidField("file_name is empty".to_string()));
        }
        Ok(Self {
            header,
            file_name,
            file_path: None,
            plan,
            stage: TransferStage::Request,
            role,
            segments_done: 0,
            bytes_done: 0,
            cancelled: false,
            failure: None,
            received: BytesMut::new(),
        })
    }

    pub fn transfer_id(&self) -> i32 {
        self.header.transfer_id()
    }

    pub fn key(&self) -> TransferKey {
        TransferKey::from(&self.header)
    }

    pub fn header(&self) -> &TransferHeader {
        &self.header
    }

    pub fn sender_name(&self) -> &str {
        self.header.sender()
    }

    pub fn receiver_name(&self) -> &str {
        self.header.receiver()
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Local save path, set by the receiver on acceptance
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn file_size(&self) -> i32 {
        self.plan.file_size()
    }

    pub fn plan(&self) -> &SegmentPlan {
        &self.plan
    }

    pub fn stage(&self) -> TransferStage {
        self.stage
    }

    pub fn role(&self) -> TicketRole {
        self.role
    }

    pub fn segments_done(&self) -> i32 {
        self.segments_done
    }

    /// True once a local cancel moved this ticket to TRANS_END_RESPONSE
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Fraction of bytes transferred. Fixed at 1.0 once DONE; not meaningful in ERROR.
    pub fn progress(&self) -> f64 {
        if self.stage == TransferStage::Done {
            return 1.0;
        }
        if self.plan.file_size() == 0 {
            return 0.0;
        }
        (self.bytes_done as f64 / self.plan.file_size() as f64).min(1.0)
    }

    /// Move to `to`, refusing anything but a forward step
    pub fn advance(&mut self, to: TransferStage) -> Result<()> {
        if !self.stage.can_transition(to) {
            return Err(ProtocolError::IllegalTransition {
                from: self.stage,
                to,
            });
        }
        if self.stage != to {
            debug!(
                transfer_id = self.transfer_id(),
                from = ?self.stage,
                to = ?to,
                "Transfer stage advanced"
            );
        }
        self.stage = to;
        Ok(())
    }

    /// Receiver accepted and chose where to save
    pub(crate) fn accept(&mut self, path: PathBuf) -> Result<()> {
        self.advance(TransferStage::ResponseToRequest)?;
        self.file_path = Some(path);
        Ok(())
    }

    /// Local cancellation. Returns false without effect once the ticket is closing.
    pub(crate) fn cancel(&mut self) -> bool {
        if self.stage.is_closing() {
            return false;
        }
        self.stage = TransferStage::TransEndResponse;
        self.cancelled = true;
        true
    }

    /// Move to ERROR. Returns false if the ticket was already terminal.
    pub(crate) fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.stage.is_terminal() {
            return false;
        }
        self.stage = TransferStage::Error;
        self.failure = Some(reason.into());
        true
    }

    /// Validate and account for the next segment, in order.
    ///
    /// Receivers append the bytes to the reassembly buffer. The caller decides the
    /// stage that follows the final segment.
    pub(crate) fn record_segment(&mut self, segment: &TransferSegment) -> Result<()> {
        if self.stage.is_closing() {
            return Err(ProtocolError::TransferClosed(self.transfer_id()));
        }
        if !matches!(
            self.stage,
            TransferStage::ResponseToRequest | TransferStage::DataSegments
        ) {
            return Err(ProtocolError::IllegalTransition {
                from: self.stage,
                to: TransferStage::DataSegments,
            });
        }
        if segment.total() != self.plan.total() {
            return Err(ProtocolError::InvalidSegmentIndex {
                index: segment.index(),
                total: segment.total(),
            });
        }
        let expected = self.segments_done + 1;
        if segment.index() != expected {
            return Err(ProtocolError::OutOfOrderSegment {
                expected,
                got: segment.index(),
            });
        }
        let declared = self.plan.size_of(segment.index())?;
        if segment.size() != declared || segment.size() > MAX_SEGMENT_SIZE {
            return Err(ProtocolError::InvalidSegmentSize(segment.size() as i64));
        }

        self.advance(TransferStage::DataSegments)?;
        if self.role == TicketRole::Receiver {
            self.received.extend_from_slice(segment.data());
        }
        self.segments_done = expected;
        self.bytes_done += segment.size() as u64;
        Ok(())
    }

    /// All segments accounted for
    pub fn is_complete(&self) -> bool {
        self.segments_done == self.plan.total()
    }

    /// Hand the reassembled file to the caller, once DONE
    pub(crate) fn take_received(&mut self) -> Option<Bytes> {
        if self.stage != TransferStage::Done || self.role != TicketRole::Receiver {
            return None;
        }
        Some(std::mem::take(&mut self.received).freeze())
    }

    pub(crate) fn abort_message(&self, reason: &str) -> TransferEnd {
        TransferEnd::aborted(self.header.clone(), reason)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn ticket(size: i64, role: TicketRole) -> TransferTicket {
        let header = TransferHeader::new(42, "alice", "bob").unwrap();
        TransferTicket::new(header, "report.pdf", size, role).unwrap()
    }

    fn segment(t: &TransferTicket, index: i32) -> TransferSegment {
        let size = t.plan().size_of(index).unwrap();
        TransferSegment::new(
            t.header().clone(),
            index,
            t.plan().total(),
            Bytes::from(vec![index as u8; size]),
        )
        .unwrap()
    }

    #[test]
    fn test_key_scopes_id_to_sender() {
        let t = ticket(10, TicketRole::Receiver);
        assert_eq!(t.key(), TransferKey::new("alice", 42));
        assert_eq!(t.key().to_string(), "alice#42");

        let other = TransferHeader::new(42, "carol", "bob").unwrap();
        assert_ne!(TransferKey::from(&other), t.key());
    }

    #[test]
    fn test_segment_plan_math() {
        let plan = SegmentPlan::new(100_000).unwrap();
        assert_eq!(plan.total(), 4);
        let sizes: Vec<usize> = plan.ranges().map(|(_, r)| r.len()).collect();
        assert_eq!(sizes, vec![32768, 32768, 32768, 1696]);

        assert_eq!(SegmentPlan::new(0).unwrap().total(), 0);
        assert_eq!(SegmentPlan::new(32768).unwrap().total(), 1);
        assert_eq!(SegmentPlan::new(32769).unwrap().total(), 2);
        assert_eq!(
            SegmentPlan::new(i32::MAX as i64).unwrap().total(),
            65536
        );
        assert!(SegmentPlan::new(-5).is_err());
    }

    #[test]
    fn test_stage_order_and_transitions() {
        use TransferStage::*;
        assert!(Request < ResponseToRequest);
        assert!(DataSegments < TransEndResponse);
        assert!(TransEndResponse < Done);

        assert!(Request.can_transition(Error));
        assert!(TransEndResponse.can_transition(Error));
        assert!(!Done.can_transition(Error));
        assert!(!Error.can_transition(Done));
        assert!(!DataSegments.can_transition(Request));
        assert!(DataSegments.can_transition(DataSegments));
        assert!(!Request.can_transition(Request));
    }

    #[test]
    fn test_receiver_reassembles_in_order() {
        let mut t = ticket(70_000, TicketRole::Receiver);
        t.accept(PathBuf::from("/tmp/report.pdf")).unwrap();
        for i in 1..=3 {
            t.record_segment(&segment(&t, i)).unwrap();
        }
        assert!(t.is_complete());
        assert!((t.progress() - 1.0).abs() < f64::EPSILON);
        t.advance(TransferStage::Done).unwrap();
        let data = t.take_received().unwrap();
        assert_eq!(data.len(), 70_000);
        assert_eq!(data[0], 1);
        assert_eq!(data[69_999], 3);
    }

    #[test]
    fn test_out_of_order_segment_rejected() {
        let mut t = ticket(100_000, TicketRole::Receiver);
        t.accept(PathBuf::from("x")).unwrap();
        t.record_segment(&segment(&t, 1)).unwrap();
        let err = t.record_segment(&segment(&t, 3)).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::OutOfOrderSegment { expected: 2, got: 3 }
        ));
        // Duplicate of the first segment
        assert!(t.record_segment(&segment(&t, 1)).is_err());
        assert_eq!(t.segments_done(), 1);
    }

    #[test]
    fn test_segment_before_acceptance_rejected() {
        let mut t = ticket(10, TicketRole::Receiver);
        let err = t.record_segment(&segment(&t, 1)).unwrap_err();
        assert!(matches!(err, ProtocolError::IllegalTransition { .. }));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut t = ticket(10, TicketRole::Sender);
        assert!(t.cancel());
        let after_first = t.stage();
        assert!(!t.cancel());
        assert_eq!(t.stage(), after_first);
        assert_eq!(t.stage(), TransferStage::TransEndResponse);
        assert!(t.is_cancelled());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut t = ticket(100_000, TicketRole::Relay);
        t.advance(TransferStage::ResponseToRequest).unwrap();
        let mut last = t.progress();
        for i in 1..=4 {
            t.record_segment(&segment(&t, i)).unwrap();
            assert!(t.progress() >= last);
            last = t.progress();
        }
        // Relays do not buffer file bytes
        assert!(t.received.is_empty());
    }

    #[test]
    fn test_fail_is_terminal() {
        let mut t = ticket(10, TicketRole::Sender);
        assert!(t.fail("disk full"));
        assert_eq!(t.failure(), Some("disk full"));
        assert!(!t.fail("again"));
        assert!(t.advance(TransferStage::Done).is_err());
    }
}
