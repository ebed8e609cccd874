//! # Transfer Registry
//!
//! Session-scoped table of [`TransferTicket`]s. The registry is the single logical
//! owner of its tickets: local actions (request, respond, send, cancel, fail, clear)
//! and inbound messages are each applied under one lock, so a stage is read, the
//! transition validated and the new stage written as one step. A local cancel racing
//! an inbound segment therefore never observes a torn ticket.
//!
//! A registry is created for one party. Clients name themselves and mirror the
//! tickets they send or receive; the server builds a relay registry that advances
//! its authoritative copy from the messages it forwards in both directions.
//!
//! Admission control is the only backpressure: a sender with
//! `max_concurrent_file_sends` tickets in a non-terminal stage is refused before a
//! new ticket exists. Nothing is queued.
//!
//! Tickets are keyed by [`TransferKey`]. Each client allocates ids on its own, so two
//! senders (or a receiver's own send and an incoming request) can carry the same id.

use crate::config::TransferConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{
    Message, Outcome, RequestStage, TransferEnd, TransferHeader, TransferRequest, TransferSegment,
    TypeCode,
};
use crate::protocol::transfer::{
    next_transfer_id, TicketRole, TransferKey, TransferStage, TransferTicket,
};
use crate::utils::metrics::Metrics;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

/// What happened to an inbound transfer message
#[derive(Debug)]
pub enum Disposition {
    /// Applied to the ticket
    Accepted,
    /// Illegal for the ticket's stage and dropped; the ticket may have moved to ERROR
    Discarded(ProtocolError),
}

/// Result of applying one inbound transfer message
#[derive(Debug)]
pub struct TransferUpdate {
    pub key: TransferKey,
    pub previous: TransferStage,
    pub stage: TransferStage,
    pub progress: f64,
    pub disposition: Disposition,
    /// Message to send back, if the transition produces one
    pub reply: Option<Message>,
}

impl TransferUpdate {
    pub fn is_accepted(&self) -> bool {
        matches!(self.disposition, Disposition::Accepted)
    }
}

/// Per-session ticket table with admission control
#[derive(Debug)]
pub struct TransferRegistry {
    local_name: Option<String>,
    max_concurrent_sends: usize,
    tickets: Mutex<HashMap<TransferKey, TransferTicket>>,
    metrics: Arc<Metrics>,
}

impl TransferRegistry {
    /// Registry for a client named `local_name`
    pub fn new(local_name: impl Into<String>, config: &TransferConfig) -> Self {
        Self::build(Some(local_name.into()), config)
    }

    /// Server-side registry observing transfers between other parties
    pub fn relay(config: &TransferConfig) -> Self {
        Self::build(None, config)
    }

    fn build(local_name: Option<String>, config: &TransferConfig) -> Self {
        Self {
            local_name,
            max_concurrent_sends: config.max_concurrent_file_sends,
            tickets: Mutex::new(HashMap::new()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Share an existing metrics collector
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<TransferKey, TransferTicket>>> {
        self.tickets
            .lock()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_REGISTRY_LOCK))
    }

    fn active_sends(tickets: &HashMap<TransferKey, TransferTicket>, sender: &str) -> usize {
        tickets
            .values()
            .filter(|t| t.sender_name() == sender && !t.stage().is_terminal())
            .count()
    }

    fn admit(&self, tickets: &HashMap<TransferKey, TransferTicket>, sender: &str) -> Result<()> {
        if Self::active_sends(tickets, sender) >= self.max_concurrent_sends {
            self.metrics.transfer_rejected();
            warn!(
                sender,
                limit = self.max_concurrent_sends,
                "Concurrent file send limit reached"
            );
            return Err(ProtocolError::TransferLimitReached(self.max_concurrent_sends));
        }
        Ok(())
    }

    /// Number of non-terminal tickets this party is sending
    pub fn active_send_count(&self) -> Result<usize> {
        let tickets = self.lock()?;
        Ok(match &self.local_name {
            Some(name) => Self::active_sends(&tickets, name),
            None => 0,
        })
    }

    /// Non-terminal tickets sent by `sender`, as seen by this registry
    pub fn active_sends_for(&self, sender: &str) -> Result<usize> {
        let tickets = self.lock()?;
        Ok(Self::active_sends(&tickets, sender))
    }

    /// Issue a transfer request to `receiver`, creating the sender's ticket
    #[instrument(skip(self, file_name))]
    pub fn request_send(
        &self,
        receiver: &str,
        file_name: &str,
        file_size: i64,
    ) -> Result<(TransferKey, Message)> {
        let sender = self.local_name.as_deref().ok_or_else(|| {
            ProtocolError::InvalidField("a relay registry cannot originate transfers".to_string())
        })?;

        let mut tickets = self.lock()?;
        self.admit(&tickets, sender)?;

        let transfer_id = next_transfer_id();
        let header = TransferHeader::new(transfer_id, sender, receiver)?;
        let request = TransferRequest::new(header.clone(), file_name, file_size)?;
        let ticket = TransferTicket::new(header, file_name, file_size, TicketRole::Sender)?;
        let key = ticket.key();
        tickets.insert(key.clone(), ticket);
        self.metrics.transfer_started();

        info!(transfer = %key, file_size, "Transfer requested");
        Ok((key, Message::TransferRequest(request)))
    }

    /// Receiver's answer. `Some(path)` accepts and records where the file will be
    /// saved; `None` declines and closes the ticket in ERROR.
    ///
    /// Accepting an empty file completes it at once, so a completion notice follows
    /// the response.
    #[instrument(skip(self, save_path))]
    pub fn respond(&self, key: &TransferKey, save_path: Option<PathBuf>) -> Result<Vec<Message>> {
        let mut tickets = self.lock()?;
        let ticket = Self::lookup(&mut tickets, key)?;

        if ticket.role() != TicketRole::Receiver {
            return Err(ProtocolError::NotAddressed(key.transfer_id()));
        }
        if ticket.stage() != TransferStage::Request {
            return Err(ProtocolError::IllegalTransition {
                from: ticket.stage(),
                to: TransferStage::ResponseToRequest,
            });
        }

        let request = TransferRequest::new(
            ticket.header().clone(),
            ticket.file_name(),
            ticket.file_size() as i64,
        )?;

        match save_path {
            Some(path) => {
                ticket.accept(path)?;
                let mut out = vec![Message::TransferRequest(request.respond(Outcome::Success))];
                if ticket.plan().total() == 0 {
                    ticket.advance(TransferStage::Done)?;
                    self.metrics.transfer_completed();
                    out.push(Message::TransferError(TransferEnd::completed(
                        ticket.header().clone(),
                    )));
                }
                debug!(transfer = %key, "Transfer accepted");
                Ok(out)
            }
            None => {
                ticket.fail("declined");
                self.metrics.transfer_failed();
                debug!(transfer = %key, "Transfer declined");
                Ok(vec![Message::TransferRequest(request.respond(Outcome::Failure))])
            }
        }
    }

    /// Cut the next segment from `chunk`, which must hold exactly the bytes the
    /// segment plan expects at this position
    #[instrument(skip(self, chunk), fields(len = chunk.len()))]
    pub fn next_segment(&self, key: &TransferKey, chunk: Bytes) -> Result<Message> {
        let mut tickets = self.lock()?;
        let ticket = Self::lookup(&mut tickets, key)?;

        if ticket.role() != TicketRole::Sender {
            return Err(ProtocolError::NotAddressed(key.transfer_id()));
        }
        if ticket.stage().is_closing() {
            return Err(ProtocolError::TransferClosed(key.transfer_id()));
        }

        let index = ticket.segments_done() + 1;
        let expected = ticket.plan().size_of(index)?;
        if chunk.len() != expected {
            return Err(ProtocolError::InvalidSegmentSize(chunk.len() as i64));
        }

        let segment = TransferSegment::new(
            ticket.header().clone(),
            index,
            ticket.plan().total(),
            chunk,
        )?;
        ticket.record_segment(&segment)?;
        self.metrics.segment_sent();

        if segment.is_last() {
            ticket.advance(TransferStage::TransEndResponse)?;
            debug!(transfer = %key, "Final segment sent, awaiting completion");
        }
        Ok(Message::TransferData(segment))
    }

    /// Segment the remainder of `file` in order
    pub fn segments_for(&self, key: &TransferKey, file: &Bytes) -> Result<Vec<Message>> {
        let (plan, done) = {
            let mut tickets = self.lock()?;
            let ticket = Self::lookup(&mut tickets, key)?;
            (*ticket.plan(), ticket.segments_done())
        };
        if file.len() != plan.file_size() as usize {
            return Err(ProtocolError::InvalidFileSize(file.len() as i64));
        }

        plan.ranges()
            .skip(done as usize)
            .map(|(_, range)| self.next_segment(key, file.slice(range)))
            .collect()
    }

    /// Cancel a transfer locally. Idempotent: a ticket already finishing or finished is
    /// left alone and `None` is returned; otherwise the ticket moves to
    /// TRANS_END_RESPONSE and the failure notice for the remote party is returned.
    #[instrument(skip(self))]
    pub fn cancel(&self, key: &TransferKey) -> Result<Option<Message>> {
        let mut tickets = self.lock()?;
        let ticket = Self::lookup(&mut tickets, key)?;

        if !ticket.cancel() {
            debug!(transfer = %key, stage = ?ticket.stage(), "Cancel ignored");
            return Ok(None);
        }
        self.metrics.transfer_cancelled();
        info!(transfer = %key, "Transfer cancelled");
        Ok(Some(Message::TransferError(ticket.abort_message("cancelled"))))
    }

    /// Report a local failure (I/O, disk full) and move the ticket to ERROR
    #[instrument(skip(self))]
    pub fn fail(&self, key: &TransferKey, reason: &str) -> Result<Option<Message>> {
        let mut tickets = self.lock()?;
        let ticket = Self::lookup(&mut tickets, key)?;

        if !ticket.fail(reason) {
            return Ok(None);
        }
        self.metrics.transfer_failed();
        warn!(transfer = %key, reason, "Transfer failed locally");
        Ok(Some(Message::TransferError(ticket.abort_message(reason))))
    }

    /// Remove a DONE or ERROR ticket from the table
    pub fn clear(&self, key: &TransferKey) -> Result<TransferTicket> {
        let mut tickets = self.lock()?;
        match tickets.get(key) {
            None => Err(ProtocolError::UnknownTransfer(key.transfer_id())),
            Some(t) if !t.stage().is_terminal() => {
                Err(ProtocolError::NotClearable(key.transfer_id()))
            }
            Some(_) => tickets
                .remove(key)
                .ok_or(ProtocolError::UnknownTransfer(key.transfer_id())),
        }
    }

    /// Copy of one ticket
    pub fn get(&self, key: &TransferKey) -> Result<TransferTicket> {
        let tickets = self.lock()?;
        tickets
            .get(key)
            .cloned()
            .ok_or(ProtocolError::UnknownTransfer(key.transfer_id()))
    }

    /// Copies of every ticket, ordered by sender then id
    pub fn tickets(&self) -> Result<Vec<TransferTicket>> {
        let tickets = self.lock()?;
        let mut all: Vec<TransferTicket> = tickets.values().cloned().collect();
        all.sort_by_key(TransferTicket::key);
        Ok(all)
    }

    /// Take the reassembled bytes of a completed incoming transfer
    pub fn take_received(&self, key: &TransferKey) -> Result<Bytes> {
        let mut tickets = self.lock()?;
        let ticket = Self::lookup(&mut tickets, key)?;
        ticket.take_received().ok_or(ProtocolError::IllegalTransition {
            from: ticket.stage(),
            to: TransferStage::Done,
        })
    }

    /// Apply one inbound transfer message.
    ///
    /// `Err` means no ticket was touched (unknown id, duplicate request, admission
    /// refused, not a transfer message). Stage violations on an existing ticket come
    /// back as `Ok` with [`Disposition::Discarded`].
    #[instrument(skip(self, message), fields(type_code = %message.type_code()))]
    pub fn apply(&self, message: &Message) -> Result<TransferUpdate> {
        let mut tickets = self.lock()?;
        match message {
            Message::TransferRequest(req) => match req.stage() {
                RequestStage::Request => self.apply_request(&mut tickets, req),
                RequestStage::Response(outcome) => {
                    let ticket = Self::ticket_mut(&mut tickets, req.header())?;
                    Ok(self.apply_response(ticket, outcome))
                }
            },
            Message::TransferData(segment) => {
                let ticket = Self::ticket_mut(&mut tickets, segment.header())?;
                Ok(self.apply_segment(ticket, segment))
            }
            Message::TransferError(end) => {
                let ticket = Self::ticket_mut(&mut tickets, end.header())?;
                Ok(self.apply_end(ticket, end))
            }
            other => Err(ProtocolError::UnexpectedMessage(other.type_code())),
        }
    }

    fn lookup<'a>(
        tickets: &'a mut HashMap<TransferKey, TransferTicket>,
        key: &TransferKey,
    ) -> Result<&'a mut TransferTicket> {
        tickets
            .get_mut(key)
            .ok_or(ProtocolError::UnknownTransfer(key.transfer_id()))
    }

    fn ticket_mut<'a>(
        tickets: &'a mut HashMap<TransferKey, TransferTicket>,
        header: &TransferHeader,
    ) -> Result<&'a mut TransferTicket> {
        let ticket = Self::lookup(tickets, &TransferKey::from(header))?;
        if ticket.header() != header {
            return Err(ProtocolError::NotAddressed(header.transfer_id()));
        }
        Ok(ticket)
    }

    fn apply_request(
        &self,
        tickets: &mut HashMap<TransferKey, TransferTicket>,
        req: &TransferRequest,
    ) -> Result<TransferUpdate> {
        let header = req.header();
        let key = TransferKey::from(header);
        if tickets.contains_key(&key) {
            return Err(ProtocolError::DuplicateTransfer(key.transfer_id()));
        }

        let role = match &self.local_name {
            Some(name) if name == header.receiver() => TicketRole::Receiver,
            Some(_) => return Err(ProtocolError::NotAddressed(key.transfer_id())),
            None => {
                self.admit(tickets, header.sender())?;
                TicketRole::Relay
            }
        };

        let ticket = TransferTicket::new(
            header.clone(),
            req.file_name(),
            req.file_size() as i64,
            role,
        )?;
        tickets.insert(key.clone(), ticket);
        self.metrics.transfer_started();
        info!(transfer = %key, receiver = header.receiver(), "Incoming transfer request");

        Ok(TransferUpdate {
            key,
            previous: TransferStage::Request,
            stage: TransferStage::Request,
            progress: 0.0,
            disposition: Disposition::Accepted,
            reply: None,
        })
    }

    fn apply_response(&self, ticket: &mut TransferTicket, outcome: Outcome) -> TransferUpdate {
        let previous = ticket.stage();
        if previous != TransferStage::Request || ticket.role() == TicketRole::Receiver {
            return self.discard(
                ticket,
                previous,
                ProtocolError::IllegalTransition {
                    from: previous,
                    to: TransferStage::ResponseToRequest,
                },
                false,
            );
        }

        let step = if outcome.is_success() {
            ticket.advance(TransferStage::ResponseToRequest).and_then(|_| {
                // Nothing to stream for an empty file; wait for the receiver's completion
                if ticket.plan().total() == 0 {
                    ticket.advance(TransferStage::TransEndResponse)
                } else {
                    Ok(())
                }
            })
        } else {
            ticket.fail("declined by receiver");
            self.metrics.transfer_failed();
            Ok(())
        };
        match step {
            Ok(()) => self.accepted(ticket, previous, None),
            Err(e) => self.discard(ticket, previous, e, true),
        }
    }

    fn apply_segment(&self, ticket: &mut TransferTicket, segment: &TransferSegment) -> TransferUpdate {
        let previous = ticket.stage();
        let transfer_id = ticket.transfer_id();
        if ticket.role() == TicketRole::Sender {
            return self.discard(
                ticket,
                previous,
                ProtocolError::UnexpectedMessage(TypeCode::FileTransferData),
                false,
            );
        }
        if previous.is_closing() {
            // In-flight segments after a cancel are expected
            return self.discard(ticket, previous, ProtocolError::TransferClosed(transfer_id), false);
        }

        if let Err(e) = ticket.record_segment(segment) {
            return self.discard(ticket, previous, e, true);
        }
        self.metrics.segment_received();

        if !segment.is_last() {
            return self.accepted(ticket, previous, None);
        }

        let finish = match ticket.role() {
            TicketRole::Receiver => TransferStage::Done,
            _ => TransferStage::TransEndResponse,
        };
        if let Err(e) = ticket.advance(finish) {
            return self.discard(ticket, previous, e, true);
        }
        if finish == TransferStage::Done {
            self.metrics.transfer_completed();
            info!(transfer = %ticket.key(), "Transfer complete");
            let reply = Message::TransferError(TransferEnd::completed(ticket.header().clone()));
            return self.accepted(ticket, previous, Some(reply));
        }
        self.accepted(ticket, previous, None)
    }

    fn apply_end(&self, ticket: &mut TransferTicket, end: &TransferEnd) -> TransferUpdate {
        let previous = ticket.stage();
        let transfer_id = ticket.transfer_id();
        if previous.is_terminal() {
            return self.discard(ticket, previous, ProtocolError::TransferClosed(transfer_id), false);
        }

        if end.outcome().is_success() {
            // Completion is only meaningful once every segment has gone out
            if previous != TransferStage::TransEndResponse
                || ticket.role() == TicketRole::Receiver
                || ticket.is_cancelled()
            {
                return self.discard(
                    ticket,
                    previous,
                    ProtocolError::IllegalTransition {
                        from: previous,
                        to: TransferStage::Done,
                    },
                    false,
                );
            }
            if let Err(e) = ticket.advance(TransferStage::Done) {
                return self.discard(ticket, previous, e, true);
            }
            self.metrics.transfer_completed();
            info!(transfer = %ticket.key(), "Transfer confirmed complete");
            return self.accepted(ticket, previous, None);
        }

        // Failure from the other side: cancel, abort, or confirmation of our own cancel.
        // An endpoint that did not start the teardown echoes the failure back so the
        // cancelling party can leave TRANS_END_RESPONSE.
        let confirm = ticket.role() != TicketRole::Relay && !ticket.is_cancelled();
        ticket.fail(if end.reason().is_empty() {
            "aborted by peer"
        } else {
            end.reason()
        });
        self.metrics.transfer_failed();
        debug!(transfer = %ticket.key(), reason = end.reason(), "Transfer ended by peer");
        let reply = confirm.then(|| Message::TransferError(ticket.abort_message(end.reason())));
        self.accepted(ticket, previous, reply)
    }

    fn accepted(
        &self,
        ticket: &TransferTicket,
        previous: TransferStage,
        reply: Option<Message>,
    ) -> TransferUpdate {
        TransferUpdate {
            key: ticket.key(),
            previous,
            stage: ticket.stage(),
            progress: ticket.progress(),
            disposition: Disposition::Accepted,
            reply,
        }
    }

    /// Drop an inbound message; with `poison` the ticket moves to ERROR and the
    /// remote party is told why
    fn discard(
        &self,
        ticket: &mut TransferTicket,
        previous: TransferStage,
        error: ProtocolError,
        poison: bool,
    ) -> TransferUpdate {
        self.metrics.state_violation();
        warn!(
            transfer = %ticket.key(),
            stage = ?previous,
            error = %error,
            "Discarding transfer message"
        );

        let mut reply = None;
        if poison && ticket.fail(error.to_string()) {
            self.metrics.transfer_failed();
            reply = Some(Message::TransferError(ticket.abort_message(&error.to_string())));
        }
        TransferUpdate {
            key: ticket.key(),
            previous,
            stage: ticket.stage(),
            progress: ticket.progress(),
            disposition: Disposition::Discarded(error),
            reply,
        }
    }
}
