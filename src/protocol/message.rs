//! # Message Catalog
//!
//! The closed set of messages carried by the envelope. Each variant of [`Message`]
//! owns exactly one payload shape and is keyed by a 4-byte ASCII [`TypeCode`].
//!
//! Field invariants are checked when a payload is constructed; once built a message is
//! immutable and [`Message::encode`] cannot fail. Decoding goes through an explicit
//! table from type code to payload decoder.
//!
//! Single-byte enumerations that are not load-bearing for the layout (login codes,
//! outcomes, punishment kinds and directions) decode unknown values into an
//! `Unknown(raw)` variant which re-encodes unchanged. Truncation always fails hard.

use crate::core::wire::{self, WireReader, TAG_LEN};
use crate::error::{constants, ProtocolError, Result};
use bytes::{Bytes, BytesMut};
use std::fmt;

/// Longest chat body kept after truncation, in characters
pub const MAX_BODY_CHARS: usize = 250;

/// Largest number of file bytes in one data segment
pub const MAX_SEGMENT_SIZE: usize = 32768;

/// Largest declarable file size
pub const MAX_FILE_SIZE: i64 = i32::MAX as i64;

/// Envelope type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Chat,
    PrivateChat,
    Connect,
    Disconnect,
    Login,
    AdminLogin,
    AdminPunish,
    AdminPunishRemove,
    AdminPunishList,
    FileTransferRequest,
    FileTransferData,
    FileTransferError,
    ServerNotice,
    UserList,
}

impl TypeCode {
    pub const ALL: [TypeCode; 14] = [
        TypeCode::Chat,
        TypeCode::PrivateChat,
        TypeCode::Connect,
        TypeCode::Disconnect,
        TypeCode::Login,
        TypeCode::AdminLogin,
        TypeCode::AdminPunish,
        TypeCode::AdminPunishRemove,
        TypeCode::AdminPunishList,
        TypeCode::FileTransferRequest,
        TypeCode::FileTransferData,
        TypeCode::FileTransferError,
        TypeCode::ServerNotice,
        TypeCode::UserList,
    ];

    /// The 4 ASCII bytes written on the wire
    pub const fn tag(self) -> &'static [u8; TAG_LEN] {
        match self {
            TypeCode::Chat => b"CHAT",
            TypeCode::PrivateChat => b"PMSG",
            TypeCode::Connect => b"CONN",
            TypeCode::Disconnect => b"DISC",
            TypeCode::Login => b"LOGN",
            TypeCode::AdminLogin => b"ALGN",
            TypeCode::AdminPunish => b"APUN",
            TypeCode::AdminPunishRemove => b"APRM",
            TypeCode::AdminPunishList => b"APLS",
            TypeCode::FileTransferRequest => b"FTRQ",
            TypeCode::FileTransferData => b"FTDT",
            TypeCode::FileTransferError => b"FTER",
            TypeCode::ServerNotice => b"NOTE",
            TypeCode::UserList => b"ULST",
        }
    }

    pub fn from_tag(tag: &[u8; TAG_LEN]) -> Option<Self> {
        TypeCode::ALL.into_iter().find(|code| code.tag() == tag)
    }

    pub fn as_str(self) -> &'static str {
        // Tags are ASCII literals
        std::str::from_utf8(self.tag()).unwrap_or("????")
    }

    /// True for the three file-transfer message kinds
    pub fn is_transfer(self) -> bool {
        matches!(
            self,
            TypeCode::FileTransferRequest
                | TypeCode::FileTransferData
                | TypeCode::FileTransferError
        )
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary outcome carried by admin and transfer messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failure,
    Unknown(u8),
}

impl Outcome {
    pub fn code(self) -> u8 {
        match self {
            Outcome::Success => 0x01,
            Outcome::Failure => 0x00,
            Outcome::Unknown(raw) => raw,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Outcome::Success,
            0x00 => Outcome::Failure,
            raw => Outcome::Unknown(raw),
        }
    }

    pub fn is_success(self) -> bool {
        self == Outcome::Success
    }
}

impl From<bool> for Outcome {
    fn from(ok: bool) -> Self {
        if ok {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

/// Classification of one login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoginCondition {
    Success,
    SuccessMuted,
    DuplicateLogin,
    IpBanned,
    UsernameTooLong,
    UsernameInvalidCharacters,
    UsernameInUse,
    ServerPasswordTooLong,
    ServerPasswordIncorrect,
    Unknown(u8),
}

impl LoginCondition {
    pub fn code(self) -> u8 {
        match self {
            LoginCondition::Success => 0,
            LoginCondition::SuccessMuted => 1,
            LoginCondition::DuplicateLogin => 2,
            LoginCondition::IpBanned => 3,
            LoginCondition::UsernameTooLong => 4,
            LoginCondition::UsernameInvalidCharacters => 5,
            LoginCondition::UsernameInUse => 6,
            LoginCondition::ServerPasswordTooLong => 7,
            LoginCondition::ServerPasswordIncorrect => 8,
            LoginCondition::Unknown(raw) => raw,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => LoginCondition::Success,
            1 => LoginCondition::SuccessMuted,
            2 => LoginCondition::DuplicateLogin,
            3 => LoginCondition::IpBanned,
            4 => LoginCondition::UsernameTooLong,
            5 => LoginCondition::UsernameInvalidCharacters,
            6 => LoginCondition::UsernameInUse,
            7 => LoginCondition::ServerPasswordTooLong,
            8 => LoginCondition::ServerPasswordIncorrect,
            raw => LoginCondition::Unknown(raw),
        }
    }

    /// Whether the client is admitted (possibly muted)
    pub fn is_success(self) -> bool {
        matches!(self, LoginCondition::Success | LoginCondition::SuccessMuted)
    }
}

/// Moderation sanction kinds, tagged with human-readable ASCII on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PunishmentKind {
    Kick,
    Mute,
    Ban,
    Unknown([u8; TAG_LEN]),
}

impl PunishmentKind {
    pub fn tag(&self) -> [u8; TAG_LEN] {
        match self {
            PunishmentKind::Kick => *b"KICK",
            PunishmentKind::Mute => *b"MUTE",
            PunishmentKind::Ban => *b"BANU",
            PunishmentKind::Unknown(raw) => *raw,
        }
    }

    pub fn from_tag(tag: [u8; TAG_LEN]) -> Self {
        match &tag {
            b"KICK" => PunishmentKind::Kick,
            b"MUTE" => PunishmentKind::Mute,
            b"BANU" => PunishmentKind::Ban,
            _ => PunishmentKind::Unknown(tag),
        }
    }
}

/// Whether a punishment is being applied or lifted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PunishmentDirection {
    Set,
    Remove,
    Unknown(u8),
}

impl PunishmentDirection {
    pub fn code(self) -> u8 {
        match self {
            PunishmentDirection::Set => 0x01,
            PunishmentDirection::Remove => 0x02,
            PunishmentDirection::Unknown(raw) => raw,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => PunishmentDirection::Set,
            0x02 => PunishmentDirection::Remove,
            raw => PunishmentDirection::Unknown(raw),
        }
    }
}

/// Cut `text` down to at most `max` characters
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

fn require_name(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ProtocolError::InvalidField(format!(
            "{field}: {}",
            constants::ERR_EMPTY_NAME
        )));
    }
    Ok(())
}

fn absent(field: &str) -> ProtocolError {
    ProtocolError::InvalidField(format!("{field}: {}", constants::ERR_ABSENT_VALUE))
}

/// Public chat line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    sender: String,
    body: String,
}

impl ChatMessage {
    /// Bodies beyond [`MAX_BODY_CHARS`] are truncated, not rejected.
    pub fn new(sender: impl Into<String>, body: &str) -> Result<Self> {
        let sender = sender.into();
        require_name("sender", &sender)?;
        Ok(Self {
            sender,
            body: truncate_chars(body, MAX_BODY_CHARS).to_string(),
        })
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Replace the body; an absent value is rejected and leaves the message unchanged
    pub fn set_body(&mut self, body: Option<&str>) -> Result<()> {
        let body = body.ok_or_else(|| absent("body"))?;
        self.body = truncate_chars(body, MAX_BODY_CHARS).to_string();
        Ok(())
    }
}

/// Chat line addressed to a single user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateChatMessage {
    sender: String,
    receiver: String,
    body: String,
}

impl PrivateChatMessage {
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, body: &str) -> Result<Self> {
        let sender = sender.into();
        let receiver = receiver.into();
        require_name("sender", &sender)?;
        require_name("receiver", &receiver)?;
        Ok(Self {
            sender,
            receiver,
            body: truncate_chars(body, MAX_BODY_CHARS).to_string(),
        })
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

/// Connect / disconnect notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    user: String,
}

impl Presence {
    pub fn new(user: impl Into<String>) -> Result<Self> {
        let user = user.into();
        require_name("user", &user)?;
        Ok(Self { user })
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

/// Snapshot of connected users; the recipient is implicit
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserList {
    users: Vec<String>,
}

impl UserList {
    pub fn new<I, S>(users: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let users: Vec<String> = users.into_iter().map(Into::into).collect();
        for user in &users {
            require_name("user", user)?;
        }
        Ok(Self { users })
    }

    pub fn users(&self) -> &[String] {
        &self.users
    }
}

/// Server-originated error or notice text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNotice {
    body: String,
}

impl ServerNotice {
    /// Bodies longer than [`MAX_BODY_CHARS`] fail to construct.
    pub fn new(body: impl Into<String>) -> Result<Self> {
        let body = body.into();
        let len = body.chars().count();
        if len > MAX_BODY_CHARS {
            return Err(ProtocolError::BodyTooLong {
                len,
                max: MAX_BODY_CHARS,
            });
        }
        Ok(Self { body })
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Replace the body; absent or over-long values leave the notice unchanged
    pub fn set_body(&mut self, body: Option<&str>) -> Result<()> {
        let body = body.ok_or_else(|| absent("body"))?;
        *self = ServerNotice::new(body)?;
        Ok(())
    }
}

/// Admin punishment request or commit response.
///
/// The target IP travels only for removals; applications leave it for the server
/// to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminPunishment {
    kind: PunishmentKind,
    direction: PunishmentDirection,
    admin: String,
    target: String,
    target_ip: Option<String>,
    outcome: Outcome,
}

impl AdminPunishment {
    /// Request to apply a punishment. The outcome starts as `Failure` until committed.
    pub fn set(
        kind: PunishmentKind,
        admin: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<Self> {
        Self::build(kind, PunishmentDirection::Set, admin.into(), target.into(), None)
    }

    /// Request to lift a punishment from `target` at `target_ip`
    pub fn remove(
        kind: PunishmentKind,
        admin: impl Into<String>,
        target: impl Into<String>,
        target_ip: impl Into<String>,
    ) -> Result<Self> {
        Self::build(
            kind,
            PunishmentDirection::Remove,
            admin.into(),
            target.into(),
            Some(target_ip.into()),
        )
    }

    fn build(
        kind: PunishmentKind,
        direction: PunishmentDirection,
        admin: String,
        target: String,
        target_ip: Option<String>,
    ) -> Result<Self> {
        if let PunishmentKind::Unknown(tag) = kind {
            return Err(ProtocolError::InvalidField(format!(
                "unknown punishment kind {tag:?}"
            )));
        }
        match (direction, &target_ip) {
            (PunishmentDirection::Set, Some(_)) => {
                return Err(ProtocolError::InvalidField(
                    constants::ERR_UNEXPECTED_SET_IP.to_string(),
                ))
            }
            (PunishmentDirection::Remove, None) => {
                return Err(ProtocolError::InvalidField(
                    constants::ERR_MISSING_REMOVAL_IP.to_string(),
                ))
            }
            (PunishmentDirection::Unknown(_), _) => {
                return Err(ProtocolError::InvalidField(
                    constants::ERR_UNSET_DIRECTION.to_string(),
                ))
            }
            _ => {}
        }
        require_name("admin", &admin)?;
        require_name("target", &target)?;
        Ok(Self {
            kind,
            direction,
            admin,
            target,
            target_ip,
            outcome: Outcome::Failure,
        })
    }

    /// Same request carrying the server's commit outcome
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn kind(&self) -> PunishmentKind {
        self.kind
    }

    pub fn direction(&self) -> PunishmentDirection {
        self.direction
    }

    pub fn admin(&self) -> &str {
        &self.admin
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn target_ip(&self) -> Option<&str> {
        self.target_ip.as_deref()
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    fn type_code(&self) -> TypeCode {
        if self.target_ip.is_some() {
            TypeCode::AdminPunishRemove
        } else {
            TypeCode::AdminPunish
        }
    }
}

/// One row of the punished-user snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PunishmentEntry {
    pub target: String,
    pub target_ip: String,
    pub kind: PunishmentKind,
}

/// Prefix shared by the three file-transfer messages
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferHeader {
    transfer_id: i32,
    sender: String,
    receiver: String,
}

impl TransferHeader {
    pub fn new(transfer_id: i32, sender: impl Into<String>, receiver: impl Into<String>) -> Result<Self> {
        let sender = sender.into();
        let receiver = receiver.into();
        require_name("sender", &sender)?;
        require_name("receiver", &receiver)?;
        if sender == receiver {
            return Err(ProtocolError::SameParty);
        }
        Ok(Self {
            transfer_id,
            sender,
            receiver,
        })
    }

    pub fn transfer_id(&self) -> i32 {
        self.transfer_id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    fn encode(&self, dst: &mut BytesMut) {
        wire::put_i32(dst, self.transfer_id);
        wire::put_string(dst, &self.sender);
        wire::put_string(dst, &self.receiver);
    }

    fn decode(src: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            transfer_id: src.read_i32()?,
            sender: src.read_string()?,
            receiver: src.read_string()?,
        })
    }
}

/// Which half of the request exchange a [`TransferRequest`] is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStage {
    Request,
    Response(Outcome),
}

impl RequestStage {
    const REQUEST: u8 = 0x01;
    const RESPONSE: u8 = 0x02;
}

/// Offer of a file, or the receiver's answer to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    header: TransferHeader,
    file_name: String,
    file_size: i32,
    stage: RequestStage,
}

impl TransferRequest {
    /// `file_size` must lie in `0..=i32::MAX`.
    pub fn new(header: TransferHeader, file_name: impl Into<String>, file_size: i64) -> Result<Self> {
        if !(0..=MAX_FILE_SIZE).contains(&file_size) {
            return Err(ProtocolError::InvalidFileSize(file_size));
        }
        let file_name = file_name.into();
        require_name("file_name", &file_name)?;
        Ok(Self {
            header,
            file_name,
            file_size: file_size as i32,
            stage: RequestStage::Request,
        })
    }

    /// The receiver's answer to this request
    pub fn respond(&self, outcome: Outcome) -> Self {
        Self {
            stage: RequestStage::Response(outcome),
            ..self.clone()
        }
    }

    pub fn header(&self) -> &TransferHeader {
        &self.header
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_size(&self) -> i32 {
        self.file_size
    }

    pub fn stage(&self) -> RequestStage {
        self.stage
    }
}

/// One bounded chunk of file bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSegment {
    header: TransferHeader,
    index: i32,
    total: i32,
    data: Bytes,
}

impl TransferSegment {
    /// `index` is 1-based and must not exceed `total`; `data` holds at most
    /// [`MAX_SEGMENT_SIZE`] bytes.
    pub fn new(header: TransferHeader, index: i32, total: i32, data: Bytes) -> Result<Self> {
        if index < 1 || index > total {
            return Err(ProtocolError::InvalidSegmentIndex { index, total });
        }
        if data.len() > MAX_SEGMENT_SIZE {
            return Err(ProtocolError::InvalidSegmentSize(data.len() as i64));
        }
        Ok(Self {
            header,
            index,
            total,
            data,
        })
    }

    pub fn header(&self) -> &TransferHeader {
        &self.header
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    pub fn total(&self) -> i32 {
        self.total
    }

    /// Declared size of this segment
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn is_last(&self) -> bool {
        self.index == self.total
    }
}

/// Early termination or end-of-transfer acknowledgement.
///
/// `Success` confirms the receiver holds the whole file; `Failure` cancels or aborts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEnd {
    header: TransferHeader,
    outcome: Outcome,
    reason: String,
}

impl TransferEnd {
    pub fn completed(header: TransferHeader) -> Self {
        Self {
            header,
            outcome: Outcome::Success,
            reason: String::new(),
        }
    }

    pub fn aborted(header: TransferHeader, reason: &str) -> Self {
        Self {
            header,
            outcome: Outcome::Failure,
            reason: truncate_chars(reason, MAX_BODY_CHARS).to_string(),
        }
    }

    pub fn header(&self) -> &TransferHeader {
        &self.header
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Every message the protocol carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Chat(ChatMessage),
    PrivateChat(PrivateChatMessage),
    Connect(Presence),
    Disconnect(Presence),
    Login(LoginCondition),
    AdminLogin(Outcome),
    AdminPunish(AdminPunishment),
    AdminPunishList(Vec<PunishmentEntry>),
    TransferRequest(TransferRequest),
    TransferData(TransferSegment),
    TransferError(TransferEnd),
    ServerNotice(ServerNotice),
    UserList(UserList),
}

type DecodeFn = fn(&mut WireReader<'_>) -> Result<Message>;

impl Message {
    pub fn type_code(&self) -> TypeCode {
        match self {
            Message::Chat(_) => TypeCode::Chat,
            Message::PrivateChat(_) => TypeCode::PrivateChat,
            Message::Connect(_) => TypeCode::Connect,
            Message::Disconnect(_) => TypeCode::Disconnect,
            Message::Login(_) => TypeCode::Login,
            Message::AdminLogin(_) => TypeCode::AdminLogin,
            Message::AdminPunish(p) => p.type_code(),
            Message::AdminPunishList(_) => TypeCode::AdminPunishList,
            Message::TransferRequest(_) => TypeCode::FileTransferRequest,
            Message::TransferData(_) => TypeCode::FileTransferData,
            Message::TransferError(_) => TypeCode::FileTransferError,
            Message::ServerNotice(_) => TypeCode::ServerNotice,
            Message::UserList(_) => TypeCode::UserList,
        }
    }

    /// Shared transfer prefix, for the three file-transfer variants
    pub fn transfer_header(&self) -> Option<&TransferHeader> {
        match self {
            Message::TransferRequest(m) => Some(m.header()),
            Message::TransferData(m) => Some(m.header()),
            Message::TransferError(m) => Some(m.header()),
            _ => None,
        }
    }

    /// Append the encoded envelope to `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        wire::put_tag(dst, self.type_code().tag());
        match self {
            Message::Chat(m) => {
                wire::put_string(dst, &m.sender);
                wire::put_string(dst, &m.body);
            }
            Message::PrivateChat(m) => {
                wire::put_string(dst, &m.sender);
                wire::put_string(dst, &m.receiver);
                wire::put_string(dst, &m.body);
            }
            Message::Connect(m) | Message::Disconnect(m) => wire::put_string(dst, &m.user),
            Message::Login(condition) => wire::put_u8(dst, condition.code()),
            Message::AdminLogin(validity) => wire::put_u8(dst, validity.code()),
            Message::AdminPunish(m) => {
                wire::put_tag(dst, &m.kind.tag());
                wire::put_u8(dst, m.direction.code());
                wire::put_string(dst, &m.admin);
                wire::put_string(dst, &m.target);
                if let Some(ip) = &m.target_ip {
                    wire::put_string(dst, ip);
                }
                wire::put_u8(dst, m.outcome.code());
            }
            Message::AdminPunishList(entries) => {
                wire::put_i32(dst, entries.len() as i32);
                for entry in entries {
                    wire::put_string(dst, &entry.target);
                    wire::put_string(dst, &entry.target_ip);
                    wire::put_tag(dst, &entry.kind.tag());
                }
            }
            Message::TransferRequest(m) => {
                m.header.encode(dst);
                match m.stage {
                    RequestStage::Request => wire::put_u8(dst, RequestStage::REQUEST),
                    RequestStage::Response(_) => wire::put_u8(dst, RequestStage::RESPONSE),
                }
                wire::put_string(dst, &m.file_name);
                wire::put_i32(dst, m.file_size);
                if let RequestStage::Response(outcome) = m.stage {
                    wire::put_u8(dst, outcome.code());
                }
            }
            Message::TransferData(m) => {
                m.header.encode(dst);
                wire::put_i32(dst, m.index);
                wire::put_i32(dst, m.total);
                wire::put_i32(dst, m.data.len() as i32);
                dst.extend_from_slice(&m.data);
            }
            Message::TransferError(m) => {
                m.header.encode(dst);
                wire::put_u8(dst, m.outcome.code());
                wire::put_string(dst, &m.reason);
            }
            Message::ServerNotice(m) => wire::put_string(dst, &m.body),
            Message::UserList(m) => {
                wire::put_i32(dst, m.users.len() as i32);
                for user in &m.users {
                    wire::put_string(dst, user);
                }
            }
        }
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode(&mut dst);
        dst.freeze()
    }

    /// Decode exactly one message occupying all of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Message> {
        let (message, consumed) = Self::decode_prefix(bytes).map_err(|e| match e {
            ProtocolError::Truncated => {
                ProtocolError::MalformedMessage(constants::ERR_INCOMPLETE.to_string())
            }
            other => other,
        })?;
        if consumed != bytes.len() {
            return Err(ProtocolError::MalformedMessage(format!(
                "{}: {}",
                constants::ERR_TRAILING_BYTES,
                bytes.len() - consumed
            )));
        }
        Ok(message)
    }

    /// Decode one message from the front of `bytes`, returning it with the number of
    /// bytes it occupied
    pub fn decode_prefix(bytes: &[u8]) -> Result<(Message, usize)> {
        let mut reader = WireReader::new(bytes);
        let tag = reader.read_tag()?;
        let code = TypeCode::from_tag(&tag).ok_or(ProtocolError::UnknownTypeCode(tag))?;
        let message = decoder_for(code)(&mut reader)?;
        Ok((message, reader.position()))
    }
}

fn decoder_for(code: TypeCode) -> DecodeFn {
    match code {
        TypeCode::Chat => decode_chat,
        TypeCode::PrivateChat => decode_private_chat,
        TypeCode::Connect => |r| Ok(Message::Connect(decode_presence(r)?)),
        TypeCode::Disconnect => |r| Ok(Message::Disconnect(decode_presence(r)?)),
        TypeCode::Login => |r| Ok(Message::Login(LoginCondition::from_code(r.read_u8()?))),
        TypeCode::AdminLogin => |r| Ok(Message::AdminLogin(Outcome::from_code(r.read_u8()?))),
        TypeCode::AdminPunish => |r| decode_punishment(r, false),
        TypeCode::AdminPunishRemove => |r| decode_punishment(r, true),
        TypeCode::AdminPunishList => decode_punishment_list,
        TypeCode::FileTransferRequest => decode_transfer_request,
        TypeCode::FileTransferData => decode_transfer_data,
        TypeCode::FileTransferError => decode_transfer_error,
        TypeCode::ServerNotice => |r| Ok(Message::ServerNotice(ServerNotice { body: r.read_string()? })),
        TypeCode::UserList => decode_user_list,
    }
}

fn decode_chat(r: &mut WireReader<'_>) -> Result<Message> {
    Ok(Message::Chat(ChatMessage {
        sender: r.read_string()?,
        body: r.read_string()?,
    }))
}

fn decode_private_chat(r: &mut WireReader<'_>) -> Result<Message> {
    Ok(Message::PrivateChat(PrivateChatMessage {
        sender: r.read_string()?,
        receiver: r.read_string()?,
        body: r.read_string()?,
    }))
}

fn decode_presence(r: &mut WireReader<'_>) -> Result<Presence> {
    Ok(Presence {
        user: r.read_string()?,
    })
}

/// Read an element count; each element needs at least `min_element` bytes, so a
/// count the remaining input cannot hold is reported as truncation up front
fn read_count(r: &mut WireReader<'_>, min_element: usize) -> Result<usize> {
    let count = r.read_len()?;
    if count.saturating_mul(min_element) > r.remaining() {
        return Err(ProtocolError::Truncated);
    }
    Ok(count)
}

fn decode_user_list(r: &mut WireReader<'_>) -> Result<Message> {
    let count = read_count(r, wire::INT_LEN)?;
    let mut users = Vec::with_capacity(count);
    for _ in 0..count {
        users.push(r.read_string()?);
    }
    Ok(Message::UserList(UserList { users }))
}

fn decode_punishment(r: &mut WireReader<'_>, removal: bool) -> Result<Message> {
    let kind = PunishmentKind::from_tag(r.read_tag()?);
    let direction = PunishmentDirection::from_code(r.read_u8()?);
    let conflicting = if removal {
        direction == PunishmentDirection::Set
    } else {
        direction == PunishmentDirection::Remove
    };
    if conflicting {
        return Err(ProtocolError::MalformedMessage(format!(
            "direction {direction:?} contradicts type code"
        )));
    }
    let admin = r.read_string()?;
    let target = r.read_string()?;
    let target_ip = if removal { Some(r.read_string()?) } else { None };
    let outcome = Outcome::from_code(r.read_u8()?);
    Ok(Message::AdminPunish(AdminPunishment {
        kind,
        direction,
        admin,
        target,
        target_ip,
        outcome,
    }))
}

fn decode_punishment_list(r: &mut WireReader<'_>) -> Result<Message> {
    let count = read_count(r, 2 * wire::INT_LEN + TAG_LEN)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(PunishmentEntry {
            target: r.read_string()?,
            target_ip: r.read_string()?,
            kind: PunishmentKind::from_tag(r.read_tag()?),
        });
    }
    Ok(Message::AdminPunishList(entries))
}

fn decode_transfer_request(r: &mut WireReader<'_>) -> Result<Message> {
    let header = TransferHeader::decode(r)?;
    let stage_code = r.read_u8()?;
    let file_name = r.read_string()?;
    let file_size = r.read_i32()?;
    if file_size < 0 {
        return Err(ProtocolError::MalformedMessage(format!(
            "negative file size {file_size}"
        )));
    }
    let stage = match stage_code {
        RequestStage::REQUEST => RequestStage::Request,
        RequestStage::RESPONSE => RequestStage::Response(Outcome::from_code(r.read_u8()?)),
        other => {
            return Err(ProtocolError::MalformedMessage(format!(
                "unknown request stage {other}"
            )))
        }
    };
    Ok(Message::TransferRequest(TransferRequest {
        header,
        file_name,
        file_size,
        stage,
    }))
}

fn decode_transfer_data(r: &mut WireReader<'_>) -> Result<Message> {
    let header = TransferHeader::decode(r)?;
    let index = r.read_i32()?;
    let total = r.read_i32()?;
    let size = r.read_len()?;
    // Oversized segments are left for the transfer state machine to reject
    let data = Bytes::copy_from_slice(r.read_bytes(size)?);
    Ok(Message::TransferData(TransferSegment {
        header,
        index,
        total,
        data,
    }))
}

fn decode_transfer_error(r: &mut WireReader<'_>) -> Result<Message> {
    let header = TransferHeader::decode(r)?;
    let outcome = Outcome::from_code(r.read_u8()?);
    let reason = r.read_string()?;
    Ok(Message::TransferError(TransferEnd {
        header,
        outcome,
        reason,
    }))
}
