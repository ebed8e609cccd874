//! # Session and Admin Protocol
//!
//! Login classification and the admin moderation request/commit exchange.
//!
//! ## Login
//! [`classify_login`] maps the server's validation results onto exactly one
//! [`LoginCondition`]. The first failed check wins, in this fixed order:
//!
//! ```text
//! duplicate login > IP ban > username length > username characters
//!     > username in use > password length > password correctness
//! ```
//!
//! ## Moderation
//! An admin asks for a punishment to be set or removed; the server answers with the
//! same message carrying a commit outcome. A failed commit leaves the
//! [`PunishmentDirectory`] untouched.

use crate::config::ServerConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{
    AdminPunishment, LoginCondition, Message, Outcome, PunishmentDirection, PunishmentEntry,
    PunishmentKind,
};
use crate::utils::metrics::Metrics;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument, warn};

/// Results of the server's individual login checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoginChecks {
    pub already_logged_in: bool,
    pub ip_banned: bool,
    pub username_too_long: bool,
    pub username_invalid_characters: bool,
    pub username_in_use: bool,
    pub password_too_long: bool,
    pub password_incorrect: bool,
    pub muted: bool,
}

/// Collapse the checks into a single outcome, first failure in priority order
pub fn classify_login(checks: &LoginChecks) -> LoginCondition {
    let failures = [
        (checks.already_logged_in, LoginCondition::DuplicateLogin),
        (checks.ip_banned, LoginCondition::IpBanned),
        (checks.username_too_long, LoginCondition::UsernameTooLong),
        (
            checks.username_invalid_characters,
            LoginCondition::UsernameInvalidCharacters,
        ),
        (checks.username_in_use, LoginCondition::UsernameInUse),
        (checks.password_too_long, LoginCondition::ServerPasswordTooLong),
        (checks.password_incorrect, LoginCondition::ServerPasswordIncorrect),
    ];

    failures
        .into_iter()
        .find_map(|(failed, condition)| failed.then_some(condition))
        .unwrap_or(if checks.muted {
            LoginCondition::SuccessMuted
        } else {
            LoginCondition::Success
        })
}

/// One incoming login as seen by the server
#[derive(Debug, Clone)]
pub struct LoginAttempt<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub ip: &'a str,
    /// This connection already completed a login
    pub already_logged_in: bool,
}

/// Usernames: ASCII letters, digits, `_` and `-`
pub fn is_valid_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Evaluates login attempts against server settings and current state
#[derive(Debug, Clone)]
pub struct LoginPolicy {
    max_username_len: usize,
    max_password_len: usize,
    server_password: Option<String>,
}

impl LoginPolicy {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            max_username_len: config.max_username_len,
            max_password_len: config.max_password_len,
            server_password: config.server_password.clone(),
        }
    }

    /// Run every check; `online` answers whether a username is taken
    pub fn checks<F>(
        &self,
        attempt: &LoginAttempt<'_>,
        directory: &dyn PunishmentDirectory,
        online: F,
    ) -> Result<LoginChecks>
    where
        F: Fn(&str) -> bool,
    {
        Ok(LoginChecks {
            already_logged_in: attempt.already_logged_in,
            ip_banned: directory.is_ip_banned(attempt.ip)?,
            username_too_long: attempt.username.chars().count() > self.max_username_len,
            username_invalid_characters: attempt.username.is_empty()
                || !attempt.username.chars().all(is_valid_username_char),
            username_in_use: online(attempt.username),
            password_too_long: attempt.password.chars().count() > self.max_password_len,
            password_incorrect: self
                .server_password
                .as_deref()
                .is_some_and(|expected| expected != attempt.password),
            muted: directory.is_punished(attempt.username, PunishmentKind::Mute)?,
        })
    }

    /// Classify an attempt and build the reply
    #[instrument(skip(self, attempt, directory, online), fields(username = attempt.username))]
    pub fn evaluate<F>(
        &self,
        attempt: &LoginAttempt<'_>,
        directory: &dyn PunishmentDirectory,
        online: F,
    ) -> Result<Message>
    where
        F: Fn(&str) -> bool,
    {
        let condition = classify_login(&self.checks(attempt, directory, online)?);
        if condition.is_success() {
            info!(?condition, "Login accepted");
        } else {
            debug!(?condition, "Login refused");
        }
        Ok(Message::Login(condition))
    }
}

/// A committed punishment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PunishmentRecord {
    pub target: String,
    pub target_ip: String,
    pub kind: PunishmentKind,
}

impl From<PunishmentRecord> for PunishmentEntry {
    fn from(record: PunishmentRecord) -> Self {
        PunishmentEntry {
            target: record.target,
            target_ip: record.target_ip,
            kind: record.kind,
        }
    }
}

/// Store of active punishments, supplied by the persistence collaborator
pub trait PunishmentDirectory: Send + Sync {
    /// Record a punishment. Returns false if an identical one already exists.
    fn insert(&self, record: PunishmentRecord) -> Result<bool>;

    /// Lift the `kind` punishment on `target`. Returns the removed record, if any.
    fn remove(&self, target: &str, kind: PunishmentKind) -> Result<Option<PunishmentRecord>>;

    fn is_punished(&self, target: &str, kind: PunishmentKind) -> Result<bool>;

    fn is_ip_banned(&self, ip: &str) -> Result<bool>;

    /// Every active punishment
    fn snapshot(&self) -> Result<Vec<PunishmentRecord>>;
}

/// In-memory [`PunishmentDirectory`]
#[derive(Debug, Default)]
pub struct InMemoryPunishmentDirectory {
    records: RwLock<HashMap<(String, PunishmentKind), PunishmentRecord>>,
}

impl InMemoryPunishmentDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PunishmentDirectory for InMemoryPunishmentDirectory {
    fn insert(&self, record: PunishmentRecord) -> Result<bool> {
        let mut records = self
            .records
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_DIRECTORY_LOCK))?;
        let key = (record.target.clone(), record.kind);
        if records.contains_key(&key) {
            return Ok(false);
        }
        records.insert(key, record);
        Ok(true)
    }

    fn remove(&self, target: &str, kind: PunishmentKind) -> Result<Option<PunishmentRecord>> {
        let mut records = self
            .records
            .write()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_DIRECTORY_LOCK))?;
        Ok(records.remove(&(target.to_string(), kind)))
    }

    fn is_punished(&self, target: &str, kind: PunishmentKind) -> Result<bool> {
        let records = self
            .records
            .read()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_DIRECTORY_LOCK))?;
        Ok(records.contains_key(&(target.to_string(), kind)))
    }

    fn is_ip_banned(&self, ip: &str) -> Result<bool> {
        let records = self
            .records
            .read()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_DIRECTORY_LOCK))?;
        Ok(records
            .values()
            .any(|r| r.kind == PunishmentKind::Ban && !r.target_ip.is_empty() && r.target_ip == ip))
    }

    fn snapshot(&self) -> Result<Vec<PunishmentRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| ProtocolError::LockPoisoned(constants::ERR_DIRECTORY_LOCK))?;
        let mut all: Vec<PunishmentRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.target.cmp(&b.target).then(a.kind.tag().cmp(&b.kind.tag())));
        Ok(all)
    }
}

/// Admin login state held per connection. Only a settled state reaches the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdminLoginState {
    #[default]
    NotAttempted,
    Success,
    Failure,
}

impl AdminLoginState {
    /// Wire validity, or `None` while no attempt has been made
    pub fn validity(self) -> Option<Outcome> {
        match self {
            AdminLoginState::NotAttempted => None,
            AdminLoginState::Success => Some(Outcome::Success),
            AdminLoginState::Failure => Some(Outcome::Failure),
        }
    }
}

/// Server-side moderation for one admin connection
pub struct AdminSession {
    admin_password: Option<String>,
    state: AdminLoginState,
    directory: Arc<dyn PunishmentDirectory>,
    metrics: Arc<Metrics>,
}

impl AdminSession {
    pub fn new(config: &ServerConfig, directory: Arc<dyn PunishmentDirectory>) -> Self {
        Self {
            admin_password: config.admin_password.clone(),
            state: AdminLoginState::NotAttempted,
            directory,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Share an existing metrics collector
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn state(&self) -> AdminLoginState {
        self.state
    }

    /// Check an admin password and reply with the validity
    pub fn login(&mut self, password: &str) -> Message {
        let ok = self
            .admin_password
            .as_deref()
            .is_some_and(|expected| expected == password);
        self.state = if ok {
            AdminLoginState::Success
        } else {
            AdminLoginState::Failure
        };
        info!(success = ok, "Admin login attempt");
        Message::AdminLogin(Outcome::from(ok))
    }

    /// Commit a punishment request and build the response.
    ///
    /// `resolve_ip` maps a connected username to its address; applying a punishment
    /// to a user that cannot be resolved fails.
    #[instrument(skip(self, request, resolve_ip), fields(target = request.target(), kind = ?request.kind()))]
    pub fn commit<F>(&self, request: &AdminPunishment, resolve_ip: F) -> Result<Message>
    where
        F: Fn(&str) -> Option<String>,
    {
        let committed = if self.state != AdminLoginState::Success {
            warn!(admin = request.admin(), "Punishment requested without admin login");
            false
        } else {
            self.apply(request, resolve_ip)?
        };

        if committed {
            self.metrics.punishment_committed();
        } else {
            self.metrics.punishment_rejected();
        }
        Ok(Message::AdminPunish(
            request.clone().with_outcome(Outcome::from(committed)),
        ))
    }

    fn apply<F>(&self, request: &AdminPunishment, resolve_ip: F) -> Result<bool>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let PunishmentKind::Unknown(_) = request.kind() {
            return Ok(false);
        }
        match request.direction() {
            PunishmentDirection::Set => {
                let Some(target_ip) = resolve_ip(request.target()) else {
                    debug!("Punishment target not connected");
                    return Ok(false);
                };
                self.directory.insert(PunishmentRecord {
                    target: request.target().to_string(),
                    target_ip,
                    kind: request.kind(),
                })
            }
            PunishmentDirection::Remove => Ok(self
                .directory
                .remove(request.target(), request.kind())?
                .is_some()),
            PunishmentDirection::Unknown(_) => Ok(false),
        }
    }

    /// Current punishments as a list snapshot
    pub fn punishment_list(&self) -> Result<Message> {
        let entries = self
            .directory
            .snapshot()?
            .into_iter()
            .map(PunishmentEntry::from)
            .collect();
        Ok(Message::AdminPunishList(entries))
    }
}
