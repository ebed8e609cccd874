//! Session and moderation behaviour through the public API, plus a dispatcher
//! wired the way a relay server routes inbound traffic

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use relay_chat_protocol::config::{ServerConfig, TransferConfig};
use relay_chat_protocol::protocol::dispatcher::Dispatcher;
use relay_chat_protocol::protocol::message::{
    AdminPunishment, ChatMessage, LoginCondition, Message, Outcome, PunishmentKind, TypeCode,
};
use relay_chat_protocol::protocol::registry::TransferRegistry;
use relay_chat_protocol::protocol::session::{
    classify_login, is_valid_username_char, AdminLoginState, AdminSession,
    InMemoryPunishmentDirectory, LoginAttempt, LoginChecks, LoginPolicy, PunishmentDirectory,
};
use relay_chat_protocol::protocol::transfer::TransferStage;
use relay_chat_protocol::utils::metrics::Metrics;
use relay_chat_protocol::ProtocolError;
use std::path::PathBuf;
use std::sync::Arc;

fn admin_config() -> ServerConfig {
    ServerConfig {
        admin_password: Some("sudo".to_string()),
        ..ServerConfig::default()
    }
}

#[test]
fn test_login_priority_table() {
    let all = LoginChecks {
        already_logged_in: true,
        ip_banned: true,
        username_too_long: true,
        username_invalid_characters: true,
        username_in_use: true,
        password_too_long: true,
        password_incorrect: true,
        muted: true,
    };
    let order = [
        LoginCondition::DuplicateLogin,
        LoginCondition::IpBanned,
        LoginCondition::UsernameTooLong,
        LoginCondition::UsernameInvalidCharacters,
        LoginCondition::UsernameInUse,
        LoginCondition::ServerPasswordTooLong,
        LoginCondition::ServerPasswordIncorrect,
        LoginCondition::SuccessMuted,
    ];

    // Clear failures one at a time, highest priority first
    let mut checks = all;
    for (step, expected) in order.iter().enumerate() {
        assert_eq!(classify_login(&checks), *expected, "step {step}");
        match step {
            0 => checks.already_logged_in = false,
            1 => checks.ip_banned = false,
            2 => checks.username_too_long = false,
            3 => checks.username_invalid_characters = false,
            4 => checks.username_in_use = false,
            5 => checks.password_too_long = false,
            6 => checks.password_incorrect = false,
            _ => {}
        }
    }
}

#[test]
fn test_username_rules() {
    assert!("ok_name-1".chars().all(is_valid_username_char));
    assert!(!"sp ace".chars().all(is_valid_username_char));
    assert!(!"émile".chars().all(is_valid_username_char));

    let policy = LoginPolicy::new(&ServerConfig::default());
    let directory = InMemoryPunishmentDirectory::new();
    let attempt = LoginAttempt {
        username: "a_name_that_is_21_chr",
        password: "",
        ip: "127.0.0.1",
        already_logged_in: false,
    };
    let checks = policy.checks(&attempt, &directory, |_| false).unwrap();
    assert!(checks.username_too_long);
    assert!(!checks.password_incorrect);
}

#[test]
fn test_password_too_long_before_incorrect() {
    let config = ServerConfig {
        server_password: Some("pw".to_string()),
        ..ServerConfig::default()
    };
    let policy = LoginPolicy::new(&config);
    let directory = InMemoryPunishmentDirectory::new();
    let long = "p".repeat(33);
    let attempt = LoginAttempt {
        username: "zed",
        password: &long,
        ip: "127.0.0.1",
        already_logged_in: false,
    };
    assert_eq!(
        policy.evaluate(&attempt, &directory, |_| false).unwrap(),
        Message::Login(LoginCondition::ServerPasswordTooLong)
    );
}

#[test]
fn test_admin_state_starts_unattempted() {
    let directory = Arc::new(InMemoryPunishmentDirectory::new());
    let mut session = AdminSession::new(&admin_config(), directory);
    assert_eq!(session.state(), AdminLoginState::NotAttempted);
    assert_eq!(session.state().validity(), None);

    session.login("sudo");
    assert_eq!(session.state().validity(), Some(Outcome::Success));
}

#[test]
fn test_admin_disabled_without_password() {
    let directory = Arc::new(InMemoryPunishmentDirectory::new());
    let mut session = AdminSession::new(&ServerConfig::default(), directory);
    assert_eq!(session.login(""), Message::AdminLogin(Outcome::Failure));
    assert_eq!(session.state(), AdminLoginState::Failure);
}

#[test]
fn test_muted_user_logs_in_muted_and_ban_blocks_address() {
    let directory: Arc<dyn PunishmentDirectory> = Arc::new(InMemoryPunishmentDirectory::new());
    let metrics = Arc::new(Metrics::new());
    let mut admin =
        AdminSession::new(&admin_config(), Arc::clone(&directory)).with_metrics(Arc::clone(&metrics));
    admin.login("sudo");

    let resolve = |user: &str| match user {
        "troll" => Some("192.168.1.50".to_string()),
        _ => None,
    };
    for kind in [PunishmentKind::Mute, PunishmentKind::Ban] {
        let request = AdminPunishment::set(kind, "root", "troll").unwrap();
        let reply = admin.commit(&request, resolve).unwrap();
        assert!(matches!(reply, Message::AdminPunish(p) if p.outcome().is_success()));
    }
    assert_eq!(metrics.snapshot().punishments_committed, 2);

    let policy = LoginPolicy::new(&ServerConfig::default());
    let from = |ip| LoginAttempt {
        username: "troll",
        password: "",
        ip,
        already_logged_in: false,
    };
    assert_eq!(
        policy.evaluate(&from("192.168.1.50"), directory.as_ref(), |_| false).unwrap(),
        Message::Login(LoginCondition::IpBanned)
    );
    assert_eq!(
        policy.evaluate(&from("10.1.1.1"), directory.as_ref(), |_| false).unwrap(),
        Message::Login(LoginCondition::SuccessMuted)
    );

    // Lifting the ban restores the address
    let lift = AdminPunishment::remove(PunishmentKind::Ban, "root", "troll", "192.168.1.50").unwrap();
    admin.commit(&lift, resolve).unwrap();
    assert_eq!(
        policy.evaluate(&from("192.168.1.50"), directory.as_ref(), |_| false).unwrap(),
        Message::Login(LoginCondition::SuccessMuted)
    );
}

#[test]
fn test_punishment_list_survives_the_wire() {
    let directory: Arc<dyn PunishmentDirectory> = Arc::new(InMemoryPunishmentDirectory::new());
    let mut admin = AdminSession::new(&admin_config(), directory);
    admin.login("sudo");
    let resolve = |user: &str| Some(format!("10.0.0.{}", user.len()));

    for (kind, target) in [
        (PunishmentKind::Kick, "bo"),
        (PunishmentKind::Mute, "cid"),
        (PunishmentKind::Ban, "anne"),
    ] {
        let request = AdminPunishment::set(kind, "root", target).unwrap();
        admin.commit(&request, resolve).unwrap();
    }

    let list = admin.punishment_list().unwrap();
    let decoded = Message::decode(&list.to_bytes()).unwrap();
    assert_eq!(decoded, list);
    match decoded {
        Message::AdminPunishList(entries) => {
            let targets: Vec<&str> = entries.iter().map(|e| e.target.as_str()).collect();
            assert_eq!(targets, vec!["anne", "bo", "cid"]);
            assert_eq!(entries[0].target_ip, "10.0.0.4");
            assert_eq!(entries[0].kind, PunishmentKind::Ban);
        }
        other => panic!("unexpected {:?}", other.type_code()),
    }
}

#[test]
fn test_dispatcher_drives_relay() {
    let relay = Arc::new(TransferRegistry::relay(&TransferConfig::default()));
    let dispatcher = Dispatcher::new();

    let registry = Arc::clone(&relay);
    dispatcher
        .register_transfer(move |msg| {
            // Forward only what the authoritative ticket accepted
            let update = registry.apply(msg)?;
            Ok(update.is_accepted().then(|| msg.clone()))
        })
        .unwrap();
    dispatcher
        .register(TypeCode::Chat, |msg| Ok(Some(msg.clone())))
        .unwrap();

    let config = TransferConfig::default();
    let alice = TransferRegistry::new("alice", &config);
    let bob = TransferRegistry::new("bob", &config);

    let (id, request) = alice.request_send("bob", "pic.png", 5).unwrap();
    let forwarded = dispatcher.dispatch(&request).unwrap().unwrap();
    bob.apply(&forwarded).unwrap();

    for reply in bob.respond(&id, Some(PathBuf::from("pic.png"))).unwrap() {
        let forwarded = dispatcher.dispatch(&reply).unwrap().unwrap();
        alice.apply(&forwarded).unwrap();
    }
    for segment in alice.segments_for(&id, &bytes::Bytes::from_static(b"12345")).unwrap() {
        let forwarded = dispatcher.dispatch(&segment).unwrap().unwrap();
        if let Some(done) = bob.apply(&forwarded).unwrap().reply {
            let forwarded = dispatcher.dispatch(&done).unwrap().unwrap();
            alice.apply(&forwarded).unwrap();
        }
    }
    assert_eq!(relay.get(&id).unwrap().stage(), TransferStage::Done);
    assert_eq!(alice.get(&id).unwrap().stage(), TransferStage::Done);

    let chat = Message::Chat(ChatMessage::new("alice", "sent you a pic").unwrap());
    assert_eq!(dispatcher.dispatch(&chat).unwrap(), Some(chat));

    assert!(matches!(
        dispatcher.dispatch(&Message::Login(LoginCondition::Success)),
        Err(ProtocolError::UnexpectedMessage(TypeCode::Login))
    ));
}
