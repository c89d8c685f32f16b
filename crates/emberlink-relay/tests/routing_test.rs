//! Message routing: dedup idempotence, broadcast vs unicast, local-echo
//! isolation, history filtering, key fan-out, leave handling.

mod common;

use std::collections::HashMap;

use common::{connect, first_error, join, plain, pushes_to, relay, request, reserve, send_message};
use emberlink_proto::{
    ChatMode, ClientRequest, Destination, ServerPush, SessionId, UserId,
};
use emberlink_relay::RelayEvent;

/// Creator on connection 1 plus `peers` on connections 2.., all joined.
fn group_session(relay: &mut common::TestRelay, peers: &[&str]) {
    connect(relay, 1);
    reserve(relay, 1, "s1", "k1", None, ChatMode::Group);
    join(relay, 1, "s1", "creator", true, plain("k1"));
    for (i, peer) in peers.iter().enumerate() {
        let conn = 2 + i as u64;
        connect(relay, conn);
        join(relay, conn, "s1", peer, false, plain("k1"));
    }
}

fn private_session(relay: &mut common::TestRelay) {
    connect(relay, 1);
    connect(relay, 2);
    reserve(relay, 1, "s1", "k1", None, ChatMode::Private);
    join(relay, 1, "s1", "creator", true, plain("k1"));
    join(relay, 2, "s1", "alice", false, plain("k1"));
}

#[test]
fn duplicate_message_id_is_stored_once_and_confirmed_once() {
    let (mut relay, _env) = relay();
    private_session(&mut relay);

    // Private-mode fan-out: the same logical message arrives as two
    // per-recipient copies sharing one id.
    let first = send_message(
        &mut relay,
        1,
        "s1",
        "creator",
        Destination::Peer(UserId::new("alice")),
        "copy-for-alice",
        Some("hi"),
        "m1",
    );
    let second = send_message(
        &mut relay,
        1,
        "s1",
        "creator",
        Destination::Peer(UserId::new("creator")),
        "copy-for-self",
        Some("hi"),
        "m1",
    );

    // First copy: routed and confirmed.
    assert!(
        pushes_to(&first, 2).iter().any(|p| matches!(p, ServerPush::NewMessage(_))),
        "first copy routed to alice"
    );
    assert_eq!(
        pushes_to(&first, 1)
            .iter()
            .filter(|p| matches!(p, ServerPush::MessageSent(_)))
            .count(),
        1
    );

    // Second copy: still routed to its distinct recipient, but no second
    // confirmation and no second stored record.
    assert!(
        pushes_to(&second, 1).iter().any(|p| matches!(p, ServerPush::NewMessage(_))),
        "second copy routed to creator's own connection"
    );
    assert!(
        !pushes_to(&second, 1).iter().any(|p| matches!(p, ServerPush::MessageSent(_))),
        "only the first copy earns a confirmation"
    );
}

#[test]
fn group_broadcast_reaches_everyone_but_the_sender() {
    let (mut relay, _env) = relay();
    group_session(&mut relay, &["alice", "bob"]);

    let actions = send_message(
        &mut relay,
        1,
        "s1",
        "creator",
        Destination::All,
        "shared-key-ciphertext",
        Some("hello"),
        "m1",
    );

    for conn in [2, 3] {
        assert!(
            pushes_to(&actions, conn).iter().any(|p| matches!(p, ServerPush::NewMessage(_))),
            "member on connection {conn} receives the broadcast"
        );
    }
    // The sender gets a confirmation, never its own broadcast copy.
    let to_sender = pushes_to(&actions, 1);
    assert!(!to_sender.iter().any(|p| matches!(p, ServerPush::NewMessage(_))));
    assert!(to_sender.iter().any(|p| matches!(p, ServerPush::MessageSent(_))));
}

#[test]
fn unicast_to_departed_member_is_dropped_quietly() {
    let (mut relay, _env) = relay();
    private_session(&mut relay);

    request(&mut relay, 2, ClientRequest::LeaveSession {
        session_id: SessionId::new("s1"),
        user_id: UserId::new("alice"),
    });

    let actions = send_message(
        &mut relay,
        1,
        "s1",
        "creator",
        Destination::Peer(UserId::new("alice")),
        "too-late",
        None,
        "m9",
    );

    // No routed copy, no error to the sender beyond the confirmation.
    assert!(!actions.iter().any(|a| matches!(
        a,
        emberlink_relay::RelayAction::Send { push: ServerPush::NewMessage(_), .. }
    )));
    assert!(pushes_to(&actions, 1).iter().any(|p| matches!(p, ServerPush::MessageSent(_))));
    assert_eq!(first_error(&actions), None);
}

#[test]
fn local_echo_never_reaches_recipients() {
    let (mut relay, _env) = relay();
    group_session(&mut relay, &["alice"]);

    let actions = send_message(
        &mut relay,
        1,
        "s1",
        "creator",
        Destination::All,
        "ciphertext",
        Some("the plaintext mirror"),
        "m1",
    );

    for push in pushes_to(&actions, 2) {
        if let ServerPush::NewMessage(record) = push {
            assert_eq!(record.local_echo, None, "routed copies must not carry local echo");
        }
    }

    let confirmation = pushes_to(&actions, 1)
        .into_iter()
        .find_map(|p| match p {
            ServerPush::MessageSent(record) => Some(record),
            _ => None,
        })
        .unwrap();
    assert_eq!(confirmation.local_echo.as_deref(), Some("the plaintext mirror"));
}

#[test]
fn history_replay_is_filtered_for_the_joiner() {
    let (mut relay, _env) = relay();
    group_session(&mut relay, &["alice"]);

    // A broadcast, a unicast to alice, and a unicast between others.
    send_message(&mut relay, 1, "s1", "creator", Destination::All, "b1", None, "m1");
    send_message(
        &mut relay,
        1,
        "s1",
        "creator",
        Destination::Peer(UserId::new("alice")),
        "for-alice",
        None,
        "m2",
    );
    send_message(
        &mut relay,
        1,
        "s1",
        "creator",
        Destination::Peer(UserId::new("creator")),
        "self-note",
        None,
        "m3",
    );

    connect(&mut relay, 3);
    let actions = join(&mut relay, 3, "s1", "bob", false, plain("k1"));

    let history = pushes_to(&actions, 3)
        .into_iter()
        .find_map(|p| match p {
            ServerPush::MessagesHistory(messages) => Some(messages),
            _ => None,
        })
        .unwrap();

    let ids: Vec<String> = history.iter().map(|m| m.id.to_string()).collect();
    assert_eq!(ids, ["m1"], "bob sees only the broadcast, never foreign unicasts");
}

#[test]
fn session_key_fanout_delivers_each_member_only_its_own_entry() {
    let (mut relay, _env) = relay();
    group_session(&mut relay, &["alice", "bob"]);

    let mut wrapped_keys = HashMap::new();
    wrapped_keys.insert(UserId::new("creator"), "wrapped-for-creator".to_string());
    wrapped_keys.insert(UserId::new("alice"), "wrapped-for-alice".to_string());
    wrapped_keys.insert(UserId::new("bob"), "wrapped-for-bob".to_string());

    let actions = request(&mut relay, 1, ClientRequest::SetSessionKey {
        session_id: SessionId::new("s1"),
        wrapped_keys,
    });

    for (conn, expected) in
        [(1, "wrapped-for-creator"), (2, "wrapped-for-alice"), (3, "wrapped-for-bob")]
    {
        let pushes = pushes_to(&actions, conn);
        assert_eq!(pushes.len(), 1, "exactly one key push per member");
        assert!(matches!(
            &pushes[0],
            ServerPush::SessionKeyAvailable { wrapped_session_key } if wrapped_session_key == expected
        ));
    }
}

#[test]
fn late_group_joiner_receives_wrapped_key_in_metadata() {
    let (mut relay, _env) = relay();
    group_session(&mut relay, &["alice"]);

    let mut wrapped_keys = HashMap::new();
    wrapped_keys.insert(UserId::new("creator"), "w-creator".to_string());
    wrapped_keys.insert(UserId::new("alice"), "w-alice".to_string());
    wrapped_keys.insert(UserId::new("bob"), "w-bob".to_string());
    request(&mut relay, 1, ClientRequest::SetSessionKey {
        session_id: SessionId::new("s1"),
        wrapped_keys,
    });

    connect(&mut relay, 3);
    let actions = join(&mut relay, 3, "s1", "bob", false, plain("k1"));

    let metadata = pushes_to(&actions, 3)
        .into_iter()
        .find(|p| matches!(p, ServerPush::SessionMetadata { .. }));
    assert!(matches!(
        metadata,
        Some(ServerPush::SessionMetadata { mode: ChatMode::Group, wrapped_session_key: Some(ref k) })
            if k == "w-bob"
    ));
}

#[test]
fn set_session_key_is_refused_for_private_sessions() {
    let (mut relay, _env) = relay();
    private_session(&mut relay);

    let mut wrapped_keys = HashMap::new();
    wrapped_keys.insert(UserId::new("alice"), "wrapped".to_string());

    let actions = request(&mut relay, 1, ClientRequest::SetSessionKey {
        session_id: SessionId::new("s1"),
        wrapped_keys,
    });

    assert!(
        !actions
            .iter()
            .any(|a| matches!(a, emberlink_relay::RelayAction::Send { .. })),
        "no key pushes for a non-group session"
    );
}

#[test]
fn typing_indicators_reach_peers_only() {
    let (mut relay, _env) = relay();
    group_session(&mut relay, &["alice", "bob"]);

    let actions = request(&mut relay, 2, ClientRequest::Typing {
        session_id: SessionId::new("s1"),
        user_id: UserId::new("alice"),
        display_name: Some("ALICE".to_string()),
    });

    assert!(pushes_to(&actions, 1).iter().any(|p| matches!(p, ServerPush::UserTyping { .. })));
    assert!(pushes_to(&actions, 3).iter().any(|p| matches!(p, ServerPush::UserTyping { .. })));
    assert!(pushes_to(&actions, 2).is_empty(), "the typist hears nothing");
}

#[test]
fn download_notification_is_unicast_to_the_original_sender() {
    let (mut relay, _env) = relay();
    private_session(&mut relay);

    let actions = request(&mut relay, 2, ClientRequest::FileDownloaded {
        session_id: SessionId::new("s1"),
        downloaded_by: "ALICE".to_string(),
        sender_id: UserId::new("creator"),
        file_name: "notes.pdf".to_string(),
    });

    let to_sender = pushes_to(&actions, 1);
    assert!(matches!(
        &to_sender[0],
        ServerPush::DownloadNotification { downloaded_by, file_name, .. }
            if downloaded_by == "ALICE" && file_name == "notes.pdf"
    ));
    assert!(pushes_to(&actions, 2).is_empty());
}

#[test]
fn leave_notifies_remaining_members_and_evicts_empty_sessions() {
    let (mut relay, _env) = relay();
    group_session(&mut relay, &["alice"]);

    let actions = request(&mut relay, 2, ClientRequest::LeaveSession {
        session_id: SessionId::new("s1"),
        user_id: UserId::new("alice"),
    });

    let to_creator = pushes_to(&actions, 1);
    assert!(matches!(to_creator[0], ServerPush::UserLeft { .. }));
    assert!(matches!(to_creator[1], ServerPush::PublicKeysUpdated(ref roster) if roster.len() == 1));
    assert!(relay.has_session(&SessionId::new("s1")));

    // Last member out: the session is evicted immediately.
    request(&mut relay, 1, ClientRequest::LeaveSession {
        session_id: SessionId::new("s1"),
        user_id: UserId::new("creator"),
    });
    assert!(!relay.has_session(&SessionId::new("s1")));
}

#[test]
fn leave_is_idempotent() {
    let (mut relay, _env) = relay();
    group_session(&mut relay, &["alice"]);

    let leave = ClientRequest::LeaveSession {
        session_id: SessionId::new("s1"),
        user_id: UserId::new("alice"),
    };
    request(&mut relay, 2, leave.clone());
    let actions = request(&mut relay, 2, leave);

    // Second leave: nothing to do, nothing sent.
    assert!(!actions.iter().any(|a| matches!(a, emberlink_relay::RelayAction::Send { .. })));
}

#[test]
fn disconnect_behaves_like_leave() {
    let (mut relay, _env) = relay();
    group_session(&mut relay, &["alice"]);

    let actions = relay
        .process_event(RelayEvent::ConnectionClosed {
            connection: 2,
            reason: "socket reset".to_string(),
        })
        .unwrap();

    let to_creator = pushes_to(&actions, 1);
    assert!(matches!(to_creator[0], ServerPush::UserLeft { .. }));
    assert!(relay.has_session(&SessionId::new("s1")));
    assert_eq!(relay.connection_count(), 1);
}
