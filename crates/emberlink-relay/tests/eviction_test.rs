//! Idle-eviction sweep under virtual time: empty-session grace window,
//! orphan reclamation, activity resetting the clock.

mod common;

use std::time::Duration;

use common::{connect, join, plain, relay, relay_with_config, request, reserve};
use emberlink_proto::{ChatMode, ClientRequest, SessionId, UserId};
use emberlink_relay::{RelayConfig, RelayEvent};

const GRACE: Duration = Duration::from_secs(30 * 60);
const ORPHAN: Duration = Duration::from_secs(2 * 60 * 60);

fn tick(relay: &mut common::TestRelay) {
    #[allow(clippy::unwrap_used)]
    relay.process_event(RelayEvent::Tick).unwrap();
}

#[test]
fn reserved_session_is_swept_after_the_grace_window() {
    let (mut relay, env) = relay();
    connect(&mut relay, 1);

    reserve(&mut relay, 1, "s1", "k1", None, ChatMode::Group);

    // Just inside the window: still reserved for its creator.
    env.advance(GRACE - Duration::from_secs(1));
    tick(&mut relay);
    assert!(relay.has_session(&SessionId::new("s1")));

    // Past it: reclaimed.
    env.advance(Duration::from_secs(2));
    tick(&mut relay);
    assert!(!relay.has_session(&SessionId::new("s1")));
}

#[test]
fn active_session_with_members_survives_the_grace_window() {
    let (mut relay, env) = relay();
    connect(&mut relay, 1);

    reserve(&mut relay, 1, "s1", "k1", None, ChatMode::Group);
    join(&mut relay, 1, "s1", "creator", true, plain("k1"));

    env.advance(GRACE + Duration::from_secs(60));
    tick(&mut relay);

    // Members present, orphan window not reached: survives.
    assert!(relay.has_session(&SessionId::new("s1")));
}

#[test]
fn orphaned_session_is_reclaimed_even_with_members() {
    let (mut relay, env) = relay();
    connect(&mut relay, 1);

    reserve(&mut relay, 1, "s1", "k1", None, ChatMode::Group);
    join(&mut relay, 1, "s1", "creator", true, plain("k1"));

    env.advance(ORPHAN + Duration::from_secs(1));
    tick(&mut relay);

    assert!(!relay.has_session(&SessionId::new("s1")));
}

#[test]
fn activity_resets_the_idle_clock() {
    let (mut relay, env) = relay();
    connect(&mut relay, 1);

    reserve(&mut relay, 1, "s1", "k1", None, ChatMode::Group);
    join(&mut relay, 1, "s1", "creator", true, plain("k1"));

    // Touch the session shortly before the orphan window would expire.
    env.advance(ORPHAN - Duration::from_secs(60));
    request(&mut relay, 1, ClientRequest::Typing {
        session_id: SessionId::new("s1"),
        user_id: UserId::new("creator"),
        display_name: None,
    });

    env.advance(Duration::from_secs(120));
    tick(&mut relay);

    assert!(relay.has_session(&SessionId::new("s1")), "recent activity must defer eviction");
}

#[test]
fn sweep_honors_configured_windows() {
    let config = RelayConfig {
        empty_session_grace: Duration::from_secs(10),
        orphan_window: Duration::from_secs(40),
        ..Default::default()
    };
    let (mut relay, env) = relay_with_config(config);
    connect(&mut relay, 1);
    connect(&mut relay, 2);

    reserve(&mut relay, 1, "empty", "k1", None, ChatMode::Group);
    reserve(&mut relay, 2, "occupied", "k2", None, ChatMode::Group);
    join(&mut relay, 2, "occupied", "creator", true, plain("k2"));

    env.advance(Duration::from_secs(11));
    tick(&mut relay);
    assert!(!relay.has_session(&SessionId::new("empty")));
    assert!(relay.has_session(&SessionId::new("occupied")));

    env.advance(Duration::from_secs(30));
    tick(&mut relay);
    assert!(!relay.has_session(&SessionId::new("occupied")));
}
