//! Exact frame shapes exchanged between sessions and the referee.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::{feed, online_session};
use captcha_duel::network::codec::{decode, encode};
use captcha_duel::network::messages::{GameStart, Message, VerifyFailed};
use captcha_duel::{
    CodecError, ConnectionId, Direction, DuelConfig, Effect, FrameChannel, Referee,
};
use web_time::Instant;

const GAME_START: &str = r#"{"type":"GAME_START","payload":{"target":"Cars","images":["images/car_01.jpg","images/tree_01.jpg","images/car_02.jpg"]}}"#;

#[test]
fn session_frames_have_the_documented_shape() {
    let (mut session, mut server, _observer) = online_session("p_1");
    let now = Instant::now();
    session.join_room("duel").unwrap();
    feed(&mut session, &mut server, &[GAME_START], now);
    session.toggle_selection(2, now);
    session.toggle_selection(0, now);
    session.verify(now);

    assert_eq!(
        server.receive_frames(),
        vec![
            r#"{"type":"JOIN_ROOM","payload":{"room_id":"duel","player_id":"p_1"}}"#.to_owned(),
            r#"{"type":"SELECT_IMAGE","payload":{"room_id":"duel","player_id":"p_1","image_index":2}}"#.to_owned(),
            r#"{"type":"SELECT_IMAGE","payload":{"room_id":"duel","player_id":"p_1","image_index":0}}"#.to_owned(),
            r#"{"type":"VERIFY","payload":{"room_id":"duel","player_id":"p_1","selected_indices":[0,2]}}"#.to_owned(),
        ]
    );
}

#[test]
fn session_uses_the_assigned_room() {
    let (mut session, mut server, _observer) = online_session("p_1");
    let now = Instant::now();
    session.join_room("lobby").unwrap();
    feed(
        &mut session,
        &mut server,
        &[r#"{"type":"ROOM_ASSIGNED","payload":{"room_id":"room_12"}}"#, GAME_START],
        now,
    );
    server.receive_frames();
    session.toggle_selection(1, now);

    assert_eq!(
        server.receive_frames(),
        vec![
            r#"{"type":"SELECT_IMAGE","payload":{"room_id":"room_12","player_id":"p_1","image_index":1}}"#
                .to_owned()
        ]
    );
}

#[test]
fn referee_lobby_frames() {
    let mut referee = Referee::new(DuelConfig::default(), Some(1)).unwrap();
    let alice = ConnectionId::new(1);
    let frames: Vec<String> = referee
        .handle_frame(
            alice,
            r#"{"type":"JOIN_ROOM","payload":{"room_id":"duel","player_id":"p_1"}}"#,
        )
        .iter()
        .map(|out| out.frame().unwrap())
        .collect();

    assert_eq!(
        frames,
        vec![
            r#"{"type":"ROOM_ASSIGNED","payload":{"room_id":"duel"}}"#.to_owned(),
            r#"{"type":"STATUS_UPDATE","payload":{"status":"waiting_for_opponent"}}"#.to_owned(),
        ]
    );
}

#[test]
fn referee_game_start_carries_both_grids() {
    let mut referee = Referee::new(DuelConfig::default(), Some(1)).unwrap();
    let (alice, bob) = (ConnectionId::new(1), ConnectionId::new(2));
    referee.handle_frame(
        alice,
        r#"{"type":"JOIN_ROOM","payload":{"room_id":"duel","player_id":"p_1"}}"#,
    );
    let out = referee.handle_frame(
        bob,
        r#"{"type":"JOIN_ROOM","payload":{"room_id":"duel","player_id":"p_2"}}"#,
    );

    let starts: Vec<(ConnectionId, GameStart)> = out
        .into_iter()
        .filter_map(|o| match o.message {
            Message::GameStart(body) => Some((o.to, body)),
            _ => None,
        })
        .collect();
    assert_eq!(starts.len(), 2);
    let (first, second) = (&starts[0].1, &starts[1].1);
    assert_eq!(first.target, second.target);
    assert_eq!(first.opponent_images.as_ref(), Some(&second.images));
    assert_eq!(second.opponent_images.as_ref(), Some(&first.images));
    assert_eq!(first.problem_id.as_deref(), Some("prob_001"));
    assert_eq!(first.images.len(), captcha_duel::GRID_SIZE);
}

#[test]
fn missing_or_null_payload_means_empty() {
    let expected = Message::VerifyFailed(VerifyFailed::default());
    assert_eq!(decode(r#"{"type":"VERIFY_FAILED"}"#).unwrap(), expected);
    assert_eq!(
        decode(r#"{"type":"VERIFY_FAILED","payload":null}"#).unwrap(),
        expected
    );
    assert_eq!(
        decode(r#"{"type":"VERIFY_FAILED","payload":{}}"#).unwrap(),
        expected
    );
}

#[test]
fn optional_fields_are_omitted_on_encode() {
    let frame = encode(&Message::VerifyFailed(VerifyFailed::default())).unwrap();
    assert_eq!(frame, r#"{"type":"VERIFY_FAILED","payload":{}}"#);

    let start = decode(GAME_START).unwrap();
    let Message::GameStart(body) = &start else {
        panic!("expected GAME_START, got {start:?}");
    };
    assert_eq!(body.opponent_images, None);
    assert_eq!(body.problem_id, None);
    assert_eq!(encode(&start).unwrap(), GAME_START);
}

#[test]
fn unknown_fields_are_tolerated() {
    let message = decode(
        r#"{"type":"GAME_FINISHED","payload":{"winner_id":"p_2","message":"You are Human!","confetti":true}}"#,
    )
    .unwrap();
    assert_eq!(message.kind(), "GAME_FINISHED");
}

#[test]
fn every_kind_has_a_direction() {
    let minimal = [
        r#"{"type":"JOIN_ROOM","payload":{"room_id":"r","player_id":"p"}}"#,
        r#"{"type":"ROOM_ASSIGNED","payload":{"room_id":"r"}}"#,
        r#"{"type":"STATUS_UPDATE"}"#,
        r#"{"type":"GAME_START","payload":{"target":"Cars","images":[]}}"#,
        r#"{"type":"SELECT_IMAGE","payload":{"room_id":"r","player_id":"p","image_index":0}}"#,
        r#"{"type":"OPPONENT_SELECT","payload":{"player_id":"p","image_index":0}}"#,
        r#"{"type":"VERIFY","payload":{"room_id":"r","player_id":"p","selected_indices":[]}}"#,
        r#"{"type":"UPDATE_PATTERN","payload":{"target":"Cars","images":[]}}"#,
        r#"{"type":"VERIFY_FAILED"}"#,
        r#"{"type":"OPPONENT_UPDATE","payload":{"images":[],"score":0}}"#,
        r#"{"type":"OBSTRUCTION","payload":{"effect":"SPIN"}}"#,
        r#"{"type":"OPPONENT_PROGRESS","payload":{"player_id":"p","correct_count":1,"total_needed":5}}"#,
        r#"{"type":"GAME_FINISHED","payload":{"winner_id":"p"}}"#,
    ];

    let decoded: Vec<Message> = minimal.iter().map(|f| decode(f).unwrap()).collect();
    let kinds: Vec<&str> = decoded.iter().map(Message::kind).collect();
    assert_eq!(kinds, Message::KINDS.to_vec());

    let outbound: Vec<&str> = decoded
        .iter()
        .filter(|m| m.direction() == Direction::Outbound)
        .map(Message::kind)
        .collect();
    assert_eq!(outbound, vec!["JOIN_ROOM", "SELECT_IMAGE", "VERIFY"]);
}

#[test]
fn unknown_type_is_distinguished_from_garbage() {
    assert!(matches!(
        decode(r#"{"type":"CHAT","payload":{}}"#),
        Err(CodecError::UnknownType { kind }) if kind == "CHAT"
    ));
    assert!(matches!(
        decode(r#"{"payload":{}}"#),
        Err(CodecError::DecodeError { .. })
    ));
    assert!(matches!(
        decode(r#"{"type":"VERIFY","payload":{"room_id":"r"}}"#),
        Err(CodecError::DecodeError { .. })
    ));
}

#[test]
fn effect_wire_names() {
    let names: Vec<&str> = Effect::ALL.iter().map(|e| e.as_str()).collect();
    assert_eq!(
        names,
        vec!["SHAKE", "SPIN", "SKEW", "BLUR", "INVERT", "GRAYSCALE", "SEPIA", "ONION_RAIN"]
    );
    for effect in Effect::ALL {
        assert_eq!(effect.as_str().parse::<Effect>().unwrap(), effect);
    }
}
