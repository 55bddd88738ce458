//! Seeded sessions and referees must replay identically.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use captcha_duel::{
    ConnectionId, DuelConfig, DuelEvent, Intent, Outbound, Referee, SessionSnapshot,
};
use web_time::{Duration, Instant};

use crate::common::{cpu_session, drain, solve, Arena};

fn cpu_replay(seed: u64) -> (Vec<DuelEvent>, SessionSnapshot) {
    let (mut session, _) = cpu_session(DuelConfig::default(), seed);
    let start = Instant::now();
    let mut now = start;
    session.apply_intent(Intent::StartLocalMatch, now).unwrap();
    for round in 0..30 {
        now += Duration::from_millis(400);
        session.tick(now);
        if round % 3 == 0 && session.current_state() == captcha_duel::SessionState::Playing {
            solve(&mut session, now);
        }
    }
    let events = drain(&mut session);
    (events, session.snapshot(now))
}

#[test]
fn cpu_match_replays_from_seed() {
    let (events_a, snap_a) = cpu_replay(17);
    let (events_b, snap_b) = cpu_replay(17);
    assert_eq!(events_a, events_b);
    assert_eq!(snap_a, snap_b);
}

#[test]
fn different_seeds_diverge() {
    let (_, a) = cpu_replay(1);
    let (_, b) = cpu_replay(2);
    assert!(a.local.images != b.local.images || a.opponent.images != b.opponent.images);
}

fn referee_script(seed: u64) -> Vec<Outbound> {
    let mut referee = Referee::new(DuelConfig::default(), Some(seed)).unwrap();
    let mut out = Vec::new();
    for (conn, player) in [(1, "p_1"), (2, "p_2")] {
        out.extend(referee.handle_frame(
            ConnectionId::new(conn),
            &format!(r#"{{"type":"JOIN_ROOM","payload":{{"room_id":"duel","player_id":"{player}"}}}}"#),
        ));
    }
    out.extend(referee.handle_frame(
        ConnectionId::new(1),
        r#"{"type":"VERIFY","payload":{"room_id":"duel","player_id":"p_1","selected_indices":[]}}"#,
    ));
    out
}

#[test]
fn referee_replays_from_seed() {
    assert_eq!(referee_script(5), referee_script(5));
}

#[test]
fn arena_matches_replay_from_seed() {
    let play = |seed| {
        let mut arena = Arena::new(2, seed);
        arena.join_all();
        for solver in [0, 1, 1, 0, 0] {
            arena.solve(solver);
        }
        arena
            .seats
            .iter()
            .map(|seat| seat.session.snapshot(arena.now))
            .collect::<Vec<_>>()
    };
    assert_eq!(play(23), play(23));
}
