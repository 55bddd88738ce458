//! Two online sessions playing through a referee.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::{Arena, ROOM};
use captcha_duel::referee::{STATUS_ROOM_FULL, STATUS_WAITING};
use captcha_duel::assert_no_violations;
use captcha_duel::telemetry::InvariantChecker;
use captcha_duel::{DuelEvent, Intent, MatchMode, SessionState, Side, Verdict};

#[test]
fn both_players_start_on_mirrored_grids() {
    let mut arena = Arena::new(2, 3);
    arena.join_all();

    assert_eq!(arena.states(), vec![SessionState::Playing; 2]);
    let alice = arena.session(0);
    let bob = arena.session(1);
    assert_eq!(alice.mode(), Some(MatchMode::Online));
    assert_eq!(alice.room_id(), Some(ROOM));

    let alice_grid = alice.puzzle(Side::Local).unwrap();
    let bob_grid = bob.puzzle(Side::Local).unwrap();
    assert_eq!(alice_grid.target(), bob_grid.target());
    assert_eq!(
        bob.puzzle(Side::Opponent).unwrap().images(),
        alice_grid.images()
    );
    assert_eq!(
        alice.puzzle(Side::Opponent).unwrap().images(),
        bob_grid.images()
    );
    assert!(alice_grid.is_solvable());
    assert!(bob_grid.is_solvable());
    assert_eq!(arena.referee.room_members(ROOM).len(), 2);
}

#[test]
fn first_to_five_wins_for_both_sides() {
    let mut arena = Arena::new(2, 11);
    arena.join_all();

    for round in 1..=5u32 {
        arena.solve(0);
        assert_eq!(arena.session(0).tally(Side::Local).score, round);
        assert_eq!(arena.session(1).tally(Side::Opponent).score, round);
    }

    assert_eq!(arena.states(), vec![SessionState::Result; 2]);
    for seat in &arena.seats {
        assert_eq!(seat.session.winner_id().map(|id| id.as_str()), Some("p_1"));
        seat.session.check_invariants().unwrap();
        assert_no_violations!(seat.observer);
    }
    assert!(arena.session(0).snapshot(arena.now).local_won());
    assert!(!arena.session(1).snapshot(arena.now).local_won());
}

#[test]
fn combo_obstructs_the_rival_on_both_screens() {
    let mut arena = Arena::new(2, 8);
    arena.join_all();
    for seat in &mut arena.seats {
        seat.session.events().for_each(drop);
    }

    arena.solve(0);
    arena.solve(0);

    let now = arena.now;
    let alice_view = arena.session(0).obstruction(Side::Opponent, now);
    let bob_view = arena.session(1).obstruction(Side::Local, now);
    assert!(alice_view.is_some());
    assert_eq!(alice_view, bob_view);
    assert_eq!(arena.session(0).obstruction(Side::Local, now), None);

    let bob_events: Vec<DuelEvent> = arena.seats[1].session.events().collect();
    assert!(bob_events.iter().any(|e| matches!(
        e,
        DuelEvent::Obstructed {
            side: Side::Local,
            ..
        }
    )));

    arena.advance(captcha_duel::OBSTRUCTION_DURATION);
    assert_eq!(arena.session(1).obstruction(Side::Local, arena.now), None);
}

#[test]
fn selections_are_mirrored_to_the_rival() {
    let mut arena = Arena::new(2, 5);
    arena.join_all();
    let now = arena.now;

    arena.seats[0]
        .session
        .apply_intent(Intent::Select { index: 4 }, now)
        .unwrap();
    arena.seats[0]
        .session
        .apply_intent(Intent::Select { index: 1 }, now)
        .unwrap();
    arena.pump();

    assert_eq!(arena.session(0).selection(Side::Local), vec![1, 4]);
    assert_eq!(arena.session(1).selection(Side::Opponent), vec![1, 4]);
    assert!(arena.session(1).selection(Side::Local).is_empty());

    arena.seats[0]
        .session
        .apply_intent(Intent::Select { index: 4 }, now)
        .unwrap();
    arena.pump();
    assert_eq!(arena.session(1).selection(Side::Opponent), vec![1]);
}

#[test]
fn wrong_submission_is_reported_back() {
    let mut arena = Arena::new(2, 6);
    arena.join_all();
    let now = arena.now;
    let before = arena.session(0).puzzle(Side::Local).unwrap().clone();

    arena.seats[0]
        .session
        .apply_intent(Intent::Verify, now)
        .unwrap();
    assert!(arena.session(0).is_awaiting_verdict());
    arena.pump();

    let alice = arena.session(0);
    assert!(!alice.is_awaiting_verdict());
    assert_eq!(alice.feedback(now), Some(Verdict::Wrong));
    assert_eq!(alice.tally(Side::Local).score, 0);
    assert_eq!(alice.puzzle(Side::Local).unwrap().images(), before.images());
    assert_eq!(arena.session(1).tally(Side::Opponent).score, 0);
}

#[test]
fn lone_player_waits_and_can_cancel() {
    let mut arena = Arena::new(1, 2);
    arena.join_all();

    let snapshot = arena.session(0).snapshot(arena.now);
    assert_eq!(snapshot.state, SessionState::Waiting);
    assert_eq!(snapshot.lobby_status.as_deref(), Some(STATUS_WAITING));
    assert_eq!(snapshot.room_id.as_deref(), Some(ROOM));

    let now = arena.now;
    arena.seats[0]
        .session
        .apply_intent(Intent::Cancel, now)
        .unwrap();
    assert_eq!(arena.session(0).current_state(), SessionState::Login);
    assert_eq!(arena.session(0).room_id(), None);

    let conn = arena.seats[0].conn;
    arena.referee.disconnect(conn);
    assert_eq!(arena.referee.room_count(), 0);
}

#[test]
fn third_player_is_turned_away() {
    let mut arena = Arena::new(3, 4);
    arena.join_all();

    assert_eq!(
        arena.states(),
        vec![
            SessionState::Playing,
            SessionState::Playing,
            SessionState::Waiting
        ]
    );
    let late = arena.session(2).snapshot(arena.now);
    assert_eq!(late.lobby_status.as_deref(), Some(STATUS_ROOM_FULL));
    assert_eq!(arena.referee.room_members(ROOM).len(), 2);
}

#[test]
fn go_home_after_an_online_match() {
    let mut arena = Arena::new(2, 9);
    arena.join_all();
    for _ in 0..5 {
        arena.solve(1);
    }
    let now = arena.now;
    for seat in &mut arena.seats {
        seat.session.apply_intent(Intent::GoHome, now).unwrap();
        assert_eq!(seat.session.current_state(), SessionState::Login);
        assert_eq!(seat.session.tally(Side::Local).score, 0);
        assert!(seat.session.rival().is_none());
    }
}
