//! Matches against the simulated opponent.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::{cpu_session, drain, solve};
use captcha_duel::assert_no_violations;
use captcha_duel::config::MAX_TIMER_DURATION;
use captcha_duel::telemetry::InvariantChecker;
use captcha_duel::{
    CpuDifficulty, DuelConfig, DuelError, DuelEvent, DuelSession, ImageCatalog, ImageRef, Intent,
    Label, MatchMode, SessionBuilder, SessionState, Side, SoundCue, Verdict, LOCAL_CPU_ROOM,
};
use web_time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(800);

fn eager_cpu() -> DuelConfig {
    DuelConfig {
        cpu: CpuDifficulty {
            select_probability: 1.0,
            commit_probability: 1.0,
            ..CpuDifficulty::default()
        },
        ..DuelConfig::default()
    }
}

#[test]
fn local_player_wins_a_cpu_match() {
    let (mut session, observer) = cpu_session(DuelConfig::default(), 10);
    let now = Instant::now();
    session.apply_intent(Intent::StartLocalMatch, now).unwrap();
    assert_eq!(session.room_id(), Some(LOCAL_CPU_ROOM));

    for round in 1..=5 {
        solve(&mut session, now);
        assert_eq!(session.tally(Side::Local).score, round);
        session.check_invariants().unwrap();
    }

    assert_eq!(session.current_state(), SessionState::Result);
    let snapshot = session.snapshot(now);
    assert!(snapshot.local_won());
    let cues: Vec<SoundCue> = drain(&mut session)
        .iter()
        .filter_map(DuelEvent::sound_cue)
        .collect();
    assert_eq!(cues.first(), Some(&SoundCue::Start));
    assert_eq!(cues.last(), Some(&SoundCue::Win));
    assert_eq!(cues.iter().filter(|c| **c == SoundCue::Correct).count(), 5);
    assert_no_violations!(observer);

    session.apply_intent(Intent::GoHome, now).unwrap();
    assert_eq!(session.current_state(), SessionState::Login);
    assert_eq!(session.winner_id(), None);
}

#[test]
fn scenario_correct_verification_moves_to_a_new_puzzle() {
    let (mut session, _) = cpu_session(DuelConfig::default(), 3);
    let now = Instant::now();
    session.start_local_match(now);
    let before = session.puzzle(Side::Local).unwrap().clone();

    solve(&mut session, now);

    let after = session.puzzle(Side::Local).unwrap();
    assert_eq!(session.tally(Side::Local).score, 1);
    assert!(after.selection().is_empty());
    assert!(after.target() != before.target() || after.images() != before.images());
}

#[test]
fn idle_player_loses_to_an_eager_cpu() {
    let (mut session, _) = cpu_session(eager_cpu(), 21);
    let mut now = Instant::now();
    session.start_local_match(now);

    for _ in 0..60 {
        now += TICK;
        session.tick(now);
        if session.current_state() == SessionState::Result {
            break;
        }
    }

    assert_eq!(session.current_state(), SessionState::Result);
    assert_eq!(session.winner_id().map(|id| id.as_str()), Some("cpu"));
    assert_eq!(session.tally(Side::Opponent).score, 5);
    let events = drain(&mut session);
    assert!(events.iter().any(|e| matches!(
        e,
        DuelEvent::Obstructed {
            side: Side::Local,
            ..
        }
    )));
    assert!(matches!(
        events.last(),
        Some(DuelEvent::MatchFinished {
            local_won: false,
            ..
        })
    ));
}

#[test]
fn result_freezes_the_board() {
    let (mut session, _) = cpu_session(eager_cpu(), 5);
    let mut now = Instant::now();
    session.start_local_match(now);
    for _ in 0..5 {
        solve(&mut session, now);
    }
    let frozen = (session.tally(Side::Local), session.tally(Side::Opponent));

    for _ in 0..20 {
        now += TICK;
        session.tick(now);
    }
    assert_eq!(
        (session.tally(Side::Local), session.tally(Side::Opponent)),
        frozen
    );
}

#[test]
fn combo_obstruction_expires_after_three_seconds() {
    let (mut session, _) = cpu_session(DuelConfig::default(), 8);
    let start = Instant::now();
    session.start_local_match(start);
    solve(&mut session, start);
    solve(&mut session, start);

    let effect = session.obstruction(Side::Opponent, start).unwrap();
    assert_eq!(session.tally(Side::Local).combo, 0);
    drain(&mut session);

    let almost = start + Duration::from_millis(2999);
    session.tick(almost);
    assert_eq!(session.obstruction(Side::Opponent, almost), Some(effect));

    let later = start + Duration::from_secs(3);
    session.tick(later);
    assert_eq!(session.obstruction(Side::Opponent, later), None);
    assert!(drain(&mut session).contains(&DuelEvent::ObstructionCleared {
        side: Side::Opponent,
        effect,
    }));
}

#[test]
fn wrong_verification_resets_combo() {
    let (mut session, _) = cpu_session(DuelConfig::default(), 12);
    let now = Instant::now();
    session.start_local_match(now);
    solve(&mut session, now);
    assert_eq!(session.tally(Side::Local).combo, 1);

    session.verify(now);
    assert_eq!(session.tally(Side::Local).combo, 0);
    assert_eq!(session.tally(Side::Local).score, 1);
    assert_eq!(session.feedback(now), Some(Verdict::Wrong));

    solve(&mut session, now);
    assert_eq!(session.obstruction(Side::Opponent, now), None);
}

#[test]
fn reset_cancels_the_cpu_schedule() {
    let (mut session, _) = cpu_session(eager_cpu(), 2);
    let now = Instant::now();
    session.start_local_match(now);
    session.apply_intent(Intent::Reset, now).unwrap();
    drain(&mut session);

    session.tick(now + Duration::from_secs(30));
    assert_eq!(session.current_state(), SessionState::Login);
    assert!(drain(&mut session).is_empty());
    assert_eq!(session.next_deadline(), None);
}

#[test]
fn same_seed_replays_the_same_match() {
    let run = || {
        let (mut session, _) = cpu_session(DuelConfig::default(), 99);
        let mut now = Instant::now();
        let start = now;
        session.start_local_match(now);
        for _ in 0..40 {
            now += TICK;
            session.tick(now);
        }
        let events = drain(&mut session);
        (session.snapshot(start).opponent.score, events)
    };
    assert_eq!(run(), run());
}

#[test]
fn cpu_mode_never_touches_the_channel() {
    let (mut session, _) = cpu_session(DuelConfig::default(), 1);
    let now = Instant::now();
    session.start_local_match(now);
    assert_eq!(session.mode(), Some(MatchMode::Cpu));
    assert!(!session.has_channel());
    session.toggle_selection(0, now);
    session.verify(now);
}

fn catalog(labels: &[&str], images: &[(&str, &str)]) -> ImageCatalog {
    ImageCatalog::new(
        images
            .iter()
            .map(|(id, tag)| ImageRef::new(*id, [*tag]))
            .collect(),
        labels.iter().map(|l| Label::new(*l)).collect(),
    )
    .unwrap()
}

fn session_with(catalog: ImageCatalog, seed: u64) -> DuelSession {
    SessionBuilder::new()
        .with_catalog(catalog)
        .with_seed(seed)
        .build()
        .unwrap()
}

#[test]
fn labels_without_images_are_never_asked() {
    let catalog = catalog(
        &["Cars", "Buses"],
        &[
            ("car_01.jpg", "car"),
            ("car_02.jpg", "car"),
            ("tree_01.jpg", "tree"),
            ("hill_01.jpg", "mountain"),
        ],
    );
    let mut session = session_with(catalog, 4);
    let now = Instant::now();
    session.start_local_match(now);
    for _ in 0..4 {
        let puzzle = session.puzzle(Side::Local).unwrap();
        assert_eq!(puzzle.target().text(), "Cars");
        assert!(puzzle.is_solvable());
        solve(&mut session, now);
    }
    assert_eq!(session.tally(Side::Local).score, 4);
}

#[test]
fn unsolvable_puzzle_is_replaced_after_a_miss() {
    let catalog = catalog(
        &["Cars", "Buses"],
        &[
            ("tree_01.jpg", "tree"),
            ("tree_02.jpg", "tree"),
            ("hill_01.jpg", "mountain"),
            ("hill_02.jpg", "mountain"),
        ],
    );
    let mut session = session_with(catalog, 8);
    let now = Instant::now();
    session.start_local_match(now);
    let before = session.puzzle(Side::Local).unwrap().clone();
    assert!(!before.is_solvable());

    session.toggle_selection(0, now);
    session.verify(now);

    let after = session.puzzle(Side::Local).unwrap();
    assert!(after.target() != before.target() || after.images() != before.images());
    assert!(after.selection().is_empty());
    assert_eq!(session.tally(Side::Local).score, 0);
    assert!(drain(&mut session).contains(&DuelEvent::Verified {
        side: Side::Local,
        verdict: Verdict::Wrong,
    }));
}

#[test]
fn timers_that_would_overflow_are_rejected() {
    let config = DuelConfig {
        feedback_duration: Duration::MAX,
        ..DuelConfig::default()
    };
    assert!(matches!(
        SessionBuilder::new().with_config(config).build(),
        Err(DuelError::InvalidConfig {
            field: "feedback_duration",
            ..
        })
    ));

    let config = DuelConfig {
        feedback_duration: MAX_TIMER_DURATION,
        obstruction_duration: MAX_TIMER_DURATION,
        ..DuelConfig::default()
    };
    let (mut session, _) = cpu_session(config, 2);
    let now = Instant::now();
    session.start_local_match(now);
    solve(&mut session, now);
    solve(&mut session, now);
    assert!(session.feedback(now).is_some());
    assert!(session.obstruction(Side::Opponent, now).is_some());
}

#[test]
fn late_tick_keeps_the_handicap_of_overdue_decisions() {
    let config = DuelConfig {
        cpu: CpuDifficulty {
            select_probability: 1.0,
            commit_probability: 1.0,
            obstructed_skip_probability: 1.0,
            ..CpuDifficulty::default()
        },
        ..DuelConfig::default()
    };
    let (mut session, _) = cpu_session(config, 31);
    let start = Instant::now();
    session.start_local_match(start);
    solve(&mut session, start);
    solve(&mut session, start);
    assert!(session.obstruction(Side::Opponent, start).is_some());

    // Decisions due at 0.8s, 1.6s and 2.4s fall inside the 3s effect. Only the one at
    // 3.2s is free.
    session.tick(start + Duration::from_millis(3500));
    assert_eq!(session.obstruction(Side::Opponent, start + Duration::from_millis(3500)), None);
    assert_eq!(session.selection(Side::Opponent).len(), 1);
    assert_eq!(session.tally(Side::Opponent).score, 0);
}
