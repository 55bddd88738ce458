//! Random operation sequences against [`DuelSession`] and [`Referee`].
//!
//! Whatever the order of intents, ticks and inbound frames, a session must:
//! - pass `check_invariants()` after every step
//! - have a winner exactly when it is in `RESULT`
//! - never lower a score while a match is running
//! - never exceed the win threshold

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use captcha_duel::telemetry::InvariantChecker;
use captcha_duel::{DuelSession, Intent, SessionState, Side, WIN_THRESHOLD};
use proptest::prelude::*;
use web_time::{Duration, Instant};

use crate::common::{cpu_session, feed, online_session, Arena};

#[derive(Debug, Clone)]
enum Step {
    Intent(Intent),
    Advance(u64),
    SolveLocal,
}

fn intent_strategy() -> impl Strategy<Value = Intent> {
    prop_oneof![
        Just(Intent::StartLocalMatch),
        Just(Intent::Cancel),
        (0usize..12).prop_map(|index| Intent::Select { index }),
        Just(Intent::Verify),
        Just(Intent::GoHome),
        Just(Intent::Reset),
    ]
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => intent_strategy().prop_map(Step::Intent),
        3 => (1u64..2500).prop_map(Step::Advance),
        2 => Just(Step::SolveLocal),
    ]
}

fn inbound_frame_strategy() -> impl Strategy<Value = String> {
    let images = r#"["images/car_01.jpg","images/bus_01.jpg","images/car_02.jpg","images/tree_01.jpg"]"#;
    prop_oneof![
        Just(format!(r#"{{"type":"GAME_START","payload":{{"target":"Cars","images":{images}}}}}"#)),
        (0usize..6).prop_map(|i| format!(r#"{{"type":"OPPONENT_SELECT","payload":{{"player_id":"p_2","image_index":{i}}}}}"#)),
        (0u32..7).prop_map(move |s| format!(r#"{{"type":"OPPONENT_UPDATE","payload":{{"images":{images},"score":{s},"player_id":"p_2"}}}}"#)),
        (0u32..7).prop_map(move |s| format!(r#"{{"type":"UPDATE_PATTERN","payload":{{"target":"Cars","images":{images},"score":{s}}}}}"#)),
        Just(r#"{"type":"VERIFY_FAILED"}"#.to_owned()),
        prop_oneof![Just("BLUR"), Just("SPIN"), Just("CONFETTI")].prop_map(|e| format!(r#"{{"type":"OBSTRUCTION","payload":{{"effect":"{e}"}}}}"#)),
        (0u32..7).prop_map(|c| format!(r#"{{"type":"OPPONENT_PROGRESS","payload":{{"player_id":"p_2","correct_count":{c},"total_needed":5}}}}"#)),
        prop_oneof![Just("p_1"), Just("p_2")].prop_map(|w| format!(r#"{{"type":"GAME_FINISHED","payload":{{"winner_id":"{w}"}}}}"#)),
        Just(r#"{"type":"ROOM_ASSIGNED","payload":{"room_id":"elsewhere"}}"#.to_owned()),
        Just("garbage".to_owned()),
    ]
}

fn assert_session_invariants(session: &DuelSession) -> Result<(), TestCaseError> {
    prop_assert!(
        session.check_invariants().is_ok(),
        "{:?}",
        session.check_invariants()
    );
    prop_assert_eq!(
        session.winner_id().is_some(),
        session.current_state() == SessionState::Result
    );
    for side in Side::BOTH {
        prop_assert!(session.tally(side).score <= WIN_THRESHOLD);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_cpu_session_survives_any_intent_sequence(seed in any::<u64>(), steps in prop::collection::vec(step_strategy(), 1..60)) {
        let (mut session, _observer) = cpu_session(captcha_duel::DuelConfig::default(), seed);
        let mut now = Instant::now();
        let mut last = (0, 0);

        for step in steps {
            match step {
                Step::Intent(intent) => session.apply_intent(intent, now).unwrap(),
                Step::Advance(ms) => {
                    now += Duration::from_millis(ms);
                    session.tick(now);
                },
                Step::SolveLocal => {
                    if session.current_state() == SessionState::Playing {
                        crate::common::solve(&mut session, now);
                    }
                },
            }
            assert_session_invariants(&session)?;

            let scores = (session.tally(Side::Local).score, session.tally(Side::Opponent).score);
            if session.current_state() == SessionState::Playing {
                prop_assert!(scores.0 >= last.0 && scores.1 >= last.1);
            }
            last = if session.current_state() == SessionState::Login { (0, 0) } else { scores };
        }
    }

    #[test]
    fn prop_online_session_survives_any_frame_sequence(frames in prop::collection::vec(inbound_frame_strategy(), 1..40)) {
        let (mut session, mut server, _observer) = online_session("p_1");
        let now = Instant::now();
        session.join_room("duel").unwrap();

        let mut last = (0, 0);
        for frame in frames {
            feed(&mut session, &mut server, &[frame.as_str()], now);
            assert_session_invariants(&session)?;
            let scores = (session.tally(Side::Local).score, session.tally(Side::Opponent).score);
            prop_assert!(scores.0 >= last.0 && scores.1 >= last.1);
            last = scores;
        }
    }

    #[test]
    fn prop_referee_and_clients_agree(seed in any::<u64>(), solvers in prop::collection::vec(0usize..2, 1..12)) {
        let mut arena = Arena::new(2, seed);
        arena.join_all();

        for solver in solvers {
            if arena.session(solver).current_state() != SessionState::Playing {
                break;
            }
            arena.solve(solver);
        }

        let players = ["p_1", "p_2"];
        for (index, player) in players.iter().enumerate() {
            let referee = arena
                .referee
                .tally(crate::common::ROOM, &(*player).into())
                .unwrap();
            prop_assert_eq!(arena.session(index).tally(Side::Local).score, referee.score);
            prop_assert_eq!(arena.session(1 - index).tally(Side::Opponent).score, referee.score);
            assert_session_invariants(arena.session(index))?;
        }
    }
}
