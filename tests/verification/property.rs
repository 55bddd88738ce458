//! Property-based tests for puzzles, the score board and obstruction timing.
//!
//! # Properties Tested
//!
//! ## Puzzle
//! - Toggling an index twice leaves the selection unchanged
//! - Grading depends on the selected set only, never on click order
//! - Any selection other than the exact correct set is wrong
//! - Generated grids have the requested size and are solvable
//!
//! ## ScoreBoard
//! - Score equals the number of correct verifications until the winner is fixed
//! - Combo never reaches the threshold and resets on every miss
//! - An obstruction is requested exactly on every second correct verification in a row
//! - After a winner is fixed nothing changes
//!
//! ## ObstructionEngine
//! - An effect is active for exactly its duration, then cleared by `tick`

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::collections::BTreeSet;

use captcha_duel::network::codec::decode;
use captcha_duel::telemetry::InvariantChecker;
use captcha_duel::{
    generate_puzzle, Effect, ImageCatalog, ObstructionEngine, ScoreBoard, Side, Verdict,
    COMBO_THRESHOLD, OBSTRUCTION_DURATION, WIN_THRESHOLD,
};
use proptest::prelude::*;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use web_time::{Duration, Instant};

// ============================================================================
// Strategies
// ============================================================================

fn verdict_strategy() -> impl Strategy<Value = Verdict> {
    prop_oneof![Just(Verdict::Correct), Just(Verdict::Wrong)]
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Local), Just(Side::Opponent)]
}

fn effect_strategy() -> impl Strategy<Value = Effect> {
    proptest::sample::select(Effect::ALL.to_vec())
}

fn puzzle_for(seed: u64) -> captcha_duel::Puzzle {
    let mut rng = SmallRng::seed_from_u64(seed);
    generate_puzzle(&ImageCatalog::builtin(), 9, 1..=3, &mut rng)
}

// ============================================================================
// Puzzle
// ============================================================================

proptest! {
    #[test]
    fn prop_toggle_is_an_involution(seed in any::<u64>(), clicks in prop::collection::vec(0usize..9, 0..12), index in 0usize..9) {
        let mut puzzle = puzzle_for(seed);
        for click in clicks {
            puzzle.toggle(click).unwrap();
        }
        let before = puzzle.selection().clone();
        puzzle.toggle(index).unwrap();
        puzzle.toggle(index).unwrap();
        prop_assert_eq!(puzzle.selection(), &before);
    }

    #[test]
    fn prop_grading_ignores_click_order(seed in any::<u64>(), shuffle_seed in any::<u64>()) {
        use rand::seq::SliceRandom;

        let mut puzzle = puzzle_for(seed);
        let mut order: Vec<usize> = puzzle.correct_indices().iter().copied().collect();
        order.shuffle(&mut SmallRng::seed_from_u64(shuffle_seed));
        for index in order {
            puzzle.toggle(index).unwrap();
        }
        prop_assert_eq!(puzzle.verify(), Verdict::Correct);
        prop_assert!(puzzle.remaining().is_empty());
    }

    #[test]
    fn prop_only_the_exact_set_is_correct(seed in any::<u64>(), picks in prop::collection::btree_set(0usize..9, 0..9)) {
        let mut puzzle = puzzle_for(seed);
        for &index in &picks {
            puzzle.toggle(index).unwrap();
        }
        let expected = if picks == *puzzle.correct_indices() {
            Verdict::Correct
        } else {
            Verdict::Wrong
        };
        prop_assert_eq!(puzzle.verify(), expected);
    }

    #[test]
    fn prop_out_of_range_toggle_changes_nothing(seed in any::<u64>(), index in 9usize..100) {
        let mut puzzle = puzzle_for(seed);
        prop_assert!(puzzle.toggle(index).is_err());
        prop_assert!(puzzle.selection().is_empty());
    }

    #[test]
    fn prop_generated_grids_are_playable(seed in any::<u64>(), grid_size in 4usize..16) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let puzzle = generate_puzzle(&ImageCatalog::builtin(), grid_size, 1..=3, &mut rng);
        prop_assert_eq!(puzzle.len(), grid_size);
        prop_assert!(puzzle.is_solvable());
        prop_assert!(puzzle.correct_indices().len() <= 3);
        prop_assert!(puzzle.correct_indices().len() < grid_size);
        let distinct: BTreeSet<&String> = puzzle.images().iter().collect();
        prop_assert_eq!(distinct.len(), grid_size);
    }
}

// ============================================================================
// ScoreBoard
// ============================================================================

proptest! {
    #[test]
    fn prop_score_and_combo_follow_verdicts(moves in prop::collection::vec((side_strategy(), verdict_strategy()), 0..40)) {
        let mut board = ScoreBoard::default();
        let mut expected = [(0u32, 0u32); 2];

        for (side, verdict) in moves {
            let decided = board.is_decided();
            let update = board.apply_verification(side, verdict);
            if decided {
                prop_assert!(update.is_none());
                continue;
            }
            let update = update.unwrap();
            let slot = &mut expected[usize::from(side == Side::Opponent)];
            let mut obstruct = None;
            match verdict {
                Verdict::Correct => {
                    slot.0 += 1;
                    slot.1 += 1;
                    if slot.1 == COMBO_THRESHOLD {
                        slot.1 = 0;
                        obstruct = Some(side.other());
                    }
                },
                Verdict::Wrong => slot.1 = 0,
            }
            prop_assert_eq!(update.tally.score, slot.0);
            prop_assert_eq!(update.tally.combo, slot.1);
            prop_assert_eq!(update.obstruct, obstruct);
            prop_assert_eq!(update.winner.is_some(), slot.0 >= WIN_THRESHOLD);
            prop_assert!(board.check_invariants().is_ok());
        }
    }

    #[test]
    fn prop_merge_never_lowers_a_score(reports in prop::collection::vec(0u32..8, 1..20)) {
        let mut board = ScoreBoard::default();
        let mut high = 0;
        for score in reports {
            if board.is_decided() {
                break;
            }
            board.merge_score(Side::Opponent, score);
            high = high.max(score.min(WIN_THRESHOLD));
            prop_assert_eq!(board.tally(Side::Opponent).score, high);
        }
    }
}

// ============================================================================
// ObstructionEngine
// ============================================================================

proptest! {
    #[test]
    fn prop_effect_lives_exactly_its_duration(effect in effect_strategy(), side in side_strategy(), offset_ms in 0u64..6000) {
        let start = Instant::now();
        let mut engine = ObstructionEngine::default();
        engine.apply_effect(side, effect, start);

        let at = start + Duration::from_millis(offset_ms);
        let alive = Duration::from_millis(offset_ms) < OBSTRUCTION_DURATION;
        prop_assert_eq!(engine.active(side, at).is_some(), alive);
        prop_assert_eq!(engine.active(side.other(), at), None);

        let cleared = engine.tick(at);
        if alive {
            prop_assert!(cleared.is_empty());
            prop_assert_eq!(engine.next_expiry(), Some(start + OBSTRUCTION_DURATION));
        } else {
            prop_assert_eq!(cleared, vec![(side, effect)]);
            prop_assert_eq!(engine.next_expiry(), None);
        }
    }

    #[test]
    fn prop_new_effect_replaces_the_old_one(first in effect_strategy(), second in effect_strategy(), gap_ms in 0u64..3000) {
        let start = Instant::now();
        let mut engine = ObstructionEngine::default();
        engine.apply_effect(Side::Local, first, start);
        let later = start + Duration::from_millis(gap_ms);
        engine.apply_effect(Side::Local, second, later);

        prop_assert_eq!(engine.active(Side::Local, later), Some(second));
        let end = later + OBSTRUCTION_DURATION;
        prop_assert_eq!(engine.active(Side::Local, end - Duration::from_millis(1)), Some(second));
        prop_assert_eq!(engine.active(Side::Local, end), None);
    }
}

// ============================================================================
// Codec
// ============================================================================

proptest! {
    #[test]
    fn prop_decode_never_panics(frame in ".{0,200}") {
        let _ = decode(&frame);
    }

    #[test]
    fn prop_decode_never_panics_on_envelopes(kind in "[A-Z_]{0,20}", payload in "[{}\\[\\]\":,a-z0-9 ]{0,60}") {
        let _ = decode(&format!(r#"{{"type":"{kind}","payload":{payload}}}"#));
    }
}
