use std::ops::RangeInclusive;
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};
use web_time::Instant;

use crate::opponent::{Opponent, OpponentKind};
use crate::puzzle::regenerate_puzzle;
use crate::{generate_puzzle, CpuDifficulty, DuelConfig, ImageCatalog, PlayerId, Puzzle, Verdict};

/// Decisions further behind than this many intervals are dropped instead of replayed.
const MAX_CATCH_UP_TICKS: u32 = 16;

/// The CPU opponent.
///
/// Every `tick_interval` the peer makes one decision:
///
/// 1. If obstructed, lose the decision with `obstructed_skip_probability`.
/// 2. If some correct images are still unselected, select one of them with
///    `select_probability`. The peer never deselects and never picks a wrong image.
/// 3. Otherwise commit with `commit_probability`. The commit is graded wrong with
///    `mistake_probability`, and correct otherwise.
///
/// After a correct commit the peer moves on to a fresh puzzle. After a wrong one it clears
/// its selection and retries, unless the puzzle has no correct image at all, in which case
/// it moves on as well.
#[derive(Debug, Clone)]
pub struct SimulatedPeer {
    id: PlayerId,
    difficulty: CpuDifficulty,
    catalog: Arc<ImageCatalog>,
    grid_size: usize,
    correct: RangeInclusive<usize>,
    rng: SmallRng,
    puzzle: Puzzle,
    next_decision_at: Option<Instant>,
}

impl SimulatedPeer {
    /// Creates a CPU with a fresh puzzle whose first decision is due one interval after `now`.
    #[must_use]
    pub fn new(catalog: Arc<ImageCatalog>, config: &DuelConfig, seed: u64, now: Instant) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let correct = config.min_correct..=config.max_correct;
        let puzzle = generate_puzzle(&catalog, config.grid_size, correct.clone(), &mut rng);
        Self {
            id: PlayerId::cpu(),
            difficulty: config.cpu,
            catalog,
            grid_size: config.grid_size,
            correct,
            rng,
            puzzle,
            next_decision_at: Some(now + config.cpu.tick_interval),
        }
    }

    /// Replaces the current puzzle.
    pub fn replace_puzzle(&mut self, puzzle: Puzzle) {
        self.puzzle = puzzle;
    }

    /// The CPU's difficulty.
    #[must_use]
    pub fn difficulty(&self) -> &CpuDifficulty {
        &self.difficulty
    }

    /// When the next decision is due, or `None` once cancelled.
    #[must_use]
    pub fn next_decision_at(&self) -> Option<Instant> {
        self.next_decision_at
    }

    fn chance(&mut self, probability: f64) -> bool {
        self.rng.gen::<f64>() < probability
    }

    fn advance_schedule(&mut self, due: Instant, now: Instant) {
        let interval = self.difficulty.tick_interval;
        let next = due + interval;
        self.next_decision_at = if now.saturating_duration_since(next) > interval * MAX_CATCH_UP_TICKS {
            debug!("simulated peer fell behind, resynchronizing schedule");
            Some(now + interval)
        } else {
            Some(next)
        };
    }

    /// Runs one decision. Returns a verdict when the CPU committed.
    fn decide(&mut self, obstructed: bool) -> Option<Verdict> {
        if obstructed && self.chance(self.difficulty.obstructed_skip_probability) {
            trace!("simulated peer skips an obstructed decision");
            return None;
        }

        let remaining = self.puzzle.remaining();
        if !remaining.is_empty() {
            if self.chance(self.difficulty.select_probability) {
                if let Some(&index) = remaining.choose(&mut self.rng) {
                    // Remaining indices come from the puzzle itself, so the toggle is in range.
                    let _ = self.puzzle.toggle(index);
                    trace!(index, "simulated peer selects");
                }
            }
            return None;
        }

        if !self.chance(self.difficulty.commit_probability) {
            return None;
        }
        let verdict = if self.chance(self.difficulty.mistake_probability) {
            Verdict::Wrong
        } else {
            self.puzzle.verify()
        };
        trace!(?verdict, "simulated peer commits");
        match verdict {
            Verdict::Correct => self.next_puzzle(),
            Verdict::Wrong if !self.puzzle.is_solvable() => self.next_puzzle(),
            Verdict::Wrong => self.puzzle.clear_selection(),
        }
        Some(verdict)
    }

    fn next_puzzle(&mut self) {
        self.puzzle = regenerate_puzzle(
            &self.catalog,
            self.grid_size,
            self.correct.clone(),
            &self.puzzle,
            &mut self.rng,
        );
    }
}

impl Opponent for SimulatedPeer {
    fn kind(&self) -> OpponentKind {
        OpponentKind::Simulated
    }

    fn player_id(&self) -> &PlayerId {
        &self.id
    }

    fn on_tick(&mut self, now: Instant, obstructed_until: Option<Instant>) -> Option<Verdict> {
        loop {
            let due = self.next_decision_at?;
            if now < due {
                return None;
            }
            self.advance_schedule(due, now);
            let obstructed = obstructed_until.is_some_and(|until| due < until);
            if let Some(verdict) = self.decide(obstructed) {
                return Some(verdict);
            }
        }
    }

    fn current_puzzle_snapshot(&self) -> Option<&Puzzle> {
        Some(&self.puzzle)
    }

    fn cancel(&mut self) {
        self.next_decision_at = None;
    }
}
