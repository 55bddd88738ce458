//! Score and combo bookkeeping for both sides of a duel.

use serde::{Deserialize, Serialize};

use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::{DuelConfig, Side, Verdict, COMBO_THRESHOLD, WIN_THRESHOLD};

/// Score and current combo of one side.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tally {
    /// Correct verifications so far. Never decreases.
    pub score: u32,
    /// Correct verifications in a row since the last miss or obstruction trigger.
    pub combo: u32,
}

/// What a single verification did to the board.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[must_use]
pub struct ScoreUpdate {
    /// The side that verified.
    pub side: Side,
    /// The graded outcome.
    pub verdict: Verdict,
    /// The side's tally after the update.
    pub tally: Tally,
    /// Side to obstruct, if the combo threshold was reached.
    pub obstruct: Option<Side>,
    /// Winner, if this update ended the match.
    pub winner: Option<Side>,
}

/// Per-session counters, one [`Tally`] per side.
///
/// Once a winner is fixed the board is frozen.
///
/// ```
/// use captcha_duel::{ScoreBoard, Side, Verdict};
///
/// let mut board = ScoreBoard::new(5, 2);
/// let first = board.apply_verification(Side::Local, Verdict::Correct).unwrap();
/// assert_eq!(first.obstruct, None);
/// let second = board.apply_verification(Side::Local, Verdict::Correct).unwrap();
/// assert_eq!(second.obstruct, Some(Side::Opponent));
/// assert_eq!(board.tally(Side::Local).combo, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreBoard {
    local: Tally,
    opponent: Tally,
    win_threshold: u32,
    combo_threshold: u32,
    winner: Option<Side>,
}

impl Default for ScoreBoard {
    fn default() -> Self {
        Self::new(WIN_THRESHOLD, COMBO_THRESHOLD)
    }
}

impl ScoreBoard {
    /// Creates an empty board.
    #[must_use]
    pub fn new(win_threshold: u32, combo_threshold: u32) -> Self {
        Self {
            local: Tally::default(),
            opponent: Tally::default(),
            win_threshold: win_threshold.max(1),
            combo_threshold: combo_threshold.max(1),
            winner: None,
        }
    }

    /// Creates an empty board with the thresholds of `config`.
    #[must_use]
    pub fn from_config(config: &DuelConfig) -> Self {
        Self::new(config.win_threshold, config.combo_threshold)
    }

    /// The tally of `side`.
    #[must_use]
    pub fn tally(&self, side: Side) -> Tally {
        match side {
            Side::Local => self.local,
            Side::Opponent => self.opponent,
        }
    }

    fn tally_mut(&mut self, side: Side) -> &mut Tally {
        match side {
            Side::Local => &mut self.local,
            Side::Opponent => &mut self.opponent,
        }
    }

    /// Score needed to win.
    #[must_use]
    pub fn win_threshold(&self) -> u32 {
        self.win_threshold
    }

    /// The winner, once fixed.
    #[must_use]
    pub fn winner(&self) -> Option<Side> {
        self.winner
    }

    /// Returns `true` once a winner is fixed.
    #[must_use]
    pub fn is_decided(&self) -> bool {
        self.winner.is_some()
    }

    /// Records one graded verification for `side`.
    ///
    /// A correct verification adds one point and extends the combo. Reaching the combo
    /// threshold resets the combo and asks for the *other* side to be obstructed. A wrong
    /// verification resets the combo only. Reaching the win threshold fixes the winner.
    ///
    /// Returns `None` without touching the board if the match is already decided.
    pub fn apply_verification(&mut self, side: Side, verdict: Verdict) -> Option<ScoreUpdate> {
        if self.is_decided() {
            return None;
        }
        let combo_threshold = self.combo_threshold;
        let tally = self.tally_mut(side);
        let mut obstruct = None;
        match verdict {
            Verdict::Correct => {
                tally.score = tally.score.saturating_add(1);
                tally.combo += 1;
                if tally.combo >= combo_threshold {
                    tally.combo = 0;
                    obstruct = Some(side.other());
                }
            },
            Verdict::Wrong => tally.combo = 0,
        }
        let tally = *tally;
        let winner = self.check_winner(side);
        Some(ScoreUpdate {
            side,
            verdict,
            tally,
            obstruct,
            winner,
        })
    }

    /// Raises `side`'s score to `score` if that is higher. Combos are not touched.
    ///
    /// Used for authoritative scores reported by the remote counterpart. Reports that
    /// would lower a score are ignored, so reordered or duplicated reports are harmless.
    /// Scores beyond the win threshold are clamped to it.
    /// Returns the winner if the merge ended the match.
    pub fn merge_score(&mut self, side: Side, score: u32) -> Option<Side> {
        if self.is_decided() {
            return None;
        }
        let score = score.min(self.win_threshold);
        let tally = self.tally_mut(side);
        if score <= tally.score {
            return None;
        }
        tally.score = score;
        self.check_winner(side)
    }

    /// Fixes the winner from outside, e.g. on a match-finished message.
    ///
    /// Does nothing if a winner is already fixed.
    pub fn declare_winner(&mut self, side: Side) {
        if self.winner.is_none() {
            self.winner = Some(side);
        }
    }

    /// Clears both tallies and the winner.
    pub fn reset(&mut self) {
        self.local = Tally::default();
        self.opponent = Tally::default();
        self.winner = None;
    }

    fn check_winner(&mut self, side: Side) -> Option<Side> {
        if self.tally(side).score >= self.win_threshold {
            self.winner = Some(side);
        }
        self.winner
    }
}

impl InvariantChecker for ScoreBoard {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for side in Side::BOTH {
            let tally = self.tally(side);
            if tally.combo >= self.combo_threshold {
                return Err(InvariantViolation::new(
                    "ScoreBoard",
                    format!(
                        "{side} combo {} not reset at threshold {}",
                        tally.combo, self.combo_threshold
                    ),
                ));
            }
            if tally.combo > tally.score {
                return Err(InvariantViolation::new(
                    "ScoreBoard",
                    format!("{side} combo {} exceeds score {}", tally.combo, tally.score),
                ));
            }
            if tally.score >= self.win_threshold && self.winner.is_none() {
                return Err(InvariantViolation::new(
                    "ScoreBoard",
                    format!("{side} reached {} without a winner", tally.score),
                ));
            }
        }
        Ok(())
    }
}
