//! Tunables for a duel session and its simulated opponent.
//!
//! | Config Type | Purpose | Key Presets |
//! |-------------|---------|-------------|
//! | `DuelConfig` | Match rules, timers, grid shape | `quick_match()`, `marathon()` |
//! | `CpuDifficulty` | Simulated opponent decision loop | `easy()`, `normal()`, `hard()` |
//!
//! # Example
//!
//! ```
//! use captcha_duel::{CpuDifficulty, DuelConfig, SessionBuilder};
//!
//! let config = DuelConfig {
//!     cpu: CpuDifficulty::hard(),
//!     ..DuelConfig::quick_match()
//! };
//! let session = SessionBuilder::new().with_config(config).build()?;
//! # Ok::<(), captcha_duel::DuelError>(())
//! ```

use web_time::Duration;

use crate::{
    DuelError, DuelResult, COMBO_THRESHOLD, CPU_TICK_INTERVAL, GRID_SIZE, OBSTRUCTION_DURATION,
    WIN_THRESHOLD,
};

/// Longest accepted value for any timer in a config.
///
/// Timers are added to the current [`Instant`](web_time::Instant), which must not overflow.
pub const MAX_TIMER_DURATION: Duration = Duration::from_secs(60 * 60);

fn check_timer(field: &'static str, value: Duration) -> DuelResult<()> {
    if value > MAX_TIMER_DURATION {
        return Err(DuelError::invalid_config(
            field,
            format!("{value:?} exceeds the {MAX_TIMER_DURATION:?} limit"),
        ));
    }
    Ok(())
}

/// Parameters of the simulated opponent's decision loop.
///
/// Every decision happens on a tick spaced `tick_interval` apart. Probabilities are in
/// `[0.0, 1.0]`.
///
/// # Forward Compatibility
///
/// New fields may be added. Construct with `..CpuDifficulty::default()`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use = "CpuDifficulty has no effect unless placed in a DuelConfig"]
pub struct CpuDifficulty {
    /// Time between two decisions.
    ///
    /// Default: 800ms
    pub tick_interval: Duration,

    /// Chance to pick one more correct image when the selection is incomplete.
    ///
    /// Default: 0.7
    pub select_probability: f64,

    /// Chance to submit once the selection is complete.
    ///
    /// Default: 0.5
    pub commit_probability: f64,

    /// Chance to lose the whole tick while an obstruction is active on the CPU side.
    ///
    /// Default: 0.5
    pub obstructed_skip_probability: f64,

    /// Chance that a commit is graded wrong even though the selection was complete.
    ///
    /// At `0.0` the CPU never makes mistakes.
    ///
    /// Default: 0.0
    pub mistake_probability: f64,
}

impl Default for CpuDifficulty {
    fn default() -> Self {
        Self {
            tick_interval: CPU_TICK_INTERVAL,
            select_probability: 0.7,
            commit_probability: 0.5,
            obstructed_skip_probability: 0.5,
            mistake_probability: 0.0,
        }
    }
}

impl CpuDifficulty {
    /// Same as [`CpuDifficulty::default`].
    pub fn normal() -> Self {
        Self::default()
    }

    /// Slow, hesitant, and occasionally wrong.
    pub fn easy() -> Self {
        Self {
            tick_interval: Duration::from_millis(1200),
            select_probability: 0.5,
            commit_probability: 0.4,
            obstructed_skip_probability: 0.8,
            mistake_probability: 0.15,
        }
    }

    /// Fast and shrugs off most obstructions.
    pub fn hard() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            select_probability: 0.9,
            commit_probability: 0.8,
            obstructed_skip_probability: 0.25,
            mistake_probability: 0.0,
        }
    }

    /// Validates the difficulty.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::InvalidConfig`] for a zero tick interval, one above
    /// [`MAX_TIMER_DURATION`], or a probability outside `[0.0, 1.0]`.
    pub fn validate(&self) -> DuelResult<()> {
        if self.tick_interval.is_zero() {
            return Err(DuelError::invalid_config(
                "cpu.tick_interval",
                "must be greater than zero",
            ));
        }
        check_timer("cpu.tick_interval", self.tick_interval)?;
        let probabilities = [
            ("cpu.select_probability", self.select_probability),
            ("cpu.commit_probability", self.commit_probability),
            ("cpu.obstructed_skip_probability", self.obstructed_skip_probability),
            ("cpu.mistake_probability", self.mistake_probability),
        ];
        for (field, value) in probabilities {
            if !(0.0..=1.0).contains(&value) {
                return Err(DuelError::invalid_config(
                    field,
                    format!("{value} is not within [0.0, 1.0]"),
                ));
            }
        }
        Ok(())
    }
}

/// Rules and timers of a match.
///
/// The defaults are the canonical game: first to 5, 9-image grids with 1 to 3 correct
/// images, an obstruction after 2 correct verifications in a row that lasts 3 seconds.
///
/// # Forward Compatibility
///
/// New fields may be added. Construct with `..DuelConfig::default()`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use = "DuelConfig has no effect unless passed to SessionBuilder::with_config()"]
pub struct DuelConfig {
    /// Score that ends the match.
    ///
    /// Default: 5
    pub win_threshold: u32,

    /// Images per locally generated grid.
    ///
    /// Default: 9
    pub grid_size: usize,

    /// Lower bound on correct images per generated grid, when the catalog allows it.
    ///
    /// Default: 1
    pub min_correct: usize,

    /// Upper bound on correct images per generated grid.
    ///
    /// Default: 3
    pub max_correct: usize,

    /// Consecutive correct verifications that obstruct the other side.
    ///
    /// Default: 2
    pub combo_threshold: u32,

    /// Lifetime of an obstruction effect.
    ///
    /// Default: 3s
    pub obstruction_duration: Duration,

    /// Lifetime of the verification pop-up shown after each local verify.
    ///
    /// Default: 800ms
    pub feedback_duration: Duration,

    /// Refuse local grid clicks while the local side is obstructed.
    ///
    /// Off by default: effects are purely visual for the human player.
    pub lock_selection_while_obstructed: bool,

    /// The simulated opponent's behavior.
    pub cpu: CpuDifficulty,
}

impl Default for DuelConfig {
    fn default() -> Self {
        Self {
            win_threshold: WIN_THRESHOLD,
            grid_size: GRID_SIZE,
            min_correct: 1,
            max_correct: 3,
            combo_threshold: COMBO_THRESHOLD,
            obstruction_duration: OBSTRUCTION_DURATION,
            feedback_duration: Duration::from_millis(800),
            lock_selection_while_obstructed: false,
            cpu: CpuDifficulty::default(),
        }
    }
}

impl DuelConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// First to 3 on a smaller grid.
    pub fn quick_match() -> Self {
        Self {
            win_threshold: 3,
            grid_size: 6,
            max_correct: 2,
            ..Self::default()
        }
    }

    /// First to 10, with longer obstructions and a mechanical handicap for the human side.
    pub fn marathon() -> Self {
        Self {
            win_threshold: 10,
            obstruction_duration: Duration::from_secs(5),
            lock_selection_while_obstructed: true,
            ..Self::default()
        }
    }

    /// Validates the config, including the nested [`CpuDifficulty`].
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::InvalidConfig`] naming the first offending field. Timers must
    /// not exceed [`MAX_TIMER_DURATION`].
    pub fn validate(&self) -> DuelResult<()> {
        if self.win_threshold == 0 {
            return Err(DuelError::invalid_config(
                "win_threshold",
                "must be at least 1",
            ));
        }
        if self.grid_size < 2 {
            return Err(DuelError::invalid_config(
                "grid_size",
                format!("{} is too small, need at least 2 images", self.grid_size),
            ));
        }
        if self.min_correct == 0 || self.min_correct > self.max_correct {
            return Err(DuelError::invalid_config(
                "min_correct",
                format!(
                    "must satisfy 1 <= min_correct ({}) <= max_correct ({})",
                    self.min_correct, self.max_correct
                ),
            ));
        }
        if self.max_correct >= self.grid_size {
            return Err(DuelError::invalid_config(
                "max_correct",
                format!(
                    "{} would allow an all-correct grid of {}",
                    self.max_correct, self.grid_size
                ),
            ));
        }
        if self.combo_threshold == 0 {
            return Err(DuelError::invalid_config(
                "combo_threshold",
                "must be at least 1",
            ));
        }
        if self.obstruction_duration.is_zero() {
            return Err(DuelError::invalid_config(
                "obstruction_duration",
                "must be greater than zero",
            ));
        }
        check_timer("obstruction_duration", self.obstruction_duration)?;
        check_timer("feedback_duration", self.feedback_duration)?;
        self.cpu.validate()
    }
}
