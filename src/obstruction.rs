//! Timed obstruction effects applied to either side of a duel.
//!
//! An effect is a handicap for the presentation layer (shaking grid, blur, onion rain).
//! The engine only tracks which effect is active on which side and when it ends. At most
//! one effect is active per side; a new one replaces the old one and restarts its timer.

use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use web_time::{Duration, Instant};

use crate::config::MAX_TIMER_DURATION;
use crate::{DuelError, Side, OBSTRUCTION_DURATION};

/// The fixed effect catalog.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    /// The grid shakes.
    Shake,
    /// The grid spins.
    Spin,
    /// The grid is skewed.
    Skew,
    /// The images are blurred.
    Blur,
    /// Colors are inverted.
    Invert,
    /// Colors are removed.
    Grayscale,
    /// Colors are sepia-toned.
    Sepia,
    /// Onions rain over the grid.
    OnionRain,
}

impl Effect {
    /// Every effect, in catalog order.
    pub const ALL: [Self; 8] = [
        Self::Shake,
        Self::Spin,
        Self::Skew,
        Self::Blur,
        Self::Invert,
        Self::Grayscale,
        Self::Sepia,
        Self::OnionRain,
    ];

    /// The wire name, e.g. `ONION_RAIN`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shake => "SHAKE",
            Self::Spin => "SPIN",
            Self::Skew => "SKEW",
            Self::Blur => "BLUR",
            Self::Invert => "INVERT",
            Self::Grayscale => "GRAYSCALE",
            Self::Sepia => "SEPIA",
            Self::OnionRain => "ONION_RAIN",
        }
    }

    /// Picks an effect uniformly at random.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL.choose(rng).copied().unwrap_or(Self::Shake)
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses wire names case-insensitively; `-` and spaces count as `_`.
///
/// ```
/// use captcha_duel::Effect;
///
/// assert_eq!("ONION_RAIN".parse::<Effect>()?, Effect::OnionRain);
/// assert_eq!("onion-rain".parse::<Effect>()?, Effect::OnionRain);
/// assert!("CONFETTI".parse::<Effect>().is_err());
/// # Ok::<(), captcha_duel::DuelError>(())
/// ```
impl FromStr for Effect {
    type Err = DuelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        Self::ALL
            .into_iter()
            .find(|effect| effect.as_str() == normalized)
            .ok_or_else(|| DuelError::UnknownEffect { name: s.to_owned() })
    }
}

/// An effect together with its expiry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ObstructionState {
    /// The active effect.
    pub effect: Effect,
    /// The moment the effect ends.
    pub expires_at: Instant,
}

impl ObstructionState {
    /// An effect whose expiry is at or before `now` counts as inactive.
    #[must_use]
    pub fn is_active(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Applies, queries, and expires obstruction effects for both sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObstructionEngine {
    duration: Duration,
    local: Option<ObstructionState>,
    opponent: Option<ObstructionState>,
}

impl Default for ObstructionEngine {
    fn default() -> Self {
        Self::new(OBSTRUCTION_DURATION)
    }
}

impl ObstructionEngine {
    /// Creates an engine whose effects last `duration`, capped at
    /// [`MAX_TIMER_DURATION`].
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self {
            duration: duration.min(MAX_TIMER_DURATION),
            local: None,
            opponent: None,
        }
    }

    /// How long an applied effect lasts.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    fn slot_mut(&mut self, side: Side) -> &mut Option<ObstructionState> {
        match side {
            Side::Local => &mut self.local,
            Side::Opponent => &mut self.opponent,
        }
    }

    /// Applies a uniformly chosen effect to `side` and returns it.
    pub fn apply_random_effect<R: Rng + ?Sized>(
        &mut self,
        side: Side,
        now: Instant,
        rng: &mut R,
    ) -> Effect {
        let effect = Effect::random(rng);
        self.apply_effect(side, effect, now);
        effect
    }

    /// Applies `effect` to `side`, replacing any active effect and restarting the timer.
    pub fn apply_effect(&mut self, side: Side, effect: Effect, now: Instant) {
        let expires_at = now + self.duration;
        *self.slot_mut(side) = Some(ObstructionState { effect, expires_at });
    }

    /// Clears every effect that has expired by `now` and reports what was cleared.
    pub fn tick(&mut self, now: Instant) -> Vec<(Side, Effect)> {
        let mut expired = Vec::new();
        for side in Side::BOTH {
            let slot = self.slot_mut(side);
            if let Some(state) = *slot {
                if !state.is_active(now) {
                    *slot = None;
                    expired.push((side, state.effect));
                }
            }
        }
        expired
    }

    /// The effect active on `side` at `now`.
    #[must_use]
    pub fn active(&self, side: Side, now: Instant) -> Option<Effect> {
        self.state(side)
            .filter(|state| state.is_active(now))
            .map(|state| state.effect)
    }

    /// The raw state of `side`, which may already be expired if `tick` was not called.
    #[must_use]
    pub fn state(&self, side: Side) -> Option<ObstructionState> {
        match side {
            Side::Local => self.local,
            Side::Opponent => self.opponent,
        }
    }

    /// The earliest pending expiry, for scheduling the next tick.
    #[must_use]
    pub fn next_expiry(&self) -> Option<Instant> {
        [self.local, self.opponent]
            .into_iter()
            .flatten()
            .map(|state| state.expires_at)
            .min()
    }

    /// Drops every effect without reporting it.
    pub fn clear(&mut self) {
        self.local = None;
        self.opponent = None;
    }
}
