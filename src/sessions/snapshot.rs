use serde::Serialize;
use web_time::Instant;

use crate::{Effect, MatchMode, PlayerId, SessionState, Verdict};

/// The verification pop-up shown after a local verify.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Feedback {
    /// What the pop-up announces.
    pub verdict: Verdict,
    /// When it goes away.
    pub expires_at: Instant,
}

impl Feedback {
    /// Returns `true` while the pop-up should still be visible.
    #[must_use]
    pub fn is_visible(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Read-only view of one side, for rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SideSnapshot {
    /// Player id of the side.
    pub player_id: Option<PlayerId>,
    /// Current score.
    pub score: u32,
    /// Current combo.
    pub combo: u32,
    /// Label text of the side's puzzle.
    pub target: Option<String>,
    /// Grid of the side's puzzle.
    pub images: Vec<String>,
    /// Selected grid indices, ascending.
    pub selection: Vec<usize>,
    /// Active obstruction effect.
    pub obstruction: Option<Effect>,
}

/// Read-only view of a whole session at one instant.
///
/// Snapshots are plain data and serialize to JSON for presentation layers that live across
/// an FFI or process boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Lifecycle state.
    pub state: SessionState,
    /// Match mode, once chosen.
    pub mode: Option<MatchMode>,
    /// Room of the match.
    pub room_id: Option<String>,
    /// Id of the local player.
    pub local_player_id: PlayerId,
    /// Winner, set exactly when `state` is `RESULT`.
    pub winner_id: Option<PlayerId>,
    /// Last lobby status word received while waiting.
    pub lobby_status: Option<String>,
    /// A local `VERIFY` is waiting for its grade.
    pub awaiting_verdict: bool,
    /// Visible verification pop-up.
    pub feedback: Option<Verdict>,
    /// The local side.
    pub local: SideSnapshot,
    /// The opposing side.
    pub opponent: SideSnapshot,
}

impl SessionSnapshot {
    /// Returns `true` if the local player won.
    #[must_use]
    pub fn local_won(&self) -> bool {
        self.winner_id.as_ref() == Some(&self.local_player_id)
    }
}
