//! # Captcha Duel
//!
//! Captcha Duel is the game core of a two-player "prove you are human" race: both sides
//! repeatedly solve image-selection challenges and the first to reach the win threshold
//! wins. The crate owns the hard parts only: the match session state machine, the duel
//! synchronization protocol spoken with a remote peer, the locally simulated CPU opponent,
//! and the obstruction subsystem that lets a player on a combo interfere with the rival.
//!
//! Rendering, audio playback, and transport setup live outside the crate. They observe
//! [`SessionSnapshot`]s and [`DuelEvent`]s and feed user intents and inbound frames back in.
//! Every mutation is funneled through a single [`DuelSession`], which is driven by three
//! kinds of triggers: user intents, inbound channel frames, and [`DuelSession::tick`].
//!
//! ```
//! use captcha_duel::{Intent, SessionBuilder, SessionState, Side};
//! use web_time::Instant;
//!
//! let mut session = SessionBuilder::new().with_seed(7).build()?;
//! let now = Instant::now();
//!
//! session.apply_intent(Intent::StartLocalMatch, now)?;
//! assert_eq!(session.current_state(), SessionState::Playing);
//! assert!(session.puzzle(Side::Local).is_some());
//! # Ok::<(), captcha_duel::DuelError>(())
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use web_time::Duration;

pub use config::{CpuDifficulty, DuelConfig};
pub use error::{DuelError, DuelResult, InvalidRequestKind};
pub use network::chaos_channel::{ChaosChannel, ChaosConfig, ChaosConfigBuilder, ChaosStats};
pub use network::codec::{CodecError, CodecOperation};
pub use network::local_channel::LocalChannel;
pub use network::messages::{Direction, Message};
pub use obstruction::{Effect, ObstructionEngine, ObstructionState};
pub use opponent::{LocalVerification, Opponent, OpponentKind, RemotePeer, Rival, SimulatedPeer};
pub use puzzle::{generate_puzzle, ImageCatalog, ImageRef, Label, Puzzle};
pub use referee::{ConnectionId, Outbound, Referee};
pub use score::{ScoreBoard, ScoreUpdate, Tally};
pub use sessions::builder::SessionBuilder;
pub use sessions::duel_session::DuelSession;
pub use sessions::event_drain::EventDrain;
pub use sessions::snapshot::{Feedback, SessionSnapshot, SideSnapshot};

pub mod config;
/// Error types returned by session construction and the puzzle API.
pub mod error;
pub mod obstruction;
pub mod opponent;
pub mod puzzle;
pub mod referee;
pub mod score;
pub mod telemetry;
#[doc(hidden)]
pub mod sessions {
    #[doc(hidden)]
    pub mod builder;
    #[doc(hidden)]
    pub mod duel_session;
    #[doc(hidden)]
    pub mod event_drain;
    #[doc(hidden)]
    pub mod snapshot;
}
/// Wire protocol messages, their codec and the frame channels they travel over.
pub mod network {
    pub mod chaos_channel;
    /// JSON text-frame codec for the duel wire protocol.
    ///
    /// Every frame on the channel is one JSON object of the shape
    /// `{"type": "...", "payload": {...}}`.
    pub mod codec;
    pub mod local_channel;
    pub mod messages;
    #[cfg(feature = "tokio")]
    pub mod tokio_channel;
}
#[cfg(feature = "tokio")]
pub mod driver;

// #############
// # CONSTANTS #
// #############

/// Score at which a side wins the match.
pub const WIN_THRESHOLD: u32 = 5;

/// Canonical number of images in a challenge grid.
pub const GRID_SIZE: usize = 9;

/// Consecutive correct verifications that trigger an obstruction on the other side.
pub const COMBO_THRESHOLD: u32 = 2;

/// How long an obstruction effect stays active.
pub const OBSTRUCTION_DURATION: Duration = Duration::from_secs(3);

/// Interval between two decisions of the simulated opponent.
pub const CPU_TICK_INTERVAL: Duration = Duration::from_millis(800);

/// Player id reported for the simulated opponent.
pub const CPU_PLAYER_ID: &str = "cpu";

/// Player id reported for an online opponent whose id was never observed on the wire.
pub const UNKNOWN_OPPONENT_ID: &str = "opponent";

/// Room id bound to sessions playing against the simulated opponent.
pub const LOCAL_CPU_ROOM: &str = "LOCAL_CPU";

// #############
// #   TYPES   #
// #############

/// One of the two sides of a duel, seen from the local session.
///
/// # Examples
///
/// ```
/// use captcha_duel::Side;
///
/// assert_eq!(Side::Local.other(), Side::Opponent);
/// assert_eq!(Side::Opponent.other(), Side::Local);
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The player sitting in front of this session.
    Local,
    /// The remote peer or the simulated CPU.
    Opponent,
}

impl Side {
    /// Both sides, local first.
    pub const BOTH: [Self; 2] = [Self::Local, Self::Opponent];

    /// Returns the opposing side.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Local => Self::Opponent,
            Self::Opponent => Self::Local,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Opponent => f.write_str("opponent"),
        }
    }
}

/// Identifier of a participant as it appears on the wire.
///
/// `PlayerId` is a newtype around `String` so that player ids cannot be mixed up with
/// room ids or image references.
///
/// # Examples
///
/// ```
/// use captcha_duel::PlayerId;
///
/// let id = PlayerId::new("p_42");
/// assert_eq!(id.as_str(), "p_42");
/// assert_eq!(id, "p_42");
/// assert!(PlayerId::cpu().is_cpu());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Wraps a raw id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a throwaway id of the form `p_<n>` with `n` in `0..1000`.
    #[must_use]
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(format!("p_{}", rng.gen_range(0..1000)))
    }

    /// The id used for the simulated opponent.
    #[must_use]
    pub fn cpu() -> Self {
        Self(CPU_PLAYER_ID.to_owned())
    }

    /// Returns `true` for the simulated opponent's id.
    #[must_use]
    pub fn is_cpu(&self) -> bool {
        self.0 == CPU_PLAYER_ID
    }

    /// Borrows the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the id is the empty string.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PlayerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl PartialEq<str> for PlayerId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PlayerId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Lifecycle state of a [`DuelSession`]. You can query it via [`current_state`].
///
/// ```text
///            join_room()              GAME_START
///   Login ───────────────► Waiting ──────────────► Playing ──► Result
///     ▲  │                   │ cancel()              ▲   win /     │
///     │  │ start_local_match │                       │ GAME_FINISHED
///     │  └───────────────────┼───────────────────────┘             │
///     └──────────────────────┴──────────── go_home() ◄─────────────┘
/// ```
///
/// [`current_state`]: DuelSession::current_state
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// No match in progress; mode not chosen yet.
    Login,
    /// Joined an online room, waiting for the match start signal.
    Waiting,
    /// A match is running.
    Playing,
    /// The match is over and a winner is fixed.
    Result,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Login => "LOGIN",
            Self::Waiting => "WAITING",
            Self::Playing => "PLAYING",
            Self::Result => "RESULT",
        };
        f.write_str(name)
    }
}

/// How the opposing side is played. Set once per match.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchMode {
    /// Against the locally simulated opponent.
    Cpu,
    /// Against a remote peer reached through a [`FrameChannel`].
    Online,
}

/// Outcome of grading a submitted selection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// The selection matched the correct set exactly.
    Correct,
    /// Anything else. There is no partial credit.
    Wrong,
}

impl Verdict {
    /// Returns `true` for [`Verdict::Correct`].
    #[must_use]
    pub const fn is_correct(self) -> bool {
        matches!(self, Self::Correct)
    }
}

/// Cue for the fire-and-forget audio collaborator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SoundCue {
    /// A match started.
    Start,
    /// The local player verified correctly.
    Correct,
    /// The local player verified incorrectly.
    Wrong,
    /// The local player got obstructed.
    Obstruction,
    /// The local player won.
    Win,
    /// The local player lost.
    Lose,
}

/// Notifications produced by the session. Handling them is up to the user.
///
/// Drain them with [`DuelSession::events`].
///
/// # Forward Compatibility
///
/// This enum is marked `#[non_exhaustive]`. Always include a wildcard arm when matching.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DuelEvent {
    /// The session moved between lifecycle states.
    StateChanged {
        /// Previous state.
        from: SessionState,
        /// New state.
        to: SessionState,
    },
    /// A match began and both puzzles are in place.
    MatchStarted {
        /// The mode the match is played in.
        mode: MatchMode,
    },
    /// A verification was graded for one side.
    Verified {
        /// Which side verified.
        side: Side,
        /// The outcome.
        verdict: Verdict,
    },
    /// An obstruction effect was applied to a side.
    Obstructed {
        /// The obstructed side.
        side: Side,
        /// The effect now active on that side.
        effect: Effect,
    },
    /// An obstruction effect expired.
    ObstructionCleared {
        /// The side that is free again.
        side: Side,
        /// The effect that expired.
        effect: Effect,
    },
    /// The match reached its terminal state.
    MatchFinished {
        /// The id of the winner, fixed for the rest of the session.
        winner: PlayerId,
        /// Whether the winner is the local player.
        local_won: bool,
    },
}

impl DuelEvent {
    /// Maps the event to the audio cue it should trigger, if any.
    ///
    /// Only events concerning the local player produce cues.
    ///
    /// ```
    /// use captcha_duel::{DuelEvent, Side, SoundCue, Verdict};
    ///
    /// let event = DuelEvent::Verified { side: Side::Local, verdict: Verdict::Wrong };
    /// assert_eq!(event.sound_cue(), Some(SoundCue::Wrong));
    ///
    /// let event = DuelEvent::Verified { side: Side::Opponent, verdict: Verdict::Correct };
    /// assert_eq!(event.sound_cue(), None);
    /// ```
    #[must_use]
    pub fn sound_cue(&self) -> Option<SoundCue> {
        match self {
            Self::MatchStarted { .. } => Some(SoundCue::Start),
            Self::Verified {
                side: Side::Local,
                verdict,
            } => Some(match verdict {
                Verdict::Correct => SoundCue::Correct,
                Verdict::Wrong => SoundCue::Wrong,
            }),
            Self::Obstructed {
                side: Side::Local, ..
            } => Some(SoundCue::Obstruction),
            Self::MatchFinished { local_won, .. } => Some(if *local_won {
                SoundCue::Win
            } else {
                SoundCue::Lose
            }),
            Self::StateChanged { .. }
            | Self::Verified { .. }
            | Self::Obstructed { .. }
            | Self::ObstructionCleared { .. } => None,
        }
    }
}

/// User intents forwarded by the presentation layer.
///
/// [`DuelSession::apply_intent`] routes each variant to the matching transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    /// Start a match against the simulated opponent.
    StartLocalMatch,
    /// Join an online room.
    JoinRoom {
        /// Room to join.
        room_id: String,
    },
    /// Leave the waiting room.
    Cancel,
    /// Toggle one image of the local grid.
    Select {
        /// Grid index of the clicked image.
        index: usize,
    },
    /// Submit the current selection.
    Verify,
    /// Leave the result screen.
    GoHome,
    /// Tear the session down from any state.
    Reset,
}

// #############
// #  TRAITS   #
// #############

/// A bidirectional, text-framed message channel to the remote counterpart.
///
/// Implement this for whatever transport the application uses (WebSocket, WebRTC data
/// channel, an in-process queue). The channel does not need to preserve ordering across
/// frames and may deliver duplicates; the session tolerates both. Reconnection is the
/// implementation's business.
pub trait FrameChannel: Send {
    /// Queues one text frame for delivery.
    fn send_frame(&mut self, frame: String);

    /// Returns every frame received since the last call.
    fn receive_frames(&mut self) -> Vec<String>;
}
