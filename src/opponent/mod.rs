//! The opposing side of a duel.
//!
//! Both kinds of opponent sit behind the [`Opponent`] trait. A [`RemotePeer`] mirrors what
//! the counterpart reports over the wire and turns local actions into protocol messages.
//! A [`SimulatedPeer`] plays by itself on a fixed decision interval. The session stores
//! whichever one is active in a [`Rival`].

use web_time::Instant;

use crate::network::messages::Message;
use crate::{PlayerId, Puzzle, Verdict};

pub use remote::RemotePeer;
pub use simulated::SimulatedPeer;

mod remote;
mod simulated;

/// Which implementation backs an opponent.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OpponentKind {
    /// Driven by inbound protocol messages.
    Remote,
    /// Driven by a local timed decision loop.
    Simulated,
}

/// A submitted local selection, as seen by the opponent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVerification {
    /// Room of the match.
    pub room_id: String,
    /// The local player.
    pub player_id: PlayerId,
    /// Submitted indices, ascending.
    pub selected_indices: Vec<usize>,
    /// Local grade, if grading happens locally. `None` when the counterpart grades.
    pub verdict: Option<Verdict>,
}

/// The common contract of both opponent kinds.
///
/// Hooks that do not apply to an implementation keep their default no-op.
pub trait Opponent {
    /// Which implementation this is.
    fn kind(&self) -> OpponentKind;

    /// The opponent's id as reported to the presentation layer.
    fn player_id(&self) -> &PlayerId;

    /// Advances the opponent's own clock.
    ///
    /// Returns the verdict of a verification the opponent committed during this call.
    /// At most one verification is returned per call; callers loop until `None` to catch
    /// up on missed decisions. `obstructed_until` is the expiry of the effect active on
    /// the opponent, if any; each overdue decision is judged against it at its own due time.
    fn on_tick(&mut self, _now: Instant, _obstructed_until: Option<Instant>) -> Option<Verdict> {
        None
    }

    /// The local player toggled `index`. Returns the message to send, if any.
    fn on_local_selection(&mut self, _index: usize) -> Option<Message> {
        None
    }

    /// The local player verified. Returns the message to send, if any.
    fn on_local_verification(&mut self, _verification: &LocalVerification) -> Option<Message> {
        None
    }

    /// The opponent's current puzzle, if known.
    fn current_puzzle_snapshot(&self) -> Option<&Puzzle>;

    /// The opponent's current selection, ascending.
    fn current_selection_snapshot(&self) -> Vec<usize> {
        self.current_puzzle_snapshot()
            .map(|puzzle| puzzle.selection().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Stops any pending timer.
    fn cancel(&mut self) {}
}

/// The active opponent of a session.
#[derive(Debug, Clone)]
pub enum Rival {
    /// An online peer.
    Remote(RemotePeer),
    /// The CPU.
    Simulated(SimulatedPeer),
}

impl Rival {
    /// The remote peer, if that is what this is.
    #[must_use]
    pub fn as_remote(&self) -> Option<&RemotePeer> {
        match self {
            Self::Remote(peer) => Some(peer),
            Self::Simulated(_) => None,
        }
    }

    /// Mutable access to the remote peer, if that is what this is.
    pub fn as_remote_mut(&mut self) -> Option<&mut RemotePeer> {
        match self {
            Self::Remote(peer) => Some(peer),
            Self::Simulated(_) => None,
        }
    }

    /// Mutable access to the simulated peer, if that is what this is.
    pub fn as_simulated_mut(&mut self) -> Option<&mut SimulatedPeer> {
        match self {
            Self::Simulated(peer) => Some(peer),
            Self::Remote(_) => None,
        }
    }

    fn inner(&self) -> &dyn Opponent {
        match self {
            Self::Remote(peer) => peer,
            Self::Simulated(peer) => peer,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Opponent {
        match self {
            Self::Remote(peer) => peer,
            Self::Simulated(peer) => peer,
        }
    }
}

impl Opponent for Rival {
    fn kind(&self) -> OpponentKind {
        self.inner().kind()
    }

    fn player_id(&self) -> &PlayerId {
        self.inner().player_id()
    }

    fn on_tick(&mut self, now: Instant, obstructed_until: Option<Instant>) -> Option<Verdict> {
        self.inner_mut().on_tick(now, obstructed_until)
    }

    fn on_local_selection(&mut self, index: usize) -> Option<Message> {
        self.inner_mut().on_local_selection(index)
    }

    fn on_local_verification(&mut self, verification: &LocalVerification) -> Option<Message> {
        self.inner_mut().on_local_verification(verification)
    }

    fn current_puzzle_snapshot(&self) -> Option<&Puzzle> {
        self.inner().current_puzzle_snapshot()
    }

    fn current_selection_snapshot(&self) -> Vec<usize> {
        self.inner().current_selection_snapshot()
    }

    fn cancel(&mut self) {
        self.inner_mut().cancel();
    }
}
