use tracing::trace;

use crate::network::messages::{JoinRoom, Message, SelectImage, Verify};
use crate::opponent::{LocalVerification, Opponent, OpponentKind};
use crate::{DuelResult, PlayerId, Puzzle, UNKNOWN_OPPONENT_ID};

/// Mirror of an online opponent.
///
/// A `RemotePeer` never acts by itself. Its puzzle, selection, and score are whatever the
/// counterpart last reported, and local actions are turned into outbound messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePeer {
    room_id: String,
    local_id: PlayerId,
    id: PlayerId,
    id_known: bool,
    puzzle: Option<Puzzle>,
    score: u32,
}

impl RemotePeer {
    /// Creates a mirror for a match in `room_id`, played by `local_id` on this side.
    #[must_use]
    pub fn new(room_id: impl Into<String>, local_id: PlayerId) -> Self {
        Self {
            room_id: room_id.into(),
            local_id,
            id: PlayerId::new(UNKNOWN_OPPONENT_ID),
            id_known: false,
            puzzle: None,
            score: 0,
        }
    }

    /// The room this mirror belongs to.
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Rebinds the mirror to the room the counterpart assigned.
    pub fn assign_room(&mut self, room_id: impl Into<String>) {
        self.room_id = room_id.into();
    }

    /// The message that requests matchmaking.
    #[must_use]
    pub fn join_message(&self) -> Message {
        Message::JoinRoom(JoinRoom {
            room_id: self.room_id.clone(),
            player_id: self.local_id.clone(),
        })
    }

    /// Remembers the opponent's id the first time it shows up on the wire.
    pub fn observe_player(&mut self, id: &PlayerId) {
        if !self.id_known && !id.is_empty() && *id != self.local_id {
            trace!(opponent = %id, "learned opponent id");
            self.id = id.clone();
            self.id_known = true;
        }
    }

    /// Returns `true` once the opponent's id has been observed.
    #[must_use]
    pub fn is_id_known(&self) -> bool {
        self.id_known
    }

    /// Last reported score.
    #[must_use]
    pub fn score(&self) -> u32 {
        self.score
    }

    /// Raises the mirrored score. Lower reports are ignored.
    pub fn merge_score(&mut self, score: u32) {
        self.score = self.score.max(score);
    }

    /// Replaces the mirrored puzzle. The selection starts empty.
    pub fn replace_puzzle(&mut self, puzzle: Puzzle) {
        self.puzzle = Some(puzzle);
    }

    /// Toggles `index` on the mirrored selection.
    ///
    /// Without a mirrored puzzle there is nothing to toggle and the call succeeds.
    ///
    /// # Errors
    ///
    /// Forwards [`DuelError::IndexOutOfRange`](crate::DuelError::IndexOutOfRange).
    pub fn apply_selection(&mut self, index: usize) -> DuelResult<()> {
        match self.puzzle.as_mut() {
            Some(puzzle) => puzzle.toggle(index),
            None => Ok(()),
        }
    }
}

impl Opponent for RemotePeer {
    fn kind(&self) -> OpponentKind {
        OpponentKind::Remote
    }

    fn player_id(&self) -> &PlayerId {
        &self.id
    }

    fn on_local_selection(&mut self, index: usize) -> Option<Message> {
        Some(Message::SelectImage(SelectImage {
            room_id: self.room_id.clone(),
            player_id: self.local_id.clone(),
            image_index: index,
        }))
    }

    fn on_local_verification(&mut self, verification: &LocalVerification) -> Option<Message> {
        Some(Message::Verify(Verify {
            room_id: verification.room_id.clone(),
            player_id: verification.player_id.clone(),
            selected_indices: verification.selected_indices.clone(),
        }))
    }

    fn current_puzzle_snapshot(&self) -> Option<&Puzzle> {
        self.puzzle.as_ref()
    }
}
