//! Message shapes of the duel synchronization protocol.
//!
//! Every message travels as a JSON object `{"type": "...", "payload": {...}}`. The `type`
//! is the SCREAMING_SNAKE_CASE name of the [`Message`] variant and the payload is the
//! variant's struct. Optional payload fields may be omitted by senders; receivers fill in
//! defaults.

use serde::{Deserialize, Serialize};

use crate::PlayerId;

/// Which way a message travels, seen from a client session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to counterpart.
    Outbound,
    /// Counterpart to client.
    Inbound,
}

/// Request to be paired in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoom {
    /// Requested room.
    pub room_id: String,
    /// Joining player.
    pub player_id: PlayerId,
}

/// The counterpart bound the client to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomAssigned {
    /// The room the client now belongs to.
    pub room_id: String,
}

/// Lobby status, e.g. `waiting_for_opponent` or `room_full`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Free-form status word.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Both players are present; the match begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStart {
    /// Label shared by both initial puzzles.
    pub target: String,
    /// The receiver's grid.
    pub images: Vec<String>,
    /// The other player's grid. Missing means "same as `images`".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opponent_images: Option<Vec<String>>,
    /// Opaque puzzle id assigned by the counterpart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<String>,
}

/// A grid click, mirrored to the opponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectImage {
    /// Room of the match.
    pub room_id: String,
    /// Clicking player.
    pub player_id: PlayerId,
    /// Clicked grid index.
    pub image_index: usize,
}

/// Another player's grid click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpponentSelect {
    /// Clicking player.
    pub player_id: PlayerId,
    /// Clicked grid index.
    pub image_index: usize,
}

/// Submission of the current selection for grading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verify {
    /// Room of the match.
    pub room_id: String,
    /// Submitting player.
    pub player_id: PlayerId,
    /// Selected indices in ascending order.
    pub selected_indices: Vec<usize>,
}

/// The receiver's last verification was correct; here is the next puzzle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePattern {
    /// Next label.
    pub target: String,
    /// Next grid.
    pub images: Vec<String>,
    /// The receiver's authoritative score after the verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
}

/// The receiver's last verification was wrong.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VerifyFailed {
    /// Optional explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The opponent advanced to a new puzzle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpponentUpdate {
    /// The opponent's new grid.
    pub images: Vec<String>,
    /// The opponent's score.
    pub score: u32,
    /// The opponent's id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
    /// The opponent's new label, when it differs from the receiver's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// An obstruction effect hit a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obstruction {
    /// Effect name, e.g. `BLUR`. Kept as text so unknown names can be reported.
    pub effect: String,
    /// The obstructed player. Missing means the receiver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<PlayerId>,
}

/// Progress report about another player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpponentProgress {
    /// Reporting player.
    pub player_id: PlayerId,
    /// Their score.
    pub correct_count: u32,
    /// Score needed to win.
    pub total_needed: u32,
}

/// The match is over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameFinished {
    /// The winner.
    pub winner_id: PlayerId,
    /// Closing text shown to players.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One frame of the duel protocol.
///
/// ```
/// use captcha_duel::network::messages::{Message, SelectImage};
/// use captcha_duel::{Direction, PlayerId};
///
/// let msg = Message::SelectImage(SelectImage {
///     room_id: "lobby".into(),
///     player_id: PlayerId::new("p_1"),
///     image_index: 4,
/// });
/// assert_eq!(msg.kind(), "SELECT_IMAGE");
/// assert_eq!(msg.direction(), Direction::Outbound);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// See [`JoinRoom`].
    JoinRoom(JoinRoom),
    /// See [`RoomAssigned`].
    RoomAssigned(RoomAssigned),
    /// See [`StatusUpdate`].
    StatusUpdate(StatusUpdate),
    /// See [`GameStart`].
    GameStart(GameStart),
    /// See [`SelectImage`].
    SelectImage(SelectImage),
    /// See [`OpponentSelect`].
    OpponentSelect(OpponentSelect),
    /// See [`Verify`].
    Verify(Verify),
    /// See [`UpdatePattern`].
    UpdatePattern(UpdatePattern),
    /// See [`VerifyFailed`].
    VerifyFailed(VerifyFailed),
    /// See [`OpponentUpdate`].
    OpponentUpdate(OpponentUpdate),
    /// See [`Obstruction`].
    Obstruction(Obstruction),
    /// See [`OpponentProgress`].
    OpponentProgress(OpponentProgress),
    /// See [`GameFinished`].
    GameFinished(GameFinished),
}

impl Message {
    /// Every wire `type` the protocol knows.
    pub const KINDS: [&'static str; 13] = [
        "JOIN_ROOM",
        "ROOM_ASSIGNED",
        "STATUS_UPDATE",
        "GAME_START",
        "SELECT_IMAGE",
        "OPPONENT_SELECT",
        "VERIFY",
        "UPDATE_PATTERN",
        "VERIFY_FAILED",
        "OPPONENT_UPDATE",
        "OBSTRUCTION",
        "OPPONENT_PROGRESS",
        "GAME_FINISHED",
    ];

    /// The wire `type` of this message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => "JOIN_ROOM",
            Self::RoomAssigned(_) => "ROOM_ASSIGNED",
            Self::StatusUpdate(_) => "STATUS_UPDATE",
            Self::GameStart(_) => "GAME_START",
            Self::SelectImage(_) => "SELECT_IMAGE",
            Self::OpponentSelect(_) => "OPPONENT_SELECT",
            Self::Verify(_) => "VERIFY",
            Self::UpdatePattern(_) => "UPDATE_PATTERN",
            Self::VerifyFailed(_) => "VERIFY_FAILED",
            Self::OpponentUpdate(_) => "OPPONENT_UPDATE",
            Self::Obstruction(_) => "OBSTRUCTION",
            Self::OpponentProgress(_) => "OPPONENT_PROGRESS",
            Self::GameFinished(_) => "GAME_FINISHED",
        }
    }

    /// Whether a client sends or receives this message.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        match self {
            Self::JoinRoom(_) | Self::SelectImage(_) | Self::Verify(_) => Direction::Outbound,
            Self::RoomAssigned(_)
            | Self::StatusUpdate(_)
            | Self::GameStart(_)
            | Self::OpponentSelect(_)
            | Self::UpdatePattern(_)
            | Self::VerifyFailed(_)
            | Self::OpponentUpdate(_)
            | Self::Obstruction(_)
            | Self::OpponentProgress(_)
            | Self::GameFinished(_) => Direction::Inbound,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_room_has_wire_shape() {
        let msg = Message::JoinRoom(JoinRoom {
            room_id: "r1".into(),
            player_id: PlayerId::new("p_5"),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "JOIN_ROOM", "payload": {"room_id": "r1", "player_id": "p_5"}})
        );
    }

    #[test]
    fn optional_fields_are_omitted() {
        let msg = Message::GameFinished(GameFinished {
            winner_id: PlayerId::new("p_5"),
            message: None,
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "GAME_FINISHED", "payload": {"winner_id": "p_5"}})
        );
    }

    #[test]
    fn game_start_without_opponent_images_parses() {
        let value = json!({
            "type": "GAME_START",
            "payload": {"target": "Cars", "images": ["a.jpg", "b.jpg"]}
        });
        let msg: Message = serde_json::from_value(value).unwrap();
        match msg {
            Message::GameStart(start) => {
                assert_eq!(start.target, "Cars");
                assert_eq!(start.images.len(), 2);
                assert!(start.opponent_images.is_none());
            },
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn direction_splits_client_and_counterpart_messages() {
        let verify = Message::Verify(Verify {
            room_id: "r".into(),
            player_id: PlayerId::new("p"),
            selected_indices: vec![1, 2],
        });
        assert_eq!(verify.direction(), Direction::Outbound);
        let failed = Message::VerifyFailed(VerifyFailed::default());
        assert_eq!(failed.direction(), Direction::Inbound);
        assert_eq!(failed.kind(), "VERIFY_FAILED");
    }
}
