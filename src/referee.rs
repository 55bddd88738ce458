//! The authoritative counterpart of online matches.
//!
//! A [`Referee`] pairs players by room id, generates their puzzles, grades every `VERIFY`,
//! picks obstruction effects, and announces the winner. It is transport-agnostic: the host
//! feeds it `(ConnectionId, frame)` pairs and delivers the returned [`Outbound`] messages.
//!
//! ```
//! use captcha_duel::{ConnectionId, DuelConfig, Message, Referee};
//!
//! let mut referee = Referee::new(DuelConfig::default(), Some(1))?;
//! let alice = ConnectionId::new(1);
//! let join = r#"{"type":"JOIN_ROOM","payload":{"room_id":"r1","player_id":"p_1"}}"#;
//!
//! let replies = referee.handle_frame(alice, join);
//! assert!(matches!(replies[0].message, Message::RoomAssigned(_)));
//! assert!(matches!(replies[1].message, Message::StatusUpdate(_)));
//! # Ok::<(), captcha_duel::DuelError>(())
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::{debug, info, trace};

use crate::network::codec::{self, CodecResult};
use crate::network::messages::{
    GameFinished, GameStart, JoinRoom, Message, Obstruction, OpponentSelect, OpponentUpdate,
    RoomAssigned, SelectImage, StatusUpdate, UpdatePattern, Verify, VerifyFailed,
};
use crate::puzzle::{generate_puzzle_for, regenerate_puzzle};
use crate::report_violation_to;
use crate::telemetry::{ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{
    DuelConfig, DuelResult, Effect, ImageCatalog, InvalidRequestKind, PlayerId, Puzzle,
    ScoreBoard, Side, Tally, Verdict,
};

/// Status sent to the first player of a room.
pub const STATUS_WAITING: &str = "waiting_for_opponent";

/// Status sent to a player trying to join a full or running room.
pub const STATUS_ROOM_FULL: &str = "room_full";

/// Message attached to `GAME_FINISHED`.
pub const VICTORY_MESSAGE: &str = "You are Human!";

/// Opaque handle the host assigns to each client connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a host-assigned number.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// A message the host has to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Recipient.
    pub to: ConnectionId,
    /// What to send.
    pub message: Message,
}

impl Outbound {
    fn new(to: ConnectionId, message: Message) -> Self {
        Self { to, message }
    }

    /// The message as a text frame.
    ///
    /// # Errors
    /// - Returns a [`CodecError`](crate::CodecError) if encoding fails.
    pub fn frame(&self) -> CodecResult<String> {
        codec::encode(&self.message)
    }
}

#[derive(Debug, Clone)]
struct Seat {
    conn: ConnectionId,
    player_id: PlayerId,
    puzzle: Option<Puzzle>,
}

/// Seat 0 plays as [`Side::Local`] on the room's board, seat 1 as [`Side::Opponent`].
#[derive(Debug, Clone)]
struct Room {
    seats: Vec<Seat>,
    board: ScoreBoard,
    started: bool,
}

impl Room {
    fn seat_of(&self, conn: ConnectionId) -> Option<usize> {
        self.seats.iter().position(|seat| seat.conn == conn)
    }

    fn side_of(seat: usize) -> Side {
        if seat == 0 {
            Side::Local
        } else {
            Side::Opponent
        }
    }

    fn is_running(&self) -> bool {
        self.started && !self.board.is_decided()
    }
}

/// Room authority for online matches.
pub struct Referee {
    config: DuelConfig,
    catalog: Arc<ImageCatalog>,
    rng: SmallRng,
    rooms: BTreeMap<String, Room>,
    connections: BTreeMap<ConnectionId, String>,
    problems_issued: u64,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl fmt::Debug for Referee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Referee")
            .field("rooms", &self.rooms.len())
            .field("connections", &self.connections.len())
            .field("problems_issued", &self.problems_issued)
            .finish_non_exhaustive()
    }
}

impl Referee {
    /// Creates a referee over the built-in catalog.
    ///
    /// # Errors
    /// - Returns [`InvalidConfig`](crate::DuelError::InvalidConfig) if `config` does not
    ///   validate.
    pub fn new(config: DuelConfig, seed: Option<u64>) -> DuelResult<Self> {
        Self::with_catalog(config, ImageCatalog::builtin(), seed)
    }

    /// Creates a referee over `catalog`.
    ///
    /// # Errors
    /// - Returns [`InvalidConfig`](crate::DuelError::InvalidConfig) if `config` does not
    ///   validate.
    /// - Returns [`InvalidRequest`](crate::DuelError::InvalidRequest) if the catalog has no
    ///   labels.
    pub fn with_catalog(
        config: DuelConfig,
        catalog: impl Into<Arc<ImageCatalog>>,
        seed: Option<u64>,
    ) -> DuelResult<Self> {
        config.validate()?;
        let catalog = catalog.into();
        if catalog.labels().is_empty() {
            return Err(InvalidRequestKind::EmptyCatalog.into());
        }
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Ok(Self {
            config,
            catalog,
            rng,
            rooms: BTreeMap::new(),
            connections: BTreeMap::new(),
            problems_issued: 0,
            violation_observer: None,
        })
    }

    /// Routes dropped frames to `observer`.
    #[must_use]
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Number of open rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Players seated in `room_id`, in join order.
    #[must_use]
    pub fn room_members(&self, room_id: &str) -> Vec<PlayerId> {
        self.rooms
            .get(room_id)
            .map(|room| room.seats.iter().map(|seat| seat.player_id.clone()).collect())
            .unwrap_or_default()
    }

    /// The authoritative tally of `player_id` in `room_id`.
    #[must_use]
    pub fn tally(&self, room_id: &str, player_id: &PlayerId) -> Option<Tally> {
        let room = self.rooms.get(room_id)?;
        let seat = room
            .seats
            .iter()
            .position(|seat| seat.player_id == *player_id)?;
        Some(room.board.tally(Room::side_of(seat)))
    }

    /// Decodes and handles one frame from `conn`.
    pub fn handle_frame(&mut self, conn: ConnectionId, frame: &str) -> Vec<Outbound> {
        match codec::decode(frame) {
            Ok(message) => self.handle_message(conn, message),
            Err(err) => {
                report_violation_to!(
                    self.violation_observer,
                    ViolationSeverity::Error,
                    ViolationKind::Protocol,
                    "dropping frame from {}: {}",
                    conn,
                    err
                );
                Vec::new()
            },
        }
    }

    /// Handles one decoded message from `conn`.
    pub fn handle_message(&mut self, conn: ConnectionId, message: Message) -> Vec<Outbound> {
        trace!(%conn, kind = message.kind(), "referee handling message");
        match message {
            Message::JoinRoom(body) => self.on_join(conn, body),
            Message::SelectImage(body) => self.on_select(conn, body),
            Message::Verify(body) => self.on_verify(conn, body),
            other => {
                report_violation_to!(
                    self.violation_observer,
                    ViolationSeverity::Warning,
                    ViolationKind::Protocol,
                    "server-bound channel carried {}",
                    other.kind()
                );
                Vec::new()
            },
        }
    }

    /// Forgets `conn`. A room that empties is deleted; a room whose match was running is
    /// closed for everybody.
    pub fn disconnect(&mut self, conn: ConnectionId) {
        let Some(room_id) = self.connections.remove(&conn) else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };
        room.seats.retain(|seat| seat.conn != conn);
        let close = room.seats.is_empty() || room.started;
        if close {
            if let Some(room) = self.rooms.remove(&room_id) {
                for seat in room.seats {
                    self.connections.remove(&seat.conn);
                }
            }
            info!(room = %room_id, "room closed");
        } else {
            debug!(room = %room_id, %conn, "player left waiting room");
        }
    }

    fn on_join(&mut self, conn: ConnectionId, body: JoinRoom) -> Vec<Outbound> {
        let JoinRoom { room_id, player_id } = body;
        if room_id.is_empty() || player_id.is_empty() {
            report_violation_to!(
                self.violation_observer,
                ViolationSeverity::Warning,
                ViolationKind::Protocol,
                "JOIN_ROOM from {} without room or player id",
                conn
            );
            return Vec::new();
        }
        if let Some(current) = self.connections.get(&conn) {
            report_violation_to!(
                self.violation_observer,
                ViolationSeverity::Warning,
                ViolationKind::StateMachine,
                "{} already sits in room {}",
                conn,
                current
            );
            return Vec::new();
        }

        let room = self.rooms.entry(room_id.clone()).or_insert_with(|| Room {
            seats: Vec::with_capacity(2),
            board: ScoreBoard::from_config(&self.config),
            started: false,
        });
        if room.seats.len() >= 2 || room.started {
            debug!(room = %room_id, %conn, "room full");
            return vec![Outbound::new(
                conn,
                Message::StatusUpdate(StatusUpdate {
                    status: Some(STATUS_ROOM_FULL.to_owned()),
                }),
            )];
        }

        room.seats.push(Seat {
            conn,
            player_id: player_id.clone(),
            puzzle: None,
        });
        let seated = room.seats.len();
        self.connections.insert(conn, room_id.clone());
        info!(room = %room_id, player = %player_id, seated, "player joined");

        let mut out = vec![Outbound::new(
            conn,
            Message::RoomAssigned(RoomAssigned {
                room_id: room_id.clone(),
            }),
        )];
        if seated < 2 {
            out.push(Outbound::new(
                conn,
                Message::StatusUpdate(StatusUpdate {
                    status: Some(STATUS_WAITING.to_owned()),
                }),
            ));
        } else {
            out.extend(self.start_game(&room_id));
        }
        out
    }

    fn start_game(&mut self, room_id: &str) -> Vec<Outbound> {
        let Some(label) = self.catalog.choose_label(&mut self.rng).cloned() else {
            return Vec::new();
        };
        self.problems_issued += 1;
        let problem_id = format!("prob_{:03}", self.problems_issued);

        let Some(room) = self.rooms.get_mut(room_id) else {
            return Vec::new();
        };
        for seat in &mut room.seats {
            seat.puzzle = Some(generate_puzzle_for(
                &self.catalog,
                label.clone(),
                self.config.grid_size,
                self.config.min_correct..=self.config.max_correct,
                &mut self.rng,
            ));
        }
        room.board.reset();
        room.started = true;
        info!(room = %room_id, target = %label, problem = %problem_id, "match started");

        let grids: Vec<Vec<String>> = room
            .seats
            .iter()
            .map(|seat| {
                seat.puzzle
                    .as_ref()
                    .map(|p| p.images().to_vec())
                    .unwrap_or_default()
            })
            .collect();
        room.seats
            .iter()
            .enumerate()
            .map(|(index, seat)| {
                let other = grids.get(1 - index).cloned();
                Outbound::new(
                    seat.conn,
                    Message::GameStart(GameStart {
                        target: label.text().to_owned(),
                        images: grids.get(index).cloned().unwrap_or_default(),
                        opponent_images: other,
                        problem_id: Some(problem_id.clone()),
                    }),
                )
            })
            .collect()
    }

    fn running_room(&self, conn: ConnectionId, kind: &str) -> Option<(String, usize)> {
        let room_id = self.connections.get(&conn).cloned();
        let seat = room_id
            .as_ref()
            .and_then(|id| self.rooms.get(id))
            .filter(|room| room.is_running())
            .and_then(|room| room.seat_of(conn));
        match (room_id, seat) {
            (Some(room_id), Some(seat)) => Some((room_id, seat)),
            _ => {
                report_violation_to!(
                    self.violation_observer,
                    ViolationSeverity::Warning,
                    ViolationKind::StateMachine,
                    "{} from {} outside a running match",
                    kind,
                    conn
                );
                None
            },
        }
    }

    fn on_select(&mut self, conn: ConnectionId, body: SelectImage) -> Vec<Outbound> {
        let Some((room_id, seat)) = self.running_room(conn, "SELECT_IMAGE") else {
            return Vec::new();
        };
        let Some(room) = self.rooms.get(&room_id) else {
            return Vec::new();
        };
        let (Some(me), Some(rival)) = (room.seats.get(seat), room.seats.get(1 - seat)) else {
            return Vec::new();
        };
        vec![Outbound::new(
            rival.conn,
            Message::OpponentSelect(OpponentSelect {
                player_id: me.player_id.clone(),
                image_index: body.image_index,
            }),
        )]
    }

    fn on_verify(&mut self, conn: ConnectionId, body: Verify) -> Vec<Outbound> {
        let Some((room_id, seat)) = self.running_room(conn, "VERIFY") else {
            return Vec::new();
        };
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return Vec::new();
        };
        let Some(puzzle) = room.seats.get(seat).and_then(|s| s.puzzle.as_ref()) else {
            return Vec::new();
        };

        let selected: BTreeSet<usize> = body.selected_indices.iter().copied().collect();
        let verdict = if puzzle.is_solvable() && selected == *puzzle.correct_indices() {
            Verdict::Correct
        } else {
            Verdict::Wrong
        };
        let side = Room::side_of(seat);
        let Some(update) = room.board.apply_verification(side, verdict) else {
            return Vec::new();
        };
        debug!(room = %room_id, player = %body.player_id, ?verdict, score = update.tally.score, "graded");

        if verdict == Verdict::Wrong {
            return vec![Outbound::new(
                conn,
                Message::VerifyFailed(VerifyFailed {
                    reason: Some("selection does not match".to_owned()),
                }),
            )];
        }

        let next = regenerate_puzzle(
            &self.catalog,
            self.config.grid_size,
            self.config.min_correct..=self.config.max_correct,
            puzzle,
            &mut self.rng,
        );
        let target = next.target().text().to_owned();
        let images = next.images().to_vec();
        if let Some(me) = room.seats.get_mut(seat) {
            me.puzzle = Some(next);
        }

        let (Some(me), Some(rival)) = (room.seats.get(seat), room.seats.get(1 - seat)) else {
            return Vec::new();
        };
        let conns = [me.conn, rival.conn];
        let mut out = vec![
            Outbound::new(
                me.conn,
                Message::UpdatePattern(UpdatePattern {
                    target: target.clone(),
                    images: images.clone(),
                    score: Some(update.tally.score),
                }),
            ),
            Outbound::new(
                rival.conn,
                Message::OpponentUpdate(OpponentUpdate {
                    images,
                    score: update.tally.score,
                    player_id: Some(me.player_id.clone()),
                    target: Some(target),
                }),
            ),
        ];

        if let Some(winner) = update.winner {
            let winner_id = room
                .seats
                .get(usize::from(winner == Side::Opponent))
                .map_or_else(|| me.player_id.clone(), |seat| seat.player_id.clone());
            info!(room = %room_id, winner = %winner_id, "match finished");
            out.extend(conns.map(|to| {
                Outbound::new(
                    to,
                    Message::GameFinished(GameFinished {
                        winner_id: winner_id.clone(),
                        message: Some(VICTORY_MESSAGE.to_owned()),
                    }),
                )
            }));
        } else if update.obstruct.is_some() {
            let effect = Effect::random(&mut self.rng);
            debug!(room = %room_id, victim = %rival.player_id, %effect, "obstruction");
            out.extend(conns.map(|to| {
                Outbound::new(
                    to,
                    Message::Obstruction(Obstruction {
                        effect: effect.as_str().to_owned(),
                        player_id: Some(rival.player_id.clone()),
                    }),
                )
            }));
        }
        out
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
    use crate::telemetry::CollectingObserver;

    const ALICE: ConnectionId = ConnectionId::new(1);
    const BOB: ConnectionId = ConnectionId::new(2);

    fn join(referee: &mut Referee, conn: ConnectionId, room: &str, player: &str) -> Vec<Outbound> {
        referee.handle_message(
            conn,
            Message::JoinRoom(JoinRoom {
                room_id: room.to_owned(),
                player_id: PlayerId::new(player),
            }),
        )
    }

    fn started_room() -> (Referee, GameStart, GameStart) {
        let mut referee = Referee::new(DuelConfig::default(), Some(11)).unwrap();
        join(&mut referee, ALICE, "r1", "p_1");
        let out = join(&mut referee, BOB, "r1", "p_2");
        let starts: Vec<GameStart> = out
            .into_iter()
            .filter_map(|o| match o.message {
                Message::GameStart(start) => Some(start),
                _ => None,
            })
            .collect();
        assert_eq!(starts.len(), 2);
        let mut starts = starts.into_iter();
        let a = starts.next().unwrap();
        let b = starts.next().unwrap();
        (referee, a, b)
    }

    fn correct_for(start_target: &str, images: &[String]) -> Vec<usize> {
        let puzzle = Puzzle::from_wire(start_target, images.to_vec(), &ImageCatalog::builtin());
        puzzle.correct_indices().iter().copied().collect()
    }

    fn verify(referee: &mut Referee, conn: ConnectionId, player: &str, indices: Vec<usize>) -> Vec<Outbound> {
        referee.handle_message(
            conn,
            Message::Verify(Verify {
                room_id: "r1".to_owned(),
                player_id: PlayerId::new(player),
                selected_indices: indices,
            }),
        )
    }

    #[test]
    fn lone_joiner_waits() {
        let mut referee = Referee::new(DuelConfig::default(), Some(1)).unwrap();
        let out = join(&mut referee, ALICE, "r1", "p_1");
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[1].message,
            Message::StatusUpdate(StatusUpdate {
                status: Some(STATUS_WAITING.to_owned())
            })
        );
        assert_eq!(referee.room_members("r1"), vec![PlayerId::new("p_1")]);
    }

    #[test]
    fn second_joiner_starts_the_match_with_crossed_grids() {
        let (_, a, b) = started_room();
        assert_eq!(a.target, b.target);
        assert_eq!(a.opponent_images.as_ref(), Some(&b.images));
        assert_eq!(b.opponent_images.as_ref(), Some(&a.images));
        assert_eq!(a.problem_id.as_deref(), Some("prob_001"));
    }

    #[test]
    fn third_joiner_is_turned_away() {
        let (mut referee, _, _) = started_room();
        let out = join(&mut referee, ConnectionId::new(3), "r1", "p_3");
        assert_eq!(
            out,
            vec![Outbound::new(
                ConnectionId::new(3),
                Message::StatusUpdate(StatusUpdate {
                    status: Some(STATUS_ROOM_FULL.to_owned())
                })
            )]
        );
    }

    #[test]
    fn selections_are_relayed_to_the_rival() {
        let (mut referee, _, _) = started_room();
        let out = referee.handle_message(
            ALICE,
            Message::SelectImage(SelectImage {
                room_id: "r1".to_owned(),
                player_id: PlayerId::new("p_1"),
                image_index: 4,
            }),
        );
        assert_eq!(
            out,
            vec![Outbound::new(
                BOB,
                Message::OpponentSelect(OpponentSelect {
                    player_id: PlayerId::new("p_1"),
                    image_index: 4
                })
            )]
        );
    }

    #[test]
    fn wrong_verify_answers_only_the_player() {
        let (mut referee, a, _) = started_room();
        let correct = correct_for(&a.target, &a.images);
        let wrong: Vec<usize> = (0..a.images.len()).filter(|i| !correct.contains(i)).take(1).collect();
        let out = verify(&mut referee, ALICE, "p_1", wrong);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, ALICE);
        assert!(matches!(out[0].message, Message::VerifyFailed(_)));
    }

    #[test]
    fn correct_verifies_score_obstruct_and_finish() {
        let (mut referee, a, _) = started_room();
        let mut target = a.target.clone();
        let mut images = a.images.clone();
        let mut saw_obstruction = false;
        let mut finished = None;

        for round in 1..=5u32 {
            let out = verify(&mut referee, ALICE, "p_1", correct_for(&target, &images));
            let Message::UpdatePattern(update) = &out[0].message else {
                panic!("expected UPDATE_PATTERN, got {:?}", out[0].message);
            };
            assert_eq!(update.score, Some(round));
            assert!(matches!(
                &out[1].message,
                Message::OpponentUpdate(OpponentUpdate { score, .. }) if *score == round
            ));
            target = update.target.clone();
            images = update.images.clone();
            for o in &out[2..] {
                match &o.message {
                    Message::Obstruction(ob) => {
                        assert_eq!(ob.player_id, Some(PlayerId::new("p_2")));
                        saw_obstruction = true;
                    },
                    Message::GameFinished(fin) => finished = Some(fin.winner_id.clone()),
                    other => panic!("unexpected {other:?}"),
                }
            }
        }
        assert!(saw_obstruction);
        assert_eq!(finished, Some(PlayerId::new("p_1")));
        assert_eq!(
            referee.tally("r1", &PlayerId::new("p_1")).map(|t| t.score),
            Some(5)
        );

        // The decided room ignores further verifies.
        let late = verify(&mut referee, BOB, "p_2", vec![0]);
        assert!(late.is_empty());
    }

    #[test]
    fn disconnect_closes_running_room() {
        let (mut referee, _, _) = started_room();
        referee.disconnect(ALICE);
        assert_eq!(referee.room_count(), 0);
        let out = verify(&mut referee, BOB, "p_2", vec![0]);
        assert!(out.is_empty());
    }

    #[test]
    fn waiting_player_can_leave() {
        let mut referee = Referee::new(DuelConfig::default(), Some(1)).unwrap();
        join(&mut referee, ALICE, "r1", "p_1");
        referee.disconnect(ALICE);
        assert_eq!(referee.room_count(), 0);
        let out = join(&mut referee, ALICE, "r1", "p_1");
        assert!(matches!(out[0].message, Message::RoomAssigned(_)));
    }

    #[test]
    fn garbage_and_client_bound_messages_are_reported() {
        let observer = Arc::new(CollectingObserver::new());
        let mut referee = Referee::new(DuelConfig::default(), Some(1))
            .unwrap()
            .with_violation_observer(observer.clone());
        assert!(referee.handle_frame(ALICE, "not json").is_empty());
        assert!(referee
            .handle_message(ALICE, Message::VerifyFailed(VerifyFailed::default()))
            .is_empty());
        assert_eq!(observer.violations_of_kind(ViolationKind::Protocol).len(), 2);
    }
}
