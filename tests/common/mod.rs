//! Common test infrastructure shared across integration tests.
//!
//! This module provides:
//! - `Arena`: a [`Referee`] wired to any number of online sessions through
//!   [`LocalChannel`] pairs, with a deterministic clock
//! - helpers to build sessions and to feed hand-written frames to them
//!
//! # Usage
//!
//! From any integration test file:
//! ```ignore
//! #[path = "common/mod.rs"]
//! mod common;
//! use common::{Arena, solve};
//! ```

#![allow(dead_code)]

use std::sync::Arc;

use captcha_duel::telemetry::CollectingObserver;
use captcha_duel::{
    ConnectionId, DuelConfig, DuelEvent, DuelSession, FrameChannel, Intent, LocalChannel,
    Referee, SessionBuilder, SessionState, Side,
};
use web_time::{Duration, Instant};

/// Upper bound on delivery rounds in [`Arena::pump`].
pub const MAX_PUMP_ROUNDS: usize = 32;

/// The room every arena match is played in.
pub const ROOM: &str = "duel";

/// One online client as seen by the arena.
pub struct Seat {
    pub conn: ConnectionId,
    pub session: DuelSession,
    pub observer: Arc<CollectingObserver>,
    server_end: LocalChannel,
}

/// A referee plus connected online sessions, driven on a manual clock.
pub struct Arena {
    pub referee: Referee,
    pub seats: Vec<Seat>,
    pub now: Instant,
}

impl Arena {
    /// Creates a referee and `players` sessions with ids `p_1`, `p_2`, ...
    pub fn new(players: usize, seed: u64) -> Self {
        let referee = Referee::new(DuelConfig::default(), Some(seed)).expect("valid referee");
        let seats = (1..=players)
            .map(|n| {
                let (client_end, server_end) = LocalChannel::pair();
                let observer = Arc::new(CollectingObserver::new());
                let session = SessionBuilder::new()
                    .with_channel(client_end)
                    .with_local_player_id(format!("p_{n}"))
                    .expect("non-empty id")
                    .with_seed(seed + n as u64)
                    .with_violation_observer(observer.clone())
                    .build()
                    .expect("valid session");
                Seat {
                    conn: ConnectionId::new(n as u64),
                    session,
                    observer,
                    server_end,
                }
            })
            .collect();
        Self {
            referee,
            seats,
            now: Instant::now(),
        }
    }

    /// Joins every seat to [`ROOM`] and delivers the replies.
    pub fn join_all(&mut self) {
        let now = self.now;
        for seat in &mut self.seats {
            seat.session
                .apply_intent(
                    Intent::JoinRoom {
                        room_id: ROOM.to_owned(),
                    },
                    now,
                )
                .expect("join accepted");
        }
        self.pump();
    }

    /// Moves frames both ways until the link is quiet.
    pub fn pump(&mut self) {
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut moved = false;
            for index in 0..self.seats.len() {
                let conn = self.seats[index].conn;
                let frames = self.seats[index].server_end.receive_frames();
                for frame in frames {
                    moved = true;
                    for outbound in self.referee.handle_frame(conn, &frame) {
                        let frame = outbound.frame().expect("referee frames encode");
                        if let Some(target) = self.seats.iter_mut().find(|s| s.conn == outbound.to) {
                            target.server_end.send_frame(frame);
                        }
                    }
                }
            }
            let now = self.now;
            for seat in &mut self.seats {
                seat.session.poll_remote(now);
            }
            if !moved {
                return;
            }
        }
        panic!("arena did not settle within {MAX_PUMP_ROUNDS} rounds");
    }

    /// Advances the clock and ticks every session.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
        let now = self.now;
        for seat in &mut self.seats {
            seat.session.tick(now);
        }
    }

    /// Seat `index` selects its correct images, verifies, and the result is delivered.
    pub fn solve(&mut self, index: usize) {
        let now = self.now;
        solve(&mut self.seats[index].session, now);
        self.pump();
    }

    pub fn session(&self, index: usize) -> &DuelSession {
        &self.seats[index].session
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.seats.iter().map(|s| s.session.current_state()).collect()
    }
}

/// Selects every correct image of the local puzzle and verifies.
pub fn solve(session: &mut DuelSession, now: Instant) {
    let correct: Vec<usize> = session
        .puzzle(Side::Local)
        .expect("a local puzzle")
        .correct_indices()
        .iter()
        .copied()
        .collect();
    for index in correct {
        session
            .apply_intent(Intent::Select { index }, now)
            .expect("select is infallible");
    }
    session
        .apply_intent(Intent::Verify, now)
        .expect("verify is infallible");
}

/// A CPU-mode-ready session with a fixed seed.
pub fn cpu_session(config: DuelConfig, seed: u64) -> (DuelSession, Arc<CollectingObserver>) {
    let observer = Arc::new(CollectingObserver::new());
    let session = SessionBuilder::new()
        .with_config(config)
        .with_seed(seed)
        .with_violation_observer(observer.clone())
        .build()
        .expect("valid session");
    (session, observer)
}

/// An online session plus the counterpart's end of its channel, for hand-fed frames.
pub fn online_session(player: &str) -> (DuelSession, LocalChannel, Arc<CollectingObserver>) {
    let (client_end, server_end) = LocalChannel::pair();
    let observer = Arc::new(CollectingObserver::new());
    let session = SessionBuilder::new()
        .with_channel(client_end)
        .with_local_player_id(player)
        .expect("non-empty id")
        .with_seed(77)
        .with_violation_observer(observer.clone())
        .build()
        .expect("valid session");
    (session, server_end, observer)
}

/// Sends `frames` from the counterpart and lets the session poll them.
pub fn feed(session: &mut DuelSession, server_end: &mut LocalChannel, frames: &[&str], now: Instant) {
    for frame in frames {
        server_end.send_frame((*frame).to_owned());
    }
    session.poll_remote(now);
}

/// Collects every queued event.
pub fn drain(session: &mut DuelSession) -> Vec<DuelEvent> {
    session.events().collect()
}
