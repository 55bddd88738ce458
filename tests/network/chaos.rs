//! Sessions talking to a referee through unreliable links.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::Arc;

use crate::common::{solve, MAX_PUMP_ROUNDS, ROOM};
use captcha_duel::telemetry::{CollectingObserver, InvariantChecker, ViolationKind};
use captcha_duel::{
    ChaosChannel, ChaosConfig, ConnectionId, DuelConfig, DuelSession, FrameChannel, Intent,
    LocalChannel, PlayerId, Referee, SessionBuilder, SessionState, Side,
};
use web_time::Instant;

struct Link {
    conn: ConnectionId,
    player: PlayerId,
    session: DuelSession,
    observer: Arc<CollectingObserver>,
    server_end: LocalChannel,
}

/// A referee and two sessions whose client ends see the world through `chaos`.
struct Table {
    referee: Referee,
    links: Vec<Link>,
    now: Instant,
}

impl Table {
    fn new(chaos: ChaosConfig) -> Self {
        let links = (1..=2u64)
            .map(|n| {
                let (client_end, server_end) = LocalChannel::pair();
                let client_end = ChaosChannel::new(
                    client_end,
                    ChaosConfig {
                        seed: Some(chaos.seed.unwrap_or(0) + n),
                        ..chaos.clone()
                    },
                );
                let observer = Arc::new(CollectingObserver::new());
                let player = PlayerId::new(format!("p_{n}"));
                let session = SessionBuilder::new()
                    .with_channel(client_end)
                    .with_local_player_id(player.clone())
                    .unwrap()
                    .with_seed(n)
                    .with_violation_observer(observer.clone())
                    .build()
                    .unwrap();
                Link {
                    conn: ConnectionId::new(n),
                    player,
                    session,
                    observer,
                    server_end,
                }
            })
            .collect();
        Self {
            referee: Referee::new(DuelConfig::default(), Some(42)).unwrap(),
            links,
            now: Instant::now(),
        }
    }

    fn join(&mut self) {
        let now = self.now;
        for link in &mut self.links {
            link.session
                .apply_intent(
                    Intent::JoinRoom {
                        room_id: ROOM.to_owned(),
                    },
                    now,
                )
                .unwrap();
        }
        self.pump();
    }

    fn pump(&mut self) {
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut moved = false;
            for index in 0..self.links.len() {
                let conn = self.links[index].conn;
                for frame in self.links[index].server_end.receive_frames() {
                    moved = true;
                    for outbound in self.referee.handle_frame(conn, &frame) {
                        let frame = outbound.frame().unwrap();
                        if let Some(target) = self.links.iter_mut().find(|l| l.conn == outbound.to) {
                            target.server_end.send_frame(frame);
                        }
                    }
                }
            }
            let now = self.now;
            for link in &mut self.links {
                link.session.poll_remote(now);
            }
            if !moved {
                return;
            }
        }
        panic!("table did not settle");
    }

    fn referee_score(&self, index: usize) -> u32 {
        self.referee
            .tally(ROOM, &self.links[index].player)
            .map_or(0, |t| t.score)
    }
}

#[test]
fn duplicated_deliveries_do_not_inflate_scores() {
    let mut table = Table::new(ChaosConfig::builder().duplication_rate(1.0).seed(3).build());
    table.join();
    assert_eq!(table.links[0].session.current_state(), SessionState::Playing);
    assert_eq!(table.links[1].session.current_state(), SessionState::Playing);

    for _ in 0..5 {
        let now = table.now;
        if table.links[0].session.current_state() != SessionState::Playing {
            break;
        }
        solve(&mut table.links[0].session, now);
        table.pump();
    }

    for link in &table.links {
        assert_eq!(link.session.current_state(), SessionState::Result);
        assert_eq!(link.session.winner_id(), Some(&table.links[0].player));
        assert!(!link.observer.has_violation(ViolationKind::Scoring));
        link.session.check_invariants().unwrap();
    }
    assert_eq!(table.referee_score(0), 5);
    assert_eq!(table.links[0].session.tally(Side::Local).score, 5);
    assert_eq!(table.links[1].session.tally(Side::Opponent).score, 5);
}

#[test]
fn lossy_link_never_over_counts() {
    let mut table = Table::new(ChaosConfig::lossy(0.2));
    table.join();

    for _ in 0..30 {
        let link = &mut table.links[0];
        if link.session.current_state() != SessionState::Playing {
            break;
        }
        let now = table.now;
        solve(&mut link.session, now);
        table.pump();

        let local = table.links[0].session.tally(Side::Local).score;
        let seen_by_rival = table.links[1].session.tally(Side::Opponent).score;
        assert!(local <= table.referee_score(0));
        assert!(seen_by_rival <= table.referee_score(0));
    }

    for link in &table.links {
        link.session.check_invariants().unwrap();
    }
}

#[test]
fn fully_lossy_link_stalls_in_waiting() {
    let mut table = Table::new(ChaosConfig::builder().receive_loss_rate(1.0).seed(1).build());
    table.join();

    for link in &table.links {
        assert_eq!(link.session.current_state(), SessionState::Waiting);
        assert!(link.observer.is_empty());
    }
    assert_eq!(table.referee.room_members(ROOM).len(), 2);
}
