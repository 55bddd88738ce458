use std::collections::VecDeque;
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::Rng;
use tracing::{debug, info, trace};
use web_time::Instant;

use crate::network::codec::{self, CodecError};
use crate::network::messages::{
    GameFinished, GameStart, Message, Obstruction, OpponentProgress, OpponentSelect,
    OpponentUpdate, RoomAssigned, StatusUpdate, UpdatePattern, VerifyFailed,
};
use crate::opponent::{LocalVerification, Opponent, RemotePeer, Rival, SimulatedPeer};
use crate::puzzle::regenerate_puzzle;
use crate::report_violation_to;
use crate::sessions::event_drain::EventDrain;
use crate::sessions::snapshot::{Feedback, SessionSnapshot, SideSnapshot};
use crate::telemetry::{
    InvariantChecker, InvariantViolation, ViolationKind, ViolationObserver, ViolationSeverity,
};
use crate::{
    generate_puzzle, DuelConfig, DuelEvent, DuelResult, Effect, FrameChannel, ImageCatalog,
    Intent, InvalidRequestKind, MatchMode, ObstructionEngine, PlayerId, Puzzle, ScoreBoard,
    SessionState, Side, Tally, Verdict, LOCAL_CPU_ROOM, UNKNOWN_OPPONENT_ID,
};

/// The root aggregate of one game instance, from login to result.
///
/// A `DuelSession` exclusively owns every piece of match state: the lifecycle state, the
/// local puzzle, the opponent, the score board, and the obstruction engine. Nothing outside
/// the session mutates them. The session reacts to three triggers:
///
/// - user intents, via [`apply_intent`](Self::apply_intent) or the individual methods,
/// - inbound frames, via [`poll_remote`](Self::poll_remote) or
///   [`handle_frame`](Self::handle_frame),
/// - time, via [`tick`](Self::tick).
///
/// Every time-dependent call takes `now` explicitly. Intents issued from a state that does
/// not accept them are ignored. Inbound messages that do not fit the current state are
/// dropped and reported to the session's violation observer.
///
/// In CPU mode the session grades locally and drives the [`SimulatedPeer`]. In online mode
/// grading authority lives with the remote counterpart: a `VERIFY` is sent, and the score
/// only changes once `UPDATE_PATTERN` or `VERIFY_FAILED` comes back.
pub struct DuelSession {
    config: DuelConfig,
    catalog: Arc<ImageCatalog>,
    rng: SmallRng,
    channel: Option<Box<dyn FrameChannel>>,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
    state: SessionState,
    mode: Option<MatchMode>,
    room_id: Option<String>,
    local_player_id: PlayerId,
    winner_id: Option<PlayerId>,
    board: ScoreBoard,
    obstructions: ObstructionEngine,
    puzzle: Option<Puzzle>,
    rival: Option<Rival>,
    feedback: Option<Feedback>,
    awaiting_verdict: bool,
    lobby_status: Option<String>,
    event_queue: VecDeque<DuelEvent>,
    event_queue_size: usize,
}

impl std::fmt::Debug for DuelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuelSession")
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("room_id", &self.room_id)
            .field("local_player_id", &self.local_player_id)
            .field("winner_id", &self.winner_id)
            .field("board", &self.board)
            .field("awaiting_verdict", &self.awaiting_verdict)
            .field("has_channel", &self.channel.is_some())
            .field("pending_events", &self.event_queue.len())
            .finish_non_exhaustive()
    }
}

impl DuelSession {
    pub(crate) fn new(
        config: DuelConfig,
        catalog: Arc<ImageCatalog>,
        rng: SmallRng,
        channel: Option<Box<dyn FrameChannel>>,
        local_player_id: PlayerId,
        violation_observer: Option<Arc<dyn ViolationObserver>>,
        event_queue_size: usize,
    ) -> Self {
        Self {
            board: ScoreBoard::from_config(&config),
            obstructions: ObstructionEngine::new(config.obstruction_duration),
            config,
            catalog,
            rng,
            channel,
            violation_observer,
            state: SessionState::Login,
            mode: None,
            room_id: None,
            local_player_id,
            winner_id: None,
            puzzle: None,
            rival: None,
            feedback: None,
            awaiting_verdict: false,
            lobby_status: None,
            event_queue: VecDeque::new(),
            event_queue_size,
        }
    }

    // ###########
    // # QUERIES #
    // ###########

    /// The lifecycle state.
    #[must_use]
    pub fn current_state(&self) -> SessionState {
        self.state
    }

    /// The match mode, once chosen.
    #[must_use]
    pub fn mode(&self) -> Option<MatchMode> {
        self.mode
    }

    /// The room the session is bound to.
    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    /// The local player's id.
    #[must_use]
    pub fn local_player_id(&self) -> &PlayerId {
        &self.local_player_id
    }

    /// The winner. Set exactly when the state is [`SessionState::Result`].
    #[must_use]
    pub fn winner_id(&self) -> Option<&PlayerId> {
        self.winner_id.as_ref()
    }

    /// The rules this session plays by.
    #[must_use]
    pub fn config(&self) -> &DuelConfig {
        &self.config
    }

    /// The image catalog used for generation and grading.
    #[must_use]
    pub fn catalog(&self) -> &Arc<ImageCatalog> {
        &self.catalog
    }

    /// Returns `true` if a channel to a remote counterpart is attached.
    #[must_use]
    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    /// Score and combo of `side`.
    #[must_use]
    pub fn tally(&self, side: Side) -> Tally {
        self.board.tally(side)
    }

    /// The active puzzle of `side`.
    #[must_use]
    pub fn puzzle(&self, side: Side) -> Option<&Puzzle> {
        match side {
            Side::Local => self.puzzle.as_ref(),
            Side::Opponent => self.rival.as_ref().and_then(Opponent::current_puzzle_snapshot),
        }
    }

    /// The selection of `side`, ascending.
    #[must_use]
    pub fn selection(&self, side: Side) -> Vec<usize> {
        match side {
            Side::Local => self
                .puzzle
                .as_ref()
                .map(|p| p.selection().iter().copied().collect())
                .unwrap_or_default(),
            Side::Opponent => self
                .rival
                .as_ref()
                .map(Opponent::current_selection_snapshot)
                .unwrap_or_default(),
        }
    }

    /// The effect active on `side` at `now`.
    #[must_use]
    pub fn obstruction(&self, side: Side, now: Instant) -> Option<Effect> {
        self.obstructions.active(side, now)
    }

    /// The opponent of the current match.
    #[must_use]
    pub fn rival(&self) -> Option<&Rival> {
        self.rival.as_ref()
    }

    /// The verification pop-up visible at `now`.
    #[must_use]
    pub fn feedback(&self, now: Instant) -> Option<Verdict> {
        self.feedback
            .filter(|feedback| feedback.is_visible(now))
            .map(|feedback| feedback.verdict)
    }

    /// Returns `true` while an online `VERIFY` waits for its grade.
    #[must_use]
    pub fn is_awaiting_verdict(&self) -> bool {
        self.awaiting_verdict
    }

    /// The earliest instant at which [`tick`](Self::tick) has work to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let cpu = self.rival.as_ref().and_then(|rival| match rival {
            Rival::Simulated(peer) => peer.next_decision_at(),
            Rival::Remote(_) => None,
        });
        [
            self.obstructions.next_expiry(),
            self.feedback.map(|feedback| feedback.expires_at),
            cpu,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Drains the queued events.
    pub fn events(&mut self) -> EventDrain<'_> {
        EventDrain::from_drain(self.event_queue.drain(..))
    }

    /// A read-only copy of everything the presentation layer renders.
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            mode: self.mode,
            room_id: self.room_id.clone(),
            local_player_id: self.local_player_id.clone(),
            winner_id: self.winner_id.clone(),
            lobby_status: self.lobby_status.clone(),
            awaiting_verdict: self.awaiting_verdict,
            feedback: self.feedback(now),
            local: self.side_snapshot(Side::Local, now),
            opponent: self.side_snapshot(Side::Opponent, now),
        }
    }

    fn side_snapshot(&self, side: Side, now: Instant) -> SideSnapshot {
        let tally = self.board.tally(side);
        let puzzle = self.puzzle(side);
        let player_id = match side {
            Side::Local => Some(self.local_player_id.clone()),
            Side::Opponent => self.rival.as_ref().map(|rival| rival.player_id().clone()),
        };
        SideSnapshot {
            player_id,
            score: tally.score,
            combo: tally.combo,
            target: puzzle.map(|p| p.target().text().to_owned()),
            images: puzzle.map(|p| p.images().to_vec()).unwrap_or_default(),
            selection: self.selection(side),
            obstruction: self.obstructions.active(side, now),
        }
    }

    // ###########
    // # INTENTS #
    // ###########

    /// Routes a user intent to the matching transition.
    ///
    /// # Errors
    /// - Returns [`InvalidRequest`] from [`join_room`](Self::join_room).
    ///
    /// [`InvalidRequest`]: crate::DuelError::InvalidRequest
    pub fn apply_intent(&mut self, intent: Intent, now: Instant) -> DuelResult<()> {
        match intent {
            Intent::StartLocalMatch => self.start_local_match(now),
            Intent::JoinRoom { room_id } => self.join_room(&room_id)?,
            Intent::Cancel => self.cancel(),
            Intent::Select { index } => self.toggle_selection(index, now),
            Intent::Verify => self.verify(now),
            Intent::GoHome => self.go_home(),
            Intent::Reset => self.reset(),
        }
        Ok(())
    }

    /// `LOGIN → PLAYING` against the simulated opponent. Both puzzles are generated at once.
    pub fn start_local_match(&mut self, now: Instant) {
        if self.state != SessionState::Login {
            debug!(state = %self.state, "start_local_match ignored");
            return;
        }
        self.mode = Some(MatchMode::Cpu);
        self.room_id = Some(LOCAL_CPU_ROOM.to_owned());
        self.board.reset();
        self.obstructions.clear();
        self.puzzle = Some(self.generate_puzzle());
        let seed = self.rng.gen();
        self.rival = Some(Rival::Simulated(SimulatedPeer::new(
            Arc::clone(&self.catalog),
            &self.config,
            seed,
            now,
        )));
        self.transition(SessionState::Playing);
        self.push_event(DuelEvent::MatchStarted {
            mode: MatchMode::Cpu,
        });
    }

    /// `LOGIN → WAITING`: sends `JOIN_ROOM` and waits for `GAME_START`.
    ///
    /// Ignored outside `LOGIN`.
    ///
    /// # Errors
    /// - Returns [`InvalidRequest`] with [`EmptyRoomId`] for a blank `room_id`.
    /// - Returns [`InvalidRequest`] with [`MissingChannel`] if no channel is attached.
    ///
    /// [`InvalidRequest`]: crate::DuelError::InvalidRequest
    /// [`EmptyRoomId`]: InvalidRequestKind::EmptyRoomId
    /// [`MissingChannel`]: InvalidRequestKind::MissingChannel
    pub fn join_room(&mut self, room_id: &str) -> DuelResult<()> {
        if self.state != SessionState::Login {
            debug!(state = %self.state, "join_room ignored");
            return Ok(());
        }
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return Err(InvalidRequestKind::EmptyRoomId.into());
        }
        if self.channel.is_none() {
            return Err(InvalidRequestKind::MissingChannel.into());
        }

        let peer = RemotePeer::new(room_id, self.local_player_id.clone());
        let join = peer.join_message();
        self.mode = Some(MatchMode::Online);
        self.room_id = Some(room_id.to_owned());
        self.rival = Some(Rival::Remote(peer));
        self.send(&join);
        self.transition(SessionState::Waiting);
        Ok(())
    }

    /// `WAITING → LOGIN`. Local cleanup only; nothing is sent.
    pub fn cancel(&mut self) {
        if self.state != SessionState::Waiting {
            debug!(state = %self.state, "cancel ignored");
            return;
        }
        self.teardown();
        self.transition(SessionState::Login);
    }

    /// Toggles `index` in the local selection and mirrors it to a remote opponent.
    ///
    /// Out-of-range indices are dropped. With
    /// [`lock_selection_while_obstructed`](DuelConfig::lock_selection_while_obstructed)
    /// set, clicks are dropped while the local side is obstructed.
    pub fn toggle_selection(&mut self, index: usize, now: Instant) {
        if self.state != SessionState::Playing {
            debug!(state = %self.state, index, "selection ignored");
            return;
        }
        if self.config.lock_selection_while_obstructed
            && self.obstructions.active(Side::Local, now).is_some()
        {
            debug!(index, "selection locked by obstruction");
            return;
        }
        let Some(puzzle) = self.puzzle.as_mut() else {
            return;
        };
        if let Err(err) = puzzle.toggle(index) {
            report_violation_to!(
                self.violation_observer,
                ViolationSeverity::Warning,
                ViolationKind::Puzzle,
                "local selection rejected: {}",
                err
            );
            return;
        }
        let outbound = self
            .rival
            .as_mut()
            .and_then(|rival| rival.on_local_selection(index));
        if let Some(message) = outbound {
            self.send(&message);
        }
    }

    /// Submits the local selection.
    ///
    /// In CPU mode the selection is graded at once: correct moves to a fresh puzzle, wrong
    /// clears the selection and keeps the puzzle unless it has no correct image at all.
    /// Online, a `VERIFY` is sent and the grade arrives later.
    pub fn verify(&mut self, now: Instant) {
        if self.state != SessionState::Playing {
            debug!(state = %self.state, "verify ignored");
            return;
        }
        let Some(puzzle) = self.puzzle.as_ref() else {
            return;
        };
        let local_verdict = match self.mode {
            Some(MatchMode::Cpu) => Some(puzzle.verify()),
            Some(MatchMode::Online) | None => None,
        };
        let verification = LocalVerification {
            room_id: self.room_id.clone().unwrap_or_default(),
            player_id: self.local_player_id.clone(),
            selected_indices: puzzle.selection().iter().copied().collect(),
            verdict: local_verdict,
        };

        let outbound = self
            .rival
            .as_mut()
            .and_then(|rival| rival.on_local_verification(&verification));
        if let Some(message) = outbound {
            self.awaiting_verdict = true;
            self.send(&message);
        }
        if let Some(verdict) = local_verdict {
            self.resolve_local_verdict(verdict, now);
        }
    }

    /// `RESULT → LOGIN` with full teardown.
    pub fn go_home(&mut self) {
        if self.state != SessionState::Result {
            debug!(state = %self.state, "go_home ignored");
            return;
        }
        self.teardown();
        self.transition(SessionState::Login);
    }

    /// Tears the session down from any state and returns to `LOGIN`.
    pub fn reset(&mut self) {
        self.teardown();
        self.transition(SessionState::Login);
    }

    // ###########
    // # INBOUND #
    // ###########

    /// Drains the channel and handles every received frame.
    pub fn poll_remote(&mut self, now: Instant) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        let frames = channel.receive_frames();
        for frame in frames {
            self.handle_frame(&frame, now);
        }
    }

    /// Decodes and handles one inbound frame. Malformed frames are dropped and reported.
    pub fn handle_frame(&mut self, frame: &str, now: Instant) {
        if self.mode == Some(MatchMode::Cpu) {
            trace!("CPU match, inbound frame ignored");
            return;
        }
        match codec::decode(frame) {
            Ok(message) => self.handle_message(message, now),
            Err(CodecError::UnknownType { kind }) => {
                report_violation_to!(
                    self.violation_observer,
                    ViolationSeverity::Warning,
                    ViolationKind::Protocol,
                    "dropping frame of unknown type {}",
                    kind
                );
            },
            Err(err) => {
                report_violation_to!(
                    self.violation_observer,
                    ViolationSeverity::Error,
                    ViolationKind::Protocol,
                    "dropping malformed frame: {}",
                    err
                );
            },
        }
    }

    /// Handles one decoded inbound message.
    pub fn handle_message(&mut self, message: Message, now: Instant) {
        trace!(kind = message.kind(), "handling message");

        if self.mode != Some(MatchMode::Online) {
            report_violation_to!(
                self.violation_observer,
                ViolationSeverity::Warning,
                ViolationKind::StateMachine,
                "{} ignored outside an online match",
                message.kind()
            );
            return;
        }

        match message {
            Message::RoomAssigned(body) => self.on_room_assigned(body),
            Message::StatusUpdate(body) => self.on_status_update(body),
            Message::GameStart(body) => self.on_game_start(body),
            Message::OpponentSelect(body) => self.on_opponent_select(body),
            Message::UpdatePattern(body) => self.on_update_pattern(body, now),
            Message::VerifyFailed(body) => self.on_verify_failed(body, now),
            Message::OpponentUpdate(body) => self.on_opponent_update(body, now),
            Message::Obstruction(body) => self.on_obstruction(body, now),
            Message::OpponentProgress(body) => self.on_opponent_progress(body, now),
            Message::GameFinished(body) => self.on_game_finished(body),
            outbound @ (Message::JoinRoom(_) | Message::SelectImage(_) | Message::Verify(_)) => {
                report_violation_to!(
                    self.violation_observer,
                    ViolationSeverity::Warning,
                    ViolationKind::Protocol,
                    "client-bound channel carried {}",
                    outbound.kind()
                );
            },
        }
    }

    fn accepts(&self, expected: SessionState, kind: &str) -> bool {
        if self.state == expected {
            return true;
        }
        report_violation_to!(
            self.violation_observer,
            ViolationSeverity::Warning,
            ViolationKind::StateMachine,
            "{} ignored in state {}",
            kind,
            self.state
        );
        false
    }

    fn remote_peer_mut(&mut self) -> Option<&mut RemotePeer> {
        self.rival.as_mut().and_then(Rival::as_remote_mut)
    }

    fn on_room_assigned(&mut self, body: RoomAssigned) {
        if !self.accepts(SessionState::Waiting, "ROOM_ASSIGNED") {
            return;
        }
        debug!(room = %body.room_id, "room assigned");
        if let Some(peer) = self.remote_peer_mut() {
            peer.assign_room(body.room_id.clone());
        }
        self.room_id = Some(body.room_id);
    }

    fn on_status_update(&mut self, body: StatusUpdate) {
        if !self.accepts(SessionState::Waiting, "STATUS_UPDATE") {
            return;
        }
        debug!(status = ?body.status, "lobby status");
        self.lobby_status = body.status;
    }

    fn on_game_start(&mut self, body: GameStart) {
        if !self.accepts(SessionState::Waiting, "GAME_START") {
            return;
        }
        let GameStart {
            target,
            images,
            opponent_images,
            problem_id,
        } = body;
        let opponent_images = opponent_images.unwrap_or_else(|| images.clone());
        let local = Puzzle::from_wire(&target, images, &self.catalog);
        let remote = Puzzle::from_wire(&target, opponent_images, &self.catalog);
        if !local.is_solvable() {
            report_violation_to!(
                self.violation_observer,
                ViolationSeverity::Warning,
                ViolationKind::Puzzle,
                "initial puzzle for {} has no matching image",
                target
            );
        }

        self.board.reset();
        self.obstructions.clear();
        self.lobby_status = None;
        self.puzzle = Some(local);
        if let Some(peer) = self.remote_peer_mut() {
            peer.replace_puzzle(remote);
        }
        info!(target = %target, problem = ?problem_id, "online match starting");
        self.transition(SessionState::Playing);
        self.push_event(DuelEvent::MatchStarted {
            mode: MatchMode::Online,
        });
    }

    fn on_opponent_select(&mut self, body: OpponentSelect) {
        if !self.accepts(SessionState::Playing, "OPPONENT_SELECT") {
            return;
        }
        if body.player_id == self.local_player_id {
            trace!("echo of own selection ignored");
            return;
        }
        let Some(peer) = self.rival.as_mut().and_then(Rival::as_remote_mut) else {
            return;
        };
        peer.observe_player(&body.player_id);
        if let Err(err) = peer.apply_selection(body.image_index) {
            report_violation_to!(
                self.violation_observer,
                ViolationSeverity::Warning,
                ViolationKind::Puzzle,
                "opponent selection rejected: {}",
                err
            );
        }
    }

    fn on_update_pattern(&mut self, body: UpdatePattern, now: Instant) {
        if !self.accepts(SessionState::Playing, "UPDATE_PATTERN") {
            return;
        }
        let next = Puzzle::from_wire(&body.target, body.images, &self.catalog);
        let duplicate = self
            .puzzle
            .as_ref()
            .is_some_and(|current| current.target() == next.target() && current.images() == next.images());

        if self.awaiting_verdict {
            self.awaiting_verdict = false;
            self.puzzle = Some(next);
            self.record_verification(Side::Local, Verdict::Correct, now);
        } else if !duplicate {
            debug!("unsolicited UPDATE_PATTERN, puzzle replaced without scoring");
            self.puzzle = Some(next);
        } else {
            trace!("duplicate UPDATE_PATTERN ignored");
        }

        if let Some(score) = body.score {
            self.merge_authoritative_score(Side::Local, score);
        }
    }

    fn on_verify_failed(&mut self, body: VerifyFailed, now: Instant) {
        if !self.accepts(SessionState::Playing, "VERIFY_FAILED") {
            return;
        }
        if !self.awaiting_verdict {
            trace!(reason = ?body.reason, "VERIFY_FAILED without pending VERIFY ignored");
            return;
        }
        self.awaiting_verdict = false;
        if let Some(puzzle) = self.puzzle.as_mut() {
            puzzle.clear_selection();
        }
        self.record_verification(Side::Local, Verdict::Wrong, now);
    }

    fn on_opponent_update(&mut self, body: OpponentUpdate, now: Instant) {
        if !self.accepts(SessionState::Playing, "OPPONENT_UPDATE") {
            return;
        }
        if body.player_id.as_ref() == Some(&self.local_player_id) {
            trace!("OPPONENT_UPDATE about self ignored");
            return;
        }
        let current = self.board.tally(Side::Opponent).score;
        if body.score < current {
            report_violation_to!(
                self.violation_observer,
                ViolationSeverity::Warning,
                ViolationKind::Scoring,
                "stale OPPONENT_UPDATE with score {} below {}",
                body.score,
                current
            );
            return;
        }

        let target = body
            .target
            .or_else(|| self.puzzle(Side::Opponent).map(|p| p.target().text().to_owned()))
            .or_else(|| self.puzzle.as_ref().map(|p| p.target().text().to_owned()))
            .unwrap_or_default();
        let next = Puzzle::from_wire(&target, body.images, &self.catalog);
        let duplicate = body.score == current
            && self
                .puzzle(Side::Opponent)
                .is_some_and(|mirror| mirror.images() == next.images());

        if let Some(peer) = self.remote_peer_mut() {
            if let Some(id) = &body.player_id {
                peer.observe_player(id);
            }
            if !duplicate {
                peer.replace_puzzle(next);
            }
        }
        self.credit_opponent(body.score, now);
    }

    fn on_obstruction(&mut self, body: Obstruction, now: Instant) {
        if !self.accepts(SessionState::Playing, "OBSTRUCTION") {
            return;
        }
        let effect = match body.effect.parse::<Effect>() {
            Ok(effect) => effect,
            Err(err) => {
                report_violation_to!(
                    self.violation_observer,
                    ViolationSeverity::Error,
                    ViolationKind::Obstruction,
                    "{}",
                    err
                );
                return;
            },
        };
        let victim = match &body.player_id {
            Some(id) if *id != self.local_player_id => {
                if let Some(peer) = self.remote_peer_mut() {
                    peer.observe_player(id);
                }
                Side::Opponent
            },
            Some(_) | None => Side::Local,
        };
        self.obstructions.apply_effect(victim, effect, now);
        debug!(side = %victim, %effect, "obstruction applied");
        self.push_event(DuelEvent::Obstructed {
            side: victim,
            effect,
        });
    }

    fn on_opponent_progress(&mut self, body: OpponentProgress, now: Instant) {
        if !self.accepts(SessionState::Playing, "OPPONENT_PROGRESS") {
            return;
        }
        if body.player_id == self.local_player_id {
            self.merge_authoritative_score(Side::Local, body.correct_count);
            return;
        }
        if let Some(peer) = self.remote_peer_mut() {
            peer.observe_player(&body.player_id);
        }
        self.credit_opponent(body.correct_count, now);
    }

    fn on_game_finished(&mut self, body: GameFinished) {
        if self.state == SessionState::Result {
            // The local scoreboard usually decides first; the announcement trails it.
            trace!(winner = %body.winner_id, "GAME_FINISHED after result ignored");
            return;
        }
        if !self.accepts(SessionState::Playing, "GAME_FINISHED") {
            return;
        }
        let side = if body.winner_id == self.local_player_id {
            Side::Local
        } else {
            if let Some(peer) = self.remote_peer_mut() {
                peer.observe_player(&body.winner_id);
            }
            Side::Opponent
        };
        self.finish(side, Some(body.winner_id));
    }

    // ##########
    // #  TIME  #
    // ##########

    /// Advances timers: obstruction expiry, pop-up dismissal, then the CPU decision loop.
    ///
    /// The CPU loop catches up on every decision that fell due since the last tick, one
    /// verification at a time, and stops as soon as the match ends.
    pub fn tick(&mut self, now: Instant) {
        // Read before expiry: overdue CPU decisions are judged at their own due time.
        let cpu_obstructed_until = self
            .obstructions
            .state(Side::Opponent)
            .map(|state| state.expires_at);
        for (side, effect) in self.obstructions.tick(now) {
            trace!(%side, %effect, "obstruction expired");
            self.push_event(DuelEvent::ObstructionCleared { side, effect });
        }
        if self.feedback.is_some_and(|feedback| !feedback.is_visible(now)) {
            self.feedback = None;
        }

        while self.state == SessionState::Playing {
            let Some(rival) = self.rival.as_mut() else {
                break;
            };
            let Some(verdict) = rival.on_tick(now, cpu_obstructed_until) else {
                break;
            };
            self.record_verification(Side::Opponent, verdict, now);
        }
    }

    // ###########
    // # HELPERS #
    // ###########

    fn generate_puzzle(&mut self) -> Puzzle {
        generate_puzzle(
            &self.catalog,
            self.config.grid_size,
            self.config.min_correct..=self.config.max_correct,
            &mut self.rng,
        )
    }

    fn resolve_local_verdict(&mut self, verdict: Verdict, now: Instant) {
        match verdict {
            Verdict::Correct => {
                if let Some(previous) = self.puzzle.take() {
                    self.puzzle = Some(regenerate_puzzle(
                        &self.catalog,
                        self.config.grid_size,
                        self.config.min_correct..=self.config.max_correct,
                        &previous,
                        &mut self.rng,
                    ));
                }
            },
            Verdict::Wrong => match self.puzzle.take() {
                Some(previous) if !previous.is_solvable() => {
                    debug!(target = %previous.target(), "unsolvable puzzle replaced");
                    self.puzzle = Some(regenerate_puzzle(
                        &self.catalog,
                        self.config.grid_size,
                        self.config.min_correct..=self.config.max_correct,
                        &previous,
                        &mut self.rng,
                    ));
                },
                Some(mut puzzle) => {
                    puzzle.clear_selection();
                    self.puzzle = Some(puzzle);
                },
                None => {},
            },
        }
        self.record_verification(Side::Local, verdict, now);
    }

    fn record_verification(&mut self, side: Side, verdict: Verdict, now: Instant) {
        let Some(update) = self.board.apply_verification(side, verdict) else {
            return;
        };
        trace!(%side, ?verdict, score = update.tally.score, combo = update.tally.combo, "verification recorded");
        self.push_event(DuelEvent::Verified { side, verdict });
        if side == Side::Local {
            self.feedback = Some(Feedback {
                verdict,
                expires_at: now + self.config.feedback_duration,
            });
        }
        // Online, the counterpart picks the effect and announces it with OBSTRUCTION.
        if let (Some(victim), Some(MatchMode::Cpu)) = (update.obstruct, self.mode) {
            let effect = self
                .obstructions
                .apply_random_effect(victim, now, &mut self.rng);
            debug!(side = %victim, %effect, "combo obstruction");
            self.push_event(DuelEvent::Obstructed {
                side: victim,
                effect,
            });
        }
        if let Some(winner) = update.winner {
            self.finish(winner, None);
        }
    }

    fn credit_opponent(&mut self, score: u32, now: Instant) {
        if score > self.board.tally(Side::Opponent).score {
            self.record_verification(Side::Opponent, Verdict::Correct, now);
            self.merge_authoritative_score(Side::Opponent, score);
        }
    }

    fn merge_authoritative_score(&mut self, side: Side, score: u32) {
        let known = self.board.tally(side).score;
        if score < known {
            report_violation_to!(
                self.violation_observer,
                ViolationSeverity::Warning,
                ViolationKind::Scoring,
                "reported {} score {} is below known score {}",
                side,
                score,
                known
            );
            return;
        }
        if side == Side::Opponent {
            if let Some(peer) = self.remote_peer_mut() {
                peer.merge_score(score);
            }
        }
        if let Some(winner) = self.board.merge_score(side, score) {
            self.finish(winner, None);
        }
    }

    fn finish(&mut self, side: Side, winner_id: Option<PlayerId>) {
        if self.state != SessionState::Playing {
            return;
        }
        self.board.declare_winner(side);
        let winner = winner_id.unwrap_or_else(|| match side {
            Side::Local => self.local_player_id.clone(),
            Side::Opponent => self.rival.as_ref().map_or_else(
                || PlayerId::new(UNKNOWN_OPPONENT_ID),
                |rival| rival.player_id().clone(),
            ),
        });
        if let Some(rival) = self.rival.as_mut() {
            rival.cancel();
        }
        self.awaiting_verdict = false;
        self.winner_id = Some(winner.clone());
        self.transition(SessionState::Result);
        info!(winner = %winner, "match finished");
        self.push_event(DuelEvent::MatchFinished {
            winner,
            local_won: side == Side::Local,
        });
    }

    fn teardown(&mut self) {
        if let Some(rival) = self.rival.as_mut() {
            rival.cancel();
        }
        self.rival = None;
        self.obstructions.clear();
        self.feedback = None;
        self.awaiting_verdict = false;
        self.puzzle = None;
        self.board.reset();
        self.mode = None;
        self.room_id = None;
        self.winner_id = None;
        self.lobby_status = None;
        debug!("session torn down, pending timers cancelled");
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!(%from, %to, player = %self.local_player_id, "session state change");
        self.state = to;
        self.push_event(DuelEvent::StateChanged { from, to });
    }

    fn send(&mut self, message: &Message) {
        let frame = match codec::encode(message) {
            Ok(frame) => frame,
            Err(err) => {
                report_violation_to!(
                    self.violation_observer,
                    ViolationSeverity::Critical,
                    ViolationKind::Protocol,
                    "failed to encode {}: {}",
                    message.kind(),
                    err
                );
                return;
            },
        };
        match self.channel.as_mut() {
            Some(channel) => {
                trace!(kind = message.kind(), "sending frame");
                channel.send_frame(frame);
            },
            None => {
                report_violation_to!(
                    self.violation_observer,
                    ViolationSeverity::Error,
                    ViolationKind::Channel,
                    "no channel to send {}",
                    message.kind()
                );
            },
        }
    }

    fn push_event(&mut self, event: DuelEvent) {
        if self.event_queue.len() >= self.event_queue_size {
            self.event_queue.pop_front();
            trace!("event queue full, oldest event dropped");
        }
        self.event_queue.push_back(event);
    }
}

impl InvariantChecker for DuelSession {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let fail = |what: String| Err(InvariantViolation::new("DuelSession", what));
        match self.state {
            SessionState::Result if self.winner_id.is_none() => {
                return fail("RESULT without a winner".to_owned());
            },
            SessionState::Login if self.mode.is_some() => {
                return fail("LOGIN with a match mode".to_owned());
            },
            SessionState::Playing if self.puzzle.is_none() || self.rival.is_none() => {
                return fail("PLAYING without puzzle or opponent".to_owned());
            },
            state if state != SessionState::Result && self.winner_id.is_some() => {
                return fail(format!("winner fixed in state {state}"));
            },
            _ => {},
        }
        self.board.check_invariants()
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
    use crate::{LocalChannel, SessionBuilder};
    use web_time::Duration;

    fn cpu_session(config: DuelConfig) -> DuelSession {
        SessionBuilder::new()
            .with_config(config)
            .with_seed(1234)
            .build()
            .unwrap()
    }

    fn solve_local(session: &mut DuelSession, now: Instant) {
        let correct: Vec<usize> = session
            .puzzle(Side::Local)
            .unwrap()
            .correct_indices()
            .iter()
            .copied()
            .collect();
        for index in correct {
            session.toggle_selection(index, now);
        }
        session.verify(now);
    }

    #[test]
    fn cpu_start_goes_straight_to_playing() {
        let now = Instant::now();
        let mut session = cpu_session(DuelConfig::default());
        session.start_local_match(now);
        assert_eq!(session.current_state(), SessionState::Playing);
        assert_eq!(session.mode(), Some(MatchMode::Cpu));
        assert_eq!(session.puzzle(Side::Local).unwrap().len(), 9);
        assert!(session.puzzle(Side::Opponent).is_some());
        assert_eq!(session.rival().unwrap().player_id().as_str(), "cpu");
        session.check_invariants().unwrap();
    }

    #[test]
    fn correct_cpu_verification_scores_and_replaces_puzzle() {
        let now = Instant::now();
        let mut session = cpu_session(DuelConfig::default());
        session.start_local_match(now);
        let before = session.puzzle(Side::Local).cloned().unwrap();

        solve_local(&mut session, now);

        assert_eq!(session.tally(Side::Local).score, 1);
        let after = session.puzzle(Side::Local).unwrap();
        assert!(after.selection().is_empty());
        assert!(after.target() != before.target() || after.images() != before.images());
        assert_eq!(session.feedback(now), Some(Verdict::Correct));
        assert_eq!(session.feedback(now + Duration::from_millis(800)), None);
    }

    #[test]
    fn wrong_cpu_verification_keeps_puzzle() {
        let now = Instant::now();
        let mut session = cpu_session(DuelConfig::default());
        session.start_local_match(now);
        let before = session.puzzle(Side::Local).cloned().unwrap();
        let wrong = (0..before.len())
            .find(|i| !before.correct_indices().contains(i))
            .unwrap();

        session.toggle_selection(wrong, now);
        session.verify(now);

        let after = session.puzzle(Side::Local).unwrap();
        assert_eq!(after.images(), before.images());
        assert!(after.selection().is_empty());
        assert_eq!(session.tally(Side::Local), Tally::default());
    }

    #[test]
    fn out_of_range_selection_is_reported_and_dropped() {
        let now = Instant::now();
        let observer = Arc::new(CollectingObserver::new());
        let mut session = SessionBuilder::new()
            .with_seed(5)
            .with_violation_observer(observer.clone())
            .build()
            .unwrap();
        session.start_local_match(now);
        session.toggle_selection(99, now);
        assert!(session.selection(Side::Local).is_empty());
        assert!(observer.has_violation(ViolationKind::Puzzle));
    }

    #[test]
    fn second_consecutive_correct_obstructs_cpu() {
        let now = Instant::now();
        let mut session = cpu_session(DuelConfig::default());
        session.start_local_match(now);
        solve_local(&mut session, now);
        assert_eq!(session.obstruction(Side::Opponent, now), None);
        solve_local(&mut session, now);
        assert!(session.obstruction(Side::Opponent, now).is_some());
        assert_eq!(session.tally(Side::Local).combo, 0);
    }

    #[test]
    fn winning_fixes_winner_and_freezes_state() {
        let now = Instant::now();
        let mut session = cpu_session(DuelConfig::default());
        session.start_local_match(now);
        for _ in 0..5 {
            solve_local(&mut session, now);
        }
        assert_eq!(session.current_state(), SessionState::Result);
        assert_eq!(session.winner_id(), Some(session.local_player_id()));
        session.check_invariants().unwrap();

        // Nothing moves after the result.
        session.tick(now + Duration::from_secs(60));
        session.verify(now);
        assert_eq!(session.tally(Side::Local).score, 5);
        assert_eq!(session.tally(Side::Opponent).score, 0);
    }

    #[test]
    fn go_home_only_from_result() {
        let now = Instant::now();
        let mut session = cpu_session(DuelConfig::default());
        session.start_local_match(now);
        session.go_home();
        assert_eq!(session.current_state(), SessionState::Playing);
        session.reset();
        assert_eq!(session.current_state(), SessionState::Login);
        assert_eq!(session.mode(), None);
        assert!(session.puzzle(Side::Local).is_none());
        assert_eq!(session.next_deadline(), None);
        session.check_invariants().unwrap();
    }

    #[test]
    fn join_requires_channel_and_room() {
        let mut session = cpu_session(DuelConfig::default());
        assert_eq!(
            session.join_room("lobby").unwrap_err(),
            InvalidRequestKind::MissingChannel.into()
        );
        let (client, _server) = LocalChannel::pair();
        let mut session = SessionBuilder::new()
            .with_channel(client)
            .with_seed(1)
            .build()
            .unwrap();
        assert_eq!(
            session.join_room("  ").unwrap_err(),
            InvalidRequestKind::EmptyRoomId.into()
        );
        assert_eq!(session.current_state(), SessionState::Login);
    }

    #[test]
    fn join_sends_join_room_and_waits() {
        let (client, mut server) = LocalChannel::pair();
        let mut session = SessionBuilder::new()
            .with_channel(client)
            .with_local_player_id("p_7")
            .unwrap()
            .build()
            .unwrap();
        session.join_room("lobby").unwrap();
        assert_eq!(session.current_state(), SessionState::Waiting);

        let frames = server.receive_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0],
            r#"{"type":"JOIN_ROOM","payload":{"room_id":"lobby","player_id":"p_7"}}"#
        );

        session.cancel();
        assert_eq!(session.current_state(), SessionState::Login);
        assert_eq!(session.mode(), None);
    }

    #[test]
    fn cpu_mode_ignores_inbound_frames() {
        let now = Instant::now();
        let observer = Arc::new(CollectingObserver::new());
        let mut session = SessionBuilder::new()
            .with_seed(2)
            .with_violation_observer(observer.clone())
            .build()
            .unwrap();
        session.start_local_match(now);
        session.handle_frame(
            r#"{"type":"GAME_FINISHED","payload":{"winner_id":"cpu"}}"#,
            now,
        );
        assert_eq!(session.current_state(), SessionState::Playing);
        assert!(observer.is_empty());
    }

    #[test]
    fn events_report_lifecycle() {
        let now = Instant::now();
        let mut session = cpu_session(DuelConfig::default());
        session.start_local_match(now);
        let events: Vec<_> = session.events().collect();
        assert_eq!(
            events,
            vec![
                DuelEvent::StateChanged {
                    from: SessionState::Login,
                    to: SessionState::Playing,
                },
                DuelEvent::MatchStarted {
                    mode: MatchMode::Cpu
                },
            ]
        );
    }

    #[test]
    fn event_queue_drops_oldest_when_full() {
        let now = Instant::now();
        let mut session = SessionBuilder::new()
            .with_seed(3)
            .with_event_queue_size(1)
            .unwrap()
            .build()
            .unwrap();
        session.start_local_match(now);
        let events: Vec<_> = session.events().collect();
        assert_eq!(
            events,
            vec![DuelEvent::MatchStarted {
                mode: MatchMode::Cpu
            }]
        );
    }

    #[test]
    fn locked_selection_policy_blocks_clicks_while_obstructed() {
        let now = Instant::now();
        let config = DuelConfig {
            lock_selection_while_obstructed: true,
            ..DuelConfig::default()
        };
        let mut session = cpu_session(config);
        session.start_local_match(now);
        session.obstructions.apply_effect(Side::Local, Effect::Blur, now);
        session.toggle_selection(0, now);
        assert!(session.selection(Side::Local).is_empty());

        let later = now + Duration::from_secs(3);
        session.toggle_selection(0, later);
        assert_eq!(session.selection(Side::Local), vec![0]);
    }
}
