//! Per-match turn sequencing.
//!
//! [Match] owns the authoritative [GameState] of one match and is the only
//! thing allowed to change it. Every accepted mutation bumps the snapshot
//! version and produces one [Event] carrying the full snapshot.

use crate::{
    dice::DiceService,
    rules::{EngineError, RuleEngine},
};
use backgammon_types::{
    Color, DiceRoll, Event, GameState, GameStatus, IllegalMove, InvariantViolation, MatchId,
    MatchRecord, Move, PlayerId, Players, RejectReason, Seed, Snapshot, TurnPhase, Variant,
    MAX_ROLLS,
};
use commonware_cryptography::sha256::Digest;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Why a turn operation was refused.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error("illegal move: {0}")]
    Illegal(#[from] IllegalMove),
    #[error("not this color's turn")]
    OutOfTurn,
    #[error("operation not valid in the current phase")]
    WrongPhase,
    #[error("unknown match")]
    UnknownMatch,
    #[error("match is over")]
    GameOver,
    #[error("turn deadline passed")]
    Timeout,
    #[error("invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl From<TurnError> for RejectReason {
    fn from(err: TurnError) -> Self {
        match err {
            TurnError::Illegal(reason) => RejectReason::IllegalMove(reason),
            TurnError::OutOfTurn => RejectReason::OutOfTurn,
            TurnError::WrongPhase => RejectReason::WrongPhase,
            TurnError::UnknownMatch => RejectReason::UnknownMatch,
            TurnError::GameOver => RejectReason::GameOver,
            TurnError::Timeout => RejectReason::Timeout,
            TurnError::Invariant(_) => RejectReason::InvariantViolation,
        }
    }
}

/// Timing limits, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnConfig {
    pub turn_timeout: u64,
    pub disconnect_grace: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            turn_timeout: 60_000,
            disconnect_grace: 30_000,
        }
    }
}

pub struct Match {
    id: MatchId,
    engine: RuleEngine,
    state: GameState,
    commitment: Digest,
    version: u64,
    config: TurnConfig,
    started_at: u64,
    rolls: Vec<DiceRoll>,
    disconnected: [Option<u64>; 2],
}

impl Match {
    pub fn new(
        id: MatchId,
        variant: Variant,
        players: Players,
        commitment: Digest,
        config: TurnConfig,
        now: u64,
    ) -> Self {
        let engine = RuleEngine::new(variant);
        let board = engine.initial_board();
        let state = GameState::new(
            variant,
            players,
            board,
            Some(now.saturating_add(config.turn_timeout)),
        );
        Self {
            id,
            engine,
            state,
            commitment,
            version: 0,
            config,
            started_at: now,
            rolls: Vec::new(),
            disconnected: [None, None],
        }
    }

    pub fn id(&self) -> MatchId {
        self.id
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn commitment(&self) -> Digest {
        self.commitment
    }

    pub fn rolls(&self) -> &[DiceRoll] {
        &self.rolls
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn color_of(&self, player: PlayerId) -> Option<Color> {
        self.state.players.color_of(player)
    }

    pub fn is_disconnected(&self, color: Color) -> bool {
        self.disconnected[color.index()].is_some()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            match_id: self.id,
            version: self.version,
            commitment: self.commitment,
            state: self.state.clone(),
        }
    }

    /// Legal moves for the color to act, empty outside `AwaitingMoves`.
    pub fn legal_moves(&self) -> Vec<Move> {
        if self.state.is_terminal() || self.state.phase != TurnPhase::AwaitingMoves {
            return Vec::new();
        }
        self.engine.legal_moves(&self.state)
    }

    fn expired(&self, now: u64) -> bool {
        matches!(self.state.deadline, Some(deadline) if now > deadline)
    }

    fn guard(&self, color: Color, phase: TurnPhase, now: u64) -> Result<(), TurnError> {
        if self.state.is_terminal() {
            return Err(TurnError::GameOver);
        }
        if self.expired(now) {
            return Err(TurnError::Timeout);
        }
        if color != self.state.current {
            return Err(TurnError::OutOfTurn);
        }
        if self.state.phase != phase {
            return Err(TurnError::WrongPhase);
        }
        Ok(())
    }

    fn emit(&mut self, events: &mut Vec<Event>, wrap: fn(Snapshot) -> Event) {
        self.version += 1;
        events.push(wrap(self.snapshot()));
    }

    /// Roll for `color`, moving the turn to `AwaitingMoves`.
    pub fn roll(
        &mut self,
        color: Color,
        dice: &DiceService,
        now: u64,
    ) -> Result<(DiceRoll, Vec<Event>), TurnError> {
        self.guard(color, TurnPhase::AwaitingRoll, now)?;
        let roll = dice
            .roll(self.id, self.state.roll_index + 1)
            .map_err(|_| TurnError::UnknownMatch)?;

        self.state.dice = Some(roll);
        self.state.roll_index = roll.roll_index;
        self.state.consumed.clear();
        self.state.phase = TurnPhase::AwaitingMoves;
        if self.state.status == GameStatus::Waiting {
            self.state.status = GameStatus::InProgress;
            info!(match_id = self.id, "match started");
        }
        self.rolls.push(roll);
        debug!(
            match_id = self.id,
            %color,
            die1 = roll.die1,
            die2 = roll.die2,
            roll_index = roll.roll_index,
            "rolled"
        );

        let mut events = Vec::new();
        self.emit(&mut events, Event::DiceRolled);
        if self.engine.legal_moves(&self.state).is_empty() {
            debug!(match_id = self.id, %color, "no legal moves");
            self.complete_turn(now, &mut events);
        }
        Ok((roll, events))
    }

    /// Apply one move for `color`. The turn completes once no die or no legal
    /// move remains.
    pub fn submit_move(
        &mut self,
        color: Color,
        mv: Move,
        now: u64,
    ) -> Result<Vec<Event>, TurnError> {
        self.guard(color, TurnPhase::AwaitingMoves, now)?;
        let next = match self.engine.apply_move(&self.state, &mv) {
            Ok(next) => next,
            Err(EngineError::Illegal(reason)) => return Err(TurnError::Illegal(reason)),
            Err(EngineError::Invariant(violation)) => {
                self.abort(violation);
                return Err(TurnError::Invariant(violation));
            }
        };
        self.state = next;
        debug!(match_id = self.id, %color, %mv, "applied move");

        let mut events = Vec::new();
        self.emit(&mut events, Event::StateUpdated);
        if self.engine.check_win(&self.state).is_some()
            || self.engine.legal_moves(&self.state).is_empty()
        {
            self.complete_turn(now, &mut events);
        }
        Ok(events)
    }

    /// Voluntarily finish the turn of `color`.
    pub fn end_turn(&mut self, color: Color, now: u64) -> Result<Vec<Event>, TurnError> {
        self.guard(color, TurnPhase::AwaitingMoves, now)?;
        let mut events = Vec::new();
        self.complete_turn(now, &mut events);
        Ok(events)
    }

    fn complete_turn(&mut self, now: u64, events: &mut Vec<Event>) {
        self.state.phase = TurnPhase::TurnComplete;
        if let Some(winner) = self.engine.check_win(&self.state) {
            self.state.status = GameStatus::Finished;
            self.state.winner = Some(winner);
            self.state.deadline = None;
            info!(match_id = self.id, %winner, turns = self.state.turn, "match finished");
            self.emit(events, Event::GameEnded);
            return;
        }
        if self.rolls.len() >= MAX_ROLLS {
            warn!(match_id = self.id, rolls = self.rolls.len(), "roll limit reached");
            self.abandon(None);
            self.state.flagged = true;
            self.emit(events, Event::GameEnded);
            return;
        }

        self.state.current = self.state.current.opponent();
        self.state.turn += 1;
        self.state.dice = None;
        self.state.consumed.clear();
        self.state.phase = TurnPhase::AwaitingRoll;
        self.state.deadline = Some(now.saturating_add(self.config.turn_timeout));
        self.emit(events, Event::TurnSwitched);
    }

    fn abandon(&mut self, winner: Option<Color>) {
        self.state.status = GameStatus::Abandoned;
        self.state.winner = winner;
        self.state.deadline = None;
    }

    fn abort(&mut self, violation: InvariantViolation) {
        error!(match_id = self.id, ?violation, "aborting match");
        self.abandon(None);
        self.state.flagged = true;
        self.version += 1;
    }

    /// Enforce disconnect grace and the turn deadline.
    ///
    /// Grace applies in every live phase, not only while moves are awaited.
    pub fn tick(&mut self, now: u64) -> Vec<Event> {
        let mut events = Vec::new();
        if self.state.is_terminal() {
            return events;
        }

        // The participant gone the longest loses.
        let grace = self.config.disconnect_grace;
        let gone = Color::ALL
            .into_iter()
            .filter_map(|color| self.disconnected[color.index()].map(|since| (since, color)))
            .filter(|(since, _)| now.saturating_sub(*since) > grace)
            .min();
        if let Some((_, loser)) = gone {
            let winner = loser.opponent();
            info!(match_id = self.id, %loser, %winner, "abandoned after disconnect");
            self.abandon(Some(winner));
            self.emit(&mut events, Event::GameEnded);
            return events;
        }

        if self.expired(now) {
            debug!(
                match_id = self.id,
                color = %self.state.current,
                "turn deadline passed"
            );
            self.complete_turn(now, &mut events);
        }
        events
    }

    pub fn disconnect(&mut self, color: Color, now: u64) {
        let slot = &mut self.disconnected[color.index()];
        if slot.is_none() {
            *slot = Some(now);
            debug!(match_id = self.id, %color, "participant disconnected");
        }
    }

    pub fn reconnect(&mut self, color: Color) {
        if self.disconnected[color.index()].take().is_some() {
            debug!(match_id = self.id, %color, "participant reconnected");
        }
    }

    /// Archive record of a finished match. `None` while the match is live.
    pub fn record(&self, seed: Seed, now: u64) -> Option<MatchRecord> {
        if !self.state.is_terminal() {
            return None;
        }
        Some(MatchRecord {
            match_id: self.id,
            variant: self.state.variant,
            players: self.state.players,
            status: self.state.status,
            winner: self.state.winner,
            flagged: self.state.flagged,
            move_log: self.state.move_log.clone(),
            rolls: self.rolls.clone(),
            seed,
            commitment: self.commitment,
            duration_ms: now.saturating_sub(self.started_at),
        })
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut GameState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice;
    use backgammon_types::{Board, Participant, POINTS};
    use rand::{rngs::StdRng, SeedableRng};

    const TIMEOUT: u64 = 1_000;
    const GRACE: u64 = 500;

    fn setup(variant: Variant) -> (Match, DiceService) {
        let mut rng = StdRng::seed_from_u64(11);
        let mut dice = DiceService::new();
        let commitment = dice.commit(1, &mut rng);
        let players = Players {
            white: Participant::Player(10),
            black: Participant::Player(20),
        };
        let config = TurnConfig {
            turn_timeout: TIMEOUT,
            disconnect_grace: GRACE,
        };
        (Match::new(1, variant, players, commitment, config, 0), dice)
    }

    #[test]
    fn test_new_match() {
        let (m, _) = setup(Variant::Short);
        let state = m.state();
        assert_eq!(state.status, GameStatus::Waiting);
        assert_eq!(state.phase, TurnPhase::AwaitingRoll);
        assert_eq!(state.current, Color::White);
        assert_eq!(state.deadline, Some(TIMEOUT));
        assert_eq!(m.color_of(20), Some(Color::Black));
        assert_eq!(m.color_of(30), None);
        assert!(m.legal_moves().is_empty());
    }

    #[test]
    fn test_roll_starts_match() {
        let (mut m, dice) = setup(Variant::Short);
        let (roll, events) = m.roll(Color::White, &dice, 10).unwrap();
        assert_eq!(roll.roll_index, 1);
        assert_eq!(roll, dice.roll(1, 1).unwrap());
        assert_eq!(m.state().status, GameStatus::InProgress);
        assert_eq!(m.state().phase, TurnPhase::AwaitingMoves);
        assert!(matches!(events[0], Event::DiceRolled(_)));
        assert_eq!(events[0].snapshot().version, 1);
        assert_eq!(m.rolls(), &[roll]);
    }

    #[test]
    fn test_guards() {
        let (mut m, dice) = setup(Variant::Short);
        assert_eq!(m.roll(Color::Black, &dice, 10), Err(TurnError::OutOfTurn));
        assert_eq!(
            m.submit_move(Color::White, Move::point(7, 4, 3), 10),
            Err(TurnError::WrongPhase)
        );
        assert_eq!(m.end_turn(Color::White, 10), Err(TurnError::WrongPhase));
        assert_eq!(
            m.roll(Color::White, &dice, TIMEOUT + 1),
            Err(TurnError::Timeout)
        );
        // Rejections never mutate.
        assert_eq!(m.version(), 0);
        assert_eq!(m.state().status, GameStatus::Waiting);

        m.roll(Color::White, &dice, 10).unwrap();
        assert_eq!(m.roll(Color::White, &dice, 20), Err(TurnError::WrongPhase));
    }

    #[test]
    fn test_roll_needs_seed() {
        let (mut m, _) = setup(Variant::Short);
        let empty = DiceService::new();
        assert_eq!(
            m.roll(Color::White, &empty, 10),
            Err(TurnError::UnknownMatch)
        );
    }

    #[test]
    fn test_moves_then_turn_switch() {
        let (mut m, dice) = setup(Variant::Long);
        let (roll, _) = m.roll(Color::White, &dice, 10).unwrap();
        let illegal = m.submit_move(Color::White, Move::point(23, 23, roll.die1), 20);
        assert!(matches!(illegal, Err(TurnError::Illegal(_))));

        let mut switched = false;
        while !switched {
            let mv = m.legal_moves()[0];
            let events = m.submit_move(Color::White, mv, 20).unwrap();
            switched = events
                .iter()
                .any(|event| matches!(event, Event::TurnSwitched(_)));
        }
        let state = m.state();
        assert_eq!(state.current, Color::Black);
        assert_eq!(state.phase, TurnPhase::AwaitingRoll);
        assert_eq!(state.turn, 2);
        assert!(state.dice.is_none());
        assert_eq!(state.deadline, Some(20 + TIMEOUT));
        state.board.check_invariants().unwrap();
    }

    #[test]
    fn test_end_turn_passes() {
        let (mut m, dice) = setup(Variant::Short);
        m.roll(Color::White, &dice, 10).unwrap();
        let events = m.end_turn(Color::White, 15).unwrap();
        assert!(matches!(events[0], Event::TurnSwitched(_)));
        assert_eq!(m.state().current, Color::Black);
        assert_eq!(m.state().roll_index, 1);

        let (roll, _) = m.roll(Color::Black, &dice, 20).unwrap();
        assert_eq!(roll.roll_index, 2);
    }

    #[test]
    fn test_deadline_forces_turn() {
        let (mut m, dice) = setup(Variant::Short);
        m.roll(Color::White, &dice, 10).unwrap();
        assert!(m.tick(TIMEOUT).is_empty());

        let events = m.tick(TIMEOUT + 1);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::TurnSwitched(_)));
        assert_eq!(m.state().current, Color::Black);
        assert_eq!(m.state().deadline, Some(2 * TIMEOUT + 1));
    }

    #[test]
    fn test_disconnect_grace() {
        let (mut m, dice) = setup(Variant::Short);
        m.roll(Color::White, &dice, 10).unwrap();
        m.disconnect(Color::Black, 100);
        assert!(m.tick(100 + GRACE).is_empty());

        m.reconnect(Color::Black);
        assert!(m.tick(200 + GRACE).is_empty());

        m.disconnect(Color::Black, 300);
        m.disconnect(Color::Black, 400);
        let events = m.tick(301 + GRACE);
        assert!(matches!(events[0], Event::GameEnded(_)));
        assert_eq!(m.state().status, GameStatus::Abandoned);
        assert_eq!(m.state().winner, Some(Color::White));
        assert_eq!(
            m.end_turn(Color::White, 900),
            Err(TurnError::GameOver)
        );
        assert!(m.tick(5_000).is_empty());
    }

    #[test]
    fn test_earliest_disconnect_loses() {
        let (mut m, _) = setup(Variant::Short);
        m.disconnect(Color::White, 50);
        m.disconnect(Color::Black, 40);
        m.tick(600);
        assert_eq!(m.state().winner, Some(Color::White));
    }

    #[test]
    fn test_bearing_off_last_checker_finishes() {
        let (mut m, dice) = setup(Variant::Short);
        let mut points = [0i8; POINTS];
        points[0] = 1;
        points[18] = -15;
        {
            let state = m.state_mut();
            state.board = Board::from_parts(points, [0, 0], [14, 0]).unwrap();
        }
        let (roll, _) = m.roll(Color::White, &dice, 10).unwrap();
        let events = m
            .submit_move(Color::White, Move::bear_off(0, roll.die1), 20)
            .unwrap();
        assert!(matches!(events.last(), Some(Event::GameEnded(_))));
        assert_eq!(m.state().status, GameStatus::Finished);
        assert_eq!(m.state().winner, Some(Color::White));
        assert_eq!(m.state().board.home(Color::Black), 0);

        let mut dice = dice;
        let seed = dice.reveal(1).unwrap();
        let record = m.record(seed, 1_010).unwrap();
        assert_eq!(record.duration_ms, 1_010);
        assert_eq!(record.rolls.len(), 1);
        assert!(dice::verify_commitment(&record.seed, &record.commitment));
    }

    #[test]
    fn test_record_requires_terminal() {
        let (m, _) = setup(Variant::Short);
        assert!(m.record([0u8; 32], 10).is_none());
    }

    #[test]
    fn test_version_counts_events() {
        let (mut m, dice) = setup(Variant::Short);
        let (_, mut events) = m.roll(Color::White, &dice, 10).unwrap();
        if m.state().phase == TurnPhase::AwaitingMoves {
            events.extend(m.end_turn(Color::White, 10).unwrap());
        }
        let versions: Vec<u64> = events.iter().map(|e| e.snapshot().version).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(m.version(), 2);
    }

    #[test]
    fn test_roll_without_moves_passes() {
        let (mut m, dice) = setup(Variant::Short);
        // White is on the bar and Black holds every entry point.
        let mut points = [0i8; POINTS];
        points[2] = 14;
        for point in 18..24 {
            points[point] = -2;
        }
        points[10] = -3;
        m.state_mut().board = Board::from_parts(points, [1, 0], [0, 0]).unwrap();

        let (_, events) = m.roll(Color::White, &dice, 10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::DiceRolled(_)));
        assert!(matches!(events[1], Event::TurnSwitched(_)));
        let state = m.state();
        assert_eq!(state.current, Color::Black);
        assert_eq!(state.phase, TurnPhase::AwaitingRoll);
        assert_eq!(state.roll_index, 1);
        assert!(state.move_log.is_empty());
        assert_eq!(state.board.bar(Color::White), 1);
    }

    #[test]
    fn test_roll_limit_abandons() {
        use commonware_codec::{DecodeExt, Encode};

        let (mut m, mut dice) = setup(Variant::Long);
        let mut now = 10;
        while !m.is_terminal() {
            let color = m.state().current;
            m.roll(color, &dice, now).unwrap();
            if m.state().phase == TurnPhase::AwaitingMoves {
                m.end_turn(color, now).unwrap();
            }
            now += 1;
        }
        let state = m.state();
        assert_eq!(state.status, GameStatus::Abandoned);
        assert!(state.flagged);
        assert_eq!(state.winner, None);
        assert_eq!(m.rolls().len(), MAX_ROLLS);

        let seed = dice.reveal(1).unwrap();
        let record = m.record(seed, now).unwrap();
        assert_eq!(MatchRecord::decode(record.encode()).unwrap(), record);
        let snapshot = m.snapshot();
        assert_eq!(Snapshot::decode(snapshot.encode()).unwrap(), snapshot);
    }

    #[test]
    fn test_reject_reason_mapping() {
        let reason: RejectReason = TurnError::Illegal(IllegalMove::NoDice).into();
        assert_eq!(reason, RejectReason::IllegalMove(IllegalMove::NoDice));
        assert_eq!(
            RejectReason::from(TurnError::Timeout),
            RejectReason::Timeout
        );
    }
}
