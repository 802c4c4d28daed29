//! Per-match sequencing and fan-out.
//!
//! Every match sits behind its own mutex, so requests for one match are
//! applied strictly one at a time while different matches proceed in
//! parallel. The registry lock is only held to find or insert a match. The
//! dice store is read-locked while turns run and write-locked only to commit
//! or reveal a seed. Lock order is always match, then dice. Updates are
//! broadcast after both are released.

use crate::{archive::Archive, clock::Clock, metrics::Metrics};
use backgammon_execution::{play_turn, DiceService, Greedy, Match, TurnConfig, TurnError};
use backgammon_types::{
    Color, DiceRoll, Event, GameStatus, MatchId, MatchRecord, Move, Participant, PlayerId, Players,
    RejectReason, Snapshot, TurnPhase, Variant,
};
use commonware_cryptography::sha256::Digest;
use rand::rngs::OsRng;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

struct Table {
    machine: Match,
    bot: Option<(Color, Greedy)>,
    /// Open update streams per color.
    sockets: [u32; 2],
}

impl Table {
    /// Play every bot turn that is due.
    fn drive_bot(&mut self, dice: &DiceService, now: u64, events: &mut Vec<Event>) {
        let Some((color, strategy)) = self.bot.as_mut() else {
            return;
        };
        while !self.machine.is_terminal()
            && self.machine.state().current == *color
            && self.machine.state().phase == TurnPhase::AwaitingRoll
        {
            match play_turn(&mut self.machine, strategy, dice, now) {
                Ok(turn) => events.extend(turn),
                Err(TurnError::Invariant(_)) => {
                    events.push(Event::GameEnded(self.machine.snapshot()));
                    return;
                }
                Err(err) => {
                    warn!(match_id = self.machine.id(), ?err, "bot turn failed");
                    return;
                }
            }
        }
    }
}

struct MatchHandle {
    table: Mutex<Table>,
    updates: broadcast::Sender<Event>,
}

/// Outcome of one sequenced operation, gathered under the match lock.
struct Applied<T> {
    result: Result<T, RejectReason>,
    events: Vec<Event>,
    record: Option<MatchRecord>,
    terminal: bool,
}

fn poisoned<E: std::fmt::Display>(what: &'static str) -> impl FnOnce(E) -> RejectReason {
    move |e| {
        error!("Failed to acquire {} lock: {}", what, e);
        RejectReason::Unavailable
    }
}

pub struct Hub<C: Clock, A: Archive> {
    clock: C,
    archive: A,
    config: TurnConfig,
    capacity: usize,
    metrics: Metrics,

    matches: RwLock<HashMap<MatchId, Arc<MatchHandle>>>,
    dice: RwLock<DiceService>,
    next_id: AtomicU64,
}

impl<C: Clock, A: Archive> Hub<C, A> {
    pub fn new(clock: C, archive: A, config: TurnConfig, capacity: usize, metrics: Metrics) -> Self {
        Self {
            clock,
            archive,
            config,
            capacity,
            metrics,
            matches: RwLock::new(HashMap::new()),
            dice: RwLock::new(DiceService::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Number of matches currently held.
    pub fn len(&self) -> usize {
        self.matches.read().map(|matches| matches.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn handle(&self, match_id: MatchId) -> Result<Arc<MatchHandle>, RejectReason> {
        let matches = self.matches.read().map_err(poisoned("registry"))?;
        matches
            .get(&match_id)
            .cloned()
            .ok_or(RejectReason::UnknownMatch)
    }

    /// Start a match. White is always a human; Black may be the built-in bot.
    pub fn create_match(
        &self,
        variant: Variant,
        white: PlayerId,
        black: Participant,
    ) -> Result<(MatchId, Digest), RejectReason> {
        if black == Participant::Player(white) {
            return Err(RejectReason::NotParticipant);
        }
        let match_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();
        let commitment = {
            let mut dice = self.dice.write().map_err(poisoned("dice"))?;
            dice.commit(match_id, &mut OsRng)
        };

        let players = Players {
            white: Participant::Player(white),
            black,
        };
        let machine = Match::new(match_id, variant, players, commitment, self.config, now);
        let bot = (black == Participant::Bot).then_some((Color::Black, Greedy));
        let (updates, _) = broadcast::channel(self.capacity);
        let handle = Arc::new(MatchHandle {
            table: Mutex::new(Table {
                machine,
                bot,
                sockets: [0, 0],
            }),
            updates,
        });

        let live = {
            let mut matches = self.matches.write().map_err(poisoned("registry"))?;
            matches.insert(match_id, handle);
            matches.len()
        };
        self.metrics.matches_created.inc();
        self.metrics.live_matches.set(live as i64);
        info!(match_id, ?variant, white, ?black, "created match");
        Ok((match_id, commitment))
    }

    /// Run `op` for `player` under the match lock: deadlines first, then the
    /// operation, then any bot turns it unlocked.
    fn sequence<T>(
        &self,
        match_id: MatchId,
        player: PlayerId,
        op: impl FnOnce(&mut Match, Color, &DiceService, u64) -> Result<(T, Vec<Event>), TurnError>,
    ) -> Result<(T, Snapshot), RejectReason> {
        let handle = self
            .handle(match_id)
            .inspect_err(|_| {
                self.metrics.rejections.inc();
            })?;
        let now = self.clock.now();
        let applied = {
            let mut guard = handle.table.lock().map_err(poisoned("match"))?;
            let table = &mut *guard;
            let Some(color) = table.machine.color_of(player) else {
                self.metrics.rejections.inc();
                return Err(RejectReason::NotParticipant);
            };
            let (events, result) = {
                let dice = self.dice.read().map_err(poisoned("dice"))?;
                let mut events = table.machine.tick(now);
                if !events.is_empty() {
                    table.drive_bot(&dice, now, &mut events);
                }
                let result = match op(&mut table.machine, color, &dice, now) {
                    Ok((value, produced)) => {
                        events.extend(produced);
                        table.drive_bot(&dice, now, &mut events);
                        Ok((value, table.machine.snapshot()))
                    }
                    Err(err) => {
                        if matches!(err, TurnError::Invariant(_)) {
                            events.push(Event::GameEnded(table.machine.snapshot()));
                        }
                        Err(RejectReason::from(err))
                    }
                };
                (events, result)
            };
            let (terminal, record) = self.settle(&table.machine, now);
            Applied {
                result,
                events,
                record,
                terminal,
            }
        };

        if let Err(reason) = &applied.result {
            self.metrics.rejections.inc();
            debug!(match_id, player, %reason, "rejected request");
        }
        self.publish(match_id, &handle, applied.events);
        if applied.terminal {
            self.teardown(match_id, applied.record);
        }
        applied.result
    }

    pub fn roll(&self, match_id: MatchId, player: PlayerId) -> Result<DiceRoll, RejectReason> {
        let (roll, _) = self.sequence(match_id, player, |machine, color, dice, now| {
            machine.roll(color, dice, now)
        })?;
        self.metrics.rolls.inc();
        Ok(roll)
    }

    pub fn submit_move(
        &self,
        match_id: MatchId,
        player: PlayerId,
        mv: Move,
    ) -> Result<Snapshot, RejectReason> {
        let (_, snapshot) = self.sequence(match_id, player, |machine, color, _, now| {
            Ok(((), machine.submit_move(color, mv, now)?))
        })?;
        self.metrics.moves.inc();
        Ok(snapshot)
    }

    pub fn end_turn(&self, match_id: MatchId, player: PlayerId) -> Result<Snapshot, RejectReason> {
        let (_, snapshot) = self.sequence(match_id, player, |machine, color, _, now| {
            Ok(((), machine.end_turn(color, now)?))
        })?;
        Ok(snapshot)
    }

    /// Current snapshot. Safe to call any number of times.
    pub fn resync(&self, match_id: MatchId) -> Result<Snapshot, RejectReason> {
        let handle = self.handle(match_id)?;
        let table = handle.table.lock().map_err(poisoned("match"))?;
        Ok(table.machine.snapshot())
    }

    pub fn subscribe(&self, match_id: MatchId) -> Result<broadcast::Receiver<Event>, RejectReason> {
        Ok(self.handle(match_id)?.updates.subscribe())
    }

    /// A participant opened an update stream.
    pub fn connect(
        &self,
        match_id: MatchId,
        player: PlayerId,
    ) -> Result<broadcast::Receiver<Event>, RejectReason> {
        let handle = self.handle(match_id)?;
        let mut table = handle.table.lock().map_err(poisoned("match"))?;
        let color = table
            .machine
            .color_of(player)
            .ok_or(RejectReason::NotParticipant)?;
        let open = &mut table.sockets[color.index()];
        *open = open.saturating_add(1);
        table.machine.reconnect(color);
        Ok(handle.updates.subscribe())
    }

    /// A participant's update stream closed. Starts the grace timer once the
    /// last stream for that seat is gone.
    pub fn disconnect(&self, match_id: MatchId, player: PlayerId) {
        let Ok(handle) = self.handle(match_id) else {
            return;
        };
        let now = self.clock.now();
        let Ok(mut table) = handle.table.lock() else {
            error!(match_id, "Failed to acquire match lock in disconnect");
            return;
        };
        let Some(color) = table.machine.color_of(player) else {
            return;
        };
        let open = &mut table.sockets[color.index()];
        *open = open.saturating_sub(1);
        if *open == 0 {
            table.machine.disconnect(color, now);
        }
    }

    /// Enforce deadlines and disconnect grace on every match. Returns the
    /// number of matches torn down.
    pub fn sweep(&self) -> usize {
        let handles: Vec<(MatchId, Arc<MatchHandle>)> = match self.matches.read() {
            Ok(matches) => matches
                .iter()
                .map(|(id, handle)| (*id, handle.clone()))
                .collect(),
            Err(e) => {
                error!("Failed to acquire registry lock in sweep: {}", e);
                return 0;
            }
        };

        let now = self.clock.now();
        let mut removed = 0;
        for (match_id, handle) in handles {
            let (events, terminal, record) = {
                let Ok(mut guard) = handle.table.lock() else {
                    error!(match_id, "Failed to acquire match lock in sweep");
                    continue;
                };
                let table = &mut *guard;
                let events = {
                    let Ok(dice) = self.dice.read() else {
                        error!("Failed to acquire dice lock in sweep");
                        return removed;
                    };
                    let mut events = table.machine.tick(now);
                    if !events.is_empty() {
                        table.drive_bot(&dice, now, &mut events);
                    }
                    events
                };
                let (terminal, record) = self.settle(&table.machine, now);
                (events, terminal, record)
            };
            self.publish(match_id, &handle, events);
            if terminal {
                self.teardown(match_id, record);
                removed += 1;
            }
        }
        removed
    }

    /// Reveal the seed and build the record once a match is terminal.
    fn settle(&self, machine: &Match, now: u64) -> (bool, Option<MatchRecord>) {
        if !machine.is_terminal() {
            return (false, None);
        }
        let seed = match self.dice.write() {
            Ok(mut dice) => dice.reveal(machine.id()),
            Err(e) => {
                error!("Failed to acquire dice lock: {}", e);
                None
            }
        };
        (true, seed.and_then(|seed| machine.record(seed, now)))
    }

    fn publish(&self, match_id: MatchId, handle: &MatchHandle, events: Vec<Event>) {
        for event in events {
            let name = event.name();
            let version = event.snapshot().version;
            if handle.updates.send(event).is_err() {
                warn!(match_id, name, version, "Failed to broadcast update (no subscribers)");
            }
        }
    }

    /// Forget a finished match and hand its record to the archive.
    fn teardown(&self, match_id: MatchId, record: Option<MatchRecord>) {
        let live = match self.matches.write() {
            Ok(mut matches) => {
                if matches.remove(&match_id).is_none() {
                    return;
                }
                matches.len()
            }
            Err(e) => {
                error!("Failed to acquire registry lock in teardown: {}", e);
                return;
            }
        };
        self.metrics.live_matches.set(live as i64);

        let Some(record) = record else {
            error!(match_id, "finished match has no record");
            return;
        };
        match record.status {
            GameStatus::Finished => self.metrics.matches_finished.inc(),
            _ => self.metrics.matches_abandoned.inc(),
        };
        info!(match_id, status = ?record.status, winner = ?record.winner, "tearing down match");
        if let Err(e) = self.archive.store(record) {
            error!(match_id, error = %e, "Failed to archive match");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{archive::MemoryArchive, clock::ManualClock};
    use backgammon_execution::{dice, RuleEngine};

    const TIMEOUT: u64 = 1_000;
    const GRACE: u64 = 500;

    fn hub() -> (Hub<ManualClock, MemoryArchive>, ManualClock, MemoryArchive) {
        let clock = ManualClock::new(1_000_000);
        let archive = MemoryArchive::default();
        let config = TurnConfig {
            turn_timeout: TIMEOUT,
            disconnect_grace: GRACE,
        };
        let hub = Hub::new(clock.clone(), archive.clone(), config, 16_384, Metrics::default());
        (hub, clock, archive)
    }

    /// Drive a human-vs-human match to the end through the hub.
    fn play_to_end(hub: &Hub<ManualClock, MemoryArchive>, match_id: MatchId, variant: Variant) {
        let engine = RuleEngine::new(variant);
        for _ in 0..20_000 {
            let Ok(snapshot) = hub.resync(match_id) else {
                return;
            };
            let state = snapshot.state;
            let player = match state.players.get(state.current) {
                Participant::Player(player) => player,
                Participant::Bot => unreachable!("no bot seated"),
            };
            match state.phase {
                TurnPhase::AwaitingRoll => {
                    hub.roll(match_id, player).unwrap();
                }
                _ => match engine.legal_moves(&state).first() {
                    Some(mv) => {
                        hub.submit_move(match_id, player, *mv).unwrap();
                    }
                    None => {
                        hub.end_turn(match_id, player).unwrap();
                    }
                },
            }
        }
        panic!("match {match_id} did not finish");
    }

    #[test]
    fn test_create_and_roll() {
        let (hub, _, _) = hub();
        let (match_id, commitment) = hub
            .create_match(Variant::Short, 1, Participant::Player(2))
            .unwrap();
        let mut updates = hub.subscribe(match_id).unwrap();

        let roll = hub.roll(match_id, 1).unwrap();
        assert_eq!(roll.commitment, commitment);
        assert_eq!(roll.roll_index, 1);

        let event = updates.try_recv().unwrap();
        assert!(matches!(event, Event::DiceRolled(_)));
        assert_eq!(event.snapshot().version, 1);
        assert_eq!(hub.resync(match_id).unwrap().version, 1);
        assert_eq!(hub.metrics().rolls.get(), 1);
    }

    #[test]
    fn test_rejections() {
        let (hub, _, _) = hub();
        let (match_id, _) = hub
            .create_match(Variant::Short, 1, Participant::Player(2))
            .unwrap();

        assert_eq!(hub.roll(match_id, 2), Err(RejectReason::OutOfTurn));
        assert_eq!(hub.roll(match_id, 3), Err(RejectReason::NotParticipant));
        assert_eq!(hub.roll(99, 1), Err(RejectReason::UnknownMatch));
        assert_eq!(hub.end_turn(match_id, 1), Err(RejectReason::WrongPhase));
        assert_eq!(
            hub.submit_move(match_id, 1, Move::point(7, 4, 3)),
            Err(RejectReason::WrongPhase)
        );

        hub.roll(match_id, 1).unwrap();
        assert!(matches!(
            hub.submit_move(match_id, 1, Move::point(7, 7, 3)),
            Err(RejectReason::IllegalMove(_))
        ));
        // Nothing but the roll was applied.
        assert_eq!(hub.resync(match_id).unwrap().version, 1);
        assert_eq!(hub.metrics().rejections.get(), 6);

        assert_eq!(
            hub.create_match(Variant::Short, 5, Participant::Player(5)),
            Err(RejectReason::NotParticipant)
        );
    }

    #[test]
    fn test_bot_answers_turn() {
        let (hub, _, _) = hub();
        let (match_id, _) = hub
            .create_match(Variant::Short, 1, Participant::Bot)
            .unwrap();
        hub.roll(match_id, 1).unwrap();
        let snapshot = hub.end_turn(match_id, 1).unwrap();

        // The bot rolled and played before the lock was released.
        let state = snapshot.state;
        assert_eq!(state.current, Color::White);
        assert_eq!(state.phase, TurnPhase::AwaitingRoll);
        assert_eq!(state.turn, 3);
        assert_eq!(state.roll_index, 2);
        assert!(state.move_log.iter().all(|logged| logged.color == Color::Black));
    }

    #[test]
    fn test_sweep_enforces_deadline() {
        let (hub, clock, _) = hub();
        let (match_id, _) = hub
            .create_match(Variant::Long, 1, Participant::Player(2))
            .unwrap();
        let mut updates = hub.subscribe(match_id).unwrap();

        clock.advance(TIMEOUT);
        assert_eq!(hub.sweep(), 0);
        assert!(updates.try_recv().is_err());

        clock.advance(1);
        assert_eq!(hub.sweep(), 0);
        let event = updates.try_recv().unwrap();
        assert!(matches!(event, Event::TurnSwitched(_)));
        assert_eq!(event.snapshot().state.current, Color::Black);
        assert_eq!(hub.roll(match_id, 1), Err(RejectReason::OutOfTurn));
        hub.roll(match_id, 2).unwrap();
    }

    #[test]
    fn test_timeout_is_applied_before_request() {
        let (hub, clock, _) = hub();
        let (match_id, _) = hub
            .create_match(Variant::Short, 1, Participant::Player(2))
            .unwrap();
        clock.advance(TIMEOUT + 1);
        // White missed the deadline; the pending tick hands the turn over.
        assert_eq!(hub.roll(match_id, 1), Err(RejectReason::OutOfTurn));
        assert!(hub.roll(match_id, 2).is_ok());
    }

    #[test]
    fn test_disconnect_abandons_and_archives() {
        let (hub, clock, archive) = hub();
        let (match_id, commitment) = hub
            .create_match(Variant::Short, 1, Participant::Player(2))
            .unwrap();
        let mut updates = hub.connect(match_id, 1).unwrap();
        hub.connect(match_id, 2).unwrap();
        hub.roll(match_id, 1).unwrap();
        updates.try_recv().unwrap();

        hub.disconnect(match_id, 2);
        clock.advance(GRACE);
        assert_eq!(hub.sweep(), 0);
        clock.advance(1);
        assert_eq!(hub.sweep(), 1);

        let event = updates.try_recv().unwrap();
        assert!(matches!(event, Event::GameEnded(_)));
        assert_eq!(event.snapshot().state.winner, Some(Color::White));

        assert_eq!(hub.resync(match_id), Err(RejectReason::UnknownMatch));
        assert_eq!(hub.roll(match_id, 1), Err(RejectReason::UnknownMatch));
        assert!(hub.is_empty());
        assert!(hub.dice.read().unwrap().is_empty());

        let records = archive.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.status, GameStatus::Abandoned);
        assert_eq!(record.winner, Some(Color::White));
        assert_eq!(record.commitment, commitment);
        assert_eq!(record.duration_ms, GRACE + 1);
        assert!(dice::verify_commitment(&record.seed, &commitment));
        assert_eq!(hub.metrics().matches_abandoned.get(), 1);
    }

    #[test]
    fn test_reconnect_cancels_grace() {
        let (hub, clock, _) = hub();
        let (match_id, _) = hub
            .create_match(Variant::Short, 1, Participant::Player(2))
            .unwrap();
        hub.disconnect(match_id, 2);
        clock.advance(GRACE);
        hub.connect(match_id, 2).unwrap();
        clock.advance(GRACE);
        hub.sweep();
        assert!(hub.resync(match_id).is_ok());
    }

    #[test]
    fn test_second_socket_keeps_seat() {
        let (hub, clock, _) = hub();
        let (match_id, _) = hub
            .create_match(Variant::Short, 1, Participant::Player(2))
            .unwrap();
        // A reload opens the new stream before the old one closes.
        hub.connect(match_id, 2).unwrap();
        hub.connect(match_id, 2).unwrap();
        hub.disconnect(match_id, 2);
        clock.advance(GRACE + 1);
        assert_eq!(hub.sweep(), 0);
        assert!(hub.resync(match_id).is_ok());

        // Closing the last stream starts the grace timer.
        hub.disconnect(match_id, 2);
        clock.advance(GRACE + 1);
        assert_eq!(hub.sweep(), 1);
        assert_eq!(hub.resync(match_id), Err(RejectReason::UnknownMatch));
    }

    #[test]
    fn test_turns_share_dice_store() {
        let (hub, _, _) = hub();
        let (first, _) = hub
            .create_match(Variant::Short, 1, Participant::Player(2))
            .unwrap();
        let (second, _) = hub
            .create_match(Variant::Long, 3, Participant::Bot)
            .unwrap();

        // Rolling only needs shared access to the seeds.
        let reader = hub.dice.read().unwrap();
        std::thread::scope(|scope| {
            let a = scope.spawn(|| hub.roll(first, 1));
            let b = scope.spawn(|| hub.roll(second, 3));
            assert!(a.join().unwrap().is_ok());
            assert!(b.join().unwrap().is_ok());
        });
        assert_eq!(reader.len(), 2);
    }

    #[test]
    fn test_finished_match_is_archived() {
        let (hub, _, archive) = hub();
        let (match_id, commitment) = hub
            .create_match(Variant::Short, 1, Participant::Player(2))
            .unwrap();
        let mut updates = hub.subscribe(match_id).unwrap();
        play_to_end(&hub, match_id, Variant::Short);

        let records = archive.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.status, GameStatus::Finished);
        assert!(record.winner.is_some());
        assert!(!record.flagged);
        assert!(dice::verify_commitment(&record.seed, &commitment));
        for roll in &record.rolls {
            assert!(dice::verify(&record.seed, roll.roll_index, roll.die1, roll.die2));
        }
        assert_eq!(hub.metrics().matches_finished.get(), 1);

        // Subscribers saw the whole match in order and then the channel closed.
        let mut last = 0;
        let mut ended = false;
        loop {
            match updates.try_recv() {
                Ok(event) => {
                    assert!(event.snapshot().version > last);
                    last = event.snapshot().version;
                    ended = matches!(event, Event::GameEnded(_));
                }
                Err(broadcast::error::TryRecvError::Closed) => break,
                Err(err) => panic!("unexpected receive error: {err:?}"),
            }
        }
        assert!(ended);
    }

    #[test]
    fn test_lagging_subscriber_can_resync() {
        let small = Hub::new(
            ManualClock::new(0),
            MemoryArchive::default(),
            TurnConfig::default(),
            1,
            Metrics::default(),
        );
        let (match_id, _) = small
            .create_match(Variant::Short, 1, Participant::Player(2))
            .unwrap();
        let mut updates = small.subscribe(match_id).unwrap();
        small.roll(match_id, 1).unwrap();
        small.end_turn(match_id, 1).unwrap();

        assert!(matches!(
            updates.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
        let snapshot = small.resync(match_id).unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(updates.try_recv().unwrap().snapshot().version, 2);
    }
}
