//! Fixtures shared by tests across the workspace.

use crate::{
    bot::{play_turn, Strategy},
    dice::DiceService,
    turn::{Match, TurnConfig},
};
use anyhow::{ensure, Context};
use backgammon_types::{
    Board, Event, GameState, MatchId, Move, Participant, PlayerId, Players, Variant, POINTS,
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Deterministic RNG for tests.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Build a board from `(point, signed count)` pairs.
pub fn create_board(points: &[(usize, i8)], bar: [u8; 2], home: [u8; 2]) -> anyhow::Result<Board> {
    let mut raw = [0i8; POINTS];
    for (point, count) in points {
        ensure!(*point < POINTS, "point {point} out of range");
        raw[*point] = *count;
    }
    Board::from_parts(raw, bar, home).context("board violates conservation")
}

pub fn human_players(white: PlayerId, black: PlayerId) -> Players {
    Players {
        white: Participant::Player(white),
        black: Participant::Player(black),
    }
}

/// A fresh match with its seed committed in `dice`.
pub fn create_match(
    id: MatchId,
    variant: Variant,
    dice: &mut DiceService,
    rng: &mut StdRng,
    config: TurnConfig,
) -> Match {
    let commitment = dice.commit(id, rng);
    Match::new(id, variant, human_players(1, 2), commitment, config, 0)
}

/// Picks uniformly among legal moves.
pub struct RandomStrategy {
    rng: StdRng,
}

impl RandomStrategy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: seeded_rng(seed),
        }
    }
}

impl Strategy for RandomStrategy {
    fn choose(&mut self, _: &GameState, legal: &[Move]) -> Option<Move> {
        legal.choose(&mut self.rng).copied()
    }
}

/// Play `game` to the end, checking conservation after every event.
pub fn play_out<S: Strategy>(
    game: &mut Match,
    strategy: &mut S,
    dice: &DiceService,
    max_turns: u32,
) -> anyhow::Result<Vec<Event>> {
    let mut events = Vec::new();
    let mut now = 0;
    while !game.is_terminal() {
        ensure!(
            game.state().turn <= max_turns,
            "match {} still running after {max_turns} turns",
            game.id()
        );
        now += 1;
        let turn = play_turn(game, strategy, dice, now).context("bot turn failed")?;
        for event in &turn {
            event
                .snapshot()
                .state
                .board
                .check_invariants()
                .context("conservation broken")?;
        }
        events.extend(turn);
    }
    Ok(events)
}
