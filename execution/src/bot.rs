//! Computer opponents.
//!
//! A [Strategy] only ever picks from the engine's legal moves; [play_turn]
//! drives a whole turn through the public [Match] API.

use crate::{
    dice::DiceService,
    rules::distance_to_edge,
    turn::{Match, TurnError},
};
use backgammon_types::{Destination, Event, GameState, Move, Origin, TurnPhase, Variant, POINTS};

pub trait Strategy: Send {
    /// Pick one of `legal`, or `None` to end the turn.
    fn choose(&mut self, state: &GameState, legal: &[Move]) -> Option<Move>;
}

/// Always plays the first legal move.
#[derive(Clone, Copy, Debug, Default)]
pub struct FirstLegal;

impl Strategy for FirstLegal {
    fn choose(&mut self, _: &GameState, legal: &[Move]) -> Option<Move> {
        legal.first().copied()
    }
}

/// Prefers bearing off, then hitting, then moving the rearmost checker.
#[derive(Clone, Copy, Debug, Default)]
pub struct Greedy;

impl Greedy {
    fn score(state: &GameState, mv: &Move) -> (u8, u8, u8) {
        let color = state.current;
        let bear_off = matches!(mv.to, Destination::Off) as u8;
        let hit = match mv.to {
            Destination::Point(point) => {
                (state.variant == Variant::Short && state.board.count(color.opponent(), point) == 1)
                    as u8
            }
            Destination::Off => 0,
        };
        let rear = match mv.from {
            Origin::Bar => POINTS as u8 + 1,
            Origin::Point(point) => distance_to_edge(color, point),
        };
        (bear_off, hit, rear)
    }
}

impl Strategy for Greedy {
    fn choose(&mut self, state: &GameState, legal: &[Move]) -> Option<Move> {
        // Ties resolve to the earliest legal move.
        legal
            .iter()
            .rev()
            .max_by_key(|mv| Self::score(state, mv))
            .copied()
    }
}

/// Roll and play out the turn of the color to act.
pub fn play_turn<S: Strategy + ?Sized>(
    game: &mut Match,
    strategy: &mut S,
    dice: &DiceService,
    now: u64,
) -> Result<Vec<Event>, TurnError> {
    let color = game.state().current;
    let (_, mut events) = game.roll(color, dice, now)?;
    while !game.is_terminal()
        && game.state().current == color
        && game.state().phase == TurnPhase::AwaitingMoves
    {
        let legal = game.legal_moves();
        match strategy.choose(game.state(), &legal) {
            Some(mv) => events.extend(game.submit_move(color, mv, now)?),
            None => events.extend(game.end_turn(color, now)?),
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use backgammon_types::{Board, Color, DiceRoll, GameStatus, Participant, Players};
    use commonware_cryptography::sha256::Digest;

    fn state(points: &[(usize, i8)], home: [u8; 2], die1: u8, die2: u8) -> GameState {
        let mut raw = [0i8; POINTS];
        for (point, count) in points {
            raw[*point] = *count;
        }
        let board = Board::from_parts(raw, [0, 0], home).unwrap();
        let players = Players {
            white: Participant::Player(1),
            black: Participant::Bot,
        };
        let mut state = GameState::new(Variant::Short, players, board, None);
        state.status = GameStatus::InProgress;
        state.phase = TurnPhase::AwaitingMoves;
        state.current = Color::Black;
        state.dice = Some(DiceRoll {
            die1,
            die2,
            roll_index: 1,
            commitment: Digest([0u8; 32]),
        });
        state
    }

    #[test]
    fn test_first_legal() {
        let state = state(&[(0, -15), (23, 15)], [0, 0], 1, 2);
        let legal = [Move::point(0, 1, 1), Move::point(0, 2, 2)];
        assert_eq!(FirstLegal.choose(&state, &legal), Some(legal[0]));
        assert_eq!(FirstLegal.choose(&state, &[]), None);
    }

    #[test]
    fn test_greedy_prefers_bear_off() {
        let state = state(&[(20, -5), (23, -5), (2, 15)], [0, 5], 1, 3);
        let legal = [Move::point(20, 21, 1), Move::bear_off(23, 1)];
        assert_eq!(Greedy.choose(&state, &legal), Some(legal[1]));
    }

    #[test]
    fn test_greedy_prefers_hit() {
        let state = state(&[(0, -14), (4, -1), (6, 1), (12, 14)], [0, 0], 2, 3);
        let legal = [Move::point(0, 3, 3), Move::point(4, 6, 2)];
        assert_eq!(Greedy.choose(&state, &legal), Some(legal[1]));
    }

    #[test]
    fn test_greedy_moves_rearmost() {
        let state = state(&[(0, -10), (10, -5), (23, 15)], [0, 0], 2, 3);
        let legal = [Move::point(10, 12, 2), Move::point(0, 2, 2)];
        assert_eq!(Greedy.choose(&state, &legal), Some(legal[1]));
    }
}
