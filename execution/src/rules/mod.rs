//! Move legality, application, and enumeration.
//!
//! The engine is pure: every operation takes a [GameState] by reference and
//! either answers a question about it or returns a new state.

mod variants;

pub use variants::{bar_index, distance_to_edge, in_home, LongRules, ShortRules, VariantRules};

use backgammon_types::{
    Board, Color, Destination, GameState, IllegalMove, InvariantViolation, LoggedMove, Move,
    Origin, Variant, CHECKERS_PER_COLOR, POINTS,
};
use std::collections::BTreeSet;
use thiserror::Error;

/// Failure applying a move.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Illegal(#[from] IllegalMove),
    #[error("invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}

pub struct RuleEngine {
    rules: Box<dyn VariantRules>,
}

impl RuleEngine {
    pub fn new(variant: Variant) -> Self {
        let rules: Box<dyn VariantRules> = match variant {
            Variant::Short => Box::new(ShortRules),
            Variant::Long => Box::new(LongRules),
        };
        Self { rules }
    }

    pub fn variant(&self) -> Variant {
        self.rules.variant()
    }

    pub fn initial_board(&self) -> Board {
        self.rules.initial_board()
    }

    pub fn can_capture(&self) -> bool {
        self.rules.can_capture()
    }

    /// Die values still available to the current color this turn.
    pub fn remaining_dice(&self, state: &GameState) -> Vec<u8> {
        let Some(roll) = state.dice else {
            return Vec::new();
        };
        let mut remaining = roll.uses();
        for used in &state.consumed {
            if let Some(position) = remaining.iter().position(|die| die == used) {
                remaining.remove(position);
            }
        }
        remaining
    }

    /// Bar empty and every on-board checker of `color` inside its home quadrant.
    pub fn can_bear_off(&self, state: &GameState, color: Color) -> bool {
        let board = &state.board;
        board.bar(color) == 0 && board.occupied_by(color).all(|point| in_home(color, point))
    }

    pub fn is_legal_move(&self, state: &GameState, mv: &Move) -> bool {
        self.check_move(state, mv).is_ok()
    }

    /// Validate `mv` for the color to act.
    pub fn check_move(&self, state: &GameState, mv: &Move) -> Result<(), IllegalMove> {
        let color = state.current;
        let board = &state.board;
        if state.dice.is_none() {
            return Err(IllegalMove::NoDice);
        }
        if !(1..=6).contains(&mv.die) {
            return Err(IllegalMove::InvalidDie { die: mv.die });
        }
        if !self.remaining_dice(state).contains(&mv.die) {
            return Err(IllegalMove::DieUnavailable { die: mv.die });
        }

        let start = match mv.from {
            Origin::Bar => {
                if board.bar(color) == 0 {
                    return Err(IllegalMove::EmptyBar);
                }
                bar_index(color)
            }
            Origin::Point(point) => {
                if board.bar(color) > 0 {
                    return Err(IllegalMove::MustEnterFromBar);
                }
                if point as usize >= POINTS || board.count(color, point) == 0 {
                    return Err(IllegalMove::EmptyOrigin { point });
                }
                point as i8
            }
        };
        let target = start + self.rules.direction(color) * mv.die as i8;

        match mv.to {
            Destination::Point(point) => {
                if !(0..POINTS as i8).contains(&target) || target != point as i8 {
                    return Err(IllegalMove::WrongDistance);
                }
                if !self.rules.is_legal_landing(board, color, point) {
                    return Err(IllegalMove::Blocked { point });
                }
                Ok(())
            }
            Destination::Off => {
                let Origin::Point(point) = mv.from else {
                    return Err(IllegalMove::WrongDistance);
                };
                if !self.can_bear_off(state, color) {
                    return Err(IllegalMove::BearOffNotAllowed);
                }
                let distance = distance_to_edge(color, point);
                if mv.die < distance {
                    return Err(IllegalMove::WrongDistance);
                }
                if mv.die > distance
                    && board
                        .occupied_by(color)
                        .any(|other| distance_to_edge(color, other) > distance)
                {
                    return Err(IllegalMove::CheckersBehind);
                }
                Ok(())
            }
        }
    }

    /// Validate and apply `mv`, returning the successor state.
    pub fn apply_move(&self, state: &GameState, mv: &Move) -> Result<GameState, EngineError> {
        self.check_move(state, mv)?;
        let color = state.current;
        let (board, hit) = state
            .board
            .apply_move(color, mv, self.rules.can_capture())?;

        let mut next = state.clone();
        next.board = board;
        next.consumed.push(mv.die);
        next.move_log.push(LoggedMove {
            turn: state.turn,
            color,
            mv: *mv,
            hit,
        });
        Ok(next)
    }

    /// Every legal move for the color to act, deduplicated and ordered.
    pub fn legal_moves(&self, state: &GameState) -> Vec<Move> {
        let color = state.current;
        let board = &state.board;
        let direction = self.rules.direction(color);
        let dice: BTreeSet<u8> = self.remaining_dice(state).into_iter().collect();

        let mut moves = BTreeSet::new();
        for die in dice {
            let step = direction * die as i8;
            if board.bar(color) > 0 {
                let target = bar_index(color) + step;
                let mv = Move::enter(target as u8, die);
                if (0..POINTS as i8).contains(&target) && self.is_legal_move(state, &mv) {
                    moves.insert(mv);
                }
                continue;
            }
            for point in board.occupied_by(color) {
                let target = point as i8 + step;
                let mv = if (0..POINTS as i8).contains(&target) {
                    Move::point(point, target as u8, die)
                } else {
                    Move::bear_off(point, die)
                };
                if self.is_legal_move(state, &mv) {
                    moves.insert(mv);
                }
            }
        }
        moves.into_iter().collect()
    }

    /// The color that has borne off all its checkers.
    pub fn check_win(&self, state: &GameState) -> Option<Color> {
        Color::ALL
            .into_iter()
            .find(|color| state.board.home(*color) == CHECKERS_PER_COLOR)
    }

    /// Pips `color` still needs to bear everything off. Bar checkers count 25.
    pub fn pip_count(&self, board: &Board, color: Color) -> u32 {
        let on_board: u32 = board
            .occupied_by(color)
            .map(|point| board.count(color, point) as u32 * distance_to_edge(color, point) as u32)
            .sum();
        on_board + board.bar(color) as u32 * (POINTS as u32 + 1)
    }
}
