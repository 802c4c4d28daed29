pub mod api;
pub mod board;
pub mod constants;
pub mod dice;
pub mod game;

pub use api::{Event, IllegalMove, MatchRecord, RejectReason, Request, Response, Snapshot};
pub use board::{Board, InvariantViolation};
pub use constants::*;
pub use dice::{DiceRoll, Seed};
pub use game::{
    Color, Destination, GameState, GameStatus, LoggedMove, MatchId, Move, Origin, Participant,
    PlayerId, Players, TurnPhase, Variant,
};
