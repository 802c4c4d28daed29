pub mod bot;
pub mod dice;
pub mod rules;
pub mod turn;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;


pub use bot::{play_turn, FirstLegal, Greedy, Strategy};
pub use dice::{DiceService, UnknownMatch};
pub use rules::{EngineError, LongRules, RuleEngine, ShortRules, VariantRules};
pub use turn::{Match, TurnConfig, TurnError};
