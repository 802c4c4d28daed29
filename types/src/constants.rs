/// Domain separator for every hash the engine produces.
pub const NAMESPACE: &[u8] = b"_BACKGAMMON";

/// Suffix appended to [NAMESPACE] when deriving dice.
pub const DICE_SUFFIX: &[u8] = b"_DICE";

/// Number of points on the board.
pub const POINTS: usize = 24;

/// Checkers each color owns for the whole match.
pub const CHECKERS_PER_COLOR: u8 = 15;

/// Points in a home quadrant.
pub const HOME_POINTS: u8 = 6;

/// Length of a match seed in bytes.
pub const SEED_LENGTH: usize = 32;

/// Die uses granted by a double.
pub const DOUBLE_USES: usize = 4;

/// Rolls a match may use. The match is abandoned once its last turn ends.
pub const MAX_ROLLS: usize = 4_096;

/// Upper bound on logged moves: every roll grants at most [DOUBLE_USES] moves.
pub const MAX_MOVE_LOG: usize = MAX_ROLLS * DOUBLE_USES;

/// Sentinel byte for [crate::Origin::Bar] and [crate::Destination::Off] on the wire.
pub const OFF_BOARD: u8 = 24;
