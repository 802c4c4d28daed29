use crate::{
    board::Board,
    constants::{DOUBLE_USES, MAX_MOVE_LOG, OFF_BOARD, POINTS},
    dice::DiceRoll,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, ReadRangeExt, Write};
use std::fmt;

/// Identifier of a match, assigned by the server.
pub type MatchId = u64;

/// Opaque participant identity issued by the (external) account layer.
pub type PlayerId = u64;

/// Checker color. White checkers are stored as positive point counts, Black as negative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Color {
    White = 0,
    Black = 1,
}

impl Color {
    pub const ALL: [Color; 2] = [Color::White, Color::Black];

    /// Index into per-color arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn opponent(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// Sign of this color's checkers in [Board] point counts.
    pub fn sign(self) -> i8 {
        match self {
            Color::White => 1,
            Color::Black => -1,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::White => write!(f, "white"),
            Color::Black => write!(f, "black"),
        }
    }
}

impl Write for Color {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for Color {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        match u8::read(reader)? {
            0 => Ok(Self::White),
            1 => Ok(Self::Black),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl FixedSize for Color {
    const SIZE: usize = 1;
}

/// Rule set of a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Variant {
    /// Classic backgammon: opposing directions, single checkers can be hit.
    Short = 0,
    /// Long nardy: each side starts stacked on its head point, no hitting.
    Long = 1,
}

impl Write for Variant {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for Variant {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        match u8::read(reader)? {
            0 => Ok(Self::Short),
            1 => Ok(Self::Long),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl FixedSize for Variant {
    const SIZE: usize = 1;
}

/// Match lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum GameStatus {
    Waiting = 0,
    InProgress = 1,
    Finished = 2,
    Abandoned = 3,
}

impl GameStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, GameStatus::Finished | GameStatus::Abandoned)
    }
}

impl Write for GameStatus {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for GameStatus {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        match u8::read(reader)? {
            0 => Ok(Self::Waiting),
            1 => Ok(Self::InProgress),
            2 => Ok(Self::Finished),
            3 => Ok(Self::Abandoned),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl FixedSize for GameStatus {
    const SIZE: usize = 1;
}

/// Position of the current turn within its roll/move cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TurnPhase {
    AwaitingRoll = 0,
    AwaitingMoves = 1,
    TurnComplete = 2,
}

impl Write for TurnPhase {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for TurnPhase {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        match u8::read(reader)? {
            0 => Ok(Self::AwaitingRoll),
            1 => Ok(Self::AwaitingMoves),
            2 => Ok(Self::TurnComplete),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl FixedSize for TurnPhase {
    const SIZE: usize = 1;
}

/// Who sits in a seat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Participant {
    Player(PlayerId),
    Bot,
}

impl Write for Participant {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Participant::Player(id) => {
                0u8.write(writer);
                id.write(writer);
            }
            Participant::Bot => 1u8.write(writer),
        }
    }
}

impl Read for Participant {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        match u8::read(reader)? {
            0 => Ok(Participant::Player(u64::read(reader)?)),
            1 => Ok(Participant::Bot),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl EncodeSize for Participant {
    fn encode_size(&self) -> usize {
        match self {
            Participant::Player(id) => 1 + id.encode_size(),
            Participant::Bot => 1,
        }
    }
}

/// Seat assignment for both colors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Players {
    pub white: Participant,
    pub black: Participant,
}

impl Players {
    pub fn get(&self, color: Color) -> Participant {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    /// Color seated by `player`, if any.
    pub fn color_of(&self, player: PlayerId) -> Option<Color> {
        Color::ALL
            .into_iter()
            .find(|color| self.get(*color) == Participant::Player(player))
    }
}

impl Write for Players {
    fn write(&self, writer: &mut impl BufMut) {
        self.white.write(writer);
        self.black.write(writer);
    }
}

impl Read for Players {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            white: Participant::read(reader)?,
            black: Participant::read(reader)?,
        })
    }
}

impl EncodeSize for Players {
    fn encode_size(&self) -> usize {
        self.white.encode_size() + self.black.encode_size()
    }
}

/// Where a moved checker comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Origin {
    Point(u8),
    Bar,
}

/// Where a moved checker goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Destination {
    Point(u8),
    /// Borne off.
    Off,
}

/// A single checker movement licensed by one die value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Move {
    pub from: Origin,
    pub to: Destination,
    pub die: u8,
}

impl Move {
    pub fn new(from: Origin, to: Destination, die: u8) -> Self {
        Self { from, to, die }
    }

    pub fn point(from: u8, to: u8, die: u8) -> Self {
        Self::new(Origin::Point(from), Destination::Point(to), die)
    }

    pub fn enter(to: u8, die: u8) -> Self {
        Self::new(Origin::Bar, Destination::Point(to), die)
    }

    pub fn bear_off(from: u8, die: u8) -> Self {
        Self::new(Origin::Point(from), Destination::Off, die)
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.from {
            Origin::Point(p) => write!(f, "{p}")?,
            Origin::Bar => write!(f, "bar")?,
        }
        match self.to {
            Destination::Point(p) => write!(f, "/{p}")?,
            Destination::Off => write!(f, "/off")?,
        }
        write!(f, " ({})", self.die)
    }
}

impl Write for Move {
    fn write(&self, writer: &mut impl BufMut) {
        let from = match self.from {
            Origin::Point(p) => p,
            Origin::Bar => OFF_BOARD,
        };
        let to = match self.to {
            Destination::Point(p) => p,
            Destination::Off => OFF_BOARD,
        };
        from.write(writer);
        to.write(writer);
        self.die.write(writer);
    }
}

impl Read for Move {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let from = match u8::read(reader)? {
            OFF_BOARD => Origin::Bar,
            p if (p as usize) < POINTS => Origin::Point(p),
            _ => return Err(Error::Invalid("Move", "origin out of range")),
        };
        let to = match u8::read(reader)? {
            OFF_BOARD => Destination::Off,
            p if (p as usize) < POINTS => Destination::Point(p),
            _ => return Err(Error::Invalid("Move", "destination out of range")),
        };
        Ok(Self {
            from,
            to,
            die: u8::read(reader)?,
        })
    }
}

impl FixedSize for Move {
    const SIZE: usize = 3;
}

/// An applied move as recorded in the audit log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoggedMove {
    pub turn: u32,
    pub color: Color,
    pub mv: Move,
    /// Whether an opposing blot was sent to the bar.
    pub hit: bool,
}

impl Write for LoggedMove {
    fn write(&self, writer: &mut impl BufMut) {
        self.turn.write(writer);
        self.color.write(writer);
        self.mv.write(writer);
        self.hit.write(writer);
    }
}

impl Read for LoggedMove {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            turn: u32::read(reader)?,
            color: Color::read(reader)?,
            mv: Move::read(reader)?,
            hit: bool::read(reader)?,
        })
    }
}

impl FixedSize for LoggedMove {
    const SIZE: usize = u32::SIZE + Color::SIZE + Move::SIZE + bool::SIZE;
}

/// Authoritative state of one match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameState {
    pub variant: Variant,
    pub status: GameStatus,
    pub phase: TurnPhase,
    pub current: Color,
    pub board: Board,
    pub dice: Option<DiceRoll>,
    /// Die values spent this turn.
    pub consumed: Vec<u8>,
    pub move_log: Vec<LoggedMove>,
    pub players: Players,
    /// 1-based turn counter.
    pub turn: u32,
    /// Index of the latest roll, 0 before the first.
    pub roll_index: u64,
    /// Millisecond deadline of the current turn.
    pub deadline: Option<u64>,
    pub winner: Option<Color>,
    /// Set when the match was aborted because the board broke an invariant.
    pub flagged: bool,
}

impl GameState {
    pub fn new(variant: Variant, players: Players, board: Board, deadline: Option<u64>) -> Self {
        Self {
            variant,
            status: GameStatus::Waiting,
            phase: TurnPhase::AwaitingRoll,
            current: Color::White,
            board,
            dice: None,
            consumed: Vec::new(),
            move_log: Vec::new(),
            players,
            turn: 1,
            roll_index: 0,
            deadline,
            winner: None,
            flagged: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl Write for GameState {
    fn write(&self, writer: &mut impl BufMut) {
        self.variant.write(writer);
        self.status.write(writer);
        self.phase.write(writer);
        self.current.write(writer);
        self.board.write(writer);
        self.dice.write(writer);
        self.consumed.write(writer);
        self.move_log.write(writer);
        self.players.write(writer);
        self.turn.write(writer);
        self.roll_index.write(writer);
        self.deadline.write(writer);
        self.winner.write(writer);
        self.flagged.write(writer);
    }
}

impl Read for GameState {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            variant: Variant::read(reader)?,
            status: GameStatus::read(reader)?,
            phase: TurnPhase::read(reader)?,
            current: Color::read(reader)?,
            board: Board::read(reader)?,
            dice: Option::<DiceRoll>::read(reader)?,
            consumed: Vec::<u8>::read_range(reader, 0..=DOUBLE_USES)?,
            move_log: Vec::<LoggedMove>::read_range(reader, 0..=MAX_MOVE_LOG)?,
            players: Players::read(reader)?,
            turn: u32::read(reader)?,
            roll_index: u64::read(reader)?,
            deadline: Option::<u64>::read(reader)?,
            winner: Option::<Color>::read(reader)?,
            flagged: bool::read(reader)?,
        })
    }
}

impl EncodeSize for GameState {
    fn encode_size(&self) -> usize {
        self.variant.encode_size()
            + self.status.encode_size()
            + self.phase.encode_size()
            + self.current.encode_size()
            + self.board.encode_size()
            + self.dice.encode_size()
            + self.consumed.encode_size()
            + self.move_log.encode_size()
            + self.players.encode_size()
            + self.turn.encode_size()
            + self.roll_index.encode_size()
            + self.deadline.encode_size()
            + self.winner.encode_size()
            + self.flagged.encode_size()
    }
}
