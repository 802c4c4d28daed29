//! Messages exchanged between clients, the match server, and the archive.

use crate::{
    constants::{MAX_MOVE_LOG, MAX_ROLLS},
    dice::{DiceRoll, Seed},
    game::{Color, GameState, GameStatus, LoggedMove, MatchId, Move, Participant, PlayerId, Players, Variant},
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, ReadRangeExt, Write};
use commonware_cryptography::sha256::Digest;
use thiserror::Error;

/// Why the rule engine refused a move.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum IllegalMove {
    #[error("dice have not been rolled")]
    NoDice,
    #[error("{die} is not a die value")]
    InvalidDie { die: u8 },
    #[error("no unused die shows {die}")]
    DieUnavailable { die: u8 },
    #[error("checkers on the bar must enter first")]
    MustEnterFromBar,
    #[error("no checker on the bar")]
    EmptyBar,
    #[error("no own checker on point {point}")]
    EmptyOrigin { point: u8 },
    #[error("distance does not match the die")]
    WrongDistance,
    #[error("point {point} is blocked")]
    Blocked { point: u8 },
    #[error("bearing off is not allowed yet")]
    BearOffNotAllowed,
    #[error("a checker farther from home must move first")]
    CheckersBehind,
}

impl Write for IllegalMove {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::NoDice => 0u8.write(writer),
            Self::InvalidDie { die } => {
                1u8.write(writer);
                die.write(writer);
            }
            Self::DieUnavailable { die } => {
                2u8.write(writer);
                die.write(writer);
            }
            Self::MustEnterFromBar => 3u8.write(writer),
            Self::EmptyBar => 4u8.write(writer),
            Self::EmptyOrigin { point } => {
                5u8.write(writer);
                point.write(writer);
            }
            Self::WrongDistance => 6u8.write(writer),
            Self::Blocked { point } => {
                7u8.write(writer);
                point.write(writer);
            }
            Self::BearOffNotAllowed => 8u8.write(writer),
            Self::CheckersBehind => 9u8.write(writer),
        }
    }
}

impl Read for IllegalMove {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let reason = match u8::read(reader)? {
            0 => Self::NoDice,
            1 => Self::InvalidDie {
                die: u8::read(reader)?,
            },
            2 => Self::DieUnavailable {
                die: u8::read(reader)?,
            },
            3 => Self::MustEnterFromBar,
            4 => Self::EmptyBar,
            5 => Self::EmptyOrigin {
                point: u8::read(reader)?,
            },
            6 => Self::WrongDistance,
            7 => Self::Blocked {
                point: u8::read(reader)?,
            },
            8 => Self::BearOffNotAllowed,
            9 => Self::CheckersBehind,
            i => return Err(Error::InvalidEnum(i)),
        };
        Ok(reason)
    }
}

impl EncodeSize for IllegalMove {
    fn encode_size(&self) -> usize {
        match self {
            Self::InvalidDie { .. }
            | Self::DieUnavailable { .. }
            | Self::EmptyOrigin { .. }
            | Self::Blocked { .. } => 2,
            _ => 1,
        }
    }
}

/// Why a request was refused. Only the requester ever sees this.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum RejectReason {
    #[error("illegal move: {0}")]
    IllegalMove(IllegalMove),
    #[error("not your turn")]
    OutOfTurn,
    #[error("request not valid in the current phase")]
    WrongPhase,
    #[error("unknown match")]
    UnknownMatch,
    #[error("not a participant of this match")]
    NotParticipant,
    #[error("match is over")]
    GameOver,
    #[error("turn deadline passed")]
    Timeout,
    #[error("match aborted: internal invariant violated")]
    InvariantViolation,
    #[error("server unavailable")]
    Unavailable,
}

impl Write for RejectReason {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::IllegalMove(reason) => {
                0u8.write(writer);
                reason.write(writer);
            }
            Self::OutOfTurn => 1u8.write(writer),
            Self::WrongPhase => 2u8.write(writer),
            Self::UnknownMatch => 3u8.write(writer),
            Self::NotParticipant => 4u8.write(writer),
            Self::GameOver => 5u8.write(writer),
            Self::Timeout => 6u8.write(writer),
            Self::InvariantViolation => 7u8.write(writer),
            Self::Unavailable => 8u8.write(writer),
        }
    }
}

impl Read for RejectReason {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let reason = match u8::read(reader)? {
            0 => Self::IllegalMove(IllegalMove::read(reader)?),
            1 => Self::OutOfTurn,
            2 => Self::WrongPhase,
            3 => Self::UnknownMatch,
            4 => Self::NotParticipant,
            5 => Self::GameOver,
            6 => Self::Timeout,
            7 => Self::InvariantViolation,
            8 => Self::Unavailable,
            i => return Err(Error::InvalidEnum(i)),
        };
        Ok(reason)
    }
}

impl EncodeSize for RejectReason {
    fn encode_size(&self) -> usize {
        match self {
            Self::IllegalMove(reason) => 1 + reason.encode_size(),
            _ => 1,
        }
    }
}

/// Full, versioned view of a match. `version` grows by one per accepted
/// mutation so clients can detect missed updates and resync.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub match_id: MatchId,
    pub version: u64,
    pub commitment: Digest,
    pub state: GameState,
}

impl Write for Snapshot {
    fn write(&self, writer: &mut impl BufMut) {
        self.match_id.write(writer);
        self.version.write(writer);
        self.commitment.write(writer);
        self.state.write(writer);
    }
}

impl Read for Snapshot {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            match_id: u64::read(reader)?,
            version: u64::read(reader)?,
            commitment: Digest::read(reader)?,
            state: GameState::read(reader)?,
        })
    }
}

impl EncodeSize for Snapshot {
    fn encode_size(&self) -> usize {
        self.match_id.encode_size()
            + self.version.encode_size()
            + self.commitment.encode_size()
            + self.state.encode_size()
    }
}

/// Broadcast to both participants after every accepted mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Event {
    DiceRolled(Snapshot),
    StateUpdated(Snapshot),
    TurnSwitched(Snapshot),
    GameEnded(Snapshot),
}

impl Event {
    pub fn snapshot(&self) -> &Snapshot {
        match self {
            Event::DiceRolled(snapshot)
            | Event::StateUpdated(snapshot)
            | Event::TurnSwitched(snapshot)
            | Event::GameEnded(snapshot) => snapshot,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::DiceRolled(_) => "dice-rolled",
            Event::StateUpdated(_) => "state-updated",
            Event::TurnSwitched(_) => "turn-switched",
            Event::GameEnded(_) => "game-ended",
        }
    }
}

impl Write for Event {
    fn write(&self, writer: &mut impl BufMut) {
        let tag: u8 = match self {
            Event::DiceRolled(_) => 0,
            Event::StateUpdated(_) => 1,
            Event::TurnSwitched(_) => 2,
            Event::GameEnded(_) => 3,
        };
        tag.write(writer);
        self.snapshot().write(writer);
    }
}

impl Read for Event {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let tag = u8::read(reader)?;
        let snapshot = Snapshot::read(reader)?;
        match tag {
            0 => Ok(Event::DiceRolled(snapshot)),
            1 => Ok(Event::StateUpdated(snapshot)),
            2 => Ok(Event::TurnSwitched(snapshot)),
            3 => Ok(Event::GameEnded(snapshot)),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl EncodeSize for Event {
    fn encode_size(&self) -> usize {
        1 + self.snapshot().encode_size()
    }
}

/// Client intent submitted to the match server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Create {
        variant: Variant,
        white: PlayerId,
        black: Participant,
    },
    Roll {
        match_id: MatchId,
        player: PlayerId,
    },
    Move {
        match_id: MatchId,
        player: PlayerId,
        mv: Move,
    },
    EndTurn {
        match_id: MatchId,
        player: PlayerId,
    },
    Resync {
        match_id: MatchId,
    },
}

impl Write for Request {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Create {
                variant,
                white,
                black,
            } => {
                0u8.write(writer);
                variant.write(writer);
                white.write(writer);
                black.write(writer);
            }
            Self::Roll { match_id, player } => {
                1u8.write(writer);
                match_id.write(writer);
                player.write(writer);
            }
            Self::Move {
                match_id,
                player,
                mv,
            } => {
                2u8.write(writer);
                match_id.write(writer);
                player.write(writer);
                mv.write(writer);
            }
            Self::EndTurn { match_id, player } => {
                3u8.write(writer);
                match_id.write(writer);
                player.write(writer);
            }
            Self::Resync { match_id } => {
                4u8.write(writer);
                match_id.write(writer);
            }
        }
    }
}

impl Read for Request {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let request = match u8::read(reader)? {
            0 => Self::Create {
                variant: Variant::read(reader)?,
                white: u64::read(reader)?,
                black: Participant::read(reader)?,
            },
            1 => Self::Roll {
                match_id: u64::read(reader)?,
                player: u64::read(reader)?,
            },
            2 => Self::Move {
                match_id: u64::read(reader)?,
                player: u64::read(reader)?,
                mv: Move::read(reader)?,
            },
            3 => Self::EndTurn {
                match_id: u64::read(reader)?,
                player: u64::read(reader)?,
            },
            4 => Self::Resync {
                match_id: u64::read(reader)?,
            },
            i => return Err(Error::InvalidEnum(i)),
        };
        Ok(request)
    }
}

impl EncodeSize for Request {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Create {
                variant,
                white,
                black,
            } => variant.encode_size() + white.encode_size() + black.encode_size(),
            Self::Roll { match_id, player } | Self::EndTurn { match_id, player } => {
                match_id.encode_size() + player.encode_size()
            }
            Self::Move {
                match_id,
                player,
                mv,
            } => match_id.encode_size() + player.encode_size() + mv.encode_size(),
            Self::Resync { match_id } => match_id.encode_size(),
        }
    }
}

/// Reply to a [Request].
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Response {
    Created {
        match_id: MatchId,
        commitment: Digest,
    },
    Rolled(DiceRoll),
    Snapshot(Snapshot),
    Rejected(RejectReason),
}

impl Write for Response {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Created {
                match_id,
                commitment,
            } => {
                0u8.write(writer);
                match_id.write(writer);
                commitment.write(writer);
            }
            Self::Rolled(roll) => {
                1u8.write(writer);
                roll.write(writer);
            }
            Self::Snapshot(snapshot) => {
                2u8.write(writer);
                snapshot.write(writer);
            }
            Self::Rejected(reason) => {
                3u8.write(writer);
                reason.write(writer);
            }
        }
    }
}

impl Read for Response {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let response = match u8::read(reader)? {
            0 => Self::Created {
                match_id: u64::read(reader)?,
                commitment: Digest::read(reader)?,
            },
            1 => Self::Rolled(DiceRoll::read(reader)?),
            2 => Self::Snapshot(Snapshot::read(reader)?),
            3 => Self::Rejected(RejectReason::read(reader)?),
            i => return Err(Error::InvalidEnum(i)),
        };
        Ok(response)
    }
}

impl EncodeSize for Response {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Created {
                match_id,
                commitment,
            } => match_id.encode_size() + commitment.encode_size(),
            Self::Rolled(roll) => roll.encode_size(),
            Self::Snapshot(snapshot) => snapshot.encode_size(),
            Self::Rejected(reason) => reason.encode_size(),
        }
    }
}

/// Everything needed to audit and replay a finished match, handed to the
/// history archive when the match is torn down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchRecord {
    pub match_id: MatchId,
    pub variant: Variant,
    pub players: Players,
    pub status: GameStatus,
    pub winner: Option<Color>,
    pub flagged: bool,
    pub move_log: Vec<LoggedMove>,
    pub rolls: Vec<DiceRoll>,
    pub seed: Seed,
    pub commitment: Digest,
    pub duration_ms: u64,
}

impl Write for MatchRecord {
    fn write(&self, writer: &mut impl BufMut) {
        self.match_id.write(writer);
        self.variant.write(writer);
        self.players.write(writer);
        self.status.write(writer);
        self.winner.write(writer);
        self.flagged.write(writer);
        self.move_log.write(writer);
        self.rolls.write(writer);
        self.seed.write(writer);
        self.commitment.write(writer);
        self.duration_ms.write(writer);
    }
}

impl Read for MatchRecord {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            match_id: u64::read(reader)?,
            variant: Variant::read(reader)?,
            players: Players::read(reader)?,
            status: GameStatus::read(reader)?,
            winner: Option::<Color>::read(reader)?,
            flagged: bool::read(reader)?,
            move_log: Vec::<LoggedMove>::read_range(reader, 0..=MAX_MOVE_LOG)?,
            rolls: Vec::<DiceRoll>::read_range(reader, 0..=MAX_ROLLS)?,
            seed: Seed::read(reader)?,
            commitment: Digest::read(reader)?,
            duration_ms: u64::read(reader)?,
        })
    }
}

impl EncodeSize for MatchRecord {
    fn encode_size(&self) -> usize {
        self.match_id.encode_size()
            + self.variant.encode_size()
            + self.players.encode_size()
            + self.status.encode_size()
            + self.winner.encode_size()
            + self.flagged.encode_size()
            + self.move_log.encode_size()
            + self.rolls.encode_size()
            + Seed::SIZE
            + Digest::SIZE
            + self.duration_ms.encode_size()
    }
}
