//! Board position and its invariants.
//!
//! A [Board] is an immutable value: the only way to change a position is
//! [Board::apply_move], which returns a fresh board and leaves the original
//! untouched.

use crate::{
    constants::{CHECKERS_PER_COLOR, POINTS},
    game::{Color, Destination, Move, Origin, Variant},
};
use bytes::{Buf, BufMut};
use commonware_codec::{Error, FixedSize, Read, ReadExt, Write};
use thiserror::Error;

/// A broken board invariant. Reaching one means the engine has a bug.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("{color} has {total} checkers, expected 15")]
    Conservation { color: Color, total: u8 },
    #[error("point {point} holds more than 15 checkers")]
    Overfull { point: u8 },
    #[error("{color} has no checker on point {point}")]
    MissingChecker { color: Color, point: u8 },
    #[error("{color} has no checker on the bar")]
    EmptyBar { color: Color },
    #[error("point {point} is held by the opponent")]
    Occupied { point: u8 },
}

/// A match position: 24 signed points plus per-color bar and home counts.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Board {
    points: [i8; POINTS],
    bar: [u8; 2],
    home: [u8; 2],
}

impl Board {
    /// Build a board from raw parts. `bar` and `home` are indexed by [Color::index].
    pub fn from_parts(
        points: [i8; POINTS],
        bar: [u8; 2],
        home: [u8; 2],
    ) -> Result<Self, InvariantViolation> {
        let board = Self { points, bar, home };
        board.check_invariants()?;
        Ok(board)
    }

    /// Starting position for `variant`.
    pub fn initial(variant: Variant) -> Self {
        let mut points = [0i8; POINTS];
        match variant {
            Variant::Short => {
                points[23] = 2;
                points[12] = 5;
                points[7] = 3;
                points[5] = 5;
                points[0] = -2;
                points[11] = -5;
                points[16] = -3;
                points[18] = -5;
            }
            Variant::Long => {
                points[0] = -(CHECKERS_PER_COLOR as i8);
                points[23] = CHECKERS_PER_COLOR as i8;
            }
        }
        Self {
            points,
            bar: [0, 0],
            home: [0, 0],
        }
    }

    /// Verify checker conservation for both colors.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (point, count) in self.points.iter().enumerate() {
            if count.unsigned_abs() > CHECKERS_PER_COLOR {
                return Err(InvariantViolation::Overfull { point: point as u8 });
            }
        }
        for color in Color::ALL {
            let total = self.checkers_on_board(color) as u16
                + self.bar[color.index()] as u16
                + self.home[color.index()] as u16;
            if total != CHECKERS_PER_COLOR as u16 {
                return Err(InvariantViolation::Conservation {
                    color,
                    total: total.min(u8::MAX as u16) as u8,
                });
            }
        }
        Ok(())
    }

    pub fn points(&self) -> &[i8; POINTS] {
        &self.points
    }

    /// Checkers of `color` on `point`.
    pub fn count(&self, color: Color, point: u8) -> u8 {
        let value = self.points[point as usize];
        if value.signum() == color.sign() {
            value.unsigned_abs()
        } else {
            0
        }
    }

    /// Color occupying `point`, if any.
    pub fn owner(&self, point: u8) -> Option<Color> {
        match self.points[point as usize].signum() {
            1 => Some(Color::White),
            -1 => Some(Color::Black),
            _ => None,
        }
    }

    pub fn bar(&self, color: Color) -> u8 {
        self.bar[color.index()]
    }

    pub fn home(&self, color: Color) -> u8 {
        self.home[color.index()]
    }

    pub fn checkers_on_board(&self, color: Color) -> u8 {
        (0..POINTS as u8).map(|p| self.count(color, p)).sum()
    }

    /// Points holding at least one checker of `color`, in index order.
    pub fn occupied_by(&self, color: Color) -> impl Iterator<Item = u8> + '_ {
        (0..POINTS as u8).filter(move |p| self.count(color, *p) > 0)
    }

    /// Apply an already-validated move for `color`, returning the new board and
    /// whether an opposing checker was hit.
    ///
    /// Landing on a lone opposing checker is only allowed when `capture` is set.
    /// Any failure here is a contract violation by the caller and trips a debug
    /// assertion.
    pub fn apply_move(
        &self,
        color: Color,
        mv: &Move,
        capture: bool,
    ) -> Result<(Self, bool), InvariantViolation> {
        let result = self.relocate(color, mv, capture);
        debug_assert!(result.is_ok(), "board invariant violated: {result:?}");
        result
    }

    fn relocate(
        &self,
        color: Color,
        mv: &Move,
        capture: bool,
    ) -> Result<(Self, bool), InvariantViolation> {
        let mut next = self.clone();
        let side = color.index();
        match mv.from {
            Origin::Bar => {
                next.bar[side] = next.bar[side]
                    .checked_sub(1)
                    .ok_or(InvariantViolation::EmptyBar { color })?;
            }
            Origin::Point(point) => {
                if next.count(color, point) == 0 {
                    return Err(InvariantViolation::MissingChecker { color, point });
                }
                next.points[point as usize] -= color.sign();
            }
        }

        let mut hit = false;
        match mv.to {
            Destination::Off => next.home[side] += 1,
            Destination::Point(point) => {
                let opponent = color.opponent();
                match next.count(opponent, point) {
                    0 => {}
                    1 if capture => {
                        next.points[point as usize] = 0;
                        next.bar[opponent.index()] += 1;
                        hit = true;
                    }
                    _ => return Err(InvariantViolation::Occupied { point }),
                }
                next.points[point as usize] += color.sign();
            }
        }

        next.check_invariants()?;
        Ok((next, hit))
    }
}

impl Write for Board {
    fn write(&self, writer: &mut impl BufMut) {
        for count in self.points {
            // Two's complement keeps the sign in a single byte.
            (count as u8).write(writer);
        }
        self.bar.write(writer);
        self.home.write(writer);
    }
}

impl Read for Board {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let mut points = [0i8; POINTS];
        for point in points.iter_mut() {
            *point = u8::read(reader)? as i8;
        }
        let bar = <[u8; 2]>::read(reader)?;
        let home = <[u8; 2]>::read(reader)?;
        Self::from_parts(points, bar, home)
            .map_err(|_| Error::Invalid("Board", "checker conservation violated"))
    }
}

impl FixedSize for Board {
    const SIZE: usize = POINTS + 2 + 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn race_board() -> Board {
        // White: 15 on point 5. Black: 15 on point 18.
        let mut points = [0i8; POINTS];
        points[5] = 15;
        points[18] = -15;
        Board::from_parts(points, [0, 0], [0, 0]).unwrap()
    }

    #[test]
    fn test_initial_layouts_conserve_checkers() {
        for variant in [Variant::Short, Variant::Long] {
            let board = Board::initial(variant);
            board.check_invariants().unwrap();
            assert_eq!(board.checkers_on_board(Color::White), 15);
            assert_eq!(board.checkers_on_board(Color::Black), 15);
        }
        let long = Board::initial(Variant::Long);
        assert_eq!(long.points()[0], -15);
        assert_eq!(long.points()[23], 15);
    }

    #[test]
    fn test_from_parts_rejects_missing_checkers() {
        let mut points = [0i8; POINTS];
        points[5] = 14;
        points[18] = -15;
        let err = Board::from_parts(points, [0, 0], [0, 0]).unwrap_err();
        assert_eq!(
            err,
            InvariantViolation::Conservation {
                color: Color::White,
                total: 14
            }
        );
    }

    #[test]
    fn test_from_parts_counts_bar_and_home() {
        let mut points = [0i8; POINTS];
        points[5] = 10;
        points[18] = -12;
        let board = Board::from_parts(points, [2, 1], [3, 2]).unwrap();
        assert_eq!(board.bar(Color::White), 2);
        assert_eq!(board.home(Color::Black), 2);
        assert_eq!(board.checkers_on_board(Color::Black), 12);
    }

    #[test]
    fn test_count_and_owner() {
        let board = race_board();
        assert_eq!(board.count(Color::White, 5), 15);
        assert_eq!(board.count(Color::Black, 5), 0);
        assert_eq!(board.owner(18), Some(Color::Black));
        assert_eq!(board.owner(0), None);
    }

    #[test]
    fn test_apply_move_is_copy_on_write() {
        let board = race_board();
        let (next, hit) = board
            .apply_move(Color::White, &Move::point(5, 2, 3), true)
            .unwrap();
        assert!(!hit);
        assert_eq!(board.count(Color::White, 5), 15);
        assert_eq!(next.count(Color::White, 5), 14);
        assert_eq!(next.count(Color::White, 2), 1);
        next.check_invariants().unwrap();
    }

    #[test]
    fn test_apply_move_hits_blot() {
        let mut points = [0i8; POINTS];
        points[12] = 15;
        points[10] = -1;
        points[0] = -14;
        let board = Board::from_parts(points, [0, 0], [0, 0]).unwrap();
        let (next, hit) = board
            .apply_move(Color::White, &Move::point(12, 10, 2), true)
            .unwrap();
        assert!(hit);
        assert_eq!(next.points()[10], 1);
        assert_eq!(next.bar(Color::Black), 1);
        next.check_invariants().unwrap();
    }

    #[test]
    fn test_bear_off_moves_checker_home() {
        let board = race_board();
        let (next, _) = board
            .apply_move(Color::White, &Move::bear_off(5, 6), true)
            .unwrap();
        assert_eq!(next.home(Color::White), 1);
        assert_eq!(next.checkers_on_board(Color::White), 14);
    }

    #[test]
    fn test_relocate_rejects_occupied_point() {
        let board = race_board();
        let err = board
            .relocate(Color::Black, &Move::point(18, 5, 6), true)
            .unwrap_err();
        assert_eq!(err, InvariantViolation::Occupied { point: 5 });
    }

    #[test]
    fn test_relocate_rejects_blot_without_capture() {
        let mut points = [0i8; POINTS];
        points[12] = 15;
        points[10] = -1;
        points[0] = -14;
        let board = Board::from_parts(points, [0, 0], [0, 0]).unwrap();
        let err = board
            .relocate(Color::White, &Move::point(12, 10, 2), false)
            .unwrap_err();
        assert_eq!(err, InvariantViolation::Occupied { point: 10 });
    }

    #[test]
    fn test_relocate_rejects_empty_bar() {
        let board = race_board();
        let err = board
            .relocate(Color::White, &Move::enter(20, 4), true)
            .unwrap_err();
        assert_eq!(
            err,
            InvariantViolation::EmptyBar {
                color: Color::White
            }
        );
    }
}
