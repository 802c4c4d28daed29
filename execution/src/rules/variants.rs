use backgammon_types::{Board, Color, Variant, HOME_POINTS, POINTS};

/// What differs between rule sets. Both variants share the index geometry:
/// White runs from high indices to low, Black from low to high.
pub trait VariantRules: Send + Sync + 'static {
    fn variant(&self) -> Variant;

    /// Index step per pip for `color`.
    fn direction(&self, color: Color) -> i8 {
        match color {
            Color::White => -1,
            Color::Black => 1,
        }
    }

    /// Whether a lone opposing checker can be hit.
    fn can_capture(&self) -> bool;

    /// Whether `color` may land on `point`.
    fn is_legal_landing(&self, board: &Board, color: Color, point: u8) -> bool;

    fn initial_board(&self) -> Board {
        Board::initial(self.variant())
    }
}

/// Classic backgammon.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShortRules;

impl VariantRules for ShortRules {
    fn variant(&self) -> Variant {
        Variant::Short
    }

    fn can_capture(&self) -> bool {
        true
    }

    fn is_legal_landing(&self, board: &Board, color: Color, point: u8) -> bool {
        board.count(color.opponent(), point) <= 1
    }
}

/// Long nardy: a single opposing checker already blocks the point.
///
/// Keeps the default [VariantRules::direction]. The two sides start from
/// opposite heads (White on 23, Black on 0), so each travels the same way
/// around the board as seen from its own side, and the home quadrants stay
/// disjoint.
#[derive(Clone, Copy, Debug, Default)]
pub struct LongRules;

impl VariantRules for LongRules {
    fn variant(&self) -> Variant {
        Variant::Long
    }

    fn can_capture(&self) -> bool {
        false
    }

    fn is_legal_landing(&self, board: &Board, color: Color, point: u8) -> bool {
        board.count(color.opponent(), point) == 0
    }
}

/// Virtual index a checker on the bar starts from.
pub fn bar_index(color: Color) -> i8 {
    match color {
        Color::White => POINTS as i8,
        Color::Black => -1,
    }
}

/// Pips from `point` to just past the bearing-off edge.
pub fn distance_to_edge(color: Color, point: u8) -> u8 {
    match color {
        Color::White => point + 1,
        Color::Black => POINTS as u8 - point,
    }
}

pub fn in_home(color: Color, point: u8) -> bool {
    distance_to_edge(color, point) <= HOME_POINTS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry() {
        assert_eq!(distance_to_edge(Color::White, 0), 1);
        assert_eq!(distance_to_edge(Color::White, 23), 24);
        assert_eq!(distance_to_edge(Color::Black, 23), 1);
        assert_eq!(distance_to_edge(Color::Black, 0), 24);
        assert!(in_home(Color::White, 5));
        assert!(!in_home(Color::White, 6));
        assert!(in_home(Color::Black, 18));
        assert!(!in_home(Color::Black, 17));
    }

    #[test]
    fn test_landing_rules() {
        let mut points = [0i8; POINTS];
        points[10] = -1;
        points[11] = -2;
        points[0] = -12;
        points[23] = 15;
        let board = Board::from_parts(points, [0, 0], [0, 0]).unwrap();

        assert!(ShortRules.is_legal_landing(&board, Color::White, 10));
        assert!(!ShortRules.is_legal_landing(&board, Color::White, 11));
        assert!(!LongRules.is_legal_landing(&board, Color::White, 10));
        assert!(LongRules.is_legal_landing(&board, Color::White, 9));
        assert!(LongRules.is_legal_landing(&board, Color::Black, 11));
    }
}
