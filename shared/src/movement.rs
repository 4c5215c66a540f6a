//! The cardinal movement rule.
//!
//! The shard evaluates it against the full grid and the client predictor
//! against its partial view of the world; both call the same [`step`].

use crate::grid::Cell;
use crate::{Coord, Direction};

/// Anything that can answer "what is in this cell".
///
/// `None` means the coordinate lies outside the world known to the source.
pub trait CellSource {
    fn cell_at(&self, coord: Coord) -> Option<Cell>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Destination is free; `food` is set when it holds food.
    Open { to: Coord, food: bool },
    /// Destination is blocked terrain.
    Blocked { to: Coord },
    /// Destination is part of a snake.
    Occupied { to: Coord },
    /// Destination is past the edge of the known world.
    Outside,
}

pub fn step<S: CellSource + ?Sized>(source: &S, from: Coord, direction: Direction) -> Step {
    let to = from.offset(direction);
    match source.cell_at(to) {
        None => Step::Outside,
        Some(Cell::Empty) => Step::Open { to, food: false },
        Some(Cell::Food) => Step::Open { to, food: true },
        Some(Cell::Blocked) => Step::Blocked { to },
        Some(Cell::Snake) => Step::Occupied { to },
    }
}

/// True when facing `direction` would run the head back into one of the two
/// most recent segments.
pub fn is_reversal(position: Coord, direction: Direction, segments: &[Coord]) -> bool {
    let ahead = position.offset(direction);
    segments.iter().take(2).any(|segment| *segment == ahead)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;

    #[test]
    fn test_step_against_grid() {
        let mut grid = Grid::new(5, 5, true);
        grid.set_value(2, 1, Cell::Food).unwrap();
        grid.set_value(3, 2, Cell::Snake).unwrap();

        let from = Coord::new(2, 2);
        assert_eq!(
            step(&grid, from, Direction::North),
            Step::Open { to: Coord::new(2, 1), food: true }
        );
        assert_eq!(
            step(&grid, from, Direction::West),
            Step::Open { to: Coord::new(1, 2), food: false }
        );
        assert_eq!(
            step(&grid, from, Direction::East),
            Step::Occupied { to: Coord::new(3, 2) }
        );
        assert_eq!(
            step(&grid, Coord::new(1, 1), Direction::North),
            Step::Blocked { to: Coord::new(1, 0) }
        );
        assert_eq!(step(&grid, Coord::new(0, 0), Direction::West), Step::Outside);
    }

    #[test]
    fn test_reversal_checks_two_latest_segments() {
        let head = Coord::new(5, 5);
        let segments = vec![Coord::new(4, 5), Coord::new(4, 4), Coord::new(5, 4)];

        assert!(is_reversal(head, Direction::West, &segments));
        assert!(!is_reversal(head, Direction::East, &segments));
        assert!(!is_reversal(head, Direction::South, &segments));
        // Third segment is adjacent but older than the two checked.
        assert!(!is_reversal(head, Direction::North, &segments));
    }

    #[test]
    fn test_stacked_start_is_never_a_reversal() {
        let head = Coord::new(3, 3);
        let segments = vec![head; 3];
        for direction in Direction::ALL {
            assert!(!is_reversal(head, direction, &segments));
        }
    }
}
