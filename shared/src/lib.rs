use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;
pub mod grid;
pub mod movement;
pub mod player;
pub mod protocol;

pub use config::{ConfigError, ShardConfig};
pub use grid::{Bounds, Cell, Grid, GridError};
pub use movement::{is_reversal, step, CellSource, Step};
pub use player::Player;
pub use protocol::{Packet, Snapshot};

pub const PROTOCOL_VERSION: u32 = 1;
pub const INITIAL_SEGMENTS: usize = 3;

/// Errors raised while decoding client-supplied values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid direction value {0}")]
    InvalidDirection(u8),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, direction: Direction) -> Self {
        let (dx, dy) = direction.delta();
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    pub fn distance_squared(self, other: Coord) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        dx * dx + dy * dy
    }
}

/// Cardinal facing. Wire values are fixed: N=1, E=2, S=3, W=4.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    North = 1,
    East = 2,
    South = 3,
    West = 4,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// Grid offset, with y growing downwards.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Direction {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Direction::North),
            2 => Ok(Direction::East),
            3 => Ok(Direction::South),
            4 => Ok(Direction::West),
            other => Err(ProtocolError::InvalidDirection(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_wire_values() {
        assert_eq!(Direction::North.as_u8(), 1);
        assert_eq!(Direction::East.as_u8(), 2);
        assert_eq!(Direction::South.as_u8(), 3);
        assert_eq!(Direction::West.as_u8(), 4);

        for direction in Direction::ALL {
            assert_eq!(Direction::try_from(direction.as_u8()), Ok(direction));
        }
    }

    #[test]
    fn test_direction_rejects_unknown_values() {
        for value in [0u8, 5, 99, 255] {
            assert_eq!(
                Direction::try_from(value),
                Err(ProtocolError::InvalidDirection(value))
            );
        }
    }

    #[test]
    fn test_direction_opposites() {
        for direction in Direction::ALL {
            assert_ne!(direction, direction.opposite());
            assert_eq!(direction, direction.opposite().opposite());

            let (dx, dy) = direction.delta();
            let (ox, oy) = direction.opposite().delta();
            assert_eq!((dx + ox, dy + oy), (0, 0));
        }
    }

    #[test]
    fn test_coord_offset_and_distance() {
        let origin = Coord::new(3, 3);
        assert_eq!(origin.offset(Direction::North), Coord::new(3, 2));
        assert_eq!(origin.offset(Direction::East), Coord::new(4, 3));
        assert_eq!(origin.offset(Direction::South), Coord::new(3, 4));
        assert_eq!(origin.offset(Direction::West), Coord::new(2, 3));

        assert_eq!(origin.distance_squared(Coord::new(6, 7)), 25);
        assert_eq!(origin.distance_squared(origin), 0);
    }
}
