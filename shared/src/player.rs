use crate::{Coord, Direction, INITIAL_SEGMENTS};
use serde::{Deserialize, Serialize};

/// Authoritative state of one connection's snake.
///
/// Plain data: the shard performs every mutation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: u32,
    /// Head cell.
    pub position: Coord,
    pub direction: Direction,
    /// Body cells, head-adjacent first.
    pub segments: Vec<Coord>,
    pub is_alive: bool,
    /// Consecutive rejected moves.
    pub grace_counter: u32,
    pub last_update_tick: u64,
}

impl Player {
    /// Fresh snake with its starting segments stacked on the head cell.
    pub fn new(id: u32, position: Coord, direction: Direction) -> Self {
        Self {
            id,
            position,
            direction,
            segments: vec![position; INITIAL_SEGMENTS],
            is_alive: true,
            grace_counter: 0,
            last_update_tick: 0,
        }
    }

    pub fn is_same_position(&self, coord: &Coord) -> bool {
        self.position == *coord
    }

    pub fn score(&self) -> usize {
        self.segments.len()
    }

    /// Head followed by every segment.
    pub fn footprint(&self) -> impl Iterator<Item = Coord> + '_ {
        std::iter::once(self.position).chain(self.segments.iter().copied())
    }

    pub fn occupies(&self, coord: Coord) -> bool {
        self.footprint().any(|cell| cell == coord)
    }
}
