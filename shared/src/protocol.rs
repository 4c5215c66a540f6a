use crate::grid::{Bounds, Cell};
use crate::player::Player;
use crate::Coord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
        /// Prior state to resume from, when reconnecting.
        resume: Option<Player>,
    },
    Direct {
        tick: u64,
        position: Coord,
        segments: Vec<Coord>,
        /// Raw wire value; validated by the shard.
        direction: u8,
    },
    Eat {
        x: i32,
        y: i32,
    },
    Restart,
    Disconnect,

    Connected {
        client_id: u32,
    },
    Start(Snapshot),
    Update(Snapshot),
    Ate(Snapshot),
    Die {
        score: usize,
    },
    Disconnected {
        reason: String,
    },
}

/// Player-centric view of the shard at one tick.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Snapshot {
    pub player: Player,
    /// Other living players.
    pub players: Vec<Player>,
    /// Windowed grid, row-major.
    pub grid: Vec<Vec<Cell>>,
    pub bounds: Bounds,
    pub width: usize,
    pub height: usize,
    pub tick: u64,
    pub is_forced: bool,
}

impl Snapshot {
    /// Cell at a world coordinate, if it falls inside the window.
    pub fn cell_at(&self, coord: Coord) -> Option<Cell> {
        if !self.bounds.contains(coord) {
            return None;
        }
        let row = (coord.y - self.bounds.y) as usize;
        let column = (coord.x - self.bounds.x) as usize;
        self.grid.get(row).and_then(|cells| cells.get(column)).copied()
    }
}
