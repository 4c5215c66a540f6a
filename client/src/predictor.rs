//! Client-side prediction for the controlled snake.
//!
//! The predictor moves the local snake on its own fixed tick, using the same
//! movement rule as the shard against whatever part of the world it last saw.
//! Server snapshots are buffered and folded in at the start of each local
//! tick; whether one overrides the local prediction depends on how far the two
//! have drifted.

use crate::input::DirectionQueue;
use log::{debug, info, warn};
use snake_shared::{step, Cell, CellSource, Coord, Direction, Packet, Player, Snapshot, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictorConfig {
    /// Tick gap tolerated before a server snapshot overrides prediction.
    pub leniency: u32,
    /// Maximum number of queued direction changes.
    pub input_capacity: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            leniency: 2,
            input_capacity: 2,
        }
    }
}

/// The world as the predictor knows it: the last server window, the other
/// snakes from that snapshot, and the locally predicted body.
struct KnownWorld<'a> {
    snapshot: &'a Snapshot,
    local: &'a Player,
    others: &'a [Player],
}

impl CellSource for KnownWorld<'_> {
    fn cell_at(&self, coord: Coord) -> Option<Cell> {
        let width = self.snapshot.width as i32;
        let height = self.snapshot.height as i32;
        if coord.x < 0 || coord.y < 0 || coord.x >= width || coord.y >= height {
            return None;
        }

        if self.local.occupies(coord) || self.others.iter().any(|other| other.occupies(coord)) {
            return Some(Cell::Snake);
        }

        // Cells the server still has under our older body are free to us.
        if self.snapshot.player.occupies(coord) {
            return Some(Cell::Empty);
        }

        Some(self.snapshot.cell_at(coord).unwrap_or(Cell::Empty))
    }
}

pub struct Predictor {
    config: PredictorConfig,
    client_id: Option<u32>,
    local: Option<Player>,
    others: Vec<Player>,
    world: Option<Snapshot>,
    tick: u64,
    inputs: DirectionQueue,
    inbox: Vec<Snapshot>,
    /// Tick of the newest server snapshot folded in so far.
    last_server_tick: Option<u64>,
    /// Set after the predictor refused a move it expected to collide, so the
    /// next snapshot is taken as truth.
    awaiting_server: bool,
    score: Option<usize>,
}

impl Predictor {
    pub fn new(config: PredictorConfig) -> Self {
        Self {
            config,
            client_id: None,
            local: None,
            others: Vec::new(),
            world: None,
            tick: 0,
            inputs: DirectionQueue::new(config.input_capacity),
            inbox: Vec::new(),
            last_server_tick: None,
            awaiting_server: false,
            score: None,
        }
    }

    pub fn client_id(&self) -> Option<u32> {
        self.client_id
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn player(&self) -> Option<&Player> {
        self.local.as_ref()
    }

    pub fn others(&self) -> &[Player] {
        &self.others
    }

    pub fn is_alive(&self) -> bool {
        self.local.as_ref().is_some_and(|player| player.is_alive)
    }

    pub fn is_awaiting_server(&self) -> bool {
        self.awaiting_server
    }

    /// Score reported by the server when the snake last died.
    pub fn final_score(&self) -> Option<usize> {
        self.score
    }

    /// State to resume from after reconnecting.
    pub fn resume_state(&self) -> Option<Player> {
        self.local.clone().filter(|player| player.is_alive)
    }

    /// Queues a turn for a later local tick. Returns false when the queue is
    /// full.
    pub fn queue_direction(&mut self, direction: Direction) -> bool {
        self.inputs.push(direction)
    }

    /// Takes in a packet from the server.
    pub fn receive(&mut self, packet: Packet) {
        match packet {
            Packet::Connected { client_id } => {
                info!("Connected! Client ID: {}", client_id);
                self.client_id = Some(client_id);
            }

            Packet::Start(snapshot) => {
                info!(
                    "Spawned at ({}, {})",
                    snapshot.player.position.x, snapshot.player.position.y
                );
                self.inbox.clear();
                self.inputs.clear();
                self.score = None;
                self.apply_full(snapshot);
            }

            Packet::Update(snapshot) => self.inbox.push(snapshot),

            Packet::Ate(snapshot) => {
                if let Some(local) = self.local.as_mut() {
                    let tail = local.segments.last().copied().unwrap_or(local.position);
                    local.segments.push(tail);
                }
                self.inbox.push(snapshot);
            }

            Packet::Die { score } => {
                info!("Died with score {}", score);
                if let Some(local) = self.local.as_mut() {
                    local.is_alive = false;
                }
                self.inputs.clear();
                self.inbox.clear();
                self.score = Some(score);
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.client_id = None;
                if let Some(local) = self.local.as_mut() {
                    local.is_alive = false;
                }
                self.inputs.clear();
                self.inbox.clear();
            }

            other => {
                warn!("Unexpected packet from server: {:?}", other);
            }
        }
    }

    fn apply_full(&mut self, snapshot: Snapshot) {
        self.last_server_tick = Some(snapshot.tick);
        self.local = Some(snapshot.player.clone());
        self.others = snapshot.players.clone();
        self.tick = snapshot.tick;
        self.awaiting_server = false;
        self.world = Some(snapshot);
    }

    fn apply_partial(&mut self, snapshot: Snapshot) {
        self.last_server_tick = Some(snapshot.tick);
        self.others = snapshot.players.clone();
        self.world = Some(snapshot);
    }

    /// Folds the newest buffered snapshot in and drops the rest.
    fn process_inbox(&mut self) {
        let Some(latest) = self
            .inbox
            .drain(..)
            .max_by_key(|snapshot| (snapshot.tick, snapshot.is_forced))
        else {
            return;
        };

        // Late datagrams never rewind past what was already applied. A
        // forced snapshot may still replace an unforced one of its own tick.
        if let Some(applied) = self.last_server_tick {
            if latest.tick < applied || (latest.tick == applied && !latest.is_forced) {
                debug!(
                    "Dropping stale snapshot for tick {} (already at {})",
                    latest.tick, applied
                );
                return;
            }
        }

        let gap = latest.tick.abs_diff(self.tick);
        if latest.is_forced
            || gap > self.config.leniency as u64
            || self.awaiting_server
            || self.local.is_none()
        {
            debug!(
                "Taking server state for tick {} (local tick {}, forced: {})",
                latest.tick, self.tick, latest.is_forced
            );
            self.apply_full(latest);
        } else {
            self.apply_partial(latest);
        }
    }

    /// Runs one local tick and returns the packets to send to the server.
    pub fn local_tick(&mut self) -> Vec<Packet> {
        let mut outbound = Vec::new();
        self.process_inbox();

        let (Some(local), Some(world)) = (self.local.as_mut(), self.world.as_mut()) else {
            self.tick += 1;
            return outbound;
        };
        if !local.is_alive {
            self.tick += 1;
            return outbound;
        }

        let applied = self.inputs.next_valid(local.position, &local.segments);
        if let Some(direction) = applied {
            local.direction = direction;
        }

        let view = KnownWorld {
            snapshot: &*world,
            local: &*local,
            others: &self.others,
        };
        match step(&view, local.position, local.direction) {
            Step::Open { to, food } => {
                local.segments.insert(0, local.position);
                local.position = to;
                if food {
                    clear_window_cell(world, to);
                    outbound.push(Packet::Eat { x: to.x, y: to.y });
                } else {
                    local.segments.pop();
                }
            }
            Step::Blocked { to } | Step::Occupied { to } => {
                debug!(
                    "Predicted collision at ({}, {}), deferring to server",
                    to.x, to.y
                );
                self.awaiting_server = true;
            }
            Step::Outside => {}
        }

        self.tick += 1;

        if let Some(direction) = applied {
            outbound.push(Packet::Direct {
                tick: self.tick,
                position: local.position,
                segments: local.segments.clone(),
                direction: direction.as_u8(),
            });
        }

        outbound
    }
}

fn clear_window_cell(snapshot: &mut Snapshot, coord: Coord) {
    if !snapshot.bounds.contains(coord) {
        return;
    }
    let row = (coord.y - snapshot.bounds.y) as usize;
    let column = (coord.x - snapshot.bounds.x) as usize;
    if let Some(cell) = snapshot.grid.get_mut(row).and_then(|cells| cells.get_mut(column)) {
        *cell = Cell::Empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snake_shared::{Grid, INITIAL_SEGMENTS};

    fn snapshot_for(grid: &Grid, player: Player, tick: u64, is_forced: bool) -> Snapshot {
        let (bounds, cells) = grid.subgrid_array(player.position.x, player.position.y, 5, 5, 1);
        Snapshot {
            player,
            players: Vec::new(),
            grid: cells,
            bounds,
            width: grid.width(),
            height: grid.height(),
            tick,
            is_forced,
        }
    }

    fn started(grid: &Grid, position: Coord) -> Predictor {
        let mut predictor = Predictor::new(PredictorConfig::default());
        predictor.receive(Packet::Connected { client_id: 1 });
        let player = Player::new(1, position, Direction::East);
        predictor.receive(Packet::Start(snapshot_for(grid, player, 10, true)));
        predictor
    }

    #[test]
    fn test_start_adopts_server_state() {
        let grid = Grid::new(12, 12, true);
        let predictor = started(&grid, Coord::new(3, 3));

        assert_eq!(predictor.client_id(), Some(1));
        assert_eq!(predictor.tick(), 10);
        assert!(predictor.is_alive());
        assert_eq!(predictor.player().unwrap().position, Coord::new(3, 3));
    }

    #[test]
    fn test_moves_without_sending_when_direction_is_unchanged() {
        let grid = Grid::new(12, 12, true);
        let mut predictor = started(&grid, Coord::new(3, 3));

        assert!(predictor.local_tick().is_empty());
        assert!(predictor.local_tick().is_empty());

        let player = predictor.player().unwrap();
        assert_eq!(player.position, Coord::new(5, 3));
        assert_eq!(player.segments.len(), INITIAL_SEGMENTS);
        assert_eq!(player.segments[0], Coord::new(4, 3));
        assert_eq!(predictor.tick(), 12);
    }

    #[test]
    fn test_direction_change_is_reported() {
        let grid = Grid::new(12, 12, true);
        let mut predictor = started(&grid, Coord::new(3, 3));
        predictor.local_tick();

        assert!(predictor.queue_direction(Direction::West));
        assert!(predictor.queue_direction(Direction::South));
        assert!(!predictor.queue_direction(Direction::North));

        // West would reverse into the neck, so South is used.
        let packets = predictor.local_tick();
        match &packets[..] {
            [Packet::Direct {
                tick,
                position,
                segments,
                direction,
            }] => {
                assert_eq!(*tick, 12);
                assert_eq!(*position, Coord::new(4, 4));
                assert_eq!(segments[0], Coord::new(4, 3));
                assert_eq!(*direction, Direction::South.as_u8());
            }
            other => panic!("Expected a single direct packet, got {:?}", other),
        }
    }

    #[test]
    fn test_predicted_collision_waits_for_server() {
        let grid = Grid::new(6, 6, true);
        let mut predictor = started(&grid, Coord::new(4, 2));

        predictor.local_tick();
        assert_eq!(predictor.player().unwrap().position, Coord::new(4, 2));
        assert!(predictor.is_awaiting_server());

        // Even a close, unforced update is taken as truth now.
        let mut server = Player::new(1, Coord::new(3, 3), Direction::South);
        server.segments = vec![Coord::new(3, 2); INITIAL_SEGMENTS];
        predictor.receive(Packet::Update(snapshot_for(&grid, server, 11, false)));
        predictor.local_tick();

        assert!(!predictor.is_awaiting_server());
        assert_eq!(predictor.player().unwrap().position, Coord::new(3, 4));
    }

    #[test]
    fn test_close_updates_keep_local_prediction() {
        let grid = Grid::new(12, 12, true);
        let mut predictor = started(&grid, Coord::new(3, 3));
        predictor.local_tick();

        let server_player = Player::new(1, Coord::new(3, 3), Direction::East);
        let mut update = snapshot_for(&grid, server_player, 11, false);
        update.players = vec![Player::new(2, Coord::new(8, 8), Direction::West)];
        predictor.receive(Packet::Update(update));
        predictor.local_tick();

        assert_eq!(predictor.player().unwrap().position, Coord::new(5, 3));
        assert_eq!(predictor.others().len(), 1);
        assert_eq!(predictor.tick(), 12);
    }

    #[test]
    fn test_distant_or_forced_updates_override_prediction() {
        let grid = Grid::new(12, 12, true);

        let mut predictor = started(&grid, Coord::new(3, 3));
        let server_player = Player::new(1, Coord::new(7, 7), Direction::North);
        predictor.receive(Packet::Update(snapshot_for(&grid, server_player, 20, false)));
        predictor.local_tick();
        assert_eq!(predictor.player().unwrap().position, Coord::new(7, 6));
        assert_eq!(predictor.tick(), 21);

        let mut predictor = started(&grid, Coord::new(3, 3));
        let server_player = Player::new(1, Coord::new(7, 7), Direction::North);
        predictor.receive(Packet::Update(snapshot_for(&grid, server_player, 10, true)));
        predictor.local_tick();
        assert_eq!(predictor.player().unwrap().position, Coord::new(7, 6));
    }

    #[test]
    fn test_only_newest_snapshot_is_applied() {
        let grid = Grid::new(12, 12, true);
        let mut predictor = started(&grid, Coord::new(3, 3));

        let newest = Player::new(1, Coord::new(6, 6), Direction::South);
        let stale = Player::new(1, Coord::new(2, 8), Direction::North);
        let forced_at_same_tick = Player::new(1, Coord::new(8, 2), Direction::South);
        predictor.receive(Packet::Update(snapshot_for(&grid, newest.clone(), 30, false)));
        predictor.receive(Packet::Update(snapshot_for(&grid, stale, 15, true)));
        predictor.receive(Packet::Update(snapshot_for(&grid, newest, 30, false)));
        predictor.receive(Packet::Update(snapshot_for(&grid, forced_at_same_tick, 30, true)));
        predictor.local_tick();

        assert_eq!(predictor.player().unwrap().position, Coord::new(8, 3));
        assert_eq!(predictor.tick(), 31);
    }

    #[test]
    fn test_late_snapshot_does_not_rewind() {
        let grid = Grid::new(12, 12, true);
        let mut predictor = started(&grid, Coord::new(3, 3));

        let newer = Player::new(1, Coord::new(6, 6), Direction::South);
        predictor.receive(Packet::Update(snapshot_for(&grid, newer, 30, true)));
        predictor.local_tick();
        assert_eq!(predictor.player().unwrap().position, Coord::new(6, 7));
        assert_eq!(predictor.tick(), 31);

        // Delayed datagram from before the snapshot already applied.
        let older = Player::new(1, Coord::new(2, 8), Direction::North);
        predictor.receive(Packet::Update(snapshot_for(&grid, older.clone(), 20, false)));
        predictor.local_tick();
        assert_eq!(predictor.player().unwrap().position, Coord::new(6, 8));
        assert_eq!(predictor.tick(), 32);

        // Forcedness does not make an old tick current again.
        predictor.receive(Packet::Update(snapshot_for(&grid, older, 25, true)));
        predictor.local_tick();
        assert_eq!(predictor.player().unwrap().position, Coord::new(6, 9));
        assert_eq!(predictor.tick(), 33);
    }

    #[test]
    fn test_forced_snapshot_replaces_update_of_same_tick() {
        let grid = Grid::new(12, 12, true);
        let mut predictor = started(&grid, Coord::new(3, 3));

        let server = Player::new(1, Coord::new(3, 3), Direction::East);
        predictor.receive(Packet::Update(snapshot_for(&grid, server, 11, false)));
        predictor.local_tick();
        predictor.local_tick();
        assert_eq!(predictor.player().unwrap().position, Coord::new(5, 3));

        let corrected = Player::new(1, Coord::new(8, 8), Direction::West);
        predictor.receive(Packet::Update(snapshot_for(&grid, corrected, 11, true)));
        predictor.local_tick();
        assert_eq!(predictor.player().unwrap().position, Coord::new(7, 8));
        assert_eq!(predictor.tick(), 12);
    }

    #[test]
    fn test_moving_onto_food_requests_eat() {
        let mut grid = Grid::new(12, 12, true);
        grid.set_value(4, 3, Cell::Food).unwrap();
        let mut predictor = started(&grid, Coord::new(3, 3));

        let packets = predictor.local_tick();
        assert!(matches!(packets[..], [Packet::Eat { x: 4, y: 3 }]));
        assert_eq!(predictor.player().unwrap().score(), INITIAL_SEGMENTS + 1);

        predictor.queue_direction(Direction::North);
        let packets = predictor.local_tick();
        assert!(matches!(packets[..], [Packet::Direct { .. }]));
        assert_eq!(predictor.player().unwrap().score(), INITIAL_SEGMENTS + 1);
    }

    #[test]
    fn test_ate_grows_immediately() {
        let grid = Grid::new(12, 12, true);
        let mut predictor = started(&grid, Coord::new(3, 3));

        let mut server = Player::new(1, Coord::new(3, 3), Direction::East);
        server.segments.push(Coord::new(3, 3));
        predictor.receive(Packet::Ate(snapshot_for(&grid, server, 10, true)));
        assert_eq!(predictor.player().unwrap().score(), INITIAL_SEGMENTS + 1);

        predictor.local_tick();
        assert_eq!(predictor.player().unwrap().score(), INITIAL_SEGMENTS + 1);
    }

    #[test]
    fn test_other_snakes_block_prediction() {
        let grid = Grid::new(12, 12, true);
        let mut predictor = Predictor::new(PredictorConfig::default());
        let mut start = snapshot_for(&grid, Player::new(1, Coord::new(3, 3), Direction::East), 0, true);
        start.players = vec![Player::new(2, Coord::new(4, 3), Direction::North)];
        predictor.receive(Packet::Start(start));

        predictor.local_tick();
        assert_eq!(predictor.player().unwrap().position, Coord::new(3, 3));
        assert!(predictor.is_awaiting_server());
    }

    #[test]
    fn test_prediction_stops_at_world_edge() {
        let grid = Grid::new(6, 6, false);
        let mut predictor = started(&grid, Coord::new(5, 2));

        predictor.local_tick();
        assert_eq!(predictor.player().unwrap().position, Coord::new(5, 2));
        assert!(!predictor.is_awaiting_server());
    }

    #[test]
    fn test_die_stops_prediction() {
        let grid = Grid::new(12, 12, true);
        let mut predictor = started(&grid, Coord::new(3, 3));
        predictor.queue_direction(Direction::South);

        predictor.receive(Packet::Die { score: 3 });
        assert!(!predictor.is_alive());
        assert_eq!(predictor.final_score(), Some(3));
        assert!(predictor.resume_state().is_none());

        assert!(predictor.local_tick().is_empty());
        assert_eq!(predictor.player().unwrap().position, Coord::new(3, 3));
    }
}
