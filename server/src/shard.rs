//! Authoritative simulation of one world.
//!
//! A [`Shard`] owns the grid and every seated player. All state changes go
//! through its methods: the fixed-rate [`Shard::tick`], and the handlers that
//! [`Shard::dispatch`] routes inbound packets to. [`Shard::run`] serialises
//! both on a single task, so a handler never observes a half-finished tick.
//!
//! Snake bodies are stamped into the grid as [`Cell::Snake`], which lets the
//! shared movement rule see walls, food and bodies through one lookup.

use crate::connection::{Connection, ConnectionId, ShardEvent};
use crate::observer::{ShardObserver, TickStats};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use snake_shared::{
    is_reversal, step, Cell, Coord, Direction, Grid, GridError, Packet, Player, ShardConfig,
    Snapshot, Step,
};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Error)]
pub enum ShardError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("shard task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A connection together with the player it controls.
struct Seat {
    player: Player,
    connection: Box<dyn Connection>,
    /// Set while the seat waits for a free cell to spawn on.
    awaiting_spawn: bool,
}

pub struct Shard {
    config: ShardConfig,
    grid: Grid,
    seats: BTreeMap<ConnectionId, Seat>,
    tick: u64,
    food_count: usize,
    rng: StdRng,
    observer: Option<Box<dyn ShardObserver>>,
}

impl Shard {
    pub fn new(config: ShardConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic shard, for tests and replays.
    pub fn with_seed(config: ShardConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: ShardConfig, rng: StdRng) -> Self {
        let grid = Grid::new(config.width, config.height, true);
        Self {
            config,
            grid,
            seats: BTreeMap::new(),
            tick: 0,
            food_count: 0,
            rng,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn ShardObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Resets the terrain and seeds the initial food.
    pub fn setup(&mut self) -> Result<(), GridError> {
        self.grid = Grid::new(self.config.width, self.config.height, true);
        self.food_count = 0;

        let living: Vec<ConnectionId> = self.living_ids();
        for id in living {
            self.stamp(id)?;
        }

        self.replenish_food()?;
        info!(
            "Shard ready: {}x{} grid, {} food",
            self.config.width, self.config.height, self.food_count
        );
        Ok(())
    }

    pub fn config(&self) -> &ShardConfig {
        &self.config
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn food_count(&self) -> usize {
        self.food_count
    }

    pub fn player_count(&self) -> usize {
        self.seats.len()
    }

    pub fn alive_count(&self) -> usize {
        self.seats.values().filter(|seat| seat.player.is_alive).count()
    }

    pub fn player(&self, id: ConnectionId) -> Option<&Player> {
        self.seats.get(&id).map(|seat| &seat.player)
    }

    fn living_ids(&self) -> Vec<ConnectionId> {
        self.seats
            .iter()
            .filter(|(_, seat)| seat.player.is_alive)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Seats a new connection, resuming its prior state when that state is
    /// still plausible and otherwise placing it fresh.
    pub fn add_connection(
        &mut self,
        connection: Box<dyn Connection>,
        resume: Option<Player>,
    ) -> Result<ConnectionId, GridError> {
        let id = connection.id();
        if self.seats.contains_key(&id) {
            warn!("Connection {} joined twice, replacing its player", id);
            self.disconnect(id)?;
        }

        let mut placeholder = Player::new(id, Coord::new(0, 0), Direction::East);
        placeholder.is_alive = false;
        self.seats.insert(
            id,
            Seat {
                player: placeholder,
                connection,
                awaiting_spawn: true,
            },
        );

        match resume.and_then(|prior| self.validate_resume(id, prior)) {
            Some(player) => {
                info!("Player {} resumed at ({}, {})", id, player.position.x, player.position.y);
                if let Some(seat) = self.seats.get_mut(&id) {
                    seat.player = player;
                    seat.awaiting_spawn = false;
                }
                self.stamp(id)?;
                self.send_snapshot(id, Packet::Start, true);
            }
            None => {
                self.spawn(id)?;
            }
        }

        Ok(id)
    }

    fn validate_resume(&self, id: ConnectionId, mut prior: Player) -> Option<Player> {
        if !prior.is_alive || !self.claim_fits(id, prior.position, &prior.segments) {
            debug!("Rejected resume state for player {}", id);
            return None;
        }
        prior.id = id;
        prior.grace_counter = 0;
        prior.last_update_tick = self.tick;
        Some(prior)
    }

    /// Removes a seat, clearing its snake from the grid.
    pub fn remove_player(&mut self, id: ConnectionId) -> Result<Option<Player>, GridError> {
        let Some(seat) = self.seats.remove(&id) else {
            return Ok(None);
        };

        if seat.player.is_alive {
            let cells: Vec<Coord> = seat.player.footprint().collect();
            self.clear_uncovered(&cells)?;
        }

        info!("Removed player {}", id);
        Ok(Some(seat.player))
    }

    /// Connection closed or failed: report the score, then drop the seat.
    pub fn disconnect(&mut self, id: ConnectionId) -> Result<(), GridError> {
        if let Some(seat) = self.seats.get(&id) {
            seat.connection.send(Packet::Die {
                score: seat.player.score(),
            });
        }
        self.remove_player(id)?;
        Ok(())
    }

    /// Protocol violation: report the score and drop the seat for good.
    pub fn eject(&mut self, id: ConnectionId) -> Result<(), GridError> {
        warn!("Ejecting player {}", id);
        if let Some(observer) = self.observer.as_mut() {
            observer.on_eject(id);
        }
        self.disconnect(id)
    }

    /// Brings a dead player back with a fresh placement.
    pub fn restart(&mut self, id: ConnectionId) -> Result<(), GridError> {
        match self.seats.get_mut(&id) {
            Some(seat) if !seat.player.is_alive => {
                seat.awaiting_spawn = true;
            }
            Some(_) => {
                debug!("Ignoring restart from living player {}", id);
                return Ok(());
            }
            None => return Ok(()),
        }
        self.spawn(id)?;
        Ok(())
    }

    /// Places an awaiting seat on a random free cell. Returns false when the
    /// grid has no room; the seat is retried on the next tick.
    fn spawn(&mut self, id: ConnectionId) -> Result<bool, GridError> {
        let Some(position) = self.free_cell()? else {
            debug!("No free cell to spawn player {}, retrying next tick", id);
            return Ok(false);
        };

        let tick = self.tick;
        if let Some(seat) = self.seats.get_mut(&id) {
            let mut player = Player::new(id, position, Direction::East);
            player.last_update_tick = tick;
            seat.player = player;
            seat.awaiting_spawn = false;
        }

        self.stamp(id)?;
        info!("Player {} spawned at ({}, {})", id, position.x, position.y);
        self.send_snapshot(id, Packet::Start, true);
        Ok(true)
    }

    /// Routes one inbound packet to its handler.
    pub fn dispatch(&mut self, id: ConnectionId, packet: Packet) -> Result<(), GridError> {
        match packet {
            Packet::Direct {
                tick,
                position,
                segments,
                direction,
            } => self.handle_direct(id, tick, position, segments, direction),
            Packet::Eat { x, y } => self.handle_eat(id, x, y),
            Packet::Restart => self.restart(id),
            Packet::Disconnect => self.disconnect(id),
            other => {
                warn!("Unexpected packet from player {}: {:?}", id, other);
                Ok(())
            }
        }
    }

    pub fn handle_event(&mut self, event: ShardEvent) -> Result<(), GridError> {
        match event {
            ShardEvent::Joined { connection, resume } => {
                self.add_connection(connection, resume)?;
            }
            ShardEvent::Packet { id, packet } => self.dispatch(id, packet)?,
            ShardEvent::Error { id, reason } => {
                info!("Connection {} failed: {}", id, reason);
                self.disconnect(id)?;
            }
            ShardEvent::Disconnected { id } => {
                info!("Connection {} disconnected", id);
                self.disconnect(id)?;
            }
            ShardEvent::Shutdown => {}
        }
        Ok(())
    }

    /// Reconciles a client's direction change, and any movement it already
    /// predicted, against server truth.
    pub fn handle_direct(
        &mut self,
        id: ConnectionId,
        client_tick: u64,
        position: Coord,
        segments: Vec<Coord>,
        direction: u8,
    ) -> Result<(), GridError> {
        let direction = match Direction::try_from(direction) {
            Ok(direction) => direction,
            Err(e) => {
                warn!("Player {} sent {}", id, e);
                return self.eject(id);
            }
        };

        let Some(seat) = self.seats.get(&id) else {
            return Ok(());
        };
        if !seat.player.is_alive {
            debug!("Ignoring direction from dead player {}", id);
            return Ok(());
        }

        if seat.player.is_same_position(&position) {
            self.turn(id, direction);
            return Ok(());
        }

        if self.claim_is_lenient(id, client_tick, position, &segments) {
            self.adopt(id, position, segments, direction)?;
        } else {
            debug!(
                "Player {} claim at ({}, {}) for tick {} rejected at tick {}",
                id, position.x, position.y, client_tick, self.tick
            );
            self.turn(id, direction);
            self.send_snapshot(id, Packet::Update, true);
            if let Some(observer) = self.observer.as_mut() {
                observer.on_resync(id);
            }
        }
        Ok(())
    }

    fn turn(&mut self, id: ConnectionId, direction: Direction) {
        if let Some(seat) = self.seats.get_mut(&id) {
            let player = &mut seat.player;
            if !is_reversal(player.position, direction, &player.segments) {
                player.direction = direction;
            }
        }
    }

    fn claim_is_lenient(
        &self,
        id: ConnectionId,
        client_tick: u64,
        position: Coord,
        segments: &[Coord],
    ) -> bool {
        let Some(seat) = self.seats.get(&id) else {
            return false;
        };
        let leniency = self.config.leniency as u64;

        self.tick.abs_diff(client_tick) <= leniency
            && seat.player.position.distance_squared(position) <= self.config.leniency_squared()
            && (segments.len().abs_diff(seat.player.segments.len()) as u64) <= leniency
            && self.claim_fits(id, position, segments)
    }

    /// Every claimed cell is on the grid, off blocked terrain, and not part of
    /// another living snake.
    fn claim_fits(&self, id: ConnectionId, position: Coord, segments: &[Coord]) -> bool {
        std::iter::once(&position).chain(segments).all(|cell| {
            matches!(
                self.grid.get_value(cell.x, cell.y),
                Ok(Cell::Empty) | Ok(Cell::Food) | Ok(Cell::Snake)
            ) && !self.is_covered(*cell, Some(id))
        })
    }

    fn adopt(
        &mut self,
        id: ConnectionId,
        position: Coord,
        segments: Vec<Coord>,
        direction: Direction,
    ) -> Result<(), GridError> {
        let ate = self.grid.get_value(position.x, position.y)? == Cell::Food;
        let tick = self.tick;
        let previous = match self.seats.get_mut(&id) {
            Some(seat) => {
                let player = &mut seat.player;
                let previous: Vec<Coord> = player.footprint().collect();
                let grown = player.segments.len() + 1;
                player.position = position;
                player.segments = segments;
                if ate {
                    // Food under the claimed head counts as eaten now.
                    while player.segments.len() < grown {
                        let tail = player.segments.last().copied().unwrap_or(position);
                        player.segments.push(tail);
                    }
                }
                if !is_reversal(position, direction, &player.segments) {
                    player.direction = direction;
                }
                player.grace_counter = 0;
                player.last_update_tick = tick;
                previous
            }
            None => return Ok(()),
        };

        self.stamp(id)?;
        self.clear_uncovered(&previous)?;

        if ate {
            debug!("Player {} claimed food at ({}, {})", id, position.x, position.y);
            self.send_snapshot(id, Packet::Ate, true);
        }
        Ok(())
    }

    /// Lets a client eat food it reached before the server did.
    pub fn handle_eat(&mut self, id: ConnectionId, x: i32, y: i32) -> Result<(), GridError> {
        let Some(seat) = self.seats.get(&id) else {
            return Ok(());
        };
        if !seat.player.is_alive || self.grid.is_out_of_bounds(x, y) {
            return Ok(());
        }

        let target = Coord::new(x, y);
        let in_reach =
            seat.player.position.distance_squared(target) <= self.config.leniency_squared();
        if self.grid.get_value(x, y)? != Cell::Food || !in_reach {
            debug!("Ignoring eat at ({}, {}) from player {}", x, y, id);
            return Ok(());
        }

        self.grid.set_value(x, y, Cell::Empty)?;
        self.food_count = self.food_count.saturating_sub(1);
        if let Some(seat) = self.seats.get_mut(&id) {
            let player = &mut seat.player;
            let tail = player.segments.last().copied().unwrap_or(player.position);
            player.segments.push(tail);
        }

        self.send_snapshot(id, Packet::Ate, true);
        Ok(())
    }

    /// Advances the world by one step.
    pub fn tick(&mut self) -> Result<(), GridError> {
        self.tick += 1;

        let waiting: Vec<ConnectionId> = self
            .seats
            .iter()
            .filter(|(_, seat)| seat.awaiting_spawn)
            .map(|(id, _)| *id)
            .collect();
        for id in waiting {
            self.spawn(id)?;
        }

        for id in self.living_ids() {
            self.advance(id)?;
        }

        self.replenish_food()?;
        self.broadcast();

        if self.observer.is_some() {
            let stats = TickStats {
                tick: self.tick,
                players: self.seats.len(),
                alive: self.alive_count(),
                food: self.food_count,
            };
            if let Some(observer) = self.observer.as_mut() {
                observer.on_tick(&stats);
            }
        }
        Ok(())
    }

    fn advance(&mut self, id: ConnectionId) -> Result<(), GridError> {
        let Some(seat) = self.seats.get(&id) else {
            return Ok(());
        };
        if !seat.player.is_alive {
            return Ok(());
        }

        match step(&self.grid, seat.player.position, seat.player.direction) {
            Step::Open { to, food } => self.move_player(id, to, food),
            Step::Blocked { .. } | Step::Outside => {
                let grace = self.config.grace;
                let exhausted = match self.seats.get_mut(&id) {
                    Some(seat) => {
                        seat.player.grace_counter += 1;
                        seat.player.grace_counter > grace
                    }
                    None => false,
                };
                if exhausted {
                    self.kill(id)?;
                }
                Ok(())
            }
            Step::Occupied { .. } => self.kill(id),
        }
    }

    fn move_player(&mut self, id: ConnectionId, to: Coord, food: bool) -> Result<(), GridError> {
        let tick = self.tick;
        let vacated = match self.seats.get_mut(&id) {
            Some(seat) => {
                let player = &mut seat.player;
                player.segments.insert(0, player.position);
                player.position = to;
                player.grace_counter = 0;
                player.last_update_tick = tick;
                if food {
                    None
                } else {
                    player.segments.pop()
                }
            }
            None => return Ok(()),
        };

        self.grid.set_value(to.x, to.y, Cell::Snake)?;
        if let Some(tail) = vacated {
            self.clear_uncovered(&[tail])?;
        }

        if food {
            self.food_count = self.food_count.saturating_sub(1);
            self.send_snapshot(id, Packet::Ate, true);
        }
        Ok(())
    }

    fn kill(&mut self, id: ConnectionId) -> Result<(), GridError> {
        let (cells, score) = match self.seats.get_mut(&id) {
            Some(seat) => {
                seat.player.is_alive = false;
                (
                    seat.player.footprint().collect::<Vec<Coord>>(),
                    seat.player.score(),
                )
            }
            None => return Ok(()),
        };

        self.clear_uncovered(&cells)?;
        info!("Player {} died with score {}", id, score);

        if let Some(seat) = self.seats.get(&id) {
            seat.connection.send(Packet::Die { score });
        }
        if let Some(observer) = self.observer.as_mut() {
            observer.on_death(id, score);
        }
        Ok(())
    }

    /// True when a living snake other than `except` covers the cell.
    fn is_covered(&self, cell: Coord, except: Option<ConnectionId>) -> bool {
        self.seats
            .iter()
            .filter(|(id, seat)| seat.player.is_alive && Some(**id) != except)
            .any(|(_, seat)| seat.player.occupies(cell))
    }

    fn clear_uncovered(&mut self, cells: &[Coord]) -> Result<(), GridError> {
        for cell in cells {
            if !self.is_covered(*cell, None) && self.grid.get_value(cell.x, cell.y)? == Cell::Snake
            {
                self.grid.set_value(cell.x, cell.y, Cell::Empty)?;
            }
        }
        Ok(())
    }

    /// Writes a player's footprint into the grid, consuming any food under it.
    fn stamp(&mut self, id: ConnectionId) -> Result<(), GridError> {
        let cells: Vec<Coord> = match self.seats.get(&id) {
            Some(seat) => seat.player.footprint().collect(),
            None => return Ok(()),
        };

        for cell in cells {
            if self.grid.get_value(cell.x, cell.y)? == Cell::Food {
                self.food_count = self.food_count.saturating_sub(1);
            }
            self.grid.set_value(cell.x, cell.y, Cell::Snake)?;
        }
        Ok(())
    }

    /// Random empty cell that no living snake covers.
    fn free_cell(&mut self) -> Result<Option<Coord>, GridError> {
        let mut overlay = Grid::new(self.grid.width(), self.grid.height(), false);
        for seat in self.seats.values().filter(|seat| seat.player.is_alive) {
            for cell in seat.player.footprint() {
                overlay.set_value(cell.x, cell.y, Cell::Snake)?;
            }
        }

        let merged = self.grid.merge(&overlay)?;
        Ok(merged.random_empty_space(&mut self.rng))
    }

    fn replenish_food(&mut self) -> Result<(), GridError> {
        while self.food_count < self.config.food_limit {
            match self.free_cell()? {
                Some(cell) => {
                    self.grid.set_value(cell.x, cell.y, Cell::Food)?;
                    self.food_count += 1;
                }
                None => {
                    debug!("No room for food at tick {}", self.tick);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Player-centric view: own state, other living players, and the grid
    /// window around the head.
    pub fn snapshot(&self, id: ConnectionId, is_forced: bool) -> Option<Snapshot> {
        let seat = self.seats.get(&id)?;
        let player = &seat.player;
        let (bounds, grid) = self.grid.subgrid_array(
            player.position.x,
            player.position.y,
            self.config.screen_width,
            self.config.screen_height,
            self.config.screen_buffer,
        );

        let players = self
            .seats
            .iter()
            .filter(|(other, seat)| **other != id && seat.player.is_alive)
            .map(|(_, seat)| seat.player.clone())
            .collect();

        Some(Snapshot {
            player: player.clone(),
            players,
            grid,
            bounds,
            width: self.grid.width(),
            height: self.grid.height(),
            tick: self.tick,
            is_forced,
        })
    }

    fn send_snapshot(&self, id: ConnectionId, packet: fn(Snapshot) -> Packet, is_forced: bool) {
        if let (Some(seat), Some(snapshot)) = (self.seats.get(&id), self.snapshot(id, is_forced)) {
            seat.connection.send(packet(snapshot));
        }
    }

    fn broadcast(&self) {
        for id in self.living_ids() {
            self.send_snapshot(id, Packet::Update, false);
        }
    }

    /// Owns the shard until shutdown: ticks at the configured rate and applies
    /// inbound events in between.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<ShardEvent>,
    ) -> Result<Self, ShardError> {
        let mut tick_interval = interval(self.config.tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first tick since it fires immediately
        tick_interval.tick().await;

        info!("Shard running at {}Hz", self.config.tick_rate);

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(ShardEvent::Shutdown) | None => {
                            info!("Shard shutting down at tick {}", self.tick);
                            break;
                        }
                        Some(event) => self.handle_event(event)?,
                    }
                },

                _ = tick_interval.tick() => {
                    self.tick()?;
                },
            }
        }

        Ok(self)
    }
}

/// A shard running on its own task.
pub struct ShardHandle {
    events: mpsc::UnboundedSender<ShardEvent>,
    task: JoinHandle<Result<Shard, ShardError>>,
}

impl ShardHandle {
    pub fn spawn(shard: Shard) -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(shard.run(receiver));
        Self { events, task }
    }

    pub fn events(&self) -> mpsc::UnboundedSender<ShardEvent> {
        self.events.clone()
    }

    /// Stops the tick loop and hands the shard back.
    pub async fn stop(self) -> Result<Shard, ShardError> {
        // The loop may already have ended on its own.
        let _ = self.events.send(ShardEvent::Shutdown);
        self.task.await?
    }
}
