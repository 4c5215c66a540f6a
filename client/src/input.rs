//! Client input: a bounded queue of requested turns and a random-walk bot
//! that fills it.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use snake_shared::{is_reversal, Coord, Direction};
use std::collections::VecDeque;

/// Pending direction changes, oldest first.
///
/// Holds at most `capacity` entries so a burst of key presses cannot queue up
/// turns that would play out long after the player pressed them.
#[derive(Debug, Clone)]
pub struct DirectionQueue {
    pending: VecDeque<Direction>,
    capacity: usize,
}

impl DirectionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Queues a direction. Returns false, dropping it, when the queue is full.
    pub fn push(&mut self, direction: Direction) -> bool {
        if self.pending.len() >= self.capacity {
            return false;
        }
        self.pending.push_back(direction);
        true
    }

    /// Pops queued directions until one would not reverse the snake into its
    /// own neck. Reversals are discarded on the way.
    pub fn next_valid(&mut self, position: Coord, segments: &[Coord]) -> Option<Direction> {
        while let Some(direction) = self.pending.pop_front() {
            if !is_reversal(position, direction, segments) {
                return Some(direction);
            }
        }
        None
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Headless driver that turns at random.
pub struct RandomBot {
    rng: StdRng,
    turn_chance: f64,
}

impl RandomBot {
    pub fn new(turn_chance: f64) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            turn_chance: turn_chance.clamp(0.0, 1.0),
        }
    }

    pub fn with_seed(turn_chance: f64, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            turn_chance: turn_chance.clamp(0.0, 1.0),
        }
    }

    /// Picks a perpendicular turn now and then, or nothing.
    pub fn choose(&mut self, current: Direction) -> Option<Direction> {
        if !self.rng.gen_bool(self.turn_chance) {
            return None;
        }

        let turns: Vec<Direction> = Direction::ALL
            .iter()
            .copied()
            .filter(|direction| *direction != current && *direction != current.opposite())
            .collect();
        turns.choose(&mut self.rng).copied()
    }
}
