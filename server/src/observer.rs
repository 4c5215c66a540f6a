//! Optional sink for shard statistics and notable events.

use crate::connection::ConnectionId;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub tick: u64,
    pub players: usize,
    pub alive: usize,
    pub food: usize,
}

/// Hooks called by the shard. Every method defaults to a no-op.
pub trait ShardObserver: Send {
    fn on_tick(&mut self, _stats: &TickStats) {}
    fn on_death(&mut self, _id: ConnectionId, _score: usize) {}
    fn on_resync(&mut self, _id: ConnectionId) {}
    fn on_eject(&mut self, _id: ConnectionId) {}
}

/// Logs a summary line every `interval` ticks.
pub struct LogObserver {
    interval: u64,
    resyncs: u64,
}

impl LogObserver {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            resyncs: 0,
        }
    }
}

impl ShardObserver for LogObserver {
    fn on_tick(&mut self, stats: &TickStats) {
        if stats.tick % self.interval == 0 && stats.players > 0 {
            debug!(
                "Tick {}: {} players ({} alive), {} food, {} resyncs",
                stats.tick, stats.players, stats.alive, stats.food, self.resyncs
            );
            self.resyncs = 0;
        }
    }

    fn on_resync(&mut self, _id: ConnectionId) {
        self.resyncs += 1;
    }
}
