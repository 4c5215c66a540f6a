use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("grid must be at least 3x3, got {width}x{height}")]
    GridTooSmall { width: usize, height: usize },
    #[error("view window must be at least 1x1")]
    EmptyWindow,
    #[error("tick rate must be positive")]
    ZeroTickRate,
}

/// Numeric configuration of one shard.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ShardConfig {
    pub width: usize,
    pub height: usize,
    pub screen_width: usize,
    pub screen_height: usize,
    pub screen_buffer: usize,
    pub food_limit: usize,
    /// Ticks per second.
    pub tick_rate: u32,
    /// Tolerance, in ticks and in cells, for client-claimed state.
    pub leniency: u32,
    /// Consecutive rejected moves tolerated before death.
    pub grace: u32,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            screen_width: 32,
            screen_height: 24,
            screen_buffer: 2,
            food_limit: 16,
            tick_rate: 8,
            leniency: 2,
            grace: 1,
        }
    }
}

impl ShardConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width < 3 || self.height < 3 {
            return Err(ConfigError::GridTooSmall {
                width: self.width,
                height: self.height,
            });
        }
        if self.screen_width == 0 || self.screen_height == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        if self.tick_rate == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        Ok(())
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn leniency_squared(&self) -> i64 {
        let leniency = self.leniency as i64;
        leniency * leniency
    }
}
