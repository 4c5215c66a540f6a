//! # Snake Client Library
//!
//! This library provides a headless client for the snake shard. It moves its
//! own snake locally without waiting for the server and folds the server's
//! snapshots back in as they arrive.
//!
//! ## Architecture Overview
//!
//! ### Client-Side Prediction
//! The client runs the shared movement rule on its own fixed tick against the
//! last grid window the server sent, so turns take effect immediately.
//!
//! ### Server Reconciliation
//! Snapshots are buffered and only the newest is applied. A forced snapshot,
//! a large tick gap, or a collision the client declined to predict makes the
//! server state win outright. Otherwise the client keeps its own snake and
//! takes everything else from the server.
//!
//! ## Module Organization
//!
//! ### Predictor Module (`predictor`)
//! Local snake state, the snapshot inbox and the per-tick prediction step.
//!
//! ### Input Module (`input`)
//! The bounded direction queue and a random-walk bot that feeds it.
//!
//! ### Network Module (`network`)
//! UDP socket handling, the session loop and simulated latency.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use snake_client::network::{Client, ClientSettings};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new("127.0.0.1:8080", ClientSettings::default()).await?;
//!     client.run(Some(Duration::from_secs(30))).await?;
//!     Ok(())
//! }
//! ```

pub mod input;
pub mod network;
pub mod predictor;
