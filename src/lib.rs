//! mintwatch - launchpad log watcher with a unitary dry-run entry
//! decision pipeline.
//!
//! The watcher subscribes to launchpad program logs over websockets,
//! reconstructs per-token microstructure during the first minutes of a
//! token's life, and runs every mint through an observation gate, a safety
//! gate, a conviction scorer and heat-adjusted thresholds to produce at
//! most one accept decision per token.

pub mod alerts;
pub mod config;
pub mod pipeline;
pub mod quotes;
pub mod status;
pub mod storage;
pub mod types;
pub mod watcher;

pub use config::Config;
pub use types::{Decision, HeatBand, LogBatch, Origin, Snapshot, Tier};
