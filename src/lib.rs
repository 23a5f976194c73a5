//! # Parkflow
//!
//! A **stateful windowed stream processor** that turns vehicle-movement events
//! from parking-slot cameras into a continuously updated occupancy record per
//! slot: current status, elapsed parked time and billable fee.
//!
//! ## Key Features
//!
//! - **Latest-event-wins deduplication** - overlapping processing-time windows
//!   keep one authoritative event per slot
//! - **Out-of-order safety** - a per-slot logical clock rejects stale events
//! - **Watermarks** - bounded staleness with a lateness tolerance, advanced from
//!   the clock while a partition is idle
//! - **Block billing** - any started block is billed in full
//! - **Partitioned workers** - one OS thread per partition, no global barrier
//! - **Pluggable transport** - [`io::Source`]/[`io::Sink`] traits with in-memory
//!   and JSON Lines implementations
//! - **Checkpointing** - optional slot-state snapshots (feature `checkpointing`)
//!
//! ## Quick Start
//!
//! ```
//! use parkflow::clock::ManualClock;
//! use parkflow::event::StatusCode;
//! use parkflow::testing::{RecordingSink, VecSource, event, test_pipeline_config};
//! use parkflow::Runner;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let clock = ManualClock::at_secs(1_650);
//! let runner = Runner::new(test_pipeline_config(2))?.with_clock(clock);
//!
//! let source = VecSource::from_events(&[event("A1", "29A-12345", StatusCode::Entering, 1_000)]);
//! let sink = RecordingSink::new();
//! runner.run(source, sink.clone())?;
//!
//! let latest = sink.records_for("A1").pop().unwrap();
//! assert_eq!(latest.parked_blocks, Some(2));
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`event`] / [`validation`] - ingress model and payload validation
//! - [`watermark`], [`window`], [`aggregator`] - windowing and deduplication
//! - [`state`] - per-slot state store and the occupancy transition
//! - [`fee`] - block-based fee calculation
//! - [`emitter`] - output records and retried publication
//! - [`worker`], [`runner`] - partition workers and their orchestration
//! - [`config`], [`observability`], [`metrics`], [`checkpoint`] - runtime surface
//! - [`registry`], [`testing`] - traffic generation and test helpers

pub mod aggregator;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod emitter;
pub mod event;
pub mod fee;
pub mod io;
pub mod metrics;
pub mod observability;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod state;
pub mod testing;
pub mod validation;
pub mod watermark;
pub mod window;
pub mod worker;

// Re-exports for convenience
pub use config::{Config, PipelineConfig};
pub use emitter::{DeliveryError, OutputRecord};
pub use event::{Event, StatusCode};
pub use fee::{Fee, FeePolicy};
pub use runner::{RunReport, Runner, ShutdownHandle};
pub use state::{SlotState, SlotStatus, StateStore, Transition};
pub use window::{TimestampMs, Window};
