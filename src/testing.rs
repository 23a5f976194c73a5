//! Testing utilities for parkflow pipelines.
//!
//! This module provides in-memory transports, sample events and a traffic
//! generator so that applications embedding the processor can test their
//! wiring without a broker:
//!
//! - **Mock I/O**: [`RecordingSink`], [`FlakySink`] and [`VecSource`]
//! - **Fixtures**: [`event`], [`payload`] and the scripted lot scenarios
//! - **Simulator**: [`Simulator`], a vehicle lifecycle generator backed by a
//!   [`SlotRegistry`](crate::registry::SlotRegistry)
//!
//! # Quick Start
//!
//! ```
//! use parkflow::testing::*;
//! use parkflow::event::StatusCode;
//!
//! let e = event("A1", "29A-12345", StatusCode::Entering, 1_000);
//! let source = VecSource::from_events(&[e]);
//! assert_eq!(source.remaining(), 1);
//! ```

pub mod fixtures;
pub mod mock_io;
pub mod simulator;

pub use fixtures::*;
pub use mock_io::*;
pub use simulator::*;
