//! Transport abstraction.
//!
//! The processor consumes keyed messages from a [`Source`] and publishes keyed
//! messages to a [`Sink`]. Ordering per key, offsets and delivery guarantees
//! belong to the transport; the core only relies on at-least-once, per-key
//! ordered delivery.
//!
//! Two transports ship with the crate:
//! - [`channel`] - in-process bounded channels, also the push subscription used by
//!   display clients embedded in the same process
//! - [`jsonl`] - a directory of newline-delimited JSON topic files

pub mod channel;
pub mod jsonl;

use crate::window::TimestampMs;
use std::time::Duration;
use thiserror::Error;

/// One keyed message on a topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub key: Option<String>,
    pub payload: Vec<u8>,
    /// Broker-assigned timestamp, when the transport provides one.
    pub timestamp_ms: Option<TimestampMs>,
}

impl Envelope {
    pub fn new(key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: Some(key.into()),
            payload: payload.into(),
            timestamp_ms: None,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp_ms: TimestampMs) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// Worth retrying as-is (broker busy, timeout).
    #[error("transient transport failure: {0}")]
    Transient(String),
    /// The connection is gone; reconnect before retrying.
    #[error("transport disconnected: {0}")]
    Disconnected(String),
    /// Retrying cannot help (message rejected, topic missing).
    #[error("permanent transport failure: {0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

/// Outcome of a single [`Source::poll`].
#[derive(Debug, PartialEq, Eq)]
pub enum Polled {
    Message(Envelope),
    /// Nothing arrived within the timeout.
    Idle,
    /// The topic has ended and will not produce more messages.
    Closed,
}

pub trait Source: Send {
    /// Wait up to `timeout` for the next message.
    fn poll(&mut self, timeout: Duration) -> Result<Polled, TransportError>;

    /// Re-establish the connection, resuming from the transport's own position.
    fn reconnect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub trait Sink: Send {
    fn publish(&mut self, message: &Envelope) -> Result<(), TransportError>;

    /// Push out anything buffered.
    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
