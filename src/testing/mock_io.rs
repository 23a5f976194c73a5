//! In-memory transports for tests.

use crate::emitter::OutputRecord;
use crate::event::Event;
use crate::io::{Envelope, Polled, Sink, Source, TransportError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A sink that keeps every published message. Clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    messages: Arc<Mutex<Vec<Envelope>>>,
    flushes: Arc<AtomicUsize>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in publish order.
    #[must_use]
    pub fn messages(&self) -> Vec<Envelope> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Published payloads decoded as output records; undecodable payloads are skipped.
    #[must_use]
    pub fn records(&self) -> Vec<OutputRecord> {
        self.messages()
            .iter()
            .filter_map(|m| OutputRecord::from_payload(&m.payload).ok())
            .collect()
    }

    /// Records published for one slot, in publish order.
    #[must_use]
    pub fn records_for(&self, slot_id: &str) -> Vec<OutputRecord> {
        self.records().into_iter().filter(|r| r.slot_id == slot_id).collect()
    }

    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl Sink for RecordingSink {
    fn publish(&mut self, message: &Envelope) -> Result<(), TransportError> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A sink that fails a fixed number of publishes before delivering.
///
/// Clones share the failure budget and the delivered buffer.
#[derive(Clone, Debug)]
pub struct FlakySink {
    remaining_failures: Arc<AtomicUsize>,
    permanent: bool,
    attempts: Arc<AtomicUsize>,
    inner: RecordingSink,
}

impl FlakySink {
    /// Fail the first `n` publishes with a transient error.
    #[must_use]
    pub fn failing_first(n: usize) -> Self {
        Self {
            remaining_failures: Arc::new(AtomicUsize::new(n)),
            permanent: false,
            attempts: Arc::new(AtomicUsize::new(0)),
            inner: RecordingSink::new(),
        }
    }

    /// Reject every publish with a permanent error.
    #[must_use]
    pub fn always_permanent() -> Self {
        Self {
            remaining_failures: Arc::new(AtomicUsize::new(usize::MAX)),
            permanent: true,
            attempts: Arc::new(AtomicUsize::new(0)),
            inner: RecordingSink::new(),
        }
    }

    #[must_use]
    pub fn delivered(&self) -> Vec<Envelope> {
        self.inner.messages()
    }

    /// Publish calls made, successful or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Sink for FlakySink {
    fn publish(&mut self, message: &Envelope) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(if self.permanent {
                TransportError::Permanent("message rejected".into())
            } else {
                TransportError::Transient("broker busy".into())
            });
        }
        self.inner.publish(message)
    }
}

/// A source that replays a fixed list of messages, then closes.
///
/// Disconnects can be scripted at given positions to exercise reconnection.
#[derive(Debug, Default)]
pub struct VecSource {
    queue: VecDeque<Envelope>,
    disconnect_at: Vec<usize>,
    delivered: usize,
    reconnects: usize,
    failed_reconnects: usize,
}

impl VecSource {
    #[must_use]
    pub fn new(messages: Vec<Envelope>) -> Self {
        Self {
            queue: messages.into(),
            ..Self::default()
        }
    }

    /// Wire-encode `events`, keyed by slot.
    #[must_use]
    pub fn from_events(events: &[Event]) -> Self {
        Self::new(
            events
                .iter()
                .map(|e| Envelope::new(e.slot_id.clone(), e.to_payload()))
                .collect(),
        )
    }

    /// Report a disconnect once, before delivering message number `position`.
    #[must_use]
    pub fn disconnect_before(mut self, position: usize) -> Self {
        self.disconnect_at.push(position);
        self
    }

    /// Make the next `n` reconnect attempts fail.
    #[must_use]
    pub fn failing_reconnects(mut self, n: usize) -> Self {
        self.failed_reconnects = n;
        self
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn reconnects(&self) -> usize {
        self.reconnects
    }
}

impl Source for VecSource {
    fn poll(&mut self, _timeout: Duration) -> Result<Polled, TransportError> {
        if let Some(i) = self.disconnect_at.iter().position(|p| *p == self.delivered) {
            self.disconnect_at.swap_remove(i);
            return Err(TransportError::Disconnected("connection reset".into()));
        }
        match self.queue.pop_front() {
            Some(msg) => {
                self.delivered += 1;
                Ok(Polled::Message(msg))
            }
            None => Ok(Polled::Closed),
        }
    }

    fn reconnect(&mut self) -> Result<(), TransportError> {
        if self.failed_reconnects > 0 {
            self.failed_reconnects -= 1;
            return Err(TransportError::Disconnected("broker unreachable".into()));
        }
        self.reconnects += 1;
        Ok(())
    }
}
