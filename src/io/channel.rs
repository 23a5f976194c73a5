//! In-process topic backed by a bounded channel.
//!
//! The sink half is cheaply cloneable so several workers can publish to the
//! same topic; the source half is a push subscription that a display client can
//! block on.

use super::{Envelope, Polled, Sink, Source, TransportError};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel};
use std::time::Duration;

/// Create a topic holding at most `capacity` undelivered messages.
pub fn channel_topic(capacity: usize) -> (ChannelSink, ChannelSource) {
    let (tx, rx) = sync_channel(capacity.max(1));
    (ChannelSink { tx }, ChannelSource { rx })
}

#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: SyncSender<Envelope>,
}

impl Sink for ChannelSink {
    /// Blocks while the topic is full.
    fn publish(&mut self, message: &Envelope) -> Result<(), TransportError> {
        self.tx
            .send(message.clone())
            .map_err(|_| TransportError::Disconnected("subscriber dropped".into()))
    }
}

#[derive(Debug)]
pub struct ChannelSource {
    rx: Receiver<Envelope>,
}

impl ChannelSource {
    /// Everything currently queued, without blocking.
    pub fn drain(&self) -> Vec<Envelope> {
        self.rx.try_iter().collect()
    }
}

impl Source for ChannelSource {
    fn poll(&mut self, timeout: Duration) -> Result<Polled, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Ok(Polled::Message(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(Polled::Idle),
            Err(RecvTimeoutError::Disconnected) => Ok(Polled::Closed),
        }
    }
}

impl Iterator for ChannelSource {
    type Item = Envelope;

    /// Blocks until the next message; ends once every sink is dropped.
    fn next(&mut self) -> Option<Envelope> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_in_order_then_closes() {
        let (mut sink, mut source) = channel_topic(4);
        sink.publish(&Envelope::new("A1", b"1".to_vec())).unwrap();
        sink.publish(&Envelope::new("A1", b"2".to_vec())).unwrap();
        drop(sink);
        let got: Vec<_> = source.by_ref().map(|e| e.payload).collect();
        assert_eq!(got, vec![b"1".to_vec(), b"2".to_vec()]);
        assert_eq!(source.poll(Duration::from_millis(1)).unwrap(), Polled::Closed);
    }

    #[test]
    fn idle_when_nothing_arrives() {
        let (_sink, mut source) = channel_topic(1);
        assert_eq!(source.poll(Duration::from_millis(1)).unwrap(), Polled::Idle);
    }

    #[test]
    fn publish_fails_once_subscriber_is_gone() {
        let (mut sink, source) = channel_topic(1);
        drop(source);
        let err = sink.publish(&Envelope::new("A1", Vec::new())).unwrap_err();
        assert!(matches!(err, TransportError::Disconnected(_)));
    }
}
