//! Directory-backed JSON Lines topics.
//!
//! A *bootstrap address* is a directory and each topic is the file
//! `<dir>/<topic>.jsonl`. Every line is one message:
//!
//! ```text
//! {"key":"A1","value":{...},"timestamp_ms":1700000000000}
//! ```
//!
//! # Notes
//! - A line that is not a valid record envelope is delivered whole as the payload
//!   with no key, so bare event objects can be fed in and garbage surfaces as a
//!   malformed event downstream instead of a transport error.
//! - Lines are read as raw bytes; invalid UTF-8 is passed on like any other
//!   malformed line.
//! - Empty/whitespace-only lines are skipped on read.
//! - The source tracks the byte offset of the last complete line it delivered;
//!   [`Source::reconnect`] reopens the file and resumes from there.

use super::{Envelope, Polled, Sink, Source, TransportError};
use crate::window::TimestampMs;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Serialize, Deserialize)]
struct TopicRecord {
    #[serde(default)]
    key: Option<String>,
    value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp_ms: Option<TimestampMs>,
}

/// Path of `topic` under the bootstrap directory `dir`.
pub fn topic_path(dir: impl AsRef<Path>, topic: &str) -> PathBuf {
    dir.as_ref().join(format!("{topic}.jsonl"))
}

fn decode_line(line: &[u8]) -> Envelope {
    match serde_json::from_slice::<TopicRecord>(line) {
        Ok(rec) => Envelope {
            key: rec.key,
            payload: rec.value.to_string().into_bytes(),
            timestamp_ms: rec.timestamp_ms,
        },
        Err(_) => Envelope {
            key: None,
            payload: line.trim_ascii_end().to_vec(),
            timestamp_ms: None,
        },
    }
}

fn encode_line(message: &Envelope) -> serde_json::Result<String> {
    let value = serde_json::from_slice(&message.payload).unwrap_or_else(|_| {
        serde_json::Value::String(String::from_utf8_lossy(&message.payload).into_owned())
    });
    serde_json::to_string(&TopicRecord {
        key: message.key.clone(),
        value,
        timestamp_ms: message.timestamp_ms,
    })
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("bootstrap address {} is not a reachable directory", dir.display());
    }
    Ok(())
}

/// Read a whole topic into memory.
///
/// # Errors
/// Returns an error if the file cannot be opened or read. Errors include the
/// line number.
pub fn read_topic(dir: impl AsRef<Path>, topic: &str) -> Result<Vec<Envelope>> {
    let path = topic_path(dir, topic);
    let f = File::open(&path).with_context(|| format!("open {}", path.display()))?;
    let mut out = Vec::new();
    for (i, line) in BufReader::new(f).split(b'\n').enumerate() {
        let line = line.with_context(|| format!("read line {} in {}", i + 1, path.display()))?;
        if line.trim_ascii().is_empty() {
            continue;
        }
        out.push(decode_line(&line));
    }
    Ok(out)
}

/// Append messages to a topic, creating the file if needed.
///
/// # Returns
/// The number of messages written.
///
/// # Errors
/// Returns an error if the directory is missing or any message fails to
/// serialize/flush.
pub fn write_topic(dir: impl AsRef<Path>, topic: &str, messages: &[Envelope]) -> Result<usize> {
    let dir = dir.as_ref();
    ensure_dir(dir)?;
    let path = topic_path(dir, topic);
    let f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open {}", path.display()))?;
    let mut w = BufWriter::new(f);
    for (i, msg) in messages.iter().enumerate() {
        let line = encode_line(msg)
            .with_context(|| format!("serialize message #{} to {}", i, path.display()))?;
        writeln!(w, "{line}")?;
    }
    w.flush()?;
    Ok(messages.len())
}

/// Consumer of a JSONL topic file.
pub struct JsonlTopicSource {
    path: PathBuf,
    reader: BufReader<File>,
    follow: bool,
    pending: Vec<u8>,
    consumed: u64,
    committed: u64,
}

impl JsonlTopicSource {
    /// Open `topic` under `dir`. With `follow`, the source waits for new lines at
    /// end of file instead of closing, and a missing topic file is created.
    ///
    /// # Errors
    /// Returns an error if the directory is unreachable, or the topic does not
    /// exist and `follow` is off.
    pub fn open(dir: impl AsRef<Path>, topic: &str, follow: bool) -> Result<Self> {
        let dir = dir.as_ref();
        ensure_dir(dir)?;
        let path = topic_path(dir, topic);
        if follow && !path.exists() {
            File::create(&path).with_context(|| format!("create {}", path.display()))?;
        }
        let f = File::open(&path).with_context(|| format!("open topic {}", path.display()))?;
        Ok(Self {
            path,
            reader: BufReader::new(f),
            follow,
            pending: Vec::new(),
            consumed: 0,
            committed: 0,
        })
    }

    /// Byte offset just past the last delivered line.
    pub fn position(&self) -> u64 {
        self.committed
    }

    fn deliver(&mut self) -> Option<Envelope> {
        self.committed = self.consumed;
        let line = std::mem::take(&mut self.pending);
        if line.trim_ascii().is_empty() {
            None
        } else {
            Some(decode_line(&line))
        }
    }
}

impl Source for JsonlTopicSource {
    fn poll(&mut self, timeout: Duration) -> Result<Polled, TransportError> {
        loop {
            let mut buf = Vec::new();
            let n = self
                .reader
                .read_until(b'\n', &mut buf)
                .map_err(|e| TransportError::Disconnected(format!("read {}: {e}", self.path.display())))?;
            if n == 0 {
                if self.follow {
                    std::thread::sleep(timeout);
                    return Ok(Polled::Idle);
                }
                if self.pending.is_empty() {
                    return Ok(Polled::Closed);
                }
                // final line without a trailing newline
                match self.deliver() {
                    Some(msg) => return Ok(Polled::Message(msg)),
                    None => return Ok(Polled::Closed),
                }
            }
            self.consumed += n as u64;
            self.pending.extend_from_slice(&buf);
            if self.pending.last() != Some(&b'\n') {
                continue;
            }
            if let Some(msg) = self.deliver() {
                return Ok(Polled::Message(msg));
            }
        }
    }

    fn reconnect(&mut self) -> Result<(), TransportError> {
        let mut f = File::open(&self.path)
            .map_err(|e| TransportError::Disconnected(format!("open {}: {e}", self.path.display())))?;
        f.seek(SeekFrom::Start(self.committed))
            .map_err(|e| TransportError::Disconnected(format!("seek {}: {e}", self.path.display())))?;
        self.reader = BufReader::new(f);
        self.pending.clear();
        self.consumed = self.committed;
        Ok(())
    }
}

/// Producer for a JSONL topic file. Clones share one buffered writer.
#[derive(Clone)]
pub struct JsonlTopicSink {
    path: PathBuf,
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl JsonlTopicSink {
    /// # Errors
    /// Returns an error if the directory is unreachable or the topic file cannot
    /// be opened for appending.
    pub fn create(dir: impl AsRef<Path>, topic: &str) -> Result<Self> {
        let dir = dir.as_ref();
        ensure_dir(dir)?;
        let path = topic_path(dir, topic);
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open topic {} for append", path.display()))?;
        Ok(Self {
            path,
            writer: Arc::new(Mutex::new(BufWriter::new(f))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for JsonlTopicSink {
    fn publish(&mut self, message: &Envelope) -> Result<(), TransportError> {
        let line = encode_line(message).map_err(|e| TransportError::Permanent(e.to_string()))?;
        let mut w = self
            .writer
            .lock()
            .map_err(|_| TransportError::Permanent("topic writer poisoned".into()))?;
        writeln!(w, "{line}")
            .map_err(|e| TransportError::Transient(format!("write {}: {e}", self.path.display())))
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        let mut w = self
            .writer
            .lock()
            .map_err(|_| TransportError::Permanent("topic writer poisoned".into()))?;
        w.flush()
            .map_err(|e| TransportError::Transient(format!("flush {}: {e}", self.path.display())))
    }
}
