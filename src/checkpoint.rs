//! Slot-state checkpoints for restarting a long-running processor.
//!
//! Each worker periodically persists the states of the slots it owns. On
//! startup the latest snapshot of every previous worker is loaded, merged and
//! handed back so the runner can re-partition it across the current worker
//! count. Open windows and the watermark are not persisted; after a restart
//! the watermark restarts from the clock and replayed events are absorbed by
//! the idempotent state transition.
//!
//! # Usage
//!
//! ```no_run
//! use parkflow::checkpoint::{CheckpointConfig, CheckpointManager};
//! use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let config = CheckpointConfig {
//!     enabled: true,
//!     directory: "./checkpoints".into(),
//!     ..CheckpointConfig::default()
//! };
//! let manager = CheckpointManager::new(config)?;
//! let restored = manager.recover_all()?;
//! println!("restored {} slots", restored.len());
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "checkpointing")]
use crate::state::SlotState;
#[cfg(feature = "checkpointing")]
use anyhow::{Context, Result, anyhow};
#[cfg(feature = "checkpointing")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "checkpointing")]
use sha2::{Digest, Sha256};
#[cfg(feature = "checkpointing")]
use std::collections::HashMap;
#[cfg(feature = "checkpointing")]
use std::fs::{DirEntry, File, create_dir_all, read_dir, remove_file};
#[cfg(feature = "checkpointing")]
use std::io::{Read, Write};
#[cfg(feature = "checkpointing")]
use std::path::Path;
use std::path::PathBuf;
#[cfg(feature = "checkpointing")]
use std::time::{SystemTime, UNIX_EPOCH};

/// Where and how often workers persist their slot states.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// Enable or disable checkpointing.
    pub enabled: bool,
    /// Directory where checkpoint files are stored.
    pub directory: PathBuf,
    /// Write a checkpoint after this many closed windows. Zero only
    /// checkpoints on shutdown.
    pub every_windows: u64,
    /// Load the latest checkpoints on startup.
    pub auto_recover: bool,
    /// Maximum number of checkpoints retained per worker (oldest are deleted
    /// first). None means keep all checkpoints.
    pub max_checkpoints: Option<usize>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("/tmp/parkflow-checkpoint"),
            every_windows: 10,
            auto_recover: true,
            max_checkpoints: Some(5),
        }
    }
}

/// One worker's persisted slot states.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[cfg(feature = "checkpointing")]
pub struct CheckpointState {
    pub worker: usize,
    /// Worker count of the run that wrote the checkpoint.
    pub workers: usize,
    /// Milliseconds since epoch.
    pub timestamp: u64,
    pub slots: Vec<SlotState>,
    /// SHA-256 over the header fields and the encoded slots.
    pub checksum: String,
}

#[cfg(feature = "checkpointing")]
impl CheckpointState {
    /// # Errors
    /// Returns an error if the slots cannot be encoded.
    pub fn new(worker: usize, workers: usize, timestamp: u64, slots: Vec<SlotState>) -> Result<Self> {
        let checksum = state_checksum(worker, workers, timestamp, &slots)?;
        Ok(Self {
            worker,
            workers,
            timestamp,
            slots,
            checksum,
        })
    }

    fn verify(&self) -> Result<()> {
        let computed = state_checksum(self.worker, self.workers, self.timestamp, &self.slots)?;
        if computed != self.checksum {
            return Err(anyhow!("Checkpoint integrity check failed: checksum mismatch"));
        }
        Ok(())
    }
}

#[cfg(feature = "checkpointing")]
fn state_checksum(worker: usize, workers: usize, timestamp: u64, slots: &[SlotState]) -> Result<String> {
    let encoded = postcard::to_allocvec(slots).context("Failed to serialize slot states")?;
    let mut data = format!("{worker}:{workers}:{timestamp}:").into_bytes();
    data.extend_from_slice(&encoded);
    Ok(compute_checksum(&data))
}

/// Writes, finds and loads per-worker checkpoint files.
#[cfg(feature = "checkpointing")]
pub struct CheckpointManager {
    config: CheckpointConfig,
}

#[cfg(feature = "checkpointing")]
impl CheckpointManager {
    /// # Errors
    ///
    /// Returns an error if the checkpoint directory cannot be created.
    pub fn new(config: CheckpointConfig) -> Result<Self> {
        if config.enabled {
            create_dir_all(&config.directory).with_context(|| {
                format!("Failed to create checkpoint directory {}", config.directory.display())
            })?;
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// Persist `slots` as the newest checkpoint of `worker`.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint file cannot be created or written to.
    pub fn save(&self, worker: usize, workers: usize, slots: Vec<SlotState>) -> Result<PathBuf> {
        let mut timestamp = current_timestamp_ms();
        // keep file names unique when two saves land in the same millisecond
        if let Some(latest) = self.find_latest(worker)?.as_deref().and_then(checkpoint_timestamp)
            && latest >= timestamp
        {
            timestamp = latest + 1;
        }
        let state = CheckpointState::new(worker, workers, timestamp, slots)?;
        let path = self
            .config
            .directory
            .join(format!("checkpoint_w{worker}_{timestamp}.bin"));

        let encoded = postcard::to_allocvec(&state).context("Failed to serialize checkpoint")?;
        let mut file = File::create(&path).context("Failed to create checkpoint file")?;
        file.write_all(&encoded).context("Failed to write checkpoint")?;
        file.sync_all().context("Failed to sync checkpoint to disk")?;

        self.cleanup(worker)?;
        Ok(path)
    }

    /// Most recent checkpoint file of `worker`.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint directory cannot be read.
    pub fn find_latest(&self, worker: usize) -> Result<Option<PathBuf>> {
        Ok(self.sorted_entries(Some(worker))?.last().map(DirEntry::path))
    }

    /// Load and verify a checkpoint from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint file cannot be read or if the
    /// checksum verification fails.
    pub fn load(&self, path: &Path) -> Result<CheckpointState> {
        let mut file = File::open(path).context("Failed to open checkpoint file")?;
        let mut encoded = Vec::new();
        file.read_to_end(&mut encoded).context("Failed to read checkpoint")?;
        let state: CheckpointState =
            postcard::from_bytes(&encoded).context("Failed to deserialize checkpoint")?;
        state.verify()?;
        Ok(state)
    }

    /// Merge the latest checkpoint of every worker that ever wrote one.
    ///
    /// A slot present in several snapshots (the worker count changed between
    /// runs) keeps the state with the highest logical timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read or any latest
    /// checkpoint fails to load.
    pub fn recover_all(&self) -> Result<Vec<SlotState>> {
        if !self.config.enabled || !self.config.auto_recover {
            return Ok(Vec::new());
        }
        let mut latest: HashMap<usize, (u64, PathBuf)> = HashMap::new();
        for entry in self.sorted_entries(None)? {
            let path = entry.path();
            let (Some(worker), Some(ts)) = (checkpoint_worker(&path), checkpoint_timestamp(&path)) else {
                continue;
            };
            if latest.get(&worker).is_none_or(|(seen, _)| ts > *seen) {
                latest.insert(worker, (ts, path));
            }
        }

        let mut merged: HashMap<String, SlotState> = HashMap::new();
        for (_, path) in latest.into_values() {
            let state = self
                .load(&path)
                .with_context(|| format!("Failed to recover {}", path.display()))?;
            for slot in state.slots {
                match merged.get(&slot.slot_id) {
                    Some(cur) if cur.last_logical_timestamp >= slot.last_logical_timestamp => {}
                    _ => {
                        merged.insert(slot.slot_id.clone(), slot);
                    }
                }
            }
        }
        let mut slots: Vec<SlotState> = merged.into_values().collect();
        slots.sort_by(|a, b| a.slot_id.cmp(&b.slot_id));
        Ok(slots)
    }

    /// Delete every checkpoint in the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint directory cannot be read.
    pub fn clear(&self) -> Result<()> {
        for entry in self.sorted_entries(None)? {
            remove_file(entry.path()).ok();
        }
        Ok(())
    }

    /// Delete old checkpoints of `worker` beyond the retention limit.
    fn cleanup(&self, worker: usize) -> Result<()> {
        let Some(max_checkpoints) = self.config.max_checkpoints else {
            return Ok(());
        };
        let checkpoints = self.sorted_entries(Some(worker))?;
        if checkpoints.len() <= max_checkpoints {
            return Ok(());
        }
        let to_delete = checkpoints.len() - max_checkpoints;
        for entry in checkpoints.iter().take(to_delete) {
            remove_file(entry.path()).ok(); // Ignore errors
        }
        Ok(())
    }

    /// Checkpoint files, oldest first, optionally limited to one worker.
    fn sorted_entries(&self, worker: Option<usize>) -> Result<Vec<DirEntry>> {
        if !self.config.directory.exists() {
            return Ok(Vec::new());
        }
        let mut checkpoints: Vec<_> = read_dir(&self.config.directory)
            .context("Failed to read checkpoint directory")?
            .filter_map(Result::ok)
            .filter(|entry| {
                let path = entry.path();
                checkpoint_timestamp(&path).is_some()
                    && checkpoint_worker(&path).is_some_and(|w| worker.is_none_or(|want| want == w))
            })
            .collect();
        checkpoints.sort_by_key(|entry| checkpoint_timestamp(&entry.path()).unwrap_or(0));
        Ok(checkpoints)
    }
}

/// Split `checkpoint_w{worker}_{timestamp}.bin` into its numeric parts.
#[cfg(feature = "checkpointing")]
fn parse_name(path: &Path) -> Option<(usize, u64)> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_prefix("checkpoint_w")?.strip_suffix(".bin")?;
    let (worker, ts) = stem.split_once('_')?;
    Some((worker.parse().ok()?, ts.parse().ok()?))
}

#[cfg(feature = "checkpointing")]
fn checkpoint_worker(path: &Path) -> Option<usize> {
    parse_name(path).map(|(w, _)| w)
}

#[cfg(feature = "checkpointing")]
fn checkpoint_timestamp(path: &Path) -> Option<u64> {
    parse_name(path).map(|(_, ts)| ts)
}

/// Compute SHA-256 checksum of data as lowercase hex.
#[cfg(feature = "checkpointing")]
#[must_use]
pub fn compute_checksum(data: &[u8]) -> String {
    use std::fmt::Write as _;
    let digest = Sha256::digest(data);
    digest.iter().fold(String::with_capacity(64), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Get current timestamp in milliseconds since epoch.
#[cfg(feature = "checkpointing")]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(all(test, feature = "checkpointing"))]
mod tests {
    use super::*;

    #[test]
    fn parses_checkpoint_names() {
        assert_eq!(parse_name(Path::new("/x/checkpoint_w3_1700.bin")), Some((3, 1700)));
        assert_eq!(parse_name(Path::new("checkpoint_w3_1700.json")), None);
        assert_eq!(parse_name(Path::new("checkpoint_abc_1.bin")), None);
    }

    #[test]
    fn checksum_is_hex_sha256() {
        assert_eq!(
            compute_checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
