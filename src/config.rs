//! Command-line and environment configuration.
//!
//! [`Args`] is the raw clap surface; [`Config`] is the validated form. Any
//! invalid value is reported by [`Config::try_from`] before a single event is
//! read, so the binary can exit non-zero at startup.

use crate::checkpoint::CheckpointConfig;
use crate::fee::{DEFAULT_BLOCK_SECONDS, DEFAULT_PRICE_PER_BLOCK, FeePolicy};
use crate::observability::LogFormat;
use crate::retry::RetryPolicy;
use anyhow::{Context, Result, bail, ensure};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "parkflow", version, about = "Parking-slot occupancy and fee stream processor")]
pub struct Args {
    /// Address of the message transport: a directory holding `<topic>.jsonl` files.
    #[arg(long, env = "PARKFLOW_BOOTSTRAP", default_value = "./topics")]
    pub bootstrap: PathBuf,

    #[arg(long, env = "INPUT_TOPIC", default_value = "parking-events")]
    pub input_topic: String,

    #[arg(long, env = "OUTPUT_TOPIC", default_value = "parking-status")]
    pub output_topic: String,

    /// Directory for slot-state checkpoints.
    #[arg(long, env = "CHECKPOINT_DIR", default_value = "/tmp/parkflow-checkpoint")]
    pub state_dir: PathBuf,

    /// Disable checkpointing and recovery.
    #[arg(long)]
    pub no_checkpoint: bool,

    /// Checkpoint after this many closed windows per worker (0 = shutdown only).
    #[arg(long, default_value_t = 10)]
    pub checkpoint_every: u64,

    #[arg(long, env = "PRICE_PER_BLOCK", default_value_t = DEFAULT_PRICE_PER_BLOCK)]
    pub price_per_block: f64,

    #[arg(long, default_value_t = DEFAULT_BLOCK_SECONDS)]
    pub block_secs: u64,

    #[arg(long, default_value_t = 300)]
    pub window_size_secs: u64,

    #[arg(long, default_value_t = 60)]
    pub slide_secs: u64,

    #[arg(long, default_value_t = 600)]
    pub lateness_secs: u64,

    /// Worker threads; defaults to the number of CPUs.
    #[arg(long)]
    pub workers: Option<usize>,

    /// How often idle workers advance their watermark.
    #[arg(long, default_value_t = 1_000)]
    pub tick_ms: u64,

    #[arg(long, default_value_t = 5)]
    pub publish_attempts: usize,

    /// Capacity of each worker's input queue.
    #[arg(long, default_value_t = 1_024)]
    pub channel_capacity: usize,

    /// Keep tailing the input topic instead of stopping at its end.
    #[arg(long)]
    pub follow: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Write final metrics as JSON to this path.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,

    /// Write the most recent rejected input records as JSON to this path.
    #[arg(long)]
    pub errors_out: Option<PathBuf>,
}

/// Tunables of the processing pipeline itself, independent of transport.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub workers: usize,
    pub window_size: Duration,
    pub slide: Duration,
    pub lateness: Duration,
    pub tick: Duration,
    pub fee: FeePolicy,
    pub publish_retry: RetryPolicy,
    pub reconnect_retry: RetryPolicy,
    pub channel_capacity: usize,
    pub checkpoint: CheckpointConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            window_size: Duration::from_secs(300),
            slide: Duration::from_secs(60),
            lateness: Duration::from_secs(600),
            tick: Duration::from_secs(1),
            fee: FeePolicy::default(),
            publish_retry: RetryPolicy::default(),
            reconnect_retry: RetryPolicy::new(10, 200, 5_000, 0.2),
            channel_capacity: 1_024,
            checkpoint: CheckpointConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// # Errors
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.workers > 0, "worker count must be at least 1");
        ensure!(self.window_size.as_millis() > 0, "window size must be positive");
        ensure!(self.slide.as_millis() > 0, "window slide must be positive");
        ensure!(
            self.slide <= self.window_size,
            "window slide ({:?}) must not exceed window size ({:?})",
            self.slide,
            self.window_size
        );
        ensure!(self.tick.as_millis() > 0, "tick interval must be positive");
        ensure!(self.channel_capacity > 0, "channel capacity must be at least 1");
        if self.checkpoint.enabled && self.checkpoint.directory.as_os_str().is_empty() {
            bail!("checkpoint directory must not be empty");
        }
        Ok(())
    }
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bootstrap: PathBuf,
    pub input_topic: String,
    pub output_topic: String,
    pub follow: bool,
    pub log_format: LogFormat,
    pub metrics_out: Option<PathBuf>,
    pub errors_out: Option<PathBuf>,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Parse process arguments and environment.
    ///
    /// # Errors
    /// Returns an error if any value is invalid.
    pub fn from_env() -> Result<Self> {
        Self::try_from(Args::parse())
    }
}

impl TryFrom<Args> for Config {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self> {
        if !args.bootstrap.is_dir() {
            bail!(
                "bootstrap address {} is not reachable (expected a directory)",
                args.bootstrap.display()
            );
        }
        ensure!(!args.input_topic.trim().is_empty(), "input topic must not be empty");
        ensure!(!args.output_topic.trim().is_empty(), "output topic must not be empty");
        ensure!(args.publish_attempts > 0, "publish attempts must be at least 1");

        let fee = FeePolicy::new(args.block_secs, args.price_per_block).context("invalid fee policy")?;
        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            workers: args.workers.unwrap_or(defaults.workers),
            window_size: Duration::from_secs(args.window_size_secs),
            slide: Duration::from_secs(args.slide_secs),
            lateness: Duration::from_secs(args.lateness_secs),
            tick: Duration::from_millis(args.tick_ms),
            fee,
            publish_retry: RetryPolicy {
                max_attempts: args.publish_attempts,
                ..defaults.publish_retry
            },
            reconnect_retry: defaults.reconnect_retry,
            channel_capacity: args.channel_capacity,
            checkpoint: CheckpointConfig {
                enabled: !args.no_checkpoint && cfg!(feature = "checkpointing"),
                directory: args.state_dir,
                every_windows: args.checkpoint_every,
                ..CheckpointConfig::default()
            },
        };
        pipeline.validate()?;

        Ok(Self {
            bootstrap: args.bootstrap,
            input_topic: args.input_topic,
            output_topic: args.output_topic,
            follow: args.follow,
            log_format: args.log_format,
            metrics_out: args.metrics_out,
            errors_out: args.errors_out,
            pipeline,
        })
    }
}
