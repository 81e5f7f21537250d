use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};

use crate::driver::LoadPlan;
use crate::metrics::pipeline::PipelineConfig;

// ─── Shared ──────────────────────────────────────────────────────

/// Settings for a process's latency log.
#[derive(Debug, Clone, Args)]
pub struct PipelineArgs {
    /// Outstanding samples allowed before new ones are dropped
    #[arg(long, env = "BENCH_CHANNEL_CAPACITY", default_value_t = 10_000,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub channel_capacity: u32,

    /// How often the latency log is synced to disk (ms)
    #[arg(long, env = "BENCH_FLUSH_MS", default_value_t = 3_000)]
    pub flush_ms: u64,
}

impl PipelineArgs {
    pub fn pipeline(&self, output: PathBuf) -> PipelineConfig {
        PipelineConfig {
            output,
            capacity: self.channel_capacity as usize,
            flush_every: Duration::from_millis(self.flush_ms),
        }
    }
}

// ─── Driver ──────────────────────────────────────────────────────

/// Opens batches of concurrent connection attempts against a responder.
#[derive(Debug, Clone, Parser)]
#[command(name = "handshake-driver", version)]
pub struct DriverArgs {
    /// Responder host:port
    pub responder: String,

    /// Attempts launched per tick
    #[arg(long, env = "BENCH_BATCH_SIZE", default_value_t = 11,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub batch_size: u32,

    /// Period between batches (ms)
    #[arg(long, env = "BENCH_INTERVAL_MS", default_value_t = 5_000)]
    pub interval_ms: u64,

    /// Per-attempt deadline for signaling + media-ready (ms)
    #[arg(long, env = "BENCH_TIMEOUT_MS", default_value_t = 5_000)]
    pub timeout_ms: u64,

    /// How long an established session stays open before the driver closes it (ms)
    #[arg(long, env = "BENCH_HOLD_MS", default_value_t = 30_000)]
    pub hold_ms: u64,

    /// Stop after this many ticks
    #[arg(long, env = "BENCH_BATCHES")]
    pub batches: Option<u64>,

    #[arg(long, env = "BENCH_CLIENT_LOG", default_value = "client-latencies.csv")]
    pub output: PathBuf,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

impl DriverArgs {
    pub fn plan(&self) -> LoadPlan {
        LoadPlan {
            batch_size: self.batch_size,
            interval: Duration::from_millis(self.interval_ms),
            attempt_timeout: Duration::from_millis(self.timeout_ms),
            hold: Duration::from_millis(self.hold_ms),
            batches: self.batches,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        self.pipeline.pipeline(self.output.clone())
    }
}

// ─── Responder ───────────────────────────────────────────────────

/// Answers negotiation requests, serves static assets and loops media.
#[derive(Debug, Clone, Parser)]
#[command(name = "handshake-responder", version)]
pub struct ResponderArgs {
    #[arg(long, env = "BENCH_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    #[arg(long, env = "BENCH_STATIC_DIR", default_value = "./static")]
    pub static_dir: PathBuf,

    #[arg(long, env = "BENCH_MEDIA_FILE", default_value = "input.ivf")]
    pub media_file: PathBuf,

    #[arg(long, env = "BENCH_SERVER_LOG", default_value = "server-latencies.csv")]
    pub latencies: PathBuf,

    #[arg(long, env = "BENCH_REPORT", default_value = "report.csv")]
    pub report: PathBuf,

    /// Period between resource report rows (ms)
    #[arg(long, env = "BENCH_REPORT_INTERVAL_MS", default_value_t = 3_000)]
    pub report_interval_ms: u64,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

impl ResponderArgs {
    pub fn pipeline_config(&self) -> PipelineConfig {
        self.pipeline.pipeline(self.latencies.clone())
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}
