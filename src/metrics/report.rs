use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sysinfo::System;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use super::MetricsPipeline;
use crate::error::HarnessError;

pub const REPORT_HEADER: &str =
    "timestamp, peerConnectionCount, cpuUsage, droppedLatencyMeasurements";

// ─── CPU gauge ───────────────────────────────────────────────────

/// Source of host CPU utilisation, in percent across all cores.
pub trait CpuGauge: Send + 'static {
    fn cpu_percent(&mut self) -> f32;
}

/// `sysinfo`-backed gauge. Usage is computed between consecutive refreshes,
/// so the first reading after construction is only meaningful once
/// `sysinfo::MINIMUM_CPU_UPDATE_INTERVAL` has passed.
pub struct SystemCpu {
    system: System,
}

impl SystemCpu {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self { system }
    }
}

impl Default for SystemCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuGauge for SystemCpu {
    fn cpu_percent(&mut self) -> f32 {
        self.system.refresh_cpu_usage();
        self.system.global_cpu_usage()
    }
}

// ─── Report rows ─────────────────────────────────────────────────

/// One periodic resource snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSample {
    pub timestamp: DateTime<Utc>,
    pub active_sessions: i64,
    pub cpu_percent: f32,
    pub dropped_measurements: u64,
}

impl ResourceSample {
    pub fn to_row(&self) -> String {
        format!(
            "{}, {}, {:.6}, {}\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.active_sessions,
            self.cpu_percent,
            self.dropped_measurements,
        )
    }
}

// ─── Sampler ─────────────────────────────────────────────────────

/// Appends a `ResourceSample` to the report log on a fixed period.
pub struct ResourceSampler<P> {
    path: PathBuf,
    writer: BufWriter<File>,
    gauge: P,
    pipeline: Arc<MetricsPipeline>,
    every: Duration,
}

impl<P: CpuGauge> ResourceSampler<P> {
    /// Create (or truncate) the report and write its header.
    pub async fn create(
        path: impl AsRef<Path>,
        gauge: P,
        pipeline: Arc<MetricsPipeline>,
        every: Duration,
    ) -> Result<Self, HarnessError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .await
            .map_err(|source| HarnessError::OpenLog { path: path.clone(), source })?;
        let mut writer = BufWriter::new(file);
        write_line(&mut writer, &format!("{REPORT_HEADER}\n"))
            .await
            .map_err(|source| HarnessError::OpenLog { path: path.clone(), source })?;

        Ok(Self {
            path,
            writer,
            gauge,
            pipeline,
            every,
        })
    }

    /// Take one snapshot and append it.
    pub async fn sample_once(&mut self) -> Result<ResourceSample, HarnessError> {
        let sample = ResourceSample {
            timestamp: Utc::now(),
            active_sessions: self.pipeline.sessions().current(),
            cpu_percent: self.gauge.cpu_percent(),
            dropped_measurements: self.pipeline.dropped(),
        };

        write_line(&mut self.writer, &sample.to_row())
            .await
            .map_err(|source| HarnessError::WriteLog {
                path: self.path.clone(),
                source,
            })?;

        debug!(
            sessions = sample.active_sessions,
            cpu = sample.cpu_percent,
            dropped = sample.dropped_measurements,
            "resource sample"
        );
        Ok(sample)
    }

    /// Sample every period for the lifetime of the process. The first row is
    /// written one period after start.
    pub async fn run(mut self) -> Result<(), HarnessError> {
        info!(path = %self.path.display(), every = ?self.every, "resource sampler started");

        let start = tokio::time::Instant::now() + self.every;
        let mut ticks = IntervalStream::new(tokio::time::interval_at(start, self.every));

        while ticks.next().await.is_some() {
            self.sample_once().await?;
        }
        Ok(())
    }
}

/// Report rows are few; each one goes straight to the OS.
async fn write_line(writer: &mut BufWriter<File>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FixedCpu(f32);

    impl CpuGauge for FixedCpu {
        fn cpu_percent(&mut self) -> f32 {
            self.0
        }
    }

    #[test]
    fn row_layout() {
        let sample = ResourceSample {
            timestamp: Utc.timestamp_opt(1_700_000_000, 123).unwrap(),
            active_sessions: 11,
            cpu_percent: 12.5,
            dropped_measurements: 5,
        };
        assert_eq!(sample.to_row(), "2023-11-14T22:13:20Z, 11, 12.500000, 5\n");
    }

    #[tokio::test]
    async fn sampler_writes_header_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        let (pipeline, _rx) = MetricsPipeline::with_receiver(1);
        let pipeline = Arc::new(pipeline);

        pipeline.sessions().connected();
        pipeline.sessions().connected();
        pipeline.record(crate::metrics::MetricType::IceGathering, Duration::ZERO);
        pipeline.record(crate::metrics::MetricType::IceGathering, Duration::ZERO);

        let mut sampler =
            ResourceSampler::create(&path, FixedCpu(42.0), pipeline.clone(), Duration::from_secs(3))
                .await
                .unwrap();
        let sample = sampler.sample_once().await.unwrap();

        assert_eq!(sample.active_sessions, 2);
        assert_eq!(sample.dropped_measurements, 1);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], REPORT_HEADER);
        assert!(lines[1].ends_with(", 2, 42.000000, 1"));
    }

    #[test]
    fn system_gauge_reports_a_percentage() {
        let mut gauge = SystemCpu::new();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        let pct = gauge.cpu_percent();
        assert!((0.0..=100.0).contains(&pct));
    }
}
