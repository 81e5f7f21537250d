use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::SecondsFormat;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::{LatencyMeasurement, MeasurementReceiver, LATENCY_HEADER};
use crate::error::HarnessError;

/// How often buffered rows are forced to disk when nothing else asks.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(3);

/// Single consumer of a `MeasurementChannel`.
///
/// Appends one CSV row per sample in the order the channel accepted them and
/// syncs the file on a fixed timer, independent of arrival rate.
pub struct MetricRecorder {
    path: PathBuf,
    writer: BufWriter<File>,
    flush_every: Duration,
    written: u64,
}

impl MetricRecorder {
    /// Create (or truncate) the log and write the header row.
    pub async fn create(
        path: impl AsRef<Path>,
        flush_every: Duration,
    ) -> Result<Self, HarnessError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .await
            .map_err(|source| HarnessError::OpenLog { path: path.clone(), source })?;

        let mut writer = BufWriter::new(file);
        writer
            .write_all(format!("{LATENCY_HEADER}\n").as_bytes())
            .await
            .map_err(|source| HarnessError::OpenLog { path: path.clone(), source })?;

        Ok(Self {
            path,
            writer,
            flush_every,
            written: 0,
        })
    }

    /// Drive the recorder until the channel closes or `shutdown` flips.
    /// Remaining queued samples are written before returning the row count.
    pub async fn run(
        mut self,
        mut rx: MeasurementReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<u64, HarnessError> {
        let mut sync_ticker = tokio::time::interval(self.flush_every);
        sync_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(path = %self.path.display(), "latency recorder started");

        loop {
            tokio::select! {
                sample = rx.recv() => match sample {
                    Some(sample) => self.append(&sample).await?,
                    None => break,
                },
                _ = sync_ticker.tick() => self.sync().await?,
                _ = shutdown.changed() => {
                    rx.close();
                    while let Some(sample) = rx.recv().await {
                        self.append(&sample).await?;
                    }
                    break;
                }
            }
        }

        self.sync().await?;
        info!(path = %self.path.display(), rows = self.written, "latency recorder stopped");
        Ok(self.written)
    }

    async fn append(&mut self, sample: &LatencyMeasurement) -> Result<(), HarnessError> {
        self.writer
            .write_all(format_row(sample).as_bytes())
            .await
            .map_err(|source| self.write_error(source))?;
        self.written += 1;
        Ok(())
    }

    async fn sync(&mut self) -> Result<(), HarnessError> {
        self.writer
            .flush()
            .await
            .map_err(|source| self.write_error(source))?;
        self.writer
            .get_ref()
            .sync_data()
            .await
            .map_err(|source| self.write_error(source))?;
        debug!(path = %self.path.display(), rows = self.written, "synced");
        Ok(())
    }

    fn write_error(&self, source: std::io::Error) -> HarnessError {
        HarnessError::WriteLog {
            path: self.path.clone(),
            source,
        }
    }
}

/// `timestamp,type,latencyMs` with a fixed-width nanosecond UTC timestamp
/// and six fractional digits of milliseconds.
pub fn format_row(sample: &LatencyMeasurement) -> String {
    format!(
        "{},{},{:.6}\n",
        sample.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
        sample.metric,
        sample.latency_ms,
    )
}
