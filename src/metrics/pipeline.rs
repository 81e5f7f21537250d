use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use super::{
    ActiveSessionCounter, LatencyMeasurement, MeasurementChannel, MeasurementReceiver,
    MetricRecorder, MetricType,
};
use crate::error::HarnessError;

/// Where and how a process persists its latency samples.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output: PathBuf,
    pub capacity: usize,
    pub flush_every: Duration,
}

/// Owns the measurement channel, the recorder task and the shared counters
/// for one process. Every producer holds an `Arc` to it.
pub struct MetricsPipeline {
    channel: MeasurementChannel,
    sessions: ActiveSessionCounter,
    shutdown: watch::Sender<bool>,
    recorder: Mutex<Option<JoinHandle<Result<u64, HarnessError>>>>,
}

impl MetricsPipeline {
    /// Open the output log and start the recorder task.
    /// Failing to open the log is a setup error.
    pub async fn start(config: &PipelineConfig) -> Result<Arc<Self>, HarnessError> {
        let recorder = MetricRecorder::create(&config.output, config.flush_every).await?;
        let (pipeline, rx) = Self::with_receiver(config.capacity);

        let stop = pipeline.shutdown.subscribe();
        let handle = tokio::spawn(recorder.run(rx, stop));
        *pipeline.recorder.lock() = Some(handle);

        Ok(Arc::new(pipeline))
    }

    /// A pipeline whose consumer end is handed back to the caller instead of
    /// a recorder task.
    pub fn with_receiver(capacity: usize) -> (Self, MeasurementReceiver) {
        let (channel, rx) = MeasurementChannel::bounded(capacity);
        let (shutdown, _) = watch::channel(false);
        let pipeline = Self {
            channel,
            sessions: ActiveSessionCounter::new(),
            shutdown,
            recorder: Mutex::new(None),
        };
        (pipeline, rx)
    }

    /// Non-blocking; drops and counts on overflow.
    pub fn submit(&self, sample: LatencyMeasurement) {
        self.channel.submit(sample);
    }

    /// Record an operation that just completed after `elapsed`.
    pub fn record(&self, metric: MetricType, elapsed: Duration) {
        self.submit(LatencyMeasurement::completed_now(metric, elapsed));
    }

    pub fn sessions(&self) -> &ActiveSessionCounter {
        &self.sessions
    }

    pub fn dropped(&self) -> u64 {
        self.channel.dropped()
    }

    /// Close the channel, let the recorder drain and sync, and return the
    /// number of rows it wrote. Later submissions are counted as dropped.
    pub async fn shutdown(&self) -> Result<u64, HarnessError> {
        self.shutdown.send_replace(true);

        let handle = self.recorder.lock().take();
        match handle {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "latency recorder task did not finish cleanly");
                    Err(HarnessError::RecorderGone)
                }
            },
            None => Ok(0),
        }
    }
}

/// Times a stage from construction until drop and submits the sample then,
/// so early returns are measured too.
pub struct StageTimer {
    pipeline: Arc<MetricsPipeline>,
    metric: MetricType,
    started: std::time::Instant,
}

impl StageTimer {
    pub fn start(pipeline: Arc<MetricsPipeline>, metric: MetricType) -> Self {
        Self {
            pipeline,
            metric,
            started: std::time::Instant::now(),
        }
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        self.pipeline.record(self.metric, self.started.elapsed());
    }
}
