use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::LatencyMeasurement;

/// Default number of outstanding samples before producers start dropping.
pub const DEFAULT_CAPACITY: usize = 10_000;

// ─── Producer side ───────────────────────────────────────────────

/// Many-producer, single-consumer conduit for latency samples.
///
/// `submit()` never waits: when `capacity` samples are already queued the
/// new one is discarded and the drop counter goes up. Producers always win
/// over the recorder.
#[derive(Debug, Clone)]
pub struct MeasurementChannel {
    tx: mpsc::Sender<LatencyMeasurement>,
    dropped: Arc<AtomicU64>,
}

/// The single consumer end, owned by a `MetricRecorder`.
#[derive(Debug)]
pub struct MeasurementReceiver {
    rx: mpsc::Receiver<LatencyMeasurement>,
}

impl MeasurementChannel {
    /// `capacity` must be non-zero.
    pub fn bounded(capacity: usize) -> (Self, MeasurementReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        let channel = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (channel, MeasurementReceiver { rx })
    }

    /// Offer a sample. Returns `false` if it was dropped.
    pub fn submit(&self, sample: LatencyMeasurement) -> bool {
        match self.tx.try_send(sample) {
            Ok(()) => true,
            // Full and closed are both a loss the report has to show.
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Total samples discarded since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

// ─── Consumer side ───────────────────────────────────────────────

impl MeasurementReceiver {
    /// Next sample in acceptance order; `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<LatencyMeasurement> {
        self.rx.recv().await
    }

    /// Refuse further submissions. Already-accepted samples stay readable.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Non-waiting read, used when draining.
    pub fn try_recv(&mut self) -> Option<LatencyMeasurement> {
        self.rx.try_recv().ok()
    }
}
