pub mod channel;
pub mod pipeline;
pub mod recorder;
pub mod report;
pub mod sessions;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

pub use channel::{MeasurementChannel, MeasurementReceiver};
pub use pipeline::MetricsPipeline;
pub use recorder::MetricRecorder;
pub use report::{CpuGauge, ResourceSample, ResourceSampler, SystemCpu};
pub use sessions::ActiveSessionCounter;

/// Header row shared by `client-latencies.csv` and `server-latencies.csv`.
pub const LATENCY_HEADER: &str = "timestamp,type,latencyMs";

// ─── Metric types ────────────────────────────────────────────────

/// Every interval the harness knows how to measure, on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    /// gathering-start → gathering-complete
    IceGathering,
    /// description-sent → remote-description-received (initiator)
    SignalingRtt,
    /// attempt-start → transport-connected
    IceConnection,
    /// transport-connected → secure-channel-established
    DtlsHandshake,
    /// attempt-start → media-ready (initiator)
    MediaReady,
    /// Whole responder handler span
    SignalingProcessing,
    /// Applying the remote offer on the responder
    SdpOfferProcessing,
    /// Creating the local answer on the responder
    SdpAnswerCreation,
}

impl MetricType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IceGathering => "ice_gathering",
            Self::SignalingRtt => "signaling_rtt",
            Self::IceConnection => "ice_connection",
            Self::DtlsHandshake => "dtls_handshake",
            Self::MediaReady => "media_ready",
            Self::SignalingProcessing => "signaling_processing",
            Self::SdpOfferProcessing => "sdp_offer_processing",
            Self::SdpAnswerCreation => "sdp_answer_creation",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Samples ─────────────────────────────────────────────────────

/// One completed timing interval.
///
/// `timestamp` is the instant the measured operation *completed*, not when
/// it started. Values are never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyMeasurement {
    pub timestamp: DateTime<Utc>,
    pub metric: MetricType,
    pub latency_ms: f64,
}

/// A later milestone was stamped before an earlier one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{metric} interval is negative: ends {end} before it starts {start}")]
pub struct NegativeInterval {
    pub metric: MetricType,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl LatencyMeasurement {
    /// Build a sample from two wall-clock milestones. The sample is stamped
    /// with `end`. A negative interval is a milestone-ordering defect and is
    /// reported, never clamped.
    pub fn between(
        metric: MetricType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, NegativeInterval> {
        let micros = (end - start)
            .num_microseconds()
            .unwrap_or(i64::MAX);
        if micros < 0 {
            return Err(NegativeInterval { metric, start, end });
        }

        Ok(Self {
            timestamp: end,
            metric,
            latency_ms: micros as f64 / 1000.0,
        })
    }

    /// Build a sample for an operation that just finished after `elapsed`.
    pub fn completed_now(metric: MetricType, elapsed: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            metric,
            latency_ms: elapsed.as_micros() as f64 / 1000.0,
        }
    }
}
