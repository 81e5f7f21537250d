//! Per-connection lifecycle instrumentation.
//!
//! Engine callbacks and the attempt's own task report transitions through an
//! [`InstrumentorHandle`]. Each report is stamped at the moment it is made and
//! queued to the attempt's [`ConnectionInstrumentor`], a small actor that owns
//! the [`ConnectionMilestones`] exclusively. No locking is shared between
//! attempts; the only cross-attempt state touched is the atomic session
//! counter and the measurement channel.

pub mod milestones;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};
use uuid::Uuid;

pub use milestones::{ConnectionMilestones, Interval, Transition, INTERVALS};

use crate::metrics::{LatencyMeasurement, MetricsPipeline};

/// Which side of the negotiation this attempt plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Driver side: creates the offer.
    Initiator,
    /// Responder side: answers it.
    Responder,
}

/// A transition plus the wall-clock instant it was observed.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleEvent {
    pub transition: Transition,
    pub at: DateTime<Utc>,
}

// ─── Handle ──────────────────────────────────────────────────────

/// Cheap, cloneable sender side used from callbacks. Never blocks.
#[derive(Debug, Clone)]
pub struct InstrumentorHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl InstrumentorHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stamp `transition` now. Silently ignored once the actor has stopped.
    pub fn notify(&self, transition: Transition) {
        self.notify_at(transition, Utc::now());
    }

    pub fn notify_at(&self, transition: Transition, at: DateTime<Utc>) {
        let _ = self.tx.send(LifecycleEvent { transition, at });
    }
}

/// Everything the owner of an attempt gets back from `spawn`.
pub struct Instrumentation {
    pub handle: InstrumentorHandle,
    /// Fires once when media-ready is stamped. Dropped unfired if the
    /// actor stops first.
    pub media_ready: oneshot::Receiver<()>,
    /// Resolves with the final milestones when the actor stops.
    pub finished: JoinHandle<ConnectionMilestones>,
}

// ─── Actor ───────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct ConnectionInstrumentor {
    id: Uuid,
    role: Role,
    pipeline: Arc<MetricsPipeline>,
    milestones: ConnectionMilestones,
    emitted: [bool; INTERVALS.len()],
    counted: bool,
    media_ready: Option<oneshot::Sender<()>>,
}

impl ConnectionInstrumentor {
    pub fn new(role: Role, pipeline: Arc<MetricsPipeline>) -> (Self, oneshot::Receiver<()>) {
        let (ready_tx, ready_rx) = oneshot::channel();
        let actor = Self {
            id: Uuid::new_v4(),
            role,
            pipeline,
            milestones: ConnectionMilestones::default(),
            emitted: [false; INTERVALS.len()],
            counted: false,
            media_ready: Some(ready_tx),
        };
        (actor, ready_rx)
    }

    /// Start the actor on its own task.
    pub fn spawn(role: Role, pipeline: Arc<MetricsPipeline>) -> Instrumentation {
        let (actor, media_ready) = Self::new(role, pipeline);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = InstrumentorHandle { id: actor.id, tx };
        let finished = tokio::spawn(actor.run(rx));

        Instrumentation {
            handle,
            media_ready,
            finished,
        }
    }

    pub fn milestones(&self) -> &ConnectionMilestones {
        &self.milestones
    }

    /// Process events until the terminal transition or until every handle
    /// is gone.
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<LifecycleEvent>) -> ConnectionMilestones {
        while let Some(event) = rx.recv().await {
            if self.apply(event) == Flow::Stop {
                break;
            }
        }
        self.release_session();
        debug!(attempt = %self.id, role = ?self.role, "instrumentor finished");
        self.milestones
    }

    fn apply(&mut self, event: LifecycleEvent) -> Flow {
        if event.transition == Transition::SessionClosed {
            trace!(attempt = %self.id, "session closed");
            return Flow::Stop;
        }

        if !self.milestones.stamp(event.transition, event.at) {
            trace!(attempt = %self.id, transition = ?event.transition, "duplicate transition ignored");
            return Flow::Continue;
        }

        if event.transition == Transition::TransportConnected {
            self.counted = true;
            self.pipeline.sessions().connected();
        }

        self.emit_completed(event.transition);

        if event.transition == Transition::MediaReady {
            if let Some(tx) = self.media_ready.take() {
                let _ = tx.send(());
            }
        }
        Flow::Continue
    }

    /// Submit every interval that `transition` just completed.
    fn emit_completed(&mut self, transition: Transition) {
        for (i, interval) in INTERVALS.iter().enumerate() {
            if self.emitted[i] || !interval.applies_to(self.role) || !interval.involves(transition) {
                continue;
            }
            let (Some(start), Some(end)) = (
                self.milestones.get(interval.from),
                self.milestones.get(interval.to),
            ) else {
                continue;
            };

            self.emitted[i] = true;
            match LatencyMeasurement::between(interval.metric, start, end) {
                Ok(sample) => self.pipeline.submit(sample),
                Err(defect) => error!(attempt = %self.id, %defect, "milestone ordering defect"),
            }
        }
    }

    fn release_session(&mut self) {
        if std::mem::take(&mut self.counted) {
            self.pipeline.sessions().closed();
        }
    }
}
