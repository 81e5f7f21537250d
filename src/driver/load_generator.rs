use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{info, info_span, warn, Instrument};

use super::{ConnectionAttempt, SignalingClient};
use crate::engine::PeerEngine;
use crate::error::AttemptError;
use crate::metrics::MetricsPipeline;

// ─── Plan ────────────────────────────────────────────────────────

/// When and how many attempts to launch.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub batch_size: u32,
    pub interval: Duration,
    pub attempt_timeout: Duration,
    pub hold: Duration,
    /// Stop after this many ticks. `None` runs until shutdown.
    pub batches: Option<u64>,
}

// ─── Summary ─────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub launched: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub timed_out: u32,
}

impl BatchSummary {
    fn tally(&mut self, outcome: &Result<(), AttemptError>) {
        match outcome {
            Ok(()) => self.succeeded += 1,
            Err(e) if e.is_timeout() => self.timed_out += 1,
            Err(_) => self.failed += 1,
        }
    }
}

impl AddAssign for BatchSummary {
    fn add_assign(&mut self, other: Self) {
        self.launched += other.launched;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.timed_out += other.timed_out;
    }
}

// ─── Generator ───────────────────────────────────────────────────

/// Launches `batch_size` attempts every `interval` until the batch cap or
/// the stop signal.
pub struct LoadGenerator<E> {
    plan: LoadPlan,
    attempt: ConnectionAttempt<E>,
    pipeline: Arc<MetricsPipeline>,
    stop: watch::Receiver<bool>,
}

impl<E: PeerEngine> LoadGenerator<E> {
    pub fn new(
        plan: LoadPlan,
        engine: Arc<E>,
        signaling: SignalingClient,
        pipeline: Arc<MetricsPipeline>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let attempt = ConnectionAttempt::new(
            engine,
            signaling,
            Arc::clone(&pipeline),
            plan.attempt_timeout,
            plan.hold,
            stop.clone(),
        );
        Self {
            plan,
            attempt,
            pipeline,
            stop,
        }
    }

    /// Run the schedule, then wait for every outstanding attempt. Returns
    /// the totals over all batches.
    pub async fn run(mut self) -> BatchSummary {
        info!(
            batch_size = self.plan.batch_size,
            interval = ?self.plan.interval,
            timeout = ?self.plan.attempt_timeout,
            batches = ?self.plan.batches,
            "load generator started"
        );

        // The first tick fires immediately.
        let mut ticks = IntervalStream::new(tokio::time::interval(self.plan.interval));
        let mut batches: JoinSet<BatchSummary> = JoinSet::new();
        let mut total = BatchSummary::default();
        let mut launched = 0u64;

        loop {
            if self.plan.batches.is_some_and(|cap| launched >= cap) || *self.stop.borrow() {
                break;
            }

            tokio::select! {
                Some(_) = ticks.next() => {
                    launched += 1;
                    batches.spawn(self.launch_batch(launched));
                }
                Some(done) = batches.join_next(), if !batches.is_empty() => {
                    total += Self::collect(done);
                }
                _ = self.stop.changed() => {
                    info!("stop requested, no further batches");
                    break;
                }
            }
        }

        while let Some(done) = batches.join_next().await {
            total += Self::collect(done);
        }

        info!(
            launched = total.launched,
            succeeded = total.succeeded,
            failed = total.failed,
            timed_out = total.timed_out,
            peak_sessions = self.pipeline.sessions().peak(),
            "load generator finished"
        );
        total
    }

    /// Start one batch: attempts are initiated one after another and then
    /// run concurrently. The returned future resolves once all have ended.
    fn launch_batch(&self, number: u64) -> impl std::future::Future<Output = BatchSummary> + Send + 'static {
        let mut attempts = JoinSet::new();
        for _ in 0..self.plan.batch_size {
            attempts.spawn(self.attempt.clone().run());
        }

        let pipeline = Arc::clone(&self.pipeline);
        let launched = self.plan.batch_size;

        async move {
            let mut summary = BatchSummary {
                launched,
                ..Default::default()
            };
            while let Some(joined) = attempts.join_next().await {
                match joined {
                    Ok(outcome) => summary.tally(&outcome),
                    Err(e) => {
                        warn!(error = %e, "attempt task aborted");
                        summary.failed += 1;
                    }
                }
            }

            info!(
                launched = summary.launched,
                succeeded = summary.succeeded,
                failed = summary.failed,
                timed_out = summary.timed_out,
                active_sessions = pipeline.sessions().current(),
                dropped = pipeline.dropped(),
                "batch finished"
            );
            summary
        }
        .instrument(info_span!("batch", number))
    }

    fn collect(done: Result<BatchSummary, tokio::task::JoinError>) -> BatchSummary {
        done.unwrap_or_else(|e| {
            warn!(error = %e, "batch supervisor aborted");
            BatchSummary::default()
        })
    }
}
