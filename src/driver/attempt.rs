use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tracing::{debug, info_span, warn, Instrument};

use super::SignalingClient;
use crate::engine::{self, PeerEngine, PeerSession};
use crate::error::AttemptError;
use crate::instrument::{ConnectionInstrumentor, InstrumentorHandle, Instrumentation, Role, Transition};
use crate::metrics::MetricsPipeline;

/// Everything one outbound connection attempt needs. Cheap to clone; the
/// load generator hands a clone to every spawned attempt.
pub struct ConnectionAttempt<E> {
    engine: Arc<E>,
    signaling: SignalingClient,
    pipeline: Arc<MetricsPipeline>,
    timeout: Duration,
    hold: Duration,
    stop: watch::Receiver<bool>,
}

impl<E> Clone for ConnectionAttempt<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            signaling: self.signaling.clone(),
            pipeline: Arc::clone(&self.pipeline),
            timeout: self.timeout,
            hold: self.hold,
            stop: self.stop.clone(),
        }
    }
}

impl<E: PeerEngine> ConnectionAttempt<E> {
    pub fn new(
        engine: Arc<E>,
        signaling: SignalingClient,
        pipeline: Arc<MetricsPipeline>,
        timeout: Duration,
        hold: Duration,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            signaling,
            pipeline,
            timeout,
            hold,
            stop,
        }
    }

    /// Negotiate one connection, wait for media-ready (bounded by the
    /// timeout), hold it open, then close it.
    ///
    /// A failure only ever affects this attempt.
    pub async fn run(mut self) -> Result<(), AttemptError> {
        let Instrumentation {
            handle,
            media_ready,
            finished,
        } = ConnectionInstrumentor::spawn(Role::Initiator, Arc::clone(&self.pipeline));
        let span = info_span!("attempt", id = %handle.id());

        async move {
            handle.notify(Transition::AttemptStart);

            let result = match self.engine.open(Role::Initiator, handle.clone()).await {
                Ok(session) => {
                    let result = self.negotiate(&session, &handle, media_ready).await;
                    match &result {
                        Ok(()) => {
                            debug!(hold = ?self.hold, "media ready");
                            self.hold_open().await;
                        }
                        // Transitions the engine reports while closing belong
                        // to an attempt that already failed.
                        Err(_) => handle.notify(Transition::SessionClosed),
                    }
                    if let Err(e) = session.close().await {
                        debug!(error = %e, "close failed");
                    }
                    result
                }
                Err(e) => Err(e.into()),
            };

            handle.notify(Transition::SessionClosed);
            drop(handle);
            if tokio::time::timeout(self.timeout, finished).await.is_err() {
                warn!("instrumentor did not stop after close");
            }

            if let Err(e) = &result {
                warn!(error = %e, "attempt failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn negotiate(
        &self,
        session: &E::Session,
        handle: &InstrumentorHandle,
        media_ready: oneshot::Receiver<()>,
    ) -> Result<(), AttemptError> {
        let offer = session.create_offer().await?;
        handle.notify(Transition::LocalDescriptionCreated);

        let gathering = session.apply_local(offer).await?;
        handle.notify(Transition::GatheringStart);
        engine::gathered(gathering).await;
        handle.notify(Transition::GatheringComplete);

        let local = session.local_description().await?;

        let exchange = async {
            handle.notify(Transition::LocalDescriptionSent);
            let answer = self.signaling.exchange(&local).await?;
            handle.notify(Transition::RemoteDescriptionReceived);

            session.apply_remote(answer).await?;
            media_ready.await.map_err(|_| AttemptError::ClosedBeforeReady)
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| AttemptError::TimedOut(self.timeout))?
    }

    /// Keep the session up for the hold period, or until shutdown.
    async fn hold_open(&mut self) {
        if self.hold.is_zero() || *self.stop.borrow() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.hold) => {}
            _ = self.stop.changed() => debug!("hold cut short by shutdown"),
        }
    }
}
