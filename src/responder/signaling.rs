use std::sync::Arc;
use std::time::Instant;

use axum::{body::Bytes, extract::State, Json};
use tracing::{debug, warn};

use super::registry::SessionGuard;
use super::ResponderState;
use crate::engine::{self, PeerEngine, PeerSession, SessionDescription};
use crate::error::AppError;
use crate::instrument::{ConnectionInstrumentor, InstrumentorHandle, Instrumentation, Role, Transition};
use crate::metrics::pipeline::StageTimer;
use crate::metrics::{MetricType, MetricsPipeline};

// ─── POST /doSignaling ───────────────────────────────────────────

/// Accept an offer, return the gathered answer.
///
/// Exactly one connection is created per request. On success it outlives
/// the request in the session registry; on failure, or if the caller goes
/// away mid-negotiation, it is closed.
pub async fn do_signaling<E: PeerEngine>(
    State(state): State<Arc<ResponderState<E>>>,
    body: Bytes,
) -> Result<Json<SessionDescription>, AppError> {
    let request = state.count_request();
    let _span = StageTimer::start(Arc::clone(&state.pipeline), MetricType::SignalingProcessing);

    let Instrumentation { handle, finished, .. } =
        ConnectionInstrumentor::spawn(Role::Responder, Arc::clone(&state.pipeline));
    handle.notify(Transition::AttemptStart);

    let session = Arc::new(state.engine.open(Role::Responder, handle.clone()).await?);
    let guard = SessionGuard::new(Arc::clone(&session));

    let outcome = answer(&state.pipeline, session.as_ref(), &handle, &body).await;
    guard.disarm();

    match outcome {
        Ok(local) => {
            debug!(request, session = %handle.id(), "answer sent");
            state.registry.track(handle.id(), session, finished);
            Ok(Json(local))
        }
        Err(e) => {
            warn!(request, session = %handle.id(), error = ?e, "negotiation request failed");
            if let Err(close) = session.close().await {
                debug!(error = %close, "close after failed request");
            }
            Err(e)
        }
    }
}

async fn answer<S: PeerSession>(
    pipeline: &MetricsPipeline,
    session: &S,
    handle: &InstrumentorHandle,
    body: &[u8],
) -> Result<SessionDescription, AppError> {
    let offer: SessionDescription =
        serde_json::from_slice(body).map_err(|e| AppError::BadOffer(e.to_string()))?;

    let started = Instant::now();
    session.apply_remote(offer).await?;
    pipeline.record(MetricType::SdpOfferProcessing, started.elapsed());

    let started = Instant::now();
    let answer = session.create_answer().await?;
    pipeline.record(MetricType::SdpAnswerCreation, started.elapsed());

    let gathering = session.apply_local(answer).await?;
    handle.notify(Transition::GatheringStart);
    engine::gathered(gathering).await;
    handle.notify(Transition::GatheringComplete);

    Ok(session.local_description().await?)
}
