use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::http::header::{HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{routing::post, Router};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::debug;

use super::{signaling, ResponderState};
use crate::engine::{PeerEngine, SIGNALING_PATH};

const RESPONSE_TIME_US: HeaderName = HeaderName::from_static("x-response-time-us");
const SERVER_TIMING: HeaderName = HeaderName::from_static("server-timing");

/// Builds the responder `Router`: the negotiation endpoint, static assets
/// as the fallback, request timing and CORS.
pub fn create_router<E: PeerEngine>(state: Arc<ResponderState<E>>, static_dir: impl AsRef<Path>) -> Router {
    Router::new()
        // ── Negotiation ─────────────────────────────────────────
        .route(SIGNALING_PATH, post(signaling::do_signaling::<E>))
        .with_state(state)
        // ── Serve the static dir for the browser client ─────────
        .fallback_service(ServeDir::new(static_dir.as_ref()))
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(middleware::from_fn(time_request))
        .layer(CorsLayer::permissive())
}

// ─── Request timing ──────────────────────────────────────────────

/// Stamps every response with its wall time, in whole microseconds and as
/// a `Server-Timing` entry, so a browser client can read the responder's
/// share of a signaling round trip.
async fn time_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();

    let headers = response.headers_mut();
    headers.insert(RESPONSE_TIME_US, HeaderValue::from(elapsed.as_micros() as u64));
    if let Ok(value) = HeaderValue::from_str(&server_timing(&path, elapsed)) {
        headers.insert(SERVER_TIMING, value);
    }

    debug!(
        status = response.status().as_u16(),
        %method,
        path,
        us = elapsed.as_micros() as u64,
        "request"
    );
    response
}

/// Negotiation requests are reported as `signaling`, everything else as
/// `static`. Durations are milliseconds.
fn server_timing(path: &str, elapsed: Duration) -> String {
    let stage = if path == SIGNALING_PATH { "signaling" } else { "static" };
    format!("{stage};dur={:.3}", elapsed.as_secs_f64() * 1000.0)
}
