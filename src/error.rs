use std::path::PathBuf;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

// ─── Process-level errors ────────────────────────────────────────

/// Failures that stop a component. Raised during startup they are fatal.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("cannot open {}: {source}", path.display())]
    OpenLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    WriteLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("latency recorder task aborted")]
    RecorderGone,

    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("media file {}: {reason}", path.display())]
    Media { path: PathBuf, reason: String },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ─── Negotiation engine ──────────────────────────────────────────

/// Anything the external transport library reports.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{stage} failed: {reason}")]
    Negotiation { stage: &'static str, reason: String },

    #[error("no local description after gathering")]
    MissingLocalDescription,
}

impl EngineError {
    pub fn at(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Negotiation {
            stage,
            reason: err.to_string(),
        }
    }
}

// ─── Per-attempt errors ──────────────────────────────────────────

/// Why a single driver-side connection attempt failed. Never fatal to the
/// process or to sibling attempts.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("signaling request failed: {0}")]
    Signaling(#[from] reqwest::Error),

    #[error("no media-ready within {0:?}")]
    TimedOut(Duration),

    #[error("session closed before media-ready")]
    ClosedBeforeReady,
}

impl AttemptError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }
}

// ─── HTTP mapping for the responder ──────────────────────────────

#[derive(Debug)]
pub enum AppError {
    /// Body did not decode as a session description.
    BadOffer(String),
    Engine(EngineError),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadOffer(msg) => (StatusCode::BAD_REQUEST, format!("malformed offer: {msg}")),
            Self::Engine(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_error_statuses() {
        let bad = AppError::BadOffer("eof".into()).into_response();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let engine = AppError::from(EngineError::at("create_answer", "boom")).into_response();
        assert_eq!(engine.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn engine_error_message_names_the_stage() {
        let e = EngineError::at("set_remote_description", "bad sdp");
        assert_eq!(e.to_string(), "set_remote_description failed: bad sdp");
    }

    #[test]
    fn only_timeouts_report_as_timeouts() {
        assert!(AttemptError::TimedOut(Duration::from_secs(5)).is_timeout());
        assert!(!AttemptError::ClosedBeforeReady.is_timeout());
    }
}
