//! Boundary to the external real-time transport library.
//!
//! The harness drives negotiation through [`PeerEngine`] and [`PeerSession`];
//! the engine reports connection-state changes by calling
//! [`InstrumentorHandle::notify`] on the handle it was opened with.

pub mod media;
pub mod rtc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::instrument::{InstrumentorHandle, Role};

/// Route the responder answers offers on.
pub const SIGNALING_PATH: &str = "/doSignaling";

/// Closes (or yields once) when candidate gathering has finished.
pub type GatheringComplete = mpsc::Receiver<()>;

/// Session description as exchanged on the wire:
/// `{"type": "offer", "sdp": "v=0..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Factory for sessions of either role.
#[async_trait]
pub trait PeerEngine: Send + Sync + 'static {
    type Session: PeerSession;

    /// Create a connection for `role` and wire its state callbacks to
    /// `observer`. The responder role attaches outbound media here.
    async fn open(&self, role: Role, observer: InstrumentorHandle) -> Result<Self::Session, EngineError>;
}

/// One negotiated connection.
#[async_trait]
pub trait PeerSession: Send + Sync + 'static {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;

    /// Apply the local description; gathering starts here.
    async fn apply_local(&self, desc: SessionDescription) -> Result<GatheringComplete, EngineError>;

    async fn apply_remote(&self, desc: SessionDescription) -> Result<(), EngineError>;

    /// Current local description, including gathered candidates.
    async fn local_description(&self) -> Result<SessionDescription, EngineError>;

    /// Tear the connection down. The engine reports `SessionClosed`.
    async fn close(&self) -> Result<(), EngineError>;
}

/// Wait for gathering to finish.
pub async fn gathered(mut gathering: GatheringComplete) {
    let _ = gathering.recv().await;
}
