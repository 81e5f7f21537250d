//! Responder side: answers negotiation requests over HTTP.

pub mod registry;
pub mod server;
pub mod signaling;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use registry::SessionRegistry;
pub use server::create_router;

use crate::engine::PeerEngine;
use crate::metrics::MetricsPipeline;

/// Shared state available to every handler via `State<Arc<ResponderState<E>>>`.
pub struct ResponderState<E: PeerEngine> {
    pub engine: Arc<E>,

    /// Latency samples, the session counter and the drop counter.
    pub pipeline: Arc<MetricsPipeline>,

    /// Sessions kept alive after their request returned.
    pub registry: Arc<SessionRegistry<E::Session>>,

    requests: AtomicU64,
}

impl<E: PeerEngine> ResponderState<E> {
    pub fn new(engine: Arc<E>, pipeline: Arc<MetricsPipeline>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            pipeline,
            registry: SessionRegistry::new(),
            requests: AtomicU64::new(0),
        })
    }

    /// Negotiation requests received so far.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    fn count_request(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::Relaxed) + 1
    }
}
