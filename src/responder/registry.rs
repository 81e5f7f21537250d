use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::PeerSession;
use crate::instrument::ConnectionMilestones;

/// Responder sessions that outlived their negotiation request.
///
/// A session stays here until its instrumentor observes the terminal
/// transition; the entry is then dropped.
pub struct SessionRegistry<S> {
    live: Mutex<HashMap<Uuid, Arc<S>>>,
}

impl<S: PeerSession> SessionRegistry<S> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            live: Mutex::new(HashMap::new()),
        })
    }

    /// Keep `session` alive until `finished` resolves.
    pub fn track(self: &Arc<Self>, id: Uuid, session: Arc<S>, finished: JoinHandle<ConnectionMilestones>) {
        self.live.lock().insert(id, session);

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = finished.await {
                warn!(session = %id, error = %e, "instrumentor task failed");
            }
            if registry.live.lock().remove(&id).is_some() {
                debug!(session = %id, "session released");
            }
        });
    }

    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every live session. Used on shutdown.
    pub async fn close_all(&self) {
        let sessions: Vec<(Uuid, Arc<S>)> = self.live.lock().drain().collect();
        for (id, session) in sessions {
            if let Err(e) = session.close().await {
                debug!(session = %id, error = %e, "close on shutdown failed");
            }
        }
    }
}

// ─── In-flight sessions ──────────────────────────────────────────

/// Closes a request's session on a background task if the request is
/// abandoned (its handler future dropped) before the session was handed on.
pub struct SessionGuard<S: PeerSession> {
    session: Arc<S>,
    armed: bool,
}

impl<S: PeerSession> SessionGuard<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self {
            session,
            armed: true,
        }
    }

    /// The request dealt with the session itself.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl<S: PeerSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let session = Arc::clone(&self.session);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = session.close().await {
                        debug!(error = %e, "close of abandoned session failed");
                    }
                });
            }
            Err(_) => warn!("abandoned session dropped outside the runtime"),
        }
    }
}
