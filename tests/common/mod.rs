//! In-process stand-in for the transport library.
//!
//! Sessions gather in a few milliseconds and, once both descriptions are
//! applied, report transport-connected, secure-channel-established and
//! media-ready on a short fixed schedule. Individual steps can be slowed
//! down or stalled per test.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use rtc_handshake_bench::engine::{GatheringComplete, PeerEngine, PeerSession, SessionDescription};
use rtc_handshake_bench::error::EngineError;
use rtc_handshake_bench::instrument::{InstrumentorHandle, Role, Transition};
use rtc_handshake_bench::metrics::pipeline::PipelineConfig;

pub const GATHER_DELAY: Duration = Duration::from_millis(5);
pub const CONNECT_DELAY: Duration = Duration::from_millis(10);
pub const HANDSHAKE_DELAY: Duration = Duration::from_millis(5);

pub fn pipeline_config(path: &Path) -> PipelineConfig {
    PipelineConfig {
        output: path.to_path_buf(),
        capacity: 1_000,
        flush_every: Duration::from_millis(100),
    }
}

/// Count data rows per metric type in a latency log.
pub fn rows_by_type(text: &str) -> std::collections::BTreeMap<String, usize> {
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("timestamp,type,latencyMs"));

    let mut counts = std::collections::BTreeMap::new();
    for line in lines {
        let fields: Vec<&str> = line.split(',').collect();
        assert_eq!(fields.len(), 3, "bad row {line:?}");
        let latency: f64 = fields[2].parse().expect("numeric latency");
        assert!(latency >= 0.0, "negative latency in {line:?}");
        *counts.entry(fields[1].to_owned()).or_insert(0) += 1;
    }
    counts
}

/// Parse the latencies logged for one metric type.
pub fn latencies(text: &str, metric: &str) -> Vec<f64> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(',').collect();
            (fields.get(1) == Some(&metric)).then(|| fields[2].parse().expect("numeric latency"))
        })
        .collect()
}

/// Timing knobs for the scripted sessions. Clones share the close counter.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    apply_local_delay: Duration,
    connect_delay: Duration,
    close_delay: Duration,
    gathers: bool,
    closes: Arc<AtomicUsize>,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self {
            apply_local_delay: Duration::ZERO,
            connect_delay: CONNECT_DELAY,
            close_delay: Duration::ZERO,
            gathers: true,
            closes: Arc::default(),
        }
    }
}

impl ScriptedEngine {
    /// Applying the local description takes `delay`.
    pub fn with_apply_local_delay(mut self, delay: Duration) -> Self {
        self.apply_local_delay = delay;
        self
    }

    /// Transport connects `delay` after both descriptions are applied.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// `close()` takes `delay` before the session is actually down.
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    /// Gathering never completes.
    pub fn never_gathering(mut self) -> Self {
        self.gathers = false;
        self
    }

    /// Sessions closed so far, across every clone.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerEngine for ScriptedEngine {
    type Session = ScriptedSession;

    async fn open(&self, role: Role, observer: InstrumentorHandle) -> Result<ScriptedSession, EngineError> {
        Ok(ScriptedSession {
            role,
            script: self.clone(),
            observer,
            local: Mutex::new(None),
            remote: Mutex::new(None),
            stalled_gathering: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

pub struct ScriptedSession {
    role: Role,
    script: ScriptedEngine,
    observer: InstrumentorHandle,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    stalled_gathering: Mutex<Option<mpsc::Sender<()>>>,
    closed: Arc<AtomicBool>,
}

impl ScriptedSession {
    /// Both sides known: bring the connection up.
    fn connect_if_ready(&self) {
        if self.local.lock().is_none() || self.remote.lock().is_none() {
            return;
        }

        let observer = self.observer.clone();
        let closed = Arc::clone(&self.closed);
        let connect_delay = self.script.connect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(connect_delay).await;
            if closed.load(Ordering::SeqCst) {
                return;
            }
            observer.notify(Transition::TransportConnected);

            tokio::time::sleep(HANDSHAKE_DELAY).await;
            if closed.load(Ordering::SeqCst) {
                return;
            }
            observer.notify(Transition::SecureChannelEstablished);
            observer.notify(Transition::MediaReady);
        });
    }
}

#[async_trait]
impl PeerSession for ScriptedSession {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        if self.role != Role::Initiator {
            return Err(EngineError::at("create_offer", "responder cannot offer"));
        }
        Ok(SessionDescription::offer("v=0\r\ns=scripted-offer\r\n"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        if self.remote.lock().is_none() {
            return Err(EngineError::at("create_answer", "no remote offer"));
        }
        Ok(SessionDescription::answer("v=0\r\ns=scripted-answer\r\n"))
    }

    async fn apply_local(&self, desc: SessionDescription) -> Result<GatheringComplete, EngineError> {
        tokio::time::sleep(self.script.apply_local_delay).await;
        *self.local.lock() = Some(desc);

        let (tx, rx) = mpsc::channel(1);
        if self.script.gathers {
            tokio::spawn(async move {
                tokio::time::sleep(GATHER_DELAY).await;
                let _ = tx.send(()).await;
            });
        } else {
            // Held open for the session's lifetime.
            *self.stalled_gathering.lock() = Some(tx);
        }

        self.connect_if_ready();
        Ok(rx)
    }

    async fn apply_remote(&self, desc: SessionDescription) -> Result<(), EngineError> {
        if desc.sdp.is_empty() {
            return Err(EngineError::at("set_remote_description", "empty sdp"));
        }
        *self.remote.lock() = Some(desc);
        self.connect_if_ready();
        Ok(())
    }

    async fn local_description(&self) -> Result<SessionDescription, EngineError> {
        self.local.lock().clone().ok_or(EngineError::MissingLocalDescription)
    }

    async fn close(&self) -> Result<(), EngineError> {
        tokio::time::sleep(self.script.close_delay).await;
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.script.closes.fetch_add(1, Ordering::SeqCst);
            self.observer.notify(Transition::SessionClosed);
        }
        Ok(())
    }
}
