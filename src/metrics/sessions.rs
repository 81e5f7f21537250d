use std::sync::atomic::{AtomicI64, Ordering};

/// Count of currently-established sessions.
///
/// Only two mutation points exist: `connected()` on transport-connected and
/// `closed()` on the terminal transition. Both are single atomic RMW ops.
#[derive(Debug, Default)]
pub struct ActiveSessionCounter {
    current: AtomicI64,
    peak: AtomicI64,
}

impl ActiveSessionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the count after the increment.
    pub fn connected(&self) -> i64 {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        now
    }

    /// Returns the count after the decrement.
    pub fn closed(&self) -> i64 {
        self.current.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest value ever observed.
    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::SeqCst)
    }
}
