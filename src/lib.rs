//! Load generation and latency instrumentation for WebRTC connection setup.
//!
//! Two processes share this crate. The driver (`handshake-driver`) opens
//! batches of concurrent connections against the responder
//! (`handshake-responder`), which answers over HTTP and streams a looped
//! video file to every session. Both sides stamp lifecycle milestones per
//! connection and append the derived latencies to a CSV log; the responder
//! also writes a periodic resource report.

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod metrics;
pub mod responder;

pub use error::{AppError, AttemptError, EngineError, HarnessError};
