//! Driver side: scheduled batches of outbound connection attempts.

pub mod attempt;
pub mod load_generator;
pub mod signaling;

pub use attempt::ConnectionAttempt;
pub use load_generator::{BatchSummary, LoadGenerator, LoadPlan};
pub use signaling::SignalingClient;
