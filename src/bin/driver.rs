use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use rtc_handshake_bench::config::DriverArgs;
use rtc_handshake_bench::driver::{LoadGenerator, SignalingClient};
use rtc_handshake_bench::engine::rtc::WebRtcEngine;
use rtc_handshake_bench::logging;
use rtc_handshake_bench::metrics::MetricsPipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = DriverArgs::parse();
    logging::init();

    // ── 1. Latency log ──────────────────────────────────────────
    let pipeline = MetricsPipeline::start(&args.pipeline_config()).await?;
    info!(path = %args.output.display(), "writing driver latencies");

    // ── 2. Engine + signaling channel ───────────────────────────
    let engine = Arc::new(WebRtcEngine::initiator().context("building peer connection api")?);
    let signaling = SignalingClient::new(&args.responder);
    info!(url = signaling.url(), "targeting responder");

    // ── 3. Run the schedule until the batch cap or Ctrl-C ───────
    let (stop_tx, stop_rx) = watch::channel(false);
    let generator = LoadGenerator::new(args.plan(), engine, signaling, Arc::clone(&pipeline), stop_rx).run();
    tokio::pin!(generator);

    let total = tokio::select! {
        total = &mut generator => total,
        Ok(()) = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, waiting for outstanding attempts");
            stop_tx.send_replace(true);
            generator.await
        }
    };

    // ── 4. Drain and sync the log ───────────────────────────────
    let rows = pipeline.shutdown().await?;
    info!(
        rows,
        dropped = pipeline.dropped(),
        succeeded = total.succeeded,
        failed = total.failed,
        timed_out = total.timed_out,
        "driver finished"
    );
    Ok(())
}
