use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use rtc_handshake_bench::config::ResponderArgs;
use rtc_handshake_bench::engine::media;
use rtc_handshake_bench::engine::rtc::WebRtcEngine;
use rtc_handshake_bench::error::HarnessError;
use rtc_handshake_bench::logging;
use rtc_handshake_bench::metrics::{MetricsPipeline, ResourceSampler, SystemCpu};
use rtc_handshake_bench::responder::{create_router, ResponderState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ResponderArgs::parse();
    logging::init();

    // ── 1. Outputs and media ────────────────────────────────────
    media::check_media_file(&args.media_file).await?;
    let pipeline = MetricsPipeline::start(&args.pipeline_config()).await?;
    let sampler = ResourceSampler::create(
        &args.report,
        SystemCpu::new(),
        Arc::clone(&pipeline),
        args.report_interval(),
    )
    .await?;

    // ── 2. Engine with the shared outbound track ────────────────
    let engine = Arc::new(WebRtcEngine::responder().context("building peer connection api")?);
    if let Some(track) = engine.outbound_track() {
        tokio::spawn(media::play_forever(track, args.media_file.clone()));
    }

    let sampler_task = tokio::spawn(async move {
        if let Err(e) = sampler.run().await {
            error!(error = %e, "resource sampler stopped");
        }
    });

    // ── 3. Router ───────────────────────────────────────────────
    let state = ResponderState::new(engine, Arc::clone(&pipeline));
    let app = create_router(Arc::clone(&state), &args.static_dir);

    // ── 4. Bind & serve ─────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .map_err(|source| HarnessError::Bind {
            addr: args.listen.to_string(),
            source,
        })?;
    info!(
        addr = %args.listen,
        static_dir = %args.static_dir.display(),
        latencies = %args.latencies.display(),
        report = %args.report.display(),
        "responder listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("ctrl-c received, shutting down");
        })
        .await
        .map_err(HarnessError::Io)?;

    // ── 5. Tear down ────────────────────────────────────────────
    state.registry.close_all().await;
    sampler_task.abort();
    let rows = pipeline.shutdown().await?;
    info!(rows, requests = state.requests(), dropped = pipeline.dropped(), "responder finished");
    Ok(())
}
