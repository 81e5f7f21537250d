mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{routing::post, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;

use common::{latencies, pipeline_config, rows_by_type, ScriptedEngine};
use rtc_handshake_bench::driver::{BatchSummary, LoadGenerator, LoadPlan, SignalingClient};
use rtc_handshake_bench::engine::SessionDescription;
use rtc_handshake_bench::metrics::MetricsPipeline;
use rtc_handshake_bench::responder::{create_router, ResponderState};

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn start_responder(
    dir: &std::path::Path,
) -> (SocketAddr, Arc<ResponderState<ScriptedEngine>>, Arc<MetricsPipeline>) {
    start_responder_with(dir, ScriptedEngine::default()).await
}

async fn start_responder_with(
    dir: &std::path::Path,
    engine: ScriptedEngine,
) -> (SocketAddr, Arc<ResponderState<ScriptedEngine>>, Arc<MetricsPipeline>) {
    let pipeline = MetricsPipeline::start(&pipeline_config(&dir.join("server-latencies.csv")))
        .await
        .unwrap();
    let state = ResponderState::new(Arc::new(engine), Arc::clone(&pipeline));
    let addr = serve(create_router(Arc::clone(&state), dir)).await;
    (addr, state, pipeline)
}

fn one_batch(batch_size: u32, timeout: Duration, hold: Duration) -> LoadPlan {
    LoadPlan {
        batch_size,
        interval: Duration::from_secs(1),
        attempt_timeout: timeout,
        hold,
        batches: Some(1),
    }
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cond(), "condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn eleven_concurrent_attempts_reach_media_ready() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, state, server_pipeline) = start_responder(dir.path()).await;

    let client_log = dir.path().join("client-latencies.csv");
    let driver_pipeline = MetricsPipeline::start(&pipeline_config(&client_log)).await.unwrap();
    let (_stop_tx, stop_rx) = watch::channel(false);

    let total = LoadGenerator::new(
        one_batch(11, Duration::from_secs(5), Duration::from_millis(500)),
        Arc::new(ScriptedEngine::default()),
        SignalingClient::new(&addr.to_string()),
        Arc::clone(&driver_pipeline),
        stop_rx,
    )
    .run()
    .await;

    assert_eq!(
        total,
        BatchSummary {
            launched: 11,
            succeeded: 11,
            failed: 0,
            timed_out: 0,
        }
    );
    assert_eq!(state.requests(), 11);
    assert_eq!(state.registry.len(), 11);

    // Every attempt was connected at once, and all have been closed.
    assert_eq!(driver_pipeline.sessions().peak(), 11);
    assert_eq!(driver_pipeline.sessions().current(), 0);

    assert_eq!(driver_pipeline.shutdown().await.unwrap(), 55);
    let client = rows_by_type(&std::fs::read_to_string(&client_log).unwrap());
    assert_eq!(client.len(), 5);
    for metric in ["ice_gathering", "signaling_rtt", "ice_connection", "dtls_handshake", "media_ready"] {
        assert_eq!(client.get(metric), Some(&11), "{metric}");
    }

    // Responder side: six metric types, one row each per request.
    assert_eq!(server_pipeline.sessions().current(), 11);
    state.registry.close_all().await;
    wait_for(|| server_pipeline.sessions().current() == 0).await;
    assert_eq!(server_pipeline.shutdown().await.unwrap(), 66);

    let server = rows_by_type(&std::fs::read_to_string(dir.path().join("server-latencies.csv")).unwrap());
    assert_eq!(server.len(), 6);
    for metric in [
        "signaling_processing",
        "sdp_offer_processing",
        "sdp_answer_creation",
        "ice_gathering",
        "ice_connection",
        "dtls_handshake",
    ] {
        assert_eq!(server.get(metric), Some(&11), "{metric}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unanswered_offer_times_out_without_partial_rows() {
    let dir = tempfile::tempdir().unwrap();
    let silent = Router::new().route("/doSignaling", post(|| std::future::pending::<&'static str>()));
    let addr = serve(silent).await;

    let client_log = dir.path().join("client-latencies.csv");
    let pipeline = MetricsPipeline::start(&pipeline_config(&client_log)).await.unwrap();
    let (_stop_tx, stop_rx) = watch::channel(false);

    let total = LoadGenerator::new(
        one_batch(1, Duration::from_millis(300), Duration::ZERO),
        Arc::new(ScriptedEngine::default()),
        SignalingClient::new(&addr.to_string()),
        Arc::clone(&pipeline),
        stop_rx,
    )
    .run()
    .await;

    assert_eq!(total.timed_out, 1);
    assert_eq!(total.succeeded, 0);
    assert_eq!(pipeline.sessions().peak(), 0);

    // Gathering finished before the offer went out; nothing after it did.
    assert_eq!(pipeline.shutdown().await.unwrap(), 1);
    let rows = rows_by_type(&std::fs::read_to_string(&client_log).unwrap());
    assert_eq!(rows.get("ice_gathering"), Some(&1));
    assert_eq!(rows.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gathering_excludes_applying_the_local_description() {
    let dir = tempfile::tempdir().unwrap();
    let slow_apply = || ScriptedEngine::default().with_apply_local_delay(Duration::from_millis(200));
    let (addr, state, server_pipeline) = start_responder_with(dir.path(), slow_apply()).await;

    let client_log = dir.path().join("client-latencies.csv");
    let driver_pipeline = MetricsPipeline::start(&pipeline_config(&client_log)).await.unwrap();
    let (_stop_tx, stop_rx) = watch::channel(false);

    let total = LoadGenerator::new(
        one_batch(1, Duration::from_secs(5), Duration::ZERO),
        Arc::new(slow_apply()),
        SignalingClient::new(&addr.to_string()),
        Arc::clone(&driver_pipeline),
        stop_rx,
    )
    .run()
    .await;
    assert_eq!(total.succeeded, 1);

    driver_pipeline.shutdown().await.unwrap();
    state.registry.close_all().await;
    wait_for(|| server_pipeline.sessions().current() == 0).await;
    server_pipeline.shutdown().await.unwrap();

    // Gathering itself takes a few milliseconds; the 200 ms apply is not in it.
    for log in ["client-latencies.csv", "server-latencies.csv"] {
        let text = std::fs::read_to_string(dir.path().join(log)).unwrap();
        let gathering = latencies(&text, "ice_gathering");
        assert_eq!(gathering.len(), 1, "{log}");
        assert!(gathering[0] < 100.0, "{log}: ice_gathering {}ms", gathering[0]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_transitions_after_timeout_write_no_rows() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state, _server) = start_responder(dir.path()).await;

    let client_log = dir.path().join("client-latencies.csv");
    let pipeline = MetricsPipeline::start(&pipeline_config(&client_log)).await.unwrap();
    let (_stop_tx, stop_rx) = watch::channel(false);

    // Transport comes up while the timed-out attempt is still closing.
    let engine = ScriptedEngine::default()
        .with_connect_delay(Duration::from_millis(400))
        .with_close_delay(Duration::from_millis(300));

    let total = LoadGenerator::new(
        one_batch(1, Duration::from_millis(200), Duration::ZERO),
        Arc::new(engine.clone()),
        SignalingClient::new(&addr.to_string()),
        Arc::clone(&pipeline),
        stop_rx,
    )
    .run()
    .await;

    assert_eq!(total.timed_out, 1);
    assert_eq!(engine.closes(), 1);
    assert_eq!(pipeline.sessions().peak(), 0);
    assert_eq!(pipeline.sessions().current(), 0);

    assert_eq!(pipeline.shutdown().await.unwrap(), 2);
    let rows = rows_by_type(&std::fs::read_to_string(&client_log).unwrap());
    assert_eq!(rows.get("ice_gathering"), Some(&1));
    assert_eq!(rows.get("signaling_rtt"), Some(&1));
    assert_eq!(rows.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_request_closes_its_session() {
    let dir = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::default().never_gathering();
    let (addr, state, server_pipeline) = start_responder_with(dir.path(), engine.clone()).await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let result = client
        .post(format!("http://{addr}/doSignaling"))
        .json(&SessionDescription::offer("v=0\r\ns=stalled\r\n"))
        .send()
        .await;
    assert!(result.unwrap_err().is_timeout());

    wait_for(|| engine.closes() == 1).await;
    assert_eq!(state.requests(), 1);
    assert!(state.registry.is_empty());

    // The handler was dropped partway: no gathering row, but the request
    // itself was still timed.
    assert_eq!(server_pipeline.shutdown().await.unwrap(), 3);
    let rows = rows_by_type(&std::fs::read_to_string(dir.path().join("server-latencies.csv")).unwrap());
    assert_eq!(rows.get("signaling_processing"), Some(&1));
    assert_eq!(rows.get("sdp_offer_processing"), Some(&1));
    assert_eq!(rows.get("sdp_answer_creation"), Some(&1));
    assert_eq!(rows.len(), 3);
    assert_eq!(engine.closes(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capped_schedule_runs_every_batch() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state, _server) = start_responder(dir.path()).await;

    let pipeline = MetricsPipeline::start(&pipeline_config(&dir.path().join("client-latencies.csv")))
        .await
        .unwrap();
    let (_stop_tx, stop_rx) = watch::channel(false);

    let plan = LoadPlan {
        batch_size: 3,
        interval: Duration::from_millis(100),
        attempt_timeout: Duration::from_secs(5),
        hold: Duration::ZERO,
        batches: Some(3),
    };
    let total = LoadGenerator::new(
        plan,
        Arc::new(ScriptedEngine::default()),
        SignalingClient::new(&addr.to_string()),
        Arc::clone(&pipeline),
        stop_rx,
    )
    .run()
    .await;

    assert_eq!(total.launched, 9);
    assert_eq!(total.succeeded, 9);
    assert_eq!(pipeline.shutdown().await.unwrap(), 45);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_signal_ends_schedule_and_cuts_hold_short() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state, _server) = start_responder(dir.path()).await;

    let pipeline = MetricsPipeline::start(&pipeline_config(&dir.path().join("client-latencies.csv")))
        .await
        .unwrap();
    let (stop_tx, stop_rx) = watch::channel(false);

    let plan = LoadPlan {
        batch_size: 2,
        interval: Duration::from_millis(50),
        attempt_timeout: Duration::from_secs(5),
        hold: Duration::from_secs(10),
        batches: None,
    };
    let generator = LoadGenerator::new(
        plan,
        Arc::new(ScriptedEngine::default()),
        SignalingClient::new(&addr.to_string()),
        Arc::clone(&pipeline),
        stop_rx,
    );

    let started = Instant::now();
    let run = tokio::spawn(generator.run());
    tokio::time::sleep(Duration::from_millis(300)).await;
    stop_tx.send_replace(true);

    let total = run.await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(total.launched >= 2);
    assert_eq!(total.launched % 2, 0);
    assert_eq!(total.succeeded + total.failed + total.timed_out, total.launched);
    assert_eq!(pipeline.sessions().current(), 0);
    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_offer_is_rejected_and_still_timed() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, state, server_pipeline) = start_responder(dir.path()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/doSignaling"))
        .body("this is not a session description")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(response.headers().contains_key("x-response-time-us"));
    let timing = response.headers()["server-timing"].to_str().unwrap();
    assert!(timing.starts_with("signaling;dur="), "{timing}");
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], 400);
    assert!(body["error"].as_str().unwrap().starts_with("malformed offer"));

    assert_eq!(state.requests(), 1);
    assert!(state.registry.is_empty());

    assert_eq!(server_pipeline.shutdown().await.unwrap(), 1);
    let rows = rows_by_type(&std::fs::read_to_string(dir.path().join("server-latencies.csv")).unwrap());
    assert_eq!(rows.get("signaling_processing"), Some(&1));
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn static_dir_is_served_as_fallback() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<html>bench</html>").unwrap();
    let (addr, _state, _server) = start_responder(dir.path()).await;

    let response = reqwest::get(format!("http://{addr}/index.html")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "<html>bench</html>");
}
