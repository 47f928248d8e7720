//! End-to-end: flow bus -> dispatcher -> demo-mode gate -> real listener.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mock_analysis_core::config::keys;
use mock_analysis_core::{AppSettings, ConfigSource, FlowKind, FlowPublisher, LocalFlowBus};
use mock_analysis_server::flow::{DemoModeGate, DispatchStats, FlowDispatcher, StartOutcome};
use mock_analysis_server::network::{ListenerState, ServerStarter, ShutdownController};
use reqwest::multipart::Form;
use reqwest::StatusCode;
use tempfile::TempDir;
use tokio::task::JoinHandle;

const REPORT_BYTES: &[u8] = b"DICM-report";
const MAP_BYTES: &[u8] = b"DICM-map";
const COMBINED_BYTES: &[u8] = b"DICM-combined";
const LABEL_BYTES: &[u8] = b"\x89PNG-label";

struct Harness {
    _content_root: TempDir,
    shutdown: Arc<ShutdownController>,
    gate: Arc<DemoModeGate>,
    publisher: FlowPublisher,
    dispatching: JoinHandle<DispatchStats>,
    client: reqwest::Client,
}

impl Harness {
    fn new(pairs: &[(&str, &str)]) -> Self {
        let content_root = tempfile::tempdir().unwrap();
        write_data(content_root.path());

        let mut settings = AppSettings::from_pairs([
            (keys::LISTENER_PRIMARY_PORT, "0"),
            (keys::LISTENER_LICENSE_PORT, "0"),
        ]);
        for (key, value) in pairs {
            settings.set(key, *value);
        }
        let config: Arc<dyn ConfigSource> = Arc::new(settings);

        let shutdown = Arc::new(ShutdownController::new());
        let starter = ServerStarter::new(config, content_root.path(), Arc::clone(&shutdown));
        let gate = Arc::new(DemoModeGate::new(Arc::new(starter)));

        let dispatcher = Arc::new(FlowDispatcher::new());
        let handler_gate = Arc::clone(&gate);
        dispatcher.register(FlowKind::DEMO_MODE, move |_| {
            handler_gate.on_trigger();
            Ok(())
        });

        let (publisher, bus) = LocalFlowBus::new();
        let dispatching = dispatcher.start_dispatching(bus, Arc::clone(&shutdown));

        Self {
            _content_root: content_root,
            shutdown,
            gate,
            publisher,
            dispatching,
            client: reqwest::Client::new(),
        }
    }

    /// Publishes `DemoMode` and returns the bound addresses.
    async fn open_gate(&self) -> Vec<SocketAddr> {
        self.publisher.publish(FlowKind::DEMO_MODE).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), self.gate.wait_for_outcome())
            .await
            .expect("gate should report an outcome");
        match outcome {
            StartOutcome::Started(addrs) => addrs,
            other => panic!("listener did not start: {other:?}"),
        }
    }

    async fn infer(&self, addr: SocketAddr, parameters: &str) -> reqwest::Response {
        let form = Form::new().text("parameters", parameters.to_string());
        self.client
            .post(format!("http://{addr}/api/v1/inference"))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    async fn stop(self) -> DispatchStats {
        self.shutdown.trigger_shutdown();
        let stats = tokio::time::timeout(Duration::from_secs(5), self.dispatching)
            .await
            .expect("dispatcher should stop")
            .unwrap();
        if let Some(result) = self.gate.join_listener().await {
            result.unwrap();
        }
        stats
    }
}

fn write_data(root: &Path) {
    let data = root.join("Data");
    std::fs::create_dir_all(&data).unwrap();
    std::fs::write(data.join("response"), COMBINED_BYTES).unwrap();
    std::fs::write(data.join("scReport0.dcm"), REPORT_BYTES).unwrap();
    std::fs::write(data.join("scMap0.dcm"), MAP_BYTES).unwrap();
    std::fs::write(data.join("label.png"), LABEL_BYTES).unwrap();
}

fn creation(report: bool, map: bool) -> String {
    format!(r#"{{"creation":{{"sc_report":{report},"sc_map":{map}}}}}"#)
}

#[tokio::test]
async fn no_listener_before_demo_mode() {
    let harness = Harness::new(&[]);
    harness
        .publisher
        .publish(FlowKind::from_static("ServiceMode"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!harness.gate.is_started());
    assert!(harness.gate.listener_addrs().is_none());
    assert_eq!(harness.shutdown.state(), ListenerState::NotStarted);

    let stats = harness.stop().await;
    assert_eq!(stats.unhandled, 1);
}

#[tokio::test]
async fn demo_mode_serves_artifacts_and_label() {
    let harness = Harness::new(&[]);
    let addrs = harness.open_gate().await;
    assert_eq!(addrs.len(), 1, "license port is not bound without the mock");
    let addr = addrs[0];

    for (report, map, expected) in [
        (true, true, COMBINED_BYTES),
        (true, false, REPORT_BYTES),
        (false, true, MAP_BYTES),
    ] {
        let response = harness.infer(addr, &creation(report, map)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/dicom");
        assert_eq!(response.bytes().await.unwrap().as_ref(), expected);
    }

    let response = harness.infer(addr, &creation(false, false)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = harness.infer(addr, "{not json").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.text().await.unwrap(),
        "Invalid JSON in the 'parameters' field."
    );

    let label = harness
        .client
        .get(format!("http://{addr}/api/v1/label/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(label.status(), StatusCode::OK);
    assert_eq!(label.headers()["content-type"], "image/png");
    assert!(label.headers().contains_key("x-request-id"));
    assert_eq!(label.bytes().await.unwrap().as_ref(), LABEL_BYTES);

    let keys = harness
        .client
        .get(format!("http://{addr}/api/keys"))
        .send()
        .await
        .unwrap();
    assert_eq!(keys.status(), StatusCode::NOT_FOUND);

    harness.stop().await;
}

#[tokio::test]
async fn repeated_demo_mode_keeps_one_listener() {
    let harness = Harness::new(&[]);
    let first = harness.open_gate().await;

    for _ in 0..3 {
        harness.publisher.publish(FlowKind::DEMO_MODE).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.gate.listener_addrs(), Some(first.clone()));
    let response = harness.infer(first[0], &creation(true, false)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let stats = harness.stop().await;
    assert_eq!(stats.handled, 4);
}

#[tokio::test]
async fn license_mock_binds_second_port_and_serves_keys() {
    let harness = Harness::new(&[
        (keys::MOCK_LICENSE_ENABLED, "true"),
        (keys::LICENSE_IS_USABLE, "false"),
        (keys::LICENSE_CURRENT_USAGE_COUNT, "7"),
    ]);
    let addrs = harness.open_gate().await;
    assert_eq!(addrs.len(), 2);

    for addr in &addrs {
        let records: serde_json::Value = harness
            .client
            .get(format!("http://{addr}/api/keys"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let records = records.as_array().expect("keys returns an array");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], "44157676413252866");
        assert_eq!(records[0]["is_usable"], false);
        assert_eq!(records[0]["current_usage_count"], 7);
        assert_eq!(records[0]["expiration_date"], "2031-09-01");
    }

    harness.stop().await;
}

#[tokio::test]
async fn configured_delay_holds_the_response() {
    let harness = Harness::new(&[(keys::INFERENCE_DELAY_SECONDS, "1")]);
    let addr = harness.open_gate().await[0];

    let started = Instant::now();
    let response = harness.infer(addr, &creation(false, true)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(started.elapsed() >= Duration::from_secs(1));

    // Invalid requests are rejected before the delay.
    let started = Instant::now();
    let response = harness.infer(addr, &creation(false, false)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(started.elapsed() < Duration::from_secs(1));

    harness.stop().await;
}

#[tokio::test]
async fn delay_longer_than_request_timeout_still_returns_artifact() {
    let harness = Harness::new(&[
        (keys::INFERENCE_DELAY_SECONDS, "2"),
        (keys::LISTENER_REQUEST_TIMEOUT_SECONDS, "1"),
    ]);
    let addr = harness.open_gate().await[0];

    let started = Instant::now();
    let response = harness.infer(addr, &creation(false, true)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().as_ref(), MAP_BYTES);
    assert!(started.elapsed() >= Duration::from_secs(2));

    harness.stop().await;
}

#[tokio::test]
async fn malformed_setting_fails_start_without_retry() {
    let harness = Harness::new(&[(keys::INFERENCE_DELAY_SECONDS, "soon")]);
    harness.publisher.publish(FlowKind::DEMO_MODE).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), harness.gate.wait_for_outcome())
        .await
        .unwrap();
    match outcome {
        StartOutcome::Failed(cause) => assert!(cause.contains("LunitAnalysisWaitime")),
        other => panic!("expected a startup failure, got {other:?}"),
    }

    harness.publisher.publish(FlowKind::DEMO_MODE).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.gate.listener_addrs().is_none());

    harness.stop().await;
}

#[tokio::test]
async fn shutdown_cancels_pending_inference_and_drains() {
    let harness = Harness::new(&[(keys::INFERENCE_DELAY_SECONDS, "60")]);
    let addr = harness.open_gate().await[0];
    assert_eq!(harness.shutdown.state(), ListenerState::Listening);

    let client = harness.client.clone();
    let pending = tokio::spawn(async move {
        let form = Form::new().text("parameters", creation(true, true));
        client
            .post(format!("http://{addr}/api/v1/inference"))
            .multipart(form)
            .send()
            .await
    });

    // Wait until the request is inside the delay.
    let deadline = Instant::now() + Duration::from_secs(5);
    while harness.shutdown.in_flight_count() == 0 {
        assert!(Instant::now() < deadline, "request never reached the handler");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let shutdown = Arc::clone(&harness.shutdown);
    harness.stop().await;

    let response = pending.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.text().await.unwrap(), "Server is shutting down.");
    assert_eq!(shutdown.state(), ListenerState::Stopped);
}
