use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use siem_pipeline::config::{Config, PipelineMode};
use siem_pipeline::ingress::http::router;
use siem_pipeline::persistence::counter_key;
use siem_pipeline::worker::WorkerError;
use siem_pipeline::{AlertStatus, AlertStore, CounterStore, Pipeline, Publisher, Record, SqliteStore};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn build(index_url: &str, mode: PipelineMode) -> Arc<Pipeline> {
    let mut config = Config::default();
    config.index.url = index_url.to_string();
    config.pipeline.mode = mode;
    config.pipeline.read_backoff_ms = 50;
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    Arc::new(Pipeline::with_store(config, store).unwrap())
}

async fn wait_for<F: Fn() -> bool>(check: F) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn wait_for_requests(server: &MockServer, count: usize) -> Vec<wiremock::Request> {
    for _ in 0..300 {
        let requests = server.received_requests().await.unwrap();
        if requests.len() >= count {
            return requests;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("index did not receive {} request(s)", count);
}

async fn publish_alert(pipeline: &Pipeline, payload: &str) {
    let broker = pipeline.memory_broker().unwrap();
    broker
        .publish(
            "alerts",
            vec![Record {
                key: None,
                value: payload.as_bytes().to_vec(),
            }],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_ingested_event_reaches_the_index() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events/_doc"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let pipeline = build(&server.uri(), PipelineMode::Legacy);
    let indexer = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run_event_indexer().await })
    };

    let receipt = pipeline
        .ingestor()
        .ingest("t1", vec![json!({"ip": "1.2.3.4"})])
        .await
        .unwrap();
    assert_eq!(receipt.event_count, 1);
    assert_eq!(receipt.tenant_id, "t1");

    let requests = wait_for_requests(&server, 1).await;
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["tenant_id"], "t1");
    assert_eq!(body["source"], "agent");
    assert_eq!(body["ip"], "1.2.3.4");

    indexer.abort();
}

#[tokio::test]
async fn test_index_failure_does_not_block_later_events() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let pipeline = build(&server.uri(), PipelineMode::Legacy);
    let ingestor = pipeline.ingestor();
    ingestor.ingest("t1", vec![json!({"n": 1})]).await.unwrap();
    ingestor.ingest("t1", vec![json!({"n": 2})]).await.unwrap();

    let indexer = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run_event_indexer().await })
    };

    let requests = wait_for_requests(&server, 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    // the failed document is not retried
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
    let second: Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(second["n"], 2);

    indexer.abort();
}

#[tokio::test]
async fn test_alert_lifecycle_through_the_writer() {
    let pipeline = build("http://127.0.0.1:9", PipelineMode::Legacy);
    let store = pipeline.store();
    let writer = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run_alert_writer().await })
    };

    publish_alert(&pipeline, r#"{"id":"a1","severity":"critical","rule_name":"Brute Force"}"#).await;
    wait_for(|| store.get_alert("a1").unwrap().is_some()).await;

    let row = store.get_alert("a1").unwrap().unwrap();
    assert_eq!(row.severity, "critical");
    assert_eq!(row.status, AlertStatus::Open);
    assert_eq!(row.title, "Brute Force");

    // an analyst resolves it, then the same alert is redelivered
    store.set_status("a1", AlertStatus::Resolved, chrono::Utc::now()).unwrap();
    publish_alert(&pipeline, r#"{"id":"a1","severity":"low"}"#).await;
    wait_for(|| store.get_alert("a1").unwrap().unwrap().severity == "low").await;

    let row = store.get_alert("a1").unwrap().unwrap();
    assert_eq!(row.status, AlertStatus::Open);
    assert_eq!(row.title, "Detection Alert");
    assert_eq!(store.count_alerts().unwrap(), 1);

    writer.abort();
}

#[tokio::test]
async fn test_malformed_and_empty_alerts() {
    let pipeline = build("http://127.0.0.1:9", PipelineMode::Legacy);
    let store = pipeline.store();
    let writer = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run_alert_writer().await })
    };

    publish_alert(&pipeline, "this is not json").await;
    publish_alert(&pipeline, "{}").await;
    wait_for(|| store.count_alerts().unwrap() == 1).await;

    let rows = store.list_alerts("default").unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert!(row.id.starts_with("alert-"));
    assert_eq!(row.severity, "medium");
    assert_eq!(row.title, "Detection Alert");
    assert_eq!(row.status, AlertStatus::Open);
    assert!(!writer.is_finished());

    writer.abort();
}

#[tokio::test]
async fn test_legacy_read_error_stops_only_the_alert_writer() {
    let pipeline = build("http://127.0.0.1:9", PipelineMode::Legacy);

    let indexer = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run_event_indexer().await })
    };
    let writer = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run_alert_writer().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    pipeline.close();

    let result = tokio::time::timeout(Duration::from_secs(2), writer)
        .await
        .expect("alert writer should stop")
        .unwrap();
    assert!(matches!(result, Err(WorkerError::Read { .. })));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!indexer.is_finished(), "indexer keeps retrying");
    indexer.abort();
}

#[tokio::test]
async fn test_hardened_writer_survives_read_errors() {
    let pipeline = build("http://127.0.0.1:9", PipelineMode::Hardened);
    let writer = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run_alert_writer().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    pipeline.close();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!writer.is_finished());
    writer.abort();
}

fn ingest_request(tenant: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/events")
        .header("content-type", "application/json")
        .header("x-tenant-id", tenant)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_http_batch_is_published_and_counted() {
    let pipeline = build("http://127.0.0.1:9", PipelineMode::Legacy);
    let app = router(pipeline.ingestor());

    let response = app
        .oneshot(ingest_request("t1", json!({"events": [{"a": 1}, {"b": 2}]})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let published = pipeline.memory_broker().unwrap().messages("events");
    assert_eq!(published.len(), 2);
    for delivery in &published {
        assert_eq!(delivery.key.as_deref(), Some(b"t1".as_slice()));
        let event: Value = serde_json::from_slice(&delivery.value).unwrap();
        assert_eq!(event["tenant_id"], "t1");
    }
    assert_eq!(pipeline.store().get(&counter_key("t1")).unwrap(), 2);
}

#[tokio::test]
async fn test_publish_failure_by_mode() {
    let legacy = build("http://127.0.0.1:9", PipelineMode::Legacy);
    legacy.close();
    let response = router(legacy.ingestor())
        .oneshot(ingest_request("t1", json!({"events": [{"a": 1}]})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    // the counter is bumped even though nothing was enqueued
    assert_eq!(legacy.store().get(&counter_key("t1")).unwrap(), 1);

    let hardened = build("http://127.0.0.1:9", PipelineMode::Hardened);
    hardened.close();
    let response = router(hardened.ingestor())
        .oneshot(ingest_request("t1", json!({"events": [{"a": 1}]})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_hardened_failures_go_to_the_dead_letter_topic() {
    let mut config = Config::default();
    config.pipeline.mode = PipelineMode::Hardened;
    config.pipeline.dead_letter_topic = Some("siem-dlq".to_string());
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let pipeline = Arc::new(Pipeline::with_store(config, store).unwrap());

    let writer = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run_alert_writer().await })
    };
    publish_alert(&pipeline, "[1, 2").await;

    let broker = pipeline.memory_broker().unwrap();
    wait_for(|| broker.messages("siem-dlq").len() == 1).await;

    let envelope: Value = serde_json::from_slice(&broker.messages("siem-dlq")[0].value).unwrap();
    assert_eq!(envelope["source_topic"], "alerts");
    assert_eq!(envelope["payload"], "[1, 2");
    assert_eq!(pipeline.store().count_alerts().unwrap(), 0);

    writer.abort();
}
