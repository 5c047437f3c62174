use hec_log_shipper::app::Config;
use hec_log_shipper::domain::{LogEvent, Severity, StaticFields};
use hec_log_shipper::pipeline::{Pipeline, SubmitOutcome};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub fn config_for(server: &MockServer) -> Config {
    Config {
        endpoint_url_template: format!("{}/services/collector/event", server.uri()),
        tenant: "acme".to_string(),
        api_key: "test-key".to_string(),
        flush_interval_secs: 60.0,
        flush_threshold: Some(10_000),
        retry_base_delay_ms: 100,
        retry_max_delay_ms: 1_000,
        retry_jitter: false,
        ..Config::default()
    }
}

pub fn fields() -> Arc<StaticFields> {
    Arc::new(StaticFields::from_iter([("appversion", "1.0.0")]))
}

/// `event.message` of every record in every received request, per request.
pub async fn received_messages(server: &MockServer) -> Vec<Vec<String>> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| {
            std::str::from_utf8(&request.body)
                .unwrap()
                .lines()
                .map(|line| {
                    let value: Value = serde_json::from_str(line).unwrap();
                    value["event"]["message"].as_str().unwrap().to_string()
                })
                .collect()
        })
        .collect()
}

fn submit_numbered(pipeline: &Pipeline, count: usize) {
    for i in 0..count {
        let outcome = pipeline.submit(LogEvent::new(Severity::Info, format!("event-{i}")));
        assert!(outcome.is_accepted());
    }
}

fn numbered(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("event-{i}")).collect()
}

#[tokio::test]
async fn test_flush_splits_by_count_in_order() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/collector/event"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&mock_server)
        .await;

    let config = Config {
        max_batch_count: 3,
        ..config_for(&mock_server)
    };
    let pipeline = Pipeline::spawn(&config, fields()).unwrap();
    submit_numbered(&pipeline, 7);

    let report = pipeline.flush().await.unwrap();

    assert_eq!(report.requests, 3);
    assert_eq!(report.records_delivered, 7);
    assert_eq!(
        received_messages(&mock_server).await,
        vec![numbered(0..3), numbered(3..6), numbered(6..7)]
    );
    assert_eq!(pipeline.buffered(), 0);
    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_server_error_is_retried_after_backoff() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let pipeline = Pipeline::spawn(&config_for(&mock_server), fields()).unwrap();
    submit_numbered(&pipeline, 2);

    let started = Instant::now();
    let report = pipeline.flush().await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(report.retries, 1);
    assert_eq!(report.records_delivered, 2);

    let requests = received_messages(&mock_server).await;
    assert_eq!(requests, vec![numbered(0..2), numbered(0..2)]);

    let snapshot = pipeline.shutdown().await.unwrap();
    assert_eq!(snapshot.retries, 1);
    assert_eq!(snapshot.records_delivered, 2);
    assert_eq!(snapshot.total_dropped(), 0);
}

#[tokio::test]
async fn test_unauthorized_drops_batch_without_retry() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    let pipeline = Pipeline::spawn(&config_for(&mock_server), fields()).unwrap();
    submit_numbered(&pipeline, 4);

    let report = pipeline.flush().await.unwrap();
    assert_eq!(report.retries, 0);
    assert_eq!(report.records_dropped, 4);

    let snapshot = pipeline.shutdown().await.unwrap();
    assert_eq!(snapshot.dropped_fatal, 4);
    assert_eq!(snapshot.http_requests, 1);
}

#[tokio::test]
async fn test_repeated_failures_still_deliver_every_record() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).insert_header("retry-after", "0"))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let pipeline = Pipeline::spawn(&config_for(&mock_server), fields()).unwrap();
    submit_numbered(&pipeline, 5);

    let report = pipeline.flush().await.unwrap();

    assert_eq!(report.requests, 3);
    assert_eq!(report.records_delivered, 5);
    let requests = received_messages(&mock_server).await;
    assert_eq!(requests.last().unwrap(), &numbered(0..5));
    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_retries_give_up_after_max_attempts() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let config = Config {
        retry_max_attempts: 3,
        retry_base_delay_ms: 10,
        ..config_for(&mock_server)
    };
    let pipeline = Pipeline::spawn(&config, fields()).unwrap();
    submit_numbered(&pipeline, 2);

    let report = pipeline.flush().await.unwrap();
    assert_eq!(report.retries, 2);
    assert_eq!(report.records_dropped, 2);

    let snapshot = pipeline.shutdown().await.unwrap();
    assert_eq!(snapshot.dropped_retry_exhausted, 2);
}

#[tokio::test]
async fn test_bounded_buffer_ships_newest_records() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let config = Config {
        max_buffered_records: 10,
        max_batch_count: 10,
        ..config_for(&mock_server)
    };
    let pipeline = Pipeline::spawn(&config, fields()).unwrap();

    let dropped = (0..15)
        .map(|i| pipeline.submit(LogEvent::new(Severity::Info, format!("event-{i}"))))
        .filter(|outcome| *outcome == SubmitOutcome::AcceptedDroppedOldest)
        .count();
    assert_eq!(dropped, 5);

    pipeline.flush().await.unwrap();

    assert_eq!(received_messages(&mock_server).await, vec![numbered(5..15)]);
    let snapshot = pipeline.shutdown().await.unwrap();
    assert_eq!(snapshot.dropped_overflow, 5);
    assert_eq!(snapshot.records_delivered, 10);
}

#[tokio::test]
async fn test_threshold_triggers_flush_without_request() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let config = Config {
        flush_threshold: Some(5),
        ..config_for(&mock_server)
    };
    let pipeline = Pipeline::spawn(&config, fields()).unwrap();
    submit_numbered(&pipeline, 5);

    let deadline = Instant::now() + Duration::from_secs(5);
    while pipeline.metrics().records_delivered < 5 {
        assert!(Instant::now() < deadline, "threshold flush never happened");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_interval_flush() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let config = Config {
        flush_interval_secs: 0.1,
        ..config_for(&mock_server)
    };
    let pipeline = Pipeline::spawn(&config, fields()).unwrap();
    submit_numbered(&pipeline, 2);

    let deadline = Instant::now() + Duration::from_secs(5);
    while pipeline.metrics().records_delivered < 2 {
        assert!(Instant::now() < deadline, "interval flush never happened");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_first_response_is_exposed() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"text":"Success","code":0}"#))
        .mount(&mock_server)
        .await;

    let config = Config {
        output_first_response: true,
        ..config_for(&mock_server)
    };
    let pipeline = Pipeline::spawn(&config, fields()).unwrap();
    assert!(pipeline.first_response().is_none());

    submit_numbered(&pipeline, 1);
    pipeline.flush().await.unwrap();

    let first = pipeline.first_response().unwrap();
    assert_eq!(first.status, 200);
    assert!(first.body.contains("Success"));
    pipeline.shutdown().await.unwrap();
}
