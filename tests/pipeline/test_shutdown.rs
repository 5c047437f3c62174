use crate::test_delivery_scenarios::{config_for, fields};
use hec_log_shipper::ShipperError;
use hec_log_shipper::app::Config;
use hec_log_shipper::domain::{LogEvent, Severity};
use hec_log_shipper::pipeline::{Pipeline, SubmitOutcome};
use hec_log_shipper::sender::DropReason;
use std::time::{Duration, Instant};
use wiremock::{Mock, MockServer, ResponseTemplate, matchers::method};

#[tokio::test]
async fn test_shutdown_delivers_buffered_records() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let pipeline = Pipeline::spawn(&config_for(&mock_server), fields()).unwrap();
    for i in 0..3 {
        pipeline.submit(LogEvent::new(Severity::Info, format!("event-{i}")));
    }

    let snapshot = pipeline.shutdown().await.unwrap();
    assert_eq!(snapshot.records_delivered, 3);
    assert_eq!(snapshot.dropped_on_shutdown, 0);
}

#[tokio::test]
async fn test_shutdown_does_not_retry() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let pipeline = Pipeline::spawn(&config_for(&mock_server), fields()).unwrap();
    for i in 0..4 {
        pipeline.submit(LogEvent::new(Severity::Info, format!("event-{i}")));
    }

    let snapshot = pipeline.shutdown().await.unwrap();
    assert_eq!(snapshot.retries, 0);
    assert_eq!(snapshot.dropped_on_shutdown, 4);
    assert_eq!(snapshot.records_delivered, 0);
}

#[tokio::test]
async fn test_shutdown_is_bounded_by_timeout() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&mock_server)
        .await;

    let config = Config {
        shutdown_timeout_secs: 0.3,
        ..config_for(&mock_server)
    };
    let pipeline = Pipeline::spawn(&config, fields()).unwrap();
    pipeline.submit(LogEvent::new(Severity::Info, "slow"));

    let started = Instant::now();
    let snapshot = pipeline.shutdown().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(snapshot.dropped_on_shutdown, 1);
}

#[tokio::test]
async fn test_submissions_after_shutdown_are_counted() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let pipeline = Pipeline::spawn(&config_for(&mock_server), fields()).unwrap();
    pipeline.shutdown().await.unwrap();

    assert_eq!(
        pipeline.submit(LogEvent::new(Severity::Info, "late")),
        SubmitOutcome::Rejected(DropReason::Closed)
    );
    assert!(matches!(pipeline.flush().await, Err(ShipperError::ShutDown)));
    assert_eq!(pipeline.metrics().rejected_closed, 1);
}
