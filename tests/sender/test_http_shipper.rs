use flate2::read::GzDecoder;
use hec_log_shipper::buffer::{Batch, BatchFraming, BatchLimits, DeliveryBuffer};
use hec_log_shipper::domain::{DeliveryOutcome, SerializedPayload};
use hec_log_shipper::sender::{ClientConfig, HttpClient, HttpShipper};
use std::io::Read;
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string, header, method, path},
};

fn batch_of(records: &[&str]) -> Batch {
    let buffer = DeliveryBuffer::unbounded();
    for record in records {
        buffer.enqueue(SerializedPayload::new(record.to_string()));
    }
    buffer.drain_batch(BatchLimits::default())
}

fn shipper(template: String, configure: impl FnOnce(&mut ClientConfig)) -> HttpShipper {
    let mut config = ClientConfig {
        endpoint_url_template: template,
        tenant: "acme".to_string(),
        api_key: "test-key".to_string(),
        timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    };
    configure(&mut config);
    HttpShipper::new(HttpClient::new(config).unwrap(), BatchFraming::Ndjson, false)
}

#[tokio::test]
async fn test_successful_post_sends_ndjson_with_auth_header() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/services/collector/event"))
        .and(header("authorization", "Splunk test-key"))
        .and(header("content-type", "application/x-ndjson"))
        .and(header("x-batch-size", "2"))
        .and(body_string("{\"n\":1}\n{\"n\":2}\n"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"text":"Success","code":0}"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    let shipper = shipper(
        format!("{}/services/collector/event", mock_server.uri()),
        |_| {},
    );
    let outcome = shipper.send_batch(&batch_of(&["{\"n\":1}", "{\"n\":2}"])).await;

    assert_eq!(outcome, DeliveryOutcome::Success);
    let stats = shipper.client().connection_stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.successful_requests, 1);
}

#[tokio::test]
async fn test_api_key_in_template_goes_into_url_not_header() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/acme/collector/test-key"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let shipper = shipper(
        format!("{}/{{tenant}}/collector/{{api_key}}", mock_server.uri()),
        |_| {},
    );
    let outcome = shipper.send_batch(&batch_of(&["{}"])).await;
    assert!(outcome.is_success());

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&mock_server)
        .await;

    let shipper = shipper(format!("{}/event", mock_server.uri()), |_| {});
    let outcome = shipper.send_batch(&batch_of(&["{}"])).await;

    match outcome {
        DeliveryOutcome::RetryableFailure { reason, retry_after } => {
            assert!(reason.contains("500"));
            assert!(reason.contains("Internal Server Error"));
            assert_eq!(retry_after, None);
        }
        other => panic!("Expected retryable failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rate_limit_carries_retry_after() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
        .mount(&mock_server)
        .await;

    let shipper = shipper(format!("{}/event", mock_server.uri()), |_| {});
    let outcome = shipper.send_batch(&batch_of(&["{}"])).await;

    assert_eq!(
        outcome,
        DeliveryOutcome::RetryableFailure {
            reason: "HTTP 429 Too Many Requests".to_string(),
            retry_after: Some(Duration::from_secs(3)),
        }
    );
}

#[tokio::test]
async fn test_unauthorized_is_fatal() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"text":"Invalid token","code":4}"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    let shipper = shipper(format!("{}/event", mock_server.uri()), |_| {});
    let outcome = shipper.send_batch(&batch_of(&["{}"])).await;

    match outcome {
        DeliveryOutcome::FatalFailure { reason } => assert!(reason.contains("Invalid token")),
        other => panic!("Expected fatal failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_timeout_is_retryable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&mock_server)
        .await;

    let shipper = shipper(format!("{}/event", mock_server.uri()), |config| {
        config.timeout = Duration::from_millis(200);
    });
    let outcome = shipper.send_batch(&batch_of(&["{}"])).await;

    assert!(outcome.is_retryable());
    assert_eq!(shipper.client().connection_stats().failed_requests, 1);
}

#[tokio::test]
async fn test_connection_refused_is_retryable() {
    // Nothing listens on port 1
    let shipper = shipper("http://127.0.0.1:1/event".to_string(), |config| {
        config.connection_timeout = Duration::from_millis(500);
    });
    let outcome = shipper.send_batch(&batch_of(&["{}"])).await;

    assert!(outcome.is_retryable());
}

#[tokio::test]
async fn test_first_response_is_kept_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("first"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("second"))
        .mount(&mock_server)
        .await;

    let client = HttpClient::new(ClientConfig {
        endpoint_url_template: format!("{}/event", mock_server.uri()),
        ..ClientConfig::default()
    })
    .unwrap();
    let shipper = HttpShipper::new(client, BatchFraming::Ndjson, true);

    assert!(shipper.send_batch(&batch_of(&["{}"])).await.is_success());
    assert!(shipper.send_batch(&batch_of(&["{}"])).await.is_success());

    let first = shipper.first_response().unwrap();
    assert_eq!(first.status, 200);
    assert_eq!(first.body, "first");
}

#[tokio::test]
async fn test_large_bodies_are_gzipped() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(header("content-encoding", "gzip"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let record = format!("{{\"message\":\"{}\"}}", "x".repeat(200));
    let records: Vec<&str> = std::iter::repeat_n(record.as_str(), 20).collect();

    let shipper = shipper(format!("{}/event", mock_server.uri()), |config| {
        config.enable_compression = true;
    });
    assert!(shipper.send_batch(&batch_of(&records)).await.is_success());

    let requests = mock_server.received_requests().await.unwrap();
    let mut decoded = String::new();
    GzDecoder::new(requests[0].body.as_slice())
        .read_to_string(&mut decoded)
        .unwrap();
    assert_eq!(decoded.lines().count(), 20);
    assert!(decoded.lines().all(|line| line == record));
}

#[tokio::test]
async fn test_json_array_framing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(header("content-type", "application/json"))
        .and(body_string("[{\"n\":1},{\"n\":2}]"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = HttpClient::new(ClientConfig {
        endpoint_url_template: format!("{}/event", mock_server.uri()),
        ..ClientConfig::default()
    })
    .unwrap();
    let shipper = HttpShipper::new(client, BatchFraming::JsonArray, false);

    assert!(shipper.send_batch(&batch_of(&["{\"n\":1}", "{\"n\":2}"])).await.is_success());
}
