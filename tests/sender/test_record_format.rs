use chrono::{TimeZone, Utc};
use hec_log_shipper::domain::{LogEvent, SessionFields, Severity, SourceContext, StaticFields};
use hec_log_shipper::enrich::enrich;
use hec_log_shipper::sender::{RecordFormatter, SerializationError};
use serde_json::{Value, json};

fn format_value(event: LogEvent, fields: &StaticFields, include_raw: bool) -> Value {
    let record = enrich(event, fields, include_raw);
    let payload = RecordFormatter::new().format(&record).unwrap();
    serde_json::from_slice(payload.as_bytes()).unwrap()
}

#[test]
fn test_plain_message_round_trip() {
    let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let fields = StaticFields::from_iter([("appversion", "2.1.0"), ("userid", "u-42")]);
    let event = LogEvent::new(Severity::Warn, "cache \"miss\"\nretrying")
        .with_timestamp(timestamp)
        .with_source(SourceContext::new("cache.rs", "lookup", 88));

    let value = format_value(event, &fields, false);

    assert_eq!(value["time"].as_f64(), Some(timestamp.timestamp() as f64));
    assert_eq!(
        value["event"],
        json!({
            "severity": "warn",
            "message": "cache \"miss\"\nretrying",
            "file": "cache.rs",
            "function": "lookup",
            "line": 88,
            "appversion": "2.1.0",
            "userid": "u-42",
        })
    );
}

#[test]
fn test_structured_message_is_merged() {
    let fields = StaticFields::from_iter([("sessionid", "s-1")]);
    let raw = r#"{"action":"login","attempt":3}"#;

    let without_raw = format_value(LogEvent::new(Severity::Info, raw), &fields, false);
    assert_eq!(without_raw["event"]["action"], "login");
    assert_eq!(without_raw["event"]["attempt"], 3);
    assert_eq!(without_raw["event"]["sessionid"], "s-1");
    assert!(without_raw["event"].get("raw_message").is_none());
    assert!(without_raw["event"].get("message").is_none());

    let with_raw = format_value(LogEvent::new(Severity::Info, raw), &fields, true);
    assert_eq!(with_raw["event"]["raw_message"], raw);
}

#[test]
fn test_context_fields_win_over_message_keys() {
    let fields = StaticFields::from_iter([("userid", "real")]);
    let value = format_value(
        LogEvent::new(Severity::Info, r#"{"userid":"spoofed"}"#),
        &fields,
        false,
    );
    assert_eq!(value["event"]["userid"], "real");
}

#[test]
fn test_clashing_context_names_keep_the_raw_message() {
    let fields = StaticFields::from_iter([("raw_message", "ctx"), ("message", "ctx2")]);
    let value = format_value(LogEvent::new(Severity::Info, "hello"), &fields, true);

    assert_eq!(
        value["event"],
        json!({
            "severity": "info",
            "message": "hello",
            "raw_message": "hello",
            "field_raw_message": "ctx",
            "field_message": "ctx2",
        })
    );
}

#[test]
fn test_fields_are_captured_at_enrichment_time() {
    let session = SessionFields::new();
    session.set_user_id(Some("before".to_string()));

    let record = enrich(LogEvent::new(Severity::Info, "hello"), &session, false);
    session.set_user_id(Some("after".to_string()));

    let payload = RecordFormatter::new().format(&record).unwrap();
    let value: Value = serde_json::from_slice(payload.as_bytes()).unwrap();
    assert_eq!(value["event"]["userid"], "before");
}

#[test]
fn test_invalid_utf8_is_rejected() {
    let record = enrich(
        LogEvent::new(Severity::Error, vec![b'o', b'k', 0xc3, 0x28]),
        &StaticFields::default(),
        false,
    );
    let result = RecordFormatter::new().format(&record);
    assert!(matches!(result, Err(SerializationError::InvalidEncoding(_))));
}
