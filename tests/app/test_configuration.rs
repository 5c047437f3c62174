use hec_log_shipper::app::{Config, ConfigError, LogFormat, LogLevel};
use hec_log_shipper::buffer::BatchFraming;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const ENV_VARS: &[&str] = &[
    "HEC_ENDPOINT_URL_TEMPLATE",
    "HEC_TENANT",
    "HEC_API_KEY",
    "HEC_ALWAYS_INCLUDE_RAW_MESSAGE",
    "HEC_FLUSH_INTERVAL_SECS",
    "HEC_MAX_BATCH_COUNT",
    "HEC_MAX_BATCH_BYTES",
    "HEC_MAX_BUFFERED_RECORDS",
    "HEC_OUTPUT_FIRST_RESPONSE",
    "HEC_FLUSH_THRESHOLD",
    "HEC_BATCH_FRAMING",
    "HEC_REQUEST_TIMEOUT_SECS",
    "HEC_SHUTDOWN_TIMEOUT_SECS",
    "HEC_MAX_RECORD_AGE_SECS",
    "HEC_ENABLE_COMPRESSION",
    "HEC_RETRY_MAX_ATTEMPTS",
    "HEC_RETRY_BASE_DELAY_MS",
    "HEC_RETRY_MAX_DELAY_MS",
    "HEC_RETRY_MAX_ELAPSED_SECS",
    "HEC_RETRY_JITTER",
    "HEC_LOG_LEVEL",
    "HEC_LOG_FORMAT",
    "HEC_CONFIG_FILE",
];

fn clean_env() {
    unsafe {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }
}

fn set_env(name: &str, value: &str) {
    unsafe {
        std::env::set_var(name, value);
    }
}

fn toml_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_config_from_args() {
    clean_env();
    let config = Config::from_args([
        "hec-log-shipper",
        "--tenant",
        "acme",
        "--api-key",
        "secret",
        "--max-batch-count",
        "50",
        "--flush-interval-secs",
        "2.5",
        "--batch-framing",
        "json-array",
        "--retry-jitter",
        "false",
        "--always-include-raw-message",
        "--log-format",
        "json",
    ])
    .unwrap();

    assert_eq!(config.tenant, "acme");
    assert_eq!(config.max_batch_count, 50);
    assert_eq!(config.flush_interval(), Duration::from_millis(2500));
    assert_eq!(config.batch_framing, BatchFraming::JsonArray);
    assert!(!config.retry_jitter);
    assert!(config.always_include_raw_message);
    assert_eq!(config.log_format, LogFormat::Json);
    assert_eq!(config.effective_flush_threshold(), 50);
}

#[test]
#[serial]
fn test_config_from_args_rejects_invalid_values() {
    clean_env();
    let result = Config::from_args([
        "hec-log-shipper",
        "--tenant",
        "acme",
        "--max-batch-count",
        "500",
        "--max-buffered-records",
        "100",
    ]);
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
#[serial]
fn test_config_from_env() {
    clean_env();
    set_env("HEC_TENANT", "env-tenant");
    set_env("HEC_MAX_BATCH_BYTES", "4096");
    set_env("HEC_ENABLE_COMPRESSION", "yes");
    set_env("HEC_LOG_LEVEL", "DEBUG");
    set_env("HEC_BATCH_FRAMING", "json-array");
    set_env("HEC_FLUSH_THRESHOLD", "25");

    let config = Config::from_env().unwrap();
    clean_env();

    assert_eq!(config.tenant, "env-tenant");
    assert_eq!(config.max_batch_bytes, 4096);
    assert!(config.enable_compression);
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.batch_framing, BatchFraming::JsonArray);
    assert_eq!(config.effective_flush_threshold(), 25);
}

#[test]
#[serial]
fn test_config_from_env_rejects_garbage() {
    clean_env();
    set_env("HEC_MAX_BATCH_COUNT", "many");

    let result = Config::from_env();
    clean_env();

    assert!(matches!(result, Err(ConfigError::EnvError(_))));
}

#[test]
#[serial]
fn test_config_from_file() {
    clean_env();
    let file = toml_file(
        r#"
endpoint_url_template = "https://{tenant}.example.com/services/collector/{api_key}"
tenant = "file-tenant"
api_key = "file-key"
max_batch_count = 20
max_buffered_records = 0
batch_framing = "json_array"
retry_max_elapsed_secs = 120
log_level = "warn"
"#,
    );

    let config = Config::from_file(file.path()).unwrap();

    assert_eq!(config.tenant, "file-tenant");
    assert_eq!(config.max_batch_count, 20);
    assert_eq!(config.max_buffered_records, 0);
    assert_eq!(config.batch_framing, BatchFraming::JsonArray);
    assert_eq!(
        config.retry_config().max_elapsed,
        Some(Duration::from_secs(120))
    );
    assert_eq!(config.log_level, LogLevel::Warn);
    // Unset keys keep their defaults
    assert_eq!(config.max_batch_bytes, 1024 * 1024);
    assert!(config.retry_jitter);
}

#[test]
#[serial]
fn test_command_line_overrides_config_file() {
    clean_env();
    let file = toml_file(
        r#"
tenant = "file-tenant"
max_batch_count = 20
flush_interval_secs = 9.0
"#,
    );
    set_env("HEC_FLUSH_INTERVAL_SECS", "1.5");

    let path = file.path().to_str().unwrap().to_string();
    let result = Config::from_args([
        "hec-log-shipper",
        "--config-file",
        path.as_str(),
        "--max-batch-count",
        "40",
    ]);
    clean_env();
    let config = result.unwrap();

    assert_eq!(config.tenant, "file-tenant");
    assert_eq!(config.max_batch_count, 40);
    assert_eq!(config.flush_interval(), Duration::from_millis(1500));
    assert_eq!(config.config_file.as_deref(), Some(file.path()));
}

#[test]
#[serial]
fn test_missing_config_file() {
    clean_env();
    let result = Config::from_file("/nonexistent/hec-log-shipper.toml");
    assert!(matches!(result, Err(ConfigError::FileError(_))));
}

#[test]
#[serial]
fn test_malformed_config_file() {
    clean_env();
    let file = toml_file("max_batch_count = \"lots\"");
    let result = Config::from_file(file.path());
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}
