use super::serde_helpers::{
    load_env_bool, load_env_enum, load_env_string, load_env_var, load_env_var_opt,
};
use super::{ConfigError, LogFormat, LogLevel};
use crate::buffer::{BatchFraming, BatchLimits};
use crate::pipeline::PipelineSettings;
use crate::reliability::{RetryConfig, RetryStrategy};
use crate::sender::ClientConfig;
use clap::parser::ValueSource;
use clap::{CommandFactory, FromArgMatches, Parser};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ENDPOINT_TEMPLATE: &str =
    "https://{tenant}.splunkcloud.com:8088/services/collector/event";

#[derive(Parser, Clone, Serialize, Deserialize)]
#[command(author, version, about = "Ship log lines to an HTTP Event Collector", long_about = None)]
#[serde(default)]
pub struct Config {
    /// Collector URL; `{tenant}` and `{api_key}` are substituted
    #[arg(long, env = "HEC_ENDPOINT_URL_TEMPLATE", default_value = DEFAULT_ENDPOINT_TEMPLATE)]
    pub endpoint_url_template: String,

    /// Tenant name substituted for `{tenant}`
    #[arg(long, env = "HEC_TENANT", default_value = "")]
    pub tenant: String,

    /// API key; sent as `Authorization: Splunk <key>` unless the template uses `{api_key}`
    #[arg(long, env = "HEC_API_KEY", default_value = "", hide_env_values = true)]
    pub api_key: String,

    /// Also send the raw message text next to structured fields
    #[arg(long, env = "HEC_ALWAYS_INCLUDE_RAW_MESSAGE")]
    pub always_include_raw_message: bool,

    /// Seconds between periodic flushes
    #[arg(long, env = "HEC_FLUSH_INTERVAL_SECS", default_value_t = 5.0)]
    pub flush_interval_secs: f64,

    /// Maximum records per request
    #[arg(long, env = "HEC_MAX_BATCH_COUNT", default_value_t = 100)]
    pub max_batch_count: usize,

    /// Maximum request body size in bytes
    #[arg(long, env = "HEC_MAX_BATCH_BYTES", default_value_t = 1024 * 1024)]
    pub max_batch_bytes: usize,

    /// Records held in memory before the oldest are dropped (0 = unbounded)
    #[arg(long, env = "HEC_MAX_BUFFERED_RECORDS", default_value_t = 10_000)]
    pub max_buffered_records: usize,

    /// Log the first response body received from the collector
    #[arg(long, env = "HEC_OUTPUT_FIRST_RESPONSE")]
    pub output_first_response: bool,

    /// Buffered records that trigger an early flush (defaults to max batch count)
    #[arg(long, env = "HEC_FLUSH_THRESHOLD")]
    pub flush_threshold: Option<usize>,

    /// Request body framing
    #[arg(long, env = "HEC_BATCH_FRAMING", value_enum, default_value_t = BatchFraming::Ndjson)]
    pub batch_framing: BatchFraming,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HEC_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Time allowed for the final flush at shutdown
    #[arg(long, env = "HEC_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5.0)]
    pub shutdown_timeout_secs: f64,

    /// Drop buffered records older than this many seconds (0 = never)
    #[arg(long, env = "HEC_MAX_RECORD_AGE_SECS", default_value_t = 0)]
    pub max_record_age_secs: u64,

    /// Gzip request bodies larger than 1 KiB
    #[arg(long, env = "HEC_ENABLE_COMPRESSION")]
    pub enable_compression: bool,

    /// Send attempts per batch, the first one included
    #[arg(long, env = "HEC_RETRY_MAX_ATTEMPTS", default_value_t = 5)]
    pub retry_max_attempts: u32,

    #[arg(long, env = "HEC_RETRY_BASE_DELAY_MS", default_value_t = 500)]
    pub retry_base_delay_ms: u64,

    #[arg(long, env = "HEC_RETRY_MAX_DELAY_MS", default_value_t = 60_000)]
    pub retry_max_delay_ms: u64,

    /// Give up on a batch this many seconds after its first failure (0 = no limit)
    #[arg(long, env = "HEC_RETRY_MAX_ELAPSED_SECS", default_value_t = 0)]
    pub retry_max_elapsed_secs: u64,

    /// How the delay grows between attempts
    #[arg(
        long,
        env = "HEC_RETRY_STRATEGY",
        value_enum,
        default_value_t = RetryStrategy::ExponentialBackoff
    )]
    pub retry_strategy: RetryStrategy,

    /// Randomise retry delays
    #[arg(
        long,
        env = "HEC_RETRY_JITTER",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub retry_jitter: bool,

    #[arg(long, env = "HEC_LOG_LEVEL", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    #[arg(long, env = "HEC_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// TOML file with the same keys; command line and environment win
    #[arg(long, env = "HEC_CONFIG_FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Print the Prometheus exposition of the final counters on exit
    #[arg(long)]
    #[serde(skip)]
    pub print_metrics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint_url_template: DEFAULT_ENDPOINT_TEMPLATE.to_string(),
            tenant: String::new(),
            api_key: String::new(),
            always_include_raw_message: false,
            flush_interval_secs: 5.0,
            max_batch_count: 100,
            max_batch_bytes: 1024 * 1024,
            max_buffered_records: 10_000,
            output_first_response: false,
            flush_threshold: None,
            batch_framing: BatchFraming::Ndjson,
            request_timeout_secs: 30,
            shutdown_timeout_secs: 5.0,
            max_record_age_secs: 0,
            enable_compression: false,
            retry_max_attempts: 5,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 60_000,
            retry_max_elapsed_secs: 0,
            retry_strategy: RetryStrategy::ExponentialBackoff,
            retry_jitter: true,
            log_level: LogLevel::Info,
            log_format: LogFormat::Text,
            config_file: None,
            print_metrics: false,
        }
    }
}

// Keeps the API key out of debug logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("endpoint_url_template", &self.endpoint_url_template)
            .field("tenant", &self.tenant)
            .field("api_key", &"<redacted>")
            .field("flush_interval_secs", &self.flush_interval_secs)
            .field("max_batch_count", &self.max_batch_count)
            .field("max_batch_bytes", &self.max_batch_bytes)
            .field("max_buffered_records", &self.max_buffered_records)
            .field("batch_framing", &self.batch_framing)
            .field("retry_max_attempts", &self.retry_max_attempts)
            .field("retry_strategy", &self.retry_strategy)
            .field("config_file", &self.config_file)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Parses the command line (with `HEC_*` environment fallbacks). When a
    /// config file is given it provides the base values and only options set
    /// explicitly on the command line or in the environment override it.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = Config::command().get_matches_from(args);
        let cli = Config::from_arg_matches(&matches)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        let Some(path) = cli.config_file.clone() else {
            cli.validate()?;
            return Ok(cli);
        };

        let explicit: Vec<String> = matches
            .ids()
            .map(|id| id.as_str().to_string())
            .filter(|id| {
                matches!(
                    matches.value_source(id),
                    Some(ValueSource::CommandLine | ValueSource::EnvVariable)
                )
            })
            .collect();

        let mut config = Self::merge(Self::read_file(&path)?, &cli, &explicit)?;
        config.config_file = Some(path);
        config.print_metrics = cli.print_metrics;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `HEC_*` variables, without a command line.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path.as_ref())?;
        config.config_file = Some(path.as_ref().to_path_buf());
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Copies the `explicit` fields of `overrides` onto `base`.
    fn merge(base: Config, overrides: &Config, explicit: &[String]) -> Result<Self, ConfigError> {
        let to_value = |config: &Config| {
            serde_json::to_value(config).map_err(|e| ConfigError::InvalidConfig(e.to_string()))
        };
        let mut merged = to_value(&base)?;
        let overrides = to_value(overrides)?;

        if let (Some(target), Some(source)) = (merged.as_object_mut(), overrides.as_object()) {
            for id in explicit {
                if let Some(value) = source.get(id) {
                    target.insert(id.clone(), value.clone());
                }
            }
        }

        serde_json::from_value(merged).map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        load_env_string("HEC_ENDPOINT_URL_TEMPLATE", &mut self.endpoint_url_template);
        load_env_string("HEC_TENANT", &mut self.tenant);
        load_env_string("HEC_API_KEY", &mut self.api_key);
        load_env_bool(
            "HEC_ALWAYS_INCLUDE_RAW_MESSAGE",
            &mut self.always_include_raw_message,
        )?;
        load_env_var("HEC_FLUSH_INTERVAL_SECS", &mut self.flush_interval_secs)?;
        load_env_var("HEC_MAX_BATCH_COUNT", &mut self.max_batch_count)?;
        load_env_var("HEC_MAX_BATCH_BYTES", &mut self.max_batch_bytes)?;
        load_env_var("HEC_MAX_BUFFERED_RECORDS", &mut self.max_buffered_records)?;
        load_env_bool("HEC_OUTPUT_FIRST_RESPONSE", &mut self.output_first_response)?;
        load_env_var_opt("HEC_FLUSH_THRESHOLD", &mut self.flush_threshold)?;
        load_env_enum("HEC_BATCH_FRAMING", &mut self.batch_framing)?;
        load_env_var("HEC_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs)?;
        load_env_var("HEC_SHUTDOWN_TIMEOUT_SECS", &mut self.shutdown_timeout_secs)?;
        load_env_var("HEC_MAX_RECORD_AGE_SECS", &mut self.max_record_age_secs)?;
        load_env_bool("HEC_ENABLE_COMPRESSION", &mut self.enable_compression)?;
        load_env_var("HEC_RETRY_MAX_ATTEMPTS", &mut self.retry_max_attempts)?;
        load_env_var("HEC_RETRY_BASE_DELAY_MS", &mut self.retry_base_delay_ms)?;
        load_env_var("HEC_RETRY_MAX_DELAY_MS", &mut self.retry_max_delay_ms)?;
        load_env_var("HEC_RETRY_MAX_ELAPSED_SECS", &mut self.retry_max_elapsed_secs)?;
        load_env_enum("HEC_RETRY_STRATEGY", &mut self.retry_strategy)?;
        load_env_bool("HEC_RETRY_JITTER", &mut self.retry_jitter)?;
        load_env_enum("HEC_LOG_LEVEL", &mut self.log_level)?;
        load_env_enum("HEC_LOG_FORMAT", &mut self.log_format)?;
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        secs_f64(self.flush_interval_secs, Duration::from_secs(5))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        secs_f64(self.shutdown_timeout_secs, Duration::from_secs(5))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn effective_flush_threshold(&self) -> usize {
        self.flush_threshold.unwrap_or(self.max_batch_count)
    }

    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_count: self.max_batch_count,
            max_bytes: self.max_batch_bytes,
            framing: self.batch_framing,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            max_elapsed: (self.retry_max_elapsed_secs > 0)
                .then(|| Duration::from_secs(self.retry_max_elapsed_secs)),
            strategy: self.retry_strategy,
            jitter: self.retry_jitter,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint_url_template: self.endpoint_url_template.clone(),
            tenant: self.tenant.clone(),
            api_key: self.api_key.clone(),
            timeout: self.request_timeout(),
            enable_compression: self.enable_compression,
            ..ClientConfig::default()
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            include_raw_message: self.always_include_raw_message,
            limits: self.batch_limits(),
            max_buffered_records: self.max_buffered_records,
            flush_interval: self.flush_interval(),
            flush_threshold: self.effective_flush_threshold(),
            max_record_age: Duration::from_secs(self.max_record_age_secs),
            shutdown_timeout: self.shutdown_timeout(),
            retry: self.retry_config(),
        }
    }
}

fn secs_f64(secs: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(fallback)
}
