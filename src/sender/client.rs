use reqwest::{Client, ClientBuilder};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use url::Url;
use url::form_urlencoded::byte_serialize;

pub const TENANT_PLACEHOLDER: &str = "{tenant}";
pub const API_KEY_PLACEHOLDER: &str = "{api_key}";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Invalid endpoint URL '{url}': {source}")]
    InvalidEndpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Clone)]
pub struct ClientConfig {
    /// Collector URL with `{tenant}` and/or `{api_key}` placeholders.
    pub endpoint_url_template: String,
    pub tenant: String,
    pub api_key: String,
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub max_connections: usize,
    pub keep_alive_timeout: Duration,
    pub user_agent: String,
    pub enable_compression: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_url_template:
                "https://{tenant}.splunkcloud.com:8088/services/collector/event".to_string(),
            tenant: String::new(),
            api_key: String::new(),
            timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            max_connections: 4,
            keep_alive_timeout: Duration::from_secs(60),
            user_agent: format!("hec-log-shipper/{}", env!("CARGO_PKG_VERSION")),
            enable_compression: false,
        }
    }
}

// Keeps the API key out of debug logs.
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint_url_template", &self.endpoint_url_template)
            .field("tenant", &self.tenant)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("connection_timeout", &self.connection_timeout)
            .field("max_connections", &self.max_connections)
            .field("user_agent", &self.user_agent)
            .field("enable_compression", &self.enable_compression)
            .finish()
    }
}

/// Substitutes tenant and API key into the endpoint template.
///
/// Both values are form-url-encoded before substitution so they cannot alter
/// the structure of the URL.
pub fn expand_endpoint(template: &str, tenant: &str, api_key: &str) -> Result<Url, ClientError> {
    let tenant: String = byte_serialize(tenant.as_bytes()).collect();
    let api_key: String = byte_serialize(api_key.as_bytes()).collect();
    let expanded = template
        .replace(TENANT_PLACEHOLDER, &tenant)
        .replace(API_KEY_PLACEHOLDER, &api_key);

    Url::parse(&expanded).map_err(|source| ClientError::InvalidEndpoint {
        url: template.to_string(),
        source,
    })
}

#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: Duration,
}

#[derive(Debug, Default)]
pub struct ClientStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_response_time: AtomicU64,
}

impl ClientStats {
    pub fn record_request(&self, success: bool, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time
            .fetch_add(response_time.as_millis() as u64, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Pooled HTTP client bound to one collector endpoint.
#[derive(Debug, Clone)]
pub struct HttpClient {
    pub client: Client,
    pub config: ClientConfig,
    endpoint_url: Url,
    header_auth: bool,
    pub stats: Arc<ClientStats>,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        if config.endpoint_url_template.trim().is_empty() {
            return Err(ClientError::InvalidConfiguration(
                "Endpoint URL template is empty".to_string(),
            ));
        }

        let endpoint_url =
            expand_endpoint(&config.endpoint_url_template, &config.tenant, &config.api_key)?;

        // A template without the key placeholder authenticates via header instead.
        let header_auth = !config.endpoint_url_template.contains(API_KEY_PLACEHOLDER)
            && !config.api_key.is_empty();

        // Response bodies are decoded transparently; request bodies are compressed by the transmitter.
        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(config.keep_alive_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()
            .map_err(|e| {
                ClientError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            config,
            endpoint_url,
            header_auth,
            stats: Arc::new(ClientStats::default()),
        })
    }

    pub fn endpoint_url(&self) -> &Url {
        &self.endpoint_url
    }

    /// Value for the `Authorization` header, when the key is not in the URL.
    pub fn authorization(&self) -> Option<String> {
        self.header_auth
            .then(|| format!("Splunk {}", self.config.api_key))
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        let total_requests = self.stats.total_requests.load(Ordering::Relaxed);
        let total_response_time = self.stats.total_response_time.load(Ordering::Relaxed);

        let average_response_time = if total_requests > 0 {
            Duration::from_millis(total_response_time / total_requests)
        } else {
            Duration::ZERO
        };

        ConnectionStats {
            total_requests,
            successful_requests: self.stats.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.stats.failed_requests.load(Ordering::Relaxed),
            average_response_time,
        }
    }
}
