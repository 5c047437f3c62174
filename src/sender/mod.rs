pub mod client;
pub mod metrics;
pub mod serialization;
pub mod transmission;

pub use client::{ClientConfig, ClientError, ConnectionStats, HttpClient, expand_endpoint};
pub use metrics::{DeliveryMetrics, DropReason, MetricsSnapshot};
pub use serialization::{BatchSerializer, RecordFormatter, SerializationError};
pub use transmission::{
    BatchShipper, FirstResponse, HttpShipper, TransmissionError, classify_response,
};
