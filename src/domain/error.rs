use thiserror::Error;

/// Top-level error type for the shipping pipeline.
#[derive(Error, Debug)]
pub enum ShipperError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::app::ConfigError),

    #[error("Buffer error: {0}")]
    Buffer(#[from] crate::buffer::BufferError),

    #[error("Sender error: {0}")]
    Sender(#[from] crate::sender::ClientError),

    #[error("Pipeline is shut down")]
    ShutDown,

    #[error("Delivery worker failed: {0}")]
    Worker(String),
}
