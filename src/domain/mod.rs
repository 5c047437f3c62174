//! Domain layer for hec-log-shipper.
//!
//! Contains the canonical types shared across all modules:
//! - `LogEvent`: an application log event as handed to the pipeline
//! - `ContextFields` / `FieldsProvider`: per-record contextual metadata
//! - `EnrichedRecord`: an event joined with its field snapshot
//! - `DeliveryOutcome`: result of one HTTP submission
//! - `ShipperError`: Top-level error type

pub mod error;
pub mod fields;
pub mod log_event;
pub mod log_level;
pub mod outcome;
pub mod record;

pub use error::ShipperError;
pub use fields::{ContextFields, FieldsProvider, SessionFields, StaticFields};
pub use log_event::{LogEvent, SourceContext};
pub use log_level::Severity;
pub use outcome::DeliveryOutcome;
pub use record::{EnrichedRecord, SerializedPayload};
