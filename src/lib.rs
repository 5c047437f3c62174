// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed:
#![allow(
    clippy::cast_possible_truncation, // Sizes and durations stay within realistic bounds
    clippy::cast_precision_loss,      // Timestamps and ratios only
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions, // e.g. BufferError in buffer module
    clippy::must_use_candidate,
    clippy::doc_markdown
)]

pub mod app;
pub mod buffer;
pub mod domain;
pub mod enrich;
pub mod pipeline;
pub mod reliability;
pub mod sender;

pub use app::Config;
pub use domain::{
    ContextFields, DeliveryOutcome, FieldsProvider, LogEvent, SessionFields, Severity,
    ShipperError, SourceContext, StaticFields,
};
pub use pipeline::{Pipeline, PipelineSettings, SubmitOutcome};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
