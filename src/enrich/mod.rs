//! Joins log events with their contextual fields.

use crate::domain::{EnrichedRecord, FieldsProvider, LogEvent};

/// Stateless enrichment step run on the producer's thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldEnricher {
    include_raw_message: bool,
}

impl FieldEnricher {
    pub fn new(include_raw_message: bool) -> Self {
        Self {
            include_raw_message,
        }
    }

    pub fn enrich(&self, event: LogEvent, provider: &dyn FieldsProvider) -> EnrichedRecord {
        enrich(event, provider, self.include_raw_message)
    }
}

/// Snapshots the provider's fields once and attaches them to `event`.
pub fn enrich(
    event: LogEvent,
    provider: &dyn FieldsProvider,
    include_raw_message: bool,
) -> EnrichedRecord {
    EnrichedRecord {
        event,
        fields: provider.current_fields(),
        include_raw_message,
    }
}
