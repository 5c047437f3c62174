use parking_lot::RwLock;
use std::collections::BTreeMap;

#[cfg(test)]
use mockall::automock;

/// Contextual key/value pairs attached to every record. Ordered so that the
/// serialized form is deterministic.
pub type ContextFields = BTreeMap<String, String>;

pub const APP_VERSION_FIELD: &str = "appversion";
pub const USER_ID_FIELD: &str = "userid";
pub const SESSION_ID_FIELD: &str = "sessionid";

/// Capability that yields the fields to attach to a record. Queried once per
/// enrichment, on the producer's thread.
#[cfg_attr(test, automock)]
pub trait FieldsProvider: Send + Sync {
    fn current_fields(&self) -> ContextFields;
}

/// A fixed set of fields that never changes.
#[derive(Debug, Clone, Default)]
pub struct StaticFields(ContextFields);

impl StaticFields {
    pub fn new(fields: ContextFields) -> Self {
        Self(fields)
    }
}

impl<K, V> FromIterator<(K, V)> for StaticFields
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl FieldsProvider for StaticFields {
    fn current_fields(&self) -> ContextFields {
        self.0.clone()
    }
}

#[derive(Debug, Default)]
struct SessionState {
    app_version: Option<String>,
    user_id: Option<String>,
    session_id: Option<String>,
    extra: ContextFields,
}

/// App version, user id and session id as mutable host-application state.
///
/// Any thread may update a value (for example rotating the session id on
/// login) while producers keep enriching; each snapshot is taken under the
/// read lock, so a record never sees half of an update.
#[derive(Debug, Default)]
pub struct SessionFields {
    state: RwLock<SessionState>,
}

impl SessionFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app_version(self, version: impl Into<String>) -> Self {
        self.state.write().app_version = Some(version.into());
        self
    }

    pub fn set_app_version(&self, version: Option<String>) {
        self.state.write().app_version = version;
    }

    pub fn set_user_id(&self, user_id: Option<String>) {
        self.state.write().user_id = user_id;
    }

    pub fn set_session_id(&self, session_id: Option<String>) {
        self.state.write().session_id = session_id;
    }

    /// Replaces user and session id in one step.
    pub fn set_identity(&self, user_id: Option<String>, session_id: Option<String>) {
        let mut state = self.state.write();
        state.user_id = user_id;
        state.session_id = session_id;
    }

    pub fn insert_extra(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.write().extra.insert(key.into(), value.into());
    }

    pub fn remove_extra(&self, key: &str) -> Option<String> {
        self.state.write().extra.remove(key)
    }
}

impl FieldsProvider for SessionFields {
    fn current_fields(&self) -> ContextFields {
        let state = self.state.read();
        let mut fields = state.extra.clone();
        if let Some(version) = &state.app_version {
            fields.insert(APP_VERSION_FIELD.to_string(), version.clone());
        }
        if let Some(user_id) = &state.user_id {
            fields.insert(USER_ID_FIELD.to_string(), user_id.clone());
        }
        if let Some(session_id) = &state.session_id {
            fields.insert(SESSION_ID_FIELD.to_string(), session_id.clone());
        }
        fields
    }
}
