//! Persistence operations
//!
//! One module per aggregate. Every mutation records exactly one audit event
//! through [`audit::record`] after its transaction commits.

use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

use geokey_common::events::EntityRef;

pub mod audit;
pub mod categories;
pub mod comments;
pub mod locations;
pub mod media;
pub mod observations;
pub mod projects;
pub mod users;

/// Fresh TEXT primary key.
pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current time as the RFC 3339 UTC string stored in timestamp columns.
pub(crate) fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Denormalised `{id, name}` reference for audit entries.
pub(crate) fn entity_ref(id: &str, name: &str) -> EntityRef {
    EntityRef::new(Uuid::parse_str(id).unwrap_or(Uuid::nil()), name)
}
