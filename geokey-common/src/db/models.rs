//! Database row models
//!
//! Ids are UUIDs stored as TEXT; timestamps are RFC 3339 strings written by
//! the application. Lookup values keep integer ids so contribution payloads
//! can reference them compactly.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub is_superuser: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub isprivate: bool,
    pub islocked: bool,
    /// Who may contribute on top of group members: `true`, `auth` or `false`.
    pub everyone_contributes: String,
    pub status: String,
    pub creator_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserGroupRow {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub can_contribute: bool,
    pub can_moderate: bool,
    /// JSON filter map; NULL means the group sees all data.
    pub filters: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubsetRow {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub creator_id: String,
    pub filters: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CategoryRow {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub creator_id: String,
    pub status: String,
    /// Status given to new observations when the client requests none.
    pub default_status: String,
    /// Key of the field whose value labels observations in list views.
    pub display_field: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FieldRow {
    pub id: String,
    pub category_id: String,
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub required: bool,
    pub status: String,
    pub field_order: i64,
    pub kind: String,
    pub minval: Option<f64>,
    pub maxval: Option<f64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LookupValueRow {
    pub id: i64,
    pub field_id: String,
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LocationRow {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    /// GeoJSON geometry object, WGS84.
    pub geometry: String,
    pub status: String,
    pub private: bool,
    pub private_for_project_id: Option<String>,
    pub creator_id: String,
    pub version: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ObservationRow {
    pub id: String,
    pub project_id: String,
    pub category_id: String,
    pub location_id: String,
    pub status: String,
    /// JSON object mapping field keys to normalised values.
    pub properties: String,
    pub version: i64,
    pub creator_id: String,
    pub updator_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub review_comment: Option<String>,
    /// Stored version at the time a conflicting update was applied.
    pub conflict_version: Option<i64>,
    pub search_matches: String,
    pub display_field: Option<String>,
    pub num_media: i64,
    pub num_comments: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ObservationSnapshotRow {
    pub id: String,
    pub observation_id: String,
    pub version: i64,
    pub status: String,
    pub properties: String,
    pub review_comment: Option<String>,
    pub conflict_version: Option<i64>,
    pub updator_id: Option<String>,
    pub recorded_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CommentRow {
    pub id: String,
    pub observation_id: String,
    pub text: String,
    pub creator_id: String,
    pub respondsto_id: Option<String>,
    /// `open` flags the observation for review until `resolved`.
    pub review_status: Option<String>,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MediaFileRow {
    pub id: String,
    pub observation_id: String,
    pub name: String,
    pub description: Option<String>,
    pub kind: String,
    /// Path below the media directory; NULL for externally hosted videos.
    pub file_path: Option<String>,
    pub external_url: Option<String>,
    pub creator_id: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEntryRow {
    pub id: i64,
    pub timestamp: String,
    pub action: String,
    pub kind: String,
    /// JSON `{id, display_name}`; NULL for background jobs.
    pub actor: Option<String>,
    pub project: Option<String>,
    pub usergroup: Option<String>,
    pub subset: Option<String>,
    pub category: Option<String>,
    pub field: Option<String>,
    pub observation: Option<String>,
    pub comment: Option<String>,
    pub media_file: Option<String>,
    pub changed_field: Option<String>,
    pub changed_value: Option<String>,
    pub subaction: Option<String>,
    /// JSON `{class, id}` pointing at a history snapshot.
    pub historical: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}
