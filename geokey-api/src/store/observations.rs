//! Contribution store and observation lifecycle
//!
//! Observations are the core contribution: a location, a category-typed
//! properties map and a lifecycle status. Every mutation runs as one
//! transaction covering read-current, validate, write, history snapshot; the
//! audit entry is recorded after the commit. Version numbers and snapshots
//! form a total order per observation.

use serde_json::{Map, Value};
use sqlx::SqlitePool;
use tracing::{debug, info};

use geokey_common::db::models::{CategoryRow, ObservationRow, ObservationSnapshotRow};
use geokey_common::events::{ChangeAction, ChangeEvent, EntityKind, HistoricalRef};
use geokey_common::fields::{validate_properties, FieldDef, ValidationMode};
use geokey_common::filters::Predicate;
use geokey_common::search::{build_display_field, build_search_matches, search_predicate};
use geokey_common::{Error, Result};

use crate::auth::CurrentUser;
use crate::authz::{visibility_predicate, ProjectAccess};
use crate::store::locations::LocationPayload;
use crate::store::{audit, categories, entity_ref, locations, new_id, now};
use crate::AppState;

/// Attributes of a new contribution.
#[derive(Debug, Clone)]
pub struct NewObservation {
    pub category_id: String,
    /// Lifecycle status the client asked for; `None` falls back to the
    /// category default.
    pub requested_status: Option<String>,
    pub properties: Map<String, Value>,
    pub location: LocationPayload,
    pub geometry: Option<Value>,
}

/// Attributes of a contribution update. Absent parts stay unchanged.
#[derive(Debug, Clone, Default)]
pub struct ObservationUpdate {
    /// Keys to overlay onto the stored properties map.
    pub properties: Option<Map<String, Value>>,
    pub requested_status: Option<String>,
    pub review_comment: Option<String>,
    /// The version the client based its edit on, for conflict handling.
    pub client_version: Option<i64>,
}

/// Create an observation.
///
/// The initial status honours an explicit `draft` for anyone who may
/// contribute; a requested `active` only for moderators or when the category
/// defaults to `active`; everything else lands on the category default.
/// Drafts are validated partially, all other statuses fully.
pub async fn create_observation(
    state: &AppState,
    user: &CurrentUser,
    access: &ProjectAccess,
    new: NewObservation,
) -> Result<ObservationRow> {
    if !access.can_contribute {
        return Err(Error::PermissionDenied(
            "You are not allowed to contribute to this project.".to_string(),
        ));
    }

    let category = categories::get_category(&state.db, &new.category_id)
        .await?
        .filter(|c| c.project_id == access.project.id && c.status == "active")
        .ok_or_else(|| {
            Error::MalformedRequest(
                "The category cannot be used with the project.".to_string(),
            )
        })?;

    let status = initial_status(&category, new.requested_status.as_deref(), access)?;
    let mode = if status == "draft" {
        ValidationMode::Partial
    } else {
        ValidationMode::Full
    };

    let fields = categories::load_field_defs(&state.db, &category.id).await?;
    let properties = validate_properties(&fields, &new.properties, mode)?;

    let location = locations::create_or_fetch(
        &state.db,
        user,
        &access.project.id,
        &new.location,
        new.geometry.as_ref(),
    )
    .await?;

    let id = new_id();
    let created_at = now();
    let search_matches = build_search_matches(&fields, &properties);
    let display_field = build_display_field(category.display_field.as_deref(), &properties);
    let properties_json = serialize_properties(&properties)?;

    let mut tx = state.db.begin().await?;
    sqlx::query(
        "INSERT INTO observations (id, project_id, category_id, location_id, status,
                                   properties, version, creator_id, created_at, updated_at,
                                   search_matches, display_field)
         VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&access.project.id)
    .bind(&category.id)
    .bind(&location.id)
    .bind(&status)
    .bind(&properties_json)
    .bind(user.id_str())
    .bind(&created_at)
    .bind(&created_at)
    .bind(&search_matches)
    .bind(&display_field)
    .execute(&mut *tx)
    .await?;

    let snapshot_id = insert_snapshot(
        &mut tx,
        &id,
        1,
        &status,
        &properties_json,
        None,
        None,
        None,
    )
    .await?;
    tx.commit().await?;

    info!(observation = %id, project = %access.project.id, %status, "Created observation");

    let mut event = ChangeEvent::new(ChangeAction::Created, EntityKind::Observation);
    event.actor = Some(user.actor());
    event.project = Some(entity_ref(&access.project.id, &access.project.name));
    event.category = Some(entity_ref(&category.id, &category.name));
    event.observation = Some(entity_ref(&id, display_field.as_deref().unwrap_or("")));
    event.historical = snapshot_ref(&snapshot_id);
    audit::record(state, event).await;

    Ok(ObservationRow {
        id,
        project_id: access.project.id.clone(),
        category_id: category.id,
        location_id: location.id,
        status,
        properties: properties_json,
        version: 1,
        creator_id: user.id_str(),
        updator_id: None,
        created_at: created_at.clone(),
        updated_at: created_at,
        review_comment: None,
        conflict_version: None,
        search_matches,
        display_field,
        num_media: 0,
        num_comments: 0,
    })
}

fn initial_status(
    category: &CategoryRow,
    requested: Option<&str>,
    access: &ProjectAccess,
) -> Result<String> {
    match requested {
        None => Ok(category.default_status.clone()),
        Some("draft") => Ok("draft".to_string()),
        Some("pending") => Ok("pending".to_string()),
        Some("active") => {
            if access.can_moderate || category.default_status == "active" {
                Ok("active".to_string())
            } else {
                Ok(category.default_status.clone())
            }
        }
        Some(other) => Err(Error::MalformedRequest(format!(
            "Cannot create a contribution with status '{}'.",
            other
        ))),
    }
}

/// Update an observation.
///
/// Provided property keys are overlaid onto the stored map; the result is
/// validated partially while the observation stays a draft, fully otherwise.
/// The version increments only for non-draft saves. A client version below
/// the stored version forces the row into `review` with a conflict comment;
/// a client version above the stored version is malformed.
pub async fn update_observation(
    state: &AppState,
    user: &CurrentUser,
    access: &ProjectAccess,
    observation_id: &str,
    update: ObservationUpdate,
) -> Result<ObservationRow> {
    let current = get_observation(&state.db, access, user, observation_id).await?;

    let is_creator = current.creator_id == user.id_str();
    if !is_creator && !access.can_moderate {
        return Err(Error::PermissionDenied(
            "You are not allowed to update the contribution.".to_string(),
        ));
    }

    let conflict = match update.client_version {
        Some(client) if client > current.version => {
            return Err(Error::MalformedRequest(format!(
                "Version {} does not exist; the stored version is {}.",
                client, current.version
            )));
        }
        Some(client) => client < current.version,
        None => false,
    };

    let mut status = resolve_status(
        &current.status,
        update.requested_status.as_deref(),
        is_creator,
        access,
        &state.db,
        &current.category_id,
    )
    .await?;

    // A requested activation cannot bypass open review comments.
    if current.status == "review" && status == "active" {
        if open_review_comments(&state.db, &current.id).await? > 0 {
            status = "review".to_string();
        }
    }

    let mut review_comment = match status.as_str() {
        "pending" => update.review_comment.clone().or(current.review_comment.clone()),
        "active" => None,
        _ => current.review_comment.clone(),
    };
    let mut conflict_version = if status == "active" {
        None
    } else {
        current.conflict_version
    };

    if conflict {
        debug!(
            observation = %current.id,
            stored = current.version,
            client = update.client_version.unwrap_or_default(),
            "Conflicting update; transitioning to review"
        );
        status = "review".to_string();
        review_comment = Some(format!("Conflicting updates in version {}", current.version));
        conflict_version = Some(current.version);
    }

    let fields = categories::load_field_defs(&state.db, &current.category_id).await?;
    let stored: Map<String, Value> = serde_json::from_str(&current.properties)
        .map_err(|e| Error::Internal(format!("Corrupt properties map: {}", e)))?;
    let merged = match &update.properties {
        None => stored,
        Some(overlay) => {
            let mut merged = stored;
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            merged
        }
    };
    let mode = if status == "draft" {
        ValidationMode::Partial
    } else {
        ValidationMode::Full
    };
    let properties = validate_properties(&fields, &merged, mode)?;

    let version = if conflict || current.status == "draft" || status == "draft" {
        current.version
    } else {
        current.version + 1
    };

    let updated_at = now();
    let search_matches = build_search_matches(&fields, &properties);
    let display_field = display_field_for(&state.db, &current.category_id, &properties).await?;
    let properties_json = serialize_properties(&properties)?;

    let mut tx = state.db.begin().await?;
    sqlx::query(
        "UPDATE observations
         SET status = ?, properties = ?, version = ?, updator_id = ?, updated_at = ?,
             review_comment = ?, conflict_version = ?, search_matches = ?, display_field = ?
         WHERE id = ?",
    )
    .bind(&status)
    .bind(&properties_json)
    .bind(version)
    .bind(user.id_str())
    .bind(&updated_at)
    .bind(&review_comment)
    .bind(conflict_version)
    .bind(&search_matches)
    .bind(&display_field)
    .bind(&current.id)
    .execute(&mut *tx)
    .await?;

    let snapshot_id = insert_snapshot(
        &mut tx,
        &current.id,
        version,
        &status,
        &properties_json,
        review_comment.as_deref(),
        conflict_version,
        Some(&user.id_str()),
    )
    .await?;
    tx.commit().await?;

    let mut event = ChangeEvent::new(ChangeAction::Updated, EntityKind::Observation);
    event.actor = Some(user.actor());
    event.project = Some(entity_ref(&access.project.id, &access.project.name));
    event.observation = Some(entity_ref(&current.id, display_field.as_deref().unwrap_or("")));
    if status != current.status {
        event.changed_field = Some("status".to_string());
        event.changed_value = Some(status.clone());
    } else {
        event.changed_field = Some("properties".to_string());
        event.changed_value = Some(properties_json.clone());
    }
    event.historical = snapshot_ref(&snapshot_id);
    audit::record(state, event).await;

    Ok(ObservationRow {
        id: current.id,
        project_id: current.project_id,
        category_id: current.category_id,
        location_id: current.location_id,
        status,
        properties: properties_json,
        version,
        creator_id: current.creator_id,
        updator_id: Some(user.id_str()),
        created_at: current.created_at,
        updated_at,
        review_comment,
        conflict_version,
        search_matches,
        display_field,
        num_media: current.num_media,
        num_comments: current.num_comments,
    })
}

/// Decide the resulting lifecycle status of an update.
async fn resolve_status(
    current: &str,
    requested: Option<&str>,
    is_creator: bool,
    access: &ProjectAccess,
    pool: &SqlitePool,
    category_id: &str,
) -> Result<String> {
    let Some(requested) = requested else {
        return Ok(current.to_string());
    };
    if requested == current {
        return Ok(current.to_string());
    }

    match (current, requested) {
        ("draft", "pending") => {
            if is_creator {
                Ok("pending".to_string())
            } else {
                Err(Error::PermissionDenied(
                    "Only the creator may commit a draft.".to_string(),
                ))
            }
        }
        ("draft", "active") => {
            if !is_creator {
                return Err(Error::PermissionDenied(
                    "Only the creator may commit a draft.".to_string(),
                ));
            }
            if access.can_moderate {
                Ok("active".to_string())
            } else {
                // Non-moderators land on the category default.
                let category = categories::get_category(pool, category_id)
                    .await?
                    .ok_or_else(|| Error::Internal("Category row vanished.".to_string()))?;
                Ok(category.default_status)
            }
        }
        ("pending", "active") | ("review", "active") => {
            if access.can_moderate {
                Ok("active".to_string())
            } else {
                Err(Error::PermissionDenied(
                    "Only moderators may approve a contribution.".to_string(),
                ))
            }
        }
        ("active", "pending") => {
            if access.can_moderate {
                Ok("pending".to_string())
            } else {
                Err(Error::PermissionDenied(
                    "Only moderators may unpublish a contribution.".to_string(),
                ))
            }
        }
        (_, requested) => Err(Error::MalformedRequest(format!(
            "Cannot change status from '{}' to '{}'.",
            current, requested
        ))),
    }
}

/// Soft-delete an observation. Creator or project admin only.
pub async fn soft_delete_observation(
    state: &AppState,
    user: &CurrentUser,
    access: &ProjectAccess,
    observation_id: &str,
) -> Result<()> {
    let current = get_observation(&state.db, access, user, observation_id).await?;
    if current.creator_id != user.id_str() && !access.is_admin {
        return Err(Error::PermissionDenied(
            "You are not allowed to delete the contribution.".to_string(),
        ));
    }

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE observations SET status = 'deleted', updated_at = ? WHERE id = ?")
        .bind(now())
        .bind(&current.id)
        .execute(&mut *tx)
        .await?;
    let snapshot_id = insert_snapshot(
        &mut tx,
        &current.id,
        current.version,
        "deleted",
        &current.properties,
        current.review_comment.as_deref(),
        current.conflict_version,
        Some(&user.id_str()),
    )
    .await?;
    tx.commit().await?;

    info!(observation = %current.id, "Soft-deleted observation");

    let mut event = ChangeEvent::deletion(EntityKind::Observation);
    event.actor = Some(user.actor());
    event.project = Some(entity_ref(&access.project.id, &access.project.name));
    event.observation = Some(entity_ref(
        &current.id,
        current.display_field.as_deref().unwrap_or(""),
    ));
    event.historical = snapshot_ref(&snapshot_id);
    audit::record(state, event).await;
    Ok(())
}

/// Fetch one observation iff it is visible to the caller.
pub async fn get_observation(
    pool: &SqlitePool,
    access: &ProjectAccess,
    user: &CurrentUser,
    observation_id: &str,
) -> Result<ObservationRow> {
    let predicate = visibility_predicate(pool, access, user).await?;
    let sql = format!(
        "{} WHERE id = ? AND project_id = ? AND ({})",
        SELECT_OBSERVATION, predicate.sql
    );
    let query = sqlx::query_as::<_, ObservationRow>(&sql)
        .bind(observation_id)
        .bind(&access.project.id);
    bind_values_as(query, &predicate.binds)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound("Contribution not found.".to_string()))
}

/// List the observations of a project visible to the caller, optionally
/// narrowed by a search query and an extra compiled predicate (subsets).
pub async fn list_observations(
    pool: &SqlitePool,
    access: &ProjectAccess,
    user: &CurrentUser,
    search: Option<&str>,
    extra: Option<Predicate>,
) -> Result<Vec<ObservationRow>> {
    let mut predicate = visibility_predicate(pool, access, user).await?;
    if let Some(query) = search {
        for term in query.split_whitespace() {
            predicate = predicate.and(search_predicate(term));
        }
    }
    if let Some(extra) = extra {
        predicate = predicate.and(extra);
    }

    let sql = format!(
        "{} WHERE project_id = ? AND ({}) ORDER BY datetime(created_at) DESC, id",
        SELECT_OBSERVATION, predicate.sql
    );
    let query = sqlx::query_as::<_, ObservationRow>(&sql).bind(&access.project.id);
    let rows = bind_values_as(query, &predicate.binds).fetch_all(pool).await?;
    Ok(rows)
}

/// History snapshots of one observation, oldest first.
pub async fn history(
    pool: &SqlitePool,
    observation_id: &str,
) -> Result<Vec<ObservationSnapshotRow>> {
    let rows = sqlx::query_as::<_, ObservationSnapshotRow>(
        "SELECT id, observation_id, version, status, properties, review_comment,
                conflict_version, updator_id, recorded_at
         FROM observation_history
         WHERE observation_id = ?
         ORDER BY rowid",
    )
    .bind(observation_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Number of open review comments attached to an observation.
pub async fn open_review_comments(pool: &SqlitePool, observation_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM comments
         WHERE observation_id = ? AND status = 'active' AND review_status = 'open'",
    )
    .bind(observation_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

const SELECT_OBSERVATION: &str =
    "SELECT id, project_id, category_id, location_id, status, properties, version,
            creator_id, updator_id, created_at, updated_at, review_comment,
            conflict_version, search_matches, display_field, num_media, num_comments
     FROM observations";

fn bind_values_as<'q>(
    mut query: sqlx::query::QueryAs<'q, sqlx::Sqlite, ObservationRow, sqlx::sqlite::SqliteArguments<'q>>,
    binds: &[geokey_common::filters::BindValue],
) -> sqlx::query::QueryAs<'q, sqlx::Sqlite, ObservationRow, sqlx::sqlite::SqliteArguments<'q>> {
    for bind in binds {
        query = match bind {
            geokey_common::filters::BindValue::Text(s) => query.bind(s.clone()),
            geokey_common::filters::BindValue::Int(i) => query.bind(*i),
            geokey_common::filters::BindValue::Real(r) => query.bind(*r),
        };
    }
    query
}

fn serialize_properties(properties: &Map<String, Value>) -> Result<String> {
    serde_json::to_string(properties)
        .map_err(|e| Error::Internal(format!("Properties serialization: {}", e)))
}

async fn display_field_for(
    pool: &SqlitePool,
    category_id: &str,
    properties: &Map<String, Value>,
) -> Result<Option<String>> {
    let category = categories::get_category(pool, category_id).await?;
    Ok(category
        .and_then(|c| build_display_field(c.display_field.as_deref(), properties)))
}

#[allow(clippy::too_many_arguments)]
async fn insert_snapshot(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    observation_id: &str,
    version: i64,
    status: &str,
    properties: &str,
    review_comment: Option<&str>,
    conflict_version: Option<i64>,
    updator_id: Option<&str>,
) -> Result<String> {
    let id = new_id();
    sqlx::query(
        "INSERT INTO observation_history (id, observation_id, version, status, properties,
                                          review_comment, conflict_version, updator_id,
                                          recorded_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(observation_id)
    .bind(version)
    .bind(status)
    .bind(properties)
    .bind(review_comment)
    .bind(conflict_version)
    .bind(updator_id)
    .bind(now())
    .execute(&mut **tx)
    .await?;
    Ok(id)
}

fn snapshot_ref(snapshot_id: &str) -> Option<HistoricalRef> {
    uuid::Uuid::parse_str(snapshot_id)
        .ok()
        .map(HistoricalRef::observation)
}
