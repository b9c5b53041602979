//! Append-only audit log
//!
//! Every committed mutation is handed here exactly once. The entry is
//! persisted to `audit_log` and then re-broadcast on the event bus for live
//! consumers. Recording never fails the request that produced the event: a
//! write error is logged and the entry dropped.

use sqlx::SqlitePool;
use tracing::error;

use geokey_common::db::models::AuditEntryRow;
use geokey_common::events::ChangeEvent;
use geokey_common::Result;

use crate::AppState;

/// Persist a mutation event and re-broadcast it.
pub async fn record(state: &AppState, event: ChangeEvent) {
    if let Err(e) = insert(&state.db, &event).await {
        error!(
            action = event.action.as_str(),
            kind = event.kind.as_str(),
            "Failed to write audit entry: {}",
            e
        );
    }
    state.events.emit_lossy(event);
}

async fn insert(pool: &SqlitePool, event: &ChangeEvent) -> Result<()> {
    sqlx::query(
        "INSERT INTO audit_log (timestamp, action, kind, actor,
                                project, usergroup, subset, category, field,
                                observation, comment, media_file,
                                changed_field, changed_value, subaction, historical)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(
        event
            .timestamp
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    )
    .bind(event.action.as_str())
    .bind(event.kind.as_str())
    .bind(as_json(&event.actor)?)
    .bind(as_json(&event.project)?)
    .bind(as_json(&event.usergroup)?)
    .bind(as_json(&event.subset)?)
    .bind(as_json(&event.category)?)
    .bind(as_json(&event.field)?)
    .bind(as_json(&event.observation)?)
    .bind(as_json(&event.comment)?)
    .bind(as_json(&event.media_file)?)
    .bind(&event.changed_field)
    .bind(&event.changed_value)
    .bind(&event.subaction)
    .bind(as_json(&event.historical)?)
    .execute(pool)
    .await?;
    Ok(())
}

fn as_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>> {
    match value {
        None => Ok(None),
        Some(v) => Ok(Some(serde_json::to_string(v).map_err(|e| {
            geokey_common::Error::Internal(format!("Audit reference serialization: {}", e))
        })?)),
    }
}

/// Entries touching one observation, oldest first.
pub async fn entries_for_observation(
    pool: &SqlitePool,
    observation_id: &str,
) -> Result<Vec<AuditEntryRow>> {
    let rows = sqlx::query_as::<_, AuditEntryRow>(
        "SELECT * FROM audit_log
         WHERE observation LIKE '%' || ? || '%'
         ORDER BY id",
    )
    .bind(observation_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Every entry in insertion order.
pub async fn all_entries(pool: &SqlitePool) -> Result<Vec<AuditEntryRow>> {
    let rows = sqlx::query_as::<_, AuditEntryRow>("SELECT * FROM audit_log ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}
