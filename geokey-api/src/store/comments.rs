//! Threaded comments and the review flow
//!
//! Comments form a shallow reply tree under an observation. A comment with
//! `review_status = open` forces its observation into `review`; resolving or
//! deleting the last open review comment returns it to `active`. Responses
//! to a deleted comment stay visible as orphans at the top of the thread.

use sqlx::SqlitePool;
use tracing::info;

use geokey_common::db::models::{CommentRow, ObservationRow};
use geokey_common::events::{ChangeAction, ChangeEvent, EntityKind};
use geokey_common::{Error, Result};

use crate::auth::CurrentUser;
use crate::authz::ProjectAccess;
use crate::store::{audit, entity_ref, new_id, now};
use crate::AppState;

/// One top-level comment with its direct responses.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: CommentRow,
    pub responses: Vec<CommentRow>,
}

/// Add a comment to an observation.
///
/// Drafts cannot be commented on. `responds_to` must reference a comment of
/// the same observation. An `open` review status flags the observation for
/// review.
pub async fn add_comment(
    state: &AppState,
    user: &CurrentUser,
    access: &ProjectAccess,
    observation: &ObservationRow,
    text: &str,
    responds_to: Option<&str>,
    review_status: Option<&str>,
) -> Result<CommentRow> {
    if observation.status == "draft" {
        return Err(Error::MalformedRequest(
            "Drafts cannot be commented on.".to_string(),
        ));
    }
    if let Some(status) = review_status {
        if status != "open" {
            return Err(Error::MalformedRequest(format!(
                "Invalid review status: {}",
                status
            )));
        }
    }

    if let Some(parent_id) = responds_to {
        let parent = get_comment(&state.db, parent_id).await?;
        if parent.map(|p| p.observation_id) != Some(observation.id.clone()) {
            return Err(Error::MalformedRequest(
                "The comment you respond to is not a comment to the same contribution."
                    .to_string(),
            ));
        }
    }

    let id = new_id();
    let created_at = now();
    let mut tx = state.db.begin().await?;
    sqlx::query(
        "INSERT INTO comments (id, observation_id, text, creator_id, respondsto_id,
                               review_status, status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, 'active', ?)",
    )
    .bind(&id)
    .bind(&observation.id)
    .bind(text)
    .bind(user.id_str())
    .bind(responds_to)
    .bind(review_status)
    .bind(&created_at)
    .execute(&mut *tx)
    .await?;
    sqlx::query("UPDATE observations SET num_comments = num_comments + 1 WHERE id = ?")
        .bind(&observation.id)
        .execute(&mut *tx)
        .await?;
    if review_status == Some("open") && observation.status != "review" {
        sqlx::query("UPDATE observations SET status = 'review' WHERE id = ?")
            .bind(&observation.id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    let mut event = ChangeEvent::new(ChangeAction::Created, EntityKind::Comment);
    event.actor = Some(user.actor());
    event.project = Some(entity_ref(&access.project.id, &access.project.name));
    event.observation = Some(entity_ref(
        &observation.id,
        observation.display_field.as_deref().unwrap_or(""),
    ));
    event.comment = Some(entity_ref(&id, text));
    if let Some(parent_id) = responds_to {
        event.subaction = Some("respond".to_string());
        event.changed_field = Some("comment_id".to_string());
        event.changed_value = Some(parent_id.to_string());
    }
    audit::record(state, event).await;

    Ok(CommentRow {
        id,
        observation_id: observation.id.clone(),
        text: text.to_string(),
        creator_id: user.id_str(),
        respondsto_id: responds_to.map(str::to_string),
        review_status: review_status.map(str::to_string),
        status: "active".to_string(),
        created_at,
    })
}

/// Resolve an open review comment. Moderators only.
///
/// When no open review comments remain the observation returns to `active`.
pub async fn resolve_review_comment(
    state: &AppState,
    user: &CurrentUser,
    access: &ProjectAccess,
    observation: &ObservationRow,
    comment_id: &str,
) -> Result<CommentRow> {
    if !access.can_moderate {
        return Err(Error::PermissionDenied(
            "Only moderators may resolve review comments.".to_string(),
        ));
    }

    let mut comment = get_comment(&state.db, comment_id)
        .await?
        .filter(|c| c.observation_id == observation.id && c.status == "active")
        .ok_or_else(|| Error::NotFound("Comment not found.".to_string()))?;
    if comment.review_status.as_deref() != Some("open") {
        return Err(Error::MalformedRequest(
            "The comment is not an open review comment.".to_string(),
        ));
    }

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE comments SET review_status = 'resolved' WHERE id = ?")
        .bind(&comment.id)
        .execute(&mut *tx)
        .await?;
    let remaining: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM comments
         WHERE observation_id = ? AND status = 'active' AND review_status = 'open'
           AND id != ?",
    )
    .bind(&observation.id)
    .bind(&comment.id)
    .fetch_one(&mut *tx)
    .await?;
    if remaining == 0 && observation.status == "review" {
        sqlx::query(
            "UPDATE observations SET status = 'active', review_comment = NULL WHERE id = ?",
        )
        .bind(&observation.id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    info!(comment = %comment.id, observation = %observation.id, "Resolved review comment");

    let mut event = ChangeEvent::new(ChangeAction::Updated, EntityKind::Comment);
    event.actor = Some(user.actor());
    event.project = Some(entity_ref(&access.project.id, &access.project.name));
    event.observation = Some(entity_ref(
        &observation.id,
        observation.display_field.as_deref().unwrap_or(""),
    ));
    event.comment = Some(entity_ref(&comment.id, &comment.text));
    event.changed_field = Some("review_status".to_string());
    event.changed_value = Some("resolved".to_string());
    audit::record(state, event).await;

    comment.review_status = Some("resolved".to_string());
    Ok(comment)
}

/// Soft-delete a comment. Author or project admin only.
///
/// Responses to the deleted comment are kept and surface as orphans. An
/// observation held in `review` solely by this comment returns to `active`.
pub async fn soft_delete_comment(
    state: &AppState,
    user: &CurrentUser,
    access: &ProjectAccess,
    observation: &ObservationRow,
    comment_id: &str,
) -> Result<()> {
    let comment = get_comment(&state.db, comment_id)
        .await?
        .filter(|c| c.observation_id == observation.id && c.status == "active")
        .ok_or_else(|| Error::NotFound("Comment not found.".to_string()))?;
    if comment.creator_id != user.id_str() && !access.is_admin {
        return Err(Error::PermissionDenied(
            "You are not allowed to delete the comment.".to_string(),
        ));
    }

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE comments SET status = 'deleted' WHERE id = ?")
        .bind(&comment.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "UPDATE observations SET num_comments = MAX(num_comments - 1, 0) WHERE id = ?",
    )
    .bind(&observation.id)
    .execute(&mut *tx)
    .await?;
    if comment.review_status.as_deref() == Some("open") {
        let remaining: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM comments
             WHERE observation_id = ? AND status = 'active' AND review_status = 'open'",
        )
        .bind(&observation.id)
        .fetch_one(&mut *tx)
        .await?;
        if remaining == 0 && observation.status == "review" {
            sqlx::query(
                "UPDATE observations SET status = 'active', review_comment = NULL WHERE id = ?",
            )
            .bind(&observation.id)
            .execute(&mut *tx)
            .await?;
        }
    }
    tx.commit().await?;

    let mut event = ChangeEvent::deletion(EntityKind::Comment);
    event.actor = Some(user.actor());
    event.project = Some(entity_ref(&access.project.id, &access.project.name));
    event.observation = Some(entity_ref(
        &observation.id,
        observation.display_field.as_deref().unwrap_or(""),
    ));
    event.comment = Some(entity_ref(&comment.id, &comment.text));
    audit::record(state, event).await;
    Ok(())
}

/// The active comment thread of an observation, built in one pass.
///
/// Top-level nodes are comments without a parent plus orphans whose parent
/// has been deleted.
pub async fn list_comments(
    pool: &SqlitePool,
    observation_id: &str,
) -> Result<Vec<CommentNode>> {
    let rows = sqlx::query_as::<_, CommentRow>(
        "SELECT id, observation_id, text, creator_id, respondsto_id, review_status,
                status, created_at
         FROM comments
         WHERE observation_id = ? AND status = 'active'
         ORDER BY created_at, id",
    )
    .bind(observation_id)
    .fetch_all(pool)
    .await?;

    let active_ids: std::collections::HashSet<&str> =
        rows.iter().map(|r| r.id.as_str()).collect();
    let mut nodes: Vec<CommentNode> = Vec::new();
    let mut responses: Vec<CommentRow> = Vec::new();
    for row in &rows {
        match row.respondsto_id.as_deref() {
            Some(parent) if active_ids.contains(parent) => responses.push(row.clone()),
            _ => nodes.push(CommentNode {
                comment: row.clone(),
                responses: Vec::new(),
            }),
        }
    }
    for response in responses {
        let parent = response.respondsto_id.clone().unwrap_or_default();
        if let Some(node) = nodes.iter_mut().find(|n| n.comment.id == parent) {
            node.responses.push(response);
        }
    }
    Ok(nodes)
}

async fn get_comment(pool: &SqlitePool, comment_id: &str) -> Result<Option<CommentRow>> {
    let row = sqlx::query_as::<_, CommentRow>(
        "SELECT id, observation_id, text, creator_id, respondsto_id, review_status,
                status, created_at
         FROM comments WHERE id = ?",
    )
    .bind(comment_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
