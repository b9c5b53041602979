//! Project, admin, user-group and subset persistence

use sqlx::SqlitePool;
use tracing::info;

use geokey_common::db::models::{ProjectRow, SubsetRow, UserGroupRow};
use geokey_common::events::{ChangeAction, ChangeEvent, EntityKind};
use geokey_common::{Error, Result};

use crate::auth::CurrentUser;
use crate::store::{audit, entity_ref, new_id, now};
use crate::AppState;

pub async fn get_project_row(pool: &SqlitePool, project_id: &str) -> Result<Option<ProjectRow>> {
    let row = sqlx::query_as::<_, ProjectRow>(
        "SELECT id, name, description, isprivate, islocked, everyone_contributes,
                status, creator_id, created_at
         FROM projects WHERE id = ?",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Membership in the project's admin set.
pub async fn is_admin(pool: &SqlitePool, project_id: &str, user_id: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM admins WHERE project_id = ? AND user_id = ?)",
    )
    .bind(project_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// (moderating, contributing, member) group flags for a user in a project.
pub async fn group_capabilities(
    pool: &SqlitePool,
    project_id: &str,
    user_id: &str,
) -> Result<(bool, bool, bool)> {
    let row: Option<(bool, bool)> = sqlx::query_as(
        r#"
        SELECT MAX(g.can_moderate), MAX(g.can_contribute)
        FROM usergroups g
        JOIN usergroup_members m ON m.usergroup_id = g.id
        WHERE g.project_id = ? AND m.user_id = ?
        HAVING COUNT(*) > 0
        "#,
    )
    .bind(project_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(match row {
        Some((moderate, contribute)) => (moderate, contribute, true),
        None => (false, false, false),
    })
}

/// All groups of the project the user belongs to.
pub async fn user_groups_for(
    pool: &SqlitePool,
    project_id: &str,
    user_id: &str,
) -> Result<Vec<UserGroupRow>> {
    let rows = sqlx::query_as::<_, UserGroupRow>(
        r#"
        SELECT g.id, g.project_id, g.name, g.description, g.can_contribute,
               g.can_moderate, g.filters, g.created_at
        FROM usergroups g
        JOIN usergroup_members m ON m.usergroup_id = g.id
        WHERE g.project_id = ? AND m.user_id = ?
        ORDER BY g.name
        "#,
    )
    .bind(project_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Projects visible to the caller in list views.
///
/// Public active projects are visible to everyone; private and inactive
/// projects only to their members respectively admins.
pub async fn list_projects_for(pool: &SqlitePool, user: &CurrentUser) -> Result<Vec<ProjectRow>> {
    if user.is_superuser {
        let rows = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, name, description, isprivate, islocked, everyone_contributes,
                    status, creator_id, created_at
             FROM projects WHERE status != 'deleted' ORDER BY name",
        )
        .fetch_all(pool)
        .await?;
        return Ok(rows);
    }

    if user.is_anonymous {
        let rows = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, name, description, isprivate, islocked, everyone_contributes,
                    status, creator_id, created_at
             FROM projects WHERE status = 'active' AND isprivate = 0 ORDER BY name",
        )
        .fetch_all(pool)
        .await?;
        return Ok(rows);
    }

    let rows = sqlx::query_as::<_, ProjectRow>(
        r#"
        SELECT DISTINCT p.id, p.name, p.description, p.isprivate, p.islocked,
               p.everyone_contributes, p.status, p.creator_id, p.created_at
        FROM projects p
        LEFT JOIN admins a ON a.project_id = p.id AND a.user_id = ?
        LEFT JOIN usergroups g ON g.project_id = p.id
        LEFT JOIN usergroup_members m ON m.usergroup_id = g.id AND m.user_id = ?
        WHERE p.status != 'deleted'
          AND (
            (p.status = 'active' AND (p.isprivate = 0 OR a.user_id IS NOT NULL
                                      OR m.user_id IS NOT NULL))
            OR (p.status = 'inactive' AND a.user_id IS NOT NULL)
          )
        ORDER BY p.name
        "#,
    )
    .bind(user.id_str())
    .bind(user.id_str())
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Create a project; the creator becomes its first administrator.
pub async fn create_project(
    state: &AppState,
    creator: &CurrentUser,
    name: &str,
    description: Option<&str>,
    isprivate: bool,
    everyone_contributes: &str,
) -> Result<ProjectRow> {
    if !matches!(everyone_contributes, "true" | "auth" | "false") {
        return Err(Error::MalformedRequest(format!(
            "Invalid contribution permission: {}",
            everyone_contributes
        )));
    }

    let id = new_id();
    let created_at = now();

    let mut tx = state.db.begin().await?;
    sqlx::query(
        "INSERT INTO projects (id, name, description, isprivate, islocked,
                               everyone_contributes, status, creator_id, created_at)
         VALUES (?, ?, ?, ?, 0, ?, 'active', ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(description)
    .bind(isprivate)
    .bind(everyone_contributes)
    .bind(creator.id_str())
    .bind(&created_at)
    .execute(&mut *tx)
    .await?;
    sqlx::query("INSERT INTO admins (project_id, user_id, contact) VALUES (?, ?, 1)")
        .bind(&id)
        .bind(creator.id_str())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(project = %id, "Created project '{}'", name);

    let mut event = ChangeEvent::new(ChangeAction::Created, EntityKind::Project);
    event.actor = Some(creator.actor());
    event.project = Some(entity_ref(&id, name));
    audit::record(state, event).await;

    Ok(ProjectRow {
        id,
        name: name.to_string(),
        description: description.map(str::to_string),
        isprivate,
        islocked: false,
        everyone_contributes: everyone_contributes.to_string(),
        status: "active".to_string(),
        creator_id: creator.id_str(),
        created_at,
    })
}

/// Soft-delete a project.
pub async fn delete_project(state: &AppState, actor: &CurrentUser, project: &ProjectRow) -> Result<()> {
    sqlx::query("UPDATE projects SET status = 'deleted' WHERE id = ?")
        .bind(&project.id)
        .execute(&state.db)
        .await?;

    let mut event = ChangeEvent::deletion(EntityKind::Project);
    event.actor = Some(actor.actor());
    event.project = Some(entity_ref(&project.id, &project.name));
    audit::record(state, event).await;
    Ok(())
}

/// Grant admin rights on a project.
pub async fn add_admin(
    state: &AppState,
    actor: &CurrentUser,
    project: &ProjectRow,
    user_id: &str,
    contact: bool,
) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO admins (project_id, user_id, contact) VALUES (?, ?, ?)")
        .bind(&project.id)
        .bind(user_id)
        .bind(contact)
        .execute(&state.db)
        .await?;

    let name = super::users::display_name(&state.db, user_id)
        .await?
        .unwrap_or_default();
    let mut event = ChangeEvent::new(ChangeAction::Created, EntityKind::Admin);
    event.actor = Some(actor.actor());
    event.project = Some(entity_ref(&project.id, &project.name));
    event.changed_field = Some("user".to_string());
    event.changed_value = Some(name);
    audit::record(state, event).await;
    Ok(())
}

/// Revoke admin rights; the admin set must stay non-empty.
pub async fn remove_admin(
    state: &AppState,
    actor: &CurrentUser,
    project: &ProjectRow,
    user_id: &str,
) -> Result<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admins WHERE project_id = ?")
        .bind(&project.id)
        .fetch_one(&state.db)
        .await?;
    if count <= 1 {
        return Err(Error::MalformedRequest(
            "A project must keep at least one administrator.".to_string(),
        ));
    }

    sqlx::query("DELETE FROM admins WHERE project_id = ? AND user_id = ?")
        .bind(&project.id)
        .bind(user_id)
        .execute(&state.db)
        .await?;

    let name = super::users::display_name(&state.db, user_id)
        .await?
        .unwrap_or_default();
    let mut event = ChangeEvent::new(ChangeAction::Deleted, EntityKind::Admin);
    event.actor = Some(actor.actor());
    event.project = Some(entity_ref(&project.id, &project.name));
    event.changed_field = Some("user".to_string());
    event.changed_value = Some(name);
    audit::record(state, event).await;
    Ok(())
}

/// Create a user group.
///
/// Moderation implies contribution, enforced on save.
pub async fn create_usergroup(
    state: &AppState,
    actor: &CurrentUser,
    project: &ProjectRow,
    name: &str,
    description: Option<&str>,
    can_contribute: bool,
    can_moderate: bool,
) -> Result<UserGroupRow> {
    let can_contribute = can_contribute || can_moderate;
    let id = new_id();
    let created_at = now();

    sqlx::query(
        "INSERT INTO usergroups (id, project_id, name, description, can_contribute,
                                 can_moderate, filters, created_at)
         VALUES (?, ?, ?, ?, ?, ?, NULL, ?)",
    )
    .bind(&id)
    .bind(&project.id)
    .bind(name)
    .bind(description)
    .bind(can_contribute)
    .bind(can_moderate)
    .bind(&created_at)
    .execute(&state.db)
    .await?;

    let mut event = ChangeEvent::new(ChangeAction::Created, EntityKind::UserGroup);
    event.actor = Some(actor.actor());
    event.project = Some(entity_ref(&project.id, &project.name));
    event.usergroup = Some(entity_ref(&id, name));
    audit::record(state, event).await;

    Ok(UserGroupRow {
        id,
        project_id: project.id.clone(),
        name: name.to_string(),
        description: description.map(str::to_string),
        can_contribute,
        can_moderate,
        filters: None,
        created_at,
    })
}

/// Replace a group's filter map.
///
/// `None` clears the restriction; an empty JSON object grants nothing.
pub async fn update_usergroup_filters(
    state: &AppState,
    actor: &CurrentUser,
    project: &ProjectRow,
    group: &UserGroupRow,
    filters: Option<&serde_json::Value>,
) -> Result<()> {
    let serialized = match filters {
        Some(value) => Some(serde_json::to_string(value).map_err(|e| {
            Error::MalformedRequest(format!("Filter definition is not valid JSON: {}", e))
        })?),
        None => None,
    };

    sqlx::query("UPDATE usergroups SET filters = ? WHERE id = ?")
        .bind(&serialized)
        .bind(&group.id)
        .execute(&state.db)
        .await?;

    let mut event = ChangeEvent::new(ChangeAction::Updated, EntityKind::UserGroup);
    event.actor = Some(actor.actor());
    event.project = Some(entity_ref(&project.id, &project.name));
    event.usergroup = Some(entity_ref(&group.id, &group.name));
    event.changed_field = Some("filters".to_string());
    event.changed_value = serialized;
    audit::record(state, event).await;
    Ok(())
}

/// Add a user to a group.
pub async fn add_group_member(
    state: &AppState,
    actor: &CurrentUser,
    project: &ProjectRow,
    group: &UserGroupRow,
    user_id: &str,
) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO usergroup_members (usergroup_id, user_id) VALUES (?, ?)")
        .bind(&group.id)
        .bind(user_id)
        .execute(&state.db)
        .await?;

    let name = super::users::display_name(&state.db, user_id)
        .await?
        .unwrap_or_default();
    let mut event = ChangeEvent::new(ChangeAction::Updated, EntityKind::UserGroup);
    event.actor = Some(actor.actor());
    event.project = Some(entity_ref(&project.id, &project.name));
    event.usergroup = Some(entity_ref(&group.id, &group.name));
    event.changed_field = Some("users".to_string());
    event.changed_value = Some(name);
    event.subaction = Some("add_member".to_string());
    audit::record(state, event).await;
    Ok(())
}

/// Create a saved filter over the project's observations.
pub async fn create_subset(
    state: &AppState,
    actor: &CurrentUser,
    project: &ProjectRow,
    name: &str,
    description: Option<&str>,
    filters: &serde_json::Value,
) -> Result<SubsetRow> {
    let id = new_id();
    let created_at = now();
    let serialized = serde_json::to_string(filters).map_err(|e| {
        Error::MalformedRequest(format!("Filter definition is not valid JSON: {}", e))
    })?;

    sqlx::query(
        "INSERT INTO subsets (id, project_id, name, description, creator_id, filters, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&project.id)
    .bind(name)
    .bind(description)
    .bind(actor.id_str())
    .bind(&serialized)
    .bind(&created_at)
    .execute(&state.db)
    .await?;

    let mut event = ChangeEvent::new(ChangeAction::Created, EntityKind::Subset);
    event.actor = Some(actor.actor());
    event.project = Some(entity_ref(&project.id, &project.name));
    event.subset = Some(entity_ref(&id, name));
    audit::record(state, event).await;

    Ok(SubsetRow {
        id,
        project_id: project.id.clone(),
        name: name.to_string(),
        description: description.map(str::to_string),
        creator_id: actor.id_str(),
        filters: Some(serialized),
        created_at,
    })
}

pub async fn get_subset(
    pool: &SqlitePool,
    project_id: &str,
    subset_id: &str,
) -> Result<SubsetRow> {
    sqlx::query_as::<_, SubsetRow>(
        "SELECT id, project_id, name, description, creator_id, filters, created_at
         FROM subsets WHERE id = ? AND project_id = ?",
    )
    .bind(subset_id)
    .bind(project_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound("Subset not found.".to_string()))
}
