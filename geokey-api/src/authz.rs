//! Authorization resolver
//!
//! Maps (user, project) to a set of capabilities and, for read paths, to a
//! visibility predicate over the observations table. Resources the caller
//! must not learn about resolve to `NotFound` rather than `PermissionDenied`.

use sqlx::SqlitePool;
use tracing::debug;

use geokey_common::db::models::ProjectRow;
use geokey_common::filters::{compile_filters, Predicate};
use geokey_common::{Error, Result};

use crate::auth::CurrentUser;
use crate::store;

/// A project together with the caller's resolved capabilities on it.
#[derive(Debug, Clone)]
pub struct ProjectAccess {
    pub project: ProjectRow,
    pub is_admin: bool,
    pub can_moderate: bool,
    pub can_contribute: bool,
    /// Caller is member of at least one user group of the project.
    pub is_member: bool,
}

impl ProjectAccess {
    /// Role name reported on project payloads.
    pub fn role(&self) -> &'static str {
        if self.is_admin {
            "administrator"
        } else if self.can_moderate {
            "moderator"
        } else if self.can_contribute {
            "contributor"
        } else {
            "watcher"
        }
    }
}

/// Load a project and resolve the caller's capabilities on it.
///
/// Fails with `NotFound` when the project does not exist, is deleted, or is
/// hidden from the caller (private without membership, or inactive without
/// admin rights).
pub async fn project_for_user(
    pool: &SqlitePool,
    user: &CurrentUser,
    project_id: &str,
) -> Result<ProjectAccess> {
    let hidden = || Error::NotFound("Project not found.".to_string());

    let project = store::projects::get_project_row(pool, project_id)
        .await?
        .ok_or_else(hidden)?;
    if project.status == "deleted" {
        return Err(hidden());
    }

    let is_admin = user.is_superuser
        || store::projects::is_admin(pool, project_id, &user.id_str()).await?;

    let (in_moderating_group, in_contributing_group, is_member) = if user.is_anonymous {
        (false, false, false)
    } else {
        store::projects::group_capabilities(pool, project_id, &user.id_str()).await?
    };

    let active = project.status == "active";
    let can_access = active && (is_admin || !project.isprivate || is_member);
    // Inactive projects are visible to their admins only.
    let admin_access = project.status == "inactive" && is_admin;
    if !can_access && !admin_access {
        debug!(project_id, "Project hidden from caller");
        return Err(hidden());
    }

    let can_moderate = active && (is_admin || in_moderating_group);
    let can_contribute = active
        && (is_admin
            || in_contributing_group
            || match project.everyone_contributes.as_str() {
                "true" => true,
                "auth" => !user.is_anonymous,
                _ => false,
            });

    Ok(ProjectAccess {
        project,
        is_admin,
        can_moderate,
        can_contribute,
        is_member,
    })
}

/// Predicate selecting the observations of the project the caller may see.
///
/// Status gates: deleted rows never surface; drafts belong to their creator;
/// pending rows additionally surface to moderators; active and review rows
/// surface per role and group filters. Non-moderator group members are
/// scoped by the union of their groups' filters, where a group without a
/// filter map grants everything and an empty filter map grants nothing.
pub async fn visibility_predicate(
    pool: &SqlitePool,
    access: &ProjectAccess,
    user: &CurrentUser,
) -> Result<Predicate> {
    if access.is_admin || access.can_moderate {
        return Ok(Predicate {
            sql: "status != 'deleted' AND (status != 'draft' OR creator_id = ?)".to_string(),
            binds: vec![geokey_common::filters::BindValue::Text(user.id_str())],
        });
    }

    if user.is_anonymous {
        return Ok(Predicate {
            sql: "status IN ('active', 'review')".to_string(),
            binds: Vec::new(),
        });
    }

    let own = Predicate {
        sql: "creator_id = ? AND status != 'deleted'".to_string(),
        binds: vec![geokey_common::filters::BindValue::Text(user.id_str())],
    };
    let released = Predicate {
        sql: "status IN ('active', 'review')".to_string(),
        binds: Vec::new(),
    };

    let scoped = match group_filter_predicate(pool, access, user).await? {
        Some(filters) => released.and(filters),
        None => released,
    };

    Ok(Predicate::or_join(vec![own, scoped]))
}

/// Union of the compiled filters of every group the caller belongs to.
///
/// Returns `None` when the caller is unrestricted: not a member of any
/// group, or member of at least one group without a filter map.
async fn group_filter_predicate(
    pool: &SqlitePool,
    access: &ProjectAccess,
    user: &CurrentUser,
) -> Result<Option<Predicate>> {
    let groups =
        store::projects::user_groups_for(pool, &access.project.id, &user.id_str()).await?;
    if groups.is_empty() {
        return Ok(None);
    }
    if groups.iter().any(|g| g.filters.is_none()) {
        return Ok(None);
    }

    let schemas = store::categories::load_schemas(pool, &access.project.id).await?;
    let mut clauses = Vec::new();
    for group in &groups {
        // Checked above; groups without filters short-circuit to None.
        let Some(raw) = group.filters.as_deref() else {
            continue;
        };
        let filters: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| Error::Internal(format!("Corrupt filter definition: {}", e)))?;
        clauses.push(compile_filters(&filters, &schemas));
    }

    Ok(Some(Predicate::or_join(clauses)))
}
