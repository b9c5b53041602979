//! Project read endpoints

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde_json::{json, Value};

use geokey_common::db::models::ProjectRow;

use crate::auth::CurrentUser;
use crate::authz;
use crate::error::ApiResult;
use crate::store;
use crate::AppState;

/// GET /api/projects
pub async fn list_projects(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> ApiResult<Json<Value>> {
    let rows = store::projects::list_projects_for(&state.db, &user).await?;
    let projects: Vec<Value> = rows.iter().map(project_summary).collect();
    Ok(Json(json!(projects)))
}

/// GET /api/projects/{project_id}
pub async fn get_project(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let access = authz::project_for_user(&state.db, &user, &project_id).await?;

    let num_contributions: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM observations
         WHERE project_id = ? AND status IN ('active', 'review')",
    )
    .bind(&access.project.id)
    .fetch_one(&state.db)
    .await
    .map_err(geokey_common::Error::from)?;

    let mut body = project_summary(&access.project);
    body["role"] = json!(access.role());
    body["can_contribute"] = json!(access.can_contribute);
    body["can_moderate"] = json!(access.can_moderate);
    body["is_admin"] = json!(access.is_admin);
    body["num_contributions"] = json!(num_contributions);
    Ok(Json(body))
}

fn project_summary(project: &ProjectRow) -> Value {
    json!({
        "id": project.id,
        "name": project.name,
        "description": project.description,
        "isprivate": project.isprivate,
        "islocked": project.islocked,
        "everyone_contributes": project.everyone_contributes,
        "status": project.status,
        "created_at": project.created_at,
    })
}
