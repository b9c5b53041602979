//! Comment thread endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use geokey_common::Error;

use crate::auth::CurrentUser;
use crate::authz;
use crate::error::ApiResult;
use crate::store;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NewCommentPayload {
    pub text: String,
    pub responds_to: Option<String>,
    pub review_status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCommentPayload {
    pub review_status: String,
}

/// GET /api/projects/{pid}/contributions/{oid}/comments
pub async fn list_comments(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((project_id, observation_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let access = authz::project_for_user(&state.db, &user, &project_id).await?;
    let observation =
        store::observations::get_observation(&state.db, &access, &user, &observation_id).await?;
    let thread = store::comments::list_comments(&state.db, &observation.id).await?;
    Ok(Json(json!(thread)))
}

/// POST /api/projects/{pid}/contributions/{oid}/comments
pub async fn create_comment(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((project_id, observation_id)): Path<(String, String)>,
    Json(payload): Json<NewCommentPayload>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let access = authz::project_for_user(&state.db, &user, &project_id).await?;
    let observation =
        store::observations::get_observation(&state.db, &access, &user, &observation_id).await?;

    let comment = store::comments::add_comment(
        &state,
        &user,
        &access,
        &observation,
        &payload.text,
        payload.responds_to.as_deref(),
        payload.review_status.as_deref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(json!(comment))))
}

/// PATCH /api/projects/{pid}/contributions/{oid}/comments/{cid}
///
/// The only supported update is resolving an open review comment.
pub async fn update_comment(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((project_id, observation_id, comment_id)): Path<(String, String, String)>,
    Json(payload): Json<UpdateCommentPayload>,
) -> ApiResult<Json<Value>> {
    if payload.review_status != "resolved" {
        return Err(Error::MalformedRequest(format!(
            "Cannot set review status to '{}'.",
            payload.review_status
        ))
        .into());
    }

    let access = authz::project_for_user(&state.db, &user, &project_id).await?;
    let observation =
        store::observations::get_observation(&state.db, &access, &user, &observation_id).await?;
    let comment = store::comments::resolve_review_comment(
        &state,
        &user,
        &access,
        &observation,
        &comment_id,
    )
    .await?;
    Ok(Json(json!(comment)))
}

/// DELETE /api/projects/{pid}/contributions/{oid}/comments/{cid}
pub async fn delete_comment(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((project_id, observation_id, comment_id)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let access = authz::project_for_user(&state.db, &user, &project_id).await?;
    let observation =
        store::observations::get_observation(&state.db, &access, &user, &observation_id).await?;
    store::comments::soft_delete_comment(&state, &user, &access, &observation, &comment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
