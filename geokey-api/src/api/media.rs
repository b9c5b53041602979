//! Media file endpoints
//!
//! Upload is multipart: a `name` field plus either a `file` part (kind
//! inferred from the filename extension) or an `external_url` field for
//! hosted videos.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde_json::{json, Value};

use geokey_common::db::init::setting_i64;
use geokey_common::db::models::MediaFileRow;
use geokey_common::Error;

use crate::auth::CurrentUser;
use crate::authz;
use crate::error::ApiResult;
use crate::store;
use crate::AppState;

/// GET /api/projects/{pid}/contributions/{oid}/media
pub async fn list_media(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((project_id, observation_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let access = authz::project_for_user(&state.db, &user, &project_id).await?;
    let observation =
        store::observations::get_observation(&state.db, &access, &user, &observation_id).await?;
    let rows = store::media::list_media(&state.db, &observation.id).await?;
    let files: Vec<Value> = rows.iter().map(media_json).collect();
    Ok(Json(json!(files)))
}

/// POST /api/projects/{pid}/contributions/{oid}/media
pub async fn upload_media(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((project_id, observation_id)): Path<(String, String)>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let access = authz::project_for_user(&state.db, &user, &project_id).await?;
    let observation =
        store::observations::get_observation(&state.db, &access, &user, &observation_id).await?;
    let max_bytes = setting_i64(&state.db, "media_max_upload_bytes", 10_485_760).await?;

    let mut name: Option<String> = None;
    let mut description: Option<String> = None;
    let mut external_url: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        Error::MalformedRequest(format!("Invalid multipart request: {}", e))
    })? {
        match field.name().unwrap_or_default() {
            "name" => name = Some(read_text(field).await?),
            "description" => description = Some(read_text(field).await?),
            "external_url" => external_url = Some(read_text(field).await?),
            "file" => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| {
                        Error::MalformedRequest("The file part has no filename.".to_string())
                    })?;
                let bytes = field.bytes().await.map_err(|e| {
                    Error::MalformedRequest(format!("Invalid multipart request: {}", e))
                })?;
                if bytes.len() as i64 > max_bytes {
                    return Err(Error::MalformedRequest(format!(
                        "The file exceeds the maximum upload size of {} bytes.",
                        max_bytes
                    ))
                    .into());
                }
                file = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let name = name.ok_or_else(|| {
        Error::MalformedRequest("A name is required for the media file.".to_string())
    })?;

    let row = match (file, external_url) {
        (Some((filename, content)), _) => {
            store::media::attach(
                &state,
                &user,
                &access,
                &observation,
                &name,
                description.as_deref(),
                &filename,
                &content,
            )
            .await?
        }
        (None, Some(url)) => {
            store::media::attach_external_video(
                &state,
                &user,
                &access,
                &observation,
                &name,
                description.as_deref(),
                &url,
            )
            .await?
        }
        (None, None) => {
            return Err(Error::MalformedRequest(
                "Either a file or an external URL is required.".to_string(),
            )
            .into());
        }
    };

    Ok((StatusCode::CREATED, Json(media_json(&row))))
}

/// GET /api/projects/{pid}/contributions/{oid}/media/{mid}
pub async fn get_media(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((project_id, observation_id, media_id)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    let access = authz::project_for_user(&state.db, &user, &project_id).await?;
    let observation =
        store::observations::get_observation(&state.db, &access, &user, &observation_id).await?;
    let row = store::media::get_media(&state.db, &observation.id, &media_id).await?;
    Ok(Json(media_json(&row)))
}

/// DELETE /api/projects/{pid}/contributions/{oid}/media/{mid}
pub async fn delete_media(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((project_id, observation_id, media_id)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let access = authz::project_for_user(&state.db, &user, &project_id).await?;
    let observation =
        store::observations::get_observation(&state.db, &access, &user, &observation_id).await?;
    store::media::delete_media(&state, &user, &access, &observation, &media_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, Error> {
    field
        .text()
        .await
        .map_err(|e| Error::MalformedRequest(format!("Invalid multipart request: {}", e)))
}

fn media_json(row: &MediaFileRow) -> Value {
    json!({
        "id": row.id,
        "name": row.name,
        "description": row.description,
        "kind": row.kind,
        "file_path": row.file_path,
        "external_url": row.external_url,
        "creator": row.creator_id,
        "created_at": row.created_at,
    })
}
