//! Location endpoints

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::CurrentUser;
use crate::authz;
use crate::error::ApiResult;
use crate::geojson::location_feature;
use crate::store;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LocationQuery {
    pub query: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LocationUpdatePayload {
    pub name: Option<String>,
    pub description: Option<String>,
    pub geometry: Option<Value>,
}

/// GET /api/projects/{pid}/locations
pub async fn list_locations(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(project_id): Path<String>,
    Query(query): Query<LocationQuery>,
) -> ApiResult<Json<Value>> {
    let access = authz::project_for_user(&state.db, &user, &project_id).await?;
    let rows =
        store::locations::list_for_project(&state.db, &access.project.id, query.query.as_deref())
            .await?;

    let mut features = Vec::with_capacity(rows.len());
    for row in &rows {
        features.push(location_feature(row)?);
    }
    Ok(Json(json!({
        "type": "FeatureCollection",
        "features": features,
    })))
}

/// PUT /api/projects/{pid}/locations/{lid}
pub async fn update_location(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((project_id, location_id)): Path<(String, String)>,
    Json(payload): Json<LocationUpdatePayload>,
) -> ApiResult<Json<Value>> {
    let access = authz::project_for_user(&state.db, &user, &project_id).await?;
    if !access.can_contribute {
        return Err(geokey_common::Error::PermissionDenied(
            "You are not allowed to update locations of this project.".to_string(),
        )
        .into());
    }

    let row = store::locations::update_location(
        &state.db,
        &access.project.id,
        &location_id,
        payload.name.as_deref(),
        payload.description.as_deref(),
        payload.geometry.as_ref(),
    )
    .await?;
    Ok(Json(location_feature(&row)?))
}
