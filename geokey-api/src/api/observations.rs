//! Contribution endpoints
//!
//! POST creates an observation from a GeoJSON Feature; PATCH drives
//! lifecycle transitions via `meta.status` and conflict handling via
//! `properties.version`; listings are scoped by the caller's visibility
//! predicate and optionally narrowed by search terms or a saved subset.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::Value;

use geokey_common::filters::compile_filters;
use geokey_common::{Error, Result};

use crate::auth::CurrentUser;
use crate::authz;
use crate::error::ApiResult;
use crate::geojson::{self, FeaturePayload};
use crate::store;
use crate::store::observations::{NewObservation, ObservationUpdate};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub subset: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: String,
}

/// GET /api/projects/{pid}/contributions
pub async fn list_contributions(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(project_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let access = authz::project_for_user(&state.db, &user, &project_id).await?;

    let extra = match &query.subset {
        None => None,
        Some(subset_id) => {
            let subset =
                store::projects::get_subset(&state.db, &access.project.id, subset_id).await?;
            Some(subset_predicate(&state, &access.project.id, &subset).await?)
        }
    };

    let rows = store::observations::list_observations(
        &state.db,
        &access,
        &user,
        query.search.as_deref(),
        extra,
    )
    .await?;
    let collection = geojson::feature_collection(&state.db, &user, &rows).await?;
    Ok(Json(collection))
}

/// GET /api/projects/{pid}/contributions/search?query=…
pub async fn search_contributions(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(project_id): Path<String>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Value>> {
    let access = authz::project_for_user(&state.db, &user, &project_id).await?;
    let rows = store::observations::list_observations(
        &state.db,
        &access,
        &user,
        Some(&query.query),
        None,
    )
    .await?;
    let collection = geojson::feature_collection(&state.db, &user, &rows).await?;
    Ok(Json(collection))
}

/// POST /api/projects/{pid}/contributions
pub async fn create_contribution(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(project_id): Path<String>,
    Json(payload): Json<FeaturePayload>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let access = authz::project_for_user(&state.db, &user, &project_id).await?;

    let category_id = payload.meta.category.clone().ok_or_else(|| {
        Error::MalformedRequest("A category is required to create a contribution.".to_string())
    })?;
    let (properties, _) = payload.take_properties()?;

    let row = store::observations::create_observation(
        &state,
        &user,
        &access,
        NewObservation {
            category_id,
            requested_status: payload.meta.status.clone(),
            properties,
            location: payload.location.clone().unwrap_or_default(),
            geometry: payload.geometry.clone(),
        },
    )
    .await?;

    let feature = geojson::observation_feature(&state.db, &user, &row).await?;
    Ok((StatusCode::CREATED, Json(feature)))
}

/// GET /api/projects/{pid}/contributions/{oid}
pub async fn get_contribution(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((project_id, observation_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let access = authz::project_for_user(&state.db, &user, &project_id).await?;
    let row =
        store::observations::get_observation(&state.db, &access, &user, &observation_id).await?;
    let feature = geojson::observation_feature(&state.db, &user, &row).await?;
    Ok(Json(feature))
}

/// PATCH /api/projects/{pid}/contributions/{oid}
pub async fn update_contribution(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((project_id, observation_id)): Path<(String, String)>,
    Json(payload): Json<FeaturePayload>,
) -> ApiResult<Json<Value>> {
    let access = authz::project_for_user(&state.db, &user, &project_id).await?;
    let (properties, client_version) = payload.take_properties()?;

    let row = store::observations::update_observation(
        &state,
        &user,
        &access,
        &observation_id,
        ObservationUpdate {
            properties: payload.properties.as_ref().map(|_| properties),
            requested_status: payload.meta.status.clone(),
            review_comment: payload.meta.review_comment.clone(),
            client_version,
        },
    )
    .await?;

    let feature = geojson::observation_feature(&state.db, &user, &row).await?;
    Ok(Json(feature))
}

/// DELETE /api/projects/{pid}/contributions/{oid}
pub async fn delete_contribution(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((project_id, observation_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let access = authz::project_for_user(&state.db, &user, &project_id).await?;
    store::observations::soft_delete_observation(&state, &user, &access, &observation_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Compile a saved subset's filters into a predicate.
async fn subset_predicate(
    state: &AppState,
    project_id: &str,
    subset: &geokey_common::db::models::SubsetRow,
) -> Result<geokey_common::filters::Predicate> {
    let Some(raw) = subset.filters.as_deref() else {
        return Ok(geokey_common::filters::Predicate::always_true());
    };
    let filters: Value = serde_json::from_str(raw)
        .map_err(|e| Error::Internal(format!("Corrupt subset filters: {}", e)))?;
    let schemas = store::categories::load_schemas(&state.db, project_id).await?;
    Ok(compile_filters(&filters, &schemas))
}
