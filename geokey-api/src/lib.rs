//! geokey-api library - HTTP service for the GeoKey contribution platform
//!
//! Exposes the public JSON/GeoJSON API: projects, contributions, comments,
//! media files and locations. Request handling is thin dispatch; the rules
//! live in [`authz`] and the [`store`] modules, shared validation and filter
//! compilation in `geokey-common`.

use std::path::PathBuf;

use axum::Router;
use sqlx::SqlitePool;

use geokey_common::events::EventBus;

pub mod api;
pub mod auth;
pub mod authz;
pub mod error;
pub mod geojson;
pub mod store;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Change-event bus; the audit writer re-broadcasts every recorded event
    pub events: EventBus,
    /// Directory that stores uploaded media blobs
    pub media_dir: PathBuf,
}

impl AppState {
    /// Create new application state
    pub fn new(db: SqlitePool, events: EventBus, media_dir: PathBuf) -> Self {
        Self {
            db,
            events,
            media_dir,
        }
    }
}

/// Build application router
///
/// All `/api` routes run behind the bearer-token middleware, which resolves
/// the caller to a [`auth::CurrentUser`] (anonymous when no token is sent).
/// The health endpoint stays outside the middleware.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, put};

    let protected = Router::new()
        .route("/api/projects", get(api::projects::list_projects))
        .route("/api/projects/:project_id", get(api::projects::get_project))
        .route(
            "/api/projects/:project_id/contributions",
            get(api::observations::list_contributions)
                .post(api::observations::create_contribution),
        )
        .route(
            "/api/projects/:project_id/contributions/search",
            get(api::observations::search_contributions),
        )
        .route(
            "/api/projects/:project_id/contributions/:observation_id",
            get(api::observations::get_contribution)
                .patch(api::observations::update_contribution)
                .delete(api::observations::delete_contribution),
        )
        .route(
            "/api/projects/:project_id/contributions/:observation_id/comments",
            get(api::comments::list_comments).post(api::comments::create_comment),
        )
        .route(
            "/api/projects/:project_id/contributions/:observation_id/comments/:comment_id",
            axum::routing::patch(api::comments::update_comment)
                .delete(api::comments::delete_comment),
        )
        .route(
            "/api/projects/:project_id/contributions/:observation_id/media",
            get(api::media::list_media).post(api::media::upload_media),
        )
        .route(
            "/api/projects/:project_id/contributions/:observation_id/media/:media_id",
            get(api::media::get_media).delete(api::media::delete_media),
        )
        .route(
            "/api/projects/:project_id/locations",
            get(api::locations::list_locations),
        )
        .route(
            "/api/projects/:project_id/locations/:location_id",
            put(api::locations::update_location),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::resolve_user,
        ));

    Router::new()
        .merge(protected)
        .merge(api::health::health_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
