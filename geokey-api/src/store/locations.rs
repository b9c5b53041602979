//! Location persistence
//!
//! Locations are shared across projects: public rows appear everywhere,
//! project-private rows only within their project, fully private rows only
//! through the observations that own them. Locations are not audited.

use serde::Deserialize;
use serde_json::Value;
use sqlx::SqlitePool;

use geokey_common::db::models::LocationRow;
use geokey_common::{Error, Result};

use crate::auth::CurrentUser;
use crate::store::{new_id, now};

/// Location part of a contribution payload: either a reference to an
/// existing row by id, or the attributes of a new one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationPayload {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub private: Option<bool>,
    pub private_for_project: Option<String>,
}

fn validate_geometry(geometry: &Value) -> Result<String> {
    let valid = geometry.get("type").and_then(Value::as_str).is_some()
        && (geometry.get("coordinates").is_some() || geometry.get("geometries").is_some());
    if !valid {
        return Err(Error::MalformedRequest(
            "Invalid GeoJSON geometry.".to_string(),
        ));
    }
    serde_json::to_string(geometry)
        .map_err(|e| Error::MalformedRequest(format!("Invalid GeoJSON geometry: {}", e)))
}

/// Resolve the location of a new or relocated contribution.
///
/// A payload with an id must reference a row usable by the project; anything
/// else creates a fresh row from the payload attributes and the supplied
/// geometry.
pub async fn create_or_fetch(
    pool: &SqlitePool,
    user: &CurrentUser,
    project_id: &str,
    payload: &LocationPayload,
    geometry: Option<&Value>,
) -> Result<LocationRow> {
    if let Some(id) = &payload.id {
        let row = get_location(pool, id)
            .await?
            .ok_or_else(|| Error::MalformedRequest(format!("Location {} does not exist.", id)))?;
        if !usable_by_project(&row, project_id) {
            return Err(Error::MalformedRequest(format!(
                "The location {} cannot be used with this project.",
                id
            )));
        }
        return Ok(row);
    }

    let geometry = geometry.ok_or_else(|| {
        Error::MalformedRequest("A geometry is required to create a location.".to_string())
    })?;
    let geometry = validate_geometry(geometry)?;

    let private = payload.private.unwrap_or(false);
    let private_for = payload.private_for_project.as_deref();
    if let Some(scoped) = private_for {
        if scoped != project_id {
            return Err(Error::MalformedRequest(format!(
                "The location cannot be made private for project {}.",
                scoped
            )));
        }
    }

    let id = new_id();
    let created_at = now();
    sqlx::query(
        "INSERT INTO locations (id, name, description, geometry, status, private,
                                private_for_project_id, creator_id, version, created_at)
         VALUES (?, ?, ?, ?, 'active', ?, ?, ?, 1, ?)",
    )
    .bind(&id)
    .bind(&payload.name)
    .bind(&payload.description)
    .bind(&geometry)
    .bind(private)
    .bind(private_for)
    .bind(user.id_str())
    .bind(&created_at)
    .execute(pool)
    .await?;

    Ok(LocationRow {
        id,
        name: payload.name.clone(),
        description: payload.description.clone(),
        geometry,
        status: "active".to_string(),
        private,
        private_for_project_id: private_for.map(str::to_string),
        creator_id: user.id_str(),
        version: 1,
        created_at,
    })
}

/// A location may carry observations of a project when it is public or
/// private to exactly that project.
pub fn usable_by_project(location: &LocationRow, project_id: &str) -> bool {
    if !location.private {
        return true;
    }
    location.private_for_project_id.as_deref() == Some(project_id)
}

pub async fn get_location(pool: &SqlitePool, location_id: &str) -> Result<Option<LocationRow>> {
    let row = sqlx::query_as::<_, LocationRow>(
        "SELECT id, name, description, geometry, status, private,
                private_for_project_id, creator_id, version, created_at
         FROM locations WHERE id = ?",
    )
    .bind(location_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Locations available for new contributions in a project, optionally
/// narrowed to names containing `query`.
pub async fn list_for_project(
    pool: &SqlitePool,
    project_id: &str,
    query: Option<&str>,
) -> Result<Vec<LocationRow>> {
    let base = "SELECT id, name, description, geometry, status, private,
                       private_for_project_id, creator_id, version, created_at
                FROM locations
                WHERE (private = 0 OR private_for_project_id = ?)";

    let rows = match query {
        None => {
            sqlx::query_as::<_, LocationRow>(&format!("{} ORDER BY created_at", base))
                .bind(project_id)
                .fetch_all(pool)
                .await?
        }
        Some(term) => {
            let pattern = format!(
                "%{}%",
                geokey_common::filters::escape_like(&term.to_lowercase())
            );
            sqlx::query_as::<_, LocationRow>(&format!(
                "{} AND lower(name) LIKE ? ESCAPE '\\' ORDER BY created_at",
                base
            ))
            .bind(project_id)
            .bind(pattern)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

/// Update a location's attributes and geometry, bumping its version.
pub async fn update_location(
    pool: &SqlitePool,
    project_id: &str,
    location_id: &str,
    name: Option<&str>,
    description: Option<&str>,
    geometry: Option<&Value>,
) -> Result<LocationRow> {
    let mut row = get_location(pool, location_id)
        .await?
        .filter(|row| usable_by_project(row, project_id))
        .ok_or_else(|| Error::NotFound(format!("Location {} not found.", location_id)))?;

    if let Some(name) = name {
        row.name = Some(name.to_string());
    }
    if let Some(description) = description {
        row.description = Some(description.to_string());
    }
    if let Some(geometry) = geometry {
        row.geometry = validate_geometry(geometry)?;
    }
    row.version += 1;

    sqlx::query(
        "UPDATE locations SET name = ?, description = ?, geometry = ?, version = ? WHERE id = ?",
    )
    .bind(&row.name)
    .bind(&row.description)
    .bind(&row.geometry)
    .bind(row.version)
    .bind(&row.id)
    .execute(pool)
    .await?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::users;
    use geokey_common::db::init::init_memory_database;
    use serde_json::json;

    async fn fixture() -> (SqlitePool, CurrentUser, String) {
        let pool = init_memory_database().await.unwrap();
        let user = users::create_user(&pool, "ines", None, false).await.unwrap();
        let user = CurrentUser {
            id: uuid::Uuid::parse_str(&user.id).unwrap(),
            display_name: user.display_name,
            is_superuser: false,
            is_anonymous: false,
        };
        let project_id = new_id();
        sqlx::query(
            "INSERT INTO projects (id, name, isprivate, everyone_contributes, status, creator_id)
             VALUES (?, 'P', 0, 'true', 'active', ?)",
        )
        .bind(&project_id)
        .bind(user.id_str())
        .execute(&pool)
        .await
        .unwrap();
        (pool, user, project_id)
    }

    #[tokio::test]
    async fn project_private_location_is_rejected_elsewhere() {
        let (pool, user, project_id) = fixture().await;
        let other_project = new_id();
        sqlx::query(
            "INSERT INTO projects (id, name, isprivate, everyone_contributes, status, creator_id)
             VALUES (?, 'Q', 0, 'true', 'active', ?)",
        )
        .bind(&other_project)
        .bind(user.id_str())
        .execute(&pool)
        .await
        .unwrap();

        let payload = LocationPayload {
            private: Some(true),
            private_for_project: Some(project_id.clone()),
            ..Default::default()
        };
        let geometry = json!({"type": "Point", "coordinates": [0.15, 51.51]});
        let location = create_or_fetch(&pool, &user, &project_id, &payload, Some(&geometry))
            .await
            .unwrap();

        let reuse = LocationPayload {
            id: Some(location.id.clone()),
            ..Default::default()
        };
        let err = create_or_fetch(&pool, &user, &other_project, &reuse, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn name_filter_narrows_listing() {
        let (pool, user, project_id) = fixture().await;
        for name in ["Hyde Park", "Victoria Park", "Hyde Corner"] {
            let payload = LocationPayload {
                name: Some(name.to_string()),
                ..Default::default()
            };
            let geometry = json!({"type": "Point", "coordinates": [0.0, 51.0]});
            create_or_fetch(&pool, &user, &project_id, &payload, Some(&geometry))
                .await
                .unwrap();
        }

        let all = list_for_project(&pool, &project_id, None).await.unwrap();
        assert_eq!(all.len(), 3);
        let hyde = list_for_project(&pool, &project_id, Some("hyde"))
            .await
            .unwrap();
        assert_eq!(hyde.len(), 2);
    }

    #[tokio::test]
    async fn update_bumps_version() {
        let (pool, user, project_id) = fixture().await;
        let payload = LocationPayload {
            name: Some("Old name".to_string()),
            ..Default::default()
        };
        let geometry = json!({"type": "Point", "coordinates": [0.0, 51.0]});
        let location = create_or_fetch(&pool, &user, &project_id, &payload, Some(&geometry))
            .await
            .unwrap();

        let updated = update_location(&pool, &project_id, &location.id, Some("New name"), None, None)
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.name.as_deref(), Some("New name"));
    }

    #[tokio::test]
    async fn geometry_without_coordinates_is_rejected() {
        let (pool, user, project_id) = fixture().await;
        let geometry = json!({"type": "Point"});
        let err = create_or_fetch(
            &pool,
            &user,
            &project_id,
            &LocationPayload::default(),
            Some(&geometry),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::MalformedRequest(_)));
    }
}
