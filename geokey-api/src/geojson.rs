//! GeoJSON wire shapes for contributions
//!
//! Observations travel as GeoJSON `Feature`s: the geometry comes from the
//! owning location, field values sit in `properties`, and lifecycle data in
//! `meta`. On PATCH, `properties.version` carries the client's known version
//! for conflict handling and is split off before validation.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use sqlx::SqlitePool;

use geokey_common::db::models::{LocationRow, ObservationRow};
use geokey_common::{Error, Result};

use crate::auth::CurrentUser;
use crate::store::locations::LocationPayload;
use crate::store::{categories, locations, users};

/// Incoming contribution payload (POST and PATCH).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeaturePayload {
    pub geometry: Option<Value>,
    pub properties: Option<Map<String, Value>>,
    #[serde(default)]
    pub meta: MetaPayload,
    pub location: Option<LocationPayload>,
}

/// `meta` part of a contribution payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetaPayload {
    pub category: Option<String>,
    pub status: Option<String>,
    pub review_comment: Option<String>,
}

impl FeaturePayload {
    /// Split the client's known version off the properties map.
    ///
    /// Returns the remaining field values and the version, failing when the
    /// version is present but not an integer.
    pub fn take_properties(&self) -> Result<(Map<String, Value>, Option<i64>)> {
        let mut properties = self.properties.clone().unwrap_or_default();
        let version = match properties.remove("version") {
            None => None,
            Some(value) => Some(parse_version(&value)?),
        };
        Ok((properties, version))
    }
}

fn parse_version(value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| Error::MalformedRequest("The version provided is not an integer.".to_string()))
}

/// Render one observation as a GeoJSON Feature.
pub async fn observation_feature(
    pool: &SqlitePool,
    user: &CurrentUser,
    row: &ObservationRow,
) -> Result<Value> {
    let location = locations::get_location(pool, &row.location_id)
        .await?
        .ok_or_else(|| Error::Internal("Location row vanished.".to_string()))?;
    let category = categories::get_category(pool, &row.category_id).await?;
    let creator = user_ref(pool, &row.creator_id).await?;
    let updator = match &row.updator_id {
        Some(id) => Some(user_ref(pool, id).await?),
        None => None,
    };

    let properties: Value = serde_json::from_str(&row.properties)
        .map_err(|e| Error::Internal(format!("Corrupt properties map: {}", e)))?;
    let geometry: Value = serde_json::from_str(&location.geometry)
        .map_err(|e| Error::Internal(format!("Corrupt geometry: {}", e)))?;

    Ok(json!({
        "id": row.id,
        "type": "Feature",
        "geometry": geometry,
        "properties": properties,
        "meta": {
            "category": category.map(|c| json!({
                "id": c.id,
                "name": c.name,
                "default_status": c.default_status,
            })),
            "status": row.status,
            "creator": creator,
            "updator": updator,
            "created_at": row.created_at,
            "updated_at": row.updated_at,
            "version": row.version,
            "review_comment": row.review_comment,
            "conflict_version": row.conflict_version,
            "isowner": row.creator_id == user.id_str(),
            "num_media": row.num_media,
            "num_comments": row.num_comments,
        },
        "display_field": row.display_field,
        "location": location_ref(&location),
    }))
}

/// Render a list of observations as a GeoJSON FeatureCollection.
pub async fn feature_collection(
    pool: &SqlitePool,
    user: &CurrentUser,
    rows: &[ObservationRow],
) -> Result<Value> {
    let mut features = Vec::with_capacity(rows.len());
    for row in rows {
        features.push(observation_feature(pool, user, row).await?);
    }
    Ok(json!({
        "type": "FeatureCollection",
        "features": features,
    }))
}

/// Render a location as its own GeoJSON Feature.
pub fn location_feature(location: &LocationRow) -> Result<Value> {
    let geometry: Value = serde_json::from_str(&location.geometry)
        .map_err(|e| Error::Internal(format!("Corrupt geometry: {}", e)))?;
    Ok(json!({
        "id": location.id,
        "type": "Feature",
        "geometry": geometry,
        "name": location.name,
        "description": location.description,
        "private": location.private,
        "version": location.version,
        "created_at": location.created_at,
    }))
}

fn location_ref(location: &LocationRow) -> Value {
    json!({
        "id": location.id,
        "name": location.name,
        "description": location.description,
        "private": location.private,
    })
}

async fn user_ref(pool: &SqlitePool, user_id: &str) -> Result<Value> {
    let display_name = users::display_name(pool, user_id).await?.unwrap_or_default();
    Ok(json!({
        "id": user_id,
        "display_name": display_name,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn version_is_split_off_the_properties() {
        let payload: FeaturePayload = serde_json::from_value(json!({
            "properties": { "text": "hi", "version": 3 }
        }))
        .unwrap();
        let (properties, version) = payload.take_properties().unwrap();
        assert_eq!(version, Some(3));
        assert!(!properties.contains_key("version"));
        assert_eq!(properties["text"], json!("hi"));
    }

    #[test]
    fn non_integer_version_is_malformed() {
        let payload: FeaturePayload = serde_json::from_value(json!({
            "properties": { "version": "not a number" }
        }))
        .unwrap();
        assert!(matches!(
            payload.take_properties(),
            Err(Error::MalformedRequest(_))
        ));
    }

    #[test]
    fn absent_properties_default_to_empty() {
        let payload: FeaturePayload = serde_json::from_value(json!({})).unwrap();
        let (properties, version) = payload.take_properties().unwrap();
        assert!(properties.is_empty());
        assert_eq!(version, None);
    }
}
