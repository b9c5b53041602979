//! Media file registry
//!
//! Uploaded files are bound to an observation and classified by extension.
//! Blobs live under the data root's media directory; video rows may instead
//! carry an external hosting URL (the uploader integration is an external
//! collaborator). Thumbnailing is out of scope.

use std::path::PathBuf;

use sqlx::SqlitePool;
use tracing::info;

use geokey_common::db::models::{MediaFileRow, ObservationRow};
use geokey_common::events::{ChangeAction, ChangeEvent, EntityKind};
use geokey_common::{Error, Result};

use crate::auth::CurrentUser;
use crate::authz::ProjectAccess;
use crate::store::{audit, entity_ref, new_id, now};
use crate::AppState;

/// Classify a file by its extension.
///
/// Returns the stored kind tag, or `MalformedRequest` for unsupported
/// extensions.
pub fn kind_for_filename(filename: &str) -> Result<&'static str> {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" | "jpg" | "jpeg" | "gif" => Ok("ImageFile"),
        "mp4" | "avi" | "mov" => Ok("VideoFile"),
        "mp3" | "wav" => Ok("AudioFile"),
        "pdf" | "txt" => Ok("DocumentFile"),
        other => Err(Error::MalformedRequest(format!(
            "Files of type '{}' are currently not supported.",
            other
        ))),
    }
}

/// Attach an uploaded file to an observation.
pub async fn attach(
    state: &AppState,
    user: &CurrentUser,
    access: &ProjectAccess,
    observation: &ObservationRow,
    name: &str,
    description: Option<&str>,
    filename: &str,
    content: &[u8],
) -> Result<MediaFileRow> {
    if !access.can_contribute {
        return Err(Error::PermissionDenied(
            "You are not allowed to contribute to this project.".to_string(),
        ));
    }
    let kind = kind_for_filename(filename)?;

    let id = new_id();
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let relative_path = format!("{}/{}.{}", observation.id, id, extension);

    let blob_path = state.media_dir.join(&relative_path);
    if let Some(parent) = blob_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&blob_path, content).await?;

    let row = insert_row(
        state,
        user,
        access,
        observation,
        id,
        name,
        description,
        kind,
        Some(relative_path),
        None,
    )
    .await?;
    info!(media = %row.id, observation = %observation.id, kind, "Stored media file");
    Ok(row)
}

/// Register an externally hosted video without storing a blob.
pub async fn attach_external_video(
    state: &AppState,
    user: &CurrentUser,
    access: &ProjectAccess,
    observation: &ObservationRow,
    name: &str,
    description: Option<&str>,
    external_url: &str,
) -> Result<MediaFileRow> {
    if !access.can_contribute {
        return Err(Error::PermissionDenied(
            "You are not allowed to contribute to this project.".to_string(),
        ));
    }
    insert_row(
        state,
        user,
        access,
        observation,
        new_id(),
        name,
        description,
        "VideoFile",
        None,
        Some(external_url),
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn insert_row(
    state: &AppState,
    user: &CurrentUser,
    access: &ProjectAccess,
    observation: &ObservationRow,
    id: String,
    name: &str,
    description: Option<&str>,
    kind: &str,
    file_path: Option<String>,
    external_url: Option<&str>,
) -> Result<MediaFileRow> {
    let created_at = now();

    let mut tx = state.db.begin().await?;
    sqlx::query(
        "INSERT INTO media_files (id, observation_id, name, description, kind, file_path,
                                  external_url, creator_id, status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'active', ?)",
    )
    .bind(&id)
    .bind(&observation.id)
    .bind(name)
    .bind(description)
    .bind(kind)
    .bind(&file_path)
    .bind(external_url)
    .bind(user.id_str())
    .bind(&created_at)
    .execute(&mut *tx)
    .await?;
    sqlx::query("UPDATE observations SET num_media = num_media + 1 WHERE id = ?")
        .bind(&observation.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let mut event = ChangeEvent::new(ChangeAction::Created, EntityKind::MediaFile);
    event.actor = Some(user.actor());
    event.project = Some(entity_ref(&access.project.id, &access.project.name));
    event.observation = Some(entity_ref(
        &observation.id,
        observation.display_field.as_deref().unwrap_or(""),
    ));
    event.media_file = Some(entity_ref(&id, name));
    audit::record(state, event).await;

    Ok(MediaFileRow {
        id,
        observation_id: observation.id.clone(),
        name: name.to_string(),
        description: description.map(str::to_string),
        kind: kind.to_string(),
        file_path,
        external_url: external_url.map(str::to_string),
        creator_id: user.id_str(),
        status: "active".to_string(),
        created_at,
    })
}

/// Active media files of an observation, tagged by kind.
pub async fn list_media(pool: &SqlitePool, observation_id: &str) -> Result<Vec<MediaFileRow>> {
    let rows = sqlx::query_as::<_, MediaFileRow>(
        "SELECT id, observation_id, name, description, kind, file_path, external_url,
                creator_id, status, created_at
         FROM media_files
         WHERE observation_id = ? AND status = 'active'
         ORDER BY created_at, id",
    )
    .bind(observation_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_media(
    pool: &SqlitePool,
    observation_id: &str,
    media_id: &str,
) -> Result<MediaFileRow> {
    sqlx::query_as::<_, MediaFileRow>(
        "SELECT id, observation_id, name, description, kind, file_path, external_url,
                creator_id, status, created_at
         FROM media_files
         WHERE id = ? AND observation_id = ? AND status = 'active'",
    )
    .bind(media_id)
    .bind(observation_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound("Media file not found.".to_string()))
}

/// Absolute path of a stored blob.
pub fn blob_path(state: &AppState, media: &MediaFileRow) -> Option<PathBuf> {
    media
        .file_path
        .as_deref()
        .map(|relative| state.media_dir.join(relative))
}

/// Soft-delete a media file. Uploader or project admin only. The blob is
/// kept on disk so history stays recoverable.
pub async fn delete_media(
    state: &AppState,
    user: &CurrentUser,
    access: &ProjectAccess,
    observation: &ObservationRow,
    media_id: &str,
) -> Result<()> {
    let media = get_media(&state.db, &observation.id, media_id).await?;
    if media.creator_id != user.id_str() && !access.is_admin {
        return Err(Error::PermissionDenied(
            "You are not allowed to delete the media file.".to_string(),
        ));
    }

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE media_files SET status = 'deleted' WHERE id = ?")
        .bind(&media.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE observations SET num_media = MAX(num_media - 1, 0) WHERE id = ?")
        .bind(&observation.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let mut event = ChangeEvent::deletion(EntityKind::MediaFile);
    event.actor = Some(user.actor());
    event.project = Some(entity_ref(&access.project.id, &access.project.name));
    event.observation = Some(entity_ref(
        &observation.id,
        observation.display_field.as_deref().unwrap_or(""),
    ));
    event.media_file = Some(entity_ref(&media.id, &media.name));
    audit::record(state, event).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_classification() {
        assert_eq!(kind_for_filename("tree.JPG").unwrap(), "ImageFile");
        assert_eq!(kind_for_filename("walk.mov").unwrap(), "VideoFile");
        assert_eq!(kind_for_filename("song.mp3").unwrap(), "AudioFile");
        assert_eq!(kind_for_filename("notes.txt").unwrap(), "DocumentFile");
        assert!(matches!(
            kind_for_filename("archive.zip"),
            Err(Error::MalformedRequest(_))
        ));
        assert!(matches!(
            kind_for_filename("no_extension"),
            Err(Error::MalformedRequest(_))
        ));
    }
}
