//! User rows and access-token resolution
//!
//! User accounts and tokens are managed by external collaborators; this
//! module only creates rows for tests and administration tooling and
//! resolves bearer tokens to identities. User mutations are not audited.

use sqlx::SqlitePool;
use uuid::Uuid;

use geokey_common::db::models::UserRow;
use geokey_common::{Error, Result};

use crate::auth::CurrentUser;
use crate::store::{new_id, now};

/// Resolve a bearer token to an identity.
///
/// Returns `None` for unknown or expired tokens.
pub async fn resolve_token(pool: &SqlitePool, token: &str) -> Result<Option<CurrentUser>> {
    let row: Option<(String, String, bool)> = sqlx::query_as(
        r#"
        SELECT u.id, u.display_name, u.is_superuser
        FROM access_tokens t
        JOIN users u ON u.id = t.user_id
        WHERE t.token = ?
          AND (t.expires_at IS NULL OR datetime(t.expires_at) > datetime('now'))
        "#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match row {
        None => Ok(None),
        Some((id, display_name, is_superuser)) => {
            let id = Uuid::parse_str(&id)
                .map_err(|_| Error::Internal(format!("Corrupt user id: {}", id)))?;
            Ok(Some(CurrentUser {
                id,
                display_name,
                is_superuser,
                is_anonymous: false,
            }))
        }
    }
}

/// Create a user account.
pub async fn create_user(
    pool: &SqlitePool,
    display_name: &str,
    email: Option<&str>,
    is_superuser: bool,
) -> Result<UserRow> {
    let id = new_id();
    let created_at = now();
    sqlx::query(
        "INSERT INTO users (id, display_name, email, is_superuser, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(display_name)
    .bind(email)
    .bind(is_superuser)
    .bind(&created_at)
    .execute(pool)
    .await?;

    Ok(UserRow {
        id,
        display_name: display_name.to_string(),
        email: email.map(str::to_string),
        is_superuser,
        created_at,
    })
}

/// Register a bearer token for a user.
///
/// `expires_at` is an RFC 3339 timestamp; `None` never expires.
pub async fn issue_token(
    pool: &SqlitePool,
    user_id: &str,
    token: &str,
    expires_at: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO access_tokens (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
    )
    .bind(token)
    .bind(user_id)
    .bind(now())
    .bind(expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Display name of a user, if the row exists.
pub async fn display_name(pool: &SqlitePool, user_id: &str) -> Result<Option<String>> {
    let name: Option<String> = sqlx::query_scalar("SELECT display_name FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geokey_common::db::init::init_memory_database;

    #[tokio::test]
    async fn token_resolution_round_trip() {
        let pool = init_memory_database().await.unwrap();
        let user = create_user(&pool, "carlos", Some("c@example.org"), false)
            .await
            .unwrap();
        issue_token(&pool, &user.id, "token-1", None).await.unwrap();

        let resolved = resolve_token(&pool, "token-1").await.unwrap().unwrap();
        assert_eq!(resolved.display_name, "carlos");
        assert!(!resolved.is_anonymous);
        assert!(!resolved.is_superuser);

        assert!(resolve_token(&pool, "bogus").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_tokens_do_not_resolve() {
        let pool = init_memory_database().await.unwrap();
        let user = create_user(&pool, "dana", None, false).await.unwrap();
        issue_token(&pool, &user.id, "stale", Some("2001-01-01T00:00:00Z"))
            .await
            .unwrap();

        assert!(resolve_token(&pool, "stale").await.unwrap().is_none());
    }
}
