//! Database schema migrations
//!
//! Versioned schema migrations so existing databases upgrade in place
//! without manual intervention or data loss.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - They must remain stable for users upgrading from older versions
//! 2. **Always add new migrations** - Create a new migration function for each schema change
//! 3. **Test migrations** - Verify they work on databases with old schema
//! 4. **Use ALTER TABLE** - Prefer ALTER TABLE over DROP/CREATE to preserve data

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

/// Set schema version in database
async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        warn!("This may indicate a downgrade. Proceeding with caution.");
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("✓ Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("✓ Migration v2 completed");
    }

    info!("All migrations completed successfully");
    Ok(())
}

/// Migration v1: Add conflict_version column to observations
///
/// **Background:** Conflict handling between concurrent editors was added
/// after the first release. Databases created before that are missing the
/// column that records the stored version a conflicting update collided
/// with.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v1: Add conflict_version column to observations");

    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='observations'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        // Table doesn't exist yet - will be created with correct schema
        info!("  Observations table doesn't exist yet - skipping migration");
        return Ok(());
    }

    let has_column: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('observations') WHERE name = 'conflict_version'",
    )
    .fetch_one(pool)
    .await?;

    if has_column > 0 {
        info!("  conflict_version column already exists - skipping");
        return Ok(());
    }

    sqlx::query("ALTER TABLE observations ADD COLUMN conflict_version INTEGER")
        .execute(pool)
        .await?;

    info!("  ✓ Added conflict_version column to observations table");
    Ok(())
}

/// Migration v2: Add denormalised comment and media counters to observations
///
/// **Background:** List serialization originally counted comments and media
/// per row. The counters were denormalised onto the observation and are
/// maintained on every comment/media mutation; this migration adds the
/// columns and backfills them for existing rows.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration v2: Add num_comments/num_media columns to observations");

    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='observations'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        info!("  Observations table doesn't exist yet - skipping migration");
        return Ok(());
    }

    let mut added = false;
    for column in ["num_comments", "num_media"] {
        let has_column: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM pragma_table_info('observations') WHERE name = '{}'",
            column
        ))
        .fetch_one(pool)
        .await?;

        if has_column > 0 {
            info!("  {} column already exists - skipping", column);
            continue;
        }

        match sqlx::query(&format!(
            "ALTER TABLE observations ADD COLUMN {} INTEGER NOT NULL DEFAULT 0",
            column
        ))
        .execute(pool)
        .await
        {
            Ok(_) => {
                added = true;
            }
            Err(sqlx::Error::Database(db_err))
                if db_err.message().contains("duplicate column") =>
            {
                // Another thread beat us to it - that's fine
                info!("  {} column added by concurrent thread - skipping", column);
            }
            Err(e) => return Err(e.into()),
        }
    }

    if added {
        let comments_table: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='comments')",
        )
        .fetch_one(pool)
        .await?;

        if comments_table {
            sqlx::query(
                r#"
                UPDATE observations SET num_comments = (
                    SELECT COUNT(*) FROM comments
                    WHERE comments.observation_id = observations.id
                      AND comments.status = 'active'
                )
                "#,
            )
            .execute(pool)
            .await?;
        }

        let media_table: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='media_files')",
        )
        .fetch_one(pool)
        .await?;

        if media_table {
            sqlx::query(
                r#"
                UPDATE observations SET num_media = (
                    SELECT COUNT(*) FROM media_files
                    WHERE media_files.observation_id = observations.id
                      AND media_files.status = 'active'
                )
                "#,
            )
            .execute(pool)
            .await?;
        }

        info!("  ✓ Added and backfilled counter columns on observations table");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_schema_version_no_table() {
        let pool = setup_test_db().await;
        let version = get_schema_version(&pool).await.unwrap();
        assert_eq!(version, 0);
    }

    #[tokio::test]
    async fn test_set_and_get_schema_version() {
        let pool = setup_test_db().await;

        sqlx::query(
            "CREATE TABLE schema_version (version INTEGER PRIMARY KEY, applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP)"
        )
        .execute(&pool)
        .await
        .unwrap();

        set_schema_version(&pool, 1).await.unwrap();
        let version = get_schema_version(&pool).await.unwrap();
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn test_migrate_v1_no_table() {
        let pool = setup_test_db().await;

        // Should succeed even if observations table doesn't exist
        migrate_v1(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_migrate_v1_adds_column() {
        let pool = setup_test_db().await;

        // Old-style observations table without conflict_version
        sqlx::query(
            r#"
            CREATE TABLE observations (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                properties TEXT NOT NULL DEFAULT '{}',
                version INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        migrate_v1(&pool).await.unwrap();

        let has_column: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('observations') WHERE name = 'conflict_version'"
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(has_column, 1);
    }

    #[tokio::test]
    async fn test_migrate_v1_idempotent() {
        let pool = setup_test_db().await;

        sqlx::query(
            r#"
            CREATE TABLE observations (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                conflict_version INTEGER
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        migrate_v1(&pool).await.unwrap();
        migrate_v1(&pool).await.unwrap();

        let column_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('observations') WHERE name = 'conflict_version'"
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(column_count, 1);
    }

    #[tokio::test]
    async fn test_migrate_v2_backfills_counters() {
        let pool = setup_test_db().await;

        sqlx::query(
            r#"
            CREATE TABLE observations (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            r#"
            CREATE TABLE comments (
                id TEXT PRIMARY KEY,
                observation_id TEXT NOT NULL,
                status TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query("INSERT INTO observations (id, status) VALUES ('obs-1', 'active')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO comments (id, observation_id, status) VALUES
             ('c-1', 'obs-1', 'active'), ('c-2', 'obs-1', 'deleted')",
        )
        .execute(&pool)
        .await
        .unwrap();

        migrate_v2(&pool).await.unwrap();

        let num_comments: i64 =
            sqlx::query_scalar("SELECT num_comments FROM observations WHERE id = 'obs-1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(num_comments, 1);
    }

    #[tokio::test]
    async fn test_run_migrations_complete_flow() {
        let pool = setup_test_db().await;

        sqlx::query(
            "CREATE TABLE schema_version (version INTEGER PRIMARY KEY, applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP)"
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query(
            r#"
            CREATE TABLE observations (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        run_migrations(&pool).await.unwrap();

        let version = get_schema_version(&pool).await.unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        let has_column: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('observations') WHERE name = 'conflict_version'"
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(has_column, 1);
    }
}
