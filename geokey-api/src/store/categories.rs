//! Category, field and lookup-value persistence
//!
//! Categories carry the typed schema observations are validated against.
//! Field keys are stable identifiers: they are checked on creation and never
//! renamed. The first field created for a category becomes its display
//! field.

use sqlx::SqlitePool;

use geokey_common::db::models::{CategoryRow, FieldRow, LookupValueRow};
use geokey_common::events::{ChangeAction, ChangeEvent, EntityKind};
use geokey_common::fields::{is_valid_key, FieldDef, FieldKind, LookupValue};
use geokey_common::filters::CategorySchema;
use geokey_common::{Error, Result};

use crate::auth::CurrentUser;
use crate::store::{audit, entity_ref, new_id, now};
use crate::AppState;

/// Field kind requested on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewFieldKind {
    Text,
    Numeric,
    Date,
    DateTime,
    Time,
    Lookup,
    MultiLookup,
}

impl NewFieldKind {
    fn as_db_str(&self) -> &'static str {
        match self {
            NewFieldKind::Text => "TextField",
            NewFieldKind::Numeric => "NumericField",
            NewFieldKind::Date => "DateField",
            NewFieldKind::DateTime => "DateTimeField",
            NewFieldKind::Time => "TimeField",
            NewFieldKind::Lookup => "LookupField",
            NewFieldKind::MultiLookup => "MultipleLookupField",
        }
    }
}

/// Create a category under a project.
pub async fn create_category(
    state: &AppState,
    actor: &CurrentUser,
    project_id: &str,
    project_name: &str,
    name: &str,
    description: Option<&str>,
    default_status: &str,
) -> Result<CategoryRow> {
    if !matches!(default_status, "active" | "pending") {
        return Err(Error::MalformedRequest(format!(
            "Invalid default status: {}",
            default_status
        )));
    }

    let id = new_id();
    let created_at = now();
    sqlx::query(
        "INSERT INTO categories (id, project_id, name, description, creator_id,
                                 status, default_status, display_field, created_at)
         VALUES (?, ?, ?, ?, ?, 'active', ?, NULL, ?)",
    )
    .bind(&id)
    .bind(project_id)
    .bind(name)
    .bind(description)
    .bind(actor.id_str())
    .bind(default_status)
    .bind(&created_at)
    .execute(&state.db)
    .await?;

    let mut event = ChangeEvent::new(ChangeAction::Created, EntityKind::Category);
    event.actor = Some(actor.actor());
    event.project = Some(entity_ref(project_id, project_name));
    event.category = Some(entity_ref(&id, name));
    audit::record(state, event).await;

    Ok(CategoryRow {
        id,
        project_id: project_id.to_string(),
        name: name.to_string(),
        description: description.map(str::to_string),
        creator_id: actor.id_str(),
        status: "active".to_string(),
        default_status: default_status.to_string(),
        display_field: None,
        created_at,
    })
}

/// Create a field on a category.
///
/// Assigns the next order position; the category's first field becomes its
/// display field.
#[allow(clippy::too_many_arguments)]
pub async fn create_field(
    state: &AppState,
    actor: &CurrentUser,
    category: &CategoryRow,
    key: &str,
    name: &str,
    kind: NewFieldKind,
    required: bool,
    minval: Option<f64>,
    maxval: Option<f64>,
) -> Result<FieldRow> {
    if !is_valid_key(key) {
        return Err(Error::MalformedRequest(format!(
            "Invalid field key: {}",
            key
        )));
    }

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fields WHERE category_id = ?")
        .bind(&category.id)
        .fetch_one(&state.db)
        .await?;

    let id = new_id();
    let created_at = now();
    let mut tx = state.db.begin().await?;
    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO fields (id, category_id, key, name, description, required,
                             status, field_order, kind, minval, maxval, created_at)
         VALUES (?, ?, ?, ?, NULL, ?, 'active', ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&category.id)
    .bind(key)
    .bind(name)
    .bind(required)
    .bind(existing)
    .bind(kind.as_db_str())
    .bind(minval)
    .bind(maxval)
    .bind(&created_at)
    .execute(&mut *tx)
    .await?;
    if inserted.rows_affected() == 0 {
        return Err(Error::MalformedRequest(format!(
            "A field with key '{}' already exists in the category.",
            key
        )));
    }
    if existing == 0 {
        sqlx::query("UPDATE categories SET display_field = ? WHERE id = ?")
            .bind(key)
            .bind(&category.id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    let mut event = ChangeEvent::new(ChangeAction::Created, EntityKind::Field);
    event.actor = Some(actor.actor());
    event.project = Some(entity_ref(&category.project_id, ""));
    event.category = Some(entity_ref(&category.id, &category.name));
    event.field = Some(entity_ref(&id, name));
    audit::record(state, event).await;

    Ok(FieldRow {
        id,
        category_id: category.id.clone(),
        key: key.to_string(),
        name: name.to_string(),
        description: None,
        required,
        status: "active".to_string(),
        field_order: existing,
        kind: kind.as_db_str().to_string(),
        minval,
        maxval,
        created_at,
    })
}

/// Deactivate a field; its stored values persist but are no longer
/// validated.
pub async fn set_field_status(
    state: &AppState,
    actor: &CurrentUser,
    category: &CategoryRow,
    field: &FieldRow,
    status: &str,
) -> Result<()> {
    if !matches!(status, "active" | "inactive") {
        return Err(Error::MalformedRequest(format!(
            "Invalid field status: {}",
            status
        )));
    }
    sqlx::query("UPDATE fields SET status = ? WHERE id = ?")
        .bind(status)
        .bind(&field.id)
        .execute(&state.db)
        .await?;

    let mut event = ChangeEvent::new(ChangeAction::Updated, EntityKind::Field);
    event.actor = Some(actor.actor());
    event.category = Some(entity_ref(&category.id, &category.name));
    event.field = Some(entity_ref(&field.id, &field.name));
    event.changed_field = Some("status".to_string());
    event.changed_value = Some(status.to_string());
    audit::record(state, event).await;
    Ok(())
}

/// Add a lookup value to a lookup or multi-lookup field.
///
/// Returns the stable numeric id contribution payloads reference.
pub async fn add_lookup_value(
    state: &AppState,
    actor: &CurrentUser,
    category: &CategoryRow,
    field: &FieldRow,
    name: &str,
) -> Result<i64> {
    if !matches!(field.kind.as_str(), "LookupField" | "MultipleLookupField") {
        return Err(Error::MalformedRequest(format!(
            "Field {} does not accept lookup values.",
            field.key
        )));
    }

    let result = sqlx::query("INSERT INTO lookup_values (field_id, name, status) VALUES (?, ?, 'active')")
        .bind(&field.id)
        .bind(name)
        .execute(&state.db)
        .await?;
    let id = result.last_insert_rowid();

    let mut event = ChangeEvent::new(ChangeAction::Updated, EntityKind::Field);
    event.actor = Some(actor.actor());
    event.category = Some(entity_ref(&category.id, &category.name));
    event.field = Some(entity_ref(&field.id, &field.name));
    event.changed_field = Some("lookupvalues".to_string());
    event.changed_value = Some(name.to_string());
    event.subaction = Some("add_lookup_value".to_string());
    audit::record(state, event).await;

    Ok(id)
}

pub async fn get_category(pool: &SqlitePool, category_id: &str) -> Result<Option<CategoryRow>> {
    let row = sqlx::query_as::<_, CategoryRow>(
        "SELECT id, project_id, name, description, creator_id, status,
                default_status, display_field, created_at
         FROM categories WHERE id = ?",
    )
    .bind(category_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Field definitions of one category, in order, ready for validation.
///
/// Deleted fields are dropped entirely; inactive fields are kept so their
/// stored values pass through validation untouched.
pub async fn load_field_defs(pool: &SqlitePool, category_id: &str) -> Result<Vec<FieldDef>> {
    let rows = sqlx::query_as::<_, FieldRow>(
        "SELECT id, category_id, key, name, description, required, status,
                field_order, kind, minval, maxval, created_at
         FROM fields
         WHERE category_id = ? AND status != 'deleted'
         ORDER BY field_order",
    )
    .bind(category_id)
    .fetch_all(pool)
    .await?;

    let mut defs = Vec::with_capacity(rows.len());
    for row in rows {
        let kind = match row.kind.as_str() {
            "TextField" => FieldKind::Text,
            "NumericField" => FieldKind::Numeric {
                minval: row.minval,
                maxval: row.maxval,
            },
            "DateField" => FieldKind::Date,
            "DateTimeField" => FieldKind::DateTime,
            "TimeField" => FieldKind::Time,
            "LookupField" => FieldKind::Lookup {
                values: load_lookup_values(pool, &row.id).await?,
            },
            "MultipleLookupField" => FieldKind::MultiLookup {
                values: load_lookup_values(pool, &row.id).await?,
            },
            other => {
                return Err(Error::Internal(format!("Unknown field kind: {}", other)));
            }
        };
        defs.push(FieldDef {
            key: row.key,
            name: row.name,
            required: row.required,
            active: row.status == "active",
            order: row.field_order,
            kind,
        });
    }
    Ok(defs)
}

async fn load_lookup_values(pool: &SqlitePool, field_id: &str) -> Result<Vec<LookupValue>> {
    let rows = sqlx::query_as::<_, LookupValueRow>(
        "SELECT id, field_id, name, status FROM lookup_values
         WHERE field_id = ? AND status = 'active' ORDER BY id",
    )
    .bind(field_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| LookupValue {
            id: row.id,
            name: row.name,
        })
        .collect())
}

/// Schemas of every non-deleted category of the project, as the filter
/// compiler needs them.
pub async fn load_schemas(pool: &SqlitePool, project_id: &str) -> Result<Vec<CategorySchema>> {
    let ids: Vec<(String,)> = sqlx::query_as(
        "SELECT id FROM categories WHERE project_id = ? AND status != 'deleted'",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    let mut schemas = Vec::with_capacity(ids.len());
    for (id,) in ids {
        let fields = load_field_defs(pool, &id).await?;
        let parsed = uuid::Uuid::parse_str(&id)
            .map_err(|_| Error::Internal(format!("Corrupt category id: {}", id)))?;
        schemas.push(CategorySchema { id: parsed, fields });
    }
    Ok(schemas)
}
