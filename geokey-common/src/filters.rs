//! Compiles declarative user-group and subset filters into SQL predicates
//!
//! A filter is stored as JSON of the shape
//! `{ "<category_id>": { "min_date"?, "max_date"?, "<field_key>": constraint, … }, … }`.
//! The compiler turns one such map into a predicate over the observations
//! table: category clauses are OR-joined, constraints within a category are
//! AND-joined. An empty map compiles to "no rows"; a missing map (NULL in
//! the database) means "no filtering" and is handled by the caller.
//!
//! Compilation is conservative: a constraint whose shape does not match its
//! field kind fails the whole category clause closed, while a constraint for
//! a field that no longer exists is dropped with a warning.

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::fields::{parse_time, FieldDef, FieldKind};

/// A value to bind into a compiled predicate, in order of appearance.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Text(String),
    Int(i64),
    Real(f64),
}

/// SQL fragment over the observations table plus its bind values.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub sql: String,
    pub binds: Vec<BindValue>,
}

impl Predicate {
    pub fn always_true() -> Self {
        Predicate {
            sql: "1 = 1".to_string(),
            binds: Vec::new(),
        }
    }

    pub fn always_false() -> Self {
        Predicate {
            sql: "0 = 1".to_string(),
            binds: Vec::new(),
        }
    }

    fn from_parts(sql: impl Into<String>, binds: Vec<BindValue>) -> Self {
        Predicate {
            sql: sql.into(),
            binds,
        }
    }

    /// `(self) AND (other)`
    pub fn and(self, other: Predicate) -> Predicate {
        let mut binds = self.binds;
        binds.extend(other.binds);
        Predicate {
            sql: format!("({}) AND ({})", self.sql, other.sql),
            binds,
        }
    }

    /// OR-join a clause list; an empty list yields "no rows".
    pub fn or_join(parts: Vec<Predicate>) -> Predicate {
        if parts.is_empty() {
            return Predicate::always_false();
        }
        let mut binds = Vec::new();
        let sql = parts
            .iter()
            .map(|p| format!("({})", p.sql))
            .collect::<Vec<_>>()
            .join(" OR ");
        for part in parts {
            binds.extend(part.binds);
        }
        Predicate { sql, binds }
    }

    fn and_join(parts: Vec<Predicate>) -> Predicate {
        if parts.is_empty() {
            return Predicate::always_true();
        }
        let mut binds = Vec::new();
        let sql = parts
            .iter()
            .map(|p| format!("({})", p.sql))
            .collect::<Vec<_>>()
            .join(" AND ");
        for part in parts {
            binds.extend(part.binds);
        }
        Predicate { sql, binds }
    }
}

/// Field definitions of one category, as the compiler needs them.
#[derive(Debug, Clone)]
pub struct CategorySchema {
    pub id: Uuid,
    pub fields: Vec<FieldDef>,
}

/// Escape `%`, `_` and `\` for use inside a LIKE pattern with `ESCAPE '\'`.
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '%' || c == '_' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Compile one filter map into a predicate.
///
/// The caller resolves the NULL-filters ("no filtering") case before
/// calling; here an empty map means the group grants access to no rows.
pub fn compile_filters(filters: &Value, schemas: &[CategorySchema]) -> Predicate {
    let Some(map) = filters.as_object() else {
        warn!("Filter definition is not a JSON object; compiling to no rows");
        return Predicate::always_false();
    };
    if map.is_empty() {
        return Predicate::always_false();
    }

    let mut clauses = Vec::new();
    for (category_id, rule) in map {
        let Ok(id) = category_id.parse::<Uuid>() else {
            warn!(category_id, "Filter references an invalid category id");
            clauses.push(Predicate::always_false());
            continue;
        };
        match schemas.iter().find(|s| s.id == id) {
            Some(schema) => clauses.push(compile_rule(schema, rule)),
            None => {
                warn!(%id, "Filter references an unknown category");
                clauses.push(Predicate::always_false());
            }
        }
    }
    Predicate::or_join(clauses)
}

fn compile_rule(schema: &CategorySchema, rule: &Value) -> Predicate {
    let Some(rule) = rule.as_object() else {
        warn!(category = %schema.id, "Filter rule is not a JSON object");
        return Predicate::always_false();
    };

    let mut parts = vec![Predicate::from_parts(
        "category_id = ?",
        vec![BindValue::Text(schema.id.to_string())],
    )];

    for (key, constraint) in rule {
        match key.as_str() {
            "min_date" => match constraint.as_str() {
                Some(min) => parts.push(Predicate::from_parts(
                    "datetime(created_at) >= datetime(?)",
                    vec![BindValue::Text(min.to_string())],
                )),
                None => {
                    warn!(category = %schema.id, "min_date constraint is not a string");
                    return Predicate::always_false();
                }
            },
            "max_date" => match constraint.as_str() {
                Some(max) => parts.push(Predicate::from_parts(
                    "datetime(created_at) <= datetime(?)",
                    vec![BindValue::Text(max.to_string())],
                )),
                None => {
                    warn!(category = %schema.id, "max_date constraint is not a string");
                    return Predicate::always_false();
                }
            },
            field_key => {
                let Some(field) = schema.fields.iter().find(|f| f.key == field_key) else {
                    // Stale filter entry for a removed field; ignore it.
                    warn!(
                        category = %schema.id,
                        field_key,
                        "Filter references an unknown field; constraint skipped"
                    );
                    continue;
                };
                match compile_constraint(field, constraint) {
                    Ok(predicate) => parts.push(predicate),
                    Err(reason) => {
                        warn!(
                            category = %schema.id,
                            field_key,
                            reason,
                            "Malformed filter constraint; compiling category clause to no rows"
                        );
                        return Predicate::always_false();
                    }
                }
            }
        }
    }

    Predicate::and_join(parts)
}

fn json_path(field: &FieldDef) -> BindValue {
    BindValue::Text(format!("$.\"{}\"", field.key))
}

fn compile_constraint(
    field: &FieldDef,
    constraint: &Value,
) -> std::result::Result<Predicate, &'static str> {
    match &field.kind {
        FieldKind::Text => {
            let needle = constraint.as_str().ok_or("expected a string")?;
            let pattern = format!("%{}%", escape_like(&needle.to_lowercase()));
            Ok(Predicate::from_parts(
                "lower(json_extract(properties, ?)) LIKE ? ESCAPE '\\'",
                vec![json_path(field), BindValue::Text(pattern)],
            ))
        }
        FieldKind::Numeric { .. } => {
            let rule = constraint.as_object().ok_or("expected an object")?;
            let minval = optional_number(rule.get("minval"))?;
            let maxval = optional_number(rule.get("maxval"))?;
            let mut parts = Vec::new();
            if let Some(min) = minval {
                parts.push(Predicate::from_parts(
                    "CAST(json_extract(properties, ?) AS REAL) >= ?",
                    vec![json_path(field), BindValue::Real(min)],
                ));
            }
            if let Some(max) = maxval {
                parts.push(Predicate::from_parts(
                    "CAST(json_extract(properties, ?) AS REAL) <= ?",
                    vec![json_path(field), BindValue::Real(max)],
                ));
            }
            Ok(Predicate::and_join(parts))
        }
        FieldKind::Date => compile_range(field, constraint, "date"),
        FieldKind::DateTime => compile_range(field, constraint, "datetime"),
        FieldKind::Time => compile_time_range(field, constraint),
        FieldKind::Lookup { .. } => {
            let ids = id_list(constraint)?;
            if ids.is_empty() {
                return Ok(Predicate::always_false());
            }
            let placeholders = vec!["?"; ids.len()].join(", ");
            let mut binds = vec![json_path(field)];
            binds.extend(ids.into_iter().map(BindValue::Int));
            Ok(Predicate::from_parts(
                format!(
                    "CAST(json_extract(properties, ?) AS INTEGER) IN ({})",
                    placeholders
                ),
                binds,
            ))
        }
        FieldKind::MultiLookup { .. } => {
            let ids = id_list(constraint)?;
            if ids.is_empty() {
                return Ok(Predicate::always_false());
            }
            let placeholders = vec!["?"; ids.len()].join(", ");
            let mut binds = vec![json_path(field)];
            binds.extend(ids.into_iter().map(BindValue::Int));
            Ok(Predicate::from_parts(
                format!(
                    "EXISTS (SELECT 1 FROM json_each(json_extract(properties, ?)) AS sel \
                     WHERE sel.value IN ({}))",
                    placeholders
                ),
                binds,
            ))
        }
    }
}

/// Inclusive range on a date-like property using an SQLite conversion
/// function (`date` or `datetime`).
fn compile_range(
    field: &FieldDef,
    constraint: &Value,
    converter: &str,
) -> std::result::Result<Predicate, &'static str> {
    let rule = constraint.as_object().ok_or("expected an object")?;
    let mut parts = Vec::new();
    if let Some(min) = rule.get("minval") {
        let min = min.as_str().ok_or("minval must be a string")?;
        parts.push(Predicate::from_parts(
            format!(
                "{co}(json_extract(properties, ?)) >= {co}(?)",
                co = converter
            ),
            vec![json_path(field), BindValue::Text(min.to_string())],
        ));
    }
    if let Some(max) = rule.get("maxval") {
        let max = max.as_str().ok_or("maxval must be a string")?;
        parts.push(Predicate::from_parts(
            format!(
                "{co}(json_extract(properties, ?)) <= {co}(?)",
                co = converter
            ),
            vec![json_path(field), BindValue::Text(max.to_string())],
        ));
    }
    Ok(Predicate::and_join(parts))
}

/// Time ranges wrap around midnight when `minval > maxval`.
fn compile_time_range(
    field: &FieldDef,
    constraint: &Value,
) -> std::result::Result<Predicate, &'static str> {
    let rule = constraint.as_object().ok_or("expected an object")?;
    let minval = match rule.get("minval") {
        Some(v) => Some(v.as_str().ok_or("minval must be a string")?),
        None => None,
    };
    let maxval = match rule.get("maxval") {
        Some(v) => Some(v.as_str().ok_or("maxval must be a string")?),
        None => None,
    };

    let lower_bound = |value: &str| {
        Predicate::from_parts(
            "time(json_extract(properties, ?)) >= time(?)",
            vec![json_path(field), BindValue::Text(value.to_string())],
        )
    };
    let upper_bound = |value: &str| {
        Predicate::from_parts(
            "time(json_extract(properties, ?)) <= time(?)",
            vec![json_path(field), BindValue::Text(value.to_string())],
        )
    };

    match (minval, maxval) {
        (Some(min), Some(max)) => {
            let min_t = parse_time(min).ok_or("minval is not a valid time")?.0;
            let max_t = parse_time(max).ok_or("maxval is not a valid time")?.0;
            if min_t > max_t {
                Ok(Predicate::or_join(vec![lower_bound(min), upper_bound(max)]))
            } else {
                Ok(lower_bound(min).and(upper_bound(max)))
            }
        }
        (Some(min), None) => Ok(lower_bound(min)),
        (None, Some(max)) => Ok(upper_bound(max)),
        (None, None) => Ok(Predicate::always_true()),
    }
}

fn optional_number(
    value: Option<&Value>,
) -> std::result::Result<Option<f64>, &'static str> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_f64().map(Some).ok_or("bound is not a number"),
        Some(Value::String(s)) => s
            .parse::<f64>()
            .map(Some)
            .map_err(|_| "bound is not a number"),
        Some(_) => Err("bound is not a number"),
    }
}

fn id_list(constraint: &Value) -> std::result::Result<Vec<i64>, &'static str> {
    let items = constraint.as_array().ok_or("expected a list of ids")?;
    items
        .iter()
        .map(|item| match item {
            Value::Number(n) => n.as_i64().ok_or("id is not an integer"),
            Value::String(s) => s.parse::<i64>().map_err(|_| "id is not an integer"),
            _ => Err("id is not an integer"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::LookupValue;
    use serde_json::json;

    fn schema(id: Uuid, fields: Vec<FieldDef>) -> CategorySchema {
        CategorySchema { id, fields }
    }

    fn field(key: &str, kind: FieldKind) -> FieldDef {
        FieldDef {
            key: key.to_string(),
            name: key.to_string(),
            required: false,
            active: true,
            order: 0,
            kind,
        }
    }

    #[test]
    fn empty_filter_map_compiles_to_no_rows() {
        let predicate = compile_filters(&json!({}), &[]);
        assert_eq!(predicate, Predicate::always_false());
    }

    #[test]
    fn text_constraint_compiles_to_escaped_like() {
        let id = Uuid::new_v4();
        let schemas = vec![schema(id, vec![field("name", FieldKind::Text)])];
        let filters = json!({ id.to_string(): { "name": "100%_sure" } });

        let predicate = compile_filters(&filters, &schemas);
        assert!(predicate.sql.contains("LIKE ? ESCAPE '\\'"));
        assert_eq!(
            predicate.binds,
            vec![
                BindValue::Text(id.to_string()),
                BindValue::Text("$.\"name\"".to_string()),
                BindValue::Text("%100\\%\\_sure%".to_string()),
            ]
        );
    }

    #[test]
    fn numeric_range_casts_to_real() {
        let id = Uuid::new_v4();
        let schemas = vec![schema(
            id,
            vec![field(
                "height",
                FieldKind::Numeric {
                    minval: None,
                    maxval: None,
                },
            )],
        )];
        let filters = json!({ id.to_string(): { "height": { "minval": 2, "maxval": "10" } } });

        let predicate = compile_filters(&filters, &schemas);
        assert!(predicate.sql.contains("CAST(json_extract(properties, ?) AS REAL) >= ?"));
        assert!(predicate.binds.contains(&BindValue::Real(2.0)));
        assert!(predicate.binds.contains(&BindValue::Real(10.0)));
    }

    #[test]
    fn lookup_constraint_binds_each_id() {
        let id = Uuid::new_v4();
        let values = vec![
            LookupValue { id: 1, name: "Oak".to_string() },
            LookupValue { id: 2, name: "Ash".to_string() },
        ];
        let schemas = vec![schema(id, vec![field("species", FieldKind::Lookup { values })])];
        let filters = json!({ id.to_string(): { "species": [1, "2"] } });

        let predicate = compile_filters(&filters, &schemas);
        assert!(predicate.sql.contains("AS INTEGER) IN (?, ?)"));
        assert!(predicate.binds.contains(&BindValue::Int(1)));
        assert!(predicate.binds.contains(&BindValue::Int(2)));
    }

    #[test]
    fn multi_lookup_uses_json_each() {
        let id = Uuid::new_v4();
        let values = vec![LookupValue { id: 5, name: "Moss".to_string() }];
        let schemas = vec![schema(
            id,
            vec![field("cover", FieldKind::MultiLookup { values })],
        )];
        let filters = json!({ id.to_string(): { "cover": [5] } });

        let predicate = compile_filters(&filters, &schemas);
        assert!(predicate.sql.contains("FROM json_each(json_extract(properties, ?))"));
    }

    #[test]
    fn time_range_wraps_around_midnight() {
        let id = Uuid::new_v4();
        let schemas = vec![schema(id, vec![field("when", FieldKind::Time)])];
        let filters = json!({ id.to_string(): { "when": { "minval": "21:00", "maxval": "03:00" } } });

        let predicate = compile_filters(&filters, &schemas);
        assert!(predicate.sql.contains(">= time(?)) OR ("));
    }

    #[test]
    fn creation_window_filters_on_created_at() {
        let id = Uuid::new_v4();
        let schemas = vec![schema(id, vec![])];
        let filters = json!({ id.to_string(): { "min_date": "2024-01-01 00:00" } });

        let predicate = compile_filters(&filters, &schemas);
        assert!(predicate.sql.contains("datetime(created_at) >= datetime(?)"));
    }

    #[test]
    fn unknown_field_constraint_is_skipped() {
        let id = Uuid::new_v4();
        let schemas = vec![schema(id, vec![])];
        let filters = json!({ id.to_string(): { "gone": "x" } });

        let predicate = compile_filters(&filters, &schemas);
        // only the category clause remains
        assert_eq!(predicate.sql, "((category_id = ?))");
    }

    #[test]
    fn malformed_constraint_fails_closed() {
        let id = Uuid::new_v4();
        let schemas = vec![schema(id, vec![field("name", FieldKind::Text)])];
        let filters = json!({ id.to_string(): { "name": 42 } });

        let predicate = compile_filters(&filters, &schemas);
        assert_eq!(predicate, Predicate::always_false());
    }

    #[test]
    fn unknown_category_fails_closed() {
        let filters = json!({ Uuid::new_v4().to_string(): {} });
        let predicate = compile_filters(&filters, &[]);
        assert_eq!(predicate, Predicate::always_false());
    }
}
