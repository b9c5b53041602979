//! Derived observation projections: search index and display field
//!
//! `search_matches` is a joined token projection of an observation's
//! properties, recomputed before every save. Text fields contribute their
//! raw value, lookup fields the display name of the selected value, and
//! multi-lookup fields one token per selection. Numeric and temporal fields
//! contribute nothing. Search itself is a case-insensitive substring match
//! against this projection.

use serde_json::{Map, Value};

use crate::fields::{FieldDef, FieldKind};
use crate::filters::{escape_like, BindValue, Predicate};

/// Separator between tokens. Chosen to be vanishingly unlikely in values so
/// a substring match cannot bridge two tokens.
pub const SEARCH_SEPARATOR: &str = "#####";

/// Recompute the `search_matches` projection for one observation.
pub fn build_search_matches(fields: &[FieldDef], properties: &Map<String, Value>) -> String {
    let mut tokens: Vec<String> = Vec::new();

    for field in fields {
        let Some(value) = properties.get(&field.key) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        match &field.kind {
            FieldKind::Text => {
                if let Some(text) = value.as_str() {
                    tokens.push(format!("{}:{}", field.key, text));
                }
            }
            FieldKind::Lookup { values } => {
                if let Some(id) = lookup_id(value) {
                    if let Some(selected) = values.iter().find(|v| v.id == id) {
                        tokens.push(format!("{}:{}", field.key, selected.name));
                    }
                }
            }
            FieldKind::MultiLookup { values } => {
                for id in multi_lookup_ids(value) {
                    if let Some(selected) = values.iter().find(|v| v.id == id) {
                        tokens.push(format!("{}:{}", field.key, selected.name));
                    }
                }
            }
            FieldKind::Numeric { .. }
            | FieldKind::Date
            | FieldKind::DateTime
            | FieldKind::Time => {}
        }
    }

    tokens.join(SEARCH_SEPARATOR)
}

/// Display field projection `key:value`, using the raw stored value.
pub fn build_display_field(
    display_key: Option<&str>,
    properties: &Map<String, Value>,
) -> Option<String> {
    let key = display_key?;
    let value = properties.get(key)?;
    if value.is_null() {
        return None;
    }
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Some(format!("{}:{}", key, rendered))
}

/// Predicate matching observations whose projection contains `query`,
/// case-insensitively.
pub fn search_predicate(query: &str) -> Predicate {
    let pattern = format!("%{}%", escape_like(&query.to_lowercase()));
    Predicate {
        sql: "lower(search_matches) LIKE ? ESCAPE '\\'".to_string(),
        binds: vec![BindValue::Text(pattern)],
    }
}

fn lookup_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    }
}

fn multi_lookup_ids(value: &Value) -> Vec<i64> {
    let parsed: Option<Vec<Value>> = match value {
        Value::Array(items) => Some(items.clone()),
        Value::String(s) => serde_json::from_str(s).ok(),
        _ => None,
    };
    parsed
        .unwrap_or_default()
        .iter()
        .filter_map(lookup_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::LookupValue;
    use serde_json::json;

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef {
                key: "name".to_string(),
                name: "Name".to_string(),
                required: false,
                active: true,
                order: 0,
                kind: FieldKind::Text,
            },
            FieldDef {
                key: "height".to_string(),
                name: "Height".to_string(),
                required: false,
                active: true,
                order: 1,
                kind: FieldKind::Numeric {
                    minval: None,
                    maxval: None,
                },
            },
            FieldDef {
                key: "species".to_string(),
                name: "Species".to_string(),
                required: false,
                active: true,
                order: 2,
                kind: FieldKind::Lookup {
                    values: vec![
                        LookupValue { id: 1, name: "Oak".to_string() },
                        LookupValue { id: 2, name: "Ash".to_string() },
                    ],
                },
            },
            FieldDef {
                key: "cover".to_string(),
                name: "Cover".to_string(),
                required: false,
                active: true,
                order: 3,
                kind: FieldKind::MultiLookup {
                    values: vec![
                        LookupValue { id: 4, name: "Moss".to_string() },
                        LookupValue { id: 5, name: "Lichen".to_string() },
                    ],
                },
            },
        ]
    }

    fn props(value: serde_json::Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn tokens_come_from_text_and_lookups_only() {
        let properties = props(json!({
            "name": "Old oak",
            "height": "12",
            "species": "1",
            "cover": "[4,5]"
        }));

        let matches = build_search_matches(&fields(), &properties);
        assert_eq!(
            matches,
            "name:Old oak#####species:Oak#####cover:Moss#####cover:Lichen"
        );
    }

    #[test]
    fn null_and_absent_values_contribute_nothing() {
        let properties = props(json!({ "name": null }));
        assert_eq!(build_search_matches(&fields(), &properties), "");
    }

    #[test]
    fn display_field_uses_raw_value() {
        let properties = props(json!({ "species": "1" }));
        assert_eq!(
            build_display_field(Some("species"), &properties),
            Some("species:1".to_string())
        );
        assert_eq!(build_display_field(Some("species"), &props(json!({}))), None);
        assert_eq!(build_display_field(None, &properties), None);
    }

    #[test]
    fn search_predicate_is_case_insensitive_substring() {
        let predicate = search_predicate("BL%");
        assert_eq!(
            predicate.sql,
            "lower(search_matches) LIKE ? ESCAPE '\\'"
        );
        assert_eq!(predicate.binds, vec![BindValue::Text("%bl\\%%".to_string())]);
    }
}
