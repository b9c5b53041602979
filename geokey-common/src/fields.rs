//! Category field definitions and contribution value validation
//!
//! A category defines an ordered set of typed fields. Every contribution
//! payload is checked against those definitions before it is persisted:
//! values are normalised to their canonical string form and errors are
//! collected per field key so a client sees all problems at once.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// One selectable choice of a lookup or multi-lookup field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupValue {
    pub id: i64,
    pub name: String,
}

/// Typed payload of a field definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Numeric {
        minval: Option<f64>,
        maxval: Option<f64>,
    },
    Date,
    DateTime,
    Time,
    Lookup {
        values: Vec<LookupValue>,
    },
    MultiLookup {
        values: Vec<LookupValue>,
    },
}

impl FieldKind {
    /// Human readable kind name, used in API payloads.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Text => "TextField",
            FieldKind::Numeric { .. } => "NumericField",
            FieldKind::Date => "DateField",
            FieldKind::DateTime => "DateTimeField",
            FieldKind::Time => "TimeField",
            FieldKind::Lookup { .. } => "LookupField",
            FieldKind::MultiLookup { .. } => "MultipleLookupField",
        }
    }
}

/// A single field of a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Stable identifier of the field within its category.
    pub key: String,
    /// Display name, used in validation messages.
    pub name: String,
    pub required: bool,
    /// Inactive fields are ignored by validation; stored values persist.
    pub active: bool,
    pub order: i64,
    pub kind: FieldKind,
}

/// How strictly a properties map is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Only provided, non-null keys are checked. Used for drafts.
    Partial,
    /// Every active field is checked; required-but-absent fails.
    Full,
}

/// Keys must be usable as JSON path components and URL fragments.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Validate a properties map against the category's field definitions.
///
/// Returns the normalised map on success. On failure returns
/// [`Error::Validation`] carrying one message per offending field key.
/// Values of inactive fields pass through untouched, values of unknown keys
/// are rejected, and empty strings are treated as absent.
pub fn validate_properties(
    fields: &[FieldDef],
    properties: &Map<String, Value>,
    mode: ValidationMode,
) -> Result<Map<String, Value>> {
    let mut normalised = Map::new();
    let mut errors: BTreeMap<String, String> = BTreeMap::new();

    for (key, raw) in properties {
        let Some(field) = fields.iter().find(|f| &f.key == key) else {
            errors.insert(
                key.clone(),
                "The key does not match a field of the category.".to_string(),
            );
            continue;
        };

        if !field.active {
            normalised.insert(key.clone(), raw.clone());
            continue;
        }

        let value = null_for_empty(raw);
        if value.is_null() {
            if mode == ValidationMode::Full && field.required {
                errors.insert(key.clone(), required_message(field));
            } else {
                normalised.insert(key.clone(), Value::Null);
            }
            continue;
        }

        match normalise_value(field, &value) {
            Ok(canonical) => {
                normalised.insert(key.clone(), canonical);
            }
            Err(message) => {
                errors.insert(key.clone(), message);
            }
        }
    }

    if mode == ValidationMode::Full {
        for field in fields {
            if field.active && field.required && !properties.contains_key(&field.key) {
                errors.insert(field.key.clone(), required_message(field));
            }
        }
    }

    if errors.is_empty() {
        Ok(normalised)
    } else {
        Err(Error::Validation(errors))
    }
}

fn required_message(field: &FieldDef) -> String {
    format!("The field {} is required.", field.name)
}

fn null_for_empty(raw: &Value) -> Value {
    match raw {
        Value::String(s) if s.is_empty() => Value::Null,
        other => other.clone(),
    }
}

/// Normalise one non-null value against its field definition.
///
/// The canonical wire form of every scalar is a string; multi-lookup
/// selections canonicalise to the string form of a JSON integer array.
pub fn normalise_value(field: &FieldDef, value: &Value) -> std::result::Result<Value, String> {
    match &field.kind {
        FieldKind::Text => match value {
            Value::String(s) => Ok(Value::String(s.clone())),
            _ => Err(format!(
                "The value provided for text field {} is not a string.",
                field.name
            )),
        },
        FieldKind::Numeric { minval, maxval } => {
            let number = parse_number(value).ok_or_else(|| {
                format!(
                    "The value provided for field {} is not a number.",
                    field.name
                )
            })?;
            if let (Some(min), Some(max)) = (minval, maxval) {
                if number < *min || number > *max {
                    return Err(format!(
                        "The value provided for field {} must be greater than {} and lower than {}.",
                        field.name, min, max
                    ));
                }
            } else if let Some(min) = minval {
                if number < *min {
                    return Err(format!(
                        "The value provided for field {} must be greater than {}.",
                        field.name, min
                    ));
                }
            } else if let Some(max) = maxval {
                if number > *max {
                    return Err(format!(
                        "The value provided for field {} must be lower than {}.",
                        field.name, max
                    ));
                }
            }
            Ok(Value::String(canonical_number(number)))
        }
        FieldKind::Date => {
            let text = string_value(value).ok_or_else(|| date_message(field))?;
            let date =
                NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| date_message(field))?;
            Ok(Value::String(date.format("%Y-%m-%d").to_string()))
        }
        FieldKind::DateTime => {
            let text = string_value(value).ok_or_else(|| datetime_message(field))?;
            let utc = parse_datetime_utc(text).ok_or_else(|| datetime_message(field))?;
            Ok(Value::String(
                utc.to_rfc3339_opts(SecondsFormat::Secs, true),
            ))
        }
        FieldKind::Time => {
            let text = string_value(value).ok_or_else(|| time_message(field))?;
            let (time, with_seconds) = parse_time(text).ok_or_else(|| time_message(field))?;
            let pattern = if with_seconds { "%H:%M:%S" } else { "%H:%M" };
            Ok(Value::String(time.format(pattern).to_string()))
        }
        FieldKind::Lookup { values } => {
            let id = parse_lookup_id(value).ok_or_else(|| lookup_message(field))?;
            if values.iter().any(|v| v.id == id) {
                Ok(Value::String(id.to_string()))
            } else {
                Err(lookup_message(field))
            }
        }
        FieldKind::MultiLookup { values } => {
            let ids = parse_lookup_ids(value).ok_or_else(|| multi_lookup_message(field))?;
            if ids.iter().all(|id| values.iter().any(|v| v.id == *id)) {
                // serializing Vec<i64> cannot fail
                let canonical = serde_json::to_string(&ids)
                    .map_err(|_| multi_lookup_message(field))?;
                Ok(Value::String(canonical))
            } else {
                Err(multi_lookup_message(field))
            }
        }
    }
}

fn date_message(field: &FieldDef) -> String {
    format!(
        "The value for DateField {} is not a valid date. Please provide date as YYYY-MM-DD.",
        field.name
    )
}

fn datetime_message(field: &FieldDef) -> String {
    format!(
        "The value for DateTimeField {} is not a valid date. \
         Please provide date and time as YYYY-MM-DD HH:MM.",
        field.name
    )
}

fn time_message(field: &FieldDef) -> String {
    format!(
        "The value for TimeField {} is not a valid time. Please provide time as HH:MM.",
        field.name
    )
}

fn lookup_message(field: &FieldDef) -> String {
    format!(
        "The value for lookup field {} is not an accepted value for the field.",
        field.name
    )
}

fn multi_lookup_message(field: &FieldDef) -> String {
    format!(
        "One or more values for the multiple select field {} is not an accepted value for the field.",
        field.name
    )
}

fn string_value(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.as_str()),
        _ => None,
    }
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn canonical_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 9.0e15 {
        format!("{}", number as i64)
    } else {
        format!("{}", number)
    }
}

fn parse_datetime_utc(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for pattern in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, pattern) {
            return Some(naive.and_utc());
        }
    }
    None
}

pub(crate) fn parse_time(text: &str) -> Option<(NaiveTime, bool)> {
    if let Ok(time) = NaiveTime::parse_from_str(text, "%H:%M:%S") {
        return Some((time, true));
    }
    if let Ok(time) = NaiveTime::parse_from_str(text, "%H:%M") {
        return Some((time, false));
    }
    None
}

fn parse_lookup_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn parse_lookup_ids(value: &Value) -> Option<Vec<i64>> {
    let items: Vec<Value> = match value {
        Value::Array(items) => items.clone(),
        // Clients that round-trip stored values send the canonical string
        Value::String(s) => serde_json::from_str(s).ok()?,
        _ => return None,
    };
    items.iter().map(parse_lookup_id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_field(key: &str, required: bool, active: bool) -> FieldDef {
        FieldDef {
            key: key.to_string(),
            name: key.to_string(),
            required,
            active,
            order: 0,
            kind: FieldKind::Text,
        }
    }

    fn numeric_field(key: &str, minval: Option<f64>, maxval: Option<f64>) -> FieldDef {
        FieldDef {
            key: key.to_string(),
            name: key.to_string(),
            required: false,
            active: true,
            order: 1,
            kind: FieldKind::Numeric { minval, maxval },
        }
    }

    fn lookup_field(key: &str, ids: &[(i64, &str)]) -> FieldDef {
        FieldDef {
            key: key.to_string(),
            name: key.to_string(),
            required: false,
            active: true,
            order: 2,
            kind: FieldKind::Lookup {
                values: ids
                    .iter()
                    .map(|(id, name)| LookupValue {
                        id: *id,
                        name: name.to_string(),
                    })
                    .collect(),
            },
        }
    }

    fn props(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn full_mode_flags_missing_required_field() {
        let fields = vec![text_field("text", true, true), numeric_field("number", None, None)];
        let input = props(json!({"number": 5}));

        let err = validate_properties(&fields, &input, ValidationMode::Full).unwrap_err();
        match err {
            Error::Validation(map) => {
                assert_eq!(map.len(), 1);
                assert_eq!(map["text"], "The field text is required.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn partial_mode_tolerates_missing_required_field() {
        let fields = vec![text_field("text", true, true)];
        let input = props(json!({}));

        let normalised = validate_properties(&fields, &input, ValidationMode::Partial).unwrap();
        assert!(normalised.is_empty());
    }

    #[test]
    fn partial_mode_still_checks_provided_values() {
        let fields = vec![numeric_field("number", Some(0.0), Some(100.0))];
        let input = props(json!({"number": "twelve"}));

        let err = validate_properties(&fields, &input, ValidationMode::Partial).unwrap_err();
        match err {
            Error::Validation(map) => {
                assert_eq!(map["number"], "The value provided for field number is not a number.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_string_becomes_null() {
        let fields = vec![text_field("text", false, true)];
        let input = props(json!({"text": ""}));

        let normalised = validate_properties(&fields, &input, ValidationMode::Full).unwrap();
        assert_eq!(normalised["text"], Value::Null);
    }

    #[test]
    fn empty_string_fails_required_in_full_mode() {
        let fields = vec![text_field("text", true, true)];
        let input = props(json!({"text": ""}));

        assert!(validate_properties(&fields, &input, ValidationMode::Full).is_err());
    }

    #[test]
    fn numeric_values_canonicalise_to_strings() {
        let fields = vec![numeric_field("number", Some(0.0), Some(100.0))];

        let normalised =
            validate_properties(&fields, &props(json!({"number": 12})), ValidationMode::Full)
                .unwrap();
        assert_eq!(normalised["number"], json!("12"));

        let normalised =
            validate_properties(&fields, &props(json!({"number": "12.5"})), ValidationMode::Full)
                .unwrap();
        assert_eq!(normalised["number"], json!("12.5"));
    }

    #[test]
    fn numeric_range_is_inclusive() {
        let fields = vec![numeric_field("number", Some(0.0), Some(100.0))];

        assert!(
            validate_properties(&fields, &props(json!({"number": 100})), ValidationMode::Full)
                .is_ok()
        );
        let err =
            validate_properties(&fields, &props(json!({"number": 1000})), ValidationMode::Full)
                .unwrap_err();
        match err {
            Error::Validation(map) => assert_eq!(
                map["number"],
                "The value provided for field number must be greater than 0 and lower than 100."
            ),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn inactive_field_values_pass_through_unvalidated() {
        let fields = vec![text_field("old", true, false)];
        let input = props(json!({"old": 42}));

        let normalised = validate_properties(&fields, &input, ValidationMode::Full).unwrap();
        assert_eq!(normalised["old"], json!(42));
    }

    #[test]
    fn inactive_required_field_is_not_enforced() {
        let fields = vec![text_field("old", true, false), text_field("text", false, true)];
        let input = props(json!({"text": "hi"}));

        assert!(validate_properties(&fields, &input, ValidationMode::Full).is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let fields = vec![text_field("text", false, true)];
        let input = props(json!({"bogus": "hi"}));

        let err = validate_properties(&fields, &input, ValidationMode::Full).unwrap_err();
        match err {
            Error::Validation(map) => {
                assert_eq!(map["bogus"], "The key does not match a field of the category.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn time_values_are_zero_padded() {
        let field = FieldDef {
            key: "when".to_string(),
            name: "when".to_string(),
            required: false,
            active: true,
            order: 0,
            kind: FieldKind::Time,
        };
        assert_eq!(
            normalise_value(&field, &json!("9:5")).unwrap(),
            json!("09:05")
        );
        assert_eq!(
            normalise_value(&field, &json!("21:15:09")).unwrap(),
            json!("21:15:09")
        );
        assert!(normalise_value(&field, &json!("25:00")).is_err());
    }

    #[test]
    fn datetimes_normalise_to_utc() {
        let field = FieldDef {
            key: "seen".to_string(),
            name: "seen".to_string(),
            required: false,
            active: true,
            order: 0,
            kind: FieldKind::DateTime,
        };
        assert_eq!(
            normalise_value(&field, &json!("2024-03-01T12:30:00+02:00")).unwrap(),
            json!("2024-03-01T10:30:00Z")
        );
        assert_eq!(
            normalise_value(&field, &json!("2024-03-01 12:30")).unwrap(),
            json!("2024-03-01T12:30:00Z")
        );
    }

    #[test]
    fn lookup_accepts_member_ids_only() {
        let field = lookup_field("species", &[(1, "Oak"), (2, "Ash")]);

        assert_eq!(normalise_value(&field, &json!(2)).unwrap(), json!("2"));
        assert_eq!(normalise_value(&field, &json!("1")).unwrap(), json!("1"));
        assert!(normalise_value(&field, &json!(3)).is_err());
    }

    #[test]
    fn multi_lookup_canonicalises_selections() {
        let field = FieldDef {
            key: "tags".to_string(),
            name: "tags".to_string(),
            required: false,
            active: true,
            order: 0,
            kind: FieldKind::MultiLookup {
                values: vec![
                    LookupValue { id: 1, name: "One".to_string() },
                    LookupValue { id: 2, name: "Two".to_string() },
                ],
            },
        };
        assert_eq!(
            normalise_value(&field, &json!([2, "1"])).unwrap(),
            json!("[2,1]")
        );
        assert_eq!(
            normalise_value(&field, &json!("[1, 2]")).unwrap(),
            json!("[1,2]")
        );
        assert!(normalise_value(&field, &json!([1, 7])).is_err());
    }

    #[test]
    fn key_validation() {
        assert!(is_valid_key("tree_height"));
        assert!(is_valid_key("Tree-1"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("a.b"));
        assert!(!is_valid_key("a b"));
    }
}
