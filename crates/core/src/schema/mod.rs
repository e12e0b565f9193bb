//! Structural validation of JSON values against a pragmatic JSON-Schema subset.
//!
//! Supported keywords: `type`, `required`, `properties`, `items`, `enum` and
//! `additionalProperties`. Anything else in a schema document is ignored, and
//! a schema node that cannot be interpreted (not an object, no `type`, an
//! unknown `type` name) imposes no constraint at that node.
//!
//! Violations are always accumulated; a single call reports everything wrong
//! with a value except beneath a node whose type already mismatched.

pub mod definition;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ROOT_PATH: &str = "$";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    InvalidJson,
    TypeMismatch,
    MissingField,
    UnexpectedField,
    NotInEnum,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::TypeMismatch => "type_mismatch",
            Self::MissingField => "missing_field",
            Self::UnexpectedField => "unexpected_field",
            Self::NotInEnum => "not_in_enum",
        }
    }
}

/// One schema mismatch at a specific JSON path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Violation {
    pub path: String,
    pub kind: ViolationKind,
    pub expected: String,
    pub actual: String,
}

impl Violation {
    pub fn invalid_json(detail: impl Into<String>) -> Self {
        Self {
            path: ROOT_PATH.to_string(),
            kind: ViolationKind::InvalidJson,
            expected: "a single valid JSON document".to_string(),
            actual: detail.into(),
        }
    }

    fn type_mismatch(path: &str, expected: SchemaType, value: &Value) -> Self {
        Self {
            path: path.to_string(),
            kind: ViolationKind::TypeMismatch,
            expected: expected.as_str().to_string(),
            actual: json_type_name(value).to_string(),
        }
    }

    fn missing_field(path: &str) -> Self {
        Self {
            path: path.to_string(),
            kind: ViolationKind::MissingField,
            expected: "field to be present".to_string(),
            actual: "absent".to_string(),
        }
    }

    fn unexpected_field(path: &str, value: &Value) -> Self {
        Self {
            path: path.to_string(),
            kind: ViolationKind::UnexpectedField,
            expected: "no field outside the declared properties".to_string(),
            actual: json_type_name(value).to_string(),
        }
    }

    fn not_in_enum(path: &str, allowed: &[Value], value: &Value) -> Self {
        Self {
            path: path.to_string(),
            kind: ViolationKind::NotInEnum,
            expected: format!("one of {}", Value::Array(allowed.to_vec())),
            actual: value.to_string(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ViolationKind::InvalidJson => {
                write!(f, "{}: output is not valid JSON ({})", self.path, self.actual)
            }
            ViolationKind::TypeMismatch => {
                write!(f, "{}: expected {}, found {}", self.path, self.expected, self.actual)
            }
            ViolationKind::MissingField => write!(f, "{}: missing required field", self.path),
            ViolationKind::UnexpectedField => {
                write!(f, "{}: unexpected field ({})", self.path, self.actual)
            }
            ViolationKind::NotInEnum => {
                write!(f, "{}: expected {}, found {}", self.path, self.expected, self.actual)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

impl SchemaType {
    pub const NAMES: [&'static str; 7] =
        ["string", "number", "integer", "boolean", "object", "array", "null"];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            "null" => Some(Self::Null),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Null => "null",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().map(|number| number.fract() == 0.0).unwrap_or(false)
            }
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Null => value.is_null(),
        }
    }
}

pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validates `value` against `schema`. An empty result means the value conforms.
pub fn validate(value: &Value, schema: &Value) -> Vec<Violation> {
    let mut violations = Vec::new();
    check_node(value, schema, ROOT_PATH, &mut violations);
    violations
}

fn check_node(value: &Value, schema: &Value, path: &str, violations: &mut Vec<Violation>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    let declared_type = schema.get("type").and_then(Value::as_str).and_then(SchemaType::parse);
    if let Some(expected) = declared_type {
        if !expected.matches(value) {
            violations.push(Violation::type_mismatch(path, expected, value));
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            violations.push(Violation::not_in_enum(path, allowed, value));
        }
    }

    match value {
        Value::Object(fields) => check_object(fields, schema, path, violations),
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (index, item) in items.iter().enumerate() {
                    check_node(item, item_schema, &index_path(path, index), violations);
                }
            }
        }
        _ => {}
    }
}

fn check_object(
    fields: &Map<String, Value>,
    schema: &Map<String, Value>,
    path: &str,
    violations: &mut Vec<Violation>,
) {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !fields.contains_key(name) {
                violations.push(Violation::missing_field(&field_path(path, name)));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };

    for (name, property_schema) in properties {
        if let Some(field) = fields.get(name) {
            check_node(field, property_schema, &field_path(path, name), violations);
        }
    }

    let allows_extra =
        schema.get("additionalProperties").and_then(Value::as_bool).unwrap_or(false);
    if !allows_extra {
        for (name, field) in fields {
            if !properties.contains_key(name) {
                violations.push(Violation::unexpected_field(&field_path(path, name), field));
            }
        }
    }
}

fn field_path(parent: &str, name: &str) -> String {
    let plain = !name.is_empty()
        && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
    if plain {
        format!("{parent}.{name}")
    } else {
        format!("{parent}[{}]", Value::String(name.to_string()))
    }
}

fn index_path(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{validate, Violation, ViolationKind};

    fn review_schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "review_text": {"type": "string"},
                "rating": {"type": "number"}
            },
            "required": ["review_text"]
        })
    }

    fn kinds(violations: &[Violation]) -> Vec<(&str, ViolationKind)> {
        violations.iter().map(|violation| (violation.path.as_str(), violation.kind)).collect()
    }

    #[test]
    fn conformant_value_has_no_violations() {
        let violations =
            validate(&json!({"review_text": "Great product!", "rating": 4.5}), &review_schema());
        assert!(violations.is_empty(), "unexpected violations: {violations:?}");
    }

    #[test]
    fn missing_required_field_is_reported_at_its_path() {
        let violations = validate(&json!({}), &review_schema());
        assert_eq!(kinds(&violations), vec![("$.review_text", ViolationKind::MissingField)]);
        assert_eq!(violations[0].to_string(), "$.review_text: missing required field");
    }

    #[test]
    fn wrong_primitive_type_reports_expected_and_actual() {
        let violations = validate(
            &json!({"review_text": "Excellent service!", "rating": "five"}),
            &review_schema(),
        );

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::TypeMismatch);
        assert_eq!(violations[0].expected, "number");
        assert_eq!(violations[0].actual, "string");
        assert_eq!(violations[0].to_string(), "$.rating: expected number, found string");
    }

    #[test]
    fn unexpected_field_is_rejected_unless_additional_properties_allowed() {
        let value = json!({"review_text": "ok", "extra_field": "unexpected"});
        let violations = validate(&value, &review_schema());
        assert_eq!(kinds(&violations), vec![("$.extra_field", ViolationKind::UnexpectedField)]);

        let mut open_schema = review_schema();
        open_schema["additionalProperties"] = json!(true);
        assert!(validate(&value, &open_schema).is_empty());
    }

    #[test]
    fn all_violations_are_accumulated() {
        let value = json!({"rating": true, "extra": 1});
        let violations = validate(&value, &review_schema());

        assert_eq!(
            kinds(&violations),
            vec![
                ("$.review_text", ViolationKind::MissingField),
                ("$.rating", ViolationKind::TypeMismatch),
                ("$.extra", ViolationKind::UnexpectedField),
            ]
        );
    }

    #[test]
    fn nested_objects_and_arrays_are_checked_recursively() {
        let schema = json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "object",
                    "properties": {
                        "sentiment": {"type": "string", "enum": ["positive", "negative"]},
                        "keywords": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["sentiment"]
                }
            },
            "required": ["summary"]
        });
        let value = json!({"summary": {"sentiment": "meh", "keywords": ["fast", 3]}});

        let violations = validate(&value, &schema);
        assert_eq!(
            kinds(&violations),
            vec![
                ("$.summary.keywords[1]", ViolationKind::TypeMismatch),
                ("$.summary.sentiment", ViolationKind::NotInEnum),
            ]
        );
        assert_eq!(violations[1].expected, r#"one of ["positive","negative"]"#);
        assert_eq!(violations[1].actual, r#""meh""#);
    }

    #[test]
    fn type_mismatch_stops_descent_at_that_node() {
        let schema = json!({
            "type": "object",
            "properties": {"inner": {"type": "object", "required": ["a", "b"]}}
        });
        let violations = validate(&json!({"inner": [1, 2]}), &schema);
        assert_eq!(kinds(&violations), vec![("$.inner", ViolationKind::TypeMismatch)]);
    }

    #[test]
    fn root_type_is_enforced() {
        let violations = validate(&json!(["not", "an", "object"]), &review_schema());
        assert_eq!(kinds(&violations), vec![("$", ViolationKind::TypeMismatch)]);
    }

    #[test]
    fn malformed_schema_nodes_impose_no_constraint() {
        assert!(validate(&json!({"anything": 1}), &json!("not a schema")).is_empty());
        assert!(validate(&json!(42), &json!({"description": "no type"})).is_empty());
        assert!(validate(&json!("x"), &json!({"type": "date"})).is_empty());
        assert!(validate(&json!({"a": 1}), &json!({"type": "object", "required": "a"})).is_empty());
    }

    #[test]
    fn integer_accepts_whole_numbers_only() {
        let schema = json!({"type": "integer"});
        assert!(validate(&json!(3), &schema).is_empty());
        assert!(validate(&json!(3.0), &schema).is_empty());
        assert_eq!(validate(&json!(3.5), &schema)[0].kind, ViolationKind::TypeMismatch);
    }

    #[test]
    fn booleans_are_not_numbers() {
        let violations = validate(&json!(true), &json!({"type": "number"}));
        assert_eq!(violations[0].actual, "boolean");
    }

    #[test]
    fn keys_with_punctuation_are_quoted_in_paths() {
        let schema = json!({"type": "object", "required": ["first name"]});
        let violations = validate(&json!({}), &schema);
        assert_eq!(violations[0].path, r#"$["first name"]"#);
    }

    #[test]
    fn validation_is_deterministic() {
        let value = json!({"rating": "x", "b": 1, "a": 2});
        let first = validate(&value, &review_schema());
        let second = validate(&value, &review_schema());
        assert_eq!(first, second);
    }
}
