//! Checks that a schema document supplied at application creation is usable.
//!
//! Each check returns every problem it finds as a human-readable message; an
//! empty list means the document is accepted.

use serde_json::{Map, Value};

use super::{json_type_name, SchemaType};

const ALLOWED_TOP_LEVEL_KEYS: [&str; 6] =
    ["type", "properties", "required", "additionalProperties", "title", "description"];

pub fn check_input_schema(schema: &Value) -> Vec<String> {
    let mut problems = Vec::new();
    let Some(document) = root_document("input_schema", schema, &mut problems) else {
        return problems;
    };

    let properties = match document.get("properties") {
        Some(Value::Object(properties)) if !properties.is_empty() => {
            for (name, property) in properties {
                let declared = property.get("type").and_then(Value::as_str);
                match declared {
                    Some(type_name) if SchemaType::parse(type_name).is_some() => {
                        check_nested(
                            &format!("input_schema.properties.{name}"),
                            property,
                            &mut problems,
                        )
                    }
                    Some(type_name) => problems.push(unsupported_type(
                        &format!("input_schema.properties.{name}"),
                        type_name,
                    )),
                    None => problems.push(format!(
                        "input_schema.properties.{name} must declare a string 'type'"
                    )),
                }
            }
            Some(properties)
        }
        Some(Value::Object(_)) => {
            problems.push("input_schema.properties must be defined and non-empty".to_string());
            None
        }
        Some(other) => {
            problems.push(format!(
                "input_schema.properties must be an object, found {}",
                json_type_name(other)
            ));
            None
        }
        None => {
            problems.push("input_schema.properties must be defined and non-empty".to_string());
            None
        }
    };

    match document.get("required") {
        Some(Value::Array(required)) if !required.is_empty() => {
            check_required_names("input_schema", required, properties, &mut problems)
        }
        Some(Value::Array(_)) | None => {
            problems.push("input_schema.required must list at least one field".to_string())
        }
        Some(other) => problems.push(format!(
            "input_schema.required must be an array, found {}",
            json_type_name(other)
        )),
    }

    problems
}

pub fn check_output_schema(schema: &Value) -> Vec<String> {
    let mut problems = Vec::new();
    let Some(document) = root_document("output_schema", schema, &mut problems) else {
        return problems;
    };

    let properties = match document.get("properties") {
        Some(Value::Object(properties)) if !properties.is_empty() => {
            for (name, property) in properties {
                check_nested(&format!("output_schema.properties.{name}"), property, &mut problems);
            }
            Some(properties)
        }
        Some(Value::Object(_)) | None => {
            problems.push("output_schema.properties must not be empty".to_string());
            None
        }
        Some(other) => {
            problems.push(format!(
                "output_schema.properties must be an object, found {}",
                json_type_name(other)
            ));
            None
        }
    };

    match document.get("required") {
        Some(Value::Array(required)) => {
            check_required_names("output_schema", required, properties, &mut problems)
        }
        Some(other) => problems.push(format!(
            "output_schema.required must be an array, found {}",
            json_type_name(other)
        )),
        None => {}
    }

    problems
}

fn root_document<'a>(
    label: &str,
    schema: &'a Value,
    problems: &mut Vec<String>,
) -> Option<&'a Map<String, Value>> {
    let Some(document) = schema.as_object() else {
        problems.push(format!("{label} must be a JSON object, found {}", json_type_name(schema)));
        return None;
    };

    match document.get("type").and_then(Value::as_str) {
        Some("object") => {}
        Some(other) => {
            problems.push(format!("{label}: the schema 'type' must be 'object'. Found: {other}"))
        }
        None => problems.push(format!("{label}: the schema 'type' must be 'object'")),
    }

    for key in document.keys() {
        if !ALLOWED_TOP_LEVEL_KEYS.contains(&key.as_str()) {
            problems.push(format!("{label}: extra key '{key}' is not permitted"));
        }
    }

    Some(document)
}

/// Recursively checks that every declared `type` below a property is supported.
fn check_nested(location: &str, node: &Value, problems: &mut Vec<String>) {
    let Some(node) = node.as_object() else {
        problems.push(format!("{location} must be a schema object"));
        return;
    };

    if let Some(declared) = node.get("type") {
        match declared.as_str() {
            Some(type_name) if SchemaType::parse(type_name).is_some() => {}
            Some(type_name) => problems.push(unsupported_type(location, type_name)),
            None => problems.push(format!("{location}.type must be a string")),
        }
    }

    if let Some(Value::Object(properties)) = node.get("properties") {
        for (name, property) in properties {
            check_nested(&format!("{location}.properties.{name}"), property, problems);
        }
    }

    if let Some(items) = node.get("items") {
        check_nested(&format!("{location}.items"), items, problems);
    }
}

fn check_required_names(
    label: &str,
    required: &[Value],
    properties: Option<&Map<String, Value>>,
    problems: &mut Vec<String>,
) {
    for entry in required {
        match entry.as_str() {
            Some(name) => {
                let defined = properties.map(|props| props.contains_key(name)).unwrap_or(false);
                if !defined {
                    problems.push(format!(
                        "{label}: required field '{name}' is not defined in properties"
                    ));
                }
            }
            None => problems.push(format!("{label}.required entries must be strings")),
        }
    }
}

fn unsupported_type(location: &str, type_name: &str) -> String {
    format!(
        "{location}: type '{type_name}' must be one of {}",
        SchemaType::NAMES.join(", ")
    )
}
