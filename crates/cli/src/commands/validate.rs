use std::fs;
use std::path::Path;

use schemata_core::schema::validate;
use serde_json::Value;

use crate::commands::CommandResult;

pub fn run(schema_path: &Path, value_path: &Path) -> CommandResult {
    let schema = match read_json(schema_path) {
        Ok(schema) => schema,
        Err((error_class, message)) => {
            return CommandResult::failure("validate", error_class, message, 2);
        }
    };
    let value = match read_json(value_path) {
        Ok(value) => value,
        Err((error_class, message)) => {
            return CommandResult::failure("validate", error_class, message, 2);
        }
    };

    let violations = validate(&value, &schema);
    if violations.is_empty() {
        return CommandResult::success(
            "validate",
            format!("{} conforms to {}", value_path.display(), schema_path.display()),
        );
    }

    let problems: Vec<String> = violations.iter().map(ToString::to_string).collect();
    CommandResult::failure(
        "validate",
        "schema_violation",
        format!("{} violation(s): {}", problems.len(), problems.join("; ")),
        1,
    )
}

fn read_json(path: &Path) -> Result<Value, (&'static str, String)> {
    let raw = fs::read_to_string(path)
        .map_err(|error| ("io", format!("could not read {}: {error}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|error| ("invalid_json", format!("{} is not valid JSON: {error}", path.display())))
}
