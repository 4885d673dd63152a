//! Flat configuration document editing.
//!
//! The launcher owns a flat JSON config document; its schema is not
//! hard-coded here but discovered from the companion tutorial file,
//! whose embedded JSON object maps every known key to an example value.
//! Updates are checked strictly against that schema (known key, matching
//! JSON type) and require a restart to take effect.

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::CoreError;

/// Read and parse a flat JSON object document at `path`.
///
/// A missing document is an empty object, so the editor works before
/// first save.
pub fn load_document(path: &Path) -> Result<Map<String, Value>, CoreError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => {
            return Err(CoreError::Internal(format!(
                "Failed to read config document: {e}"
            )))
        }
    };

    parse_flat_object(&raw)
        .ok_or_else(|| CoreError::Internal("Config document is not a JSON object".to_string()))
}

/// Discover the config schema from the tutorial file at `path`.
///
/// The tutorial is prose with one JSON object embedded; the object's
/// values are examples whose JSON types define the expected type of each
/// key.
pub fn load_schema(path: &Path) -> Result<Map<String, Value>, CoreError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        CoreError::Internal(format!("Failed to read config tutorial file: {e}"))
    })?;

    extract_embedded_object(&raw)
        .ok_or_else(|| CoreError::Internal("Config tutorial file contains no JSON object".to_string()))
}

/// Apply `patch` to `doc`, validating every key against `schema`.
///
/// Returns the number of keys written. Unknown keys and type mismatches
/// are validation errors; nothing is written when any entry fails.
pub fn apply_update(
    doc: &mut Map<String, Value>,
    schema: &Map<String, Value>,
    patch: &Map<String, Value>,
) -> Result<usize, CoreError> {
    for (key, value) in patch {
        let expected = schema.get(key).ok_or_else(|| {
            CoreError::Validation(format!("Unknown config key '{key}'"))
        })?;
        let expected_type = json_type(expected);
        let got_type = json_type(value);
        if expected_type != got_type {
            return Err(CoreError::Validation(format!(
                "Config key '{key}' must be of type {expected_type}, got {got_type}"
            )));
        }
    }

    for (key, value) in patch {
        doc.insert(key.clone(), value.clone());
    }
    Ok(patch.len())
}

/// Serialize and write the document back to `path`.
pub fn save_document(path: &Path, doc: &Map<String, Value>) -> Result<(), CoreError> {
    let rendered = serde_json::to_string_pretty(&Value::Object(doc.clone()))
        .map_err(|e| CoreError::Internal(format!("Failed to serialize config document: {e}")))?;
    std::fs::write(path, rendered)
        .map_err(|e| CoreError::Internal(format!("Failed to write config document: {e}")))
}

fn parse_flat_object(raw: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Find the JSON object embedded in a prose document.
fn extract_embedded_object(raw: &str) -> Option<Map<String, Value>> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    parse_flat_object(raw.get(start..=end)?)
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
