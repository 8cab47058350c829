use chrono::{SecondsFormat, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Value};

use crate::error::NanocrudError;

/// A stored document: a JSON object
pub type Document = Map<String, Value>;

/// Primary key field
pub const ID_FIELD: &str = "_id";
/// Creation timestamp field
pub const CREATED_AT: &str = "createdAt";
/// Last-modification timestamp field
pub const UPDATED_AT: &str = "updatedAt";

const ID_LEN: usize = 16;

/// Generate a random 16-character alphanumeric document id
pub fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}

/// Current time as an RFC 3339 UTC string with millisecond precision
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Get the `_id` of a document, if it has a string one
pub fn doc_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

/// Check field names recursively: no leading `$`, no `.`
pub fn validate_keys(value: &Value) -> Result<(), NanocrudError> {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                if key.starts_with('$') {
                    return Err(NanocrudError::invalid(format!(
                        "field names cannot begin with '$': {}",
                        key
                    )));
                }
                if key.contains('.') {
                    return Err(NanocrudError::invalid(format!(
                        "field names cannot contain '.': {}",
                        key
                    )));
                }
                validate_keys(v)?;
            }
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(validate_keys),
        _ => Ok(()),
    }
}

/// Turn an incoming JSON value into a new document ready for insertion.
///
/// Assigns an id unless a string one is supplied and stamps both timestamps.
pub fn prepare_new(value: Value) -> Result<Document, NanocrudError> {
    let mut doc = match value {
        Value::Object(map) => map,
        other => {
            return Err(NanocrudError::invalid(format!(
                "document must be an object, got {}",
                type_name(&other)
            )))
        }
    };

    match doc.get(ID_FIELD) {
        None | Some(Value::Null) => {
            doc.insert(ID_FIELD.to_string(), Value::String(generate_id()));
        }
        Some(Value::String(s)) if !s.is_empty() => {}
        Some(_) => return Err(NanocrudError::invalid("_id must be a non-empty string")),
    }

    let body: Document = doc
        .iter()
        .filter(|(k, _)| k.as_str() != ID_FIELD)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    validate_keys(&Value::Object(body))?;

    let now = now_timestamp();
    doc.insert(CREATED_AT.to_string(), Value::String(now.clone()));
    doc.insert(UPDATED_AT.to_string(), Value::String(now));
    Ok(doc)
}

/// Human-readable JSON type name for error messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
