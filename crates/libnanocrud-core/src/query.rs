//! Query matching and update modifiers
//!
//! Queries are JSON objects mapping field paths (dotted for nesting) to either
//! a literal or an operator object such as `{"$gt": 3}`. Updates are either a
//! full replacement document or a set of modifiers (`$set`, `$unset`, `$inc`,
//! `$push`).

use std::cmp::Ordering;

use serde_json::{Map, Number, Value};

use crate::error::NanocrudError;
use crate::types::document::{
    now_timestamp, type_name, validate_keys, Document, CREATED_AT, ID_FIELD, UPDATED_AT,
};

/// Check whether `doc` satisfies `query`. An empty query matches everything.
pub fn matches(doc: &Document, query: &Document) -> Result<bool, NanocrudError> {
    for (key, cond) in query {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in subqueries(key, cond)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in subqueries(key, cond)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            k if k.starts_with('$') => {
                return Err(NanocrudError::invalid(format!("unknown logical operator {}", k)))
            }
            path => match_field(get_path(doc, path), cond)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn subqueries<'a>(op: &str, cond: &'a Value) -> Result<Vec<&'a Document>, NanocrudError> {
    let items = cond
        .as_array()
        .ok_or_else(|| NanocrudError::invalid(format!("{} expects an array", op)))?;
    items
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| NanocrudError::invalid(format!("{} expects an array of objects", op)))
        })
        .collect()
}

/// Resolve a dotted path inside a document
fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// An object whose keys all start with `$` is an operator object
fn operator_object(cond: &Value) -> Result<Option<&Map<String, Value>>, NanocrudError> {
    let Some(map) = cond.as_object() else {
        return Ok(None);
    };
    let ops = map.keys().filter(|k| k.starts_with('$')).count();
    if ops == 0 {
        Ok(None)
    } else if ops == map.len() {
        Ok(Some(map))
    } else {
        Err(NanocrudError::invalid(
            "cannot mix operators and plain fields in one condition",
        ))
    }
}

fn match_field(field: Option<&Value>, cond: &Value) -> Result<bool, NanocrudError> {
    let Some(ops) = operator_object(cond)? else {
        return Ok(literal_match(field, cond));
    };

    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => literal_match(field, arg),
            "$ne" => !literal_match(field, arg),
            "$gt" => compare(field, arg) == Some(Ordering::Greater),
            "$gte" => matches!(compare(field, arg), Some(Ordering::Greater | Ordering::Equal)),
            "$lt" => compare(field, arg) == Some(Ordering::Less),
            "$lte" => matches!(compare(field, arg), Some(Ordering::Less | Ordering::Equal)),
            "$in" => list_arg(op, arg)?.iter().any(|v| literal_match(field, v)),
            "$nin" => !list_arg(op, arg)?.iter().any(|v| literal_match(field, v)),
            "$exists" => {
                let want = arg
                    .as_bool()
                    .ok_or_else(|| NanocrudError::invalid("$exists expects a boolean"))?;
                field.is_some() == want
            }
            other => {
                return Err(NanocrudError::invalid(format!("unknown operator {}", other)))
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn list_arg<'a>(op: &str, arg: &'a Value) -> Result<&'a Vec<Value>, NanocrudError> {
    arg.as_array()
        .ok_or_else(|| NanocrudError::invalid(format!("{} expects an array", op)))
}

/// Deep equality, or membership when the field holds an array
fn literal_match(field: Option<&Value>, cond: &Value) -> bool {
    match field {
        None => false,
        Some(v) if v == cond => true,
        Some(Value::Array(items)) if !cond.is_array() => items.contains(cond),
        Some(_) => false,
    }
}

/// Numbers compare with numbers, strings with strings; anything else is unordered
fn compare(field: Option<&Value>, arg: &Value) -> Option<Ordering> {
    match (field?, arg) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn is_modifier_patch(patch: &Document) -> Result<bool, NanocrudError> {
    let mods = patch.keys().filter(|k| k.starts_with('$')).count();
    if mods > 0 && mods != patch.len() {
        return Err(NanocrudError::invalid(
            "cannot mix modifiers and plain fields in an update",
        ));
    }
    Ok(mods > 0)
}

/// Produce the updated form of `doc` under `patch`.
///
/// `_id` and `createdAt` are preserved; `updatedAt` is refreshed.
pub fn apply_update(doc: &Document, patch: &Document) -> Result<Document, NanocrudError> {
    let mut updated = if is_modifier_patch(patch)? {
        let mut updated = doc.clone();
        apply_modifiers(&mut updated, patch)?;
        updated
    } else {
        replace(doc, patch)?
    };

    if updated.get(ID_FIELD) != doc.get(ID_FIELD) {
        return Err(NanocrudError::invalid("_id cannot be modified"));
    }
    if let Some(created) = doc.get(CREATED_AT) {
        updated.insert(CREATED_AT.to_string(), created.clone());
    }
    updated.insert(UPDATED_AT.to_string(), Value::String(now_timestamp()));
    Ok(updated)
}

fn replace(doc: &Document, patch: &Document) -> Result<Document, NanocrudError> {
    let mut updated = patch.clone();
    updated.remove(CREATED_AT);
    updated.remove(UPDATED_AT);
    if let Some(old) = doc.get(ID_FIELD) {
        match updated.get(ID_FIELD) {
            Some(new) if new != old => {
                return Err(NanocrudError::invalid("_id cannot be modified"))
            }
            Some(_) => {}
            None => {
                updated.insert(ID_FIELD.to_string(), old.clone());
            }
        }
    }
    let body: Document = updated
        .iter()
        .filter(|(k, _)| k.as_str() != ID_FIELD)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    validate_keys(&Value::Object(body))?;
    Ok(updated)
}

fn apply_modifiers(doc: &mut Document, patch: &Document) -> Result<(), NanocrudError> {
    for (modifier, fields) in patch {
        let fields = fields.as_object().ok_or_else(|| {
            NanocrudError::invalid(format!("{} expects an object", modifier))
        })?;
        for (path, arg) in fields {
            if path == ID_FIELD {
                return Err(NanocrudError::invalid("_id cannot be modified"));
            }
            match modifier.as_str() {
                "$set" => {
                    validate_keys(arg)?;
                    *slot(doc, path)? = arg.clone();
                }
                "$unset" => unset(doc, path),
                "$inc" => {
                    let target = slot(doc, path)?;
                    *target = increment(path, target, arg)?;
                }
                "$push" => {
                    validate_keys(arg)?;
                    let target = slot(doc, path)?;
                    if target.is_null() {
                        *target = Value::Array(Vec::new());
                    }
                    match target {
                        Value::Array(items) => items.push(arg.clone()),
                        other => {
                            return Err(NanocrudError::invalid(format!(
                                "$push on {} field {}",
                                type_name(other),
                                path
                            )))
                        }
                    }
                }
                other => {
                    return Err(NanocrudError::invalid(format!("unknown modifier {}", other)))
                }
            }
        }
    }
    Ok(())
}

/// Mutable slot at a dotted path, creating intermediate objects and a null leaf
fn slot<'a>(doc: &'a mut Document, path: &str) -> Result<&'a mut Value, NanocrudError> {
    let mut parts = path.split('.').peekable();
    let mut map = doc;
    while let Some(part) = parts.next() {
        if part.is_empty() || part.starts_with('$') {
            return Err(NanocrudError::invalid(format!("invalid field path {}", path)));
        }
        let entry = map.entry(part.to_string()).or_insert(Value::Null);
        if parts.peek().is_none() {
            return Ok(entry);
        }
        if entry.is_null() {
            *entry = Value::Object(Map::new());
        }
        map = match entry {
            Value::Object(inner) => inner,
            other => {
                return Err(NanocrudError::invalid(format!(
                    "cannot descend into {} at {}",
                    type_name(other),
                    path
                )))
            }
        };
    }
    Err(NanocrudError::invalid("empty field path"))
}

fn unset(doc: &mut Document, path: &str) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else {
        return;
    };
    let mut map = doc;
    for part in parts {
        match map.get_mut(part) {
            Some(Value::Object(inner)) => map = inner,
            _ => return,
        }
    }
    map.remove(last);
}

fn increment(path: &str, current: &Value, by: &Value) -> Result<Value, NanocrudError> {
    let Value::Number(by_num) = by else {
        return Err(NanocrudError::invalid(format!("$inc on {} needs a number", path)));
    };
    let base = match current {
        Value::Null => return Ok(Value::Number(by_num.clone())),
        Value::Number(n) => n,
        other => {
            return Err(NanocrudError::invalid(format!(
                "$inc on {} field {}",
                type_name(other),
                path
            )))
        }
    };
    if let (Some(a), Some(b)) = (base.as_i64(), by_num.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(Value::Number(sum.into()));
        }
    }
    let sum = base.as_f64().unwrap_or(0.0) + by_num.as_f64().unwrap_or(0.0);
    Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(|| NanocrudError::invalid(format!("$inc on {} overflowed", path)))
}

/// Seed document for an upsert: the query's literal fields, then the patch.
pub fn upsert_document(query: &Document, patch: &Document) -> Result<Document, NanocrudError> {
    if !is_modifier_patch(patch)? {
        return Ok(patch.clone());
    }
    let mut seed = Document::new();
    for (path, cond) in query {
        if path.starts_with('$') || operator_object(cond)?.is_some() {
            continue;
        }
        *slot(&mut seed, path)? = cond.clone();
    }
    apply_modifiers(&mut seed, patch)?;
    Ok(seed)
}
