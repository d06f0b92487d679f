//! The seven per-record merge rules.
//!
//! Every rule is a join over two JSON values: the local record and the
//! incoming one. Each rule first checks both shapes, so a malformed value is
//! reported as a [`RecordError`] instead of being merged into something
//! half-valid. For every rule, `apply(Some(x), x) == x` and applying the same
//! incoming value twice gives the same result as applying it once.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::error::ErrorCode;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeRule {
    /// Non-negative integer; the larger value wins.
    Counter,
    /// Id-keyed collection; incoming entries overwrite on collision.
    KeyedUnion,
    /// Chronological messages; union by id, sorted by `timestamp`.
    Transcript,
    /// Free text; the longer string wins.
    LongestText,
    /// List of scalars; de-duplicated union.
    SetUnion,
    /// `YYYY-MM-DD` → bool; a date true on either side stays true.
    DateFlags,
    /// Nested nullable numbers; max per field.
    FieldwiseMax,
}

/// Which copy of a record a problem was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Incoming,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Incoming => write!(f, "incoming"),
        }
    }
}

/// A single record that could not be merged. Never fatal to the import.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("{side} value at `{at}` should be {expected}, found {found}")]
    Shape {
        side: Side,
        at: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{side} entry {index} has no usable `{field}`")]
    MissingField {
        side: Side,
        index: usize,
        field: &'static str,
    },

    #[error("{side} key `{key}` is not a YYYY-MM-DD date")]
    BadDate { side: Side, key: String },

    #[error("local value is {local} but incoming value is {incoming}")]
    ShapeConflict {
        local: &'static str,
        incoming: &'static str,
    },

    #[error("no merge rule is registered for this record")]
    NoRule,
}

impl RecordError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::PartialRecord
    }
}

impl MergeRule {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::KeyedUnion => "keyed-union",
            Self::Transcript => "transcript",
            Self::LongestText => "longest-text",
            Self::SetUnion => "set-union",
            Self::DateFlags => "date-flags",
            Self::FieldwiseMax => "fieldwise-max",
        }
    }

    /// Merge `incoming` into `current`, returning the new record value.
    ///
    /// With no local record the incoming value is merged into the rule's
    /// empty collection, so repeated ids collapse and transcripts come out
    /// sorted. Scalar and map-shaped records are adopted as they are.
    ///
    /// # Errors
    ///
    /// Returns a [`RecordError`] if either side does not have the shape this
    /// rule expects.
    pub fn apply(self, current: Option<&Value>, incoming: &Value) -> Result<Value, RecordError> {
        let Some(current) = current else {
            self.check(incoming, Side::Incoming)?;
            return match self.empty_like(incoming) {
                Some(empty) => self.apply(Some(&empty), incoming),
                None => Ok(incoming.clone()),
            };
        };

        match self {
            Self::Counter => {
                let local = counter(current, Side::Local)?;
                let remote = counter(incoming, Side::Incoming)?;
                Ok(Value::from(local.max(remote)))
            }
            Self::KeyedUnion => merge_keyed(current, incoming),
            Self::Transcript => merge_transcript(current, incoming),
            Self::LongestText => {
                let local = text(current, Side::Local)?;
                let remote = text(incoming, Side::Incoming)?;
                if remote.chars().count() > local.chars().count() {
                    Ok(incoming.clone())
                } else {
                    Ok(current.clone())
                }
            }
            Self::SetUnion => merge_set(current, incoming),
            Self::DateFlags => merge_date_flags(current, incoming),
            Self::FieldwiseMax => {
                let local = stats_object(current, Side::Local)?;
                let remote = stats_object(incoming, Side::Incoming)?;
                merge_stats(local, remote, "").map(Value::Object)
            }
        }
    }

    /// Empty value of `incoming`'s shape for the list-based rules.
    fn empty_like(self, incoming: &Value) -> Option<Value> {
        match self {
            Self::Transcript | Self::SetUnion => Some(Value::Array(Vec::new())),
            Self::KeyedUnion if incoming.is_array() => Some(Value::Array(Vec::new())),
            _ => None,
        }
    }

    /// Check that `value` has the shape this rule merges.
    ///
    /// # Errors
    ///
    /// Returns the first shape problem found.
    pub fn check(self, value: &Value, side: Side) -> Result<(), RecordError> {
        match self {
            Self::Counter => counter(value, side).map(drop),
            Self::KeyedUnion => keyed(value, side).map(drop),
            Self::Transcript => messages(value, side).map(drop),
            Self::LongestText => text(value, side).map(drop),
            Self::SetUnion => scalars(value, side).map(drop),
            Self::DateFlags => date_flags(value, side).map(drop),
            Self::FieldwiseMax => {
                let object = stats_object(value, side)?;
                check_stats(object, side, "")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Shape helpers
// ---------------------------------------------------------------------------

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn shape(side: Side, at: &str, expected: &'static str, found: &Value) -> RecordError {
    RecordError::Shape {
        side,
        at: if at.is_empty() { "<root>".to_string() } else { at.to_string() },
        expected,
        found: kind(found),
    }
}

fn counter(value: &Value, side: Side) -> Result<u64, RecordError> {
    value
        .as_u64()
        .ok_or_else(|| shape(side, "", "a non-negative integer", value))
}

fn text(value: &Value, side: Side) -> Result<&str, RecordError> {
    value.as_str().ok_or_else(|| shape(side, "", "a string", value))
}

fn array(value: &Value, side: Side) -> Result<&Vec<Value>, RecordError> {
    value.as_array().ok_or_else(|| shape(side, "", "an array", value))
}

fn object(value: &Value, side: Side) -> Result<&Map<String, Value>, RecordError> {
    value.as_object().ok_or_else(|| shape(side, "", "an object", value))
}

/// Textual form of a scalar id; strings and numbers only.
fn scalar_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn element_id(element: &Value, side: Side, index: usize) -> Result<String, RecordError> {
    scalar_id(element.as_object().and_then(|obj| obj.get("id"))).ok_or(RecordError::MissingField {
        side,
        index,
        field: "id",
    })
}

// ---------------------------------------------------------------------------
// Keyed union
// ---------------------------------------------------------------------------

enum Keyed<'a> {
    Map(&'a Map<String, Value>),
    List(Vec<(String, &'a Value)>),
}

fn keyed(value: &Value, side: Side) -> Result<Keyed<'_>, RecordError> {
    match value {
        Value::Object(map) => Ok(Keyed::Map(map)),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| element_id(item, side, index).map(|id| (id, item)))
            .collect::<Result<Vec<_>, _>>()
            .map(Keyed::List),
        other => Err(shape(side, "", "an object or an array of entries with ids", other)),
    }
}

fn merge_keyed(current: &Value, incoming: &Value) -> Result<Value, RecordError> {
    match (keyed(current, Side::Local)?, keyed(incoming, Side::Incoming)?) {
        (Keyed::Map(local), Keyed::Map(remote)) => {
            let mut merged = local.clone();
            for (id, entry) in remote {
                merged.insert(id.clone(), entry.clone());
            }
            Ok(Value::Object(merged))
        }
        (Keyed::List(local), Keyed::List(remote)) => {
            let mut merged: Vec<Value> = local.iter().map(|(_, item)| (*item).clone()).collect();
            let mut position: HashMap<String, usize> = local
                .into_iter()
                .enumerate()
                .map(|(index, (id, _))| (id, index))
                .collect();
            for (id, item) in remote {
                if let Some(&index) = position.get(&id) {
                    merged[index] = item.clone();
                } else {
                    position.insert(id, merged.len());
                    merged.push(item.clone());
                }
            }
            Ok(Value::Array(merged))
        }
        (Keyed::Map(_), Keyed::List(_)) | (Keyed::List(_), Keyed::Map(_)) => {
            Err(RecordError::ShapeConflict {
                local: kind(current),
                incoming: kind(incoming),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

struct Message<'a> {
    id: String,
    timestamp: f64,
    value: &'a Value,
}

fn messages(value: &Value, side: Side) -> Result<Vec<Message<'_>>, RecordError> {
    array(value, side)?
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let id = element_id(item, side, index)?;
            let timestamp = item
                .get("timestamp")
                .and_then(Value::as_f64)
                .ok_or(RecordError::MissingField {
                    side,
                    index,
                    field: "timestamp",
                })?;
            Ok(Message {
                id,
                timestamp,
                value: item,
            })
        })
        .collect()
}

fn merge_transcript(current: &Value, incoming: &Value) -> Result<Value, RecordError> {
    let local = messages(current, Side::Local)?;
    let remote = messages(incoming, Side::Incoming)?;

    let mut seen: HashSet<&str> = local.iter().map(|m| m.id.as_str()).collect();
    let fresh: Vec<&Message<'_>> = remote
        .iter()
        .filter(|message| seen.insert(message.id.as_str()))
        .collect();

    // Nothing new: keep the local transcript byte-for-byte, even if its
    // order is not chronological.
    if fresh.is_empty() {
        return Ok(current.clone());
    }

    let mut merged: Vec<(f64, &Value)> = local
        .iter()
        .chain(fresh)
        .map(|message| (message.timestamp, message.value))
        .collect();
    // Stable: equal timestamps keep local-then-incoming order.
    merged.sort_by(|a, b| a.0.total_cmp(&b.0));

    Ok(Value::Array(
        merged.into_iter().map(|(_, value)| value.clone()).collect(),
    ))
}

// ---------------------------------------------------------------------------
// Set union
// ---------------------------------------------------------------------------

fn scalars(value: &Value, side: Side) -> Result<&Vec<Value>, RecordError> {
    let items = array(value, side)?;
    for (index, item) in items.iter().enumerate() {
        if item.is_array() || item.is_object() {
            return Err(shape(side, &format!("[{index}]"), "a scalar", item));
        }
    }
    Ok(items)
}

fn merge_set(current: &Value, incoming: &Value) -> Result<Value, RecordError> {
    let local = scalars(current, Side::Local)?;
    let remote = scalars(incoming, Side::Incoming)?;

    // `Value`'s Display is its JSON text, which is a fine identity for scalars.
    let mut seen: BTreeSet<String> = local.iter().map(ToString::to_string).collect();
    let mut merged = local.clone();
    for item in remote {
        if seen.insert(item.to_string()) {
            merged.push(item.clone());
        }
    }
    Ok(Value::Array(merged))
}

// ---------------------------------------------------------------------------
// Date flags
// ---------------------------------------------------------------------------

fn date_flags(value: &Value, side: Side) -> Result<&Map<String, Value>, RecordError> {
    let map = object(value, side)?;
    for (key, flag) in map {
        if NaiveDate::parse_from_str(key, DATE_FORMAT).is_err() {
            return Err(RecordError::BadDate {
                side,
                key: key.clone(),
            });
        }
        if !flag.is_boolean() {
            return Err(shape(side, key, "a boolean", flag));
        }
    }
    Ok(map)
}

fn merge_date_flags(current: &Value, incoming: &Value) -> Result<Value, RecordError> {
    let local = date_flags(current, Side::Local)?;
    let remote = date_flags(incoming, Side::Incoming)?;

    let mut merged = local.clone();
    for (date, flag) in remote {
        let done = flag.as_bool().unwrap_or(false)
            || local.get(date).and_then(Value::as_bool).unwrap_or(false);
        merged.insert(date.clone(), Value::Bool(done));
    }
    Ok(Value::Object(merged))
}

// ---------------------------------------------------------------------------
// Field-wise max
// ---------------------------------------------------------------------------

fn stats_object(value: &Value, side: Side) -> Result<&Map<String, Value>, RecordError> {
    object(value, side)
}

fn join_path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_string()
    } else {
        format!("{parent}.{field}")
    }
}

fn check_stats(map: &Map<String, Value>, side: Side, path: &str) -> Result<(), RecordError> {
    for (field, value) in map {
        match value {
            Value::Null | Value::Number(_) => {}
            Value::Object(inner) => check_stats(inner, side, &join_path(path, field))?,
            other => {
                return Err(shape(side, &join_path(path, field), "a number or null", other));
            }
        }
    }
    Ok(())
}

fn compare_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    x.total_cmp(&y)
}

fn merge_stats(
    local: &Map<String, Value>,
    remote: &Map<String, Value>,
    path: &str,
) -> Result<Map<String, Value>, RecordError> {
    let mut merged = Map::new();
    let fields: BTreeSet<&String> = local.keys().chain(remote.keys()).collect();

    for field in fields {
        let at = join_path(path, field);
        let value = match (local.get(field.as_str()), remote.get(field.as_str())) {
            (Some(mine), None) => {
                check_leaf(mine, Side::Local, &at)?;
                mine.clone()
            }
            (None, Some(theirs)) => {
                check_leaf(theirs, Side::Incoming, &at)?;
                theirs.clone()
            }
            (Some(mine), Some(theirs)) => match (mine, theirs) {
                (Value::Number(a), Value::Number(b)) => {
                    if compare_numbers(b, a) == Ordering::Greater {
                        theirs.clone()
                    } else {
                        mine.clone()
                    }
                }
                (Value::Null | Value::Number(_), Value::Null) => mine.clone(),
                (Value::Null, Value::Number(_)) => theirs.clone(),
                (Value::Object(a), Value::Object(b)) => Value::Object(merge_stats(a, b, &at)?),
                (Value::Object(_), other) => return Err(shape(Side::Incoming, &at, "an object", other)),
                (Value::Null | Value::Number(_), other) => {
                    return Err(shape(Side::Incoming, &at, "a number or null", other));
                }
                (other, _) => return Err(shape(Side::Local, &at, "a number or null", other)),
            },
            (None, None) => continue,
        };
        merged.insert(field.clone(), value);
    }
    Ok(merged)
}

fn check_leaf(value: &Value, side: Side, at: &str) -> Result<(), RecordError> {
    match value {
        Value::Null | Value::Number(_) => Ok(()),
        Value::Object(inner) => check_stats(inner, side, at),
        other => Err(shape(side, at, "a number or null", other)),
    }
}
