//! JSON projection of runtime values.
//!
//! Two forms exist for most domain scalars: the *bare* form, used when the
//! serialization config carries a matching pattern (the receiver knows what to
//! expect), and the *untyped-value wrapper* `{"<typename>__value": ...}` used
//! context-free. `Int` is always a quoted decimal string so 64-bit precision
//! survives JSON readers. Cycles are detected through value identity and
//! reported as [`SerializationError::NoRepresentation`].

use std::collections::HashSet;

use serde_json::{json, Map, Value as JsonValue};
use thiserror::Error;

use crate::context::Context;
use crate::pattern::{untyped_wrapper_key, Pattern, PatternKind, SeqShape};
use crate::value::{TypeTag, Value, ValueId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerializationError {
    #[error("no JSON representation for value of type {0}")]
    NoRepresentation(&'static str),
    #[error("pattern does not match value to serialize at /{location}, pattern: {pattern}")]
    PatternMismatch { location: String, pattern: String },
    #[error("pattern required to serialize value of type {0}")]
    PatternRequired(&'static str),
}

/// Controls one serialization: the optional receiving pattern and the location
/// of the current value for error messages.
#[derive(Debug, Clone, Default)]
pub struct JsonSerializationConfig {
    pub pattern: Option<Pattern>,
    pub location: String,
    /// Bypasses per-object visibility filtering.
    pub all_visible: bool,
}

impl JsonSerializationConfig {
    pub fn with_pattern(pattern: Pattern) -> Self {
        Self {
            pattern: Some(pattern),
            ..Default::default()
        }
    }

    fn child(&self, key: &str, pattern: Option<Pattern>) -> Self {
        let location = if self.location.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.location)
        };
        Self {
            pattern,
            location,
            all_visible: self.all_visible,
        }
    }
}

/// Whether `value` can be serialized at all under `config`.
///
/// A `false` here guarantees that [`write_json_representation`] fails; the
/// converse does not hold (negative quantities pass the predicate but fail at
/// write time).
pub fn has_json_representation(value: &Value, config: &JsonSerializationConfig) -> bool {
    has_repr_inner(value, &mut HashSet::new(), config)
}

fn has_repr_inner(
    value: &Value,
    encountered: &mut HashSet<ValueId>,
    config: &JsonSerializationConfig,
) -> bool {
    match value {
        Value::Byte(_)
        | Value::FileMode(_)
        | Value::QuantityRange(_)
        | Value::RuneSlice(_)
        | Value::ByteSlice(_)
        | Value::Dictionary(_)
        | Value::KeyList(_)
        | Value::Mutation(_)
        | Value::Thread(_)
        | Value::HttpRequest(_)
        | Value::HttpServer(_)
        | Value::Pattern(_) => false,
        Value::Option(option) => matches!(option.value, Value::Bool(true)),
        Value::FileInfo(_) => config.pattern.is_some(),
        Value::Object(object) => {
            if !encountered.insert(object.id()) {
                return false;
            }
            let ok = object
                .entries()
                .iter()
                .all(|(_, v)| has_repr_inner(v, encountered, config));
            encountered.remove(&object.id());
            ok
        }
        Value::Record(record) => record
            .entries()
            .values()
            .all(|v| has_repr_inner(v, encountered, config)),
        Value::List(list) => {
            if !encountered.insert(list.id()) {
                return false;
            }
            let ok = list
                .elements()
                .iter()
                .all(|v| has_repr_inner(v, encountered, config));
            encountered.remove(&list.id());
            ok
        }
        Value::Tuple(tuple) => tuple
            .elements()
            .iter()
            .all(|v| has_repr_inner(v, encountered, config)),
        _ => true,
    }
}

/// Serializes `value` to its JSON string form.
pub fn get_json_representation(
    ctx: &Context,
    value: &Value,
    config: &JsonSerializationConfig,
) -> Result<String, SerializationError> {
    let json = write_json_representation(ctx, value, config)?;
    Ok(serde_json::to_string(&json).expect("JSON value serializes"))
}

fn untyped_wrapper(tag: TypeTag, payload: JsonValue) -> JsonValue {
    let mut map = Map::new();
    map.insert(untyped_wrapper_key(tag), payload);
    JsonValue::Object(map)
}

/// Bare string when a pattern is in scope, wrapper object otherwise.
fn string_scalar(tag: TypeTag, s: String, config: &JsonSerializationConfig) -> JsonValue {
    if config.pattern.is_some() {
        JsonValue::String(s)
    } else {
        untyped_wrapper(tag, JsonValue::String(s))
    }
}

/// Builds the JSON tree for `value`.
pub fn write_json_representation(
    ctx: &Context,
    value: &Value,
    config: &JsonSerializationConfig,
) -> Result<JsonValue, SerializationError> {
    if !has_json_representation(value, config) {
        return Err(SerializationError::NoRepresentation(value.kind_name()));
    }
    if let Some(pattern) = &config.pattern {
        if !pattern.test(ctx, value) {
            return Err(SerializationError::PatternMismatch {
                location: config.location.clone(),
                pattern: pattern.to_string(),
            });
        }
    }
    write_inner(ctx, value, config)
}

fn write_inner(
    ctx: &Context,
    value: &Value,
    config: &JsonSerializationConfig,
) -> Result<JsonValue, SerializationError> {
    let tag = value.type_tag();
    match value {
        Value::Nil => Ok(JsonValue::Null),
        Value::Bool(b) => Ok(JsonValue::Bool(*b)),
        // Quoted decimal, always: JSON numbers cannot carry 64-bit ints.
        Value::Int(i) => Ok(JsonValue::String(i.to_string())),
        Value::Float(x) => Ok(json!(x)),
        Value::Str(s) => Ok(JsonValue::String(s.clone())),
        Value::StringConcatenation(concat) => Ok(JsonValue::String(concat.string())),
        Value::Rune(r) => Ok(string_scalar(tag, r.to_string(), config)),
        Value::Path(p) => Ok(string_scalar(tag, p.as_str().to_string(), config)),
        Value::PathPattern(p) => Ok(string_scalar(tag, p.as_str().to_string(), config)),
        Value::Url(u) => Ok(string_scalar(tag, u.as_str().to_string(), config)),
        Value::UrlPattern(u) => Ok(string_scalar(tag, u.as_str().to_string(), config)),
        Value::Host(h) => Ok(string_scalar(tag, h.as_str().to_string(), config)),
        Value::HostPattern(h) => Ok(string_scalar(tag, h.as_str().to_string(), config)),
        Value::Scheme(s) => Ok(string_scalar(tag, s.as_str().to_string(), config)),
        Value::EmailAddress(e) => Ok(string_scalar(tag, e.as_str().to_string(), config)),
        Value::Identifier(i) => Ok(string_scalar(tag, i.as_str().to_string(), config)),
        Value::PropertyName(p) => Ok(string_scalar(tag, p.as_str().to_string(), config)),
        Value::Mimetype(m) => Ok(string_scalar(tag, m.as_str().to_string(), config)),
        Value::Duration(d) => Ok(string_scalar(tag, d.to_string(), config)),
        Value::Date(d) => Ok(string_scalar(tag, d.to_string(), config)),
        Value::ByteCount(c) => {
            if c.is_negative() {
                return Err(SerializationError::NoRepresentation(tag.name()));
            }
            Ok(string_scalar(tag, c.to_string(), config))
        }
        Value::LineCount(c) => {
            if c.is_negative() {
                return Err(SerializationError::NoRepresentation(tag.name()));
            }
            Ok(string_scalar(tag, c.to_string(), config))
        }
        Value::RuneCount(c) => {
            if c.is_negative() {
                return Err(SerializationError::NoRepresentation(tag.name()));
            }
            Ok(string_scalar(tag, c.to_string(), config))
        }
        Value::ByteRate(r) => {
            if r.is_negative() {
                return Err(SerializationError::NoRepresentation(tag.name()));
            }
            Ok(string_scalar(tag, r.to_string(), config))
        }
        Value::SimpleRate(r) => {
            if r.is_negative() {
                return Err(SerializationError::NoRepresentation(tag.name()));
            }
            Ok(string_scalar(tag, r.to_string(), config))
        }
        Value::Port(p) => Ok(string_scalar(tag, p.to_string(), config)),
        Value::Color(c) => Ok(string_scalar(tag, c.to_string(), config)),
        Value::Option(option) => {
            // Only set boolean flags serialize; the flag name is the payload.
            if !matches!(option.value, Value::Bool(true)) {
                return Err(SerializationError::NoRepresentation(tag.name()));
            }
            Ok(JsonValue::String(option.flag()))
        }
        Value::IntRange(range) => {
            let mut map = Map::new();
            map.insert("start".into(), JsonValue::String(range.start.to_string()));
            map.insert("end".into(), JsonValue::String(range.end.to_string()));
            Ok(JsonValue::Object(map))
        }
        Value::RuneRange(range) => {
            let mut map = Map::new();
            map.insert("start".into(), JsonValue::String(range.start.to_string()));
            map.insert("end".into(), JsonValue::String(range.end.to_string()));
            Ok(JsonValue::Object(map))
        }
        Value::Object(object) => {
            let entry_patterns = match config.pattern.as_ref().map(Pattern::kind) {
                Some(PatternKind::Object(object_pattern)) => object_pattern.entries.clone(),
                _ => None,
            };
            // One lock for the whole traversal: serialization sees a
            // consistent snapshot.
            let state = object.lock();
            let mut map = Map::new();
            for (key, entry_value) in state.keys().iter().zip(state.values()) {
                if !config.all_visible && !state.visibility().is_property_visible(key) {
                    continue;
                }
                let entry_pattern = entry_patterns
                    .as_ref()
                    .and_then(|entries| entries.get(key))
                    .map(|entry| entry.pattern.clone());
                let child_config = config.child(key, entry_pattern);
                map.insert(
                    key.clone(),
                    write_json_representation(ctx, entry_value, &child_config)?,
                );
            }
            Ok(JsonValue::Object(map))
        }
        Value::Record(record) => {
            let entry_patterns = match config.pattern.as_ref().map(Pattern::kind) {
                Some(PatternKind::Record(record_pattern)) => record_pattern.entries.clone(),
                _ => None,
            };
            let mut map = Map::new();
            for (key, entry_value) in record.entries() {
                let entry_pattern = entry_patterns
                    .as_ref()
                    .and_then(|entries| entries.get(key))
                    .map(|entry| entry.pattern.clone());
                let child_config = config.child(key, entry_pattern);
                map.insert(
                    key.clone(),
                    write_json_representation(ctx, entry_value, &child_config)?,
                );
            }
            Ok(JsonValue::Object(map))
        }
        Value::List(list) => {
            let shape = match config.pattern.as_ref().map(Pattern::kind) {
                Some(PatternKind::List(list_pattern)) => Some(list_pattern.shape.clone()),
                _ => None,
            };
            write_sequence(ctx, &list.elements(), shape, config)
        }
        Value::Tuple(tuple) => {
            let shape = match config.pattern.as_ref().map(Pattern::kind) {
                Some(PatternKind::Tuple(tuple_pattern)) => Some(tuple_pattern.shape.clone()),
                _ => None,
            };
            write_sequence(ctx, tuple.elements(), shape, config)
        }
        Value::FileInfo(info) => {
            // Without a receiving pattern there is no agreed shape.
            if config.pattern.is_none() {
                return Err(SerializationError::PatternRequired(tag.name()));
            }
            let mut map = Map::new();
            map.insert("name".into(), JsonValue::String(info.name.clone()));
            map.insert(
                "abs-path".into(),
                JsonValue::String(info.abs_path.as_str().to_string()),
            );
            map.insert("size".into(), JsonValue::String(info.size.to_string()));
            map.insert("is-dir".into(), JsonValue::Bool(info.is_dir));
            map.insert(
                "mod-time".into(),
                JsonValue::String(info.mod_time.to_string()),
            );
            Ok(JsonValue::Object(map))
        }
        Value::Byte(_)
        | Value::FileMode(_)
        | Value::QuantityRange(_)
        | Value::RuneSlice(_)
        | Value::ByteSlice(_)
        | Value::Dictionary(_)
        | Value::KeyList(_)
        | Value::Mutation(_)
        | Value::Thread(_)
        | Value::HttpRequest(_)
        | Value::HttpServer(_)
        | Value::Pattern(_) => Err(SerializationError::NoRepresentation(tag.name())),
    }
}

fn write_sequence(
    ctx: &Context,
    elements: &[Value],
    shape: Option<SeqShape>,
    config: &JsonSerializationConfig,
) -> Result<JsonValue, SerializationError> {
    let mut array = Vec::with_capacity(elements.len());
    for (index, element) in elements.iter().enumerate() {
        let element_pattern = match &shape {
            Some(SeqShape::General(general)) => Some(general.clone()),
            Some(SeqShape::Elements(patterns)) => patterns.get(index).cloned(),
            None => None,
        };
        let child_config = config.child(&index.to_string(), element_pattern);
        array.push(write_json_representation(ctx, element, &child_config)?);
    }
    Ok(JsonValue::Array(array))
}
