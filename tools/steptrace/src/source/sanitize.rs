//! Turns raw frame bindings into a JSON-safe locals map.
//!
//! Conversion policy: values that are not plain data become their text; a
//! value whose text could not be produced is dropped from the map.

use crate::source::event::{RawBinding, RawValue};
use serde_json::{Map, Number, Value};

pub const RESERVED_PREFIX: &str = "__";

pub fn sanitize_locals(bindings: Vec<RawBinding>) -> Map<String, Value> {
    let mut out = Map::new();
    for binding in bindings {
        if binding.name.starts_with(RESERVED_PREFIX) {
            continue;
        }
        if let Some(value) = sanitize_value(binding.value) {
            out.insert(binding.name, value);
        }
    }
    out
}

/// `None` means the binding is not program state (type, module, callable) or
/// has no usable representation.
pub fn sanitize_value(raw: RawValue) -> Option<Value> {
    match raw {
        RawValue::Type | RawValue::Module | RawValue::Callable => None,
        RawValue::Other { repr } => repr.map(Value::String),
        other => Some(plain_value(other)),
    }
}

fn plain_value(raw: RawValue) -> Value {
    match raw {
        RawValue::None => Value::Null,
        RawValue::Bool { value } => Value::Bool(value),
        RawValue::Int { value } => int_value(value),
        RawValue::Float { value } => float_value(value),
        RawValue::Str { value } => Value::String(value),
        RawValue::List { items } | RawValue::Tuple { items } => {
            Value::Array(items.into_iter().map(member_value).collect())
        }
        RawValue::Dict { entries } => Value::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key, member_value(value)))
                .collect(),
        ),
        RawValue::Type | RawValue::Module | RawValue::Callable => Value::Null,
        RawValue::Other { repr } => repr.map(Value::String).unwrap_or(Value::Null),
    }
}

// Members of a container cannot be dropped without changing its shape.
fn member_value(raw: RawValue) -> Value {
    plain_value(raw)
}

fn int_value(digits: String) -> Value {
    if let Ok(value) = digits.parse::<i64>() {
        return Value::Number(value.into());
    }
    if let Ok(value) = digits.parse::<u64>() {
        return Value::Number(value.into());
    }
    Value::String(digits)
}

fn float_value(text: String) -> Value {
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::String(text))
}
