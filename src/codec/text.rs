//! JSON text form for dynamic messages
//!
//! Follows the protobuf JSON mapping: camelCase keys (declared names are
//! accepted when parsing), 64-bit integers as strings, `bytes` as base64,
//! enums by value name and `NaN`/`Infinity`/`-Infinity` for non-finite
//! floats. Keys are emitted in field-number order. The `google.protobuf`
//! well-known types use their own forms (see [`wkt`]).

mod wkt;

pub use wkt::is_well_known;

use std::collections::{BTreeMap, HashMap, HashSet};

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::{Map, Number, Value as Json};

use crate::error::{ProtopadError, Result};
use crate::message::{field_default, DynamicMessage, MapKey, Value};
use crate::schema::{Cardinality, FieldDescriptor, FieldKind, MessageDescriptor, ScalarType};

type ParseResult<T> = std::result::Result<T, String>;

/// Whether an unset field is rendered when defaults are requested.
///
/// Fields with explicit presence (singular messages, oneof members,
/// optional scalars) only appear when they are set.
fn renders_default(field: &FieldDescriptor) -> bool {
    !field.has_presence
}

/// Render a message as a JSON tree
pub fn to_json(message: &DynamicMessage, include_defaults: bool) -> Json {
    wkt::to_json(message, include_defaults)
        .unwrap_or_else(|| message_to_json(message, include_defaults))
}

fn message_to_json(message: &DynamicMessage, include_defaults: bool) -> Json {
    let desc = message.descriptor();
    let mut obj = Map::new();
    for field in desc.fields() {
        let rendered = match message.get(field) {
            Some(value) => field_to_json(desc, field, value, include_defaults),
            None if include_defaults && renders_default(field) => {
                field_to_json(desc, field, &field_default(desc, field), include_defaults)
            }
            None => continue,
        };
        obj.insert(field.json_name.clone(), rendered);
    }
    Json::Object(obj)
}

fn field_to_json(
    desc: &MessageDescriptor,
    field: &FieldDescriptor,
    value: &Value,
    include_defaults: bool,
) -> Json {
    match value {
        Value::List(items) => Json::Array(
            items
                .iter()
                .map(|item| element_to_json(desc, field, item, include_defaults))
                .collect(),
        ),
        Value::Map(entries) => {
            let mut obj = Map::new();
            if let Some(entry_desc) = desc.message_type(field) {
                if let Some((_, value_field)) = entry_desc.map_entry_fields() {
                    for (key, item) in entries {
                        obj.insert(
                            map_key_to_string(key),
                            element_to_json(&entry_desc, value_field, item, include_defaults),
                        );
                    }
                }
            }
            Json::Object(obj)
        }
        value => element_to_json(desc, field, value, include_defaults),
    }
}

fn element_to_json(
    desc: &MessageDescriptor,
    field: &FieldDescriptor,
    value: &Value,
    include_defaults: bool,
) -> Json {
    match value {
        Value::Bool(v) => Json::Bool(*v),
        Value::I32(v) => Json::from(*v),
        Value::U32(v) => Json::from(*v),
        Value::I64(v) => Json::String(v.to_string()),
        Value::U64(v) => Json::String(v.to_string()),
        // Shortest f32 representation, not the widened f64 digits
        Value::F32(v) => float_to_json(v.to_string().parse::<f64>().unwrap_or(f64::from(*v))),
        Value::F64(v) => float_to_json(*v),
        Value::String(v) => Json::String(v.clone()),
        Value::Bytes(v) => Json::String(STANDARD.encode(v)),
        Value::Enum(number) => wkt::null_value(desc, field).unwrap_or_else(|| {
            desc.enum_type(field)
                .and_then(|e| e.value_name(*number).map(str::to_string))
                .map(Json::String)
                .unwrap_or_else(|| Json::from(*number))
        }),
        Value::Message(message) => to_json(message, include_defaults),
        Value::List(_) | Value::Map(_) => field_to_json(desc, field, value, include_defaults),
    }
}

fn float_to_json(v: f64) -> Json {
    if v.is_nan() {
        Json::String("NaN".to_string())
    } else if v.is_infinite() {
        let name = if v > 0.0 { "Infinity" } else { "-Infinity" };
        Json::String(name.to_string())
    } else {
        Number::from_f64(v).map(Json::Number).unwrap_or(Json::Null)
    }
}

fn map_key_to_string(key: &MapKey) -> String {
    match key {
        MapKey::Bool(v) => v.to_string(),
        MapKey::I32(v) => v.to_string(),
        MapKey::I64(v) => v.to_string(),
        MapKey::U32(v) => v.to_string(),
        MapKey::U64(v) => v.to_string(),
        MapKey::String(v) => v.clone(),
    }
}

/// Parse a JSON tree as a message of type `desc`
pub fn from_json(desc: &MessageDescriptor, json: &Json) -> Result<DynamicMessage> {
    parse_message(desc, json).map_err(|reason| ProtopadError::text(desc.full_name(), reason))
}

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}

fn parse_message(desc: &MessageDescriptor, json: &Json) -> ParseResult<DynamicMessage> {
    if let Some(parsed) = wkt::from_json(desc, json) {
        return parsed;
    }

    let obj = json
        .as_object()
        .ok_or_else(|| format!("expected an object for {}, got {}", desc.full_name(), json_kind(json)))?;

    let mut message = DynamicMessage::new(desc.clone());
    let mut seen_fields = HashSet::new();
    let mut seen_oneofs: HashMap<u32, &str> = HashMap::new();

    for (key, value) in obj {
        let field = desc.field_by_key(key).ok_or_else(|| {
            format!("Message type \"{}\" has no field named \"{}\"", desc.full_name(), key)
        })?;
        if !seen_fields.insert(field.number) {
            return Err(format!("field \"{}\" is specified more than once", field.name));
        }
        if value.is_null() && !wkt::accepts_null(desc, field) {
            continue;
        }
        if let Some(oneof) = field.oneof {
            if let Some(previous) = seen_oneofs.insert(oneof, key.as_str()) {
                return Err(format!(
                    "fields \"{}\" and \"{}\" belong to the same oneof",
                    previous, key
                ));
            }
        }

        let parsed = parse_field(desc, field, value).map_err(|e| format!("{}: {}", key, e))?;
        message.set(field, parsed);
    }

    Ok(message)
}

fn parse_field(desc: &MessageDescriptor, field: &FieldDescriptor, json: &Json) -> ParseResult<Value> {
    match field.cardinality {
        Cardinality::Repeated => {
            let items = json
                .as_array()
                .ok_or_else(|| format!("expected an array, got {}", json_kind(json)))?;
            items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    if item.is_null() && !wkt::accepts_null(desc, field) {
                        return Err(format!("[{}]: null is not allowed in a list", i));
                    }
                    parse_element(desc, field, item).map_err(|e| format!("[{}]: {}", i, e))
                })
                .collect::<ParseResult<Vec<_>>>()
                .map(Value::List)
        }
        Cardinality::Map => {
            let obj = json
                .as_object()
                .ok_or_else(|| format!("expected an object, got {}", json_kind(json)))?;
            let entry_desc = desc
                .message_type(field)
                .ok_or_else(|| "map field without entry type".to_string())?;
            let (key_field, value_field) = entry_desc
                .map_entry_fields()
                .ok_or_else(|| "malformed map entry type".to_string())?;

            let mut entries = BTreeMap::new();
            for (key, item) in obj {
                if item.is_null() && !wkt::accepts_null(&entry_desc, value_field) {
                    return Err(format!("[{}]: null is not allowed as a map value", key));
                }
                let map_key = parse_map_key(key_field, key)?;
                let value = parse_element(&entry_desc, value_field, item)
                    .map_err(|e| format!("[{}]: {}", key, e))?;
                entries.insert(map_key, value);
            }
            Ok(Value::Map(entries))
        }
        Cardinality::Singular => parse_element(desc, field, json),
    }
}

fn parse_element(desc: &MessageDescriptor, field: &FieldDescriptor, json: &Json) -> ParseResult<Value> {
    match field.kind {
        FieldKind::Scalar(scalar) => parse_scalar(scalar, json),
        FieldKind::Bytes => {
            let encoded = json
                .as_str()
                .ok_or_else(|| format!("expected a base64 string, got {}", json_kind(json)))?;
            decode_base64(encoded).map(Value::Bytes)
        }
        FieldKind::Enum(_) => {
            let enum_desc = desc
                .enum_type(field)
                .ok_or_else(|| "enum field without enum type".to_string())?;
            match json {
                Json::Null if wkt::accepts_null(desc, field) => Ok(Value::Enum(0)),
                Json::String(name) => enum_desc.value_number(name).map(Value::Enum).ok_or_else(|| {
                    format!("invalid enum value {} for enum type {}", name, enum_desc.full_name())
                }),
                Json::Number(_) => {
                    let number = parse_int(json)?;
                    i32::try_from(number)
                        .map(Value::Enum)
                        .map_err(|_| format!("enum value {} out of range", number))
                }
                other => Err(format!("expected an enum name or number, got {}", json_kind(other))),
            }
        }
        FieldKind::Message(_) => {
            let nested = desc
                .message_type(field)
                .ok_or_else(|| "message field without message type".to_string())?;
            parse_message(&nested, json).map(Value::Message)
        }
    }
}

fn parse_scalar(scalar: ScalarType, json: &Json) -> ParseResult<Value> {
    let value = match scalar {
        ScalarType::Int32 | ScalarType::Sint32 | ScalarType::Sfixed32 => {
            let v = parse_int(json)?;
            Value::I32(i32::try_from(v).map_err(|_| format!("integer {} out of range for int32", v))?)
        }
        ScalarType::Int64 | ScalarType::Sint64 | ScalarType::Sfixed64 => Value::I64(parse_int(json)?),
        ScalarType::Uint32 | ScalarType::Fixed32 => {
            let v = parse_uint(json)?;
            Value::U32(u32::try_from(v).map_err(|_| format!("integer {} out of range for uint32", v))?)
        }
        ScalarType::Uint64 | ScalarType::Fixed64 => Value::U64(parse_uint(json)?),
        ScalarType::Float => {
            let v = parse_float(json)?;
            if v.is_finite() && v.abs() > f64::from(f32::MAX) {
                return Err(format!("float {} out of range", v));
            }
            Value::F32(v as f32)
        }
        ScalarType::Double => Value::F64(parse_float(json)?),
        ScalarType::Bool => Value::Bool(
            json.as_bool()
                .ok_or_else(|| format!("expected a boolean, got {}", json_kind(json)))?,
        ),
        ScalarType::String => Value::String(
            json.as_str()
                .ok_or_else(|| format!("expected a string, got {}", json_kind(json)))?
                .to_string(),
        ),
    };
    Ok(value)
}

/// Integers above this magnitude are not exact as `f64`
const EXACT_FLOAT_LIMIT: f64 = 9007199254740992.0;

fn has_float_syntax(s: &str) -> bool {
    s.contains(['.', 'e', 'E'])
}

/// An integer written in float notation, such as `1e3` or `5.0`
fn integral_float(v: f64) -> ParseResult<f64> {
    if !v.is_finite() || v.fract() != 0.0 {
        return Err(format!("{} is not an integer", v));
    }
    if v.abs() >= EXACT_FLOAT_LIMIT {
        return Err(format!("{} cannot be represented exactly as an integer", v));
    }
    Ok(v)
}

fn parse_int(json: &Json) -> ParseResult<i64> {
    let float = match json {
        Json::Number(n) => match n.as_i64() {
            Some(v) => return Ok(v),
            None if n.is_f64() => n.as_f64(),
            None => return Err(format!("integer {} out of range for int64", n)),
        },
        Json::String(s) => match s.parse::<i64>() {
            Ok(v) => return Ok(v),
            Err(_) if has_float_syntax(s) => s.parse::<f64>().ok(),
            Err(_) => return Err(format!("invalid integer \"{}\"", s)),
        },
        other => return Err(format!("expected an integer, got {}", json_kind(other))),
    };
    let v = integral_float(float.ok_or_else(|| format!("invalid integer {}", json))?)?;
    if v < -9223372036854775808.0 || v >= 9223372036854775808.0 {
        return Err(format!("integer {} out of range for int64", v));
    }
    Ok(v as i64)
}

fn parse_uint(json: &Json) -> ParseResult<u64> {
    let float = match json {
        Json::Number(n) => match n.as_u64() {
            Some(v) => return Ok(v),
            None if n.is_f64() => n.as_f64(),
            None => return Err(format!("integer {} out of range for uint64", n)),
        },
        Json::String(s) => match s.parse::<u64>() {
            Ok(v) => return Ok(v),
            Err(_) if has_float_syntax(s) => s.parse::<f64>().ok(),
            Err(_) => return Err(format!("invalid unsigned integer \"{}\"", s)),
        },
        other => return Err(format!("expected an unsigned integer, got {}", json_kind(other))),
    };
    let v = integral_float(float.ok_or_else(|| format!("invalid unsigned integer {}", json))?)?;
    if v < 0.0 || v >= 18446744073709551616.0 {
        return Err(format!("integer {} out of range for uint64", v));
    }
    Ok(v as u64)
}

fn parse_float(json: &Json) -> ParseResult<f64> {
    match json {
        Json::Number(n) => n.as_f64().ok_or_else(|| format!("invalid number {}", n)),
        Json::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => other.parse::<f64>().map_err(|_| format!("invalid number \"{}\"", other)),
        },
        other => Err(format!("expected a number, got {}", json_kind(other))),
    }
}

fn parse_map_key(key_field: &FieldDescriptor, key: &str) -> ParseResult<MapKey> {
    let value = match key_field.kind {
        FieldKind::Scalar(ScalarType::Bool) => match key {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            other => return Err(format!("invalid boolean map key \"{}\"", other)),
        },
        FieldKind::Scalar(scalar) => parse_scalar(scalar, &Json::String(key.to_string()))?,
        _ => return Err("unsupported map key type".to_string()),
    };
    MapKey::from_value(value).ok_or_else(|| format!("invalid map key \"{}\"", key))
}

/// Standard or URL-safe base64, padded or not
fn decode_base64(encoded: &str) -> ParseResult<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .or_else(|_| URL_SAFE.decode(encoded))
        .or_else(|_| STANDARD_NO_PAD.decode(encoded))
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
        .map_err(|e| format!("invalid base64 \"{}\": {}", encoded, e))
}
