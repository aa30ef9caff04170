//! JSON forms of the `google.protobuf` well-known types
//!
//! `Timestamp` and `Duration` are strings, wrappers are their bare value,
//! `Struct`, `Value` and `ListValue` are arbitrary JSON, `FieldMask` is a
//! comma-separated path list and `Any` carries an `@type` key. A value with no
//! such rendering (an out-of-range timestamp, an `Any` of an unknown type) is
//! shown as an ordinary message, and an ordinary object is accepted back
//! wherever the dedicated form is not itself an object.

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde_json::{Map, Value as Json};
use tracing::warn;

use super::{element_to_json, field_to_json, json_kind, parse_element, parse_field, parse_message, ParseResult};
use crate::codec::binary;
use crate::message::{DynamicMessage, Value};
use crate::schema::{FieldDescriptor, MessageDescriptor};

const ANY: &str = "google.protobuf.Any";
const DURATION: &str = "google.protobuf.Duration";
const FIELD_MASK: &str = "google.protobuf.FieldMask";
const LIST_VALUE: &str = "google.protobuf.ListValue";
const NULL_VALUE: &str = "google.protobuf.NullValue";
const STRUCT: &str = "google.protobuf.Struct";
const TIMESTAMP: &str = "google.protobuf.Timestamp";
const VALUE: &str = "google.protobuf.Value";

const WRAPPERS: [&str; 9] = [
    "google.protobuf.DoubleValue",
    "google.protobuf.FloatValue",
    "google.protobuf.Int64Value",
    "google.protobuf.UInt64Value",
    "google.protobuf.Int32Value",
    "google.protobuf.UInt32Value",
    "google.protobuf.BoolValue",
    "google.protobuf.StringValue",
    "google.protobuf.BytesValue",
];

/// 0001-01-01T00:00:00Z
const TIMESTAMP_MIN_SECONDS: i64 = -62_135_596_800;
/// 9999-12-31T23:59:59Z
const TIMESTAMP_MAX_SECONDS: i64 = 253_402_300_799;
/// 10000 years
const DURATION_MAX_SECONDS: i64 = 315_576_000_000;
const MAX_NANOS: i32 = 999_999_999;

/// Whether `full_name` has a dedicated JSON form
pub fn is_well_known(full_name: &str) -> bool {
    matches!(
        full_name,
        ANY | DURATION | FIELD_MASK | LIST_VALUE | STRUCT | TIMESTAMP | VALUE
    ) || WRAPPERS.contains(&full_name)
}

/// Whether JSON `null` is a value of `field` rather than "unset"
pub(super) fn accepts_null(desc: &MessageDescriptor, field: &FieldDescriptor) -> bool {
    desc.message_type(field).is_some_and(|m| m.full_name() == VALUE)
        || desc.enum_type(field).is_some_and(|e| e.full_name() == NULL_VALUE)
}

/// Rendering of a `google.protobuf.NullValue` enum value, if that is the type
pub(super) fn null_value(desc: &MessageDescriptor, field: &FieldDescriptor) -> Option<Json> {
    desc.enum_type(field)
        .filter(|e| e.full_name() == NULL_VALUE)
        .map(|_| Json::Null)
}

/// Special rendering of a well-known message, `None` for ordinary rendering
pub(super) fn to_json(message: &DynamicMessage, include_defaults: bool) -> Option<Json> {
    let desc = message.descriptor();
    match desc.full_name() {
        TIMESTAMP => {
            let (seconds, nanos) = seconds_and_nanos(message);
            timestamp_to_string(seconds, nanos).map(Json::String)
        }
        DURATION => {
            let (seconds, nanos) = seconds_and_nanos(message);
            duration_to_string(seconds, nanos).map(Json::String)
        }
        FIELD_MASK => {
            let paths = match message.get_by_name("paths") {
                Some(Value::List(items)) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(path) => snake_to_camel(path),
                        _ => None,
                    })
                    .collect::<Option<Vec<_>>>()?,
                _ => Vec::new(),
            };
            Some(Json::String(paths.join(",")))
        }
        STRUCT | LIST_VALUE => {
            let field = desc.field_by_number(1)?;
            Some(field_to_json(desc, field, &message.get_or_default(field), include_defaults))
        }
        VALUE => {
            let Some((field, value)) = message.fields().next() else {
                return Some(Json::Null);
            };
            if field.name == "null_value" {
                return Some(Json::Null);
            }
            Some(element_to_json(desc, field, value, include_defaults))
        }
        ANY => any_to_json(message, include_defaults),
        name if WRAPPERS.contains(&name) => {
            let field = desc.field_by_name("value")?;
            Some(element_to_json(desc, field, &message.get_or_default(field), include_defaults))
        }
        _ => None,
    }
}

/// Special parsing of a well-known message, `None` for ordinary parsing
pub(super) fn from_json(desc: &MessageDescriptor, json: &Json) -> Option<ParseResult<DynamicMessage>> {
    let name = desc.full_name();
    if json.is_object() && (matches!(name, TIMESTAMP | DURATION | FIELD_MASK) || WRAPPERS.contains(&name)) {
        return None;
    }

    let parsed = match name {
        TIMESTAMP => expect_str(json).and_then(parse_timestamp).and_then(|(seconds, nanos)| {
            build(desc, [("seconds", Value::I64(seconds)), ("nanos", Value::I32(nanos))])
        }),
        DURATION => expect_str(json).and_then(parse_duration).and_then(|(seconds, nanos)| {
            build(desc, [("seconds", Value::I64(seconds)), ("nanos", Value::I32(nanos))])
        }),
        FIELD_MASK => expect_str(json).and_then(|text| {
            let paths = text
                .split(',')
                .filter(|path| !path.is_empty())
                .map(|path| camel_to_snake(path).map(Value::String))
                .collect::<ParseResult<Vec<_>>>()?;
            build(desc, [("paths", Value::List(paths))])
        }),
        STRUCT => {
            if !json.is_object() {
                return Some(Err(format!("expected an object, got {}", json_kind(json))));
            }
            parse_single_field(desc, json)
        }
        LIST_VALUE => {
            if !json.is_array() {
                return Some(Err(format!("expected an array, got {}", json_kind(json))));
            }
            parse_single_field(desc, json)
        }
        VALUE => parse_value(desc, json),
        ANY => {
            let obj = json.as_object()?;
            let type_url = obj.get("@type")?;
            parse_any(desc, obj, type_url)
        }
        name if WRAPPERS.contains(&name) => field(desc, "value").and_then(|field| {
            let value = parse_element(desc, field, json)?;
            let mut message = DynamicMessage::new(desc.clone());
            message.set(field, value);
            Ok(message)
        }),
        _ => return None,
    };
    Some(parsed)
}

fn field<'a>(desc: &'a MessageDescriptor, name: &str) -> ParseResult<&'a FieldDescriptor> {
    desc.field_by_name(name)
        .ok_or_else(|| format!("{} has no field \"{}\"", desc.full_name(), name))
}

fn build<const N: usize>(desc: &MessageDescriptor, values: [(&str, Value); N]) -> ParseResult<DynamicMessage> {
    let mut message = DynamicMessage::new(desc.clone());
    for (name, value) in values {
        message.set(field(desc, name)?, value);
    }
    Ok(message)
}

fn expect_str(json: &Json) -> ParseResult<&str> {
    json.as_str()
        .ok_or_else(|| format!("expected a string, got {}", json_kind(json)))
}

fn seconds_and_nanos(message: &DynamicMessage) -> (i64, i32) {
    let seconds = match message.get_by_name("seconds") {
        Some(Value::I64(v)) => *v,
        _ => 0,
    };
    let nanos = match message.get_by_name("nanos") {
        Some(Value::I32(v)) => *v,
        _ => 0,
    };
    (seconds, nanos)
}

/// `.000`, `.000000` or `.000000000`, whichever keeps every non-zero digit
fn fraction(nanos: u32) -> String {
    if nanos == 0 {
        String::new()
    } else if nanos % 1_000_000 == 0 {
        format!(".{:03}", nanos / 1_000_000)
    } else if nanos % 1_000 == 0 {
        format!(".{:06}", nanos / 1_000)
    } else {
        format!(".{:09}", nanos)
    }
}

fn timestamp_to_string(seconds: i64, nanos: i32) -> Option<String> {
    if !(TIMESTAMP_MIN_SECONDS..=TIMESTAMP_MAX_SECONDS).contains(&seconds) || !(0..=MAX_NANOS).contains(&nanos) {
        return None;
    }
    let time = DateTime::<Utc>::from_timestamp(seconds, nanos as u32)?;
    Some(time.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn parse_timestamp(text: &str) -> ParseResult<(i64, i32)> {
    let time = DateTime::<FixedOffset>::parse_from_rfc3339(text)
        .map_err(|e| format!("invalid timestamp \"{}\": {}", text, e))?;
    let seconds = time.timestamp();
    let nanos = time.timestamp_subsec_nanos() as i32;
    if !(TIMESTAMP_MIN_SECONDS..=TIMESTAMP_MAX_SECONDS).contains(&seconds) || nanos > MAX_NANOS {
        return Err(format!("timestamp \"{}\" out of range", text));
    }
    Ok((seconds, nanos))
}

fn duration_to_string(seconds: i64, nanos: i32) -> Option<String> {
    if seconds.abs() > DURATION_MAX_SECONDS
        || nanos.abs() > MAX_NANOS
        || (seconds > 0 && nanos < 0)
        || (seconds < 0 && nanos > 0)
    {
        return None;
    }
    let sign = if seconds < 0 || nanos < 0 { "-" } else { "" };
    Some(format!(
        "{}{}{}s",
        sign,
        seconds.unsigned_abs(),
        fraction(nanos.unsigned_abs())
    ))
}

fn parse_duration(text: &str) -> ParseResult<(i64, i32)> {
    let invalid = || format!("invalid duration \"{}\"", text);
    let body = text.strip_suffix('s').ok_or_else(invalid)?;
    let (negative, body) = match body.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    let (whole, frac) = match body.split_once('.') {
        Some((whole, frac)) if !frac.is_empty() => (whole, frac),
        Some(_) => return Err(invalid()),
        None => (body, ""),
    };
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if whole.is_empty() || !digits(whole) || frac.len() > 9 || !digits(frac) {
        return Err(invalid());
    }

    let seconds: i64 = whole.parse().map_err(|_| invalid())?;
    if seconds > DURATION_MAX_SECONDS {
        return Err(format!("duration \"{}\" out of range", text));
    }
    let nanos: i32 = if frac.is_empty() {
        0
    } else {
        format!("{:0<9}", frac).parse().map_err(|_| invalid())?
    };
    Ok(if negative { (-seconds, -nanos) } else { (seconds, nanos) })
}

/// `foo_bar.baz` -> `fooBar.baz`; `None` when the path would not survive the
/// reverse conversion
fn snake_to_camel(path: &str) -> Option<String> {
    let mut out = String::with_capacity(path.len());
    let mut upper = false;
    for c in path.chars() {
        if c.is_ascii_uppercase() {
            return None;
        }
        if c == '_' {
            if upper {
                return None;
            }
            upper = true;
            continue;
        }
        if upper {
            if !c.is_ascii_lowercase() {
                return None;
            }
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    (!upper).then_some(out)
}

fn camel_to_snake(path: &str) -> ParseResult<String> {
    let mut out = String::with_capacity(path.len() + 4);
    for c in path.chars() {
        if c == '_' {
            return Err(format!("invalid field mask path \"{}\"", path));
        }
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

/// `Struct.fields` and `ListValue.values`
fn parse_single_field(desc: &MessageDescriptor, json: &Json) -> ParseResult<DynamicMessage> {
    let field = desc
        .field_by_number(1)
        .ok_or_else(|| format!("{} has no field 1", desc.full_name()))?;
    let value = parse_field(desc, field, json)?;
    let mut message = DynamicMessage::new(desc.clone());
    message.set(field, value);
    Ok(message)
}

fn parse_value(desc: &MessageDescriptor, json: &Json) -> ParseResult<DynamicMessage> {
    let name = match json {
        Json::Null => return build(desc, [("null_value", Value::Enum(0))]),
        Json::Bool(_) => "bool_value",
        Json::Number(_) => "number_value",
        Json::String(_) => "string_value",
        Json::Object(_) => "struct_value",
        Json::Array(_) => "list_value",
    };
    let field = field(desc, name)?;
    let value = parse_element(desc, field, json)?;
    let mut message = DynamicMessage::new(desc.clone());
    message.set(field, value);
    Ok(message)
}

fn type_name(type_url: &str) -> &str {
    type_url.rsplit('/').next().unwrap_or(type_url)
}

fn any_to_json(message: &DynamicMessage, include_defaults: bool) -> Option<Json> {
    let type_url = match message.get_by_name("type_url") {
        Some(Value::String(url)) => url.as_str(),
        _ => "",
    };
    let data = match message.get_by_name("value") {
        Some(Value::Bytes(data)) => data.as_slice(),
        _ => &[],
    };
    if type_url.is_empty() {
        return data.is_empty().then(|| Json::Object(Map::new()));
    }

    let packed_desc = message.descriptor().find_message(type_name(type_url))?;
    let packed = match binary::decode(&packed_desc, data) {
        Ok(packed) => packed,
        Err(e) => {
            warn!("Showing Any of {} as raw bytes: {}", type_url, e);
            return None;
        }
    };

    let mut obj = Map::new();
    obj.insert("@type".to_string(), Json::String(type_url.to_string()));
    match super::to_json(&packed, include_defaults) {
        Json::Object(fields) if !is_well_known(packed_desc.full_name()) => obj.extend(fields),
        other => {
            obj.insert("value".to_string(), other);
        }
    }
    Some(Json::Object(obj))
}

fn parse_any(desc: &MessageDescriptor, obj: &Map<String, Json>, type_url: &Json) -> ParseResult<DynamicMessage> {
    let type_url = expect_str(type_url).map_err(|e| format!("@type: {}", e))?;
    let packed_desc = desc
        .find_message(type_name(type_url))
        .ok_or_else(|| format!("cannot resolve type \"{}\" of Any", type_url))?;

    let packed = if is_well_known(packed_desc.full_name()) {
        let value = obj
            .get("value")
            .ok_or_else(|| format!("Any of {} needs a \"value\" key", type_url))?;
        parse_message(&packed_desc, value)?
    } else {
        let mut fields = obj.clone();
        fields.remove("@type");
        parse_message(&packed_desc, &Json::Object(fields))?
    };

    build(
        desc,
        [
            ("type_url", Value::String(type_url.to_string())),
            ("value", Value::Bytes(binary::encode(&packed))),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_strings() {
        assert_eq!(timestamp_to_string(0, 0).unwrap(), "1970-01-01T00:00:00Z");
        assert_eq!(
            timestamp_to_string(63_108_020, 21_000_000).unwrap(),
            "1972-01-01T10:00:20.021Z"
        );
        assert_eq!(timestamp_to_string(1, 1_000).unwrap(), "1970-01-01T00:00:01.000001Z");
        assert_eq!(timestamp_to_string(-1, 5).unwrap(), "1969-12-31T23:59:59.000000005Z");
        assert!(timestamp_to_string(TIMESTAMP_MAX_SECONDS + 1, 0).is_none());
        assert!(timestamp_to_string(0, -1).is_none());

        assert_eq!(parse_timestamp("1972-01-01T10:00:20.021Z").unwrap(), (63_108_020, 21_000_000));
        assert_eq!(parse_timestamp("1970-01-01T01:00:00+01:00").unwrap(), (0, 0));
        assert!(parse_timestamp("1970-01-01").is_err());
    }

    #[test]
    fn test_duration_strings() {
        assert_eq!(duration_to_string(1, 340_012).unwrap(), "1.000340012s");
        assert_eq!(duration_to_string(-3, 0).unwrap(), "-3s");
        assert_eq!(duration_to_string(0, -500_000_000).unwrap(), "-0.500s");
        assert!(duration_to_string(1, -1).is_none());
        assert!(duration_to_string(DURATION_MAX_SECONDS + 1, 0).is_none());

        assert_eq!(parse_duration("1.000340012s").unwrap(), (1, 340_012));
        assert_eq!(parse_duration("-0.5s").unwrap(), (0, -500_000_000));
        assert_eq!(parse_duration("20s").unwrap(), (20, 0));
        for bad in ["20", "1.s", ".5s", "1.0000000001s", "+1s", "s"] {
            assert!(parse_duration(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_field_mask_paths() {
        assert_eq!(snake_to_camel("user.display_name").unwrap(), "user.displayName");
        assert!(snake_to_camel("bad_Name").is_none());
        assert!(snake_to_camel("trailing_").is_none());
        assert_eq!(camel_to_snake("user.displayName").unwrap(), "user.display_name");
        assert!(camel_to_snake("display_name").is_err());
    }
}
