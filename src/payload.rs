//! Nested opaque payloads
//!
//! Some schemas carry an independently defined message inside a `bytes`
//! field. Given the type of that embedded message, the text form shows it as
//! a regular JSON object in place of the base64 string, and parsing packs it
//! back into bytes.
//!
//! Only singular nesting is followed: repeated and map fields are never
//! descended into, and repeated `bytes` fields keep their base64 form.
//! Well-known types such as `google.protobuf.Any` are left as they are.

use std::fmt;

use serde_json::Value as Json;
use tracing::debug;

use crate::codec::{self, text};
use crate::error::{ProtopadError, Result};
use crate::message::{DynamicMessage, Value};
use crate::schema::{FieldDescriptor, MessageDescriptor};

/// Declared field names leading from the outer message to a field.
///
/// Every segment but the last names a singular message field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// An embedded message pulled out of the text tree, waiting to be packed
#[derive(Debug, Clone)]
pub struct ExtractedInternal {
    pub path: FieldPath,
    pub message: DynamicMessage,
}

/// Render `message` as text, unpacking embedded `internal` messages
pub fn render_text(
    message: &DynamicMessage,
    internal: Option<&MessageDescriptor>,
    include_defaults: bool,
) -> Result<String> {
    let mut json = text::to_json(message, include_defaults);
    if let Some(internal) = internal {
        substitute_internals(message, &mut json, internal, include_defaults, &mut Vec::new())?;
    }
    Ok(serde_json::to_string_pretty(&json)?)
}

fn substitute_internals(
    message: &DynamicMessage,
    json: &mut Json,
    internal: &MessageDescriptor,
    include_defaults: bool,
    path: &mut Vec<String>,
) -> Result<()> {
    let Json::Object(obj) = json else {
        return Ok(());
    };
    if text::is_well_known(message.descriptor().full_name()) {
        return Ok(());
    }

    for field in message.descriptor().fields().iter().filter(|f| f.is_singular()) {
        let Some(slot) = obj.get_mut(&field.json_name) else {
            continue;
        };

        path.push(field.name.clone());
        if field.is_bytes() {
            let data = match message.get(field) {
                Some(Value::Bytes(data)) => data.as_slice(),
                _ => &[],
            };
            let decoded = codec::binary::decode(internal, data).map_err(|reason| {
                ProtopadError::InternalDecode {
                    type_name: internal.full_name().to_string(),
                    field: path.join("."),
                    reason,
                }
            })?;
            debug!("Unpacked {} as {}", path.join("."), internal.full_name());
            *slot = text::to_json(&decoded, include_defaults);
        } else if let Some(Value::Message(nested)) = message.get(field) {
            substitute_internals(nested, slot, internal, include_defaults, path)?;
        }
        path.pop();
    }
    Ok(())
}

/// Parse text as `desc`, packing embedded `internal` messages into bytes
pub fn parse_text(
    text: &str,
    desc: &MessageDescriptor,
    internal: Option<&MessageDescriptor>,
) -> Result<DynamicMessage> {
    let mut json: Json =
        serde_json::from_str(text).map_err(|e| ProtopadError::text(desc.full_name(), e))?;

    let Some(internal) = internal else {
        return text::from_json(desc, &json);
    };

    let extracted = extract_internals(&mut json, desc, internal)?;
    let mut message = text::from_json(desc, &json)?;
    reinstate_internals(&mut message, extracted)?;
    Ok(message)
}

/// Remove every embedded message from the text tree, parsed as `internal`
pub fn extract_internals(
    json: &mut Json,
    desc: &MessageDescriptor,
    internal: &MessageDescriptor,
) -> Result<Vec<ExtractedInternal>> {
    let mut extracted = Vec::new();
    collect_internals(json, desc, internal, &mut Vec::new(), &mut extracted)?;
    Ok(extracted)
}

/// Key under which `field` appears in `obj`, if it appears at all
fn present_key(obj: &serde_json::Map<String, Json>, field: &FieldDescriptor) -> Option<String> {
    if obj.contains_key(&field.json_name) {
        return Some(field.json_name.clone());
    }
    obj.keys().find(|key| field.matches_key(key)).cloned()
}

fn collect_internals(
    json: &mut Json,
    desc: &MessageDescriptor,
    internal: &MessageDescriptor,
    path: &mut Vec<String>,
    extracted: &mut Vec<ExtractedInternal>,
) -> Result<()> {
    let Json::Object(obj) = json else {
        return Ok(());
    };
    if text::is_well_known(desc.full_name()) {
        return Ok(());
    }

    for field in desc.fields().iter().filter(|f| f.is_singular()) {
        let Some(key) = present_key(obj, field) else {
            continue;
        };

        path.push(field.name.clone());
        if field.is_bytes() {
            let value = obj.remove(&key).unwrap_or(Json::Null);
            if !value.is_null() {
                if !value.is_object() {
                    return Err(ProtopadError::text(
                        desc.full_name(),
                        format!(
                            "field `{}` must hold a {} object",
                            path.join("."),
                            internal.full_name()
                        ),
                    ));
                }
                let message = text::from_json(internal, &value)?;
                extracted.push(ExtractedInternal {
                    path: FieldPath::new(path.clone()),
                    message,
                });
            }
        } else if field.is_message() {
            if let (Some(nested), Some(child)) = (desc.message_type(field), obj.get_mut(&key)) {
                collect_internals(child, &nested, internal, path, extracted)?;
            }
        }
        path.pop();
    }
    Ok(())
}

/// Serialize each extracted message into the `bytes` field at its path
pub fn reinstate_internals(
    message: &mut DynamicMessage,
    extracted: Vec<ExtractedInternal>,
) -> Result<()> {
    for item in extracted {
        let Some((last, parents)) = item.path.segments().split_last() else {
            continue;
        };

        let mut target = &mut *message;
        for name in parents {
            let field = lookup(target, name, &item.path)?;
            let type_name = target.descriptor().full_name().to_string();
            target = match target.message_mut(&field) {
                Some(nested) => nested,
                None => {
                    return Err(ProtopadError::text(
                        type_name,
                        format!("`{}` is not a message field", name),
                    ))
                }
            };
        }

        let field = lookup(target, last, &item.path)?;
        target.set(&field, Value::Bytes(codec::encode_binary(&item.message)));
    }
    Ok(())
}

fn lookup(message: &DynamicMessage, name: &str, path: &FieldPath) -> Result<FieldDescriptor> {
    message.descriptor().field_by_name(name).cloned().ok_or_else(|| {
        ProtopadError::text(
            message.descriptor().full_name(),
            format!("no field `{}` on the way to `{}`", name, path),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixture_registry;
    use serde_json::json;

    #[test]
    fn test_outer_inner_scenario() {
        let registry = fixture_registry();
        let outer = registry.resolve("Outer").unwrap();
        let inner = registry.resolve("Inner").unwrap();

        let message = parse_text(r#"{"inner": {"number": 5}}"#, &outer, Some(&inner)).unwrap();
        let field = outer.field_by_name("inner").unwrap();
        let data = match message.get(field) {
            Some(Value::Bytes(data)) => data.clone(),
            other => panic!("Expected bytes, got {:?}", other),
        };
        assert_eq!(data, vec![0x08, 0x05]);

        let rendered = render_text(&message, Some(&inner), false).unwrap();
        let json: Json = serde_json::from_str(&rendered).unwrap();
        assert_eq!(json, json!({ "inner": { "number": 5 } }));
    }

    #[test]
    fn test_nested_payloads_keep_position() {
        let registry = fixture_registry();
        let envelope = registry.resolve("Envelope").unwrap();
        let inner = registry.resolve("Inner").unwrap();

        let text = r#"{
            "id": "e",
            "header": { "timestamp": "7", "body": { "text": "deep" } },
            "payload": { "number": 1 },
            "history": [{ "body": "AQI=" }]
        }"#;
        let message = parse_text(text, &envelope, Some(&inner)).unwrap();

        let rendered = render_text(&message, Some(&inner), false).unwrap();
        let json: Json = serde_json::from_str(&rendered).unwrap();
        assert_eq!(json["header"]["body"], json!({ "text": "deep" }));
        assert_eq!(json["payload"], json!({ "number": 1 }));
        // repeated fields keep plain base64
        assert_eq!(json["history"][0]["body"], json!("AQI="));

        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["id", "header", "payload", "history"]);
    }

    #[test]
    fn test_defaults_render_empty_internal() {
        let registry = fixture_registry();
        let outer = registry.resolve("Outer").unwrap();
        let inner = registry.resolve("Inner").unwrap();

        let message = DynamicMessage::new(outer.clone());
        let rendered = render_text(&message, Some(&inner), true).unwrap();
        let json: Json = serde_json::from_str(&rendered).unwrap();
        assert_eq!(json, json!({ "inner": { "number": 0, "text": "" } }));

        let parsed = parse_text(&rendered, &outer, Some(&inner)).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_invalid_internal_bytes() {
        let registry = fixture_registry();
        let outer = registry.resolve("Outer").unwrap();
        let inner = registry.resolve("Inner").unwrap();

        let message = parse_text(r#"{"inner": "CgX/"}"#, &outer, None).unwrap();
        match render_text(&message, Some(&inner), false) {
            Err(ProtopadError::InternalDecode { type_name, field, .. }) => {
                assert_eq!(type_name, "testdata.Inner");
                assert_eq!(field, "inner");
            }
            other => panic!("Expected InternalDecode, got {:?}", other),
        }
    }

    #[test]
    fn test_non_object_payload_rejected() {
        let registry = fixture_registry();
        let outer = registry.resolve("Outer").unwrap();
        let inner = registry.resolve("Inner").unwrap();

        let err = parse_text(r#"{"inner": "CAU="}"#, &outer, Some(&inner)).unwrap_err();
        assert!(matches!(err, ProtopadError::TextSyntax { .. }));
        assert!(err.to_string().contains("inner"));
    }

    #[test]
    fn test_extract_and_reinstate() {
        let registry = fixture_registry();
        let envelope = registry.resolve("Envelope").unwrap();
        let inner = registry.resolve("Inner").unwrap();

        let mut json = json!({ "header": { "route": { "name": "r" }, "body": { "number": 3 } } });
        let extracted = extract_internals(&mut json, &envelope, &inner).unwrap();
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].path.to_string(), "header.body");
        assert_eq!(json, json!({ "header": { "route": { "name": "r" } } }));

        let mut message = text::from_json(&envelope, &json).unwrap();
        reinstate_internals(&mut message, extracted).unwrap();
        let header = match message.get_by_name("header") {
            Some(Value::Message(header)) => header,
            other => panic!("Expected header, got {:?}", other),
        };
        assert_eq!(header.get_by_name("body"), Some(&Value::Bytes(vec![0x08, 0x03])));
    }

    #[test]
    fn test_well_known_types_left_alone() {
        let registry = fixture_registry();
        let event = registry.resolve("Event").unwrap();
        let inner = registry.resolve("Inner").unwrap();

        let text = r#"{
  "detail": {
    "@type": "type.googleapis.com/google.protobuf.Duration",
    "value": "3s"
  }
}"#;
        let message = parse_text(text, &event, Some(&inner)).unwrap();
        let rendered = render_text(&message, Some(&inner), false).unwrap();
        assert_eq!(
            serde_json::from_str::<Json>(&rendered).unwrap(),
            serde_json::from_str::<Json>(text).unwrap()
        );
    }
}
