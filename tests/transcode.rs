//! End-to-end transcoding tests
//!
//! Exercises the public API the CLI is built on: registry loading from a
//! compiled directory, auto-detection, nested payloads and templates.

use std::fs;

use prost::Message;
use prost_types::FileDescriptorSet;
use serde_json::{json, Value as Json};
use tempfile::tempdir;

use protopad::test_utils::{fixture_registry, scalars_file, testdata_file, widget_files};
use protopad::{
    build_template, decode_binary, encode_binary, encode_text, parse_any, parse_text,
    render_text, ProtopadError, SchemaRegistry, Value,
};

fn to_json(text: &str) -> Json {
    serde_json::from_str(text).unwrap()
}

// =============================================================================
// Registry
// =============================================================================

#[test]
fn test_registry_from_compiled_dir() {
    let dir = tempdir().unwrap();
    let write = |name: &str, files| {
        let path = dir.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, FileDescriptorSet { file: files }.encode_to_vec()).unwrap();
    };
    write("testdata.pb", vec![testdata_file()]);
    write("scalars.pb", vec![scalars_file()]);
    write("pkg/widgets.pb", widget_files());

    let registry = SchemaRegistry::load(dir.path());
    let mut names: Vec<String> = registry
        .message_types()
        .iter()
        .map(|d| d.qualified_name())
        .collect();
    names.sort();
    assert!(names.contains(&"testdata.Envelope".to_string()));
    assert!(names.contains(&"pkgA.widget.Widget".to_string()));

    match registry.resolve("Widget") {
        Err(e @ ProtopadError::TypeAmbiguous { .. }) => {
            let message = e.to_string();
            assert!(message.contains("- pkgA.widget.Widget"));
            assert!(message.contains("- pkgB.widget.Widget"));
        }
        other => panic!("Expected TypeAmbiguous, got {:?}", other),
    }
    assert_eq!(registry.resolve("pkgA.Widget").unwrap().full_name(), "pkgA.Widget");
}

#[test]
fn test_empty_compiled_dir() {
    let dir = tempdir().unwrap();
    let registry = SchemaRegistry::load(dir.path());
    assert!(matches!(registry.resolve("Outer"), Err(ProtopadError::NoSchemas)));
}

// =============================================================================
// Round Trips
// =============================================================================

#[test]
fn test_binary_round_trip_all_scalars() {
    let desc = fixture_registry().resolve("Scalars").unwrap();
    let message = parse_text(
        r#"{
            "fDouble": -2.5, "fFloat": 1.5, "fInt32": -7, "fInt64": "-9000000000",
            "fUint32": 7, "fUint64": "18446744073709551615", "fSint32": -1,
            "fSint64": "-2", "fFixed32": 3, "fFixed64": "4", "fSfixed32": -5,
            "fSfixed64": "-6", "fBool": true, "fString": "snow ☃", "fBytes": "AP8=",
            "rInt32": [1, -1, 300], "rSint64": ["-3", "3"], "rString": ["", "b"],
            "rDouble": ["Infinity", 0.25]
        }"#,
        &desc,
        None,
    )
    .unwrap();

    let decoded = decode_binary(&encode_binary(&message), &desc).unwrap();
    assert_eq!(decoded, message);

    let text = encode_text(&message, true).unwrap();
    assert_eq!(parse_text(&text, &desc, None).unwrap(), message);
    assert_eq!(to_json(&text)["fUint64"], json!("18446744073709551615"));
    assert_eq!(to_json(&text)["rDouble"], json!(["Infinity", 0.25]));
}

#[test]
fn test_unknown_fields_survive_binary_passthrough() {
    let desc = fixture_registry().resolve("Inner").unwrap();
    // number = 5, then field 9 (varint 1) unknown to Inner
    let raw = vec![0x08, 0x05, 0x48, 0x01];
    let message = parse_any(&raw, &desc, None).unwrap();
    assert_eq!(encode_binary(&message), raw);
}

// =============================================================================
// Nested Payloads
// =============================================================================

#[test]
fn test_outer_inner_scenario() {
    let registry = fixture_registry();
    let outer = registry.resolve("Outer").unwrap();
    let inner = registry.resolve("Inner").unwrap();

    let message = parse_any(br#"{"inner": {"number": 5}}"#, &outer, Some(&inner)).unwrap();
    let binary = encode_binary(&message);

    let decoded = decode_binary(&binary, &outer).unwrap();
    let payload = match decoded.get_by_name("inner") {
        Some(Value::Bytes(data)) => data.clone(),
        other => panic!("Expected bytes, got {:?}", other),
    };
    let inner_message = decode_binary(&payload, &inner).unwrap();
    assert_eq!(inner_message.get_by_name("number"), Some(&Value::I32(5)));
}

#[test]
fn test_opaque_round_trip_is_byte_exact() {
    let registry = fixture_registry();
    let envelope = registry.resolve("Envelope").unwrap();
    let inner = registry.resolve("Inner").unwrap();

    let original = encode_binary(
        &parse_text(
            r#"{
                "id": "abc",
                "header": { "timestamp": "12", "body": { "number": 9, "text": "x" } },
                "payload": { "text": "top" },
                "kind": "KIND_COMMAND"
            }"#,
            &envelope,
            Some(&inner),
        )
        .unwrap(),
    );

    // binary in, binary out
    let message = parse_any(&original, &envelope, Some(&inner)).unwrap();
    assert_eq!(encode_binary(&message), original);

    // binary -> text -> binary
    let text = render_text(&message, Some(&inner), false).unwrap();
    assert_eq!(to_json(&text)["payload"], json!({ "text": "top" }));
    let reparsed = parse_any(text.as_bytes(), &envelope, Some(&inner)).unwrap();
    assert_eq!(encode_binary(&reparsed), original);
}

#[test]
fn test_editing_flow_with_defaults() {
    let registry = fixture_registry();
    let envelope = registry.resolve("Envelope").unwrap();
    let inner = registry.resolve("Inner").unwrap();

    let template = build_template(&envelope, false);
    let text = render_text(&template, Some(&inner), true).unwrap();
    let json = to_json(&text);
    assert_eq!(json["payload"], json!({ "number": 0, "text": "" }));
    assert_eq!(json["header"]["body"], json!({ "number": 0, "text": "" }));
    // repeated fields are left alone
    assert_eq!(json["history"][0]["body"], json!(""));

    let edited = text.replacen("\"number\": 0", "\"number\": 42", 1);
    let message = parse_text(&edited, &envelope, Some(&inner)).unwrap();
    let round = to_json(&render_text(&message, Some(&inner), false).unwrap());
    assert_eq!(round["header"]["body"], json!({ "number": 42 }));
}

// =============================================================================
// Auto-Detection
// =============================================================================

#[test]
fn test_text_errors_fall_back_to_binary_error() {
    let registry = fixture_registry();
    let outer = registry.resolve("Outer").unwrap();
    let inner = registry.resolve("Inner").unwrap();

    // Valid JSON, but the payload is not an object: text fails, then binary fails
    match parse_any(br#"{"inner": 5}"#, &outer, Some(&inner)) {
        Err(ProtopadError::BinaryDecode { type_name, .. }) => assert_eq!(type_name, "testdata.Outer"),
        other => panic!("Expected BinaryDecode, got {:?}", other),
    }
}

#[test]
fn test_template_determinism() {
    let desc = fixture_registry().resolve("Envelope").unwrap();
    let empty = encode_text(&build_template(&desc, true), true).unwrap();
    let full = encode_text(&build_template(&desc, false), true).unwrap();

    assert_eq!(empty, encode_text(&build_template(&desc, true), true).unwrap());
    assert_eq!(full, encode_text(&build_template(&desc, false), true).unwrap());
    assert!(to_json(&empty).get("header").is_none());
    assert_eq!(to_json(&full)["counters"], json!({}));
}
