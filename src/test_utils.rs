//! Test utilities for building schemas in memory.
//!
//! Provides small builders for `prost_types` descriptors plus a set of
//! fixture modules, so tests can exercise the registry and the codecs
//! without invoking `protoc`.

use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FieldOptions, FileDescriptorProto, FileDescriptorSet, MessageOptions, OneofDescriptorProto,
};

use crate::registry::{SchemaModule, SchemaRegistry, StaticModule};

/// A proto3 file
pub fn file(name: &str, package: &str, messages: Vec<DescriptorProto>) -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(name.to_string()),
        package: Some(package.to_string()),
        message_type: messages,
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

pub fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: fields,
        ..Default::default()
    }
}

/// Singular field of a scalar or `bytes` type
pub fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        ..Default::default()
    }
}

/// Singular message field; `type_name` is fully qualified with a leading dot
pub fn message_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(type_name.to_string()),
        ..field(name, number, Type::Message)
    }
}

pub fn enum_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(type_name.to_string()),
        ..field(name, number, Type::Enum)
    }
}

pub fn repeated(mut field: FieldDescriptorProto) -> FieldDescriptorProto {
    field.label = Some(Label::Repeated as i32);
    field
}

pub fn unpacked(mut field: FieldDescriptorProto) -> FieldDescriptorProto {
    field.options = Some(FieldOptions {
        packed: Some(false),
        ..Default::default()
    });
    field
}

/// Field with an explicit `json_name` option
pub fn json_named(mut field: FieldDescriptorProto, json_name: &str) -> FieldDescriptorProto {
    field.json_name = Some(json_name.to_string());
    field
}

pub fn in_oneof(mut field: FieldDescriptorProto, oneof_index: i32) -> FieldDescriptorProto {
    field.oneof_index = Some(oneof_index);
    field
}

/// proto3 `optional` field; `oneof_index` points at its synthetic oneof
pub fn proto3_optional(mut field: FieldDescriptorProto, oneof_index: i32) -> FieldDescriptorProto {
    field.proto3_optional = Some(true);
    field.oneof_index = Some(oneof_index);
    field
}

/// Map entry type as generated for `map<K, V> name`
pub fn map_entry(
    name: &str,
    key: FieldDescriptorProto,
    value: FieldDescriptorProto,
) -> DescriptorProto {
    DescriptorProto {
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..message(name, vec![key, value])
    }
}

pub fn enumeration(name: &str, values: &[(&str, i32)]) -> EnumDescriptorProto {
    EnumDescriptorProto {
        name: Some(name.to_string()),
        value: values
            .iter()
            .map(|(value, number)| EnumValueDescriptorProto {
                name: Some(value.to_string()),
                number: Some(*number),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

/// Builder-style additions to [`FileDescriptorProto`]
pub trait FileExt {
    fn with_dependency(self, name: &str) -> Self;
    fn with_enum(self, enum_type: EnumDescriptorProto) -> Self;
    fn proto2(self) -> Self;
}

impl FileExt for FileDescriptorProto {
    fn with_dependency(mut self, name: &str) -> Self {
        self.dependency.push(name.to_string());
        self
    }

    fn with_enum(mut self, enum_type: EnumDescriptorProto) -> Self {
        self.enum_type.push(enum_type);
        self
    }

    fn proto2(mut self) -> Self {
        self.syntax = Some("proto2".to_string());
        self
    }
}

/// Builder-style additions to [`DescriptorProto`]
pub trait MessageExt {
    fn nested(self, message: DescriptorProto) -> Self;
    fn with_oneof(self, name: &str) -> Self;
}

impl MessageExt for DescriptorProto {
    fn nested(mut self, message: DescriptorProto) -> Self {
        self.nested_type.push(message);
        self
    }

    fn with_oneof(mut self, name: &str) -> Self {
        self.oneof_decl.push(OneofDescriptorProto {
            name: Some(name.to_string()),
            ..Default::default()
        });
        self
    }
}

/// Wrap files in a module that serves them from memory
pub fn module(label: &str, files: Vec<FileDescriptorProto>) -> Box<dyn SchemaModule> {
    Box::new(StaticModule::new(label, FileDescriptorSet { file: files }))
}

/// The `testdata` fixture file.
///
/// ```text
/// TestMessage { string text = 1; }
/// Inner       { int32 number = 1; string text = 2; }
/// Outer       { bytes inner = 1; }
/// Envelope    { string id = 1; Header header = 2; bytes payload = 3;
///               repeated Header history = 4; map<string, int64> counters = 5;
///               Kind kind = 6; }
/// Header      { int64 timestamp = 1; bytes body = 2; Route route = 3; }
/// Route       { repeated uint32 hops = 1; string name = 2; }
/// Tree        { string label = 1; repeated Tree children = 2; Tree parent = 3; }
/// Choice      { oneof pick { string word = 1; int32 digit = 2; } }
/// enum Kind   { KIND_UNSPECIFIED = 0; KIND_EVENT = 1; KIND_COMMAND = 2; }
/// ```
pub fn testdata_file() -> FileDescriptorProto {
    file(
        "testdata.proto",
        "testdata",
        vec![
            message("TestMessage", vec![field("text", 1, Type::String)]),
            message(
                "Inner",
                vec![field("number", 1, Type::Int32), field("text", 2, Type::String)],
            ),
            message("Outer", vec![field("inner", 1, Type::Bytes)]),
            message(
                "Envelope",
                vec![
                    field("id", 1, Type::String),
                    message_field("header", 2, ".testdata.Header"),
                    field("payload", 3, Type::Bytes),
                    repeated(message_field("history", 4, ".testdata.Header")),
                    repeated(message_field("counters", 5, ".testdata.Envelope.CountersEntry")),
                    enum_field("kind", 6, ".testdata.Kind"),
                ],
            )
            .nested(map_entry(
                "CountersEntry",
                field("key", 1, Type::String),
                field("value", 2, Type::Int64),
            )),
            message(
                "Header",
                vec![
                    field("timestamp", 1, Type::Int64),
                    field("body", 2, Type::Bytes),
                    message_field("route", 3, ".testdata.Route"),
                ],
            ),
            message(
                "Route",
                vec![repeated(field("hops", 1, Type::Uint32)), field("name", 2, Type::String)],
            ),
            message(
                "Tree",
                vec![
                    field("label", 1, Type::String),
                    repeated(message_field("children", 2, ".testdata.Tree")),
                    message_field("parent", 3, ".testdata.Tree"),
                ],
            ),
            message(
                "Choice",
                vec![
                    in_oneof(field("word", 1, Type::String), 0),
                    in_oneof(field("digit", 2, Type::Int32), 0),
                ],
            )
            .with_oneof("pick"),
        ],
    )
    .with_enum(enumeration(
        "Kind",
        &[("KIND_UNSPECIFIED", 0), ("KIND_EVENT", 1), ("KIND_COMMAND", 2)],
    ))
}

/// A message with one field of every scalar type, plus repeated variants
pub fn scalars_file() -> FileDescriptorProto {
    file(
        "scalars.proto",
        "scalars",
        vec![message(
            "Scalars",
            vec![
                field("f_double", 1, Type::Double),
                field("f_float", 2, Type::Float),
                field("f_int32", 3, Type::Int32),
                field("f_int64", 4, Type::Int64),
                field("f_uint32", 5, Type::Uint32),
                field("f_uint64", 6, Type::Uint64),
                field("f_sint32", 7, Type::Sint32),
                field("f_sint64", 8, Type::Sint64),
                field("f_fixed32", 9, Type::Fixed32),
                field("f_fixed64", 10, Type::Fixed64),
                field("f_sfixed32", 11, Type::Sfixed32),
                field("f_sfixed64", 12, Type::Sfixed64),
                field("f_bool", 13, Type::Bool),
                field("f_string", 14, Type::String),
                field("f_bytes", 15, Type::Bytes),
                repeated(field("r_int32", 16, Type::Int32)),
                unpacked(repeated(field("r_sint64", 17, Type::Sint64))),
                repeated(field("r_string", 18, Type::String)),
                repeated(field("r_double", 19, Type::Double)),
            ],
        )],
    )
}

/// Fields with explicit presence in both syntaxes.
///
/// ```text
/// // proto2
/// Legacy   { optional int32 count = 1; optional string label = 2;
///            repeated int32 values = 3; }
/// // proto3
/// Presence { optional int32 level = 1; string name = 2;
///            optional string note = 3; }
/// ```
pub fn presence_files() -> Vec<FileDescriptorProto> {
    vec![
        file(
            "legacy.proto",
            "legacy",
            vec![message(
                "Legacy",
                vec![
                    field("count", 1, Type::Int32),
                    field("label", 2, Type::String),
                    repeated(field("values", 3, Type::Int32)),
                ],
            )],
        )
        .proto2(),
        file(
            "presence.proto",
            "presence",
            vec![message(
                "Presence",
                vec![
                    proto3_optional(field("level", 1, Type::Int32), 0),
                    field("name", 2, Type::String),
                    proto3_optional(field("note", 3, Type::String), 1),
                ],
            )
            .with_oneof("_level")
            .with_oneof("_note")],
        ),
    ]
}

/// Two modules that both define `Widget`
pub fn widget_files() -> Vec<FileDescriptorProto> {
    vec![
        file(
            "pkgA/widget.proto",
            "pkgA",
            vec![message("Widget", vec![field("size", 1, Type::Int32)])],
        ),
        file(
            "pkgB/widget.proto",
            "pkgB",
            vec![message("Widget", vec![field("color", 1, Type::String)])],
        ),
    ]
}

/// The `google.protobuf` well-known types, as `protoc --include_imports`
/// emits them, plus a message using each of them.
///
/// ```text
/// Event { Timestamp at = 1; Duration elapsed = 2; Int64Value count = 3;
///         StringValue note = 4; FieldMask mask = 5; Struct attributes = 6;
///         Value extra = 7; Any detail = 8; repeated Value items = 9;
///         BoolValue flag = 10; }
/// ```
pub fn wkt_files() -> Vec<FileDescriptorProto> {
    let seconds_nanos = |name: &str| {
        message(
            name,
            vec![field("seconds", 1, Type::Int64), field("nanos", 2, Type::Int32)],
        )
    };
    let wrapper = |name: &str, ty: Type| message(name, vec![field("value", 1, ty)]);
    let google = |name: &str, messages: Vec<DescriptorProto>| {
        file(&format!("google/protobuf/{}.proto", name), "google.protobuf", messages)
    };

    vec![
        google("timestamp", vec![seconds_nanos("Timestamp")]),
        google("duration", vec![seconds_nanos("Duration")]),
        google(
            "wrappers",
            vec![
                wrapper("DoubleValue", Type::Double),
                wrapper("FloatValue", Type::Float),
                wrapper("Int64Value", Type::Int64),
                wrapper("UInt64Value", Type::Uint64),
                wrapper("Int32Value", Type::Int32),
                wrapper("UInt32Value", Type::Uint32),
                wrapper("BoolValue", Type::Bool),
                wrapper("StringValue", Type::String),
                wrapper("BytesValue", Type::Bytes),
            ],
        ),
        google(
            "field_mask",
            vec![message("FieldMask", vec![repeated(field("paths", 1, Type::String))])],
        ),
        google(
            "struct",
            vec![
                message(
                    "Struct",
                    vec![repeated(message_field(
                        "fields",
                        1,
                        ".google.protobuf.Struct.FieldsEntry",
                    ))],
                )
                .nested(map_entry(
                    "FieldsEntry",
                    field("key", 1, Type::String),
                    message_field("value", 2, ".google.protobuf.Value"),
                )),
                message(
                    "Value",
                    vec![
                        in_oneof(enum_field("null_value", 1, ".google.protobuf.NullValue"), 0),
                        in_oneof(field("number_value", 2, Type::Double), 0),
                        in_oneof(field("string_value", 3, Type::String), 0),
                        in_oneof(field("bool_value", 4, Type::Bool), 0),
                        in_oneof(message_field("struct_value", 5, ".google.protobuf.Struct"), 0),
                        in_oneof(message_field("list_value", 6, ".google.protobuf.ListValue"), 0),
                    ],
                )
                .with_oneof("kind"),
                message(
                    "ListValue",
                    vec![repeated(message_field("values", 1, ".google.protobuf.Value"))],
                ),
            ],
        )
        .with_enum(enumeration("NullValue", &[("NULL_VALUE", 0)])),
        google(
            "any",
            vec![message(
                "Any",
                vec![field("type_url", 1, Type::String), field("value", 2, Type::Bytes)],
            )],
        ),
        file(
            "events.proto",
            "events",
            vec![message(
                "Event",
                vec![
                    message_field("at", 1, ".google.protobuf.Timestamp"),
                    message_field("elapsed", 2, ".google.protobuf.Duration"),
                    message_field("count", 3, ".google.protobuf.Int64Value"),
                    message_field("note", 4, ".google.protobuf.StringValue"),
                    message_field("mask", 5, ".google.protobuf.FieldMask"),
                    message_field("attributes", 6, ".google.protobuf.Struct"),
                    message_field("extra", 7, ".google.protobuf.Value"),
                    message_field("detail", 8, ".google.protobuf.Any"),
                    repeated(message_field("items", 9, ".google.protobuf.Value")),
                    message_field("flag", 10, ".google.protobuf.BoolValue"),
                ],
            )],
        )
        .with_dependency("google/protobuf/timestamp.proto")
        .with_dependency("google/protobuf/duration.proto")
        .with_dependency("google/protobuf/wrappers.proto")
        .with_dependency("google/protobuf/field_mask.proto")
        .with_dependency("google/protobuf/struct.proto")
        .with_dependency("google/protobuf/any.proto"),
    ]
}

/// Registry holding every fixture file
pub fn fixture_registry() -> SchemaRegistry {
    SchemaRegistry::from_modules(&[
        module("testdata", vec![testdata_file()]),
        module("scalars", vec![scalars_file()]),
        module("widgets", widget_files()),
        module("presence", presence_files()),
        module("events", wkt_files()),
    ])
}
