//! Schema descriptors
//!
//! A [`SchemaPool`] is built once from the `FileDescriptorProto`s of every
//! loaded module and is immutable afterwards. [`MessageDescriptor`] and
//! [`EnumDescriptor`] are cheap handles into the shared pool; field
//! references to other message types are indices into the same pool, so
//! recursive schemas need no ownership cycles.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, EnumDescriptorProto, FileDescriptorProto};

use crate::error::ProtopadError;
use crate::names::json_name;

/// Scalar field types (everything that is neither an enum, a message nor `bytes`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
}

impl ScalarType {
    /// Whether repeated fields of this type may use the packed encoding
    pub fn is_packable(self) -> bool {
        !matches!(self, ScalarType::String)
    }
}

/// Declared kind of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarType),
    /// Index of the enum in the pool
    Enum(usize),
    /// Index of the message in the pool (the entry type for map fields)
    Message(usize),
    /// Opaque byte blob
    Bytes,
}

/// Cardinality of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Singular,
    Repeated,
    Map,
}

/// A single field of a message type
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Declared (snake_case) name
    pub name: String,
    /// Name used in the text form: the descriptor's `json_name` when set,
    /// otherwise derived from `name`
    pub json_name: String,
    /// Field number on the wire
    pub number: u32,
    pub kind: FieldKind,
    pub cardinality: Cardinality,
    /// Explicit presence: set-to-default is distinguishable from unset
    pub has_presence: bool,
    /// Repeated scalars written with the packed encoding
    pub packed: bool,
    /// Index of the containing oneof, if any
    pub oneof: Option<u32>,
}

impl FieldDescriptor {
    pub fn is_singular(&self) -> bool {
        self.cardinality == Cardinality::Singular
    }

    pub fn is_list(&self) -> bool {
        self.cardinality == Cardinality::Repeated
    }

    pub fn is_map(&self) -> bool {
        self.cardinality == Cardinality::Map
    }

    pub fn is_message(&self) -> bool {
        matches!(self.kind, FieldKind::Message(_))
    }

    pub fn is_bytes(&self) -> bool {
        self.kind == FieldKind::Bytes
    }

    /// Whether a text-form key refers to this field.
    ///
    /// Accepts the text name, the declared name and the camelCase name
    /// derived from it, which differ when the schema sets `json_name`.
    pub fn matches_key(&self, key: &str) -> bool {
        self.json_name == key || self.name == key || json_name(&self.name) == key
    }
}

#[derive(Debug)]
struct ModuleData {
    name: String,
    messages: Vec<usize>,
}

#[derive(Debug)]
struct MessageData {
    name: String,
    full_name: String,
    module: usize,
    fields: Vec<FieldDescriptor>,
}

#[derive(Debug)]
struct EnumData {
    name: String,
    full_name: String,
    values: Vec<(String, i32)>,
}

/// All message and enum types of the loaded modules
#[derive(Debug, Default)]
pub struct SchemaPool {
    modules: Vec<ModuleData>,
    messages: Vec<MessageData>,
    enums: Vec<EnumData>,
}

/// Module identity for a `.proto` file: `pkgA/widget.proto` -> `pkgA.widget`
pub fn module_name(file_name: &str) -> String {
    file_name
        .strip_suffix(".proto")
        .unwrap_or(file_name)
        .replace(['/', '\\'], ".")
}

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Depth-first list of (full name, message) for a file, parents before children
fn flatten_messages<'a>(
    prefix: &str,
    messages: &'a [DescriptorProto],
    out: &mut Vec<(String, &'a DescriptorProto)>,
) {
    for message in messages {
        let full_name = qualify(prefix, message.name());
        out.push((full_name.clone(), message));
        flatten_messages(&full_name, &message.nested_type, out);
    }
}

fn flatten_enums<'a>(file: &'a FileDescriptorProto) -> Vec<(String, &'a EnumDescriptorProto)> {
    let mut out: Vec<(String, &EnumDescriptorProto)> = file
        .enum_type
        .iter()
        .map(|e| (qualify(file.package(), e.name()), e))
        .collect();
    let mut messages = Vec::new();
    flatten_messages(file.package(), &file.message_type, &mut messages);
    for (parent, message) in messages {
        out.extend(message.enum_type.iter().map(|e| (qualify(&parent, e.name()), e)));
    }
    out
}

fn is_proto3(file: &FileDescriptorProto) -> bool {
    file.syntax() == "proto3"
}

fn scalar_kind(ty: Type) -> Option<FieldKind> {
    let scalar = match ty {
        Type::Double => ScalarType::Double,
        Type::Float => ScalarType::Float,
        Type::Int32 => ScalarType::Int32,
        Type::Int64 => ScalarType::Int64,
        Type::Uint32 => ScalarType::Uint32,
        Type::Uint64 => ScalarType::Uint64,
        Type::Sint32 => ScalarType::Sint32,
        Type::Sint64 => ScalarType::Sint64,
        Type::Fixed32 => ScalarType::Fixed32,
        Type::Fixed64 => ScalarType::Fixed64,
        Type::Sfixed32 => ScalarType::Sfixed32,
        Type::Sfixed64 => ScalarType::Sfixed64,
        Type::Bool => ScalarType::Bool,
        Type::String => ScalarType::String,
        Type::Bytes => return Some(FieldKind::Bytes),
        Type::Group | Type::Message | Type::Enum => return None,
    };
    Some(FieldKind::Scalar(scalar))
}

impl SchemaPool {
    /// Build a pool from file descriptors.
    ///
    /// Files are deduplicated by name (first occurrence wins). A file that
    /// cannot be represented, or that depends on such a file, is left out and
    /// reported as a [`ProtopadError::SchemaLoad`]; the remaining files still
    /// make it into the pool.
    pub fn build(files: Vec<FileDescriptorProto>) -> (Self, Vec<ProtopadError>) {
        let mut seen = HashSet::new();
        let files: Vec<FileDescriptorProto> = files
            .into_iter()
            .filter(|f| seen.insert(f.name().to_string()))
            .collect();

        // Defining file of every message and enum type
        let mut types: HashMap<String, usize> = HashMap::new();
        for (file_idx, file) in files.iter().enumerate() {
            let mut messages = Vec::new();
            flatten_messages(file.package(), &file.message_type, &mut messages);
            for (full_name, _) in messages {
                types.insert(full_name, file_idx);
            }
            for (full_name, _) in flatten_enums(file) {
                types.insert(full_name, file_idx);
            }
        }

        // Per-file validation, then propagate failures to dependents
        let mut failures: HashMap<usize, String> = HashMap::new();
        let mut depends_on: Vec<HashSet<usize>> = vec![HashSet::new(); files.len()];
        for (file_idx, file) in files.iter().enumerate() {
            if let Err(reason) = Self::check_file(file, &types, &mut depends_on[file_idx]) {
                failures.insert(file_idx, reason);
            }
        }
        loop {
            let newly_failed: Vec<(usize, String)> = (0..files.len())
                .filter(|idx| !failures.contains_key(idx))
                .filter_map(|idx| {
                    depends_on[idx]
                        .iter()
                        .find(|dep| failures.contains_key(*dep))
                        .map(|dep| (idx, format!("depends on unusable file {}", files[*dep].name())))
                })
                .collect();
            if newly_failed.is_empty() {
                break;
            }
            failures.extend(newly_failed);
        }

        let errors = {
            let mut failed: Vec<_> = failures.iter().collect();
            failed.sort_by_key(|(idx, _)| **idx);
            failed
                .into_iter()
                .map(|(idx, reason)| ProtopadError::SchemaLoad {
                    module: module_name(files[*idx].name()),
                    reason: reason.clone(),
                })
                .collect()
        };

        let usable: Vec<&FileDescriptorProto> = files
            .iter()
            .enumerate()
            .filter(|(idx, _)| !failures.contains_key(idx))
            .map(|(_, f)| f)
            .collect();

        (Self::assemble(&usable), errors)
    }

    fn check_file(
        file: &FileDescriptorProto,
        types: &HashMap<String, usize>,
        deps: &mut HashSet<usize>,
    ) -> Result<(), String> {
        match file.syntax() {
            "" | "proto2" | "proto3" => {}
            other => return Err(format!("unsupported syntax '{}'", other)),
        }
        let mut messages = Vec::new();
        flatten_messages(file.package(), &file.message_type, &mut messages);
        for (full_name, message) in messages {
            for field in &message.field {
                match field.r#type() {
                    Type::Group => {
                        return Err(format!(
                            "group field {}.{} is not supported",
                            full_name,
                            field.name()
                        ))
                    }
                    Type::Message | Type::Enum => {
                        let target = field.type_name().trim_start_matches('.');
                        let found = types
                            .get(target)
                            .ok_or_else(|| format!("unresolved type '{}' in {}", target, full_name))?;
                        deps.insert(*found);
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn assemble(files: &[&FileDescriptorProto]) -> Self {
        let mut pool = SchemaPool::default();
        let mut message_index: HashMap<String, usize> = HashMap::new();
        let mut enum_index: HashMap<String, usize> = HashMap::new();
        let mut map_entries: HashSet<usize> = HashSet::new();
        let mut pending: Vec<(usize, &FileDescriptorProto, &DescriptorProto)> = Vec::new();

        for &file in files {
            let module = pool.modules.len();
            let mut module_data = ModuleData {
                name: module_name(file.name()),
                messages: Vec::new(),
            };

            let mut messages = Vec::new();
            flatten_messages(file.package(), &file.message_type, &mut messages);
            for (full_name, message) in messages {
                let index = pool.messages.len();
                if file.message_type.iter().any(|m| std::ptr::eq(m, message)) {
                    module_data.messages.push(index);
                }
                if message.options.as_ref().map(|o| o.map_entry()).unwrap_or(false) {
                    map_entries.insert(index);
                }
                message_index.insert(full_name.clone(), index);
                pool.messages.push(MessageData {
                    name: message.name().to_string(),
                    full_name,
                    module,
                    fields: Vec::new(),
                });
                pending.push((index, file, message));
            }

            for (full_name, enum_proto) in flatten_enums(file) {
                enum_index.insert(full_name.clone(), pool.enums.len());
                pool.enums.push(EnumData {
                    name: enum_proto.name().to_string(),
                    full_name,
                    values: enum_proto
                        .value
                        .iter()
                        .map(|v| (v.name().to_string(), v.number()))
                        .collect(),
                });
            }

            pool.modules.push(module_data);
        }

        for (index, file, message) in pending {
            let proto3 = is_proto3(file);
            let mut fields: Vec<FieldDescriptor> = message
                .field
                .iter()
                .filter_map(|field| {
                    let target = field.type_name().trim_start_matches('.');
                    let kind = match field.r#type() {
                        Type::Message => FieldKind::Message(*message_index.get(target)?),
                        Type::Enum => FieldKind::Enum(*enum_index.get(target)?),
                        other => scalar_kind(other)?,
                    };
                    let repeated = field.label() == Label::Repeated;
                    let cardinality = match kind {
                        FieldKind::Message(target) if repeated && map_entries.contains(&target) => {
                            Cardinality::Map
                        }
                        _ if repeated => Cardinality::Repeated,
                        _ => Cardinality::Singular,
                    };
                    let has_presence = cardinality == Cardinality::Singular
                        && (matches!(kind, FieldKind::Message(_))
                            || !proto3
                            || field.proto3_optional()
                            || field.oneof_index.is_some());
                    let packable = match kind {
                        FieldKind::Scalar(scalar) => scalar.is_packable(),
                        FieldKind::Enum(_) => true,
                        _ => false,
                    };
                    let packed = cardinality == Cardinality::Repeated
                        && packable
                        && field
                            .options
                            .as_ref()
                            .and_then(|o| o.packed)
                            .unwrap_or(proto3);
                    Some(FieldDescriptor {
                        name: field.name().to_string(),
                        json_name: field
                            .json_name
                            .clone()
                            .filter(|name| !name.is_empty())
                            .unwrap_or_else(|| json_name(field.name())),
                        number: field.number() as u32,
                        kind,
                        cardinality,
                        has_presence,
                        packed,
                        oneof: field.oneof_index.map(|i| i as u32),
                    })
                })
                .collect();
            fields.sort_by_key(|f| f.number);
            pool.messages[index].fields = fields;
        }

        pool
    }

    /// Module names in load order
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(|m| m.name.as_str())
    }

    /// Whether no message types were loaded at all
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Every top-level message type of the pool, in module order
pub fn top_level_messages(pool: &Arc<SchemaPool>) -> Vec<MessageDescriptor> {
    pool.modules
        .iter()
        .flat_map(|m| m.messages.iter())
        .map(|&index| MessageDescriptor {
            pool: Arc::clone(pool),
            index,
        })
        .collect()
}

/// Handle to a message type in a [`SchemaPool`]
#[derive(Clone)]
pub struct MessageDescriptor {
    pool: Arc<SchemaPool>,
    index: usize,
}

impl MessageDescriptor {
    fn data(&self) -> &MessageData {
        &self.pool.messages[self.index]
    }

    /// Simple type name (e.g. `Widget`)
    pub fn name(&self) -> &str {
        &self.data().name
    }

    /// Fully-qualified type name (e.g. `acme.widgets.Widget`)
    pub fn full_name(&self) -> &str {
        &self.data().full_name
    }

    /// Name of the module that defines this type
    pub fn module_name(&self) -> &str {
        &self.pool.modules[self.data().module].name
    }

    /// `<module>.<TypeName>`, the form listed in ambiguity errors
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.module_name(), self.name())
    }

    /// Fields ordered by field number
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.data().fields
    }

    pub fn field_by_number(&self, number: u32) -> Option<&FieldDescriptor> {
        self.fields().iter().find(|f| f.number == number)
    }

    /// Look up a field by its declared name
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// Look up a field by a text-form key (camelCase or declared name)
    pub fn field_by_key(&self, key: &str) -> Option<&FieldDescriptor> {
        self.fields()
            .iter()
            .find(|f| f.json_name == key)
            .or_else(|| self.fields().iter().find(|f| f.matches_key(key)))
    }

    /// Message type of a message-kind field (the entry type for maps)
    pub fn message_type(&self, field: &FieldDescriptor) -> Option<MessageDescriptor> {
        match field.kind {
            FieldKind::Message(index) => Some(MessageDescriptor {
                pool: Arc::clone(&self.pool),
                index,
            }),
            _ => None,
        }
    }

    /// Enum type of an enum-kind field
    pub fn enum_type(&self, field: &FieldDescriptor) -> Option<EnumDescriptor> {
        match field.kind {
            FieldKind::Enum(index) => Some(EnumDescriptor {
                pool: Arc::clone(&self.pool),
                index,
            }),
            _ => None,
        }
    }

    /// Another message type of the same pool, by full name
    pub fn find_message(&self, full_name: &str) -> Option<MessageDescriptor> {
        self.pool
            .messages
            .iter()
            .position(|m| m.full_name == full_name)
            .map(|index| MessageDescriptor {
                pool: Arc::clone(&self.pool),
                index,
            })
    }

    /// Key and value fields, when this is a map entry type
    pub fn map_entry_fields(&self) -> Option<(&FieldDescriptor, &FieldDescriptor)> {
        Some((self.field_by_number(1)?, self.field_by_number(2)?))
    }
}

impl PartialEq for MessageDescriptor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.pool, &other.pool) && self.index == other.index
    }
}

impl fmt::Debug for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageDescriptor").field(&self.full_name()).finish()
    }
}

impl fmt::Display for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

/// Handle to an enum type in a [`SchemaPool`]
#[derive(Clone)]
pub struct EnumDescriptor {
    pool: Arc<SchemaPool>,
    index: usize,
}

impl EnumDescriptor {
    fn data(&self) -> &EnumData {
        &self.pool.enums[self.index]
    }

    pub fn name(&self) -> &str {
        &self.data().name
    }

    pub fn full_name(&self) -> &str {
        &self.data().full_name
    }

    pub fn value_name(&self, number: i32) -> Option<&str> {
        self.data()
            .values
            .iter()
            .find(|(_, n)| *n == number)
            .map(|(name, _)| name.as_str())
    }

    pub fn value_number(&self, name: &str) -> Option<i32> {
        self.data()
            .values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, number)| *number)
    }

    /// The first declared value, which is the default
    pub fn default_number(&self) -> i32 {
        self.data().values.first().map(|(_, n)| *n).unwrap_or(0)
    }
}

impl fmt::Debug for EnumDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EnumDescriptor").field(&self.full_name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::text::{from_json, to_json};
    use crate::message::{DynamicMessage, Value};
    use crate::test_utils::{
        field, file, json_named, map_entry, message, message_field, repeated, FileExt, MessageExt,
    };
    use serde_json::json;

    #[test]
    fn test_module_name() {
        assert_eq!(module_name("pkgA/widget.proto"), "pkgA.widget");
        assert_eq!(module_name("plain.proto"), "plain");
    }

    #[test]
    fn test_field_properties_proto3() {
        let files = vec![file(
            "demo.proto",
            "demo",
            vec![
                message(
                    "Holder",
                    vec![
                        field("count", 1, Type::Int32),
                        repeated(field("values", 2, Type::Int32)),
                        repeated(field("names", 3, Type::String)),
                        message_field("child", 4, ".demo.Holder"),
                        repeated(message_field("labels", 5, ".demo.Holder.LabelsEntry")),
                    ],
                )
                .nested(map_entry(
                    "LabelsEntry",
                    field("key", 1, Type::String),
                    field("value", 2, Type::Int64),
                )),
            ],
        )];
        let (pool, errors) = SchemaPool::build(files);
        assert!(errors.is_empty());
        let pool = Arc::new(pool);
        let holder = top_level_messages(&pool).remove(0);

        let count = holder.field_by_name("count").unwrap();
        assert!(!count.has_presence);
        assert!(count.is_singular());

        let values = holder.field_by_name("values").unwrap();
        assert!(values.packed);
        assert!(!holder.field_by_name("names").unwrap().packed);

        let child = holder.field_by_name("child").unwrap();
        assert!(child.has_presence);
        assert_eq!(holder.message_type(child).unwrap(), holder);

        let labels = holder.field_by_key("labels").unwrap();
        assert!(labels.is_map());
        let entry = holder.message_type(labels).unwrap();
        let (key, value) = entry.map_entry_fields().unwrap();
        assert_eq!(key.name, "key");
        assert_eq!(value.kind, FieldKind::Scalar(ScalarType::Int64));
    }

    #[test]
    fn test_group_field_rejects_file_and_dependents() {
        let mut bad = field("legacy", 1, Type::Group);
        bad.type_name = Some(".old.Legacy".to_string());
        let files = vec![
            file("old.proto", "old", vec![message("Legacy", vec![bad])]),
            file(
                "new.proto",
                "new",
                vec![message("User", vec![message_field("legacy", 1, ".old.Legacy")])],
            )
            .with_dependency("old.proto"),
            file("fine.proto", "fine", vec![message("Fine", vec![field("ok", 1, Type::Bool)])]),
        ];
        let (pool, errors) = SchemaPool::build(files);
        assert_eq!(errors.len(), 2);
        assert_eq!(pool.module_names().collect::<Vec<_>>(), vec!["fine"]);
    }

    #[test]
    fn test_duplicate_files_loaded_once() {
        let shared = file("shared.proto", "s", vec![message("Shared", vec![])]);
        let (pool, errors) = SchemaPool::build(vec![shared.clone(), shared]);
        assert!(errors.is_empty());
        let pool = Arc::new(pool);
        assert_eq!(top_level_messages(&pool).len(), 1);
    }

    #[test]
    fn test_declared_json_name_preferred() {
        let files = vec![file(
            "account.proto",
            "account",
            vec![message(
                "Account",
                vec![
                    json_named(field("user_ID", 1, Type::String), "userID"),
                    json_named(field("display_name", 2, Type::String), ""),
                ],
            )],
        )];
        let (pool, errors) = SchemaPool::build(files);
        assert!(errors.is_empty());
        let account = top_level_messages(&Arc::new(pool)).remove(0);

        let user = account.field_by_name("user_ID").unwrap();
        assert_eq!(user.json_name, "userID");
        assert_eq!(account.field_by_name("display_name").unwrap().json_name, "displayName");
        for key in ["userID", "user_ID", "userId"] {
            assert_eq!(account.field_by_key(key).unwrap().number, 1, "key {}", key);
        }

        let mut message = DynamicMessage::new(account.clone());
        message.set(user, Value::String("u1".to_string()));
        assert_eq!(to_json(&message, false), json!({ "userID": "u1" }));
        assert_eq!(from_json(&account, &json!({ "userId": "u1" })).unwrap(), message);
    }
}
