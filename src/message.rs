//! Dynamic message instances
//!
//! A [`DynamicMessage`] is a tree of [`Value`]s keyed by field number that
//! conforms to a [`MessageDescriptor`]. Implicit-presence fields holding
//! their zero value are never stored, so two messages with the same content
//! always compare equal.

use std::collections::BTreeMap;

use crate::schema::{Cardinality, FieldDescriptor, FieldKind, MessageDescriptor, ScalarType};

/// Runtime value of a field
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Enum value number
    Enum(i32),
    Message(DynamicMessage),
    List(Vec<Value>),
    Map(BTreeMap<MapKey, Value>),
}

/// Map keys (protobuf only allows integral, bool and string keys)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    String(String),
}

impl MapKey {
    pub fn into_value(self) -> Value {
        match self {
            MapKey::Bool(v) => Value::Bool(v),
            MapKey::I32(v) => Value::I32(v),
            MapKey::I64(v) => Value::I64(v),
            MapKey::U32(v) => Value::U32(v),
            MapKey::U64(v) => Value::U64(v),
            MapKey::String(v) => Value::String(v),
        }
    }

    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Bool(v) => Some(MapKey::Bool(v)),
            Value::I32(v) => Some(MapKey::I32(v)),
            Value::I64(v) => Some(MapKey::I64(v)),
            Value::U32(v) => Some(MapKey::U32(v)),
            Value::U64(v) => Some(MapKey::U64(v)),
            Value::String(v) => Some(MapKey::String(v)),
            _ => None,
        }
    }
}

/// Zero value of a scalar type
pub fn scalar_default(scalar: ScalarType) -> Value {
    match scalar {
        ScalarType::Double => Value::F64(0.0),
        ScalarType::Float => Value::F32(0.0),
        ScalarType::Int32 | ScalarType::Sint32 | ScalarType::Sfixed32 => Value::I32(0),
        ScalarType::Int64 | ScalarType::Sint64 | ScalarType::Sfixed64 => Value::I64(0),
        ScalarType::Uint32 | ScalarType::Fixed32 => Value::U32(0),
        ScalarType::Uint64 | ScalarType::Fixed64 => Value::U64(0),
        ScalarType::Bool => Value::Bool(false),
        ScalarType::String => Value::String(String::new()),
    }
}

/// Zero value of a single element of `field` (ignoring cardinality)
pub fn element_default(parent: &MessageDescriptor, field: &FieldDescriptor) -> Value {
    match field.kind {
        FieldKind::Scalar(scalar) => scalar_default(scalar),
        FieldKind::Bytes => Value::Bytes(Vec::new()),
        FieldKind::Enum(_) => Value::Enum(
            parent
                .enum_type(field)
                .map(|e| e.default_number())
                .unwrap_or(0),
        ),
        FieldKind::Message(_) => match parent.message_type(field) {
            Some(desc) => Value::Message(DynamicMessage::new(desc)),
            None => Value::Bytes(Vec::new()),
        },
    }
}

/// Zero value of `field` including its cardinality
pub fn field_default(parent: &MessageDescriptor, field: &FieldDescriptor) -> Value {
    match field.cardinality {
        Cardinality::Repeated => Value::List(Vec::new()),
        Cardinality::Map => Value::Map(BTreeMap::new()),
        Cardinality::Singular => element_default(parent, field),
    }
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Bool(v) => !v,
        Value::I32(v) | Value::Enum(v) => *v == 0,
        Value::I64(v) => *v == 0,
        Value::U32(v) => *v == 0,
        Value::U64(v) => *v == 0,
        Value::F32(v) => *v == 0.0 && v.is_sign_positive(),
        Value::F64(v) => *v == 0.0 && v.is_sign_positive(),
        Value::String(v) => v.is_empty(),
        Value::Bytes(v) => v.is_empty(),
        Value::List(v) => v.is_empty(),
        Value::Map(v) => v.is_empty(),
        Value::Message(_) => false,
    }
}

/// A message instance of a dynamically loaded type
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicMessage {
    desc: MessageDescriptor,
    fields: BTreeMap<u32, Value>,
    /// Raw wire bytes of fields the schema does not declare
    unknown: Vec<u8>,
}

impl DynamicMessage {
    /// An empty instance with every field at its default
    pub fn new(desc: MessageDescriptor) -> Self {
        Self {
            desc,
            fields: BTreeMap::new(),
            unknown: Vec::new(),
        }
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.desc
    }

    /// Whether the field currently holds a (non-default) value
    pub fn has(&self, field: &FieldDescriptor) -> bool {
        self.fields.contains_key(&field.number)
    }

    /// Stored value of a field, `None` when unset
    pub fn get(&self, field: &FieldDescriptor) -> Option<&Value> {
        self.fields.get(&field.number)
    }

    /// Stored value of a field looked up by declared name
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.desc
            .field_by_name(name)
            .and_then(|field| self.fields.get(&field.number))
    }

    /// Value of a field, falling back to its default when unset
    pub fn get_or_default(&self, field: &FieldDescriptor) -> Value {
        self.get(field)
            .cloned()
            .unwrap_or_else(|| field_default(&self.desc, field))
    }

    /// Set a field, clearing other members of its oneof.
    ///
    /// Implicit-presence fields set to their zero value (and empty lists or
    /// maps) are cleared instead of stored.
    pub fn set(&mut self, field: &FieldDescriptor, value: Value) {
        if let Some(oneof) = field.oneof {
            let siblings: Vec<u32> = self
                .desc
                .fields()
                .iter()
                .filter(|f| f.oneof == Some(oneof) && f.number != field.number)
                .map(|f| f.number)
                .collect();
            for number in siblings {
                self.fields.remove(&number);
            }
        }

        if !field.has_presence && is_zero(&value) {
            self.fields.remove(&field.number);
        } else {
            self.fields.insert(field.number, value);
        }
    }

    pub fn clear(&mut self, field: &FieldDescriptor) {
        self.fields.remove(&field.number);
    }

    /// Mutable access to a singular message field, materializing it if unset
    pub fn message_mut(&mut self, field: &FieldDescriptor) -> Option<&mut DynamicMessage> {
        let desc = self.desc.message_type(field)?;
        if !field.is_singular() {
            return None;
        }
        if !matches!(self.fields.get(&field.number), Some(Value::Message(_))) {
            self.set(field, Value::Message(DynamicMessage::new(desc)));
        }
        match self.fields.get_mut(&field.number) {
            Some(Value::Message(message)) => Some(message),
            _ => None,
        }
    }

    /// Mutable access to a repeated field's elements
    pub fn list_mut(&mut self, field: &FieldDescriptor) -> Option<&mut Vec<Value>> {
        if !field.is_list() {
            return None;
        }
        let entry = self
            .fields
            .entry(field.number)
            .or_insert_with(|| Value::List(Vec::new()));
        match entry {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Mutable access to a map field's entries
    pub fn map_mut(&mut self, field: &FieldDescriptor) -> Option<&mut BTreeMap<MapKey, Value>> {
        if !field.is_map() {
            return None;
        }
        let entry = self
            .fields
            .entry(field.number)
            .or_insert_with(|| Value::Map(BTreeMap::new()));
        match entry {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Drop empty lists and maps left behind by `list_mut`/`map_mut`
    pub(crate) fn prune_empty(&mut self) {
        self.fields.retain(|_, value| match value {
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
            _ => true,
        });
    }

    /// Set fields paired with their descriptors, in field-number order
    pub fn fields(&self) -> impl Iterator<Item = (&FieldDescriptor, &Value)> {
        self.fields
            .iter()
            .filter_map(|(number, value)| Some((self.desc.field_by_number(*number)?, value)))
    }

    pub fn unknown_fields(&self) -> &[u8] {
        &self.unknown
    }

    pub(crate) fn push_unknown(&mut self, raw: &[u8]) {
        self.unknown.extend_from_slice(raw);
    }

    /// Whether nothing at all is set
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.unknown.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixture_registry;

    #[test]
    fn test_zero_values_are_not_stored() {
        let desc = fixture_registry().resolve("Inner").unwrap();
        let number = desc.field_by_name("number").unwrap().clone();

        let mut message = DynamicMessage::new(desc);
        message.set(&number, Value::I32(7));
        assert!(message.has(&number));
        message.set(&number, Value::I32(0));
        assert!(!message.has(&number));
        assert!(message.is_empty());
    }

    #[test]
    fn test_oneof_members_replace_each_other() {
        let desc = fixture_registry().resolve("Choice").unwrap();
        let word = desc.field_by_name("word").unwrap().clone();
        let digit = desc.field_by_name("digit").unwrap().clone();

        let mut message = DynamicMessage::new(desc);
        message.set(&word, Value::String("seven".to_string()));
        message.set(&digit, Value::I32(0));
        assert!(!message.has(&word));
        assert_eq!(message.get(&digit), Some(&Value::I32(0)));
    }

    #[test]
    fn test_message_mut_materializes() {
        let desc = fixture_registry().resolve("Envelope").unwrap();
        let header = desc.field_by_name("header").unwrap().clone();

        let mut message = DynamicMessage::new(desc);
        assert!(!message.has(&header));
        let nested = message.message_mut(&header).unwrap();
        assert_eq!(nested.descriptor().name(), "Header");
        assert!(message.has(&header));
    }
}
