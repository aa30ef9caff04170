//! Protobuf binary wire format for dynamic messages
//!
//! Known fields are written in field-number order followed by the preserved
//! unknown fields. Decoding accepts both packed and unpacked repeated scalars
//! and merges repeated occurrences of singular message fields.

use bytes::{Buf, BufMut};
use prost::encoding::{decode_key, decode_varint, encode_key, encode_varint, WireType};
use tracing::warn;

use crate::message::{DynamicMessage, MapKey, Value};
use crate::schema::{Cardinality, FieldDescriptor, FieldKind, MessageDescriptor, ScalarType};

/// Maximum message nesting depth accepted while decoding
const RECURSION_LIMIT: u32 = 100;

type WireResult<T> = std::result::Result<T, String>;

fn wire_type(kind: FieldKind) -> WireType {
    match kind {
        FieldKind::Scalar(scalar) => match scalar {
            ScalarType::Double | ScalarType::Fixed64 | ScalarType::Sfixed64 => WireType::SixtyFourBit,
            ScalarType::Float | ScalarType::Fixed32 | ScalarType::Sfixed32 => WireType::ThirtyTwoBit,
            ScalarType::String => WireType::LengthDelimited,
            _ => WireType::Varint,
        },
        FieldKind::Enum(_) => WireType::Varint,
        FieldKind::Message(_) | FieldKind::Bytes => WireType::LengthDelimited,
    }
}

fn is_packable(kind: FieldKind) -> bool {
    match kind {
        FieldKind::Scalar(scalar) => scalar.is_packable(),
        FieldKind::Enum(_) => true,
        FieldKind::Message(_) | FieldKind::Bytes => false,
    }
}

/// Serialize a message to its binary encoding
pub fn encode(message: &DynamicMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(message, &mut buf);
    buf
}

fn put_length_delimited(number: u32, payload: &[u8], buf: &mut Vec<u8>) {
    encode_key(number, WireType::LengthDelimited, buf);
    encode_varint(payload.len() as u64, buf);
    buf.extend_from_slice(payload);
}

fn encode_into(message: &DynamicMessage, buf: &mut Vec<u8>) {
    let desc = message.descriptor();
    for (field, value) in message.fields() {
        match value {
            Value::Map(entries) => {
                let Some(entry_desc) = desc.message_type(field) else {
                    continue;
                };
                let Some((key_field, value_field)) = entry_desc.map_entry_fields() else {
                    continue;
                };
                for (key, item) in entries {
                    let mut entry = Vec::new();
                    encode_element(key_field, &key.clone().into_value(), &mut entry);
                    encode_element(value_field, item, &mut entry);
                    put_length_delimited(field.number, &entry, buf);
                }
            }
            Value::List(items) if field.packed => {
                if items.is_empty() {
                    continue;
                }
                let mut packed = Vec::new();
                for item in items {
                    if !encode_payload(field, item, &mut packed) {
                        warn!("Dropping mismatched element in {}.{}", desc.full_name(), field.name);
                    }
                }
                put_length_delimited(field.number, &packed, buf);
            }
            Value::List(items) => {
                for item in items {
                    encode_element(field, item, buf);
                }
            }
            value => encode_element(field, value, buf),
        }
    }
    buf.extend_from_slice(message.unknown_fields());
}

/// Key plus payload of one value
fn encode_element(field: &FieldDescriptor, value: &Value, buf: &mut Vec<u8>) {
    let mut payload = Vec::new();
    if encode_payload(field, value, &mut payload) {
        encode_key(field.number, wire_type(field.kind), buf);
        buf.extend_from_slice(&payload);
    } else {
        warn!("Dropping mismatched value for field {}", field.name);
    }
}

/// Payload of one value without its key; `false` if the value does not
/// match the field's kind
fn encode_payload(field: &FieldDescriptor, value: &Value, buf: &mut Vec<u8>) -> bool {
    match (field.kind, value) {
        (FieldKind::Scalar(scalar), value) => match (scalar, value) {
            (ScalarType::Int32, Value::I32(v)) => encode_varint(*v as i64 as u64, buf),
            (ScalarType::Int64, Value::I64(v)) => encode_varint(*v as u64, buf),
            (ScalarType::Uint32, Value::U32(v)) => encode_varint(*v as u64, buf),
            (ScalarType::Uint64, Value::U64(v)) => encode_varint(*v, buf),
            (ScalarType::Sint32, Value::I32(v)) => {
                encode_varint(((*v << 1) ^ (*v >> 31)) as u32 as u64, buf)
            }
            (ScalarType::Sint64, Value::I64(v)) => encode_varint(((*v << 1) ^ (*v >> 63)) as u64, buf),
            (ScalarType::Fixed32, Value::U32(v)) => buf.put_u32_le(*v),
            (ScalarType::Fixed64, Value::U64(v)) => buf.put_u64_le(*v),
            (ScalarType::Sfixed32, Value::I32(v)) => buf.put_i32_le(*v),
            (ScalarType::Sfixed64, Value::I64(v)) => buf.put_i64_le(*v),
            (ScalarType::Float, Value::F32(v)) => buf.put_f32_le(*v),
            (ScalarType::Double, Value::F64(v)) => buf.put_f64_le(*v),
            (ScalarType::Bool, Value::Bool(v)) => encode_varint(*v as u64, buf),
            (ScalarType::String, Value::String(v)) => {
                encode_varint(v.len() as u64, buf);
                buf.extend_from_slice(v.as_bytes());
            }
            _ => return false,
        },
        (FieldKind::Bytes, Value::Bytes(v)) => {
            encode_varint(v.len() as u64, buf);
            buf.extend_from_slice(v);
        }
        (FieldKind::Enum(_), Value::Enum(v)) => encode_varint(*v as i64 as u64, buf),
        (FieldKind::Message(_), Value::Message(m)) => {
            let nested = encode(m);
            encode_varint(nested.len() as u64, buf);
            buf.extend_from_slice(&nested);
        }
        _ => return false,
    }
    true
}

/// Parse a binary-encoded message of type `desc`
pub fn decode(desc: &MessageDescriptor, data: &[u8]) -> WireResult<DynamicMessage> {
    let mut message = DynamicMessage::new(desc.clone());
    merge(&mut message, data, RECURSION_LIMIT)?;
    Ok(message)
}

fn merge(message: &mut DynamicMessage, mut buf: &[u8], depth: u32) -> WireResult<()> {
    if depth == 0 {
        return Err("recursion limit reached".to_string());
    }
    let desc = message.descriptor().clone();

    while buf.has_remaining() {
        let start = buf;
        let (number, wire) = decode_key(&mut buf).map_err(|e| e.to_string())?;
        let known = desc.field_by_number(number).filter(|field| accepts(field, wire));
        match known {
            Some(field) => merge_field(message, &desc, field, wire, &mut buf, depth)?,
            None => {
                skip_field(wire, number, &mut buf)?;
                let consumed = start.len() - buf.len();
                message.push_unknown(&start[..consumed]);
            }
        }
    }

    message.prune_empty();
    Ok(())
}

/// Whether a wire type is valid for a field; mismatches are kept as unknown
fn accepts(field: &FieldDescriptor, wire: WireType) -> bool {
    match field.cardinality {
        Cardinality::Map => wire == WireType::LengthDelimited,
        Cardinality::Repeated if is_packable(field.kind) => {
            wire == WireType::LengthDelimited || wire == wire_type(field.kind)
        }
        _ => wire == wire_type(field.kind),
    }
}

fn merge_field(
    message: &mut DynamicMessage,
    desc: &MessageDescriptor,
    field: &FieldDescriptor,
    wire: WireType,
    buf: &mut &[u8],
    depth: u32,
) -> WireResult<()> {
    match field.cardinality {
        Cardinality::Map => {
            let chunk = take_chunk(buf)?;
            let entry_desc = desc
                .message_type(field)
                .ok_or_else(|| format!("field {} has no entry type", field.name))?;
            let mut entry = DynamicMessage::new(entry_desc.clone());
            merge(&mut entry, chunk, depth - 1)?;
            let (key_field, value_field) = entry_desc
                .map_entry_fields()
                .ok_or_else(|| format!("malformed map entry for {}", field.name))?;
            let key = MapKey::from_value(entry.get_or_default(key_field))
                .ok_or_else(|| format!("invalid key type for map {}", field.name))?;
            let value = entry.get_or_default(value_field);
            if let Some(entries) = message.map_mut(field) {
                entries.insert(key, value);
            }
        }
        Cardinality::Repeated => {
            if wire == WireType::LengthDelimited && is_packable(field.kind) {
                let mut chunk = take_chunk(buf)?;
                let mut items = Vec::new();
                while chunk.has_remaining() {
                    items.push(decode_value(desc, field, &mut chunk, depth)?);
                }
                if let Some(list) = message.list_mut(field) {
                    list.extend(items);
                }
            } else {
                let item = decode_value(desc, field, buf, depth)?;
                if let Some(list) = message.list_mut(field) {
                    list.push(item);
                }
            }
        }
        Cardinality::Singular => {
            if field.is_message() {
                let chunk = take_chunk(buf)?;
                let nested = message
                    .message_mut(field)
                    .ok_or_else(|| format!("field {} has no message type", field.name))?;
                merge(nested, chunk, depth - 1)?;
            } else {
                let value = decode_value(desc, field, buf, depth)?;
                message.set(field, value);
            }
        }
    }
    Ok(())
}

fn decode_value(
    desc: &MessageDescriptor,
    field: &FieldDescriptor,
    buf: &mut &[u8],
    depth: u32,
) -> WireResult<Value> {
    match field.kind {
        FieldKind::Scalar(scalar) => decode_scalar(scalar, buf),
        FieldKind::Bytes => Ok(Value::Bytes(take_chunk(buf)?.to_vec())),
        FieldKind::Enum(_) => Ok(Value::Enum(varint(buf)? as i32)),
        FieldKind::Message(_) => {
            let chunk = take_chunk(buf)?;
            let nested_desc = desc
                .message_type(field)
                .ok_or_else(|| format!("field {} has no message type", field.name))?;
            let mut nested = DynamicMessage::new(nested_desc);
            merge(&mut nested, chunk, depth - 1)?;
            Ok(Value::Message(nested))
        }
    }
}

fn decode_scalar(scalar: ScalarType, buf: &mut &[u8]) -> WireResult<Value> {
    let value = match scalar {
        ScalarType::Int32 => Value::I32(varint(buf)? as i32),
        ScalarType::Int64 => Value::I64(varint(buf)? as i64),
        ScalarType::Uint32 => Value::U32(varint(buf)? as u32),
        ScalarType::Uint64 => Value::U64(varint(buf)?),
        ScalarType::Sint32 => {
            let n = varint(buf)? as u32;
            Value::I32(((n >> 1) as i32) ^ -((n & 1) as i32))
        }
        ScalarType::Sint64 => {
            let n = varint(buf)?;
            Value::I64(((n >> 1) as i64) ^ -((n & 1) as i64))
        }
        ScalarType::Bool => Value::Bool(varint(buf)? != 0),
        ScalarType::Fixed32 => {
            need(buf, 4)?;
            Value::U32(buf.get_u32_le())
        }
        ScalarType::Fixed64 => {
            need(buf, 8)?;
            Value::U64(buf.get_u64_le())
        }
        ScalarType::Sfixed32 => {
            need(buf, 4)?;
            Value::I32(buf.get_i32_le())
        }
        ScalarType::Sfixed64 => {
            need(buf, 8)?;
            Value::I64(buf.get_i64_le())
        }
        ScalarType::Float => {
            need(buf, 4)?;
            Value::F32(buf.get_f32_le())
        }
        ScalarType::Double => {
            need(buf, 8)?;
            Value::F64(buf.get_f64_le())
        }
        ScalarType::String => {
            let chunk = take_chunk(buf)?;
            Value::String(String::from_utf8(chunk.to_vec()).map_err(|e| e.to_string())?)
        }
    };
    Ok(value)
}

fn varint(buf: &mut &[u8]) -> WireResult<u64> {
    decode_varint(buf).map_err(|e| e.to_string())
}

fn need(buf: &[u8], len: usize) -> WireResult<()> {
    if buf.len() < len {
        Err("buffer underflow".to_string())
    } else {
        Ok(())
    }
}

/// Split off a length-delimited payload
fn take_chunk<'a>(buf: &mut &'a [u8]) -> WireResult<&'a [u8]> {
    let len = varint(buf)? as usize;
    need(buf, len)?;
    let slice: &'a [u8] = buf;
    let (chunk, rest) = slice.split_at(len);
    *buf = rest;
    Ok(chunk)
}

fn skip_field(wire: WireType, number: u32, buf: &mut &[u8]) -> WireResult<()> {
    match wire {
        WireType::Varint => {
            varint(buf)?;
        }
        WireType::SixtyFourBit => {
            need(buf, 8)?;
            buf.advance(8);
        }
        WireType::ThirtyTwoBit => {
            need(buf, 4)?;
            buf.advance(4);
        }
        WireType::LengthDelimited => {
            take_chunk(buf)?;
        }
        WireType::StartGroup => loop {
            if !buf.has_remaining() {
                return Err(format!("unterminated group {}", number));
            }
            let (inner, inner_wire) = decode_key(buf).map_err(|e| e.to_string())?;
            if inner_wire == WireType::EndGroup {
                if inner != number {
                    return Err(format!("mismatched end of group {}", number));
                }
                break;
            }
            skip_field(inner_wire, inner, buf)?;
        },
        WireType::EndGroup => return Err(format!("unexpected end of group {}", number)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixture_registry;

    fn scalars() -> MessageDescriptor {
        fixture_registry().resolve("Scalars").unwrap()
    }

    #[test]
    fn test_known_encodings() {
        let desc = scalars();
        let mut message = DynamicMessage::new(desc.clone());
        message.set(desc.field_by_name("f_int32").unwrap(), Value::I32(150));
        assert_eq!(encode(&message), vec![0x18, 0x96, 0x01]);

        let mut message = DynamicMessage::new(desc.clone());
        message.set(desc.field_by_name("f_sint32").unwrap(), Value::I32(-1));
        assert_eq!(encode(&message), vec![0x38, 0x01]);

        let mut message = DynamicMessage::new(desc.clone());
        message.set(desc.field_by_name("f_int32").unwrap(), Value::I32(-1));
        let encoded = encode(&message);
        assert_eq!(encoded.len(), 11);
        assert_eq!(decode(&desc, &encoded).unwrap(), message);
    }

    #[test]
    fn test_packed_and_unpacked_repeated() {
        let desc = scalars();
        let packed = desc.field_by_name("r_int32").unwrap();
        let unpacked = desc.field_by_name("r_sint64").unwrap();

        let mut message = DynamicMessage::new(desc.clone());
        message.set(packed, Value::List(vec![Value::I32(1), Value::I32(2)]));
        message.set(unpacked, Value::List(vec![Value::I64(-1), Value::I64(1)]));
        let encoded = encode(&message);
        assert_eq!(
            encoded,
            vec![0x82, 0x01, 0x02, 0x01, 0x02, 0x88, 0x01, 0x01, 0x88, 0x01, 0x02]
        );

        // An unpacked encoding of a packed field still decodes
        let decoded = decode(&desc, &[0x80, 0x01, 0x01, 0x80, 0x01, 0x02]).unwrap();
        assert_eq!(
            decoded.get(packed),
            Some(&Value::List(vec![Value::I32(1), Value::I32(2)]))
        );
    }

    #[test]
    fn test_unknown_fields_survive() {
        let desc = fixture_registry().resolve("Inner").unwrap();
        // number = 5, then unknown field 9 (varint) and unknown field 10 (bytes)
        let data = vec![0x08, 0x05, 0x48, 0x2a, 0x52, 0x02, 0xab, 0xcd];
        let message = decode(&desc, &data).unwrap();
        assert_eq!(message.get_by_name("number"), Some(&Value::I32(5)));
        assert_eq!(message.unknown_fields(), &data[2..]);
        assert_eq!(encode(&message), data);
    }

    #[test]
    fn test_wire_type_mismatch_is_unknown() {
        let desc = fixture_registry().resolve("Inner").unwrap();
        // field 1 sent as length-delimited instead of varint
        let data = vec![0x0a, 0x01, 0x00];
        let message = decode(&desc, &data).unwrap();
        assert!(message.get_by_name("number").is_none());
        assert_eq!(message.unknown_fields(), data.as_slice());
    }

    #[test]
    fn test_singular_messages_merge() {
        let desc = fixture_registry().resolve("Envelope").unwrap();
        // header { timestamp: 1 } followed by header { route { name: "r" } }
        let data = vec![
            0x12, 0x02, 0x08, 0x01, //
            0x12, 0x05, 0x1a, 0x03, 0x12, 0x01, b'r',
        ];
        let message = decode(&desc, &data).unwrap();
        let Some(Value::Message(header)) = message.get_by_name("header") else {
            panic!("header missing");
        };
        assert_eq!(header.get_by_name("timestamp"), Some(&Value::I64(1)));
        assert!(header.get_by_name("route").is_some());
    }

    #[test]
    fn test_truncated_input_fails() {
        let desc = fixture_registry().resolve("TestMessage").unwrap();
        assert!(decode(&desc, &[0x0a, 0x05, b'a']).is_err());
        assert!(decode(&desc, &[0x0a, 0x02, 0xff, 0xfe]).is_err());
    }
}
