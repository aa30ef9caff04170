//! Template messages used to seed a new document

use crate::codec::text;
use crate::message::{DynamicMessage, Value};
use crate::schema::{Cardinality, MessageDescriptor};

/// Default-populated instance of `desc`.
///
/// With `empty` the instance is bare. Otherwise every singular message field
/// holds a recursively built template and every repeated message field one
/// template element, so the text form shows the whole shape of the type.
/// Maps stay empty and well-known types are left bare. A type already being
/// built further up is not expanded again, which keeps self-referencing types
/// finite.
pub fn build_template(desc: &MessageDescriptor, empty: bool) -> DynamicMessage {
    if empty {
        return DynamicMessage::new(desc.clone());
    }
    populate(desc, &mut Vec::new())
}

fn populate(desc: &MessageDescriptor, building: &mut Vec<String>) -> DynamicMessage {
    building.push(desc.full_name().to_string());

    let mut message = DynamicMessage::new(desc.clone());
    for field in desc.fields().iter().filter(|f| f.is_message() && !f.is_map()) {
        let Some(nested) = desc.message_type(field) else {
            continue;
        };
        if building.iter().any(|name| name == nested.full_name()) {
            continue;
        }

        let child = if text::is_well_known(nested.full_name()) {
            Value::Message(DynamicMessage::new(nested))
        } else {
            Value::Message(populate(&nested, building))
        };
        match field.cardinality {
            Cardinality::Singular => message.set(field, child),
            Cardinality::Repeated => message.set(field, Value::List(vec![child])),
            Cardinality::Map => {}
        }
    }

    building.pop();
    message
}
