//! Binary and text codecs
//!
//! Thin entry points over the wire codec ([`binary`]) and the JSON mapping
//! ([`text`]) that attach the message type to every error.

pub mod binary;
pub mod text;

use crate::error::{ProtopadError, Result};
use crate::message::DynamicMessage;
use crate::schema::MessageDescriptor;

/// Decode protobuf wire bytes as `desc`
pub fn decode_binary(data: &[u8], desc: &MessageDescriptor) -> Result<DynamicMessage> {
    binary::decode(desc, data).map_err(|reason| ProtopadError::BinaryDecode {
        type_name: desc.full_name().to_string(),
        reason,
    })
}

/// Serialize to protobuf wire bytes
pub fn encode_binary(message: &DynamicMessage) -> Vec<u8> {
    binary::encode(message)
}

/// Parse JSON text as `desc`
pub fn decode_text(text: &str, desc: &MessageDescriptor) -> Result<DynamicMessage> {
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ProtopadError::text(desc.full_name(), e))?;
    text::from_json(desc, &json)
}

/// Render as pretty-printed JSON (2-space indent)
pub fn encode_text(message: &DynamicMessage, include_defaults: bool) -> Result<String> {
    Ok(serde_json::to_string_pretty(&text::to_json(
        message,
        include_defaults,
    ))?)
}
