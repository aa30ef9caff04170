//! Input format detection
//!
//! Raw input is tried as text first and as protobuf binary second. Binary data
//! that happens to be valid UTF-8 JSON of the right shape would be read as
//! text; in practice wire bytes almost never parse as JSON.

use tracing::debug;

use crate::codec;
use crate::error::Result;
use crate::message::DynamicMessage;
use crate::payload;
use crate::schema::MessageDescriptor;

/// Parse text or binary input as `desc`.
///
/// When the text attempt fails for any reason the binary decode runs, and
/// its error is the one reported.
pub fn parse_any(
    raw: &[u8],
    desc: &MessageDescriptor,
    internal: Option<&MessageDescriptor>,
) -> Result<DynamicMessage> {
    match std::str::from_utf8(raw) {
        Ok(text) => match payload::parse_text(text, desc, internal) {
            Ok(message) => {
                debug!("Read input as text ({})", desc.full_name());
                return Ok(message);
            }
            Err(e) => debug!("Input is not text: {}", e),
        },
        Err(e) => debug!("Input is not UTF-8: {}", e),
    }

    let message = codec::decode_binary(raw, desc)?;
    debug!("Read input as binary ({})", desc.full_name());
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtopadError;
    use crate::message::Value;
    use crate::test_utils::fixture_registry;

    #[test]
    fn test_text_input() {
        let desc = fixture_registry().resolve("TestMessage").unwrap();
        let message = parse_any(br#"{"text": "hi"}"#, &desc, None).unwrap();
        assert_eq!(message.get_by_name("text"), Some(&Value::String("hi".to_string())));
    }

    #[test]
    fn test_non_utf8_falls_back_to_binary() {
        let desc = fixture_registry().resolve("Outer").unwrap();
        let raw = [0x0a, 0x02, 0xff, 0xfe];
        let message = parse_any(&raw, &desc, None).unwrap();
        assert_eq!(message.get_by_name("inner"), Some(&Value::Bytes(vec![0xff, 0xfe])));
    }

    #[test]
    fn test_utf8_binary_falls_back() {
        let desc = fixture_registry().resolve("TestMessage").unwrap();
        let raw = b"\x0a\x02hi";
        let message = parse_any(raw, &desc, None).unwrap();
        assert_eq!(message.get_by_name("text"), Some(&Value::String("hi".to_string())));
    }

    #[test]
    fn test_binary_error_is_reported() {
        let desc = fixture_registry().resolve("TestMessage").unwrap();
        match parse_any(b"{ broken", &desc, None) {
            Err(ProtopadError::BinaryDecode { type_name, .. }) => {
                assert_eq!(type_name, "testdata.TestMessage")
            }
            other => panic!("Expected BinaryDecode, got {:?}", other),
        }
    }
}
