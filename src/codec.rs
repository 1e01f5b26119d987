//! Resource data types and the text value codec
//!
//! Resource values are stored as raw bytes. The IPC channel carries them as
//! text; this module converts between the two according to the resource's
//! declared data type. Integers, times and floats are stored little-endian,
//! opaque values travel as base64.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::error::{Lwm2mError, Result};

/// Declared data type of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceType {
    /// No value (typically executable resources)
    #[default]
    None,
    String,
    Integer,
    Float,
    Boolean,
    Opaque,
    /// Seconds since the Unix epoch
    Time,
    /// Reference to an object instance, rendered as `ObjectID:InstanceID`
    ObjectLink,
}

impl ResourceType {
    /// Parse a data type name as used in object definitions
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        [
            Self::None,
            Self::String,
            Self::Integer,
            Self::Float,
            Self::Boolean,
            Self::Opaque,
            Self::Time,
            Self::ObjectLink,
        ]
        .into_iter()
        .find(|t| t.as_str().eq_ignore_ascii_case(name))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::String => "String",
            Self::Integer => "Integer",
            Self::Float => "Float",
            Self::Boolean => "Boolean",
            Self::Opaque => "Opaque",
            Self::Time => "Time",
            Self::ObjectLink => "ObjectLink",
        }
    }
}

/// Render stored bytes as text for the given data type
pub fn encode_value(data_type: ResourceType, bytes: &[u8]) -> Result<String> {
    match data_type {
        ResourceType::None => Ok(String::new()),

        ResourceType::String => String::from_utf8(bytes.to_vec())
            .map_err(|e| Lwm2mError::ValueEncode(format!("string is not UTF-8: {}", e))),

        ResourceType::Integer | ResourceType::Time => {
            let n = match *bytes {
                [b] => i64::from(i8::from_le_bytes([b])),
                [a, b] => i64::from(i16::from_le_bytes([a, b])),
                [a, b, c, d] => i64::from(i32::from_le_bytes([a, b, c, d])),
                _ => i64::from_le_bytes(fixed_width::<8>(data_type, bytes)?),
            };
            Ok(n.to_string())
        }

        ResourceType::Float => {
            let f = match bytes.len() {
                4 => f64::from(f32::from_le_bytes(fixed_width::<4>(data_type, bytes)?)),
                _ => f64::from_le_bytes(fixed_width::<8>(data_type, bytes)?),
            };
            Ok(f.to_string())
        }

        ResourceType::Boolean => match bytes {
            [0] => Ok("False".to_string()),
            [_] => Ok("True".to_string()),
            _ => Err(Lwm2mError::ValueEncode(format!(
                "boolean needs 1 byte, got {}",
                bytes.len()
            ))),
        },

        ResourceType::Opaque => Ok(BASE64.encode(bytes)),

        ResourceType::ObjectLink => {
            let [a, b, c, d] = fixed_width::<4>(data_type, bytes)?;
            let object_id = u16::from_le_bytes([a, b]);
            let instance_id = u16::from_le_bytes([c, d]);
            Ok(format!("{}:{}", object_id, instance_id))
        }
    }
}

/// Parse text into stored bytes for the given data type
///
/// Malformed text fails without producing a partial value.
pub fn decode_value(data_type: ResourceType, text: &str) -> Result<Vec<u8>> {
    match data_type {
        ResourceType::None => Ok(Vec::new()),

        ResourceType::String => Ok(text.as_bytes().to_vec()),

        ResourceType::Integer | ResourceType::Time => {
            let n: i64 = text.trim().parse().map_err(|_| {
                Lwm2mError::ValueDecode(format!("cannot parse '{}' as integer", text))
            })?;
            Ok(n.to_le_bytes().to_vec())
        }

        ResourceType::Float => {
            let f: f64 = text.trim().parse().map_err(|_| {
                Lwm2mError::ValueDecode(format!("cannot parse '{}' as float", text))
            })?;
            Ok(f.to_le_bytes().to_vec())
        }

        ResourceType::Boolean => match text.trim() {
            t if t.eq_ignore_ascii_case("true") || t == "1" => Ok(vec![1]),
            t if t.eq_ignore_ascii_case("false") || t == "0" => Ok(vec![0]),
            _ => Err(Lwm2mError::ValueDecode(format!(
                "cannot parse '{}' as boolean",
                text
            ))),
        },

        ResourceType::Opaque => BASE64
            .decode(text.trim())
            .map_err(|e| Lwm2mError::ValueDecode(format!("base64 decode: {}", e))),

        ResourceType::ObjectLink => {
            let (object, instance) = text.trim().split_once(':').ok_or_else(|| {
                Lwm2mError::ValueDecode(format!("object link '{}' lacks ':'", text))
            })?;
            let parse = |part: &str| {
                part.trim().parse::<u16>().map_err(|_| {
                    Lwm2mError::ValueDecode(format!("invalid object link '{}'", text))
                })
            };
            let mut bytes = parse(object)?.to_le_bytes().to_vec();
            bytes.extend_from_slice(&parse(instance)?.to_le_bytes());
            Ok(bytes)
        }
    }
}

/// Encode an execute argument or other raw payload as opaque text
pub fn encode_opaque(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

fn fixed_width<const N: usize>(data_type: ResourceType, bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        Lwm2mError::ValueEncode(format!(
            "{} value has {} bytes, expected {}",
            data_type.as_str(),
            bytes.len(),
            N
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_from_name() {
        assert_eq!(ResourceType::from_name("Integer"), Some(ResourceType::Integer));
        assert_eq!(ResourceType::from_name("objectlink"), Some(ResourceType::ObjectLink));
        assert_eq!(ResourceType::from_name("Complex"), None);
    }

    #[test]
    fn test_integer_widths() {
        assert_eq!(encode_value(ResourceType::Integer, &[0xff]).unwrap(), "-1");
        assert_eq!(
            encode_value(ResourceType::Integer, &300i16.to_le_bytes()).unwrap(),
            "300"
        );
        let bytes = decode_value(ResourceType::Integer, " 42 ").unwrap();
        assert_eq!(bytes, 42i64.to_le_bytes());
        assert!(encode_value(ResourceType::Integer, &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_opaque_base64() {
        let raw = hex::decode("deadbeef").unwrap();
        let text = encode_value(ResourceType::Opaque, &raw).unwrap();
        assert_eq!(text, "3q2+7w==");
        assert_eq!(decode_value(ResourceType::Opaque, &text).unwrap(), raw);
        assert!(decode_value(ResourceType::Opaque, "not base64!").is_err());
    }

    #[test]
    fn test_boolean_and_float() {
        assert_eq!(decode_value(ResourceType::Boolean, "True").unwrap(), vec![1]);
        assert_eq!(encode_value(ResourceType::Boolean, &[0]).unwrap(), "False");
        assert!(decode_value(ResourceType::Boolean, "maybe").is_err());

        let bytes = decode_value(ResourceType::Float, "1.5").unwrap();
        assert_eq!(encode_value(ResourceType::Float, &bytes).unwrap(), "1.5");
    }

    #[test]
    fn test_object_link() {
        let bytes = decode_value(ResourceType::ObjectLink, "3:1").unwrap();
        assert_eq!(bytes.len(), 4);
        assert_eq!(encode_value(ResourceType::ObjectLink, &bytes).unwrap(), "3:1");
        assert!(decode_value(ResourceType::ObjectLink, "3").is_err());
    }
}
