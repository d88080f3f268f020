use std::fmt;
use std::io::Read;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat};
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Number, Value};

use crate::api::ProxyError;
use crate::event::BATCH_TIME_FIELD;

// Extension type reserved by MessagePack for timestamps.
const TIMESTAMP_EXT: i8 = -1;

/// A MessagePack body converted to JSON.
pub struct MessagePackBody {
    pub value: Value,
    /// Indices of top-level array elements whose `time` field was a timestamp
    /// extension rather than a string.
    pub ext_times: Vec<usize>,
}

/// Decodes one MessagePack value from `reader`.
///
/// Binary values become base64 strings. Timestamp extensions become RFC 3339
/// strings, other extensions an object holding their type and base64 payload.
/// Map keys that are not strings are written out as JSON text.
pub fn from_read<R: Read>(reader: R) -> Result<MessagePackBody, ProxyError> {
    let decoded: Decoded = rmp_serde::from_read(reader)?;
    Ok(MessagePackBody {
        value: decoded.value,
        ext_times: decoded.ext_times,
    })
}

#[derive(Default)]
struct Decoded {
    value: Value,
    is_ext_timestamp: bool,
    // maps: the `time` entry came from a timestamp extension
    ext_time: bool,
    // arrays: which elements have such a `time` entry
    ext_times: Vec<usize>,
}

impl From<Value> for Decoded {
    fn from(value: Value) -> Self {
        Decoded {
            value,
            ..Default::default()
        }
    }
}

impl<'de> Deserialize<'de> for Decoded {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DecodedVisitor)
    }
}

struct DecodedVisitor;

impl<'de> Visitor<'de> for DecodedVisitor {
    type Value = Decoded;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "any MessagePack value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Decoded, E> {
        Ok(Value::Bool(v).into())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Decoded, E> {
        Ok(Value::Number(v.into()).into())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Decoded, E> {
        Ok(Value::Number(v.into()).into())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Decoded, E> {
        Ok(Number::from_f64(v).map_or(Value::Null, Value::Number).into())
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Decoded, E> {
        Ok(Value::String(v.to_owned()).into())
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Decoded, E> {
        Ok(Value::String(v).into())
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Decoded, E> {
        Ok(Value::String(STANDARD.encode(v)).into())
    }

    fn visit_unit<E: de::Error>(self) -> Result<Decoded, E> {
        Ok(Value::Null.into())
    }

    fn visit_none<E: de::Error>(self) -> Result<Decoded, E> {
        Ok(Value::Null.into())
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Decoded, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(self)
    }

    // rmp-serde hands extensions over as a newtype wrapping (type, payload).
    fn visit_newtype_struct<D>(self, deserializer: D) -> Result<Decoded, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ExtVisitor)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Decoded, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::new();
        let mut ext_times = Vec::new();
        while let Some(item) = seq.next_element::<Decoded>()? {
            if item.ext_time {
                ext_times.push(items.len());
            }
            items.push(item.value);
        }

        Ok(Decoded {
            value: Value::Array(items),
            ext_times,
            ..Default::default()
        })
    }

    fn visit_map<A>(self, mut map: A) -> Result<Decoded, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut object = Map::new();
        let mut ext_time = false;
        while let Some((key, value)) = map.next_entry::<Decoded, Decoded>()? {
            let key = match key.value {
                Value::String(key) => key,
                other => other.to_string(),
            };
            if key == BATCH_TIME_FIELD {
                ext_time = value.is_ext_timestamp;
            }
            object.insert(key, value.value);
        }

        Ok(Decoded {
            value: Value::Object(object),
            ext_time,
            ..Default::default()
        })
    }
}

struct ExtVisitor;

impl<'de> Visitor<'de> for ExtVisitor {
    type Value = Decoded;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a MessagePack extension")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Decoded, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let kind: i8 = seq
            .next_element()?
            .ok_or_else(|| <A::Error as de::Error>::invalid_length(0, &self))?;
        let Payload(data) = seq
            .next_element()?
            .ok_or_else(|| <A::Error as de::Error>::invalid_length(1, &self))?;

        if kind == TIMESTAMP_EXT {
            if let Some(time) = timestamp(&data) {
                return Ok(Decoded {
                    value: Value::String(time),
                    is_ext_timestamp: true,
                    ..Default::default()
                });
            }
        }

        Ok(json!({ "type": kind, "data": STANDARD.encode(&data) }).into())
    }
}

struct Payload(Vec<u8>);

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_bytes(PayloadVisitor)
    }
}

struct PayloadVisitor;

impl<'de> Visitor<'de> for PayloadVisitor {
    type Value = Payload;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "an extension payload")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Payload, E> {
        Ok(Payload(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Payload, E> {
        Ok(Payload(v))
    }
}

/// Timestamp extension payloads: 32-bit seconds, 30-bit nanoseconds packed
/// with 34-bit seconds, or 32-bit nanoseconds followed by 64-bit seconds.
fn timestamp(data: &[u8]) -> Option<String> {
    let (secs, nanos) = match data.len() {
        4 => (i64::from(u32::from_be_bytes(data.try_into().ok()?)), 0),
        8 => {
            let raw = u64::from_be_bytes(data.try_into().ok()?);
            ((raw & 0x3_ffff_ffff) as i64, (raw >> 34) as u32)
        }
        12 => {
            let nanos = u32::from_be_bytes(data[..4].try_into().ok()?);
            let secs = i64::from_be_bytes(data[4..].try_into().ok()?);
            (secs, nanos)
        }
        _ => return None,
    };

    DateTime::from_timestamp(secs, nanos)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}
