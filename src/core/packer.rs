//! Secret value packing.
//!
//! Every KV value is stored inside a small self-describing envelope:
//!
//! ```text
//! SEQUENCE (0x30, DER length) {
//!     INTEGER (0x02) format_version = 1
//!     <MessagePack body>
//! }
//! ```
//!
//! The body is plain MessagePack, so scalar kinds (bool, signed, unsigned,
//! float, string, bytes) and composites (arrays, maps) survive a round-trip.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::core::constants::{PACKER_FORMAT_VERSION, TAG_INTEGER, TAG_SEQUENCE};
use crate::error::{Error, Result};

/// Dynamically typed unpacked value.
pub use rmpv::Value;

/// Pack any serializable value.
///
/// # Errors
///
/// Returns `Error::Pack` when the value contains a kind MessagePack cannot
/// represent.
pub fn pack<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec(value).map_err(|e| Error::Pack(e.to_string()))?;
    Ok(seal(&body))
}

/// Pack a dynamic value.
pub fn pack_value(value: &Value) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    rmpv::encode::write_value(&mut body, value).map_err(|e| Error::Pack(e.to_string()))?;
    Ok(seal(&body))
}

/// Unpack into a typed destination.
///
/// # Errors
///
/// Returns `Error::Unpack` on tag mismatch, unsupported version, truncated
/// payload or body decoding failure.
pub fn unpack<T: DeserializeOwned>(packed: &[u8]) -> Result<T> {
    let body = open(packed)?;
    rmp_serde::from_slice(body).map_err(|e| Error::Unpack(e.to_string()))
}

/// Unpack into a dynamic value, preserving its kind.
pub fn unpack_value(packed: &[u8]) -> Result<Value> {
    let mut body = open(packed)?;
    let value =
        rmpv::decode::read_value(&mut body).map_err(|e| Error::Unpack(e.to_string()))?;
    if !body.is_empty() {
        return Err(Error::Unpack(format!(
            "{} trailing bytes after body",
            body.len()
        )));
    }
    Ok(value)
}

/// Unpack into the natural JSON representation.
pub fn unpack_json(packed: &[u8]) -> Result<serde_json::Value> {
    unpack_value(packed).map(|v| value_to_json(&v))
}

/// Type tag describing a dynamic value's kind.
pub fn type_tag(value: &Value) -> &'static str {
    match value {
        Value::Nil => "nil",
        Value::Boolean(_) => "bool",
        Value::Integer(i) if i.is_i64() => "int64",
        Value::Integer(_) => "uint64",
        Value::F32(_) => "float32",
        Value::F64(_) => "float64",
        Value::String(_) => "string",
        Value::Binary(_) => "bytes",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Ext(..) => "ext",
    }
}

/// Type tag of an already packed value.
pub fn type_tag_of(packed: &[u8]) -> Result<String> {
    unpack_value(packed).map(|v| type_tag(&v).to_string())
}

/// Convert a dynamic value to JSON.
///
/// Binary payloads become base64 strings; non-string map keys are rendered
/// as JSON text.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    use base64::Engine as _;
    use serde_json::Value as Json;

    match value {
        Value::Nil => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Integer(i) => {
            if let Some(u) = i.as_u64() {
                Json::from(u)
            } else if let Some(s) = i.as_i64() {
                Json::from(s)
            } else {
                Json::Null
            }
        }
        Value::F32(f) => serde_json::Number::from_f64(f64::from(*f)).map_or(Json::Null, Json::Number),
        Value::F64(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::String(s) => match s.as_str() {
            Some(text) => Json::String(text.to_string()),
            None => Json::String(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        },
        Value::Binary(bytes) => {
            Json::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        Value::Array(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Map(entries) => {
            let mut map = serde_json::Map::new();
            for (k, v) in entries {
                let key = match k {
                    Value::String(s) => s.as_str().map(str::to_string),
                    _ => None,
                }
                .unwrap_or_else(|| value_to_json(k).to_string());
                map.insert(key, value_to_json(v));
            }
            Json::Object(map)
        }
        Value::Ext(_, bytes) => {
            Json::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    }
}

/// Convert JSON to a dynamic value.
pub fn json_to_value(json: &serde_json::Value) -> Value {
    use serde_json::Value as Json;

    match json {
        Json::Null => Value::Nil,
        Json::Bool(b) => Value::Boolean(*b),
        Json::Number(n) => {
            if let Some(u) = n.as_u64() {
                Value::from(u)
            } else if let Some(i) = n.as_i64() {
                Value::from(i)
            } else {
                Value::F64(n.as_f64().unwrap_or_default())
            }
        }
        Json::String(s) => Value::from(s.as_str()),
        Json::Array(items) => Value::Array(items.iter().map(json_to_value).collect()),
        Json::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (Value::from(k.as_str()), json_to_value(v)))
                .collect(),
        ),
    }
}

/// Convert JSON back to a dynamic value of the kind named by `tag`.
///
/// `bytes` expects base64 text and `float32`/`float64` force a float, so
/// the kinds JSON cannot express survive a projection round-trip. Other
/// tags, including an empty one, take the natural JSON kind. Nested
/// values always take their natural JSON kind.
///
/// # Errors
///
/// Returns `Error::Unpack` when the JSON value cannot hold the tagged kind.
pub fn json_to_tagged(json: &serde_json::Value, tag: &str) -> Result<Value> {
    use base64::Engine as _;
    use serde_json::Value as Json;

    match (tag, json) {
        ("bytes", Json::String(text)) => base64::engine::general_purpose::STANDARD
            .decode(text)
            .map(Value::Binary)
            .map_err(|e| Error::Unpack(format!("bytes value is not base64: {}", e))),
        ("float32", Json::Number(n)) => n
            .as_f64()
            .map(|f| Value::F32(f as f32))
            .ok_or_else(|| Error::Unpack(format!("{} is not a float32", n))),
        ("float64", Json::Number(n)) => n
            .as_f64()
            .map(Value::F64)
            .ok_or_else(|| Error::Unpack(format!("{} is not a float64", n))),
        ("bytes" | "float32" | "float64", other) => Err(Error::Unpack(format!(
            "JSON {} cannot hold a {} value",
            json_kind(other),
            tag
        ))),
        _ => Ok(json_to_value(json)),
    }
}

fn json_kind(json: &serde_json::Value) -> &'static str {
    use serde_json::Value as Json;

    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Wrap a body in the versioned envelope.
fn seal(body: &[u8]) -> Vec<u8> {
    let mut inner = Vec::with_capacity(body.len() + 3);
    inner.extend_from_slice(&[TAG_INTEGER, 0x01, PACKER_FORMAT_VERSION]);
    inner.extend_from_slice(body);

    let mut out = Vec::with_capacity(inner.len() + 6);
    out.push(TAG_SEQUENCE);
    write_length(&mut out, inner.len());
    out.extend_from_slice(&inner);

    trace!(body_len = body.len(), packed_len = out.len(), "packed value");
    out
}

/// Validate the envelope and return the body.
fn open(packed: &[u8]) -> Result<&[u8]> {
    let (&tag, rest) = packed
        .split_first()
        .ok_or_else(|| Error::Unpack("empty payload".into()))?;
    if tag != TAG_SEQUENCE {
        return Err(Error::Unpack(format!(
            "unexpected outer tag 0x{:02x}, expected sequence",
            tag
        )));
    }

    let (len, rest) = read_length(rest)?;
    if rest.len() < len {
        return Err(Error::Unpack(format!(
            "truncated payload: declared {} bytes, got {}",
            len,
            rest.len()
        )));
    }
    if rest.len() > len {
        return Err(Error::Unpack(format!(
            "{} trailing bytes after envelope",
            rest.len() - len
        )));
    }

    let inner = &rest[..len];
    match inner {
        [TAG_INTEGER, 0x01, version, body @ ..] => {
            if *version != PACKER_FORMAT_VERSION {
                return Err(Error::Unpack(format!(
                    "unsupported format version {}",
                    version
                )));
            }
            Ok(body)
        }
        [TAG_INTEGER, ..] => Err(Error::Unpack("malformed version integer".into())),
        _ => Err(Error::Unpack("missing version integer".into())),
    }
}

/// DER definite-length encoding.
fn write_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

fn read_length(input: &[u8]) -> Result<(usize, &[u8])> {
    let (&first, rest) = input
        .split_first()
        .ok_or_else(|| Error::Unpack("truncated payload: missing length".into()))?;
    if first < 0x80 {
        return Ok((usize::from(first), rest));
    }

    let count = usize::from(first & 0x7f);
    if count == 0 || count > std::mem::size_of::<usize>() {
        return Err(Error::Unpack(format!("invalid length prefix 0x{:02x}", first)));
    }
    if rest.len() < count {
        return Err(Error::Unpack("truncated payload: short length".into()));
    }
    let len = rest[..count]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
    Ok((len, &rest[count..]))
}
