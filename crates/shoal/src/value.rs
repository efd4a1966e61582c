// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

//! Dynamic value model.
//!
//! [`Value`] is the caller-side representation of anything that can be stored
//! in or fetched from the cluster. The transcoder converts between `Value`
//! and wire buffers; [`to_value`]/[`from_value`] bridge between `Value` and
//! caller types through serde.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_value::Value as SerdeValue;

/// A dynamically typed value.
///
/// Maps preserve insertion order and allow arbitrary keys; codecs that cannot
/// represent a particular shape (e.g. binary data in JSON) reject it at
/// conversion time instead of silently altering it.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Builds an integer value, preferring the signed variant when it fits.
    ///
    /// All decode paths funnel through this so that a value round-tripped
    /// through any codec compares equal to the original.
    pub fn from_u64(v: u64) -> Value {
        if let Ok(signed) = i64::try_from(v) {
            Value::Integer(signed)
        } else {
            Value::Unsigned(v)
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Unsigned(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Integer(v) => u64::try_from(*v).ok(),
            Value::Unsigned(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            Value::Unsigned(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Looks up a map entry by string key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Value {
        Value::Integer(v as i64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Value {
        Value::from_u64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Value {
        Value::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Value {
        Value::Array(v)
    }
}

/// Converts any serializable caller type into a [`Value`].
pub fn to_value<T: Serialize>(value: &T) -> Result<Value, String> {
    let dynamic =
        serde_value::to_value(value).map_err(|err| format!("value conversion error: {err}"))?;
    from_serde_value(dynamic)
}

/// Converts a [`Value`] back into a concrete caller type.
pub fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T, String> {
    rmpv::ext::from_value::<T>(to_msgpack(value))
        .map_err(|err| format!("value conversion error: {err}"))
}

fn from_serde_value(value: SerdeValue) -> Result<Value, String> {
    let out = match value {
        SerdeValue::Bool(v) => Value::Bool(v),
        SerdeValue::U8(v) => Value::Integer(v as i64),
        SerdeValue::U16(v) => Value::Integer(v as i64),
        SerdeValue::U32(v) => Value::Integer(v as i64),
        SerdeValue::U64(v) => Value::from_u64(v),
        SerdeValue::I8(v) => Value::Integer(v as i64),
        SerdeValue::I16(v) => Value::Integer(v as i64),
        SerdeValue::I32(v) => Value::Integer(v as i64),
        SerdeValue::I64(v) => Value::Integer(v),
        SerdeValue::F32(v) => Value::Float(v as f64),
        SerdeValue::F64(v) => Value::Float(v),
        SerdeValue::Char(c) => Value::Text(c.to_string()),
        SerdeValue::String(s) => Value::Text(s),
        SerdeValue::Unit => Value::Null,
        SerdeValue::Option(opt) => match opt {
            Some(inner) => from_serde_value(*inner)?,
            None => Value::Null,
        },
        SerdeValue::Newtype(inner) => from_serde_value(*inner)?,
        SerdeValue::Seq(items) => Value::Array(
            items
                .into_iter()
                .map(from_serde_value)
                .collect::<Result<_, _>>()?,
        ),
        SerdeValue::Map(map) => {
            let mut entries = Vec::with_capacity(map.len());
            for (k, v) in map {
                entries.push((from_serde_value(k)?, from_serde_value(v)?));
            }
            Value::Map(entries)
        }
        SerdeValue::Bytes(bytes) => Value::Bytes(bytes),
    };
    Ok(out)
}

/// Renders a [`Value`] as a JSON tree.
///
/// Binary data, non-string map keys, and non-finite floats have no JSON
/// representation and are rejected.
pub fn to_json(value: &Value) -> Result<serde_json::Value, String> {
    let out = match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(v) => serde_json::Value::Bool(*v),
        Value::Integer(v) => serde_json::Value::Number((*v).into()),
        Value::Unsigned(v) => serde_json::Value::Number((*v).into()),
        Value::Float(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .ok_or_else(|| format!("non-finite float {v} is not representable as JSON"))?,
        Value::Text(v) => serde_json::Value::String(v.clone()),
        Value::Bytes(_) => return Err("binary value is not representable as JSON".to_string()),
        Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(to_json).collect::<Result<_, _>>()?)
        }
        Value::Map(entries) => {
            let mut map = serde_json::Map::new();
            for (k, v) in entries {
                let key = k
                    .as_str()
                    .ok_or_else(|| "JSON map keys must be strings".to_string())?;
                map.insert(key.to_string(), to_json(v)?);
            }
            serde_json::Value::Object(map)
        }
    };
    Ok(out)
}

/// Rebuilds a [`Value`] from a JSON tree.
pub fn from_json(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(v) => Value::Bool(v),
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Value::Integer(v)
            } else if let Some(v) = n.as_u64() {
                Value::from_u64(v)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Text(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(from_json).collect())
        }
        serde_json::Value::Object(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (Value::Text(k), from_json(v)))
                .collect(),
        ),
    }
}

/// Renders a [`Value`] as an msgpack tree. Every value is representable.
pub fn to_msgpack(value: &Value) -> rmpv::Value {
    match value {
        Value::Null => rmpv::Value::Nil,
        Value::Bool(v) => rmpv::Value::Boolean(*v),
        Value::Integer(v) => rmpv::Value::Integer((*v).into()),
        Value::Unsigned(v) => rmpv::Value::Integer((*v).into()),
        Value::Float(v) => rmpv::Value::F64(*v),
        Value::Text(v) => rmpv::Value::String(v.clone().into()),
        Value::Bytes(v) => rmpv::Value::Binary(v.clone()),
        Value::Array(items) => rmpv::Value::Array(items.iter().map(to_msgpack).collect()),
        Value::Map(entries) => rmpv::Value::Map(
            entries
                .iter()
                .map(|(k, v)| (to_msgpack(k), to_msgpack(v)))
                .collect(),
        ),
    }
}

/// Rebuilds a [`Value`] from an msgpack tree.
pub fn from_msgpack(value: rmpv::Value) -> Result<Value, String> {
    let out = match value {
        rmpv::Value::Nil => Value::Null,
        rmpv::Value::Boolean(v) => Value::Bool(v),
        rmpv::Value::Integer(v) => {
            if let Some(signed) = v.as_i64() {
                Value::Integer(signed)
            } else if let Some(unsigned) = v.as_u64() {
                Value::from_u64(unsigned)
            } else {
                return Err("msgpack integer out of range".to_string());
            }
        }
        rmpv::Value::F32(v) => Value::Float(v as f64),
        rmpv::Value::F64(v) => Value::Float(v),
        rmpv::Value::String(s) => Value::Text(
            s.into_str()
                .ok_or_else(|| "msgpack string is not utf8".to_string())?,
        ),
        rmpv::Value::Binary(bytes) => Value::Bytes(bytes),
        rmpv::Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(from_msgpack)
                .collect::<Result<_, _>>()?,
        ),
        rmpv::Value::Map(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                out.push((from_msgpack(k)?, from_msgpack(v)?));
            }
            Value::Map(out)
        }
        rmpv::Value::Ext(tag, _) => {
            return Err(format!("unsupported msgpack extension type {tag}"));
        }
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
        tags: Vec<String>,
    }

    #[test]
    fn serializable_type_round_trips_through_value() {
        let doc = Doc {
            name: "reef".to_string(),
            count: 7,
            tags: vec!["a".to_string(), "b".to_string()],
        };
        let value = to_value(&doc).expect("to_value");
        assert_eq!(value.get("name").and_then(Value::as_str), Some("reef"));
        let back: Doc = from_value(&value).expect("from_value");
        assert_eq!(back, doc);
    }

    #[test]
    fn byte_payloads_survive_the_serde_bridge() {
        #[derive(Serialize)]
        struct Blob {
            #[serde(with = "serde_bytes")]
            data: Vec<u8>,
        }
        let value = to_value(&Blob {
            data: vec![0xde, 0xad],
        })
        .expect("to_value");
        assert_eq!(value.get("data").and_then(Value::as_bytes), Some(&[0xde, 0xad][..]));
    }

    #[test]
    fn json_tree_round_trip() {
        let value = Value::Map(vec![
            (Value::Text("n".into()), Value::Integer(3)),
            (
                Value::Text("items".into()),
                Value::Array(vec![Value::Bool(true), Value::Null]),
            ),
        ]);
        let json = to_json(&value).expect("to_json");
        let back = from_json(json);
        // serde_json sorts object keys; compare per-entry.
        assert_eq!(back.get("n"), Some(&Value::Integer(3)));
        assert_eq!(
            back.get("items"),
            Some(&Value::Array(vec![Value::Bool(true), Value::Null]))
        );
    }

    #[test]
    fn json_rejects_binary_and_non_string_keys() {
        assert!(to_json(&Value::Bytes(vec![1])).is_err());
        let keyed = Value::Map(vec![(Value::Integer(1), Value::Null)]);
        assert!(to_json(&keyed).is_err());
        assert!(to_json(&Value::Float(f64::NAN)).is_err());
    }

    #[test]
    fn msgpack_tree_round_trip_preserves_arbitrary_shapes() {
        let value = Value::Map(vec![
            (Value::Integer(1), Value::Bytes(vec![9, 9])),
            (Value::Text("f".into()), Value::Float(1.5)),
        ]);
        let back = from_msgpack(to_msgpack(&value)).expect("round trip");
        assert_eq!(back, value);
    }

    #[test]
    fn large_unsigned_values_stay_unsigned() {
        let big = u64::MAX - 1;
        assert_eq!(Value::from_u64(big), Value::Unsigned(big));
        assert_eq!(Value::from_u64(42), Value::Integer(42));
        let back = from_msgpack(to_msgpack(&Value::Unsigned(big))).expect("round trip");
        assert_eq!(back, Value::Unsigned(big));
    }
}
