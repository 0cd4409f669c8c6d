//! Typed attribute values.
//!
//! Attribute values follow OTLP `AnyValue` semantics: string, int64, double,
//! bool, bytes, homogeneous-or-not arrays, and nested key/value maps. Maps
//! are kept sorted (`BTreeMap`) so that content hashes and encoded frames are
//! deterministic for logically identical records.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Sorted attribute map, used for resources, spans, logs, and data points.
pub type AttrMap = BTreeMap<String, AttrValue>;

/// A typed OTLP attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Array(Vec<AttrValue>),
    Map(Vec<(String, AttrValue)>),
}

impl AttrValue {
    /// Borrow the string payload, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value for equality-style filter comparisons.
    ///
    /// Query parameters arrive as strings (`resource.service.name=cart`), so
    /// filters compare against this canonical text form.
    pub fn to_filter_string(&self) -> String {
        match self {
            AttrValue::Str(s) => s.clone(),
            AttrValue::Int(i) => i.to_string(),
            AttrValue::Double(d) => d.to_string(),
            AttrValue::Bool(b) => b.to_string(),
            AttrValue::Bytes(b) => hex::encode(b),
            AttrValue::Array(_) | AttrValue::Map(_) => {
                serde_json::to_string(&self.to_json()).unwrap_or_default()
            }
        }
    }

    /// Convert into the plain JSON shape the query API exposes: strings as
    /// strings, numbers as numbers, bytes as hex, arrays and maps recursed.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttrValue::Str(s) => serde_json::Value::String(s.clone()),
            AttrValue::Int(i) => serde_json::Value::from(*i),
            AttrValue::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            AttrValue::Bool(b) => serde_json::Value::Bool(*b),
            AttrValue::Bytes(b) => serde_json::Value::String(hex::encode(b)),
            AttrValue::Array(items) => {
                serde_json::Value::Array(items.iter().map(AttrValue::to_json).collect())
            }
            AttrValue::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Feed a canonical byte form of this value into a hasher.
    fn hash_into(&self, hasher: &mut Sha256) {
        match self {
            AttrValue::Str(s) => {
                hasher.update([0u8]);
                hasher.update(s.as_bytes());
            }
            AttrValue::Int(i) => {
                hasher.update([1u8]);
                hasher.update(i.to_be_bytes());
            }
            AttrValue::Double(d) => {
                hasher.update([2u8]);
                hasher.update(d.to_be_bytes());
            }
            AttrValue::Bool(b) => {
                hasher.update([3u8, u8::from(*b)]);
            }
            AttrValue::Bytes(b) => {
                hasher.update([4u8]);
                hasher.update(b);
            }
            AttrValue::Array(items) => {
                hasher.update([5u8]);
                for item in items {
                    item.hash_into(hasher);
                }
            }
            AttrValue::Map(entries) => {
                hasher.update([6u8]);
                for (k, v) in entries {
                    hasher.update(k.as_bytes());
                    v.hash_into(hasher);
                }
            }
        }
    }
}

/// Render a whole attribute map as a JSON object.
pub fn attrs_to_json(attrs: &AttrMap) -> serde_json::Value {
    serde_json::Value::Object(attrs.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}

/// Stable 64-bit fingerprint over a sorted attribute map.
///
/// Used both for resource interning refs and for metric series identity.
/// The map is already sorted, so iterating it yields a canonical order; the
/// first eight bytes of the SHA-256 digest form the fingerprint.
pub fn fingerprint_attributes(attrs: &AttrMap) -> u64 {
    let mut hasher = Sha256::new();
    for (key, value) in attrs {
        hasher.update(key.as_bytes());
        hasher.update([0xff]);
        value.hash_into(&mut hasher);
    }
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().expect("digest is at least 8 bytes"))
}
