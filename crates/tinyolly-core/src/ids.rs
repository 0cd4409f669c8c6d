//! Telemetry identifiers.
//!
//! OTLP identifies a trace by 16 opaque bytes and a span by 8. Everywhere
//! outside the wire protocol they are rendered as lowercase hex, which is
//! also how they serialize in JSON responses and in stored frames.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A 16-byte trace identifier. An all-zero id is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(pub [u8; 16]);

/// An 8-byte span identifier. An all-zero id is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(pub [u8; 8]);

impl TraceId {
    /// Build a trace id from a raw byte slice, rejecting wrong lengths and
    /// the all-zero id.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 16 {
            return None;
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(bytes);
        if arr == [0u8; 16] {
            return None;
        }
        Some(Self(arr))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 16]
    }
}

impl SpanId {
    /// Build a span id from a raw byte slice, rejecting wrong lengths and
    /// the all-zero id.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 8 {
            return None;
        }
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        if arr == [0u8; 8] {
            return None;
        }
        Some(Self(arr))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 8]
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for TraceId {
    type Err = crate::TinyOllyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            return Err(crate::TinyOllyError::InvalidInput(format!(
                "trace id must be 32 hex chars, got {}",
                s.len()
            )));
        }
        let bytes = hex::decode(s)
            .map_err(|e| crate::TinyOllyError::InvalidInput(format!("bad trace id hex: {e}")))?;
        Self::from_bytes(&bytes)
            .ok_or_else(|| crate::TinyOllyError::InvalidInput("zero trace id".to_string()))
    }
}

impl FromStr for SpanId {
    type Err = crate::TinyOllyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 {
            return Err(crate::TinyOllyError::InvalidInput(format!(
                "span id must be 16 hex chars, got {}",
                s.len()
            )));
        }
        let bytes = hex::decode(s)
            .map_err(|e| crate::TinyOllyError::InvalidInput(format!("bad span id hex: {e}")))?;
        Self::from_bytes(&bytes)
            .ok_or_else(|| crate::TinyOllyError::InvalidInput("zero span id".to_string()))
    }
}

// Serialize as lowercase hex strings so the same derive works for JSON
// responses and for bincode frames.

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

struct HexVisitor<const N: usize>;

impl<'de, const N: usize> Visitor<'de> for HexVisitor<N> {
    type Value = [u8; N];

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a {}-char hex string", N * 2)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        let bytes = hex::decode(v).map_err(E::custom)?;
        let mut arr = [0u8; N];
        if bytes.len() != N {
            return Err(E::custom(format!("expected {N} bytes, got {}", bytes.len())));
        }
        arr.copy_from_slice(&bytes);
        Ok(arr)
    }
}

impl<'de> Deserialize<'de> for TraceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(HexVisitor::<16>).map(TraceId)
    }
}

impl<'de> Deserialize<'de> for SpanId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(HexVisitor::<8>).map(SpanId)
    }
}
