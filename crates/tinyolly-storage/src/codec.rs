//! Frame encoding for stored records.
//!
//! Every stored record becomes a self-describing frame:
//!
//! ```text
//! +--------+-------------+------------------+
//! | schema | compression | body             |
//! | 1 byte | 1 byte      | bincode [+ zstd] |
//! +--------+-------------+------------------+
//! ```
//!
//! The schema byte tags the record family so a frame can be decoded without
//! out-of-band context. Bodies larger than 512 bytes are compressed with
//! ZSTD level 3; smaller bodies are stored raw since the compressor overhead
//! outweighs the saving at that size.
//!
//! Encoding is deterministic for logically identical records: attribute maps
//! are `BTreeMap`s, so bincode sees a canonical field order.

use serde::{Deserialize, Serialize};
use tinyolly_core::{DataPoint, LogRecord, Result, SpanRecord, TinyOllyError};

// ---------------------------------------------------------------------------
// Schema & compression tags
// ---------------------------------------------------------------------------

const SCHEMA_SPAN: u8 = 0x01;
const SCHEMA_LOG: u8 = 0x02;
const SCHEMA_POINT: u8 = 0x03;

const COMPRESSION_NONE: u8 = 0x00;
const COMPRESSION_ZSTD: u8 = 0x01;

/// Bodies below this size are stored uncompressed.
const COMPRESSION_THRESHOLD: usize = 512;

/// ZSTD level used for frame bodies.
const ZSTD_LEVEL: i32 = 3;

// ---------------------------------------------------------------------------
// Record union
// ---------------------------------------------------------------------------

/// A storable record. The enum exists only at the codec boundary; indexes
/// know which family they hold and match accordingly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Span(SpanRecord),
    Log(LogRecord),
    Point(DataPoint),
}

impl Record {
    fn schema_tag(&self) -> u8 {
        match self {
            Record::Span(_) => SCHEMA_SPAN,
            Record::Log(_) => SCHEMA_LOG,
            Record::Point(_) => SCHEMA_POINT,
        }
    }
}

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

/// Encode a record into a frame.
pub fn encode(record: &Record) -> Result<Vec<u8>> {
    let body = match record {
        Record::Span(span) => bincode::serialize(span),
        Record::Log(log) => bincode::serialize(log),
        Record::Point(point) => bincode::serialize(point),
    }
    .map_err(|e| TinyOllyError::Internal(format!("encode: {e}")))?;

    let mut frame = Vec::with_capacity(body.len() + 2);
    frame.push(record.schema_tag());

    if body.len() > COMPRESSION_THRESHOLD {
        let compressed = zstd::encode_all(&body[..], ZSTD_LEVEL)
            .map_err(|e| TinyOllyError::Internal(format!("zstd encode: {e}")))?;
        frame.push(COMPRESSION_ZSTD);
        frame.extend_from_slice(&compressed);
    } else {
        frame.push(COMPRESSION_NONE);
        frame.extend_from_slice(&body);
    }

    Ok(frame)
}

/// Decode a frame back into a record.
///
/// # Errors
///
/// `CorruptFrame` when the frame is truncated or the body fails to
/// decompress/deserialize; `SchemaMismatch` when the schema tag is unknown.
pub fn decode(frame: &[u8]) -> Result<Record> {
    if frame.len() < 2 {
        return Err(TinyOllyError::CorruptFrame(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    }
    let schema = frame[0];
    let compression = frame[1];
    let payload = &frame[2..];

    let body: Vec<u8> = match compression {
        COMPRESSION_NONE => payload.to_vec(),
        COMPRESSION_ZSTD => zstd::decode_all(payload)
            .map_err(|e| TinyOllyError::CorruptFrame(format!("zstd decode: {e}")))?,
        other => {
            return Err(TinyOllyError::CorruptFrame(format!(
                "unknown compression marker {other:#04x}"
            )))
        }
    };

    match schema {
        SCHEMA_SPAN => bincode::deserialize(&body)
            .map(Record::Span)
            .map_err(|e| TinyOllyError::CorruptFrame(format!("span body: {e}"))),
        SCHEMA_LOG => bincode::deserialize(&body)
            .map(Record::Log)
            .map_err(|e| TinyOllyError::CorruptFrame(format!("log body: {e}"))),
        SCHEMA_POINT => bincode::deserialize(&body)
            .map(Record::Point)
            .map_err(|e| TinyOllyError::CorruptFrame(format!("point body: {e}"))),
        other => Err(TinyOllyError::SchemaMismatch(other)),
    }
}

/// Decode a frame expected to hold a span.
pub fn decode_span(frame: &[u8]) -> Result<SpanRecord> {
    match decode(frame)? {
        Record::Span(span) => Ok(span),
        other => Err(TinyOllyError::CorruptFrame(format!(
            "expected span frame, found {other:?}"
        ))),
    }
}

/// Decode a frame expected to hold a log record.
pub fn decode_log(frame: &[u8]) -> Result<LogRecord> {
    match decode(frame)? {
        Record::Log(log) => Ok(log),
        other => Err(TinyOllyError::CorruptFrame(format!(
            "expected log frame, found {other:?}"
        ))),
    }
}

/// Decode a frame expected to hold a data point.
pub fn decode_point(frame: &[u8]) -> Result<DataPoint> {
    match decode(frame)? {
        Record::Point(point) => Ok(point),
        other => Err(TinyOllyError::CorruptFrame(format!(
            "expected point frame, found {other:?}"
        ))),
    }
}
