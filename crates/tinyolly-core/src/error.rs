//! Error taxonomy shared across all TinyOlly components.

use crate::record::MetricKind;

/// Core error type.
///
/// Each variant maps to one row of the error-handling contract: transport
/// layers translate these into HTTP or gRPC status codes, while counters on
/// `/api/stats` account for the locally-recovered ones.
#[derive(thiserror::Error, Debug)]
pub enum TinyOllyError {
    /// Malformed OTLP, bad JSON, or failed validation. The offending batch
    /// is dropped.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Attribute value outside the OTLP type schema. The attribute is
    /// dropped, the record kept.
    #[error("unsupported attribute type for key {0:?}")]
    UnsupportedAttrType(String),

    /// A metric re-registered under a different kind within the retention
    /// window.
    #[error("metric kind conflict for {name:?}: stored as {existing}, received {incoming}")]
    MetricKindConflict {
        name: String,
        existing: MetricKind,
        incoming: MetricKind,
    },

    /// Distinct-metric-name limit reached; the new name was dropped.
    #[error("metric cardinality limit reached ({limit})")]
    CardinalityExceeded { limit: usize },

    /// Store memory bound hit; ingress must apply backpressure.
    #[error("store capacity exceeded")]
    OutOfCapacity,

    /// Request exceeded the server-side deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Stored bytes failed to decode.
    #[error("corrupt frame: {0}")]
    CorruptFrame(String),

    /// Stored frame carried an unknown schema tag.
    #[error("unknown schema tag {0:#04x}")]
    SchemaMismatch(u8),

    #[error("not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TinyOllyError>;
