//! TinyOlly server library.
//!
//! The binary in `main.rs` wires these modules together; they are exposed
//! as a library so integration tests can assemble the same servers
//! in-process.

pub mod aggregate;
pub mod api;
pub mod config;
pub mod grpc;
pub mod metrics;
pub mod normalize;
pub mod opamp;
pub mod opamp_proto;
pub mod otlp_http;
pub mod shutdown;
pub mod state;

pub use state::AppState;
