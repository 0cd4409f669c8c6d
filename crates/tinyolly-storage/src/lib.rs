//! Frame codec and embedded ephemeral store for TinyOlly.
//!
//! Records are encoded into schema-tagged, optionally ZSTD-compressed frames
//! ([`codec`]) and held in an in-process store ([`MemoryStore`]) that
//! enforces TTL-based retention, metric cardinality limits, and a memory
//! bound. One index structure exists per logical namespace, mirroring the
//! layout an external ordered-set server would use.

pub mod codec;
pub mod memory;

pub use codec::{decode, encode, Record};
pub use memory::{MemoryStore, StoreConfig};
