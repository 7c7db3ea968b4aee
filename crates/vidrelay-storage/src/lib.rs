//! vidrelay storage library
//!
//! The sink side of a transfer: the [`ObjectSink`] abstraction over an
//! S3-compatible store, the multipart session coordinator, and the
//! [`ChunkWriter`]s the stream bridge pushes chunks into.
//!
//! # Destination key format
//!
//! Server-generated keys are `{prefix}/{uuid}.{ext}`. Keys must not be empty,
//! contain `..` or start with `/`; see the `keys` module.

pub mod coordinator;
pub mod factory;
pub mod keys;
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;
pub mod writer;

// Re-export commonly used types
pub use coordinator::{validate_part_sequence, MultipartCoordinator};
pub use factory::create_sink;
pub use keys::{destination_key_for, destination_key_for_filename, validate_key};
pub use memory::{MemorySink, SinkOp, StoredObject};
#[cfg(feature = "storage-s3")]
pub use s3::S3Sink;
pub use traits::{ObjectSink, SinkError, SinkResult};
pub use writer::{ChunkWriter, MultipartWriter, SingleShotWriter};
