//! Object bucket abstraction for content-addressed blobs.
//!
//! Backends are selected by DSN scheme (`file://`, `s3://`). Keys handed to
//! a bucket are already sharded (see [`keys`]); the logical CID never
//! changes.

pub mod factory;
pub mod keys;
pub mod local;
pub mod s3;
mod sniff;
pub mod traits;

pub use factory::open_bucket;
pub use keys::{shard_cid, unshard_key};
pub use local::LocalBucket;
pub use s3::S3Bucket;
pub use traits::{BlobAttributes, Bucket, StorageError, StorageResult};
