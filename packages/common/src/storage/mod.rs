mod error;
mod hash;
mod traits;

pub mod filesystem;
#[cfg(feature = "object-storage")]
pub mod s3_store;

pub use error::StorageError;
pub use hash::ContentHash;
pub use traits::{BoxReader, IMMUTABLE_CACHE_CONTROL, ObjectMeta, ObjectStore, StoredObject};
