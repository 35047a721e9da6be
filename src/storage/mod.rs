pub mod cache;
pub mod cleanup;
pub mod codec;
pub mod instance;
pub mod layout;
pub mod memory;
pub mod writer;

use crate::core::error::BackendError;
use crate::core::types::{FileFormat, ResourceId, TimeRange};

use instance::ResourceInstance;

// ---------------------------------------------------------------------------
// StorageBackend trait
// ---------------------------------------------------------------------------

/// One batched download covering a contiguous run of buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub resource_id: ResourceId,
    pub format: FileFormat,
    pub range: TimeRange,
    pub is_video: bool,
}

/// Remote storage server holding the authoritative bucket payloads.
///
/// Implementations return instances ordered by start time, each stamped
/// with its own start and end. Returning fewer instances than buckets in
/// the request is normal and not an error. Tests use `InMemoryBackend`.
pub trait StorageBackend: Send + Sync {
    fn fetch(
        &self,
        request: &FetchRequest,
    ) -> impl std::future::Future<Output = Result<Vec<ResourceInstance>, BackendError>> + Send;
}
