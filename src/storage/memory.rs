use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::core::error::BackendError;
use crate::core::types::{FileFormat, ResourceId};

use super::instance::ResourceInstance;
use super::{FetchRequest, StorageBackend};

// ---------------------------------------------------------------------------
// InMemoryBackend (for testing)
// ---------------------------------------------------------------------------

type Series = BTreeMap<DateTime<Utc>, ResourceInstance>;

/// In-memory storage server for unit and integration tests.
///
/// Instances are held per `(resource, format)` ordered by start time; a
/// fetch returns those starting inside the requested range. Every request
/// is recorded so tests can assert on gap coalescing.
#[derive(Default)]
pub struct InMemoryBackend {
    series: Arc<RwLock<HashMap<(ResourceId, FileFormat), Series>>>,
    requests: Mutex<Vec<FetchRequest>>,
    unavailable: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an instance available for download.
    pub async fn insert(&self, instance: ResourceInstance) {
        let mut series = self.series.write().await;
        series
            .entry((instance.resource_id, instance.format))
            .or_default()
            .insert(instance.start, instance);
    }

    /// Simulate the server being unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl StorageBackend for InMemoryBackend {
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<ResourceInstance>, BackendError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable {
                reason: "in-memory backend switched off".to_string(),
            });
        }

        if request.range.is_empty() {
            return Ok(Vec::new());
        }
        let series = self.series.read().await;
        let found = series
            .get(&(request.resource_id, request.format))
            .map(|s| {
                s.range(request.range.start..request.range.stop)
                    .map(|(_, instance)| instance.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(found)
    }
}
