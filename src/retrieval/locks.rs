use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core::types::ResourceId;

/// One async mutex per resource.
///
/// Retrievals hold a resource's lock for the whole plan-fetch-fill cycle so
/// two callers never detect and fetch the same gap. The retention sweeper
/// takes the same lock before deleting that resource's files.
#[derive(Default)]
pub struct ResourceLocks {
    locks: DashMap<ResourceId, Arc<Mutex<()>>>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, resource_id: ResourceId) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(resource_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Take the locks of several resources in id order.
    pub async fn lock_all(&self, mut resource_ids: Vec<ResourceId>) -> Vec<OwnedMutexGuard<()>> {
        resource_ids.sort();
        resource_ids.dedup();
        let mut guards = Vec::with_capacity(resource_ids.len());
        for id in resource_ids {
            guards.push(self.lock(id).await);
        }
        guards
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_resource_is_serialized() {
        let locks = Arc::new(ResourceLocks::new());
        let guard = locks.lock(ResourceId::new(1)).await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.lock(ResourceId::new(1)).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_resources_do_not_block() {
        let locks = ResourceLocks::new();
        let _a = locks.lock(ResourceId::new(1)).await;
        let _b = tokio::time::timeout(Duration::from_millis(100), locks.lock(ResourceId::new(2)))
            .await
            .unwrap();
    }
}
