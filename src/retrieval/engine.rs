use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::ResourceRegistry;
use crate::core::config::{AppConfig, RetrievalConfig, StorageConfig};
use crate::core::types::{FileFormat, Resource, ResourceId, ResourceKey, TimeRange};
use crate::observability::metrics as obs;
use crate::storage::cache::{BucketCache, CacheSet, RebuildReport};
use crate::storage::instance::{ResourceInstance, Sentinels};
use crate::storage::layout::DirectoryLayout;
use crate::storage::writer::DiskWriter;
use crate::storage::{FetchRequest, StorageBackend};

use super::locks::ResourceLocks;
use super::planner::{self, Segment};
use super::reconcile::{self, Slot};

// ---------------------------------------------------------------------------
// Retrieval outcome
// ---------------------------------------------------------------------------

/// Ordered result of one retrieval: one instance per bucket, real or
/// placeholder.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub instances: Vec<Arc<ResourceInstance>>,
    /// Gaps whose backend request failed. Their buckets hold uncached
    /// placeholders.
    pub failed_gaps: usize,
    /// Set when cancellation stopped gaps from being requested.
    pub cancelled: bool,
}

impl RetrievalOutcome {
    fn extend(&mut self, other: RetrievalOutcome) {
        self.instances.extend(other.instances);
        self.failed_gaps += other.failed_gaps;
        self.cancelled |= other.cancelled;
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Retrieval engine
// ---------------------------------------------------------------------------

/// Serves time ranges of a resource from the bucket caches, fetching,
/// persisting and caching whatever is missing or stale.
///
/// Camera, map-loop and station retrieval share one algorithm; the
/// resource kind only picks the bucket width, the cache and the payload.
pub struct RetrievalEngine<B: StorageBackend> {
    backend: Arc<B>,
    registry: Arc<ResourceRegistry>,
    caches: Arc<CacheSet>,
    writer: DiskWriter,
    locks: Arc<ResourceLocks>,
    sentinels: RwLock<Sentinels>,
    storage: StorageConfig,
    retrieval: RetrievalConfig,
    shutdown: CancellationToken,
}

impl<B: StorageBackend> RetrievalEngine<B> {
    pub fn new(backend: Arc<B>, registry: Arc<ResourceRegistry>, config: &AppConfig) -> Self {
        Self {
            backend,
            registry,
            caches: Arc::new(CacheSet::new()),
            writer: DiskWriter::new(DirectoryLayout::from_config(&config.storage)),
            locks: Arc::new(ResourceLocks::new()),
            sentinels: RwLock::new(Sentinels::default()),
            storage: config.storage.clone(),
            retrieval: config.retrieval.clone(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Load the no-data clips, create the directory tree and rebuild every
    /// cache from disk. Calling it again re-initialises from scratch.
    pub async fn init(&self) -> std::io::Result<RebuildReport> {
        let sentinels = Sentinels::load(&self.storage.no_data_avi, &self.storage.no_data_mp4).await;
        *self.sentinels.write().unwrap_or_else(|e| e.into_inner()) = sentinels;

        self.writer.layout().ensure_dirs().await?;

        let ids = self.registry.list(None).into_iter().map(|r| r.id).collect();
        let _guards = self.locks.lock_all(ids).await;
        let report = self.caches.rebuild_all(&self.registry, &self.writer).await;
        info!(
            loaded = report.loaded,
            skipped = report.skipped,
            deleted = report.deleted,
            "retrieval engine initialised"
        );
        Ok(report)
    }

    /// Stop starting new gap requests. In-flight requests finish.
    pub fn shutdown(&self) {
        info!("retrieval engine shutting down");
        self.shutdown.cancel();
    }

    pub fn caches(&self) -> &Arc<CacheSet> {
        &self.caches
    }

    pub fn locks(&self) -> Arc<ResourceLocks> {
        self.locks.clone()
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn layout(&self) -> &DirectoryLayout {
        self.writer.layout()
    }

    /// Retrieve `range` of a resource as of now.
    pub async fn retrieve(&self, resource_id: ResourceId, range: TimeRange, cancel: &CancellationToken) -> RetrievalOutcome {
        self.retrieve_at(resource_id, range, Utc::now(), cancel).await
    }

    /// Retrieve `range` of a resource, evaluating currency against `now`.
    ///
    /// Video resources run once per enabled video format; AVI results come
    /// before MP4 results. An unknown resource or an empty range yields an
    /// empty outcome.
    pub async fn retrieve_at(
        &self,
        resource_id: ResourceId,
        range: TimeRange,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> RetrievalOutcome {
        let resource = match self.registry.resolve(resource_id) {
            Ok(resource) => resource,
            Err(e) => {
                debug!(error = %e, "retrieval for unknown resource");
                return RetrievalOutcome::default();
            }
        };
        if range.is_empty() {
            return RetrievalOutcome::default();
        }

        let _guard = self.locks.lock(resource.id).await;
        debug!(resource_id = %resource.id, kind = %resource.kind, %range, "retrieving");

        if resource.is_video() {
            let mut outcome = RetrievalOutcome::default();
            for format in FileFormat::VIDEO {
                if self.retrieval.video_formats.contains(&format) {
                    outcome.extend(self.retrieve_format(&resource, format, &range, now, cancel).await);
                }
            }
            outcome
        } else {
            self.retrieve_format(&resource, resource.station_format, &range, now, cancel)
                .await
        }
    }

    async fn retrieve_format(
        &self,
        resource: &Resource,
        format: FileFormat,
        range: &TimeRange,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> RetrievalOutcome {
        let cache = self.caches.for_format(format);
        let sentinel = self.sentinel(format);
        let mut outcome = RetrievalOutcome::default();

        for segment in planner::plan(resource, range, cache, now) {
            match segment {
                Segment::Hit(key) => {
                    let instance = cache.get(&key).unwrap_or_else(|| sentinel.clone());
                    outcome.instances.push(instance);
                }
                Segment::Gap { buckets } => {
                    if cancel.is_cancelled() || self.shutdown.is_cancelled() {
                        outcome.cancelled = true;
                        outcome
                            .instances
                            .extend(buckets.iter().map(|_| sentinel.clone()));
                        continue;
                    }
                    self.fill_gap(resource, format, cache, &buckets, now, &mut outcome)
                        .await;
                }
            }
        }

        if outcome.cancelled {
            info!(resource_id = %resource.id, %format, "retrieval cancelled before all gaps were requested");
        }
        outcome
    }

    /// Request one gap, align the response with its buckets, then persist
    /// and cache every bucket.
    async fn fill_gap(
        &self,
        resource: &Resource,
        format: FileFormat,
        cache: &BucketCache,
        buckets: &[DateTime<Utc>],
        now: DateTime<Utc>,
        outcome: &mut RetrievalOutcome,
    ) {
        let Some(range) = planner::gap_range(resource, buckets) else {
            return;
        };
        let sentinel = self.sentinel(format);
        let request = FetchRequest {
            resource_id: resource.id,
            format,
            range,
            is_video: resource.is_video(),
        };

        obs::inc_gaps_requested(resource.kind.as_str());
        let started = Instant::now();
        let result = self.backend.fetch(&request).await;
        obs::record_backend_fetch_duration(resource.kind.as_str(), started);

        let returned = match result {
            Ok(returned) => returned,
            Err(e) => {
                warn!(resource_id = %resource.id, %format, %range, error = %e, "backend request failed");
                obs::inc_backend_failures(resource.kind.as_str());
                outcome.failed_gaps += 1;
                outcome
                    .instances
                    .extend(buckets.iter().map(|_| sentinel.clone()));
                return;
            }
        };
        debug!(
            resource_id = %resource.id,
            %format,
            buckets = buckets.len(),
            returned = returned.len(),
            "gap response received"
        );

        let slots = reconcile::reconcile(resource, buckets, returned, self.retrieval.alignment_tolerance());
        let mut sentinel_fills = 0usize;
        for (&bucket, slot) in buckets.iter().zip(slots) {
            let key = ResourceKey::new(resource.id, bucket);
            let bucket_end = resource.bucket_width().bucket_end(bucket, resource.time_zone);
            let observed_until = now.min(bucket_end);

            match slot {
                Slot::Filled(mut instance) => {
                    // Keyed, named and rehydrated under the bucket it filled.
                    instance.start = bucket;
                    self.store_filled(resource, cache, key, instance, now, outcome)
                        .await;
                }
                Slot::Missing => {
                    cache.put(key, sentinel.clone(), observed_until);
                    outcome.instances.push(sentinel.clone());
                    sentinel_fills += 1;
                }
            }
        }
        obs::inc_sentinel_fills(resource.kind.as_str(), sentinel_fills);
    }

    /// Persist a filled bucket and cache it. If the write fails the
    /// instance is still returned, but left out of the cache so cache and
    /// disk never disagree.
    async fn store_filled(
        &self,
        resource: &Resource,
        cache: &BucketCache,
        key: ResourceKey,
        instance: ResourceInstance,
        now: DateTime<Utc>,
        outcome: &mut RetrievalOutcome,
    ) {
        match self.writer.persist(instance.clone(), resource, now).await {
            Ok(written) => {
                let bucket_end = resource
                    .bucket_width()
                    .bucket_end(key.bucket_start, resource.time_zone);
                let covered_until = written.end.max(now.min(bucket_end));
                let written = Arc::new(written);
                cache.put(key, written.clone(), covered_until);
                outcome.instances.push(written);
            }
            Err(e) => {
                warn!(%key, error = %e, "failed to persist bucket, serving it uncached");
                obs::inc_disk_write_failures(resource.kind.as_str());
                outcome.instances.push(Arc::new(instance));
            }
        }
    }

    fn sentinel(&self, format: FileFormat) -> Arc<ResourceInstance> {
        self.sentinels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .for_format(format)
    }
}
