use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};

use crate::catalog::ResourceRegistry;
use crate::core::types::{FileFormat, Resource, ResourceId, ResourceKey, ResourceKind};
use crate::observability::metrics as obs;

use super::codec::FileName;
use super::instance::ResourceInstance;
use super::writer::{self, DiskWriter};

// ---------------------------------------------------------------------------
// Bucket cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CacheEntry {
    instance: Arc<ResourceInstance>,
    /// Instant up to which the entry is known to describe its bucket.
    covered_until: DateTime<Utc>,
}

/// Ordered `ResourceKey -> ResourceInstance` map for one payload family.
///
/// Entries are only ever replaced whole. Checking currency never mutates
/// the map; a stale entry stays until the next gap fill overwrites it.
pub struct BucketCache {
    name: &'static str,
    entries: Mutex<BTreeMap<ResourceKey, CacheEntry>>,
}

/// What a rebuild did with the files it found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub loaded: usize,
    pub skipped: usize,
    pub deleted: usize,
}

impl BucketCache {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self, key: &ResourceKey) -> Option<Arc<ResourceInstance>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).map(|e| e.instance.clone())
    }

    /// Insert or replace the entry for `key`.
    pub fn put(&self, key: ResourceKey, instance: Arc<ResourceInstance>, covered_until: DateTime<Utc>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key,
            CacheEntry {
                instance,
                covered_until,
            },
        );
        obs::set_cache_entries(self.name, entries.len());
        trace!(cache = self.name, %key, "cache entry stored");
    }

    /// Whether the entry for `key` can be served without a re-fetch.
    ///
    /// Current iff `covered_until + frequency > min(now, bucket end)`, with
    /// the bucket end taken in the resource's own zone. An absent key, or a
    /// key that belongs to another resource, is never current.
    pub fn is_current(&self, key: &ResourceKey, resource: &Resource, now: DateTime<Utc>) -> bool {
        if key.resource_id != resource.id {
            return false;
        }
        let covered_until = {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            match entries.get(key) {
                Some(entry) => entry.covered_until,
                None => return false,
            }
        };
        let bucket_end = resource
            .bucket_width()
            .bucket_end(key.bucket_start, resource.time_zone);
        covered_until + resource.frequency > now.min(bucket_end)
    }

    /// Keys held for one resource, in order.
    pub fn keys_for(&self, resource_id: ResourceId) -> Vec<ResourceKey> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .keys()
            .filter(|k| k.resource_id == resource_id)
            .copied()
            .collect()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clear();
        obs::set_cache_entries(self.name, 0);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear the cache and repopulate it from files previously written to
    /// `dirs`.
    ///
    /// Only files whose format passes `accepts` are considered. Files of
    /// resources missing from the catalog are deleted best-effort (station
    /// files together with their clean derivative). Unreadable or
    /// malformed files are logged and skipped.
    pub async fn rebuild_from_disk(
        &self,
        dirs: &[&Path],
        accepts: impl Fn(FileFormat) -> bool,
        registry: &ResourceRegistry,
        disk: &DiskWriter,
    ) -> RebuildReport {
        self.clear();
        let mut report = RebuildReport::default();

        for dir in dirs {
            for path in writer::list_files(dir).await {
                let name = match FileName::decode_path(&path) {
                    Ok(name) => name,
                    Err(e) => {
                        if has_accepted_extension(&path, &accepts) {
                            warn!(cache = self.name, error = %e, "skipping malformed bucket file");
                            report.skipped += 1;
                        }
                        continue;
                    }
                };
                if !accepts(name.format) {
                    continue;
                }

                let Some(resource) = registry.get(name.resource_id) else {
                    self.delete_dead(&path, name.format, disk).await;
                    report.deleted += 1;
                    continue;
                };

                let instance = match disk.read_back(&path, &resource).await {
                    Ok(instance) => instance,
                    Err(e) => {
                        warn!(cache = self.name, path = %path.display(), error = %e, "skipping unreadable bucket file");
                        report.skipped += 1;
                        continue;
                    }
                };

                self.insert_if_newer(ResourceKey::new(resource.id, instance.start), instance);
                report.loaded += 1;
            }
        }

        let len = self.len();
        obs::set_cache_entries(self.name, len);
        obs::inc_files_rehydrated(self.name, report.loaded);
        info!(
            cache = self.name,
            entries = len,
            loaded = report.loaded,
            skipped = report.skipped,
            deleted = report.deleted,
            "cache rebuilt from disk"
        );
        report
    }

    /// Two files for one bucket keep the one covering more of it.
    fn insert_if_newer(&self, key: ResourceKey, instance: ResourceInstance) {
        let covered_until = instance.end;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let newer = entries
            .get(&key)
            .map(|existing| covered_until > existing.covered_until)
            .unwrap_or(true);
        if newer {
            entries.insert(
                key,
                CacheEntry {
                    instance: Arc::new(instance),
                    covered_until,
                },
            );
        }
    }

    async fn delete_dead(&self, path: &Path, format: FileFormat, disk: &DiskWriter) {
        debug!(cache = self.name, path = %path.display(), "deleting file of removed resource");
        let deleted = if format.is_video() {
            writer::remove_best_effort(path).await
        } else {
            writer::delete_with_clean(path, &disk.layout().clean_subdir).await
        };
        if deleted {
            obs::inc_files_deleted("dead_resource", 1);
        }
    }
}

fn has_accepted_extension(path: &Path, accepts: &impl Fn(FileFormat) -> bool) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(FileFormat::from_extension)
        .map(accepts)
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// The three caches
// ---------------------------------------------------------------------------

/// One cache per payload family: AVI video, MP4 video and station days.
pub struct CacheSet {
    pub avi: BucketCache,
    pub mp4: BucketCache,
    pub station: BucketCache,
}

impl CacheSet {
    pub fn new() -> Self {
        Self {
            avi: BucketCache::new("avi"),
            mp4: BucketCache::new("mp4"),
            station: BucketCache::new("station"),
        }
    }

    pub fn for_format(&self, format: FileFormat) -> &BucketCache {
        match format {
            FileFormat::Avi => &self.avi,
            FileFormat::Mp4 => &self.mp4,
            _ => &self.station,
        }
    }

    /// Rebuild all three caches from the directories in the writer's layout.
    pub async fn rebuild_all(&self, registry: &ResourceRegistry, disk: &DiskWriter) -> RebuildReport {
        let layout = disk.layout().clone();
        let video_dirs = layout.video_dirs();
        let station_dirs = [layout.dir_for(ResourceKind::WeatherStation)];

        let mut total = RebuildReport::default();
        for report in [
            self.avi
                .rebuild_from_disk(&video_dirs, |f| f == FileFormat::Avi, registry, disk)
                .await,
            self.mp4
                .rebuild_from_disk(&video_dirs, |f| f == FileFormat::Mp4, registry, disk)
                .await,
            self.station
                .rebuild_from_disk(&station_dirs, |f| !f.is_video(), registry, disk)
                .await,
        ] {
            total.loaded += report.loaded;
            total.skipped += report.skipped;
            total.deleted += report.deleted;
        }
        total
    }

    pub fn clear(&self) {
        self.avi.clear();
        self.mp4.clear();
        self.station.clear();
    }
}

impl Default for CacheSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::{Duration, TimeZone};

    use crate::catalog::tests::resource;
    use crate::storage::codec::clean_path;
    use crate::storage::instance::{Content, StationTable};
    use crate::storage::layout::DirectoryLayout;

    fn clip(id: i32, start: DateTime<Utc>, format: FileFormat) -> ResourceInstance {
        ResourceInstance {
            resource_id: ResourceId::new(id),
            kind: None,
            format,
            start,
            end: start + Duration::hours(1) - Duration::milliseconds(1),
            label: format!("cam{id}"),
            stamped_at: start,
            path: None,
            content: Content::Video(Bytes::from_static(b"frames")),
        }
    }

    fn day(id: i32, start: DateTime<Utc>) -> ResourceInstance {
        ResourceInstance {
            resource_id: ResourceId::new(id),
            kind: None,
            format: FileFormat::Csv,
            start,
            end: start,
            label: format!("station{id}"),
            stamped_at: start,
            path: None,
            content: Content::Station(StationTable {
                header: vec!["t".into()],
                rows: vec![vec!["1".into()]],
            }),
        }
    }

    #[test]
    fn test_absent_key_is_not_current() {
        let cache = BucketCache::new("avi");
        let camera = resource(7, ResourceKind::WeatherCamera);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(!cache.is_current(&ResourceKey::new(camera.id, t0), &camera, t0));
    }

    #[test]
    fn test_completed_bucket_is_current() {
        let cache = BucketCache::new("avi");
        let camera = resource(7, ResourceKind::WeatherCamera);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let key = ResourceKey::new(camera.id, t0);
        let instance = clip(7, t0, FileFormat::Avi);
        let end = instance.end;
        cache.put(key, Arc::new(instance), end);

        assert!(cache.is_current(&key, &camera, t0 + Duration::days(30)));
    }

    #[test]
    fn test_in_progress_bucket_goes_stale_after_frequency() {
        let cache = BucketCache::new("avi");
        let camera = resource(7, ResourceKind::WeatherCamera);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let key = ResourceKey::new(camera.id, t0);
        let covered = t0 + Duration::minutes(20);
        cache.put(key, Arc::new(clip(7, t0, FileFormat::Avi)), covered);

        assert!(cache.is_current(&key, &camera, covered + Duration::minutes(4)));
        assert!(!cache.is_current(&key, &camera, covered + Duration::minutes(5)));
        // Currency check never evicts.
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn test_key_of_other_resource_is_not_current() {
        let cache = BucketCache::new("avi");
        let camera = resource(7, ResourceKind::WeatherCamera);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let key = ResourceKey::new(ResourceId::new(8), t0);
        cache.put(key, Arc::new(clip(8, t0, FileFormat::Avi)), t0 + Duration::hours(1));
        assert!(!cache.is_current(&key, &camera, t0 + Duration::days(1)));
    }

    #[test]
    fn test_station_currency_uses_resource_zone() {
        // Day of 2024-01-01 in Tokyo ends at 15:00 UTC, long before it ends
        // in any American zone.
        let cache = BucketCache::new("station");
        let mut station = resource(3, ResourceKind::WeatherStation);
        station.time_zone = chrono_tz::Asia::Tokyo;
        let start = Utc.with_ymd_and_hms(2023, 12, 31, 15, 0, 0).unwrap();
        let end_of_day = start + Duration::days(1) - Duration::milliseconds(1);
        let key = ResourceKey::new(station.id, start);
        cache.put(key, Arc::new(day(3, start)), end_of_day);

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 18, 0, 0).unwrap();
        assert!(cache.is_current(&key, &station, now));
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = DiskWriter::new(DirectoryLayout::under(tmp.path()));
        let registry = ResourceRegistry::new();
        let camera = resource(7, ResourceKind::WeatherCamera);
        let station = resource(3, ResourceKind::WeatherStation);
        registry.register(camera.clone());
        registry.register(station.clone());
        let caches = CacheSet::new();

        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = t0 + Duration::days(3);
        for h in 0..3 {
            let written = writer
                .persist(clip(7, t0 + Duration::hours(h), FileFormat::Mp4), &camera, now)
                .await
                .unwrap();
            let end = written.end;
            caches
                .mp4
                .put(ResourceKey::new(camera.id, written.start), Arc::new(written), end);
        }
        let written = writer.persist(day(3, t0), &station, now).await.unwrap();
        let end = written.end;
        caches
            .station
            .put(ResourceKey::new(station.id, written.start), Arc::new(written), end);

        let mp4_before = caches.mp4.keys_for(camera.id);
        let station_before = caches.station.keys_for(station.id);

        caches.clear();
        let report = caches.rebuild_all(&registry, &writer).await;

        assert_eq!(report.loaded, 4);
        assert_eq!(caches.mp4.keys_for(camera.id), mp4_before);
        assert_eq!(caches.station.keys_for(station.id), station_before);
        assert!(caches.avi.is_empty());
        for key in &mp4_before {
            let instance = caches.mp4.get(key).unwrap();
            assert_eq!(instance.start, key.bucket_start);
            assert!(caches.mp4.is_current(key, &camera, now));
        }
    }

    #[tokio::test]
    async fn test_rebuild_deletes_files_of_removed_resources() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = DiskWriter::new(DirectoryLayout::under(tmp.path()));
        let registry = ResourceRegistry::new();
        let station = resource(3, ResourceKind::WeatherStation);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let written = writer.persist(day(3, t0), &station, t0 + Duration::days(2)).await.unwrap();
        let raw = written.path.unwrap();
        let clean = clean_path(&raw, &writer.layout().clean_subdir);
        tokio::fs::create_dir_all(clean.parent().unwrap()).await.unwrap();
        tokio::fs::write(&clean, "t\n1\n").await.unwrap();

        let caches = CacheSet::new();
        let report = caches.rebuild_all(&registry, &writer).await;

        assert_eq!(report.deleted, 1);
        assert!(!raw.exists());
        assert!(!clean.exists());
        assert!(caches.station.is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_skips_malformed_files() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = DiskWriter::new(DirectoryLayout::under(tmp.path()));
        let registry = ResourceRegistry::new();
        registry.register(resource(7, ResourceKind::WeatherCamera));
        let dir = writer.layout().camera_dir.clone();
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("garbage.avi"), b"x").await.unwrap();
        tokio::fs::write(dir.join("notes.md"), b"x").await.unwrap();

        let cache = BucketCache::new("avi");
        let report = cache
            .rebuild_from_disk(&[dir.as_path()], |f| f == FileFormat::Avi, &registry, &writer)
            .await;

        assert_eq!(report, RebuildReport { loaded: 0, skipped: 1, deleted: 0 });
        assert!(dir.join("garbage.avi").exists());
    }
}
