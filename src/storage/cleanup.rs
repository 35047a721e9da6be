use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::ResourceRegistry;
use crate::core::config::RetentionConfig;
use crate::core::time;
use crate::core::types::{FileFormat, Resource, ResourceId, ResourceKind};
use crate::observability::metrics as obs;
use crate::retrieval::locks::ResourceLocks;

use super::codec::FileName;
use super::layout::DirectoryLayout;
use super::writer;

// ---------------------------------------------------------------------------
// Retention sweeper
// ---------------------------------------------------------------------------

/// Totals from one sweep. `fully_successful` is false as soon as any single
/// deletion failed; failures never stop the rest of the sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub fully_successful: bool,
    pub video_deleted: usize,
    pub station_deleted: usize,
}

impl Default for SweepReport {
    fn default() -> Self {
        Self {
            fully_successful: true,
            video_deleted: 0,
            station_deleted: 0,
        }
    }
}

/// Prunes the on-disk bucket files by count and by day completeness.
///
/// Works purely from the directory listing and the filename encoding; the
/// in-memory caches are not touched. It takes the same per-resource locks
/// as retrieval before deleting a resource's files.
pub struct RetentionSweeper {
    layout: DirectoryLayout,
    registry: Arc<ResourceRegistry>,
    locks: Arc<ResourceLocks>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(
        layout: DirectoryLayout,
        registry: Arc<ResourceRegistry>,
        locks: Arc<ResourceLocks>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            layout,
            registry,
            locks,
            config,
        }
    }

    /// Sweep video and station files using the configured limits.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        self.sweep_with(self.config.keep_today, now).await
    }

    pub async fn sweep_with(&self, keep_today: bool, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let (deleted, ok) = self.sweep_video(self.config.max_video_files_to_keep).await;
        report.video_deleted = deleted;
        report.fully_successful &= ok;

        let (deleted, ok) = self
            .sweep_stations(self.config.max_station_days_to_keep, keep_today, now)
            .await;
        report.station_deleted = deleted;
        report.fully_successful &= ok;

        obs::inc_files_deleted("retention", report.video_deleted + report.station_deleted);
        if !report.fully_successful {
            obs::inc_sweep_failures();
        }
        info!(
            video_deleted = report.video_deleted,
            station_deleted = report.station_deleted,
            fully_successful = report.fully_successful,
            "retention sweep finished"
        );
        report
    }

    /// Keep the `keep` most recently modified files per video directory and
    /// format.
    async fn sweep_video(&self, keep: usize) -> (usize, bool) {
        let mut deleted = 0;
        let mut ok = true;

        for dir in self.layout.video_dirs() {
            let files = writer::list_files(dir).await;
            for format in FileFormat::VIDEO {
                let matching: Vec<PathBuf> = files
                    .iter()
                    .filter(|p| extension_format(p) == Some(format))
                    .cloned()
                    .collect();
                let doomed: Vec<PathBuf> = newest_first(matching).await.into_iter().skip(keep).collect();
                if doomed.is_empty() {
                    continue;
                }

                let ids = doomed
                    .iter()
                    .filter_map(|p| FileName::decode_path(p).ok())
                    .map(|n| n.resource_id)
                    .collect();
                let _guards = self.locks.lock_all(ids).await;
                for path in &doomed {
                    if writer::remove_best_effort(path).await {
                        deleted += 1;
                    } else {
                        ok = false;
                    }
                }
                debug!(dir = %dir.display(), %format, deleted = doomed.len(), "pruned video files");
            }
        }
        (deleted, ok)
    }

    /// Per station resource: delete unfinished days (today's is spared when
    /// `keep_today`), then keep the `keep` most recently modified complete
    /// days. Every raw deletion also removes its clean derivative.
    async fn sweep_stations(&self, keep: usize, keep_today: bool, now: DateTime<Utc>) -> (usize, bool) {
        let mut deleted = 0;
        let mut ok = true;
        let dir = self.layout.dir_for(ResourceKind::WeatherStation);
        let files = writer::list_files(dir).await;

        for resource in self.registry.list(Some(ResourceKind::WeatherStation)) {
            let _guard = self.locks.lock(resource.id).await;

            let mut complete = Vec::new();
            let mut doomed = Vec::new();
            for (path, name) in station_files(&files, resource.id) {
                match day_state(&name, &resource, now) {
                    DayState::Complete => complete.push(path),
                    DayState::InProgress if keep_today => {
                        debug!(path = %path.display(), "keeping today's station file");
                    }
                    DayState::InProgress | DayState::Partial => doomed.push(path),
                }
            }
            doomed.extend(newest_first(complete).await.into_iter().skip(keep));

            for path in &doomed {
                if writer::delete_with_clean(path, &self.layout.clean_subdir).await {
                    deleted += 1;
                } else {
                    ok = false;
                }
            }
            if !doomed.is_empty() {
                debug!(resource_id = %resource.id, deleted = doomed.len(), "pruned station files");
            }
        }
        (deleted, ok)
    }
}

enum DayState {
    /// The file covers its local day up to the last millisecond.
    Complete,
    /// Incomplete file for a day that has not ended yet.
    InProgress,
    /// Incomplete file for a day that is over.
    Partial,
}

fn day_state(name: &FileName, resource: &Resource, now: DateTime<Utc>) -> DayState {
    let end_of_day = time::end_of_local_day(name.end, resource.time_zone);
    if name.end >= end_of_day {
        DayState::Complete
    } else if now <= end_of_day {
        DayState::InProgress
    } else {
        DayState::Partial
    }
}

fn station_files(files: &[PathBuf], resource_id: ResourceId) -> Vec<(PathBuf, FileName)> {
    files
        .iter()
        .filter_map(|p| FileName::decode_path(p).ok().map(|n| (p.clone(), n)))
        .filter(|(_, n)| n.resource_id == resource_id && !n.format.is_video())
        .collect()
}

fn extension_format(path: &Path) -> Option<FileFormat> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(FileFormat::from_extension)
}

async fn newest_first(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut stamped: Vec<(SystemTime, PathBuf)> = Vec::with_capacity(paths.len());
    for path in paths {
        stamped.push((writer::modified_time(&path).await, path));
    }
    stamped.sort_by(|a, b| b.0.cmp(&a.0));
    stamped.into_iter().map(|(_, p)| p).collect()
}

// ---------------------------------------------------------------------------
// Periodic sweep task
// ---------------------------------------------------------------------------

/// Sweep once immediately, then every `interval` until cancelled. A zero
/// interval sweeps only once.
pub async fn run_sweep_task(sweeper: Arc<RetentionSweeper>, interval: Duration, cancel: CancellationToken) {
    info!(interval_secs = interval.as_secs(), "retention sweep task started");
    sweeper.sweep(Utc::now()).await;

    if interval.is_zero() {
        return;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("retention sweep task shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {
                let report = sweeper.sweep(Utc::now()).await;
                if !report.fully_successful {
                    warn!("retention sweep left files behind");
                }
            }
        }
    }
}
