use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::core::error::DiskError;
use crate::core::time;
use crate::core::types::{Resource, ResourceKind};
use crate::observability::metrics as obs;

use super::codec::{clean_path, FileName};
use super::instance::{Content, ResourceInstance, StationTable};
use super::layout::DirectoryLayout;

// ---------------------------------------------------------------------------
// Disk writer
// ---------------------------------------------------------------------------

/// Persists bucket instances under the filename encoding and reads them
/// back during a cache rebuild.
#[derive(Debug, Clone)]
pub struct DiskWriter {
    layout: DirectoryLayout,
}

impl DiskWriter {
    pub fn new(layout: DirectoryLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &DirectoryLayout {
        &self.layout
    }

    /// Write a real instance to disk and return it stamped with its kind
    /// and path.
    ///
    /// Station days are normalised first: start snaps to local midnight and
    /// end becomes `min(end of day, now)`, which is what later tells a
    /// complete day apart from one still in progress. Any older file for the
    /// same station day is replaced, but only once the new file is in place.
    /// Video files that already exist are left untouched.
    pub async fn persist(
        &self,
        mut instance: ResourceInstance,
        resource: &Resource,
        now: DateTime<Utc>,
    ) -> Result<ResourceInstance, DiskError> {
        instance.kind = Some(resource.kind);
        if resource.kind == ResourceKind::WeatherStation {
            let zone = resource.time_zone;
            instance.start = time::start_of_local_day(instance.start, zone);
            instance.end = time::end_of_local_day(instance.start, zone).min(now);
            instance.stamped_at = now;
            instance.format = resource.station_format;
        }

        let dir = self.layout.dir_for(resource.kind);
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| DiskError::Write {
                path: dir.to_path_buf(),
                source,
            })?;

        let name = FileName::for_instance(&instance);
        let path = dir.join(name.encode());

        let data = match &instance.content {
            Content::Video(data) => {
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    debug!(path = %path.display(), "video file already on disk");
                    instance.path = Some(path);
                    return Ok(instance);
                }
                data.clone()
            }
            Content::Station(table) => Bytes::from(table.render(instance.format)),
        };

        write_atomic(&path, &data).await?;
        obs::inc_files_persisted(resource.kind.as_str());
        debug!(path = %path.display(), size = data.len(), "bucket file written");

        if !instance.format.is_video() {
            self.remove_previous_station_day(dir, &name, &path).await;
        }

        instance.path = Some(path);
        Ok(instance)
    }

    /// Delete station files for the same resource and local day as `name`,
    /// other than the freshly written `current`, whose stale clean
    /// derivative is dropped.
    async fn remove_previous_station_day(&self, dir: &Path, name: &FileName, current: &Path) {
        for existing in list_files(dir).await {
            let Ok(old) = FileName::decode_path(&existing) else {
                continue;
            };
            if old.resource_id != name.resource_id || old.start != name.start {
                continue;
            }
            if existing == current {
                remove_best_effort(&clean_path(current, &self.layout.clean_subdir)).await;
            } else {
                debug!(path = %existing.display(), "replacing older station file");
                delete_with_clean(&existing, &self.layout.clean_subdir).await;
            }
        }
    }

    /// Rebuild an instance from a previously written file.
    pub async fn read_back(&self, path: &Path, resource: &Resource) -> Result<ResourceInstance, DiskError> {
        let name = FileName::decode_path(path)?;
        let raw = tokio::fs::read(path).await.map_err(|source| DiskError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let content = if name.format.is_video() {
            Content::Video(Bytes::from(raw))
        } else {
            let text = String::from_utf8(raw).map_err(|e| DiskError::Payload {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            let table = StationTable::parse(&text, name.format).map_err(|reason| DiskError::Payload {
                path: path.to_path_buf(),
                reason,
            })?;
            Content::Station(table)
        };

        let start = if resource.kind == ResourceKind::WeatherStation {
            time::start_of_local_day(name.start, resource.time_zone)
        } else {
            name.start
        };

        Ok(ResourceInstance {
            resource_id: name.resource_id,
            kind: Some(resource.kind),
            format: name.format,
            start,
            end: name.end,
            label: name.label,
            stamped_at: name.stamped_at,
            path: Some(path.to_path_buf()),
            content,
        })
    }
}

/// Write through a temporary sibling so a crash never leaves a truncated
/// file under a valid bucket name.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), DiskError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("bucket");
    let tmp = path.with_file_name(format!(".{file_name}.part"));
    tokio::fs::write(&tmp, data)
        .await
        .map_err(|source| DiskError::Write {
            path: tmp.clone(),
            source,
        })?;
    if let Err(source) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(DiskError::Write {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem helpers shared with rebuild and retention
// ---------------------------------------------------------------------------

/// Regular files directly inside `dir`. A missing directory lists as empty.
pub async fn list_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %dir.display(), error = %e, "failed to list directory");
            }
            return files;
        }
    };
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
                if is_file {
                    files.push(entry.path());
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "failed to read directory entry");
                break;
            }
        }
    }
    files
}

/// Last modification time, or the epoch if it cannot be read.
pub async fn modified_time(path: &Path) -> SystemTime {
    match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(_) => SystemTime::UNIX_EPOCH,
    }
}

/// Delete one file. A file that is already gone counts as deleted.
pub async fn remove_best_effort(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to delete file");
            false
        }
    }
}

/// Delete a raw file and its "clean" derivative. Both deletions are
/// attempted; returns true only if both succeeded.
pub async fn delete_with_clean(raw: &Path, clean_subdir: &str) -> bool {
    let raw_ok = remove_best_effort(raw).await;
    let clean_ok = remove_best_effort(&clean_path(raw, clean_subdir)).await;
    raw_ok && clean_ok
}
