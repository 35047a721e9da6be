use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::core::error::FileNameError;
use crate::core::time;
use crate::core::types::{FileFormat, ResourceId};

use super::instance::ResourceInstance;

// ---------------------------------------------------------------------------
// Bucket filename encoding
// ---------------------------------------------------------------------------

const DELIMITER: char = ',';
const FIELD_COUNT: usize = 5;

/// Decoded form of a bucket filename.
///
/// Layout: `{label},{resource_id},{stamped_at_ms},{start_ms},{end_ms}.{ext}`.
/// Resource id and end time are the fields the retention sweeper relies
/// on; the rest lets the cache rebuild an instance without the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileName {
    pub label: String,
    pub resource_id: ResourceId,
    pub stamped_at: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub format: FileFormat,
}

impl FileName {
    pub fn for_instance(instance: &ResourceInstance) -> Self {
        Self {
            label: sanitize_label(&instance.label),
            resource_id: instance.resource_id,
            stamped_at: instance.stamped_at,
            start: instance.start,
            end: instance.end,
            format: instance.format,
        }
    }

    /// Encode to the on-disk name (no directory).
    pub fn encode(&self) -> String {
        format!(
            "{label}{d}{id}{d}{stamp}{d}{start}{d}{end}.{ext}",
            label = self.label,
            id = self.resource_id.get(),
            stamp = self.stamped_at.timestamp_millis(),
            start = self.start.timestamp_millis(),
            end = self.end.timestamp_millis(),
            ext = self.format.extension(),
            d = DELIMITER,
        )
    }

    /// Decode a bare filename.
    pub fn decode(name: &str) -> Result<Self, FileNameError> {
        let (stem, ext) = name
            .rsplit_once('.')
            .ok_or_else(|| FileNameError::MissingExtension {
                name: name.to_string(),
            })?;
        let format = FileFormat::from_extension(ext).ok_or_else(|| {
            FileNameError::UnknownExtension {
                name: name.to_string(),
                extension: ext.to_string(),
            }
        })?;

        let fields: Vec<&str> = stem.split(DELIMITER).map(str::trim).collect();
        if fields.len() != FIELD_COUNT {
            return Err(FileNameError::FieldCount {
                name: name.to_string(),
                found: fields.len(),
            });
        }

        let resource_id = fields[1]
            .parse::<i32>()
            .map(ResourceId::new)
            .map_err(|_| invalid(name, "resource id", fields[1]))?;

        Ok(Self {
            label: fields[0].to_string(),
            resource_id,
            stamped_at: millis_field(name, "stamp", fields[2])?,
            start: millis_field(name, "start", fields[3])?,
            end: millis_field(name, "end", fields[4])?,
            format,
        })
    }

    /// Decode the file-name component of a path.
    pub fn decode_path(path: &Path) -> Result<Self, FileNameError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        Self::decode(name)
    }
}

fn millis_field(name: &str, field: &'static str, value: &str) -> Result<DateTime<Utc>, FileNameError> {
    value
        .parse::<i64>()
        .ok()
        .and_then(time::from_millis)
        .ok_or_else(|| invalid(name, field, value))
}

fn invalid(name: &str, field: &'static str, value: &str) -> FileNameError {
    FileNameError::InvalidField {
        name: name.to_string(),
        field,
        value: value.to_string(),
    }
}

/// Labels come from the server; keep them from breaking the layout.
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| match c {
            ',' | '/' | '\\' => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "bucket".to_string()
    } else {
        cleaned
    }
}

/// Path of the derivative "clean" file paired with a raw station file:
/// the same name, one directory level down under `clean_subdir`.
pub fn clean_path(raw: &Path, clean_subdir: &str) -> PathBuf {
    match (raw.parent(), raw.file_name()) {
        (Some(parent), Some(name)) => parent.join(clean_subdir).join(name),
        _ => PathBuf::from(clean_subdir).join(raw),
    }
}
