use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::time;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Catalog number of a resource (camera, map loop or weather station).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(i32);

/// Resource id carried by the pre-loaded "no data" placeholder instances.
pub const SENTINEL_RESOURCE_ID: ResourceId = ResourceId(-1);

impl ResourceId {
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn get(self) -> i32 {
        self.0
    }

    pub fn is_sentinel(self) -> bool {
        self == SENTINEL_RESOURCE_ID
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for ResourceId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Resource kinds and file formats
// ---------------------------------------------------------------------------

/// What a resource produces. Decides bucket width and payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    WeatherCamera,
    WeatherMapLoop,
    WeatherStation,
}

impl ResourceKind {
    pub fn is_video(&self) -> bool {
        matches!(self, ResourceKind::WeatherCamera | ResourceKind::WeatherMapLoop)
    }

    pub fn bucket_width(&self) -> BucketWidth {
        if self.is_video() {
            BucketWidth::Hour
        } else {
            BucketWidth::Day
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::WeatherCamera => "camera",
            ResourceKind::WeatherMapLoop => "map_loop",
            ResourceKind::WeatherStation => "station",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// On-disk / on-wire format of one bucket's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Avi,
    Mp4,
    Csv,
    Ssv,
    Txt,
}

impl FileFormat {
    pub const VIDEO: [FileFormat; 2] = [FileFormat::Avi, FileFormat::Mp4];

    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Avi => "avi",
            FileFormat::Mp4 => "mp4",
            FileFormat::Csv => "csv",
            FileFormat::Ssv => "ssv",
            FileFormat::Txt => "txt",
        }
    }

    /// Case-insensitive lookup by extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "avi" => Some(FileFormat::Avi),
            "mp4" => Some(FileFormat::Mp4),
            "csv" => Some(FileFormat::Csv),
            "ssv" => Some(FileFormat::Ssv),
            "txt" => Some(FileFormat::Txt),
            _ => None,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, FileFormat::Avi | FileFormat::Mp4)
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Width of the caching unit for a resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BucketWidth {
    /// One hour, zone independent.
    Hour,
    /// One calendar day in the resource's own zone (23, 24 or 25 hours).
    Day,
}

impl BucketWidth {
    /// Exclusive end of the bucket starting at `start`.
    pub fn bucket_end(&self, start: DateTime<Utc>, zone: Tz) -> DateTime<Utc> {
        match self {
            BucketWidth::Hour => start + Duration::hours(1),
            BucketWidth::Day => time::next_local_day(start, zone),
        }
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// A logical data source as known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    pub kind: ResourceKind,
    /// Zone in which day buckets and currency are evaluated.
    pub time_zone: Tz,
    /// How often the resource produces new data.
    pub frequency: Duration,
    /// Format station data is stored in. Ignored for video resources.
    pub station_format: FileFormat,
}

impl Resource {
    pub fn bucket_width(&self) -> BucketWidth {
        self.kind.bucket_width()
    }

    pub fn is_video(&self) -> bool {
        self.kind.is_video()
    }
}

// ---------------------------------------------------------------------------
// Bucket identity and time ranges
// ---------------------------------------------------------------------------

/// Identity of one cached bucket. Ordered by resource, then start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub resource_id: ResourceId,
    pub bucket_start: DateTime<Utc>,
}

impl ResourceKey {
    pub fn new(resource_id: ResourceId, bucket_start: DateTime<Utc>) -> Self {
        Self {
            resource_id,
            bucket_start,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}",
            self.resource_id,
            self.bucket_start.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

/// Half-open `[start, stop)` interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        Self { start, stop }
    }

    pub fn is_empty(&self) -> bool {
        self.stop <= self.start
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.stop.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}
