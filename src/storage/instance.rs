use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::core::types::{FileFormat, ResourceId, ResourceKind, SENTINEL_RESOURCE_ID};

/// Storage label carried by placeholder instances.
pub const NO_DATA_LABEL: &str = "NoData";

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Station readings for one day: a header row plus data rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl StationTable {
    /// Parse delimited station text. The first non-empty line is the header.
    pub fn parse(text: &str, format: FileFormat) -> Result<Self, String> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        let header = match lines.next() {
            Some(line) => split_fields(line, format),
            None => return Err("no header row".to_string()),
        };
        let rows: Vec<Vec<String>> = lines.map(|l| split_fields(l, format)).collect();
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != header.len()) {
            return Err(format!(
                "row {} has {} fields, header has {}",
                i + 1,
                row.len(),
                header.len()
            ));
        }
        Ok(Self { header, rows })
    }

    /// Render back to delimited text, one line per row.
    pub fn render(&self, format: FileFormat) -> String {
        let sep = match format {
            FileFormat::Ssv => " ",
            FileFormat::Txt => "\t",
            _ => ",",
        };
        let mut out = String::new();
        for line in std::iter::once(&self.header).chain(self.rows.iter()) {
            out.push_str(&line.join(sep));
            out.push('\n');
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// A table without a header cannot be written and parsed back.
    pub fn has_header(&self) -> bool {
        self.header.iter().any(|h| !h.is_empty())
    }
}

fn split_fields(line: &str, format: FileFormat) -> Vec<String> {
    match format {
        FileFormat::Ssv => line.split_whitespace().map(str::to_string).collect(),
        FileFormat::Txt => line.split('\t').map(|f| f.trim().to_string()).collect(),
        _ => line.split(',').map(|f| f.trim().to_string()).collect(),
    }
}

/// Type-specific content of one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Video(Bytes),
    Station(StationTable),
}

impl Content {
    pub fn is_empty(&self) -> bool {
        match self {
            Content::Video(data) => data.is_empty(),
            Content::Station(table) => table.is_empty(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resource instances
// ---------------------------------------------------------------------------

/// Payload for exactly one bucket of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInstance {
    pub resource_id: ResourceId,
    /// Stamped once the instance is written under a kind-specific directory.
    pub kind: Option<ResourceKind>,
    pub format: FileFormat,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Name the storage server knows the payload by.
    pub label: String,
    /// When the payload was produced or fetched.
    pub stamped_at: DateTime<Utc>,
    /// Local file, set once written to disk.
    pub path: Option<PathBuf>,
    pub content: Content,
}

impl ResourceInstance {
    /// Build a "no data" placeholder. It carries the sentinel resource id
    /// and starts at the epoch.
    pub fn no_data(format: FileFormat, content: Content) -> Self {
        Self {
            resource_id: SENTINEL_RESOURCE_ID,
            kind: None,
            format,
            start: DateTime::<Utc>::UNIX_EPOCH,
            end: DateTime::<Utc>::UNIX_EPOCH,
            label: NO_DATA_LABEL.to_string(),
            stamped_at: DateTime::<Utc>::UNIX_EPOCH,
            path: None,
            content,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.resource_id.is_sentinel()
    }
}

// ---------------------------------------------------------------------------
// Pre-loaded placeholders
// ---------------------------------------------------------------------------

/// The shared "no data" instances, one per payload family.
#[derive(Debug, Clone)]
pub struct Sentinels {
    avi: Arc<ResourceInstance>,
    mp4: Arc<ResourceInstance>,
    csv: Arc<ResourceInstance>,
    ssv: Arc<ResourceInstance>,
    txt: Arc<ResourceInstance>,
}

impl Sentinels {
    /// Load the placeholder clips. A missing clip is logged and replaced
    /// with an empty payload so retrieval keeps working.
    pub async fn load(no_data_avi: &Path, no_data_mp4: &Path) -> Self {
        let avi = load_clip(no_data_avi).await;
        let mp4 = load_clip(no_data_mp4).await;
        Self::with_clips(avi, mp4)
    }

    pub fn with_clips(avi: Bytes, mp4: Bytes) -> Self {
        Self {
            avi: Arc::new(ResourceInstance::no_data(FileFormat::Avi, Content::Video(avi))),
            mp4: Arc::new(ResourceInstance::no_data(FileFormat::Mp4, Content::Video(mp4))),
            csv: Arc::new(no_station_data(FileFormat::Csv)),
            ssv: Arc::new(no_station_data(FileFormat::Ssv)),
            txt: Arc::new(no_station_data(FileFormat::Txt)),
        }
    }

    pub fn for_format(&self, format: FileFormat) -> Arc<ResourceInstance> {
        match format {
            FileFormat::Avi => self.avi.clone(),
            FileFormat::Mp4 => self.mp4.clone(),
            FileFormat::Csv => self.csv.clone(),
            FileFormat::Ssv => self.ssv.clone(),
            FileFormat::Txt => self.txt.clone(),
        }
    }
}

impl Default for Sentinels {
    fn default() -> Self {
        Self::with_clips(Bytes::new(), Bytes::new())
    }
}

fn no_station_data(format: FileFormat) -> ResourceInstance {
    ResourceInstance::no_data(format, Content::Station(StationTable::default()))
}

async fn load_clip(path: &Path) -> Bytes {
    match tokio::fs::read(path).await {
        Ok(data) => {
            info!(path = %path.display(), size = data.len(), "loaded no-data clip");
            Bytes::from(data)
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to load no-data clip, using empty placeholder");
            Bytes::new()
        }
    }
}
