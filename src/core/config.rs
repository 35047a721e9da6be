use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::CatalogError;
use super::types::{FileFormat, Resource, ResourceId, ResourceKind};

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub observability: ObservabilityConfig,
    pub storage: StorageConfig,
    pub retrieval: RetrievalConfig,
    pub retention: RetentionConfig,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
    /// Address for the Prometheus scrape listener. Empty disables it.
    #[serde(default)]
    pub metrics_listen_addr: String,
}

/// Local directory layout of the bucket cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root_dir: PathBuf,
    pub video_dir: String,
    pub camera_subdir: String,
    pub maploop_subdir: String,
    pub station_dir: String,
    #[serde(default = "default_clean_subdir")]
    pub clean_subdir: String,
    /// Placeholder clip substituted for AVI buckets without data.
    pub no_data_avi: PathBuf,
    /// Placeholder clip substituted for MP4 buckets without data.
    pub no_data_mp4: PathBuf,
}

fn default_clean_subdir() -> String {
    "CleanCSVFiles".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Video formats fetched for camera and map-loop resources.
    pub video_formats: Vec<FileFormat>,
    /// Maximum distance between a returned instance's start and the
    /// expected bucket start for the two to be matched.
    #[serde(default = "default_alignment_tolerance_ms")]
    pub alignment_tolerance_ms: u64,
}

fn default_alignment_tolerance_ms() -> u64 {
    5000
}

impl RetrievalConfig {
    pub fn alignment_tolerance(&self) -> Duration {
        Duration::milliseconds(self.alignment_tolerance_ms as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub max_video_files_to_keep: usize,
    pub max_station_days_to_keep: usize,
    pub keep_today: bool,
    /// Seconds between periodic sweeps. 0 sweeps once at startup only.
    #[serde(default)]
    pub sweep_interval_secs: u64,
}

/// Catalog entry seeded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub id: i32,
    pub name: String,
    pub kind: ResourceKind,
    pub time_zone: Tz,
    pub frequency_secs: u64,
    #[serde(default = "default_station_format")]
    pub station_format: FileFormat,
}

fn default_station_format() -> FileFormat {
    FileFormat::Csv
}

impl ResourceConfig {
    pub fn to_resource(&self) -> Result<Resource, CatalogError> {
        let resource_id = ResourceId::new(self.id);
        if resource_id.is_sentinel() {
            return Err(CatalogError::InvalidResource {
                resource_id,
                reason: "id is reserved for no-data placeholders".to_string(),
            });
        }
        if self.frequency_secs == 0 {
            return Err(CatalogError::InvalidResource {
                resource_id,
                reason: "frequency_secs must be positive".to_string(),
            });
        }
        if self.station_format.is_video() {
            return Err(CatalogError::InvalidResource {
                resource_id,
                reason: format!("{} is not a station format", self.station_format),
            });
        }
        Ok(Resource {
            id: resource_id,
            name: self.name.clone(),
            kind: self.kind,
            time_zone: self.time_zone,
            frequency: Duration::seconds(self.frequency_secs as i64),
            station_format: self.station_format,
        })
    }
}

impl AppConfig {
    /// Load configuration with layered overrides:
    /// 1. config/default.toml
    /// 2. config/{env}.toml (based on WXCACHE_ENV)
    /// 3. Environment variables (WXCACHE_* prefix)
    pub fn load() -> anyhow::Result<Self> {
        let default_path = Path::new("config/default.toml");
        let default_content = std::fs::read_to_string(default_path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", default_path.display(), e))?;

        let mut config: AppConfig = toml::from_str(&default_content)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {}", default_path.display(), e))?;

        let env_name = std::env::var("WXCACHE_ENV").unwrap_or_else(|_| "development".to_string());
        let env_path = format!("config/{}.toml", env_name);
        if let Ok(env_content) = std::fs::read_to_string(&env_path) {
            let env_config: AppConfig = toml::from_str(&env_content)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {}", env_path, e))?;
            config = env_config;
        }

        Self::apply_env_overrides(&mut config);

        Ok(config)
    }

    fn apply_env_overrides(config: &mut AppConfig) {
        if let Ok(v) = std::env::var("WXCACHE_STORAGE_ROOT_DIR") {
            config.storage.root_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("WXCACHE_RETENTION_MAX_VIDEO_FILES_TO_KEEP") {
            if let Ok(n) = v.parse() {
                config.retention.max_video_files_to_keep = n;
            }
        }
        if let Ok(v) = std::env::var("WXCACHE_RETENTION_MAX_STATION_DAYS_TO_KEEP") {
            if let Ok(n) = v.parse() {
                config.retention.max_station_days_to_keep = n;
            }
        }
        if let Ok(v) = std::env::var("WXCACHE_RETENTION_KEEP_TODAY") {
            if let Ok(b) = v.parse() {
                config.retention.keep_today = b;
            }
        }
        if let Ok(v) = std::env::var("WXCACHE_RETRIEVAL_VIDEO_FORMATS") {
            let formats: Vec<FileFormat> = v
                .split(',')
                .filter_map(|s| FileFormat::from_extension(s.trim()))
                .filter(FileFormat::is_video)
                .collect();
            if !formats.is_empty() {
                config.retrieval.video_formats = formats;
            }
        }
        if let Ok(v) = std::env::var("WXCACHE_OBSERVABILITY_LOG_LEVEL") {
            config.observability.log_level = v;
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                log_format: "text".to_string(),
                metrics_enabled: true,
                metrics_listen_addr: String::new(),
            },
            storage: StorageConfig {
                root_dir: PathBuf::from("wxdata"),
                video_dir: "temp_movie".to_string(),
                camera_subdir: "camera".to_string(),
                maploop_subdir: "maploop".to_string(),
                station_dir: "weather_stations".to_string(),
                clean_subdir: default_clean_subdir(),
                no_data_avi: PathBuf::from("NoData.avi"),
                no_data_mp4: PathBuf::from("NoData.mp4"),
            },
            retrieval: RetrievalConfig {
                video_formats: vec![FileFormat::Mp4],
                alignment_tolerance_ms: default_alignment_tolerance_ms(),
            },
            retention: RetentionConfig {
                max_video_files_to_keep: 50,
                max_station_days_to_keep: 7,
                keep_today: true,
                sweep_interval_secs: 0,
            },
            resources: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_toml_matches_defaults() {
        let parsed: AppConfig = toml::from_str(include_str!("../../config/default.toml")).unwrap();
        let defaults = AppConfig::default();
        assert_eq!(parsed.storage.clean_subdir, defaults.storage.clean_subdir);
        assert_eq!(parsed.retrieval.video_formats, defaults.retrieval.video_formats);
        assert_eq!(
            parsed.retrieval.alignment_tolerance_ms,
            defaults.retrieval.alignment_tolerance_ms
        );
        assert_eq!(
            parsed.retention.max_video_files_to_keep,
            defaults.retention.max_video_files_to_keep
        );
        assert!(!parsed.resources.is_empty());
    }

    #[test]
    fn test_resource_config_parses_zone_and_kind() {
        let raw = r#"
            id = 7
            name = "Roof camera"
            kind = "weather_camera"
            time_zone = "America/New_York"
            frequency_secs = 300
        "#;
        let cfg: ResourceConfig = toml::from_str(raw).unwrap();
        let resource = cfg.to_resource().unwrap();
        assert_eq!(resource.id, ResourceId::new(7));
        assert!(resource.is_video());
        assert_eq!(resource.time_zone, chrono_tz::America::New_York);
        assert_eq!(resource.frequency, Duration::minutes(5));
        assert_eq!(resource.station_format, FileFormat::Csv);
    }

    #[test]
    fn test_resource_config_rejects_sentinel_id() {
        let cfg = ResourceConfig {
            id: -1,
            name: "bad".to_string(),
            kind: ResourceKind::WeatherStation,
            time_zone: chrono_tz::UTC,
            frequency_secs: 60,
            station_format: FileFormat::Csv,
        };
        assert!(cfg.to_resource().is_err());
    }

    #[test]
    fn test_resource_config_rejects_video_station_format() {
        let cfg = ResourceConfig {
            id: 3,
            name: "bad".to_string(),
            kind: ResourceKind::WeatherStation,
            time_zone: chrono_tz::UTC,
            frequency_secs: 60,
            station_format: FileFormat::Mp4,
        };
        assert!(cfg.to_resource().is_err());
    }
}
