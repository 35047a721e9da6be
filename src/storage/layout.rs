use std::path::{Path, PathBuf};

use crate::core::config::StorageConfig;
use crate::core::types::ResourceKind;

/// Where bucket files live on local disk.
///
/// ```text
/// {root}/{video_dir}/                   unclassified video
/// {root}/{video_dir}/{camera_subdir}/   camera video
/// {root}/{video_dir}/{maploop_subdir}/  map-loop video
/// {root}/{station_dir}/                 raw station days
/// {root}/{station_dir}/{clean_subdir}/  derivative "clean" station days
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLayout {
    pub video_root: PathBuf,
    pub camera_dir: PathBuf,
    pub maploop_dir: PathBuf,
    pub station_dir: PathBuf,
    pub clean_subdir: String,
}

impl DirectoryLayout {
    pub fn from_config(config: &StorageConfig) -> Self {
        let video_root = config.root_dir.join(&config.video_dir);
        Self {
            camera_dir: video_root.join(&config.camera_subdir),
            maploop_dir: video_root.join(&config.maploop_subdir),
            video_root,
            station_dir: config.root_dir.join(&config.station_dir),
            clean_subdir: config.clean_subdir.clone(),
        }
    }

    /// Layout rooted at `root` with the default directory names.
    pub fn under(root: &Path) -> Self {
        let config = StorageConfig {
            root_dir: root.to_path_buf(),
            ..crate::core::config::AppConfig::default().storage
        };
        Self::from_config(&config)
    }

    /// Directory that files of `kind` are written to.
    pub fn dir_for(&self, kind: ResourceKind) -> &Path {
        match kind {
            ResourceKind::WeatherCamera => &self.camera_dir,
            ResourceKind::WeatherMapLoop => &self.maploop_dir,
            ResourceKind::WeatherStation => &self.station_dir,
        }
    }

    /// The three physical video locations swept by retention.
    pub fn video_dirs(&self) -> [&Path; 3] {
        [&self.video_root, &self.camera_dir, &self.maploop_dir]
    }

    pub fn clean_dir(&self) -> PathBuf {
        self.station_dir.join(&self.clean_subdir)
    }

    /// Create every directory of the layout.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [&self.camera_dir, &self.maploop_dir, &self.clean_dir()] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_from_config() {
        let layout = DirectoryLayout::under(Path::new("/tmp/wx"));
        assert_eq!(layout.camera_dir, PathBuf::from("/tmp/wx/temp_movie/camera"));
        assert_eq!(layout.maploop_dir, PathBuf::from("/tmp/wx/temp_movie/maploop"));
        assert_eq!(layout.clean_dir(), PathBuf::from("/tmp/wx/weather_stations/CleanCSVFiles"));
        assert_eq!(layout.dir_for(ResourceKind::WeatherStation), Path::new("/tmp/wx/weather_stations"));
    }

    #[tokio::test]
    async fn test_ensure_dirs_creates_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = DirectoryLayout::under(tmp.path());
        layout.ensure_dirs().await.unwrap();
        assert!(layout.camera_dir.is_dir());
        assert!(layout.maploop_dir.is_dir());
        assert!(layout.clean_dir().is_dir());
    }
}
