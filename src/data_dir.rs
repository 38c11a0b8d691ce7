use crate::config::PathsConfig;
use std::path::{Path, PathBuf};

/// Manages the hertz data directory layout (default `/data`).
///
/// The health marker, the supervisor status file, and the cache tree all
/// live under a single root. This struct provides accessors for each
/// well-known path and handles initialization.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
    cache_dir: Option<PathBuf>,
    marker_file: String,
}

impl DataDir {
    /// Create a new DataDir referencing the given root path with default names.
    #[cfg(test)]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache_dir: None,
            marker_file: PathsConfig::default().marker_file,
        }
    }

    /// Build from the `[paths]` config section.
    pub fn from_config(paths: &PathsConfig) -> Self {
        Self {
            root: paths.data_dir.clone(),
            cache_dir: paths.cache_dir.clone(),
            marker_file: paths.marker_file.clone(),
        }
    }

    /// The root directory (e.g. `/data`).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the health marker the monitored process refreshes.
    pub fn marker(&self) -> PathBuf {
        self.root.join(&self.marker_file)
    }

    /// Path to the supervisor status file.
    pub fn status(&self) -> PathBuf {
        self.root.join("supervisor.status")
    }

    /// Cache directory: the configured override, or `<root>/cache`.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.root.join("cache"))
    }

    /// Scratch directory for in-flight cache downloads.
    pub fn cache_tmp_dir(&self) -> PathBuf {
        self.cache_dir().join("tmp")
    }

    /// Initialize the directory structure: root, cache/, and cache/tmp/.
    /// Returns Ok(true) if the root was created, Ok(false) if it already existed.
    ///
    /// Never touches the marker file; only the monitored process creates it.
    pub fn init(&self) -> std::io::Result<bool> {
        let created = !self.root.exists();
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.cache_dir())?;
        std::fs::create_dir_all(self.cache_tmp_dir())?;
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir_paths() {
        let dd = DataDir::new("/data");
        assert_eq!(dd.root(), Path::new("/data"));
        assert_eq!(dd.marker(), PathBuf::from("/data/health_status"));
        assert_eq!(dd.status(), PathBuf::from("/data/supervisor.status"));
        assert_eq!(dd.cache_dir(), PathBuf::from("/data/cache"));
        assert_eq!(dd.cache_tmp_dir(), PathBuf::from("/data/cache/tmp"));
    }

    #[test]
    fn test_from_config_honors_overrides() {
        let paths = PathsConfig {
            data_dir: PathBuf::from("/srv/hertz"),
            cache_dir: Some(PathBuf::from("/mnt/cache")),
            marker_file: "heartbeat".to_string(),
        };
        let dd = DataDir::from_config(&paths);
        assert_eq!(dd.marker(), PathBuf::from("/srv/hertz/heartbeat"));
        assert_eq!(dd.cache_dir(), PathBuf::from("/mnt/cache"));
        assert_eq!(dd.cache_tmp_dir(), PathBuf::from("/mnt/cache/tmp"));
    }

    #[test]
    fn test_init_creates_directories_without_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("data");
        let dd = DataDir::new(&root);

        assert!(!root.exists());
        let created = dd.init().unwrap();
        assert!(created);
        assert!(dd.cache_dir().is_dir());
        assert!(dd.cache_tmp_dir().is_dir());
        assert!(!dd.marker().exists());
    }

    #[test]
    fn test_init_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dd = DataDir::new(tmp.path().join("data"));

        assert!(dd.init().unwrap());
        assert!(!dd.init().unwrap());
    }
}
