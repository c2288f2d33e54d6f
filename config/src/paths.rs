use directories::BaseDirs;
use std::path::PathBuf;
use std::sync::OnceLock;

static DATA_DIR_OVERRIDE: OnceLock<PathBuf> = OnceLock::new();

const APP_DIR: &str = "tutordesk";

pub struct PathManager;

impl PathManager {
    /// Set a custom data directory (tests, portable installs)
    pub fn set_data_dir(path: PathBuf) {
        let _ = DATA_DIR_OVERRIDE.set(path);
    }

    fn base_data_dir() -> Option<PathBuf> {
        if let Some(d) = DATA_DIR_OVERRIDE.get() {
            return Some(d.clone());
        }
        BaseDirs::new().map(|d| d.data_dir().join(APP_DIR))
    }

    pub fn data_dir() -> Option<PathBuf> {
        Self::base_data_dir()
    }

    pub fn config_dir() -> Option<PathBuf> {
        if let Some(d) = DATA_DIR_OVERRIDE.get() {
            return Some(d.join("config"));
        }
        BaseDirs::new().map(|d| d.config_dir().join(APP_DIR))
    }

    /// Local key-value cache (assistant chat logs, summaries, sent proposals)
    pub fn cache_dir() -> Option<PathBuf> {
        if let Some(d) = DATA_DIR_OVERRIDE.get() {
            return Some(d.join("cache"));
        }
        BaseDirs::new().map(|d| d.cache_dir().join(APP_DIR))
    }

    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("settings.toml"))
    }

    pub fn logs_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            if let Some(dirs) = directories::UserDirs::new() {
                return Some(dirs.home_dir().join("Library/Logs/Tutordesk"));
            }
        }
        Self::data_dir().map(|d| d.join("logs"))
    }

    pub fn ensure_dirs_exist() -> std::io::Result<()> {
        for dir in [
            Self::data_dir(),
            Self::config_dir(),
            Self::cache_dir(),
            Self::logs_dir(),
        ]
        .into_iter()
        .flatten()
        {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_roots_every_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        PathManager::set_data_dir(root.clone());

        assert_eq!(PathManager::config_dir(), Some(root.join("config")));
        assert_eq!(PathManager::cache_dir(), Some(root.join("cache")));
        assert_eq!(PathManager::settings_path(), Some(root.join("config").join("settings.toml")));

        PathManager::ensure_dirs_exist().unwrap();
        assert!(root.join("cache").is_dir());
        assert!(root.join("config").is_dir());
    }
}
