//! KeyValueCache on the filesystem, one JSON file per key

use async_trait::async_trait;
use config::PathManager;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::KeyValueCache;

#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Cache under the application cache directory.
    pub fn open_default() -> anyhow::Result<Self> {
        let root = PathManager::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("No cache directory available on this platform"))?;
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// `ai_chat:12` is stored as `ai_chat_12.json`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.root.join(format!("{}.json", name))
    }
}

#[async_trait]
impl KeyValueCache for FileCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&path).await?))
    }

    async fn set(&self, key: &str, value: String) -> anyhow::Result<()> {
        fs::create_dir_all(&self.root).await?;

        // Write through a temp file so a crash never leaves half a value.
        let path = self.path_for(key);
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(value.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<bool> {
        let path = self.path_for(key);
        if fs::try_exists(&path).await? {
            fs::remove_file(&path).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_cache() -> (TempDir, FileCache) {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::new(dir.path().join("cache"));
        (dir, cache)
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let (_dir, cache) = temp_cache();

        assert_eq!(cache.get("ai_chat:1").await.unwrap(), None);
        cache.set("ai_chat:1", "[]".to_string()).await.unwrap();
        assert_eq!(cache.get("ai_chat:1").await.unwrap().as_deref(), Some("[]"));

        assert!(cache.remove("ai_chat:1").await.unwrap());
        assert!(!cache.remove("ai_chat:1").await.unwrap());
        assert_eq!(cache.get("ai_chat:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_file() {
        let (_dir, cache) = temp_cache();
        cache.set("ai_summary:3", "\"one\"".to_string()).await.unwrap();
        cache.set("ai_summary:3", "\"two\"".to_string()).await.unwrap();

        assert_eq!(cache.get("ai_summary:3").await.unwrap().as_deref(), Some("\"two\""));
        let names: Vec<String> = std::fs::read_dir(cache.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["ai_summary_3.json".to_string()]);
    }

    #[test]
    fn test_keys_map_to_safe_file_names() {
        let cache = FileCache::new(PathBuf::from("/tmp/x"));
        assert_eq!(cache.path_for("ai_sent_proposals:42"), PathBuf::from("/tmp/x/ai_sent_proposals_42.json"));
        assert_eq!(cache.path_for("../etc"), PathBuf::from("/tmp/x/___etc.json"));
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let (dir, cache) = temp_cache();
        cache.set("ai_chat:9", "[1]".to_string()).await.unwrap();

        let reopened = FileCache::new(dir.path().join("cache"));
        assert_eq!(reopened.get("ai_chat:9").await.unwrap().as_deref(), Some("[1]"));
    }
}
