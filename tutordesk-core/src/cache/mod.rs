//! Local key-value cache for per-conversation assistant state
//!
//! Values are JSON strings. Keys are namespaced by purpose and conversation:
//! `ai_chat:<id>`, `ai_summary:<id>`, `ai_sent_proposals:<id>`.

use api::ConversationId;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

mod file;
mod memory;

pub use file::FileCache;
pub use memory::MemoryCache;

#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set(&self, key: &str, value: String) -> anyhow::Result<()>;

    /// Returns Ok(true) if the key existed
    async fn remove(&self, key: &str) -> anyhow::Result<bool>;
}

pub fn ai_chat_key(conversation: ConversationId) -> String {
    format!("ai_chat:{}", conversation)
}

pub fn ai_summary_key(conversation: ConversationId) -> String {
    format!("ai_summary:{}", conversation)
}

pub fn ai_sent_proposals_key(conversation: ConversationId) -> String {
    format!("ai_sent_proposals:{}", conversation)
}

/// Read and decode a JSON value. An undecodable entry is treated as missing.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn KeyValueCache, key: &str) -> anyhow::Result<Option<T>> {
    let Some(raw) = cache.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!("Ignoring unreadable cache entry {}: {}", key, e);
            Ok(None)
        }
    }
}

pub async fn set_json<T: Serialize + Sync>(cache: &dyn KeyValueCache, key: &str, value: &T) -> anyhow::Result<()> {
    cache.set(key, serde_json::to_string(value)?).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        let conv = ConversationId(12);
        assert_eq!(ai_chat_key(conv), "ai_chat:12");
        assert_eq!(ai_summary_key(conv), "ai_summary:12");
        assert_eq!(ai_sent_proposals_key(conv), "ai_sent_proposals:12");
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let cache = MemoryCache::new();
        set_json(&cache, "k", &vec![1, 2, 3]).await.unwrap();
        let back: Option<Vec<i32>> = get_json(&cache, "k").await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));

        let missing: Option<Vec<i32>> = get_json(&cache, "other").await.unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_unreadable_entry_is_missing() {
        let cache = MemoryCache::new();
        cache.set("k", "{not json".to_string()).await.unwrap();
        let value: Option<Vec<i32>> = get_json(&cache, "k").await.unwrap();
        assert_eq!(value, None);
    }
}
