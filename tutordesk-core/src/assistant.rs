//! Per-conversation assistant state: co-pilot chat log, last summary and the
//! set of drafts already forwarded. All three persist in the local cache and
//! are cleared together.

use api::{AiChatEntry, AiChatRequest, AiChatRole, ConversationId};
use std::sync::Arc;
use tracing::debug;

use crate::cache::{self, KeyValueCache};
use crate::error::{Result, SyncError};
use crate::proposal::{ParsedProposals, ProposalParser, SentProposals};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssistantState {
    pub chat: Vec<AiChatEntry>,
    pub summary: Option<String>,
    pub sent: SentProposals,
}

impl AssistantState {
    /// Record a question and build the request for it. The request history
    /// is the log as it was before the question.
    pub fn ask(&mut self, question: &str) -> AiChatRequest {
        let request = AiChatRequest {
            message: question.to_string(),
            history: self.chat.clone(),
        };
        self.chat.push(AiChatEntry::user(question));
        request
    }

    /// Open an empty assistant entry for a streaming answer; returns its index.
    pub fn begin_answer(&mut self) -> usize {
        self.chat.push(AiChatEntry::assistant(""));
        self.chat.len() - 1
    }

    /// Replace the content of a streaming answer with the latest buffer.
    pub fn update_answer(&mut self, index: usize, buffer: &str) -> bool {
        match self.chat.get_mut(index) {
            Some(entry) if entry.role == AiChatRole::Assistant => {
                entry.content = buffer.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn proposals(&self, index: usize) -> Option<ParsedProposals> {
        let entry = self.chat.get(index).filter(|e| e.role == AiChatRole::Assistant)?;
        let mut parsed = ProposalParser::parse(index, &entry.content);
        parsed.apply_sent(&self.sent);
        Some(parsed)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Cache-backed persistence of [`AssistantState`].
#[derive(Clone)]
pub struct AssistantStore {
    cache: Arc<dyn KeyValueCache>,
}

fn cache_error(e: anyhow::Error) -> SyncError {
    SyncError::Cache(format!("{:#}", e))
}

impl AssistantStore {
    pub fn new(cache: Arc<dyn KeyValueCache>) -> Self {
        Self { cache }
    }

    pub async fn load(&self, conversation: ConversationId) -> Result<AssistantState> {
        let cache = self.cache.as_ref();
        let chat = cache::get_json(cache, &cache::ai_chat_key(conversation))
            .await
            .map_err(cache_error)?
            .unwrap_or_default();
        let summary = cache::get_json(cache, &cache::ai_summary_key(conversation))
            .await
            .map_err(cache_error)?;
        let sent = cache::get_json(cache, &cache::ai_sent_proposals_key(conversation))
            .await
            .map_err(cache_error)?
            .unwrap_or_default();
        Ok(AssistantState { chat, summary, sent })
    }

    pub async fn save_chat(&self, conversation: ConversationId, chat: &[AiChatEntry]) -> Result<()> {
        cache::set_json(self.cache.as_ref(), &cache::ai_chat_key(conversation), &chat)
            .await
            .map_err(cache_error)
    }

    pub async fn save_summary(&self, conversation: ConversationId, summary: &str) -> Result<()> {
        cache::set_json(self.cache.as_ref(), &cache::ai_summary_key(conversation), &summary)
            .await
            .map_err(cache_error)
    }

    pub async fn save_sent(&self, conversation: ConversationId, sent: &SentProposals) -> Result<()> {
        cache::set_json(self.cache.as_ref(), &cache::ai_sent_proposals_key(conversation), sent)
            .await
            .map_err(cache_error)
    }

    /// Drop chat log, summary and sent set for a conversation.
    pub async fn clear(&self, conversation: ConversationId) -> Result<()> {
        for key in [
            cache::ai_chat_key(conversation),
            cache::ai_summary_key(conversation),
            cache::ai_sent_proposals_key(conversation),
        ] {
            self.cache.remove(&key).await.map_err(cache_error)?;
        }
        debug!(%conversation, "Assistant state cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    const CONV: ConversationId = ConversationId(5);

    #[test]
    fn test_ask_sends_prior_history() {
        let mut state = AssistantState::default();
        let first = state.ask("What did the parent ask?");
        assert!(first.history.is_empty());

        let idx = state.begin_answer();
        state.update_answer(idx, "They asked about Friday.");

        let second = state.ask("Draft a reply");
        assert_eq!(second.history.len(), 2);
        assert_eq!(second.history[1].content, "They asked about Friday.");
        assert_eq!(state.chat.len(), 3);
    }

    #[test]
    fn test_update_answer_rejects_user_entry() {
        let mut state = AssistantState::default();
        state.ask("q");
        assert!(!state.update_answer(0, "x"));
        assert!(!state.update_answer(9, "x"));
    }

    #[test]
    fn test_proposals_carry_sent_flags() {
        let mut state = AssistantState::default();
        state.ask("reply please");
        let idx = state.begin_answer();
        state.update_answer(
            idx,
            "Sure:\n<send_to_conversation conversation_id=\"5\" label=\"Parent\">See you Friday</send_to_conversation>",
        );
        state.sent.insert(idx, 0);

        let parsed = state.proposals(idx).unwrap();
        assert_eq!(parsed.commentary, "Sure:");
        assert!(parsed.draft(0).unwrap().sent);
        assert!(state.proposals(0).is_none());
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let cache = Arc::new(MemoryCache::new());
        let store = AssistantStore::new(cache.clone());

        let mut state = AssistantState::default();
        state.ask("hello");
        let idx = state.begin_answer();
        state.update_answer(idx, "hi");
        state.sent.insert(idx, 2);

        store.save_chat(CONV, &state.chat).await.unwrap();
        store.save_summary(CONV, "Parent wants a new slot").await.unwrap();
        store.save_sent(CONV, &state.sent).await.unwrap();

        let loaded = store.load(CONV).await.unwrap();
        assert_eq!(loaded.chat, state.chat);
        assert_eq!(loaded.summary.as_deref(), Some("Parent wants a new slot"));
        assert!(loaded.sent.contains(idx, 2));

        assert_eq!(store.load(ConversationId(6)).await.unwrap(), AssistantState::default());
    }

    #[tokio::test]
    async fn test_clear_discards_everything() {
        let cache = Arc::new(MemoryCache::new());
        let store = AssistantStore::new(cache.clone());
        store.save_chat(CONV, &[AiChatEntry::user("q")]).await.unwrap();
        store.save_summary(CONV, "s").await.unwrap();
        store.save_sent(CONV, &SentProposals::new()).await.unwrap();
        store.save_summary(ConversationId(6), "other").await.unwrap();

        store.clear(CONV).await.unwrap();

        assert_eq!(store.load(CONV).await.unwrap(), AssistantState::default());
        assert_eq!(cache.len().await, 1);
    }
}
