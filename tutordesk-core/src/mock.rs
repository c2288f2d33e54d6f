//! Scripted in-memory `ConsoleApi` for tests and offline runs

use api::{
    AiChatRequest, ByteStream, Comment, ConsoleApi, Conversation, ConversationId, Direction, Message, MessageId,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Which call a scripted failure applies to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MockOp {
    ListConversations,
    ListMessages,
    SendMessage,
    MarkRead,
    ListComments,
    AddComment,
    Summarize,
    AiChat,
    Transcribe,
}

enum ScriptedStream {
    Chunks(Vec<anyhow::Result<Bytes>>),
    Live(mpsc::UnboundedReceiver<anyhow::Result<Bytes>>),
}

impl ScriptedStream {
    fn into_stream(self) -> ByteStream {
        match self {
            ScriptedStream::Chunks(chunks) => Box::pin(stream::iter(chunks)),
            ScriptedStream::Live(rx) => Box::pin(UnboundedReceiverStream::new(rx)),
        }
    }
}

#[derive(Default)]
struct MockState {
    conversations: Vec<Conversation>,
    /// Server-side messages per conversation, ascending by id
    messages: HashMap<ConversationId, Vec<Message>>,
    comments: HashMap<ConversationId, Vec<Comment>>,
    next_id: i64,
    failures: HashMap<MockOp, usize>,
    summary_streams: VecDeque<ScriptedStream>,
    chat_streams: VecDeque<ScriptedStream>,
    chat_requests: Vec<(ConversationId, AiChatRequest)>,
    transcripts: VecDeque<String>,
    uploads: Vec<(usize, String)>,
    read_marks: Vec<(ConversationId, MessageId)>,
    calls: Vec<String>,
    send_latency: Duration,
}

#[derive(Default)]
pub struct MockConsoleApi {
    state: Mutex<MockState>,
}

/// Encode token fragments the way the streaming endpoints frame them.
pub fn token_block(fragment: &str) -> String {
    format!("data: {}\n\n", serde_json::json!({ "t": fragment }))
}

impl MockConsoleApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_conversation(&self, id: i64, display_name: &str) {
        let mut state = self.state.lock().await;
        state.conversations.push(Conversation {
            id: ConversationId(id),
            subject_id: id,
            display_name: display_name.to_string(),
            last_message: None,
            unread_from_subject: 0,
            unread_from_operator: 0,
        });
        state.messages.entry(ConversationId(id)).or_default();
    }

    /// Messages with ids `1..=count` as if received from the subject.
    pub async fn seed_messages(&self, conversation: ConversationId, count: i64) {
        for _ in 0..count {
            self.receive(conversation, "hello").await;
        }
    }

    /// A new inbound message appears on the server.
    pub async fn receive(&self, conversation: ConversationId, content: &str) -> MessageId {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let message = Message::new(state.next_id, Direction::In, content);
        let id = message.id;
        state.messages.entry(conversation).or_default().push(message);
        id
    }

    pub async fn fail_next(&self, op: MockOp, times: usize) {
        *self.state.lock().await.failures.entry(op).or_default() += times;
    }

    /// Hold every `send_message` for `latency` before it lands.
    pub async fn set_send_latency(&self, latency: Duration) {
        self.state.lock().await.send_latency = latency;
    }

    pub async fn push_summary_stream(&self, fragments: &[&str]) {
        let chunks = fragments.iter().map(|f| Ok(Bytes::from(token_block(f)))).collect();
        self.state
            .lock()
            .await
            .summary_streams
            .push_back(ScriptedStream::Chunks(chunks));
    }

    pub async fn push_chat_stream(&self, fragments: &[&str]) {
        let chunks = fragments.iter().map(|f| Ok(Bytes::from(token_block(f)))).collect();
        self.state
            .lock()
            .await
            .chat_streams
            .push_back(ScriptedStream::Chunks(chunks));
    }

    /// Chat stream fed chunk by chunk by the caller.
    pub async fn push_live_chat_stream(&self) -> mpsc::UnboundedSender<anyhow::Result<Bytes>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().await.chat_streams.push_back(ScriptedStream::Live(rx));
        tx
    }

    /// Summary stream fed chunk by chunk by the caller.
    pub async fn push_live_summary_stream(&self) -> mpsc::UnboundedSender<anyhow::Result<Bytes>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().await.summary_streams.push_back(ScriptedStream::Live(rx));
        tx
    }

    pub async fn push_transcript(&self, text: &str) {
        self.state.lock().await.transcripts.push_back(text.to_string());
    }

    pub async fn read_marks(&self) -> Vec<(ConversationId, MessageId)> {
        self.state.lock().await.read_marks.clone()
    }

    pub async fn chat_requests(&self) -> Vec<(ConversationId, AiChatRequest)> {
        self.state.lock().await.chat_requests.clone()
    }

    /// (byte length, mime type) of every uploaded clip
    pub async fn uploads(&self) -> Vec<(usize, String)> {
        self.state.lock().await.uploads.clone()
    }

    pub async fn server_messages(&self, conversation: ConversationId) -> Vec<Message> {
        self.state
            .lock()
            .await
            .messages
            .get(&conversation)
            .cloned()
            .unwrap_or_default()
    }

    /// Log of calls, e.g. `list_messages 1 30 0`
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    async fn enter(&self, op: MockOp, call: String) -> anyhow::Result<tokio::sync::MutexGuard<'_, MockState>> {
        let mut state = self.state.lock().await;
        state.calls.push(call);
        if let Some(remaining) = state.failures.get_mut(&op).filter(|n| **n > 0) {
            *remaining -= 1;
            anyhow::bail!("{:?} failed: 503 Service Unavailable", op);
        }
        Ok(state)
    }
}

#[async_trait]
impl ConsoleApi for MockConsoleApi {
    async fn list_conversations(&self) -> anyhow::Result<Vec<Conversation>> {
        let state = self.enter(MockOp::ListConversations, "list_conversations".into()).await?;
        let mut conversations = state.conversations.clone();
        for conversation in &mut conversations {
            conversation.last_message = state
                .messages
                .get(&conversation.id)
                .and_then(|m| m.last().cloned());
        }
        Ok(conversations)
    }

    async fn list_messages(
        &self,
        conversation: ConversationId,
        limit: usize,
        offset: usize,
    ) -> anyhow::Result<Vec<Message>> {
        let call = format!("list_messages {} {} {}", conversation, limit, offset);
        let state = self.enter(MockOp::ListMessages, call).await?;
        let all = state.messages.get(&conversation).cloned().unwrap_or_default();
        Ok(all.into_iter().rev().skip(offset).take(limit).collect())
    }

    async fn send_message(&self, conversation: ConversationId, content: &str) -> anyhow::Result<Message> {
        let latency = self.state.lock().await.send_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.enter(MockOp::SendMessage, format!("send_message {}", conversation)).await?;
        state.next_id += 1;
        let message = Message::new(state.next_id, Direction::Out, content);
        state.messages.entry(conversation).or_default().push(message.clone());
        Ok(message)
    }

    async fn mark_read(&self, conversation: ConversationId, last_message_id: MessageId) -> anyhow::Result<()> {
        let call = format!("mark_read {} {}", conversation, last_message_id);
        let mut state = self.enter(MockOp::MarkRead, call).await?;
        state.read_marks.push((conversation, last_message_id));
        Ok(())
    }

    async fn list_comments(&self, conversation: ConversationId) -> anyhow::Result<Vec<Comment>> {
        let state = self.enter(MockOp::ListComments, format!("list_comments {}", conversation)).await?;
        Ok(state.comments.get(&conversation).cloned().unwrap_or_default())
    }

    async fn add_comment(&self, conversation: ConversationId, text: &str) -> anyhow::Result<Comment> {
        let mut state = self.enter(MockOp::AddComment, format!("add_comment {}", conversation)).await?;
        state.next_id += 1;
        let comment = Comment {
            id: state.next_id,
            comment_text: text.to_string(),
            created_at: Utc::now(),
            author: Some("operator".to_string()),
        };
        state.comments.entry(conversation).or_default().push(comment.clone());
        Ok(comment)
    }

    async fn summarize(&self, conversation: ConversationId) -> anyhow::Result<ByteStream> {
        let mut state = self.enter(MockOp::Summarize, format!("summarize {}", conversation)).await?;
        let scripted = state
            .summary_streams
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no summary stream scripted"))?;
        Ok(scripted.into_stream())
    }

    async fn ai_chat(&self, conversation: ConversationId, request: &AiChatRequest) -> anyhow::Result<ByteStream> {
        let mut state = self.enter(MockOp::AiChat, format!("ai_chat {}", conversation)).await?;
        state.chat_requests.push((conversation, request.clone()));
        let scripted = state
            .chat_streams
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no chat stream scripted"))?;
        Ok(scripted.into_stream())
    }

    async fn transcribe(&self, audio: Vec<u8>, mime_type: &str) -> anyhow::Result<String> {
        let mut state = self.enter(MockOp::Transcribe, format!("transcribe {}", mime_type)).await?;
        state.uploads.push((audio.len(), mime_type.to_string()));
        state
            .transcripts
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no transcript scripted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_newest_first_with_offset() {
        let api = MockConsoleApi::new();
        let conv = ConversationId(1);
        api.seed_messages(conv, 5).await;

        let page = api.list_messages(conv, 2, 1).await.unwrap();
        let ids: Vec<i64> = page.iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![4, 3]);
    }

    #[tokio::test]
    async fn test_scripted_failure_is_consumed() {
        let api = MockConsoleApi::new();
        api.fail_next(MockOp::ListComments, 1).await;

        assert!(api.list_comments(ConversationId(1)).await.is_err());
        assert!(api.list_comments(ConversationId(1)).await.is_ok());
        assert_eq!(api.calls().await.len(), 2);
    }
}
