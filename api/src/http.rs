use crate::client::Client;
use crate::types::*;
use crate::{ByteStream, ConsoleApi};
use async_trait::async_trait;

const NO_QUERY: &[(&str, &str)] = &[];

/// `ConsoleApi` backed by the console's REST endpoints.
#[derive(Clone)]
pub struct HttpConsoleApi {
    client: Client,
}

impl HttpConsoleApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn connect(base_url: &str, token: Option<&str>) -> anyhow::Result<Self> {
        Ok(Self::new(Client::new(base_url, token)?))
    }

    fn messages_path(conversation: ConversationId) -> String {
        format!("conversations/{}/messages", conversation)
    }
}

#[async_trait]
impl ConsoleApi for HttpConsoleApi {
    async fn list_conversations(&self) -> anyhow::Result<Vec<Conversation>> {
        let page: Page<Conversation> = self.client.get("conversations", NO_QUERY).await?;
        Ok(page.items)
    }

    async fn list_messages(
        &self,
        conversation: ConversationId,
        limit: usize,
        offset: usize,
    ) -> anyhow::Result<Vec<Message>> {
        let page: Page<Message> = self
            .client
            .get(
                &Self::messages_path(conversation),
                &[("limit", limit), ("offset", offset)],
            )
            .await?;
        Ok(page.items)
    }

    async fn send_message(&self, conversation: ConversationId, content: &str) -> anyhow::Result<Message> {
        let request = SendMessageRequest {
            content: content.to_string(),
        };
        self.client.post(&Self::messages_path(conversation), &request).await
    }

    async fn mark_read(&self, conversation: ConversationId, last_message_id: MessageId) -> anyhow::Result<()> {
        let path = format!("conversations/{}/messages/read", conversation);
        self.client
            .post_ack(&path, &MarkReadRequest { last_message_id })
            .await
    }

    async fn list_comments(&self, conversation: ConversationId) -> anyhow::Result<Vec<Comment>> {
        let path = format!("conversations/{}/comments", conversation);
        let page: Page<Comment> = self.client.get(&path, NO_QUERY).await?;
        Ok(page.items)
    }

    async fn add_comment(&self, conversation: ConversationId, text: &str) -> anyhow::Result<Comment> {
        let path = format!("conversations/{}/comments", conversation);
        let request = CommentRequest {
            comment_text: text.to_string(),
        };
        self.client.post(&path, &request).await
    }

    async fn summarize(&self, conversation: ConversationId) -> anyhow::Result<ByteStream> {
        let path = format!("conversations/{}/summarize", conversation);
        self.client.post_stream(&path, &serde_json::json!({})).await
    }

    async fn ai_chat(&self, conversation: ConversationId, request: &AiChatRequest) -> anyhow::Result<ByteStream> {
        let path = format!("conversations/{}/ai-chat", conversation);
        self.client.post_stream(&path, request).await
    }

    async fn transcribe(&self, audio: Vec<u8>, mime_type: &str) -> anyhow::Result<String> {
        let extension = mime_type.strip_prefix("audio/").unwrap_or("wav");
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(format!("recording.{}", extension))
            .mime_str(mime_type)?;
        let form = reqwest::multipart::Form::new().part("audio_blob", part);
        let response: TranscriptionResponse = self.client.post_multipart("transcribe", form).await?;
        Ok(response.text)
    }
}
