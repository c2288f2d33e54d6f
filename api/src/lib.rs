//! Client side of the console REST backend
//!
//! This crate provides:
//! - **Wire types**: `Message`, `Conversation`, `Comment`, `AiChatEntry`, ...
//! - **Trait**: `ConsoleApi`, the seam the sync engine talks through
//! - **HTTP**: `HttpConsoleApi` on top of a reqwest `Client`
//!
//! Streaming endpoints (`summarize`, `ai-chat`) are returned as raw byte
//! streams; their block framing is decoded by the consumer.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;
use std::pin::Pin;

pub mod client;
mod http;
pub mod traffic_log;
pub mod types;

pub use client::Client;
pub use http::HttpConsoleApi;
pub use types::*;

/// Long-lived response body, chunked however the transport pleases
pub type ByteStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

#[async_trait]
pub trait ConsoleApi: Send + Sync {
    async fn list_conversations(&self) -> anyhow::Result<Vec<Conversation>>;

    /// One window of messages, newest-first as delivered by the server.
    async fn list_messages(
        &self,
        conversation: ConversationId,
        limit: usize,
        offset: usize,
    ) -> anyhow::Result<Vec<Message>>;

    async fn send_message(&self, conversation: ConversationId, content: &str) -> anyhow::Result<Message>;

    /// Fire-and-forget acknowledgement of the highest seen id.
    async fn mark_read(&self, conversation: ConversationId, last_message_id: MessageId) -> anyhow::Result<()>;

    async fn list_comments(&self, conversation: ConversationId) -> anyhow::Result<Vec<Comment>>;

    async fn add_comment(&self, conversation: ConversationId, text: &str) -> anyhow::Result<Comment>;

    async fn summarize(&self, conversation: ConversationId) -> anyhow::Result<ByteStream>;

    async fn ai_chat(&self, conversation: ConversationId, request: &AiChatRequest) -> anyhow::Result<ByteStream>;

    /// Upload a recorded clip and return its transcription.
    async fn transcribe(&self, audio: Vec<u8>, mime_type: &str) -> anyhow::Result<String>;
}
