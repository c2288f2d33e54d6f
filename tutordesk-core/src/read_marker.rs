use api::{ConsoleApi, ConversationId, Message, MessageId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Tracks the highest message id reported as read, per conversation.
///
/// Reports only ever move forward; a batch whose newest id is at or below the
/// watermark is not reported again.
#[derive(Debug, Default)]
pub struct ReadMarker {
    watermarks: HashMap<ConversationId, MessageId>,
}

impl ReadMarker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watermark(&self, conversation: ConversationId) -> Option<MessageId> {
        self.watermarks.get(&conversation).copied()
    }

    /// The id to report for a freshly fetched batch, if any. The watermark is
    /// advanced before returning.
    pub fn next_dispatch(&mut self, conversation: ConversationId, batch: &[Message]) -> Option<MessageId> {
        let newest = batch.iter().map(|m| m.id).max()?;
        match self.watermarks.get(&conversation) {
            Some(current) if *current >= newest => None,
            _ => {
                self.watermarks.insert(conversation, newest);
                Some(newest)
            }
        }
    }

    /// Report the batch as read without waiting for the result.
    pub fn dispatch(
        &mut self,
        api: Arc<dyn ConsoleApi>,
        conversation: ConversationId,
        batch: &[Message],
    ) -> Option<JoinHandle<()>> {
        let last = self.next_dispatch(conversation, batch)?;
        Some(tokio::spawn(async move {
            match api.mark_read(conversation, last).await {
                Ok(()) => debug!(%conversation, %last, "Marked read"),
                Err(e) => debug!(%conversation, %last, "Mark-read failed: {:#}", e),
            }
        }))
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use api::Direction;

    fn batch(ids: &[i64]) -> Vec<Message> {
        ids.iter()
            .map(|id| Message::new(*id, Direction::In, format!("m{}", id)))
            .collect()
    }

    #[test]
    fn test_watermark_is_monotonic() {
        let mut marker = ReadMarker::new();
        let conv = ConversationId(1);

        let dispatched: Vec<Option<MessageId>> = [5, 3, 9]
            .iter()
            .map(|id| marker.next_dispatch(conv, &batch(&[*id])))
            .collect();

        assert_eq!(dispatched, vec![Some(MessageId(5)), None, Some(MessageId(9))]);
        assert_eq!(marker.watermark(conv), Some(MessageId(9)));
    }

    #[test]
    fn test_uses_newest_id_of_batch() {
        let mut marker = ReadMarker::new();
        assert_eq!(
            marker.next_dispatch(ConversationId(1), &batch(&[10, 12, 11])),
            Some(MessageId(12))
        );
    }

    #[test]
    fn test_same_batch_twice_dispatches_once() {
        let mut marker = ReadMarker::new();
        let conv = ConversationId(3);
        assert!(marker.next_dispatch(conv, &batch(&[1, 2])).is_some());
        assert!(marker.next_dispatch(conv, &batch(&[1, 2])).is_none());
    }

    #[test]
    fn test_empty_batch_dispatches_nothing() {
        let mut marker = ReadMarker::new();
        assert_eq!(marker.next_dispatch(ConversationId(1), &[]), None);
        assert_eq!(marker.watermark(ConversationId(1)), None);
    }

    #[test]
    fn test_watermarks_are_per_conversation() {
        let mut marker = ReadMarker::new();
        assert!(marker.next_dispatch(ConversationId(1), &batch(&[50])).is_some());
        assert!(marker.next_dispatch(ConversationId(2), &batch(&[7])).is_some());

        assert_eq!(marker.watermark(ConversationId(1)), Some(MessageId(50)));
        assert_eq!(marker.watermark(ConversationId(2)), Some(MessageId(7)));
    }
}
