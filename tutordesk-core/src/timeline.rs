//! Ordered message list for one conversation
//!
//! Every mutation keeps the list in ascending id order with no duplicate ids.
//! Windows are merged as sets keyed by id, so completing requests out of order
//! (an older page landing after a poll, or the reverse) cannot corrupt the order.

use api::{ConversationId, Message, MessageId};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// One fetched page, stored oldest-first.
#[derive(Clone, Debug)]
pub struct TimelineWindow {
    pub items: Vec<Message>,
    pub requested_limit: usize,
    pub requested_offset: usize,
}

impl TimelineWindow {
    /// Build from a server page, which arrives newest-first.
    pub fn from_wire(mut items: Vec<Message>, requested_limit: usize, requested_offset: usize) -> Self {
        items.reverse();
        Self {
            items,
            requested_limit,
            requested_offset,
        }
    }

    pub fn max_id(&self) -> Option<MessageId> {
        self.items.iter().map(|m| m.id).max()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Store state captured when a request is issued.
///
/// Handed back together with the response so the merge can tell whether the
/// store it was computed against still exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimelineSnapshot {
    pub conversation: ConversationId,
    pub generation: u64,
    pub len: usize,
    pub max_id: Option<MessageId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Ids that were not in the store before the merge, ascending
    pub added: Vec<MessageId>,
    /// Whether the visible list differs from before
    pub changed: bool,
    /// The fetched window did not reach back to the previously known tail
    pub gap: bool,
}

pub struct TimelineStore {
    conversation: ConversationId,
    messages: Vec<Message>,
    page_size: usize,
    has_more: bool,
    generation: u64,
}

impl TimelineStore {
    pub fn new(conversation: ConversationId, page_size: usize) -> Self {
        Self {
            conversation,
            messages: Vec::new(),
            page_size: page_size.max(1),
            has_more: false,
            generation: 0,
        }
    }

    pub fn conversation(&self) -> ConversationId {
        self.conversation
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether older pages may still exist on the server
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn max_id(&self) -> Option<MessageId> {
        self.messages.last().map(|m| m.id)
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.position(id).is_ok()
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.messages.iter().map(|m| m.id).collect()
    }

    pub fn snapshot(&self) -> TimelineSnapshot {
        TimelineSnapshot {
            conversation: self.conversation,
            generation: self.generation,
            len: self.messages.len(),
            max_id: self.max_id(),
        }
    }

    fn position(&self, id: MessageId) -> std::result::Result<usize, usize> {
        self.messages.binary_search_by_key(&id, |m| m.id)
    }

    /// Initial load: the window becomes the whole visible list.
    pub fn replace(&mut self, window: TimelineWindow) {
        self.has_more = window.items.len() >= self.page_size;
        self.messages = normalized(window.items);
        self.generation += 1;
        debug!(
            conversation = %self.conversation,
            count = self.messages.len(),
            has_more = self.has_more,
            "Timeline replaced"
        );
    }

    /// Insert an older page before the head. Ids already present keep their
    /// current entry. Returns how many messages were inserted.
    pub fn prepend_older(&mut self, window: TimelineWindow) -> usize {
        self.has_more = window.items.len() >= self.page_size;

        let mut seen: HashSet<MessageId> = self.messages.iter().map(|m| m.id).collect();
        let fresh: Vec<Message> = window
            .items
            .into_iter()
            .filter(|m| seen.insert(m.id))
            .collect();
        let inserted = fresh.len();
        if inserted == 0 {
            return 0;
        }

        let current = std::mem::take(&mut self.messages);
        self.messages = merge_sorted(normalized(fresh), current);
        inserted
    }

    /// Reconcile a recent window fetched by the poll.
    ///
    /// Local messages older than the window are kept, the window replaces the
    /// range it covers, and local messages newer than the window (appended
    /// after the fetch was issued) stay at the tail.
    pub fn merge_newer(&mut self, window: TimelineWindow, snapshot: &TimelineSnapshot) -> Result<MergeOutcome> {
        if snapshot.conversation != self.conversation || snapshot.generation != self.generation {
            return Err(SyncError::Stale {
                conversation: snapshot.conversation,
                generation: snapshot.generation,
            });
        }

        let window_full = window.items.len() >= window.requested_limit;
        let fetched = normalized(window.items);
        let (Some(min), Some(max)) = (fetched.first().map(|m| m.id), fetched.last().map(|m| m.id)) else {
            return Ok(MergeOutcome::default());
        };

        let gap = window_full && snapshot.max_id.is_some_and(|known| min > known);
        if gap {
            warn!(
                conversation = %self.conversation,
                known_max = ?snapshot.max_id,
                window_min = %min,
                "Poll window does not overlap the known tail"
            );
        }

        let added: Vec<MessageId> = fetched
            .iter()
            .map(|m| m.id)
            .filter(|id| !self.contains(*id))
            .collect();

        let older = self.messages.iter().filter(|m| m.id < min).cloned();
        let tail = self.messages.iter().filter(|m| m.id > max).cloned();
        let merged: Vec<Message> = older.chain(fetched).chain(tail).collect();

        let changed = merged != self.messages;
        self.messages = merged;

        Ok(MergeOutcome { added, changed, gap })
    }

    /// Append a message confirmed by the server after a send.
    /// Returns false if the id was already known (its entry is updated).
    pub fn append_local(&mut self, message: Message) -> bool {
        match self.position(message.id) {
            Ok(index) => {
                self.messages[index] = message;
                false
            }
            Err(index) => {
                self.messages.insert(index, message);
                true
            }
        }
    }
}

/// Ascending by id, first occurrence of each id wins.
fn normalized(mut items: Vec<Message>) -> Vec<Message> {
    items.sort_by_key(|m| m.id);
    items.dedup_by_key(|m| m.id);
    items
}

/// Merge two ascending, disjoint lists.
fn merge_sorted(a: Vec<Message>, b: Vec<Message>) -> Vec<Message> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let mut a = a.into_iter().peekable();
    let mut b = b.into_iter().peekable();
    loop {
        let take_a = match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => x.id < y.id,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_a { a.next() } else { b.next() };
        out.extend(next);
    }
    out
}
