//! Request bookkeeping for the three ways a timeline is fetched
//!
//! - initial load: newest page, replaces the store
//! - older page: backward paging from the head, at most one in flight
//! - poll: recent window reconciled into the store
//!
//! Every request carries a [`Ticket`]. A response is applied only if its
//! ticket is still the outstanding one for its kind and the store it was
//! issued against has not been replaced since.

use api::ConversationId;
use config::Settings;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::timeline::{TimelineSnapshot, TimelineStore};
use crate::viewport::{ViewportAnchor, ViewportMetrics};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    LoadingInitial,
    LoadingOlder,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Initial,
    Older,
    Poll,
}

impl RequestKind {
    fn label(self) -> &'static str {
        match self {
            RequestKind::Initial => "initial load",
            RequestKind::Older => "older page",
            RequestKind::Poll => "poll",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ticket {
    pub kind: RequestKind,
    pub conversation: ConversationId,
    pub generation: u64,
    seq: u64,
}

#[derive(Clone, Debug)]
pub struct PageRequest {
    pub ticket: Ticket,
    pub limit: usize,
    pub offset: usize,
    pub snapshot: TimelineSnapshot,
}

#[derive(Debug)]
pub struct PaginationController {
    conversation: ConversationId,
    page_size: usize,
    poll_margin: usize,
    next_seq: u64,
    initial: Option<u64>,
    older: Option<u64>,
    poll: Option<u64>,
    older_failed: bool,
}

impl PaginationController {
    pub fn new(conversation: ConversationId, page_size: usize, poll_margin: usize) -> Self {
        Self {
            conversation,
            page_size: page_size.max(1),
            poll_margin,
            next_seq: 0,
            initial: None,
            older: None,
            poll: None,
            older_failed: false,
        }
    }

    pub fn from_settings(conversation: ConversationId, settings: &Settings) -> Self {
        Self::new(conversation, settings.page_size, settings.poll_margin)
    }

    pub fn state(&self) -> LoadState {
        if self.initial.is_some() {
            LoadState::LoadingInitial
        } else if self.older.is_some() {
            LoadState::LoadingOlder
        } else {
            LoadState::Idle
        }
    }

    /// The "couldn't load more" notice is showing
    pub fn older_failed(&self) -> bool {
        self.older_failed
    }

    pub fn dismiss_notice(&mut self) {
        self.older_failed = false;
    }

    fn ticket(&mut self, kind: RequestKind, store: &TimelineStore) -> Ticket {
        self.next_seq += 1;
        Ticket {
            kind,
            conversation: self.conversation,
            generation: store.generation(),
            seq: self.next_seq,
        }
    }

    fn slot(&mut self, kind: RequestKind) -> &mut Option<u64> {
        match kind {
            RequestKind::Initial => &mut self.initial,
            RequestKind::Older => &mut self.older,
            RequestKind::Poll => &mut self.poll,
        }
    }

    /// Newest page from offset 0. Supersedes anything else outstanding.
    pub fn request_initial(&mut self, store: &TimelineStore) -> PageRequest {
        let ticket = self.ticket(RequestKind::Initial, store);
        self.initial = Some(ticket.seq);
        self.older = None;
        self.poll = None;
        self.older_failed = false;
        PageRequest {
            ticket,
            limit: self.page_size,
            offset: 0,
            snapshot: store.snapshot(),
        }
    }

    /// Whether the backward trigger should fire for this viewport.
    pub fn should_load_older(&self, store: &TimelineStore, anchor: &ViewportAnchor, metrics: &ViewportMetrics) -> bool {
        self.state() == LoadState::Idle && !store.is_empty() && store.has_more() && anchor.is_near_top(metrics)
    }

    /// Next older page, starting after everything currently held.
    pub fn request_older(&mut self, store: &TimelineStore) -> Result<PageRequest> {
        if self.state() != LoadState::Idle {
            return Err(SyncError::InFlight(RequestKind::Older.label()));
        }
        let ticket = self.ticket(RequestKind::Older, store);
        self.older = Some(ticket.seq);
        self.older_failed = false;
        Ok(PageRequest {
            ticket,
            limit: self.page_size,
            offset: store.len(),
            snapshot: store.snapshot(),
        })
    }

    /// Recent window wide enough to cover everything held plus a margin.
    pub fn request_poll(&mut self, store: &TimelineStore) -> Result<PageRequest> {
        if self.poll.is_some() {
            return Err(SyncError::InFlight(RequestKind::Poll.label()));
        }
        if self.initial.is_some() {
            return Err(SyncError::InFlight(RequestKind::Initial.label()));
        }
        let ticket = self.ticket(RequestKind::Poll, store);
        self.poll = Some(ticket.seq);
        Ok(PageRequest {
            ticket,
            limit: self.poll_limit(store.len()),
            offset: 0,
            snapshot: store.snapshot(),
        })
    }

    /// What a poll tick should fetch. Until a first page has landed the tick
    /// re-issues the initial load instead of polling.
    pub fn request_tick(&mut self, store: &TimelineStore) -> Result<PageRequest> {
        if store.generation() == 0 && self.initial.is_none() {
            return Ok(self.request_initial(store));
        }
        self.request_poll(store)
    }

    pub fn poll_limit(&self, held: usize) -> usize {
        self.page_size.max(held + self.poll_margin)
    }

    fn check(&self, ticket: &Ticket, store: &TimelineStore) -> Result<()> {
        let outstanding = match ticket.kind {
            RequestKind::Initial => self.initial,
            RequestKind::Older => self.older,
            RequestKind::Poll => self.poll,
        };
        if outstanding != Some(ticket.seq)
            || ticket.conversation != self.conversation
            || ticket.conversation != store.conversation()
            || ticket.generation != store.generation()
        {
            debug!(
                kind = ticket.kind.label(),
                conversation = %ticket.conversation,
                generation = ticket.generation,
                "Dropping stale response"
            );
            return Err(SyncError::Stale {
                conversation: ticket.conversation,
                generation: ticket.generation,
            });
        }
        Ok(())
    }

    /// Accept a successful response. Errors with `Stale` if it must be dropped.
    pub fn complete(&mut self, ticket: &Ticket, store: &TimelineStore) -> Result<()> {
        self.check(ticket, store)?;
        *self.slot(ticket.kind) = None;
        Ok(())
    }

    /// Record a failed request. Returns true if the failure should be shown.
    pub fn fail(&mut self, ticket: &Ticket, store: &TimelineStore, error: &anyhow::Error) -> Result<bool> {
        self.check(ticket, store)?;
        *self.slot(ticket.kind) = None;
        match ticket.kind {
            RequestKind::Poll => {
                warn!(conversation = %ticket.conversation, "Poll failed, retrying next tick: {:#}", error);
                Ok(false)
            }
            RequestKind::Older => {
                warn!(conversation = %ticket.conversation, "Loading older messages failed: {:#}", error);
                self.older_failed = true;
                Ok(true)
            }
            RequestKind::Initial => {
                warn!(conversation = %ticket.conversation, "Initial load failed: {:#}", error);
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::TimelineWindow;
    use api::{Direction, Message};

    const CONV: ConversationId = ConversationId(7);

    fn wire(ids: std::ops::RangeInclusive<i64>) -> Vec<Message> {
        ids.rev()
            .map(|id| Message::new(id, Direction::In, format!("m{}", id)))
            .collect()
    }

    fn loaded(ids: std::ops::RangeInclusive<i64>, page_size: usize) -> (PaginationController, TimelineStore) {
        let mut pager = PaginationController::new(CONV, page_size, 10);
        let mut store = TimelineStore::new(CONV, page_size);
        let req = pager.request_initial(&store);
        pager.complete(&req.ticket, &store).unwrap();
        store.replace(TimelineWindow::from_wire(wire(ids), req.limit, req.offset));
        (pager, store)
    }

    fn top() -> ViewportMetrics {
        ViewportMetrics::new(0.0, 3000.0, 600.0)
    }

    #[test]
    fn test_initial_request_shape() {
        let mut pager = PaginationController::new(CONV, 30, 10);
        let store = TimelineStore::new(CONV, 30);
        let req = pager.request_initial(&store);

        assert_eq!((req.limit, req.offset), (30, 0));
        assert_eq!(pager.state(), LoadState::LoadingInitial);
        pager.complete(&req.ticket, &store).unwrap();
        assert_eq!(pager.state(), LoadState::Idle);
    }

    #[test]
    fn test_older_page_is_single_flight() {
        let (mut pager, store) = loaded(11..=30, 20);
        let anchor = ViewportAnchor::default();

        assert!(pager.should_load_older(&store, &anchor, &top()));
        let req = pager.request_older(&store).unwrap();
        assert_eq!((req.limit, req.offset), (20, 20));
        assert_eq!(pager.state(), LoadState::LoadingOlder);

        assert!(!pager.should_load_older(&store, &anchor, &top()));
        assert!(matches!(pager.request_older(&store), Err(SyncError::InFlight(_))));
    }

    #[test]
    fn test_no_older_trigger_when_history_exhausted() {
        let (pager, store) = loaded(1..=5, 20);
        assert!(!store.has_more());
        assert!(!pager.should_load_older(&store, &ViewportAnchor::default(), &top()));
    }

    #[test]
    fn test_no_older_trigger_away_from_top() {
        let (pager, store) = loaded(11..=30, 20);
        let middle = ViewportMetrics::new(900.0, 3000.0, 600.0);
        assert!(!pager.should_load_older(&store, &ViewportAnchor::default(), &middle));
    }

    #[test]
    fn test_older_failure_shows_notice_and_rearms() {
        let (mut pager, store) = loaded(11..=30, 20);
        let req = pager.request_older(&store).unwrap();

        let shown = pager.fail(&req.ticket, &store, &anyhow::anyhow!("503")).unwrap();
        assert!(shown);
        assert!(pager.older_failed());
        assert_eq!(pager.state(), LoadState::Idle);
        assert!(pager.should_load_older(&store, &ViewportAnchor::default(), &top()));

        pager.request_older(&store).unwrap();
        assert!(!pager.older_failed());
    }

    #[test]
    fn test_tick_retries_failed_initial_load() {
        let mut pager = PaginationController::new(CONV, 30, 10);
        let mut store = TimelineStore::new(CONV, 30);
        let req = pager.request_initial(&store);

        // Still loading: the tick waits for it.
        assert!(matches!(pager.request_tick(&store), Err(SyncError::InFlight(_))));

        pager.fail(&req.ticket, &store, &anyhow::anyhow!("503")).unwrap();
        assert_eq!(pager.state(), LoadState::Idle);

        let retry = pager.request_tick(&store).unwrap();
        assert_eq!(retry.ticket.kind, RequestKind::Initial);
        assert_eq!((retry.limit, retry.offset), (30, 0));
        pager.complete(&retry.ticket, &store).unwrap();
        store.replace(TimelineWindow::from_wire(wire(11..=40), retry.limit, retry.offset));

        let poll = pager.request_tick(&store).unwrap();
        assert_eq!(poll.ticket.kind, RequestKind::Poll);
    }

    #[test]
    fn test_poll_limit_covers_held_messages() {
        let (mut pager, store) = loaded(1..=30, 30);
        let req = pager.request_poll(&store).unwrap();
        assert_eq!((req.limit, req.offset), (40, 0));

        assert_eq!(pager.poll_limit(0), 30);
        assert_eq!(pager.poll_limit(15), 30);
    }

    #[test]
    fn test_poll_failure_is_silent() {
        let (mut pager, store) = loaded(1..=30, 30);
        let req = pager.request_poll(&store).unwrap();
        assert!(matches!(pager.request_poll(&store), Err(SyncError::InFlight(_))));

        let shown = pager.fail(&req.ticket, &store, &anyhow::anyhow!("timeout")).unwrap();
        assert!(!shown);
        assert!(pager.request_poll(&store).is_ok());
    }

    #[test]
    fn test_poll_waits_for_initial_load() {
        let mut pager = PaginationController::new(CONV, 30, 10);
        let store = TimelineStore::new(CONV, 30);
        pager.request_initial(&store);
        assert!(pager.request_poll(&store).is_err());
    }

    #[test]
    fn test_responses_after_reload_are_stale() {
        let (mut pager, mut store) = loaded(11..=30, 20);
        let older = pager.request_older(&store).unwrap();
        let reload = pager.request_initial(&store);

        // The reload supersedes the outstanding older page.
        assert!(matches!(pager.complete(&older.ticket, &store), Err(SyncError::Stale { .. })));

        pager.complete(&reload.ticket, &store).unwrap();
        store.replace(TimelineWindow::from_wire(wire(21..=40), 20, 0));

        let poll = pager.request_poll(&store).unwrap();
        store.replace(TimelineWindow::from_wire(wire(21..=40), 20, 0));
        assert!(matches!(pager.complete(&poll.ticket, &store), Err(SyncError::Stale { .. })));
    }

    #[test]
    fn test_ticket_for_other_conversation_rejected() {
        let (mut pager, store) = loaded(11..=30, 20);
        let req = pager.request_poll(&store).unwrap();
        let other = TimelineStore::new(ConversationId(8), 20);
        assert!(pager.complete(&req.ticket, &other).is_err());
    }
}
