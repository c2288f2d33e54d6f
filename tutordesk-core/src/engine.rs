//! The sync engine: one task owning all conversation state
//!
//! Commands come in from the UI, network work runs in spawned tasks whose
//! results come back on an internal channel, and events go out to the UI.
//! Every result is checked against the conversation, store generation or
//! stream handle it was issued for before it touches state.

use api::{AiChatRequest, ByteStream, Comment, ConsoleApi, Conversation, ConversationId, Message, MessageId};
use config::Settings;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::assistant::{AssistantState, AssistantStore};
use crate::cache::KeyValueCache;
use crate::error::{Result, SyncError};
use crate::pagination::{LoadState, PageRequest, PaginationController, RequestKind};
use crate::poll::PollTask;
use crate::proposal::ParsedProposals;
use crate::read_marker::ReadMarker;
use crate::stream::{ProducerKind, StreamRegistry, StreamUpdate};
use crate::timeline::{TimelineStore, TimelineWindow};
use crate::viewport::{AnchorPlan, MutationReason, ViewportAnchor, ViewportMetrics};

#[derive(Clone, Debug)]
pub enum EngineCommand {
    OpenConversation(ConversationId),
    CloseConversation,
    /// Latest measured viewport; drives anchoring and the backward trigger
    ViewportChanged(ViewportMetrics),
    LoadOlder,
    DismissNotice,
    SendMessage(String),
    SendProposal { source_message_index: usize, ordinal: usize },
    RefreshComments,
    AddComment(String),
    Summarize,
    AskCopilot(String),
    CancelStream(ProducerKind),
    ClearAssistant,
    RefreshConversations,
    Shutdown,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    InitialLoadFailed,
    /// The dismissible "couldn't load more" notice
    LoadOlderFailed,
    SendFailed,
    CommentFailed,
    StreamFailed,
    CacheFailed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct TimelineUpdate {
    pub conversation: ConversationId,
    pub reason: MutationReason,
    pub messages: Vec<Message>,
    pub added: Vec<MessageId>,
    pub has_more: bool,
    /// Resolve against the viewport measured after the list re-renders
    pub plan: AnchorPlan,
}

#[derive(Clone, Debug)]
pub enum EngineEvent {
    ConversationOpened(ConversationId),
    TimelineChanged(TimelineUpdate),
    LoadStateChanged {
        conversation: ConversationId,
        state: LoadState,
        /// The "couldn't load more" notice is showing; scrolling up retries
        older_failed: bool,
    },
    Notice(Notice),
    NoticeDismissed,
    MessageSent {
        conversation: ConversationId,
        message: Message,
    },
    ProposalSent {
        source_conversation: ConversationId,
        source_message_index: usize,
        ordinal: usize,
        target: ConversationId,
    },
    CommentsUpdated {
        conversation: ConversationId,
        comments: Vec<Comment>,
    },
    ConversationsUpdated(Vec<Conversation>),
    /// Full assistant state after a load or a structural change
    AssistantChanged {
        conversation: ConversationId,
        state: AssistantState,
    },
    SummaryUpdated {
        conversation: ConversationId,
        buffer: String,
        done: bool,
        failed: bool,
    },
    CopilotUpdated {
        conversation: ConversationId,
        entry_index: usize,
        buffer: String,
        proposals: ParsedProposals,
        done: bool,
    },
    StreamCancelled {
        conversation: ConversationId,
        kind: ProducerKind,
    },
    AssistantCleared(ConversationId),
}

/// Results and timer ticks coming back into the loop
enum Completion {
    Page {
        request: PageRequest,
        result: anyhow::Result<Vec<Message>>,
    },
    Sent {
        conversation: ConversationId,
        proposal: Option<ProposalSource>,
        result: anyhow::Result<Message>,
    },
    Comments {
        conversation: ConversationId,
        result: anyhow::Result<Vec<Comment>>,
    },
    CommentAdded {
        conversation: ConversationId,
        result: anyhow::Result<Comment>,
    },
    Conversations(anyhow::Result<Vec<Conversation>>),
    StreamOpened {
        conversation: ConversationId,
        kind: ProducerKind,
        seq: u64,
        result: anyhow::Result<ByteStream>,
    },
    Stream {
        conversation: ConversationId,
        update: StreamUpdate,
    },
    MessagePollTick(ConversationId),
    ConversationPollTick,
}

/// Where a forwarded draft came from. `epoch` is the source conversation's
/// assistant epoch when the send started; a clear bumps it.
#[derive(Clone, Copy, Debug)]
struct ProposalSource {
    conversation: ConversationId,
    index: usize,
    ordinal: usize,
    epoch: u64,
}

#[derive(Clone)]
enum Tick {
    Messages(ConversationId),
    Conversations,
}

impl From<Tick> for Completion {
    fn from(tick: Tick) -> Self {
        match tick {
            Tick::Messages(id) => Completion::MessagePollTick(id),
            Tick::Conversations => Completion::ConversationPollTick,
        }
    }
}

/// Everything that belongs to the open conversation. Dropping it cancels
/// its poll and its streams.
struct ConversationState {
    id: ConversationId,
    store: TimelineStore,
    pager: PaginationController,
    viewport: Option<ViewportMetrics>,
    comments: Vec<Comment>,
    assistant: AssistantState,
    streams: StreamRegistry,
    /// Outstanding stream-open requests per producer
    stream_requests: HashMap<ProducerKind, u64>,
    /// Chat entry the live co-pilot stream writes into
    copilot_entry: Option<usize>,
    proposals_in_flight: HashSet<(usize, usize)>,
    _poll: PollTask,
}

struct Processor {
    api: Arc<dyn ConsoleApi>,
    assistant_store: AssistantStore,
    settings: Settings,
    anchor: ViewportAnchor,
    read_marker: ReadMarker,
    events: mpsc::UnboundedSender<EngineEvent>,
    completions: mpsc::UnboundedSender<Completion>,
    current: Option<ConversationState>,
    stream_seq: u64,
    conversations_in_flight: bool,
    /// Bumped per conversation on every assistant clear
    assistant_epochs: HashMap<ConversationId, u64>,
}

fn emit(events: &mpsc::UnboundedSender<EngineEvent>, event: EngineEvent) {
    if events.send(event).is_err() {
        debug!("Event receiver dropped");
    }
}

fn notice(events: &mpsc::UnboundedSender<EngineEvent>, kind: NoticeKind, message: impl Into<String>) {
    emit(
        events,
        EngineEvent::Notice(Notice {
            kind,
            message: message.into(),
        }),
    );
}

fn timeline_update(state: &ConversationState, reason: MutationReason, plan: AnchorPlan, added: Vec<MessageId>) -> EngineEvent {
    EngineEvent::TimelineChanged(TimelineUpdate {
        conversation: state.id,
        reason,
        messages: state.store.messages().to_vec(),
        added,
        has_more: state.store.has_more(),
        plan,
    })
}

fn load_state(state: &ConversationState) -> EngineEvent {
    EngineEvent::LoadStateChanged {
        conversation: state.id,
        state: state.pager.state(),
        older_failed: state.pager.older_failed(),
    }
}

/// The open conversation, if it is `conversation`.
fn current_for(current: &mut Option<ConversationState>, conversation: ConversationId) -> Option<&mut ConversationState> {
    match current.as_mut() {
        Some(state) if state.id == conversation => Some(state),
        _ => {
            debug!(%conversation, "Dropping result for a conversation that is no longer open");
            None
        }
    }
}

fn spawn_page_fetch(api: &Arc<dyn ConsoleApi>, completions: &mpsc::UnboundedSender<Completion>, request: PageRequest) {
    let api = Arc::clone(api);
    let tx = completions.clone();
    tokio::spawn(async move {
        let result = api
            .list_messages(request.ticket.conversation, request.limit, request.offset)
            .await;
        let _ = tx.send(Completion::Page { request, result });
    });
}

impl Processor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<EngineCommand>,
        mut completion_rx: mpsc::UnboundedReceiver<Completion>,
    ) {
        let (tick_tx, mut tick_rx) = mpsc::unbounded_channel::<Tick>();
        let _conversation_poll = PollTask::spawn(
            "conversations",
            Duration::from_millis(self.settings.conversation_poll_ms),
            tick_tx.clone(),
            Tick::Conversations,
        );
        self.refresh_conversations();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(EngineCommand::OpenConversation(id)) => self.open_conversation(id, &tick_tx).await,
                    Some(cmd) => self.handle_command(cmd).await,
                },
                Some(completion) = completion_rx.recv() => self.handle_completion(completion).await,
                Some(tick) = tick_rx.recv() => self.handle_completion(tick.into()).await,
            }
        }

        self.current = None;
        info!("Sync engine stopped");
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::OpenConversation(_) | EngineCommand::Shutdown => {}
            EngineCommand::CloseConversation => {
                if let Some(state) = self.current.take() {
                    info!(conversation = %state.id, "Conversation closed");
                }
            }
            EngineCommand::ViewportChanged(metrics) => self.viewport_changed(metrics),
            EngineCommand::LoadOlder => self.load_older(),
            EngineCommand::DismissNotice => {
                emit(&self.events, EngineEvent::NoticeDismissed);
                if let Some(state) = self.current.as_mut() {
                    state.pager.dismiss_notice();
                    emit(&self.events, load_state(state));
                }
            }
            EngineCommand::SendMessage(text) => self.send_message(text),
            EngineCommand::SendProposal {
                source_message_index,
                ordinal,
            } => self.send_proposal(source_message_index, ordinal),
            EngineCommand::RefreshComments => self.refresh_comments(),
            EngineCommand::AddComment(text) => self.add_comment(text),
            EngineCommand::Summarize => self.open_stream(ProducerKind::Summary, None),
            EngineCommand::AskCopilot(question) => self.ask_copilot(question).await,
            EngineCommand::CancelStream(kind) => self.cancel_stream(kind).await,
            EngineCommand::ClearAssistant => self.clear_assistant().await,
            EngineCommand::RefreshConversations => self.refresh_conversations(),
        }
    }

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Page { request, result } => self.page_completed(request, result),
            Completion::Sent {
                conversation,
                proposal,
                result,
            } => self.send_completed(conversation, proposal, result).await,
            Completion::Comments { conversation, result } => self.comments_loaded(conversation, result),
            Completion::CommentAdded { conversation, result } => self.comment_added(conversation, result),
            Completion::Conversations(result) => {
                self.conversations_in_flight = false;
                match result {
                    Ok(list) => emit(&self.events, EngineEvent::ConversationsUpdated(list)),
                    Err(e) => warn!("Conversation list poll failed: {:#}", e),
                }
            }
            Completion::StreamOpened {
                conversation,
                kind,
                seq,
                result,
            } => self.stream_opened(conversation, kind, seq, result).await,
            Completion::Stream { conversation, update } => self.stream_updated(conversation, update).await,
            Completion::MessagePollTick(conversation) => self.poll_messages(conversation),
            Completion::ConversationPollTick => self.refresh_conversations(),
        }
    }

    // ---- timeline ----

    async fn open_conversation(&mut self, id: ConversationId, ticks: &mpsc::UnboundedSender<Tick>) {
        // Drop the previous conversation first so its poll and streams stop.
        self.current = None;

        let assistant = match self.assistant_store.load(id).await {
            Ok(state) => state,
            Err(e) => {
                notice(&self.events, NoticeKind::CacheFailed, e.to_string());
                AssistantState::default()
            }
        };

        let store = TimelineStore::new(id, self.settings.page_size);
        let mut pager = PaginationController::from_settings(id, &self.settings);
        let request = pager.request_initial(&store);
        let poll = PollTask::spawn(
            "messages",
            Duration::from_millis(self.settings.message_poll_ms),
            ticks.clone(),
            Tick::Messages(id),
        );

        self.current = Some(ConversationState {
            id,
            store,
            pager,
            viewport: None,
            comments: Vec::new(),
            assistant: assistant.clone(),
            streams: StreamRegistry::new(),
            stream_requests: HashMap::new(),
            copilot_entry: None,
            proposals_in_flight: HashSet::new(),
            _poll: poll,
        });
        info!(conversation = %id, "Conversation opened");

        emit(&self.events, EngineEvent::ConversationOpened(id));
        emit(
            &self.events,
            EngineEvent::AssistantChanged {
                conversation: id,
                state: assistant,
            },
        );
        emit(
            &self.events,
            EngineEvent::LoadStateChanged {
                conversation: id,
                state: LoadState::LoadingInitial,
                older_failed: false,
            },
        );
        spawn_page_fetch(&self.api, &self.completions, request);
        self.refresh_comments();
    }

    fn viewport_changed(&mut self, metrics: ViewportMetrics) {
        let Some(state) = self.current.as_mut() else {
            return;
        };
        state.viewport = Some(metrics);
        if state.pager.should_load_older(&state.store, &self.anchor, &metrics) {
            self.load_older();
        }
    }

    fn load_older(&mut self) {
        let Some(state) = self.current.as_mut() else {
            return;
        };
        if !state.store.has_more() {
            return;
        }
        match state.pager.request_older(&state.store) {
            Ok(request) => {
                emit(&self.events, load_state(state));
                spawn_page_fetch(&self.api, &self.completions, request);
            }
            Err(e) => debug!(conversation = %state.id, "Older page not requested: {}", e),
        }
    }

    fn poll_messages(&mut self, conversation: ConversationId) {
        let Some(state) = current_for(&mut self.current, conversation) else {
            return;
        };
        match state.pager.request_tick(&state.store) {
            Ok(request) => {
                if request.ticket.kind == RequestKind::Initial {
                    info!(%conversation, "Retrying initial load");
                    emit(&self.events, load_state(state));
                }
                spawn_page_fetch(&self.api, &self.completions, request);
            }
            Err(e) => debug!(%conversation, "Poll tick skipped: {}", e),
        }
    }

    fn page_completed(&mut self, request: PageRequest, result: anyhow::Result<Vec<Message>>) {
        let ticket = request.ticket;
        let Some(state) = current_for(&mut self.current, ticket.conversation) else {
            return;
        };

        let items = match result {
            Ok(items) => items,
            Err(e) => {
                if let Ok(true) = state.pager.fail(&ticket, &state.store, &e) {
                    let kind = match ticket.kind {
                        RequestKind::Older => NoticeKind::LoadOlderFailed,
                        _ => NoticeKind::InitialLoadFailed,
                    };
                    let message = match kind {
                        NoticeKind::LoadOlderFailed => "Couldn't load more messages".to_string(),
                        _ => format!("Couldn't load messages: {:#}", e),
                    };
                    notice(&self.events, kind, message);
                    emit(&self.events, load_state(state));
                }
                return;
            }
        };

        if state.pager.complete(&ticket, &state.store).is_err() {
            return;
        }

        let window = TimelineWindow::from_wire(items, request.limit, request.offset);
        match ticket.kind {
            RequestKind::Initial => {
                let plan = self.anchor.plan(MutationReason::InitialLoad, state.viewport.as_ref());
                let batch = window.items.clone();
                state.store.replace(window);
                let added = state.store.ids();
                emit(&self.events, timeline_update(state, MutationReason::InitialLoad, plan, added));
                self.read_marker.dispatch(Arc::clone(&self.api), state.id, &batch);
            }
            RequestKind::Older => {
                let plan = self.anchor.plan(MutationReason::PrependOlder, state.viewport.as_ref());
                let fetched: Vec<MessageId> = window.items.iter().map(|m| m.id).collect();
                let before: HashSet<MessageId> = state.store.ids().into_iter().collect();
                let inserted = state.store.prepend_older(window);
                debug!(conversation = %state.id, inserted, has_more = state.store.has_more(), "Older page merged");
                let added: Vec<MessageId> = fetched.into_iter().filter(|id| !before.contains(id)).collect();
                // has_more may have flipped even when nothing new arrived.
                emit(&self.events, timeline_update(state, MutationReason::PrependOlder, plan, added));
            }
            RequestKind::Poll => {
                if window.is_empty() {
                    return;
                }
                let plan = self.anchor.plan(MutationReason::PollMerge, state.viewport.as_ref());
                let batch = window.items.clone();
                match state.store.merge_newer(window, &request.snapshot) {
                    Ok(outcome) if outcome.gap => {
                        info!(conversation = %state.id, "Poll window left a gap, reloading");
                        let reload = state.pager.request_initial(&state.store);
                        spawn_page_fetch(&self.api, &self.completions, reload);
                    }
                    Ok(outcome) => {
                        if outcome.changed {
                            emit(
                                &self.events,
                                timeline_update(state, MutationReason::PollMerge, plan, outcome.added),
                            );
                        }
                        self.read_marker.dispatch(Arc::clone(&self.api), state.id, &batch);
                    }
                    Err(e) => debug!(conversation = %state.id, "Poll merge dropped: {}", e),
                }
                return;
            }
        }

        emit(&self.events, load_state(state));
    }

    // ---- sending ----

    fn send_message(&mut self, text: String) {
        let Some(state) = self.current.as_ref() else {
            return;
        };
        let content = text.trim().to_string();
        if content.is_empty() {
            return;
        }
        self.spawn_send(state.id, content, None);
    }

    fn send_proposal(&mut self, source_message_index: usize, ordinal: usize) {
        let Some(state) = self.current.as_mut() else {
            return;
        };
        let Some(draft) = state
            .assistant
            .proposals(source_message_index)
            .and_then(|p| p.draft(ordinal).cloned())
        else {
            warn!(source_message_index, ordinal, "No such proposal");
            return;
        };
        if draft.sent || !state.proposals_in_flight.insert(draft.key()) {
            debug!(source_message_index, ordinal, "Proposal already sent or sending");
            return;
        }
        let conversation = state.id;
        let source = ProposalSource {
            conversation,
            index: source_message_index,
            ordinal,
            epoch: self.assistant_epoch(conversation),
        };
        self.spawn_send(draft.target_conversation_id, draft.draft_text, Some(source));
    }

    fn assistant_epoch(&self, conversation: ConversationId) -> u64 {
        self.assistant_epochs.get(&conversation).copied().unwrap_or(0)
    }

    fn spawn_send(&self, conversation: ConversationId, content: String, proposal: Option<ProposalSource>) {
        let api = Arc::clone(&self.api);
        let tx = self.completions.clone();
        tokio::spawn(async move {
            let result = api.send_message(conversation, &content).await;
            let _ = tx.send(Completion::Sent {
                conversation,
                proposal,
                result,
            });
        });
    }

    async fn send_completed(
        &mut self,
        conversation: ConversationId,
        proposal: Option<ProposalSource>,
        result: anyhow::Result<Message>,
    ) {
        if let Some(source) = proposal.filter(|s| s.epoch == self.assistant_epoch(s.conversation)) {
            if let Some(state) = self.current.as_mut().filter(|s| s.id == source.conversation) {
                state.proposals_in_flight.remove(&(source.index, source.ordinal));
            }
        }

        let message = match result {
            Ok(message) => message,
            Err(e) => {
                warn!(%conversation, "Send failed: {:#}", e);
                notice(&self.events, NoticeKind::SendFailed, format!("Message not sent: {:#}", e));
                return;
            }
        };

        if let Some(source) = proposal {
            if source.epoch == self.assistant_epoch(source.conversation) {
                self.record_sent(source.conversation, source.index, source.ordinal).await;
                emit(
                    &self.events,
                    EngineEvent::ProposalSent {
                        source_conversation: source.conversation,
                        source_message_index: source.index,
                        ordinal: source.ordinal,
                        target: conversation,
                    },
                );
            } else {
                debug!(
                    source = %source.conversation,
                    index = source.index,
                    ordinal = source.ordinal,
                    "Assistant cleared while the draft was sending, not recording it"
                );
            }
        }

        emit(
            &self.events,
            EngineEvent::MessageSent {
                conversation,
                message: message.clone(),
            },
        );

        if let Some(state) = self.current.as_mut().filter(|s| s.id == conversation) {
            let plan = self.anchor.plan(MutationReason::UserSent, state.viewport.as_ref());
            let id = message.id;
            state.store.append_local(message);
            emit(&self.events, timeline_update(state, MutationReason::UserSent, plan, vec![id]));
        }
    }

    async fn record_sent(&mut self, source: ConversationId, idx: usize, ord: usize) {
        let result = match self.current.as_mut() {
            Some(state) if state.id == source => {
                state.assistant.sent.insert(idx, ord);
                self.assistant_store.save_sent(source, &state.assistant.sent).await
            }
            _ => match self.assistant_store.load(source).await {
                Ok(mut stored) => {
                    stored.sent.insert(idx, ord);
                    self.assistant_store.save_sent(source, &stored.sent).await
                }
                Err(e) => Err(e),
            },
        };
        if let Err(e) = result {
            notice(&self.events, NoticeKind::CacheFailed, e.to_string());
        }
    }

    // ---- comments ----

    fn refresh_comments(&mut self) {
        let Some(state) = self.current.as_ref() else {
            return;
        };
        let conversation = state.id;
        let api = Arc::clone(&self.api);
        let tx = self.completions.clone();
        tokio::spawn(async move {
            let result = api.list_comments(conversation).await;
            let _ = tx.send(Completion::Comments { conversation, result });
        });
    }

    fn add_comment(&mut self, text: String) {
        let Some(state) = self.current.as_ref() else {
            return;
        };
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }
        let conversation = state.id;
        let api = Arc::clone(&self.api);
        let tx = self.completions.clone();
        tokio::spawn(async move {
            let result = api.add_comment(conversation, &text).await;
            let _ = tx.send(Completion::CommentAdded { conversation, result });
        });
    }

    fn comments_loaded(&mut self, conversation: ConversationId, result: anyhow::Result<Vec<Comment>>) {
        match result {
            Ok(comments) => {
                let Some(state) = current_for(&mut self.current, conversation) else {
                    return;
                };
                state.comments = comments;
                emit(
                    &self.events,
                    EngineEvent::CommentsUpdated {
                        conversation,
                        comments: state.comments.clone(),
                    },
                );
            }
            Err(e) => notice(&self.events, NoticeKind::CommentFailed, format!("Couldn't load notes: {:#}", e)),
        }
    }

    fn comment_added(&mut self, conversation: ConversationId, result: anyhow::Result<Comment>) {
        match result {
            Ok(comment) => {
                let Some(state) = current_for(&mut self.current, conversation) else {
                    return;
                };
                state.comments.push(comment);
                emit(
                    &self.events,
                    EngineEvent::CommentsUpdated {
                        conversation,
                        comments: state.comments.clone(),
                    },
                );
            }
            Err(e) => notice(&self.events, NoticeKind::CommentFailed, format!("Note not saved: {:#}", e)),
        }
    }

    fn refresh_conversations(&mut self) {
        if self.conversations_in_flight {
            return;
        }
        self.conversations_in_flight = true;
        let api = Arc::clone(&self.api);
        let tx = self.completions.clone();
        tokio::spawn(async move {
            let result = api.list_conversations().await;
            let _ = tx.send(Completion::Conversations(result));
        });
    }

    // ---- streams ----

    async fn ask_copilot(&mut self, question: String) {
        let Some(state) = self.current.as_mut() else {
            return;
        };
        let question = question.trim();
        if question.is_empty() {
            return;
        }
        let request = state.assistant.ask(question);
        let entry = state.assistant.begin_answer();
        state.copilot_entry = Some(entry);
        let conversation = state.id;

        emit(
            &self.events,
            EngineEvent::AssistantChanged {
                conversation,
                state: state.assistant.clone(),
            },
        );
        if let Err(e) = self.assistant_store.save_chat(conversation, &state.assistant.chat).await {
            notice(&self.events, NoticeKind::CacheFailed, e.to_string());
        }
        self.open_stream(ProducerKind::Copilot, Some(request));
    }

    fn open_stream(&mut self, kind: ProducerKind, chat: Option<AiChatRequest>) {
        let Some(state) = self.current.as_mut() else {
            return;
        };
        self.stream_seq += 1;
        let seq = self.stream_seq;
        state.streams.cancel(kind);
        state.stream_requests.insert(kind, seq);

        let conversation = state.id;
        let api = Arc::clone(&self.api);
        let tx = self.completions.clone();
        tokio::spawn(async move {
            let result = match (kind, chat) {
                (ProducerKind::Copilot, Some(request)) => api.ai_chat(conversation, &request).await,
                (ProducerKind::Copilot, None) => Err(anyhow::anyhow!("co-pilot stream without a question")),
                (ProducerKind::Summary, _) => api.summarize(conversation).await,
            };
            let _ = tx.send(Completion::StreamOpened {
                conversation,
                kind,
                seq,
                result,
            });
        });
    }

    async fn stream_opened(&mut self, conversation: ConversationId, kind: ProducerKind, seq: u64, result: anyhow::Result<ByteStream>) {
        let Some(state) = current_for(&mut self.current, conversation) else {
            return;
        };
        if state.stream_requests.get(&kind) != Some(&seq) {
            debug!(%conversation, ?kind, seq, "Dropping superseded stream");
            return;
        }
        state.stream_requests.remove(&kind);

        match result {
            Ok(source) => {
                let tx = self.completions.clone();
                let handle = state.streams.start(kind, source, move |update| {
                    let _ = tx.send(Completion::Stream { conversation, update });
                });
                debug!(%conversation, ?kind, handle, "Stream started");
            }
            Err(e) => {
                warn!(%conversation, ?kind, "Stream failed to start: {:#}", e);
                let placeholder = match kind {
                    ProducerKind::Copilot => state.copilot_entry.take(),
                    ProducerKind::Summary => None,
                };
                if let Some(entry) = placeholder {
                    // Drop the empty placeholder; the question stays in the log.
                    if entry + 1 == state.assistant.chat.len() && state.assistant.chat[entry].content.is_empty() {
                        state.assistant.chat.pop();
                    }
                    emit(
                        &self.events,
                        EngineEvent::AssistantChanged {
                            conversation,
                            state: state.assistant.clone(),
                        },
                    );
                    if let Err(e) = self.assistant_store.save_chat(conversation, &state.assistant.chat).await {
                        notice(&self.events, NoticeKind::CacheFailed, e.to_string());
                    }
                }
                notice(&self.events, NoticeKind::StreamFailed, format!("Assistant unavailable: {:#}", e));
            }
        }
    }

    async fn stream_updated(&mut self, conversation: ConversationId, update: StreamUpdate) {
        let Some(state) = current_for(&mut self.current, conversation) else {
            return;
        };
        if !state.streams.is_active(update.kind, update.handle_id) {
            debug!(%conversation, kind = ?update.kind, handle = update.handle_id, "Dropping update from replaced stream");
            return;
        }
        if update.done {
            state.streams.finish(update.kind, update.handle_id);
        }

        match update.kind {
            ProducerKind::Summary => {
                emit(
                    &self.events,
                    EngineEvent::SummaryUpdated {
                        conversation,
                        buffer: update.buffer.clone(),
                        done: update.done,
                        failed: update.failed,
                    },
                );
                state.assistant.summary = Some(update.buffer.clone());
                // A failed stream still keeps what arrived before the error.
                if update.done {
                    if let Err(e) = self.assistant_store.save_summary(conversation, &update.buffer).await {
                        notice(&self.events, NoticeKind::CacheFailed, e.to_string());
                    }
                }
            }
            ProducerKind::Copilot => {
                let Some(entry) = state.copilot_entry else {
                    return;
                };
                state.assistant.update_answer(entry, &update.buffer);
                let proposals = state.assistant.proposals(entry).unwrap_or_default();
                emit(
                    &self.events,
                    EngineEvent::CopilotUpdated {
                        conversation,
                        entry_index: entry,
                        buffer: update.buffer,
                        proposals,
                        done: update.done,
                    },
                );
                if update.done {
                    state.copilot_entry = None;
                    if let Err(e) = self.assistant_store.save_chat(conversation, &state.assistant.chat).await {
                        notice(&self.events, NoticeKind::CacheFailed, e.to_string());
                    }
                }
            }
        }
    }

    async fn cancel_stream(&mut self, kind: ProducerKind) {
        let Some(state) = self.current.as_mut() else {
            return;
        };
        let had_stream = state.streams.cancel(kind);
        let had_request = state.stream_requests.remove(&kind).is_some();
        if !had_stream && !had_request {
            return;
        }
        let conversation = state.id;

        // A cancelled answer keeps whatever text arrived.
        if kind == ProducerKind::Copilot && state.copilot_entry.take().is_some() {
            if let Err(e) = self.assistant_store.save_chat(conversation, &state.assistant.chat).await {
                notice(&self.events, NoticeKind::CacheFailed, e.to_string());
            }
        }
        emit(&self.events, EngineEvent::StreamCancelled { conversation, kind });
    }

    async fn clear_assistant(&mut self) {
        let Some(state) = self.current.as_mut() else {
            return;
        };
        state.streams.cancel_all();
        state.stream_requests.clear();
        state.copilot_entry = None;
        state.proposals_in_flight.clear();
        state.assistant.clear();

        let conversation = state.id;
        *self.assistant_epochs.entry(conversation).or_insert(0) += 1;
        if let Err(e) = self.assistant_store.clear(conversation).await {
            notice(&self.events, NoticeKind::CacheFailed, e.to_string());
        }
        emit(&self.events, EngineEvent::AssistantCleared(conversation));
    }
}

/// Handle to the running engine task.
pub struct SyncEngine {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
    event_rx: mpsc::UnboundedReceiver<EngineEvent>,
    processor_handle: JoinHandle<()>,
}

impl SyncEngine {
    pub fn new(api: Arc<dyn ConsoleApi>, cache: Arc<dyn KeyValueCache>, settings: Settings) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let processor = Processor {
            api,
            assistant_store: AssistantStore::new(cache),
            anchor: ViewportAnchor::from_settings(&settings),
            settings,
            read_marker: ReadMarker::new(),
            events: event_tx,
            completions: completion_tx,
            current: None,
            stream_seq: 0,
            conversations_in_flight: false,
            assistant_epochs: HashMap::new(),
        };
        let processor_handle = tokio::spawn(processor.run(cmd_rx, completion_rx));
        info!("Sync engine started");

        Self {
            cmd_tx,
            event_rx,
            processor_handle,
        }
    }

    pub fn command(&self, cmd: EngineCommand) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| SyncError::Closed)
    }

    pub fn open_conversation(&self, conversation: ConversationId) -> Result<()> {
        self.command(EngineCommand::OpenConversation(conversation))
    }

    pub fn report_viewport(&self, metrics: ViewportMetrics) -> Result<()> {
        self.command(EngineCommand::ViewportChanged(metrics))
    }

    pub fn send_message(&self, text: impl Into<String>) -> Result<()> {
        self.command(EngineCommand::SendMessage(text.into()))
    }

    pub fn send_proposal(&self, source_message_index: usize, ordinal: usize) -> Result<()> {
        self.command(EngineCommand::SendProposal {
            source_message_index,
            ordinal,
        })
    }

    pub fn summarize(&self) -> Result<()> {
        self.command(EngineCommand::Summarize)
    }

    pub fn ask_copilot(&self, question: impl Into<String>) -> Result<()> {
        self.command(EngineCommand::AskCopilot(question.into()))
    }

    pub fn cancel_stream(&self, kind: ProducerKind) -> Result<()> {
        self.command(EngineCommand::CancelStream(kind))
    }

    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        self.event_rx.recv().await
    }

    /// Stop the engine and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(EngineCommand::Shutdown);
        if let Err(e) = self.processor_handle.await {
            warn!("Sync engine task ended abnormally: {}", e);
        }
    }
}
