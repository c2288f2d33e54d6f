//! Live conversation sync for the tutoring ops console
//!
//! This crate provides:
//! - **Timeline**: `TimelineStore`, the ordered, de-duplicated message list
//! - **Paging**: `PaginationController` for initial, older and poll requests
//! - **Viewport**: `ViewportAnchor`, scroll correction planned per mutation
//! - **Streams**: `StreamConsumer` for summary and co-pilot token streams
//! - **Proposals**: `ProposalParser`, sendable drafts inside co-pilot answers
//! - **Read marker**: monotonic per-conversation read reports
//! - **Engine**: `SyncEngine`, the single task that ties these together

pub mod assistant;
pub mod cache;
pub mod engine;
pub mod error;
pub mod mock;
pub mod pagination;
pub mod poll;
pub mod proposal;
pub mod read_marker;
pub mod stream;
pub mod timeline;
pub mod viewport;

pub use assistant::{AssistantState, AssistantStore};
pub use cache::{FileCache, KeyValueCache, MemoryCache};
pub use engine::{EngineCommand, EngineEvent, Notice, NoticeKind, SyncEngine, TimelineUpdate};
pub use error::{Result, SyncError};
pub use pagination::{LoadState, PaginationController};
pub use poll::PollTask;
pub use proposal::{ParsedProposals, ProposalDraft, ProposalParser, Segment, SentProposals};
pub use read_marker::ReadMarker;
pub use stream::{ProducerKind, StreamConsumer, StreamHandle, StreamRegistry, StreamUpdate};
pub use timeline::{MergeOutcome, TimelineSnapshot, TimelineStore, TimelineWindow};
pub use viewport::{AnchorPlan, MutationReason, PendingScroll, ScrollCommand, ViewportAnchor, ViewportMetrics};
