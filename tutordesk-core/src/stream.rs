//! Incremental token streams (conversation summary, co-pilot chat)
//!
//! The response body is a sequence of blocks separated by a blank line. Each
//! block carries one `data:` line with a JSON payload; `{"t": "..."}` payloads
//! are token fragments, anything else is ignored here.

use api::ByteStream;
use bytes::{Buf, BytesMut};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const EVENT_PREFIX: &str = "data:";

/// Appended once to a buffer whose transport failed mid-stream
pub const STREAM_ERROR_FRAGMENT: &str = "\n\n[Connection lost, the response may be incomplete]";

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerKind {
    Summary,
    Copilot,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Token(String),
    /// Payload of a shape this layer does not interpret
    Other(serde_json::Value),
}

#[derive(Deserialize)]
struct TokenPayload {
    t: String,
}

/// Reassembles blocks from arbitrarily split transport chunks.
///
/// Works on bytes so a chunk boundary inside a multi-byte character is harmless.
#[derive(Default)]
pub struct BlockDecoder {
    pending: BytesMut,
}

impl BlockDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, next)) = find_block_end(&self.pending) {
            if let Some(event) = parse_block(&self.pending[..end]) {
                events.push(event);
            }
            self.pending.advance(next);
        }
        events
    }

    /// Flush a final block that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        let block = self.pending.split();
        parse_block(&block)
    }
}

/// Position of the first blank-line separator: (end of block, start of next).
fn find_block_end(buf: &[u8]) -> Option<(usize, usize)> {
    for i in 0..buf.len() {
        if buf[i] != b'\n' {
            continue;
        }
        match &buf[i + 1..] {
            [b'\n', ..] => return Some((i, i + 2)),
            [b'\r', b'\n', ..] => return Some((i, i + 3)),
            _ => {}
        }
    }
    None
}

fn parse_block(block: &[u8]) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(block);
    let payload = text
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .find_map(|line| line.strip_prefix(EVENT_PREFIX))?
        .trim_start();

    if payload.is_empty() {
        return None;
    }

    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            debug!("Skipping malformed stream payload: {}: {}", payload, e);
            return None;
        }
    };

    match serde_json::from_value::<TokenPayload>(value.clone()) {
        Ok(token) => Some(StreamEvent::Token(token.t)),
        Err(_) => Some(StreamEvent::Other(value)),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSession {
    pub producer_kind: ProducerKind,
    pub buffer: String,
    pub done: bool,
    pub cancelled: bool,
}

impl StreamSession {
    pub fn new(producer_kind: ProducerKind) -> Self {
        Self {
            producer_kind,
            buffer: String::new(),
            done: false,
            cancelled: false,
        }
    }

    /// Returns true if the buffer grew.
    pub fn apply(&mut self, event: StreamEvent) -> bool {
        match event {
            StreamEvent::Token(fragment) if !fragment.is_empty() => {
                self.buffer.push_str(&fragment);
                true
            }
            _ => false,
        }
    }

    pub fn fail(&mut self) {
        self.buffer.push_str(STREAM_ERROR_FRAGMENT);
        self.done = true;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamUpdate {
    pub handle_id: u64,
    pub kind: ProducerKind,
    pub buffer: String,
    pub done: bool,
    /// The transport failed; `buffer` ends with the error fragment
    pub failed: bool,
}

/// Running consumer. Dropping the handle cancels it.
pub struct StreamHandle {
    id: u64,
    kind: ProducerKind,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> ProducerKind {
        self.kind
    }

    /// Stop reading. No update is delivered after this returns.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

pub struct StreamConsumer;

impl StreamConsumer {
    /// Spawn a reader over `source`. `on_update` sees every grown buffer and
    /// one final update with `done` set.
    pub fn start<F>(kind: ProducerKind, source: ByteStream, on_update: F) -> StreamHandle
    where
        F: FnMut(StreamUpdate) + Send + 'static,
    {
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let task = tokio::spawn(pump(id, kind, source, token.clone(), on_update));
        StreamHandle { id, kind, token, task }
    }
}

async fn pump<F>(id: u64, kind: ProducerKind, mut source: ByteStream, token: CancellationToken, mut on_update: F)
where
    F: FnMut(StreamUpdate) + Send + 'static,
{
    let mut decoder = BlockDecoder::new();
    let mut session = StreamSession::new(kind);
    let mut failed = false;

    let emit = |session: &StreamSession, failed: bool, on_update: &mut F| {
        if token.is_cancelled() {
            return;
        }
        on_update(StreamUpdate {
            handle_id: id,
            kind,
            buffer: session.buffer.clone(),
            done: session.done,
            failed,
        });
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                session.cancelled = true;
                debug!(?kind, handle = id, chars = session.buffer.len(), "Stream cancelled");
                return;
            }
            next = source.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                for event in decoder.push(&chunk) {
                    if session.apply(event) {
                        emit(&session, false, &mut on_update);
                    }
                }
            }
            Some(Err(e)) => {
                warn!(?kind, handle = id, "Stream transport failed: {}", e);
                session.fail();
                failed = true;
                break;
            }
            None => {
                if let Some(event) = decoder.finish() {
                    session.apply(event);
                }
                session.done = true;
                break;
            }
        }
    }

    debug!(?kind, handle = id, chars = session.buffer.len(), failed, "Stream finished");
    emit(&session, failed, &mut on_update);
}

/// At most one live consumer per producer kind.
#[derive(Default)]
pub struct StreamRegistry {
    handles: HashMap<ProducerKind, StreamHandle>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a consumer, cancelling any previous one of the same kind first.
    pub fn start<F>(&mut self, kind: ProducerKind, source: ByteStream, on_update: F) -> u64
    where
        F: FnMut(StreamUpdate) + Send + 'static,
    {
        self.cancel(kind);
        let handle = StreamConsumer::start(kind, source, on_update);
        let id = handle.id();
        self.handles.insert(kind, handle);
        id
    }

    pub fn cancel(&mut self, kind: ProducerKind) -> bool {
        match self.handles.remove(&kind) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.cancel();
        }
    }

    /// Whether `handle_id` is the live consumer for `kind`.
    pub fn is_active(&self, kind: ProducerKind, handle_id: u64) -> bool {
        self.handles.get(&kind).is_some_and(|h| h.id() == handle_id)
    }

    /// Forget a consumer that reported `done`, if it is still the live one.
    pub fn finish(&mut self, kind: ProducerKind, handle_id: u64) {
        if self.is_active(kind, handle_id) {
            self.handles.remove(&kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use std::sync::{Arc, Mutex};

    fn tokens(events: Vec<StreamEvent>) -> String {
        events
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Token(t) => Some(t),
                StreamEvent::Other(_) => None,
            })
            .collect()
    }

    fn decode_chunks(chunks: &[&[u8]]) -> String {
        let mut decoder = BlockDecoder::new();
        let mut out = String::new();
        for chunk in chunks {
            out.push_str(&tokens(decoder.push(chunk)));
        }
        if let Some(StreamEvent::Token(t)) = decoder.finish() {
            out.push_str(&t);
        }
        out
    }

    fn source(chunks: Vec<anyhow::Result<&'static str>>) -> ByteStream {
        Box::pin(stream::iter(
            chunks
                .into_iter()
                .map(|c| c.map(|s| Bytes::from_static(s.as_bytes()))),
        ))
    }

    #[test]
    fn test_complete_blocks() {
        let data = b"data: {\"t\":\"a\"}\n\ndata: {\"t\":\"b\"}\n\n";
        assert_eq!(decode_chunks(&[data]), "ab");
    }

    #[test]
    fn test_every_split_point_yields_same_buffer() {
        let data: &[u8] = b"data: {\"t\":\"a\"}\n\ndata: {\"t\":\"b\"}\n\n";
        for split in 0..=data.len() {
            let (left, right) = data.split_at(split);
            assert_eq!(decode_chunks(&[left, right]), "ab", "split at {}", split);
        }
    }

    #[test]
    fn test_single_byte_chunks() {
        let data: &[u8] = b"data: {\"t\":\"hello \"}\n\ndata: {\"t\":\"world\"}\n\n";
        let chunks: Vec<&[u8]> = data.chunks(1).collect();
        assert_eq!(decode_chunks(&chunks), "hello world");
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let data = "data: {\"t\":\"café\"}\n\n".as_bytes();
        let split = data.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let (left, right) = data.split_at(split);
        assert_eq!(decode_chunks(&[left, right]), "café");
    }

    #[test]
    fn test_crlf_separators() {
        let data = b"data: {\"t\":\"a\"}\r\n\r\ndata: {\"t\":\"b\"}\r\n\r\n";
        assert_eq!(decode_chunks(&[data]), "ab");
    }

    #[test]
    fn test_malformed_payload_is_skipped() {
        let data = b"data: {\"t\":\"a\"}\n\ndata: {malformed json}\n\ndata: {\"t\":\"b\"}\n\n";
        assert_eq!(decode_chunks(&[data]), "ab");
    }

    #[test]
    fn test_other_payload_shapes_ignored() {
        let mut decoder = BlockDecoder::new();
        let events = decoder.push(b"event: meta\ndata: {\"usage\":{\"tokens\":3}}\n\ndata: {\"t\":\"x\"}\n\n");
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::Other(_)));
        assert_eq!(events[1], StreamEvent::Token("x".to_string()));
    }

    #[test]
    fn test_blocks_without_prefix_ignored() {
        let data = b": keep-alive\n\ndata: {\"t\":\"a\"}\n\n\n\n";
        assert_eq!(decode_chunks(&[data]), "a");
    }

    #[test]
    fn test_trailing_block_flushed_on_finish() {
        let data = b"data: {\"t\":\"a\"}\n\ndata: {\"t\":\"b\"}";
        assert_eq!(decode_chunks(&[data]), "ab");
    }

    #[tokio::test]
    async fn test_consumer_reports_growing_buffer_then_done() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        let handle = StreamConsumer::start(
            ProducerKind::Summary,
            source(vec![
                Ok("data: {\"t\":\"Par\"}\n\ndata: {\"t\":\"ent \"}"),
                Ok("\n\ndata: {\"t\":\"asks\"}\n\n"),
            ]),
            move |u| sink.lock().unwrap().push(u),
        );
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }

        let updates = updates.lock().unwrap();
        let buffers: Vec<&str> = updates.iter().map(|u| u.buffer.as_str()).collect();
        assert_eq!(buffers, vec!["Par", "Parent ", "Parent asks", "Parent asks"]);
        assert!(updates.last().unwrap().done);
        assert!(updates[..3].iter().all(|u| !u.done));
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_partial_buffer() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        let handle = StreamConsumer::start(
            ProducerKind::Copilot,
            source(vec![
                Ok("data: {\"t\":\"Draft so far\"}\n\n"),
                Err(anyhow::anyhow!("connection reset")),
                Ok("data: {\"t\":\"never\"}\n\n"),
            ]),
            move |u| sink.lock().unwrap().push(u),
        );
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }

        let updates = updates.lock().unwrap();
        let last = updates.last().unwrap();
        assert!(last.done);
        assert!(last.failed);
        assert_eq!(last.buffer, format!("Draft so far{}", STREAM_ERROR_FRAGMENT));
        assert_eq!(updates.iter().filter(|u| u.failed).count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_updates() {
        let (tx, rx) = futures::channel::mpsc::unbounded::<anyhow::Result<Bytes>>();
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        let handle = StreamConsumer::start(ProducerKind::Copilot, Box::pin(rx), move |u| {
            sink.lock().unwrap().push(u)
        });

        tx.unbounded_send(Ok(Bytes::from_static(b"data: {\"t\":\"a\"}\n\n"))).unwrap();
        while updates.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }

        handle.cancel();
        let _ = tx.unbounded_send(Ok(Bytes::from_static(b"data: {\"t\":\"b\"}\n\n")));
        drop(tx);
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }

        let updates = updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].buffer, "a");
    }

    #[tokio::test]
    async fn test_registry_replaces_same_kind() {
        let (_tx1, rx1) = futures::channel::mpsc::unbounded::<anyhow::Result<Bytes>>();
        let (_tx2, rx2) = futures::channel::mpsc::unbounded::<anyhow::Result<Bytes>>();
        let (_tx3, rx3) = futures::channel::mpsc::unbounded::<anyhow::Result<Bytes>>();
        let mut registry = StreamRegistry::new();

        let first = registry.start(ProducerKind::Summary, Box::pin(rx1), |_| {});
        let summary_two = registry.start(ProducerKind::Summary, Box::pin(rx2), |_| {});
        let copilot = registry.start(ProducerKind::Copilot, Box::pin(rx3), |_| {});

        assert!(!registry.is_active(ProducerKind::Summary, first));
        assert!(registry.is_active(ProducerKind::Summary, summary_two));
        assert!(registry.is_active(ProducerKind::Copilot, copilot));

        registry.finish(ProducerKind::Summary, first);
        assert!(registry.is_active(ProducerKind::Summary, summary_two));

        registry.cancel_all();
        assert!(!registry.is_active(ProducerKind::Copilot, copilot));
    }
}
