//! Traffic logging for backend calls
//!
//! Request/response summaries go to the `traffic` tracing target at TRACE level.
//! Content is truncated to avoid leaking private conversation text into logs.

use tracing::trace;

/// Maximum characters to log for content
const MAX_CONTENT_LOG_CHARS: usize = 200;

/// Truncate a string for logging, adding ellipsis if truncated
pub(crate) fn truncate_for_log(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{}... ({} chars total)", truncated, char_count)
    }
}

fn summarize(value: &impl serde::Serialize) -> String {
    let json = serde_json::to_string(value).unwrap_or_else(|_| "<serialization error>".to_string());
    truncate_for_log(&json, MAX_CONTENT_LOG_CHARS)
}

pub fn log_request(endpoint: &str, request: &impl serde::Serialize) {
    trace!(target: "traffic", kind = "REQUEST", "[{}] {}", endpoint, summarize(request));
}

pub fn log_response_text(endpoint: &str, body: &str) {
    trace!(
        target: "traffic",
        kind = "RESPONSE",
        "[{}] {}",
        endpoint,
        truncate_for_log(body, MAX_CONTENT_LOG_CHARS)
    );
}

pub fn log_error(endpoint: &str, error: &str) {
    trace!(target: "traffic", kind = "ERROR", "[{}] {}", endpoint, error);
}

pub fn log_stream_start(endpoint: &str, request: &impl serde::Serialize) {
    trace!(target: "traffic", kind = "STREAM_START", "[{}] {}", endpoint, summarize(request));
}
