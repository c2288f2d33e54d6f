//! Extraction of sendable drafts from co-pilot answers
//!
//! An answer may embed blocks of the form
//!
//! ```text
//! <send_to_conversation conversation_id="42" label="Parent (Ana)">draft text</send_to_conversation>
//! ```
//!
//! Each complete block gets an ordinal from its position among all complete
//! blocks in the answer, so re-parsing a growing buffer while it streams keeps
//! the identity of drafts that were already shown.

use api::ConversationId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const OPEN_TAG: &str = "<send_to_conversation";
const CLOSE_TAG: &str = "</send_to_conversation>";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalDraft {
    /// Index of the assistant entry in the chat log the draft came from
    pub source_message_index: usize,
    pub ordinal: usize,
    pub target_conversation_id: ConversationId,
    pub target_label: String,
    pub draft_text: String,
    pub sent: bool,
}

impl ProposalDraft {
    pub fn key(&self) -> (usize, usize) {
        (self.source_message_index, self.ordinal)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Commentary(String),
    Draft(ProposalDraft),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedProposals {
    pub segments: Vec<Segment>,
    /// Text outside of any block, trimmed
    pub commentary: String,
    /// An opening tag with no closing tag yet; hidden until it completes
    pub pending_tail: Option<String>,
}

impl ParsedProposals {
    pub fn drafts(&self) -> impl Iterator<Item = &ProposalDraft> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Draft(d) => Some(d),
            Segment::Commentary(_) => None,
        })
    }

    pub fn drafts_mut(&mut self) -> impl Iterator<Item = &mut ProposalDraft> {
        self.segments.iter_mut().filter_map(|s| match s {
            Segment::Draft(d) => Some(d),
            Segment::Commentary(_) => None,
        })
    }

    pub fn draft(&self, ordinal: usize) -> Option<&ProposalDraft> {
        self.drafts().find(|d| d.ordinal == ordinal)
    }

    /// Flag drafts recorded as already sent.
    pub fn apply_sent(&mut self, sent: &SentProposals) {
        for draft in self.drafts_mut() {
            if sent.contains(draft.source_message_index, draft.ordinal) {
                draft.sent = true;
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Text(&'a str),
    Open { raw: &'a str, attrs: &'a str },
    Close(&'a str),
    /// Incomplete tag at the very end of the input
    Partial(&'a str),
}

fn tokenize(input: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while let Some(rel) = input[i..].find('<') {
        let at = i + rel;
        let tail = &input[at..];

        if tail.starts_with(CLOSE_TAG) {
            push_text(&mut tokens, input, text_start, at);
            let end = at + CLOSE_TAG.len();
            tokens.push(Token::Close(&input[at..end]));
            i = end;
            text_start = end;
            continue;
        }

        if let Some(after) = tail.strip_prefix(OPEN_TAG) {
            if after.is_empty() || after.starts_with(|c: char| c.is_whitespace() || c == '>') {
                match find_tag_end(after) {
                    Some(gt) => {
                        push_text(&mut tokens, input, text_start, at);
                        let end = at + OPEN_TAG.len() + gt + 1;
                        tokens.push(Token::Open {
                            raw: &input[at..end],
                            attrs: &after[..gt],
                        });
                        i = end;
                        text_start = end;
                        continue;
                    }
                    None => {
                        push_text(&mut tokens, input, text_start, at);
                        tokens.push(Token::Partial(tail));
                        return tokens;
                    }
                }
            }
        } else if OPEN_TAG.starts_with(tail) || CLOSE_TAG.starts_with(tail) {
            push_text(&mut tokens, input, text_start, at);
            tokens.push(Token::Partial(tail));
            return tokens;
        }

        i = at + 1;
    }

    push_text(&mut tokens, input, text_start, input.len());
    tokens
}

/// Offset of the `>` closing an opening tag, skipping any inside quoted
/// attribute values.
fn find_tag_end(attrs: &str) -> Option<usize> {
    let mut quote = None;
    for (at, c) in attrs.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), _) if c == q => quote = None,
            (None, '>') => return Some(at),
            _ => {}
        }
    }
    None
}

fn push_text<'a>(tokens: &mut Vec<Token<'a>>, input: &'a str, from: usize, to: usize) {
    if to > from {
        tokens.push(Token::Text(&input[from..to]));
    }
}

/// `name="value"` / `name='value'` pairs; stops at the first thing that
/// does not look like an attribute.
fn parse_attrs(input: &str) -> Vec<(&str, &str)> {
    let mut attrs = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start().trim_end_matches('/');
        let name_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(rest.len());
        if name_len == 0 {
            break;
        }
        let name = &rest[..name_len];
        let Some(after_eq) = rest[name_len..].trim_start().strip_prefix('=') else {
            break;
        };
        let after_eq = after_eq.trim_start();
        let Some(quote) = after_eq.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            break;
        };
        let value_start = &after_eq[1..];
        let Some(close) = value_start.find(quote) else {
            break;
        };
        attrs.push((name, &value_start[..close]));
        rest = &value_start[close + 1..];
    }

    attrs
}

fn attr<'a>(attrs: &[(&'a str, &'a str)], name: &str) -> Option<&'a str> {
    attrs.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
}

fn build_draft(source_message_index: usize, ordinal: usize, attrs: &str, body: &str) -> Option<ProposalDraft> {
    let attrs = parse_attrs(attrs);
    let target: i64 = attr(&attrs, "conversation_id")?.trim().parse().ok()?;
    let label = attr(&attrs, "label").unwrap_or_default().trim();
    let draft_text = body.trim();
    if draft_text.is_empty() {
        return None;
    }
    Some(ProposalDraft {
        source_message_index,
        ordinal,
        target_conversation_id: ConversationId(target),
        target_label: if label.is_empty() {
            format!("Conversation {}", target)
        } else {
            label.to_string()
        },
        draft_text: draft_text.to_string(),
        sent: false,
    })
}

pub struct ProposalParser;

impl ProposalParser {
    pub fn parse(source_message_index: usize, buffer: &str) -> ParsedProposals {
        let mut segments = Vec::new();
        let mut commentary = String::new();
        let mut pending_tail = None;
        let mut ordinal = 0;

        // Open tag plus body text seen since it.
        let mut open: Option<(&str, &str, String)> = None;

        let mut push_commentary = |segments: &mut Vec<Segment>, text: &str| {
            if text.is_empty() {
                return;
            }
            commentary.push_str(text);
            match segments.last_mut() {
                Some(Segment::Commentary(prev)) => prev.push_str(text),
                _ => segments.push(Segment::Commentary(text.to_string())),
            }
        };

        for token in tokenize(buffer) {
            match token {
                Token::Text(text) => match open.as_mut() {
                    Some((_, _, body)) => body.push_str(text),
                    None => push_commentary(&mut segments, text),
                },
                Token::Open { raw, attrs } => {
                    // An earlier opening that never closed is just text.
                    if let Some((prev_raw, _, body)) = open.take() {
                        push_commentary(&mut segments, prev_raw);
                        push_commentary(&mut segments, &body);
                    }
                    open = Some((raw, attrs, String::new()));
                }
                Token::Close(raw) => match open.take() {
                    Some((_, attrs, body)) => {
                        if let Some(draft) = build_draft(source_message_index, ordinal, attrs, &body) {
                            segments.push(Segment::Draft(draft));
                        }
                        ordinal += 1;
                    }
                    None => push_commentary(&mut segments, raw),
                },
                Token::Partial(tail) => match open.as_mut() {
                    Some((_, _, body)) => body.push_str(tail),
                    None => pending_tail = Some(tail.to_string()),
                },
            }
        }

        if let Some((raw, _, body)) = open {
            let mut tail = raw.to_string();
            tail.push_str(&body);
            if let Some(extra) = pending_tail.take() {
                tail.push_str(&extra);
            }
            pending_tail = Some(tail);
        }

        segments.retain(|s| !matches!(s, Segment::Commentary(text) if text.trim().is_empty()));

        ParsedProposals {
            segments,
            commentary: commentary.trim().to_string(),
            pending_tail,
        }
    }
}

/// Drafts already forwarded, keyed by (source message index, ordinal).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SentProposals(BTreeSet<(usize, usize)>);

impl SentProposals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the draft was already recorded.
    pub fn insert(&mut self, source_message_index: usize, ordinal: usize) -> bool {
        self.0.insert((source_message_index, ordinal))
    }

    pub fn contains(&self, source_message_index: usize, ordinal: usize) -> bool {
        self.0.contains(&(source_message_index, ordinal))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(conversation: &str, label: &str, body: &str) -> String {
        format!(
            "<send_to_conversation conversation_id=\"{}\" label=\"{}\">{}</send_to_conversation>",
            conversation, label, body
        )
    }

    fn ordinals(parsed: &ParsedProposals) -> Vec<usize> {
        parsed.drafts().map(|d| d.ordinal).collect()
    }

    #[test]
    fn test_single_block_with_commentary() {
        let input = format!(
            "Here is a reply for the parent:\n{}\nLet me know.",
            block("42", "Parent (Ana)", " We can move the lesson to Friday. ")
        );
        let parsed = ProposalParser::parse(3, &input);

        let drafts: Vec<_> = parsed.drafts().collect();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].source_message_index, 3);
        assert_eq!(drafts[0].ordinal, 0);
        assert_eq!(drafts[0].target_conversation_id, ConversationId(42));
        assert_eq!(drafts[0].target_label, "Parent (Ana)");
        assert_eq!(drafts[0].draft_text, "We can move the lesson to Friday.");
        assert!(!drafts[0].sent);

        assert_eq!(parsed.commentary, "Here is a reply for the parent:\n\nLet me know.");
        assert_eq!(parsed.pending_tail, None);
    }

    #[test]
    fn test_segments_keep_order() {
        let input = format!("A {} B {} C", block("1", "x", "one"), block("2", "y", "two"));
        let parsed = ProposalParser::parse(0, &input);

        assert_eq!(parsed.segments.len(), 5);
        assert!(matches!(&parsed.segments[0], Segment::Commentary(t) if t == "A "));
        assert!(matches!(&parsed.segments[1], Segment::Draft(d) if d.draft_text == "one"));
        assert!(matches!(&parsed.segments[2], Segment::Commentary(t) if t == " B "));
        assert!(matches!(&parsed.segments[3], Segment::Draft(d) if d.draft_text == "two"));
        assert!(matches!(&parsed.segments[4], Segment::Commentary(t) if t == " C"));
    }

    #[test]
    fn test_single_quotes_and_free_attribute_order() {
        let input = "<send_to_conversation label='Tutor' conversation_id='7'>See you</send_to_conversation>";
        let parsed = ProposalParser::parse(0, input);

        let draft = parsed.draft(0).unwrap();
        assert_eq!(draft.target_conversation_id, ConversationId(7));
        assert_eq!(draft.target_label, "Tutor");
    }

    #[test]
    fn test_angle_bracket_inside_quoted_label() {
        let input = r#"<send_to_conversation conversation_id="9" label="Mom > Dad">Both of you are welcome</send_to_conversation>"#;
        let parsed = ProposalParser::parse(0, input);

        let draft = parsed.draft(0).unwrap();
        assert_eq!(draft.target_conversation_id, ConversationId(9));
        assert_eq!(draft.target_label, "Mom > Dad");
        assert_eq!(draft.draft_text, "Both of you are welcome");
        assert_eq!(parsed.commentary, "");

        // Cut off inside the quoted value: still an unfinished tag.
        let streaming = ProposalParser::parse(0, r#"Hi <send_to_conversation conversation_id="9" label="Mom > D"#);
        assert_eq!(streaming.drafts().count(), 0);
        assert_eq!(streaming.commentary, "Hi");
    }

    #[test]
    fn test_ordinals_stable_while_streaming() {
        let complete = format!(
            "Intro {} middle {} and {} done",
            block("1", "a", "first"),
            block("2", "b", "second"),
            block("3", "c", "third")
        );
        let cut = complete.find("<send_to_conversation conversation_id=\"3\"").unwrap() + 30;

        let partial = ProposalParser::parse(0, &complete[..cut]);
        assert_eq!(ordinals(&partial), vec![0, 1]);
        assert!(partial.pending_tail.is_some());
        assert!(!partial.commentary.contains("send_to_conversation"));

        let full = ProposalParser::parse(0, &complete);
        assert_eq!(ordinals(&full), vec![0, 1, 2]);
        assert_eq!(full.pending_tail, None);

        let before: Vec<_> = partial.drafts().cloned().collect();
        let after: Vec<_> = full.drafts().take(2).cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_unclosed_block_body_hidden_while_streaming() {
        let input = "Thinking... <send_to_conversation conversation_id=\"5\" label=\"P\">Dear par";
        let parsed = ProposalParser::parse(0, input);

        assert_eq!(parsed.drafts().count(), 0);
        assert_eq!(parsed.commentary, "Thinking...");
        assert_eq!(
            parsed.pending_tail.as_deref(),
            Some("<send_to_conversation conversation_id=\"5\" label=\"P\">Dear par")
        );
    }

    #[test]
    fn test_partial_tag_name_at_tail_hidden() {
        let parsed = ProposalParser::parse(0, "Reply below <send_to_conv");
        assert_eq!(parsed.commentary, "Reply below");
        assert_eq!(parsed.pending_tail.as_deref(), Some("<send_to_conv"));

        let parsed = ProposalParser::parse(0, &format!("{} <", block("1", "a", "x")));
        assert_eq!(parsed.pending_tail.as_deref(), Some("<"));
    }

    #[test]
    fn test_invalid_block_is_stripped_but_counted() {
        let input = format!(
            "{}{}",
            block("not-a-number", "a", "dropped"),
            block("9", "b", "kept")
        );
        let parsed = ProposalParser::parse(0, &input);

        assert_eq!(ordinals(&parsed), vec![1]);
        assert_eq!(parsed.commentary, "");
    }

    #[test]
    fn test_empty_body_is_not_a_draft() {
        let parsed = ProposalParser::parse(0, &block("4", "a", "   "));
        assert_eq!(parsed.drafts().count(), 0);
    }

    #[test]
    fn test_reopened_tag_makes_earlier_opening_commentary() {
        let input = format!(
            "<send_to_conversation conversation_id=\"1\" label=\"a\">oops {}",
            block("2", "b", "real")
        );
        let parsed = ProposalParser::parse(0, &input);

        let drafts: Vec<_> = parsed.drafts().collect();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].ordinal, 0);
        assert_eq!(drafts[0].target_conversation_id, ConversationId(2));
        assert!(parsed.commentary.starts_with("<send_to_conversation conversation_id=\"1\""));
        assert!(parsed.commentary.ends_with("oops"));
    }

    #[test]
    fn test_stray_close_tag_is_commentary() {
        let parsed = ProposalParser::parse(0, "text </send_to_conversation> more");
        assert_eq!(parsed.drafts().count(), 0);
        assert_eq!(parsed.commentary, "text </send_to_conversation> more");
    }

    #[test]
    fn test_missing_label_falls_back_to_conversation() {
        let input = "<send_to_conversation conversation_id=\"12\">hi</send_to_conversation>";
        let parsed = ProposalParser::parse(0, input);
        assert_eq!(parsed.draft(0).unwrap().target_label, "Conversation 12");
    }

    #[test]
    fn test_unrelated_angle_brackets_are_text() {
        let parsed = ProposalParser::parse(0, "score < 5 and <b>bold</b>");
        assert_eq!(parsed.commentary, "score < 5 and <b>bold</b>");
        assert_eq!(parsed.pending_tail, None);
    }

    #[test]
    fn test_sent_flags_applied() {
        let input = format!("{}{}", block("1", "a", "one"), block("2", "b", "two"));
        let mut parsed = ProposalParser::parse(4, &input);

        let mut sent = SentProposals::new();
        assert!(sent.insert(4, 1));
        assert!(!sent.insert(4, 1));
        parsed.apply_sent(&sent);

        let flags: Vec<bool> = parsed.drafts().map(|d| d.sent).collect();
        assert_eq!(flags, vec![false, true]);
    }

    #[test]
    fn test_sent_proposals_serialize_as_pairs() {
        let mut sent = SentProposals::new();
        sent.insert(2, 0);
        sent.insert(0, 1);
        let json = serde_json::to_string(&sent).unwrap();
        assert_eq!(json, "[[0,1],[2,0]]");

        let back: SentProposals = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sent);
    }
}
