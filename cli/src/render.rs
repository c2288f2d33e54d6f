//! Plain-text rendering of engine events

use api::{Direction, Message};
use std::collections::HashMap;
use std::io::{self, Write};
use tutordesk_core::viewport::MutationReason;
use tutordesk_core::{EngineEvent, ParsedProposals, ProducerKind};

/// Tracks how much of each streaming buffer has been printed, so updates
/// that carry the whole buffer print only the new tail.
#[derive(Default)]
pub struct Printer {
    summary_printed: usize,
    copilot_printed: HashMap<usize, usize>,
}

fn print_delta(buffer: &str, printed: &mut usize) {
    if let Some(tail) = buffer.get(*printed..) {
        print!("{}", tail);
        let _ = io::stdout().flush();
    }
    *printed = buffer.len();
}

pub fn format_message(message: &Message) -> String {
    let arrow = match message.direction {
        Direction::In => "<",
        Direction::Out => ">",
    };
    format!("[{}] {} {}", message.id, arrow, message.content)
}

pub fn print_drafts(entry_index: usize, proposals: &ParsedProposals) {
    for draft in proposals.drafts() {
        println!(
            "  draft {} {} -> {} ({}){}: {}",
            entry_index,
            draft.ordinal,
            draft.target_label,
            draft.target_conversation_id,
            if draft.sent { " [sent]" } else { "" },
            draft.draft_text
        );
    }
}

impl Printer {
    pub fn render(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::ConversationOpened(id) => {
                self.summary_printed = 0;
                self.copilot_printed.clear();
                println!("== conversation {} ==", id);
            }
            EngineEvent::TimelineChanged(update) => {
                if update.reason == MutationReason::PrependOlder {
                    println!("-- {} older messages --", update.added.len());
                }
                for message in update.messages.iter().filter(|m| update.added.contains(&m.id)) {
                    println!("{}", format_message(message));
                }
                if update.reason == MutationReason::InitialLoad && update.has_more {
                    println!("-- /older for earlier messages --");
                }
            }
            EngineEvent::LoadStateChanged { older_failed, .. } => {
                if *older_failed {
                    println!("-- couldn't load more, /older to retry --");
                }
            }
            EngineEvent::AssistantChanged { .. } => {}
            EngineEvent::Notice(notice) => eprintln!("! {}", notice.message),
            EngineEvent::NoticeDismissed => {}
            EngineEvent::MessageSent { .. } => {}
            EngineEvent::ProposalSent { target, ordinal, .. } => {
                println!("-- draft {} sent to conversation {} --", ordinal, target);
            }
            EngineEvent::CommentsUpdated { comments, .. } => {
                println!("-- {} notes --", comments.len());
                for comment in comments {
                    println!(
                        "  {} {}: {}",
                        comment.created_at.format("%Y-%m-%d %H:%M"),
                        comment.author.as_deref().unwrap_or("?"),
                        comment.comment_text
                    );
                }
            }
            EngineEvent::ConversationsUpdated(_) => {}
            EngineEvent::SummaryUpdated {
                buffer, done, failed, ..
            } => {
                if self.summary_printed == 0 && !buffer.is_empty() {
                    println!("-- summary --");
                }
                print_delta(buffer, &mut self.summary_printed);
                if *done || *failed {
                    println!();
                    self.summary_printed = 0;
                }
            }
            EngineEvent::CopilotUpdated {
                entry_index,
                buffer,
                proposals,
                done,
                ..
            } => {
                let printed = self.copilot_printed.entry(*entry_index).or_insert(0);
                if *printed == 0 && !buffer.is_empty() {
                    println!("-- co-pilot ({}) --", entry_index);
                }
                print_delta(buffer, printed);
                if *done {
                    println!();
                    print_drafts(*entry_index, proposals);
                }
            }
            EngineEvent::StreamCancelled { kind, .. } => {
                let label = match kind {
                    ProducerKind::Summary => "summary",
                    ProducerKind::Copilot => "co-pilot",
                };
                println!();
                println!("-- {} cancelled --", label);
                if *kind == ProducerKind::Summary {
                    self.summary_printed = 0;
                }
            }
            EngineEvent::AssistantCleared(_) => {
                self.summary_printed = 0;
                self.copilot_printed.clear();
                println!("-- co-pilot cleared --");
            }
        }
    }
}
