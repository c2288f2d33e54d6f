mod commands;
mod logging;
mod render;

use anyhow::{Context, Result};
use api::{ConsoleApi, ConversationId, HttpConsoleApi};
use clap::Parser;
use clap_derive::{Parser, Subcommand};
use commands::{Command, print_help};
use config::{PathManager, Settings, load_env_file};
use render::Printer;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tutordesk_core::{EngineCommand, EngineEvent, FileCache, KeyValueCache, MemoryCache, ProducerKind, SyncEngine};
use tutordesk_voice::{HttpTranscriber, SystemRecorder, ToggleOutcome, VoiceCapturePipeline};

#[derive(Subcommand, Debug)]
enum Mode {
    /// List conversations with unread counts
    Conversations,
    /// Follow a conversation live and reply from the terminal
    Tail { conversation: i64 },
    /// Stream a summary of a conversation
    Summarize { conversation: i64 },
    /// Ask the co-pilot about a conversation
    Ask {
        conversation: i64,
        #[arg(required = true)]
        question: Vec<String>,
    },
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Base URL of the console backend
    #[arg(long, env = "TUTORDESK_API_URL")]
    api_url: Option<String>,

    /// Bearer token for the console backend
    #[arg(long, env = "TUTORDESK_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Messages per page
    #[arg(long)]
    page_size: Option<usize>,

    /// Keep co-pilot history in memory only
    #[arg(long)]
    memory_cache: bool,

    /// Keep settings, cache and logs under this directory
    #[arg(long, env = "TUTORDESK_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log everything at trace level
    #[arg(long, short)]
    verbose: bool,
}

fn resolve_settings(args: &Args) -> Settings {
    let mut settings = Settings::load();
    if let Some(url) = &args.api_url {
        settings.api_base_url = url.clone();
    }
    if let Some(token) = &args.api_token {
        settings.api_token = Some(token.clone());
    }
    if let Some(page_size) = args.page_size {
        settings.page_size = page_size.max(1);
    }
    settings
}

fn open_cache(memory_only: bool) -> Result<Arc<dyn KeyValueCache>> {
    if memory_only {
        return Ok(Arc::new(MemoryCache::new()));
    }
    Ok(Arc::new(FileCache::open_default()?))
}

async fn list_conversations(mut engine: SyncEngine) -> Result<()> {
    engine.command(EngineCommand::RefreshConversations)?;
    while let Some(event) = engine.next_event().await {
        if let EngineEvent::ConversationsUpdated(conversations) = event {
            for c in conversations {
                let last = c.last_message.map(|m| m.content).unwrap_or_default();
                println!(
                    "{:>6}  {:<28} unread {:>3}  {}",
                    c.id.0,
                    c.display_name,
                    c.unread_from_subject,
                    last.lines().next().unwrap_or("")
                );
            }
            break;
        }
    }
    engine.shutdown().await;
    Ok(())
}

/// Run one stream to completion, printing as it arrives.
async fn run_stream(mut engine: SyncEngine, conversation: i64, kind: ProducerKind, question: String) -> Result<()> {
    let mut printer = Printer::default();
    engine.open_conversation(ConversationId(conversation))?;
    match kind {
        ProducerKind::Summary => engine.summarize()?,
        ProducerKind::Copilot => engine.ask_copilot(question)?,
    }

    loop {
        let event = tokio::select! {
            event = engine.next_event() => event,
            _ = tokio::signal::ctrl_c() => {
                engine.cancel_stream(kind)?;
                continue;
            }
        };
        let Some(event) = event else { break };

        let finished = match &event {
            EngineEvent::SummaryUpdated { done, failed, .. } => kind == ProducerKind::Summary && (*done || *failed),
            EngineEvent::CopilotUpdated { done, .. } => kind == ProducerKind::Copilot && *done,
            EngineEvent::StreamCancelled { kind: k, .. } => *k == kind,
            EngineEvent::Notice(notice) => notice.kind == tutordesk_core::NoticeKind::StreamFailed,
            _ => false,
        };
        if matches!(
            event,
            EngineEvent::SummaryUpdated { .. }
                | EngineEvent::CopilotUpdated { .. }
                | EngineEvent::StreamCancelled { .. }
                | EngineEvent::Notice(_)
        ) {
            printer.render(&event);
        }
        if finished {
            break;
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn build_voice(api: Arc<dyn ConsoleApi>) -> Option<VoiceCapturePipeline> {
    match SystemRecorder::new() {
        Ok(recorder) => Some(VoiceCapturePipeline::new(
            Box::new(recorder),
            Arc::new(HttpTranscriber::new(api)),
        )),
        Err(e) => {
            tracing::info!("Voice input unavailable: {}", e);
            None
        }
    }
}

enum Flow {
    Continue,
    Exit,
}

async fn handle_command(
    cmd: Command,
    engine: &SyncEngine,
    voice: &mut Option<VoiceCapturePipeline>,
    compose: &mut String,
) -> Result<Flow> {
    match cmd {
        Command::Quit => return Ok(Flow::Exit),
        Command::Help => print_help(),
        Command::Older => engine.command(EngineCommand::LoadOlder)?,
        Command::Summary => engine.summarize()?,
        Command::Ask(question) => engine.ask_copilot(question)?,
        Command::SendDraft { entry, ordinal } => engine.send_proposal(entry, ordinal)?,
        Command::Cancel => {
            engine.cancel_stream(ProducerKind::Summary)?;
            engine.cancel_stream(ProducerKind::Copilot)?;
        }
        Command::ClearAssistant => engine.command(EngineCommand::ClearAssistant)?,
        Command::Comments => engine.command(EngineCommand::RefreshComments)?,
        Command::Comment(text) => engine.command(EngineCommand::AddComment(text))?,
        Command::Open(id) => engine.open_conversation(ConversationId(id))?,
        Command::Dismiss => engine.command(EngineCommand::DismissNotice)?,
        Command::Mic => match voice.as_mut() {
            Some(pipeline) => match pipeline.toggle(compose).await {
                Ok(ToggleOutcome::Started) => println!("-- recording, /mic again to stop --"),
                Ok(ToggleOutcome::Transcribed(_)) => println!("-- compose: {} (/say to send) --", compose),
                Err(e) => eprintln!("! {}", e),
            },
            None => eprintln!("! Voice input is not available in this build"),
        },
        Command::MicCancel => {
            if voice.as_mut().is_some_and(|p| p.cancel()) {
                println!("-- recording discarded --");
            }
        }
        Command::SendCompose => {
            if compose.trim().is_empty() {
                eprintln!("! Nothing to send");
            } else {
                engine.send_message(std::mem::take(compose))?;
            }
        }
    }
    Ok(Flow::Continue)
}

async fn tail(mut engine: SyncEngine, conversation: i64, api: Arc<dyn ConsoleApi>) -> Result<()> {
    let mut printer = Printer::default();
    let mut voice = build_voice(api);
    let mut compose = String::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    engine.open_conversation(ConversationId(conversation))?;
    println!("Type /help for commands, Ctrl+D or /quit to exit.");

    loop {
        tokio::select! {
            event = engine.next_event() => match event {
                Some(event) => printer.render(&event),
                None => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    println!();
                    break;
                };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if !input.starts_with('/') {
                    engine.send_message(input)?;
                    continue;
                }
                match Command::parse(input) {
                    Ok(cmd) => {
                        if let Flow::Exit = handle_command(cmd, &engine, &mut voice, &mut compose).await? {
                            break;
                        }
                    }
                    Err(err) => println!("{}", err),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if let Some(pipeline) = voice.as_mut() {
        pipeline.cancel();
    }
    engine.shutdown().await;
    println!("Goodbye!");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    let args = Args::parse();
    if let Some(dir) = &args.data_dir {
        PathManager::set_data_dir(dir.clone());
    }
    PathManager::ensure_dirs_exist().context("Could not create data directories")?;

    let (_guard, log_dir) = logging::init_logging(args.verbose)?;
    tracing::info!(log_dir = %log_dir.display(), "Starting tutordesk");

    let settings = resolve_settings(&args);
    let token = settings.resolved_api_token();
    let api: Arc<dyn ConsoleApi> = Arc::new(
        HttpConsoleApi::connect(&settings.api_base_url, token.as_deref())
            .with_context(|| format!("Invalid API base URL {}", settings.api_base_url))?,
    );
    let cache = open_cache(args.memory_cache)?;
    let engine = SyncEngine::new(api.clone(), cache, settings);

    match args.mode {
        Mode::Conversations => list_conversations(engine).await,
        Mode::Tail { conversation } => tail(engine, conversation, api).await,
        Mode::Summarize { conversation } => run_stream(engine, conversation, ProducerKind::Summary, String::new()).await,
        Mode::Ask { conversation, question } => {
            run_stream(engine, conversation, ProducerKind::Copilot, question.join(" ")).await
        }
    }
}
