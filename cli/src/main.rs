//! Parley CLI - line-oriented shell around the chat session.
//!
//! # Event loop
//!
//! The session is cooperative: nothing inside it blocks. The shell loop
//! interleaves two sources with `tokio::select!`:
//!
//! 1. stdin lines - commands (`:new`, `:open`, ...) or message text
//! 2. a fixed pump tick - advances the outstanding request, printing
//!    incremental reply text as it arrives
//!
//! The deadline timer, stream consumption, and user input all ride this one
//! loop; a slow reply never blocks commands and vice versa.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Local};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use parley_config::ParleyConfig;
use parley_engine::title::TitleRules;
use parley_engine::{
    BackendClient, ChatSession, ConversationId, Message, NonEmptyString, PumpEvent, Role,
    SessionSettings, Settlement, StoreClient, SubmitError,
};

const PUMP_INTERVAL: Duration = Duration::from_millis(50);

fn init_tracing() {
    let env_filter = EnvFilter::try_from_env("PARLEY_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some((path, file)) = open_log_file() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();
        tracing::info!(path = %path.display(), "Logging initialized");
        return;
    }

    // If we can't open a log file, prefer "no logs" over interleaving log
    // lines with the conversation.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> Option<(PathBuf, std::fs::File)> {
    let dir = dirs::home_dir()?.join(".parley").join("logs");
    std::fs::create_dir_all(&dir).ok()?;
    let path = dir.join("parley.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .ok()?;
    Some((path, file))
}

fn session_from_config(config: &ParleyConfig) -> ChatSession {
    let settings = SessionSettings {
        request_deadline: config.request_timeout(),
        titles: TitleRules {
            greeting_prefixes: config.greeting_prefixes(),
            default_label: config.default_title_label(),
        },
        fallback_greeting: config.fallback_greeting(),
    };
    ChatSession::new(
        BackendClient::new(config.backend_url()),
        StoreClient::new(config.store_url()),
        settings,
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = match ParleyConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("warning: {e}; using defaults");
            tracing::warn!(%e, "Config load failed");
            ParleyConfig::default()
        }
    };

    let mut session = session_from_config(&config);
    if let Err(e) = session.refresh().await {
        tracing::warn!(%e, "Could not load the conversation list");
        eprintln!("warning: conversation store unavailable ({e})");
    }

    println!("parley - type a message, :help for commands, :quit to exit");
    run_shell(&mut session).await
}

async fn run_shell(session: &mut ChatSession) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(PUMP_INTERVAL);

    prompt(session)?;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if handle_line(session, line.trim()).await? {
                    break;
                }
                if !session.is_busy() {
                    prompt(session)?;
                }
            }
            _ = ticker.tick() => {
                for event in session.pump(Instant::now()) {
                    render_pump_event(session, &event)?;
                }
            }
        }
    }
    Ok(())
}

fn render_pump_event(session: &ChatSession, event: &PumpEvent) -> Result<()> {
    match event {
        PumpEvent::Opened => {}
        PumpEvent::Delta(text) => {
            print!("{text}");
            std::io::stdout().flush()?;
        }
        PumpEvent::Settled(settlement) => {
            match settlement {
                Settlement::Committed => println!(),
                Settlement::TimedOut | Settlement::Failed(_) => {
                    // The transcript tail carries the synthetic error text.
                    if let Some(last) = session.transcript().last() {
                        println!("{}", last.content());
                    }
                }
            }
            prompt(session)?;
        }
    }
    Ok(())
}

/// Returns `Ok(true)` when the shell should exit.
async fn handle_line(session: &mut ChatSession, line: &str) -> Result<bool> {
    if line.is_empty() {
        return Ok(false);
    }

    if let Some(command) = line.strip_prefix(':') {
        return run_command(session, command).await;
    }

    match NonEmptyString::new(line) {
        Ok(text) => match session.submit(text).await {
            Ok(()) => {}
            Err(SubmitError::Busy) => println!("(still waiting for the current reply)"),
            Err(e) => println!("error: {e}"),
        },
        Err(_) => {}
    }
    Ok(false)
}

async fn run_command(session: &mut ChatSession, command: &str) -> Result<bool> {
    let (name, arg) = match command.split_once(' ') {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match name {
        "quit" | "q" => return Ok(true),
        "help" => print_help(),
        "new" => match session.create().await {
            Ok(id) => println!("started conversation {id}"),
            Err(e) => println!("error: {e}"),
        },
        "list" => {
            if let Err(e) = session.refresh().await {
                println!("error: {e}");
            } else {
                print_conversations(session);
            }
        }
        "open" => match resolve_conversation(session, arg) {
            Some(id) => {
                session.select(&id).await;
                print_transcript(session);
            }
            None => println!("usage: :open <number from :list>"),
        },
        "rename" => {
            if arg.is_empty() {
                println!("usage: :rename <title>");
            } else if let Some(id) = session.active_conversation().cloned() {
                session.rename(&id, arg.to_owned());
            } else {
                println!("no active conversation");
            }
        }
        "delete" => {
            let target = if arg.is_empty() {
                session.active_conversation().cloned()
            } else {
                resolve_conversation(session, arg)
            };
            match target {
                Some(id) => match session.delete(&id).await {
                    Ok(()) => println!("deleted"),
                    Err(e) => println!("error: {e}"),
                },
                None => println!("nothing to delete"),
            }
        }
        "cleanup" => match session.cleanup().await {
            Ok(count) => println!("removed {count} empty conversations"),
            Err(e) => println!("error: {e}"),
        },
        other => println!("unknown command :{other} (try :help)"),
    }
    Ok(false)
}

fn resolve_conversation(session: &ChatSession, arg: &str) -> Option<ConversationId> {
    let index: usize = arg.parse().ok()?;
    session
        .conversations()
        .nth(index.checked_sub(1)?)
        .map(|c| c.id.clone())
}

fn print_help() {
    println!(":new            start a new conversation");
    println!(":list           list conversations");
    println!(":open <n>       open conversation n from the list");
    println!(":rename <title> rename the active conversation");
    println!(":delete [n]     delete the active (or n-th) conversation");
    println!(":cleanup        remove conversations with no messages");
    println!(":quit           exit");
}

fn print_conversations(session: &ChatSession) {
    let mut any = false;
    for (index, conversation) in session.conversations().enumerate() {
        any = true;
        let updated: DateTime<Local> = conversation.updated_at.into();
        let preview = conversation.last_message.as_deref().unwrap_or("");
        println!(
            "{:>3}. {}  ({} messages, {})  {}",
            index + 1,
            conversation.title,
            conversation.message_count,
            updated.format("%Y-%m-%d %H:%M"),
            preview,
        );
    }
    if !any {
        println!("(no conversations yet - just type a message)");
    }
}

fn print_transcript(session: &ChatSession) {
    for message in session.transcript() {
        print_message(message);
    }
}

fn print_message(message: &Message) {
    let speaker = match message.role() {
        Role::User => "you",
        Role::Assistant => message.agent().map_or("assistant", |a| a.as_str()),
        Role::System => "*",
    };
    println!("{speaker}: {}", message.content());
}

fn prompt(session: &ChatSession) -> Result<()> {
    let label = session
        .active_conversation()
        .and_then(|id| session.title_of(id))
        .unwrap_or("new");
    print!("[{label}] > ");
    std::io::stdout().flush()?;
    Ok(())
}
