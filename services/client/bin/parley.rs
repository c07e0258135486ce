//! Terminal front end for a realtime voice conversation.
//!
//! Starts a live session on launch and prints settled transcript entries as
//! they arrive. Commands are read line by line from stdin; anything that is
//! not a command is sent as a text message.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use clap::Parser;
use parley_client::{
    Config, JsonFileStore, OpenAISessionFactory,
    presets::{PresetEdit, apply_edit},
};
use parley_core::{
    SessionHandle, SessionManager,
    generic_types::{SessionConfig, TurnMode},
    item::{InputMethod, ItemRole, ItemStatus},
    persona::{DEFAULT_PERSONA_ID, PersonaBook},
    session::{ConnectionState, SessionView},
    title::{LLMTitleService, OfflineTitleService, TitleService},
    transcript::TranscriptEntry,
};
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

const HELP: &str = "\
commands:
  <text>          send a text message
  /talk, /send    start / stop push-to-talk recording
  /mode           toggle manual and automatic turn detection
  /new            archive this conversation and start a new one
  /history        list archived conversations
  /personas       list persona presets
  /persona <n>    apply preset n and start a new conversation
  /persona add <character> | <voice> | <instructions>
  /persona edit <n> <character> | <voice> | <instructions>
  /persona rm <n> delete preset n
  /quit           end the session and exit";

#[derive(Parser, Debug)]
#[command(version, about = "Talk to a realtime voice assistant from the terminal")]
struct Args {
    /// Start in push-to-talk mode instead of automatic turn detection.
    #[arg(long)]
    manual: bool,

    /// Directory for conversation history and settings.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Derive titles locally from the first user message.
    #[arg(long)]
    offline_titles: bool,
}

/// Loads `*.md` prompt templates keyed by file stem. A missing directory
/// yields no templates.
fn load_prompts(prompts_path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    if !prompts_path.is_dir() {
        warn!(
            path = %prompts_path.display(),
            "Prompts directory not found, using built-in prompts"
        );
        return Ok(prompts);
    }
    for entry in fs::read_dir(prompts_path)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

fn speaker(entry: &TranscriptEntry) -> &'static str {
    match (entry.role, entry.input_method) {
        (ItemRole::User, Some(InputMethod::Voice)) => "you (voice)",
        (ItemRole::User, _) => "you",
        (ItemRole::Assistant, _) => "assistant",
        (ItemRole::System, _) => "system",
    }
}

/// Prints entries of the live session once they stop changing, plus
/// connection changes.
async fn print_transcript(mut view: tokio::sync::watch::Receiver<SessionView>) {
    let mut printed: HashSet<String> = HashSet::new();
    let mut connection = ConnectionState::Disconnected;
    loop {
        {
            let current = view.borrow_and_update();
            if current.connection != connection {
                connection = current.connection;
                println!(
                    "-- {:?} (session {}, {:?})",
                    connection,
                    current.live_index + 1,
                    current.mode
                );
            }
            for entry in &current.live_items {
                if entry.status == ItemStatus::InProgress || printed.contains(&entry.id) {
                    continue;
                }
                printed.insert(entry.id.clone());
                println!("{}: {}", speaker(entry), entry.text);
            }
        }
        if view.changed().await.is_err() {
            break;
        }
    }
}

fn print_history(view: &SessionView) {
    if view.history.is_empty() {
        println!("no archived conversations");
        return;
    }
    for session in &view.history {
        println!(
            "{:>3}. {} ({} entries)",
            session.index + 1,
            session.display_title(),
            session.items.len()
        );
    }
}

fn print_personas(book: &PersonaBook) {
    for (n, persona) in book.presets().iter().enumerate() {
        println!("{:>3}. {} [{}]", n + 1, persona.character, persona.voice);
    }
}

fn edit_personas(argument: &str, personas: &mut PersonaBook, store: &JsonFileStore) {
    match argument
        .parse::<PresetEdit>()
        .and_then(|edit| apply_edit(edit, personas, store))
    {
        Ok(summary) => println!("-- {summary}"),
        Err(e) => println!("!! {e:#}"),
    }
}

async fn dispatch(
    line: &str,
    handle: &SessionHandle,
    personas: &mut PersonaBook,
    store: &JsonFileStore,
) -> bool {
    let (command, argument) = match line.split_once(' ') {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    let result = match command {
        "/quit" | "/exit" => return false,
        "/help" => {
            println!("{HELP}");
            Ok(())
        }
        "/talk" => handle.press_to_talk_start().await,
        "/send" => handle.press_to_talk_stop().await,
        "/mode" => {
            let result = handle.toggle_capture_mode().await;
            println!("-- turn detection: {:?}", handle.view().mode);
            result
        }
        "/new" => handle.start_new_session().await,
        "/history" => {
            print_history(&handle.view());
            Ok(())
        }
        "/personas" => {
            print_personas(personas);
            Ok(())
        }
        "/persona" if argument.starts_with(|c: char| c.is_ascii_alphabetic()) => {
            edit_personas(argument, personas, store);
            Ok(())
        }
        "/persona" => {
            let chosen = argument
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|n| personas.presets().get(n));
            match chosen {
                Some(persona) => {
                    println!("-- applying persona {}", persona.character);
                    handle.apply_persona(persona.clone()).await
                }
                None => {
                    println!("no such persona, see /personas");
                    Ok(())
                }
            }
        }
        _ if command.starts_with('/') => {
            println!("unknown command, see /help");
            Ok(())
        }
        _ => handle.send_text_message(line).await,
    };
    if let Err(e) = result {
        println!("!! {e}");
    }
    true
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if args.manual {
        config.turn_detection = TurnMode::Manual;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(data_dir = %config.data_dir.display(), "Configuration loaded");

    // --- 3. Storage and Presets ---
    let store = JsonFileStore::new(&config.data_dir);
    let mut personas = store.load_personas();
    if let Err(e) = store.save_personas(&personas) {
        warn!("Failed to save persona presets: {}", e);
    }
    let persona = personas
        .get(DEFAULT_PERSONA_ID)
        .context("Default persona preset missing")?;

    // --- 4. Title Synthesis ---
    let prompts = load_prompts(&config.prompts_path)?;
    let openai_config = OpenAIConfig::new()
        .with_api_key(&config.openai_api_key)
        .with_api_base(&config.openai_api_base);
    let titles: Arc<dyn TitleService> = if args.offline_titles {
        Arc::new(OfflineTitleService)
    } else {
        Arc::new(LLMTitleService::new(
            openai_config,
            config.title_model.clone(),
            prompts,
        ))
    };

    // --- 5. Session Manager ---
    let session_config = SessionConfig {
        instructions: persona.instructions.clone(),
        voice: persona.voice,
        transcription_model: config.transcription_model.clone(),
        turn_detection: config.turn_detection,
    };
    let manager = SessionManager::new(
        Box::new(OpenAISessionFactory::from_config(&config)),
        Box::new(store.clone()),
        titles,
        session_config,
    );
    let (handle, task) = manager.spawn();
    tokio::spawn(print_transcript(handle.subscribe()));

    info!(
        model = %config.realtime_model,
        mode = ?config.turn_detection,
        "Starting session"
    );
    if let Err(e) = handle.start().await {
        println!("!! {e}");
        println!("use /new to try again");
    }
    println!("{HELP}");

    // --- 6. Read Commands ---
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if !dispatch(line, &handle, &mut personas, &store).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    if let Err(e) = handle.shutdown().await {
        warn!("Session manager already stopped: {}", e);
    }
    task.await.context("Session manager task failed")?;
    info!("Goodbye.");
    Ok(())
}
