//! CLI binary for friday.

use clap::{Parser, Subcommand};
use friday::audio::AudioDevice;
use friday::audio::cpal_device::CpalDevice;
use friday::memory::{LongTermStore, MemoryRecord};
use friday::services::openai::{OpenAiLlm, OpenAiStt, OpenAiTts};
use friday::services::tts_cache::CachedTts;
use friday::services::{LanguageModel, SpeechToText, TextToSpeech};
use friday::vad::{EnergyClassifier, VoiceClassifier};
use friday::{
    BargeInPlayer, Collaborators, ConversationMemory, FridayConfig, RecordOutcome, RuntimeEvent,
    TurnOrchestrator, TurnRecorder,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Friday: a voice assistant that listens, remembers and can be interrupted.
#[derive(Parser)]
#[command(name = "friday", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start a voice conversation.
    Chat,

    /// List available audio devices.
    Devices,

    /// Record one utterance and print its transcript.
    Transcribe,

    /// Inspect long-term memory.
    Memory {
        #[command(subcommand)]
        action: MemoryCommand,
    },
}

#[derive(Subcommand)]
enum MemoryCommand {
    /// Records matching a query, best first.
    Search {
        query: String,
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// The newest records, optionally restricted to one topic tag.
    Recent {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        #[arg(short, long)]
        topic: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_logging()?;
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(config).await,
        Command::Devices => list_devices(),
        Command::Transcribe => run_transcribe(config).await,
        Command::Memory { action } => run_memory(&config, action),
    }
}

/// Log to stderr and to `<data_dir>/logs/friday.log`.
///
/// The returned guard flushes the file writer when dropped.
fn init_logging() -> anyhow::Result<WorkerGuard> {
    let log_dir = friday::app_dirs::logs_dir();
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::never(&log_dir, "friday.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("friday=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();
    Ok(guard)
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<FridayConfig> {
    let config = match path {
        Some(path) => FridayConfig::from_file(path)?,
        None => {
            let default_path = FridayConfig::default_config_path();
            if default_path.is_file() {
                FridayConfig::from_file(&default_path)?
            } else {
                FridayConfig::default()
            }
        }
    };
    config.validate()?;
    Ok(config)
}

/// Cancel `cancel` on Ctrl+C.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel.cancel();
        }
    });
}

type AudioStack = (Arc<dyn AudioDevice>, Arc<dyn VoiceClassifier>);

fn open_audio(config: &FridayConfig) -> anyhow::Result<AudioStack> {
    let device: Arc<dyn AudioDevice> = Arc::new(CpalDevice::new(&config.audio)?);
    let classifier: Arc<dyn VoiceClassifier> = Arc::new(EnergyClassifier::new(&config.vad)?);
    Ok((device, classifier))
}

async fn run_chat(config: FridayConfig) -> anyhow::Result<()> {
    println!("Friday v{}", env!("CARGO_PKG_VERSION"));

    let (device, classifier) = open_audio(&config)?;
    let recorder = TurnRecorder::new(Arc::clone(&device), Arc::clone(&classifier), &config)?;
    let player = BargeInPlayer::new(device, classifier, &config)?;
    let memory = Arc::new(ConversationMemory::open(&config.memory)?);

    let system_prompt = friday::personality::assemble_prompt(&config.personality)?;
    let stt: Arc<dyn SpeechToText> = Arc::new(OpenAiStt::new(config.stt.clone())?);
    let llm: Arc<dyn LanguageModel> = Arc::new(OpenAiLlm::new(config.llm.clone(), system_prompt)?);
    let tts: Arc<dyn TextToSpeech> = Arc::new(CachedTts::new(
        Arc::new(OpenAiTts::new(config.tts.clone())?),
        &config.tts,
    ));

    let (events_tx, events_rx) = broadcast::channel(64);
    let mut orchestrator =
        TurnOrchestrator::new(recorder, player, memory, Collaborators { stt, llm, tts })
            .with_recall_limit(config.memory.recall_limit)
            .with_runtime_events(events_tx);
    cancel_on_ctrl_c(orchestrator.cancellation_token());
    tokio::spawn(print_conversation(events_rx));

    println!("\nReady! Speak into your microphone. Say \"exit\" or press Ctrl+C to stop.\n");
    let end = orchestrator.run().await?;
    println!("\nGoodbye! ({end})");
    Ok(())
}

/// Echo transcripts and replies to stdout as they happen.
async fn print_conversation(mut events: broadcast::Receiver<RuntimeEvent>) {
    loop {
        match events.recv().await {
            Ok(RuntimeEvent::Transcription { text, .. }) => println!("You: {text}"),
            Ok(RuntimeEvent::AssistantReply { text, .. }) => println!("Friday: {text}"),
            Ok(RuntimeEvent::SessionEnded(_)) | Err(broadcast::error::RecvError::Closed) => break,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
        }
    }
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalDevice::list_input_devices()? {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in CpalDevice::list_output_devices()? {
        println!("  - {name}");
    }

    Ok(())
}

async fn run_transcribe(config: FridayConfig) -> anyhow::Result<()> {
    println!("Friday v{} - Transcription Mode", env!("CARGO_PKG_VERSION"));

    let (device, classifier) = open_audio(&config)?;
    let recorder = TurnRecorder::new(device, classifier, &config)?;
    let stt = OpenAiStt::new(config.stt.clone())?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    println!("\nSpeak into your microphone. Press Ctrl+C to cancel.\n");
    match recorder.record(&stt, &cancel).await? {
        RecordOutcome::Transcript(text) if text.is_empty() => println!("(nothing recognised)"),
        outcome => println!("{outcome}"),
    }
    Ok(())
}

fn run_memory(config: &FridayConfig, action: MemoryCommand) -> anyhow::Result<()> {
    let store = LongTermStore::open(&config.memory.store_path)?;
    let records = match action {
        MemoryCommand::Search { query, limit } => store.search(&query, limit),
        MemoryCommand::Recent { limit, topic } => store.recent(limit, topic.as_deref()),
    };
    if records.is_empty() {
        println!("No memories found in {}", store.path().display());
    }
    for record in &records {
        print_record(record);
    }
    Ok(())
}

fn print_record(record: &MemoryRecord) {
    let tags: Vec<&str> = record.tags.iter().map(String::as_str).collect();
    println!(
        "[{}] {} ({})",
        record.timestamp.format("%Y-%m-%d %H:%M"),
        record.category,
        tags.join(", ")
    );
    println!("  You: {}", record.user);
    println!("  Friday: {}", record.assistant);
}
