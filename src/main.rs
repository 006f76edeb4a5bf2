#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use lingolive::config::Config;
use lingolive::history::{HistoryItem, HistoryStore};
use lingolive::translate::{LanguageCode, TextClient};

/// Talk to Gemini in real time, or translate text with sentiment.
#[derive(Parser, Debug)]
#[command(name = "lingolive", version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug-level logs on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a live voice conversation (Ctrl-C to end)
    Converse,
    /// Translate text and analyze its sentiment
    Translate {
        text: String,
        /// Target language tag, e.g. es, ja, zh-TW
        #[arg(long = "to", value_name = "LANG", default_value = "en")]
        to: String,
    },
    /// Analyze the sentiment of text
    Sentiment { text: String },
    /// List supported target languages
    Languages,
    /// Inspect or edit translation history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryAction {
    /// Show saved translations, newest first
    List,
    /// Remove one entry
    Delete { id: String },
    /// Remove every entry
    Clear,
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "lingolive=debug"
    } else {
        "lingolive=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Converse => converse(&config).await,
        Commands::Translate { text, to } => translate(&config, &text, &to).await,
        Commands::Sentiment { text } => sentiment(&config, &text).await,
        Commands::Languages => {
            for code in LanguageCode::all() {
                println!("{:<6} {}", code.as_str(), code.display_name());
            }
            Ok(())
        }
        Commands::History { action } => history(&config, action),
    }
}

// ── Voice ────────────────────────────────────────────────────────

#[cfg(feature = "cpal-audio")]
async fn converse(config: &Config) -> Result<()> {
    use lingolive::audio::CpalDevices;
    use lingolive::voice::{
        ConversationController, ConversationSettings, ConversationStatus, ConversationUpdate,
        GeminiLiveConnector,
    };
    use std::sync::Arc;

    let api_key = config.resolve_api_key()?;
    let connector = Arc::new(GeminiLiveConnector::new(api_key)?);
    let devices = CpalDevices::from_config(&config.audio);
    let mut controller =
        ConversationController::new(devices, connector, ConversationSettings::from_config(config));
    let mut updates = controller.subscribe();

    let print_updates = |updates: &mut tokio::sync::mpsc::UnboundedReceiver<ConversationUpdate>| {
        while let Ok(update) = updates.try_recv() {
            match update {
                ConversationUpdate::Status { status, message } => {
                    if message.is_empty() {
                        eprintln!("[{status}]");
                    } else {
                        eprintln!("[{status}] {message}");
                    }
                }
                ConversationUpdate::TurnFinalized(turn) => {
                    println!("{}: {}", turn.speaker.label(), turn.text);
                }
                // Returned from `converse` once the session has wound down.
                ConversationUpdate::Error(_) => {}
            }
        }
    };

    let started = controller.start().await;
    print_updates(&mut updates);
    if let Err(e) = started {
        return conversation_outcome(Some(&e.user_message()));
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let event = tokio::select! {
            _ = &mut ctrl_c => None,
            event = controller.next_event() => event,
        };
        match event {
            Some(event) => controller.handle_event(event),
            None => controller.stop(),
        }
        print_updates(&mut updates);
        if controller.status() == ConversationStatus::Idle {
            break;
        }
    }

    conversation_outcome(controller.error_message())
}

/// A message the controller surfaced becomes the command's error.
#[cfg_attr(not(feature = "cpal-audio"), allow(dead_code))]
fn conversation_outcome(error_message: Option<&str>) -> Result<()> {
    match error_message {
        Some(message) => Err(anyhow::anyhow!("{message}")),
        None => Ok(()),
    }
}

#[cfg(not(feature = "cpal-audio"))]
async fn converse(_config: &Config) -> Result<()> {
    anyhow::bail!("lingolive was built without audio support; rebuild with --features cpal-audio")
}

// ── Text ─────────────────────────────────────────────────────────

fn text_client(config: &Config) -> Result<TextClient> {
    let api_key = config.resolve_api_key()?;
    Ok(TextClient::new(api_key, &config.text)?)
}

async fn translate(config: &Config, text: &str, to: &str) -> Result<()> {
    let target: LanguageCode = to.parse()?;
    let client = text_client(config)?;

    let (translated, sentiment) = tokio::join!(
        client.translate_text(text, target),
        client.analyze_sentiment(text)
    );
    let translated = translated.context("translation failed")?;
    let sentiment = sentiment.context("sentiment analysis failed")?;

    println!("{translated}");
    println!("Sentiment: {} ({})", sentiment.sentiment, sentiment.explanation);

    if !translated.is_empty() {
        let mut store = HistoryStore::load(config.history_path()?, config.history.max_entries)?;
        if store.add(HistoryItem::new(text, translated, sentiment, target)) {
            store.save()?;
        }
    }
    Ok(())
}

async fn sentiment(config: &Config, text: &str) -> Result<()> {
    let client = text_client(config)?;
    let result = client.analyze_sentiment(text).await?;
    println!("{}: {}", result.sentiment, result.explanation);
    Ok(())
}

fn history(config: &Config, action: HistoryAction) -> Result<()> {
    let mut store = HistoryStore::load(config.history_path()?, config.history.max_entries)?;
    match action {
        HistoryAction::List => {
            if store.items().is_empty() {
                println!("No translations saved.");
            }
            for item in store.items() {
                let when = chrono::DateTime::from_timestamp_millis(item.timestamp)
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "{}  {}  [{}] {} -> {}  ({})",
                    item.id,
                    when,
                    item.target_language_name,
                    item.input_text,
                    item.translated_text,
                    item.sentiment.sentiment
                );
            }
        }
        HistoryAction::Delete { id } => {
            if !store.delete(&id) {
                anyhow::bail!("no history entry with id {id}");
            }
            store.save()?;
        }
        HistoryAction::Clear => {
            store.clear();
            store.save()?;
        }
    }
    Ok(())
}
