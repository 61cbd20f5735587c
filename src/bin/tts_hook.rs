//! tts-hook: hook-side entry point for spoken notifications.
//!
//! Checks the deduplicator, then hands the message to the coordinator (or
//! speaks directly when it is down). Logs every decision to
//! ~/.tts-hook-history/YYYY-MM-DD.jsonl. Always exits 0: a notification
//! problem must never fail the hook that triggered it.

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tts_hooks::config::Config;
use tts_hooks::speaker::client::NotificationClient;
use tts_hooks::speaker::dedup::{MessageContext, MessageDeduplicator};
use tts_hooks::speaker::history::{now_timestamp, DecisionRecord, HistoryLog};
use tts_hooks::speaker::queue::{NotificationSource, Priority};
use tts_hooks::speaker::speech::CommandSpeaker;

#[derive(Parser, Debug)]
#[command(name = "tts-hook", about = "Speak a hook notification, deduplicated and queued")]
struct Cli {
    /// Path to config YAML
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Speak a message unless it was spoken recently
    Speak {
        message: String,
        /// Category label; inferred from the text when omitted
        #[arg(long)]
        category: Option<String>,
        /// critical, high, medium or normal
        #[arg(long, default_value = "normal")]
        priority: String,
        #[arg(long)]
        hook_type: Option<String>,
        #[arg(long)]
        tool_name: Option<String>,
        /// Extra free text used for category inference (repeatable)
        #[arg(long = "context")]
        context: Vec<String>,
    },
    /// Print deduplication statistics as JSON
    Stats,
    /// Clear the deduplication table
    Reset,
    /// Print a Markdown report of one day's decisions
    Report {
        #[arg(long, default_value = "today")]
        date: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let config = Config::load(cli.config.as_deref());

    match cli.command {
        Command::Speak {
            message,
            category,
            priority,
            hook_type,
            tool_name,
            context,
        } => {
            let context = MessageContext {
                category,
                fields: context,
            };
            let source = NotificationSource {
                hook_type,
                tool_name,
            };
            speak(&config, &message, &context, Priority::parse(&priority), source).await;
        }
        Command::Stats => {
            let dedup = MessageDeduplicator::new(config.dedup.clone());
            match serde_json::to_string_pretty(&dedup.get_stats()) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("Failed to serialize stats: {e}"),
            }
        }
        Command::Reset => {
            MessageDeduplicator::new(config.dedup.clone()).reset();
        }
        Command::Report { date } => {
            let log = HistoryLog::new(config.history.history_dir());
            println!("{}", log.report(&date));
        }
    }
}

async fn speak(
    config: &Config,
    message: &str,
    context: &MessageContext,
    priority: Priority,
    source: NotificationSource,
) {
    let t0 = Instant::now();
    let category = context.resolve_category(message);

    let (action, reason, coordinator_up) = if message.trim().is_empty() {
        ("skipped", Some("empty message".to_string()), false)
    } else {
        let dedup = MessageDeduplicator::new(config.dedup.clone());
        let decision = dedup.should_speak(message, context);
        if decision.allowed {
            let client =
                NotificationClient::new(&config.coordinator, CommandSpeaker::new(&config.speech));
            let metadata = serde_json::json!({ "category": category.as_str() });
            let outcome = client.send(message, priority, source.clone(), metadata).await;
            (
                outcome.action(),
                outcome.reason().map(str::to_string),
                outcome.coordinator_up(),
            )
        } else {
            ("suppressed", decision.reason, false)
        }
    };

    if config.history.enabled {
        HistoryLog::new(config.history.history_dir()).append(&DecisionRecord {
            timestamp: now_timestamp(),
            message: message.trim().to_string(),
            category: category.to_string(),
            priority: priority.to_string(),
            hook_type: source.hook_type,
            tool_name: source.tool_name,
            action: action.to_string(),
            reason,
            duration_ms: u64::try_from(t0.elapsed().as_millis()).unwrap_or(u64::MAX),
            coordinator_up,
        });
    }
}
