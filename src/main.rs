use relay::error::Result;
use relay::{
    Bot, Config, Event, Inbound, JobQueue, LocalTransport, SubmitterId, TransferStats, WorkerPool,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Chat id used for the console submitter.
const CONSOLE_CHAT: i64 = 1;

/// Main entry point for the relay.
///
/// # Steps
/// 1. Initializes logging with file, line numbers and thread IDs
/// 2. Loads configuration from `RELAY_*` environment variables
/// 3. Starts the worker pool over the loopback transport
/// 4. Feeds console commands to the bot until EOF or Ctrl-C
/// 5. Drains the queue and stops the workers
///
/// # Errors
/// Returns error if:
/// - Configuration is invalid
/// - The download or outbox directory cannot be created
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .init();

    info!("Starting relay...");

    let config = Config::from_env()?;
    let queue = Arc::new(JobQueue::new());
    let stats = Arc::new(TransferStats::new());
    let transport = Arc::new(LocalTransport::new(&config.outbox_dir).await?);

    let pool = WorkerPool::start(
        &config,
        Arc::clone(&queue),
        transport.clone(),
        Arc::clone(&stats),
    )
    .await?;
    let bot = Bot::new(&config, transport, queue, stats);

    // The console user doubles as the operator.
    let submitter = SubmitterId(config.admin_id.unwrap_or(1));

    if let Err(e) = run_console(&bot, submitter).await {
        error!("Console error: {}", e);
    }

    info!("Draining {} queued job(s)...", bot.pool_status().queue_depth);
    pool.shutdown().await;
    info!("Relay stopped");
    Ok(())
}

/// Reads commands from stdin until EOF or Ctrl-C.
///
/// # Format
/// - `/start`, `/admin`, `/skipcaption`
/// - `/setthumb <path>` stores a new thumbnail
/// - `file <path>` submits a local file
/// - `/rename` / `/skip` answer the option prompt
/// - anything else is free text, so a file can be renamed to `skip`
async fn run_console(bot: &Bot, submitter: SubmitterId) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut message_id = 0;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        message_id += 1;
        let inbound = match parse_command(trimmed).await {
            Ok(inbound) => inbound,
            Err(e) => {
                println!("Error: {e}");
                continue;
            }
        };
        let event = Event {
            submitter,
            chat_id: CONSOLE_CHAT,
            message_id,
            inbound,
        };
        if let Err(e) = bot.handle(event).await {
            warn!("Event failed: {}", e);
            println!("Error: {e}");
        }
    }
}

async fn parse_command(line: &str) -> Result<Inbound> {
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    let inbound = match head {
        "/start" => Inbound::Start,
        "/admin" => Inbound::Admin,
        "/skipcaption" => Inbound::SkipCaption,
        "/setthumb" if !rest.is_empty() => Inbound::SetThumbnail {
            file_id: rest.to_string(),
        },
        "file" if !rest.is_empty() => {
            let meta = tokio::fs::metadata(rest).await?;
            Inbound::Media {
                file_id: rest.to_string(),
                name: std::path::Path::new(rest)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string),
                size: meta.len(),
            }
        }
        "/rename" | "/skip" if rest.is_empty() => Inbound::Callback {
            data: head.trim_start_matches('/').to_string(),
        },
        _ => Inbound::Text(line.to_string()),
    };
    Ok(inbound)
}
