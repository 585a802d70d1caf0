use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info};

use denidin_agent::{
    Completer, HistoryAssembler, IncomingMessage, MessageKind, MessagePipeline, MessagingTransport,
    MockCompleter, Summariser,
};
use denidin_core::clock::{Clock, SystemClock};
use denidin_core::config::DeniDinConfig;
use denidin_lifecycle::LifecycleWorker;
use denidin_memory::{HashEmbedder, MemoryStore};
use denidin_sessions::SessionStore;
use denidin_users::UserDirectory;
use denidin_whatsapp::InMemoryTransport;

const EXIT_OK: u8 = 0;
const EXIT_RUNTIME_FATAL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "denidin_gateway=info".into()),
        )
        .init();

    let config_path = std::env::var("DENIDIN_CONFIG").ok();
    let config = match DeniDinConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            error!("runtime error: {e}");
            ExitCode::from(EXIT_RUNTIME_FATAL)
        }
    }
}

/// Wires every component against its default mock stack (no production LLM
/// or WhatsApp network client is shipped), runs the lifecycle worker's
/// startup sweep, then blocks until SIGINT/SIGTERM for a graceful shutdown.
async fn run(config: DeniDinConfig) -> anyhow::Result<()> {
    let data_root = std::path::Path::new(&config.data_root);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let sessions = Arc::new(SessionStore::new(
        data_root.join(&config.memory.session.storage_dir),
        clock.clone(),
        config.memory.session.session_timeout_hours,
    )?);

    let memory_db_path = data_root.join(&config.memory.longterm.storage_dir).join("memory.sqlite3");
    if let Some(parent) = memory_db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = rusqlite::Connection::open(&memory_db_path)?;
    let memory = Arc::new(MemoryStore::open(conn, Arc::new(HashEmbedder::default()), clock.clone())?);

    let users = Arc::new(UserDirectory::new(&config.user_roles, config.memory.session.max_tokens_by_role.clone()));

    let history = Arc::new(HistoryAssembler::new(
        sessions.clone(),
        memory.clone(),
        denidin_agent::ConstitutionCache::new(&config.constitution.file),
        config.llm.ai_model.clone(),
        config.llm.ai_reply_max_tokens,
        config.llm.temperature,
        config.memory.longterm.top_k_results,
        config.memory.longterm.min_similarity,
    ));

    let completer: Arc<dyn Completer> = Arc::new(MockCompleter::new());
    let transport: Arc<dyn MessagingTransport> = Arc::new(InMemoryTransport::new());

    let pipeline = Arc::new(MessagePipeline::new(
        users,
        sessions.clone(),
        history,
        completer.clone(),
        transport,
        denidin_agent::FixedReplies::default(),
        config.transport.assistant_name.clone(),
        4000,
    ));

    let summariser = Arc::new(Summariser::new(sessions.clone(), memory, completer, config.llm.ai_model.clone()));
    let worker = LifecycleWorker::new(
        sessions,
        summariser,
        clock,
        Duration::from_secs(config.memory.session.cleanup_interval_seconds),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // The crash-recovery sweep must finish before any foreground traffic is
    // handled, so it runs here, synchronously, ahead of the stdin loop.
    worker.startup_sweep(&shutdown_rx).await;

    let worker_handle = tokio::spawn(worker.run_periodic(shutdown_rx));
    let stdin_handle = tokio::spawn(run_stdin_loop(pipeline));

    info!("denidin gateway ready");
    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping lifecycle worker");

    shutdown_tx.send(true).ok();
    stdin_handle.abort();
    if let Err(e) = worker_handle.await {
        error!("lifecycle worker task panicked: {e}");
    }

    Ok(())
}

/// No production WhatsApp client ships with this crate, so
/// the bootstrap binary's inbound surface reads one message per line from
/// stdin — "chat_id: text" — and drives it through the same pipeline a real
/// webhook handler would call. Lines with no `:` are treated as a message
/// from the default demo chat.
async fn run_stdin_loop(pipeline: Arc<MessagePipeline>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let (chat_id, text) = match line.split_once(':') {
                    Some((chat_id, text)) => (chat_id.trim().to_string(), text.trim().to_string()),
                    None => ("demo-chat".to_string(), line),
                };
                let message = IncomingMessage {
                    id: denidin_core::ids::new_id(),
                    sender: chat_id.clone(),
                    chat_id,
                    text,
                    kind: MessageKind::Text,
                    timestamp: Utc::now(),
                    is_group: false,
                };
                pipeline.handle(message).await;
            }
            Ok(None) => break,
            Err(e) => {
                error!("stdin read error: {e}");
                break;
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
