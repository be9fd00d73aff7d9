use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dominance_watch::{
    actors::{BotHandle, LoopConfig},
    config::{Settings, StorageConfig},
    logging,
    source::{CoinGeckoSource, RetryPolicy},
    storage::{JsonFileStore, MemoryStore, StateStore},
    telegram::TelegramTransport,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Read environment variables from this file before starting
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Override LOG_LEVEL
    #[arg(long)]
    log_level: Option<String>,
}

fn load_env_file(args: &Args) -> anyhow::Result<()> {
    match &args.env_file {
        Some(path) => {
            dotenv::from_path(path)
                .with_context(|| format!("failed to read env file {}", path.display()))?;
        }
        None => {
            // a missing ./.env is fine
            let _ = dotenv::dotenv();
        }
    }
    Ok(())
}

fn build_store(storage: &StorageConfig) -> Arc<dyn StateStore> {
    match storage {
        StorageConfig::File {
            subscribers_path,
            state_path,
        } => Arc::new(JsonFileStore::new(subscribers_path, state_path)),
        StorageConfig::None => Arc::new(MemoryStore::new()),
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => debug!("received ctrl-c"),
        _ = terminate => debug!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    load_env_file(&args)?;

    let mut settings = Settings::from_env()?;
    if let Some(level) = &args.log_level {
        settings.log.level = level.clone();
    }

    let _log_guard = logging::init(&settings.log)?;
    trace!("started with args: {args:?}");

    let store = build_store(&settings.storage);
    let transport = TelegramTransport::new(
        settings.telegram_api_base.clone(),
        settings.telegram_bot_token.clone(),
        settings.request_timeout,
    )?;
    let source = CoinGeckoSource::new(settings.metric.source_url.clone(), settings.request_timeout)?;

    let config = LoopConfig {
        defaults: settings.defaults,
        check_interval: settings.check_interval,
        poll_timeout: settings.updates_poll,
        poll_interval: settings.poll_interval,
        retry: RetryPolicy::new(settings.metric.attempts, settings.metric.backoff),
        metric_name: settings.metric.name.clone(),
        seed_subscriber: settings.seed_chat_id,
    };

    let (handle, task) = BotHandle::spawn(
        config,
        Arc::new(transport),
        Arc::new(source),
        store,
        CancellationToken::new(),
    );
    info!(
        "watching {} every {:?} (defaults upper={} lower={})",
        settings.metric.name, settings.check_interval, settings.defaults.upper, settings.defaults.lower
    );

    tokio::spawn(async move {
        wait_for_signal().await;
        handle.shutdown();
    });

    if let Err(e) = task.await {
        error!("event loop task failed: {e}");
    }

    Ok(())
}
