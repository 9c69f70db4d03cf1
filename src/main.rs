// Character session server
//
// Serves character sessions over WebSocket (optionally TLS). Every flag can
// also be set through its CSE_* environment variable.

use anyhow::{Context, Result};
use character_session_engine::{EngineOptions, MemoryStore, Planner, Store, start_server};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Character session server.
#[derive(Parser, Debug)]
#[command(name = "character-session-server", version, about = "Character session server")]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "CSE_BIND_ADDR", default_value = "127.0.0.1:9000")]
    bind_addr: SocketAddr,

    /// Silence (seconds) after which a character is demoted.
    #[arg(long, env = "CSE_HEARTBEAT_TIMEOUT_SECS", default_value_t = 60)]
    heartbeat_timeout_secs: u64,

    /// Seconds a hosted session is kept before its tasks are reaped.
    #[arg(long, env = "CSE_GRACE_PERIOD_SECS", default_value_t = 3600)]
    grace_period_secs: u64,

    /// Planner attempts per call.
    #[arg(
        long,
        env = "CSE_PLANNER_ATTEMPTS",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    planner_attempts: u32,

    /// Store request timeout in seconds.
    #[arg(long, env = "CSE_STORE_TIMEOUT_SECS", default_value_t = 8)]
    store_timeout_secs: u64,

    /// Reply queue poll interval in seconds.
    #[arg(long, env = "CSE_REPLY_POLL_SECS", default_value_t = 10)]
    reply_poll_secs: u64,

    /// Conversation reconciliation period in seconds.
    #[arg(long, env = "CSE_RECONCILE_SECS", default_value_t = 120)]
    reconcile_secs: u64,

    /// Conversation starter poll interval in seconds.
    #[arg(long, env = "CSE_STARTER_POLL_SECS", default_value_t = 5)]
    starter_poll_secs: u64,

    /// Planned conversation starts per game day.
    #[arg(long, env = "CSE_MAX_DAILY_CONVERSATIONS", default_value_t = 3)]
    max_daily_conversations: usize,

    /// Entries kept per decision-log sequence.
    #[arg(long, env = "CSE_DECISION_LOG_CAPACITY", default_value_t = 64)]
    decision_log_capacity: usize,

    /// First game hour at which conversations may start.
    #[arg(long, env = "CSE_DAY_START_HOUR", default_value_t = 8)]
    day_start_hour: u32,

    /// Game hour after which no conversation starts.
    #[arg(long, env = "CSE_DAY_END_HOUR", default_value_t = 22)]
    day_end_hour: u32,

    /// TLS certificate chain (PEM).
    #[arg(long, env = "CSE_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// TLS private key (PEM).
    #[arg(long, env = "CSE_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Base URL of the remote planner (required with the `http` feature).
    #[arg(long, env = "CSE_PLANNER_URL")]
    planner_url: Option<String>,

    /// Planner request timeout in seconds (defaults to 8x the store timeout).
    #[arg(long, env = "CSE_PLANNER_TIMEOUT_SECS")]
    planner_timeout_secs: Option<u64>,

    /// Base URL of the remote store; an in-memory store is used when unset.
    #[arg(long, env = "CSE_STORE_URL")]
    store_url: Option<String>,
}

impl Cli {
    fn engine_options(&self) -> EngineOptions {
        let mut builder = EngineOptions::builder()
            .bind_addr(self.bind_addr)
            .heartbeat_timeout(Duration::from_secs(self.heartbeat_timeout_secs))
            .grace_period(Duration::from_secs(self.grace_period_secs))
            .planner_attempts(self.planner_attempts)
            .store_timeout(Duration::from_secs(self.store_timeout_secs))
            .reply_poll_interval(Duration::from_secs(self.reply_poll_secs))
            .reconcile_interval(Duration::from_secs(self.reconcile_secs))
            .starter_poll_interval(Duration::from_secs(self.starter_poll_secs))
            .max_daily_conversations(self.max_daily_conversations)
            .decision_log_capacity(self.decision_log_capacity)
            .day_window(self.day_start_hour, self.day_end_hour);
        if let (Some(cert), Some(key)) = (&self.tls_cert, &self.tls_key) {
            builder = builder.tls(cert, key);
        }
        builder.build()
    }

    fn planner_timeout(&self, options: &EngineOptions) -> Duration {
        self.planner_timeout_secs
            .map_or(options.store_timeout * 8, Duration::from_secs)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let options = cli.engine_options();
    options.validate().context("invalid configuration")?;
    let planner = build_planner(&cli, &options)?;
    let store = build_store(&cli, &options)?;

    let handle = start_server(options, planner, store)
        .await
        .context("starting listener")?;
    log::info!(
        "character-session-server {} listening on {}",
        character_session_engine::VERSION,
        handle.local_addr()
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    log::info!("Shutdown requested");
    handle.shutdown().await;
    Ok(())
}

#[cfg(feature = "http")]
fn build_planner(cli: &Cli, options: &EngineOptions) -> Result<Arc<dyn Planner>> {
    use character_session_engine::http::HttpPlanner;

    let url = cli
        .planner_url
        .clone()
        .context("--planner-url (CSE_PLANNER_URL) is required")?;
    let timeout = cli.planner_timeout(options);
    Ok(Arc::new(HttpPlanner::new(url, timeout)?))
}

#[cfg(not(feature = "http"))]
fn build_planner(cli: &Cli, options: &EngineOptions) -> Result<Arc<dyn Planner>> {
    use character_session_engine::{SessionError, planner_fn};

    if let Some(url) = &cli.planner_url {
        log::warn!(
            "Ignoring planner URL {url} (timeout {:?}); built without the `http` feature",
            cli.planner_timeout(options)
        );
    }
    log::warn!("Built without the `http` feature; every planner call will fail");
    Ok(planner_fn(|request| async move {
        Err(SessionError::planner_failure(
            format!("no planner configured for '{}'", request.name()),
            1,
        ))
    }))
}

#[cfg(feature = "http")]
fn build_store(cli: &Cli, options: &EngineOptions) -> Result<Arc<dyn Store>> {
    use character_session_engine::http::HttpStore;

    match &cli.store_url {
        Some(url) => Ok(Arc::new(HttpStore::new(url.clone(), options.store_timeout)?)),
        None => {
            log::warn!("No store URL set, using an in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(not(feature = "http"))]
fn build_store(cli: &Cli, _options: &EngineOptions) -> Result<Arc<dyn Store>> {
    if let Some(url) = &cli.store_url {
        log::warn!("Ignoring store URL {url}; built without the `http` feature");
    }
    log::info!("Using an in-memory store");
    Ok(Arc::new(MemoryStore::new()))
}
