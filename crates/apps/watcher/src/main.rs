//! Watcher - background job orchestrator for kiwis
//!
//! Onboards newly linked accounts and pages their Gmail inboxes in, one
//! scheduler tick at a time, until SIGINT/SIGTERM.

use anyhow::{Context, Result, anyhow, bail};
use log::{error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Instant;
use worker::{
    GmailClient, GmailCredentials, GmailEmailProcessor, OnboardingProcessor, Scheduler,
    ShutdownSignal, SqliteJobStore, WatcherConfig,
};

/// Messages from the signal handler and the scheduler thread
enum Event {
    Signal,
    Stopped(Result<()>),
}

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Watcher failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Bootstrap config directory
    if let Err(e) = config::init() {
        warn!("Failed to initialize config directory: {}", e);
    }

    let cfg = WatcherConfig::load().context("Failed to load watcher configuration")?;
    let db_path = cfg.database_path()?;
    info!("Opening job store at {}", db_path.display());
    let store = Arc::new(SqliteJobStore::open(&db_path)?);

    let credentials = GmailCredentials::load().map_err(|e| {
        if let Some(path) = GmailCredentials::default_credentials_path() {
            warn!(
                "To configure Gmail access, either:\n\
                 1. Place your Google OAuth credentials at: {}\n\
                 2. Or set environment variables: GMAIL_CLIENT_ID and GMAIL_CLIENT_SECRET",
                path.display()
            );
        }
        e.context("Gmail credentials not found")
    })?;
    let gmail = Arc::new(GmailClient::new(credentials));

    let scheduler = Scheduler::from_config(
        &cfg,
        store.clone(),
        Arc::new(OnboardingProcessor::new(store.clone())),
        Arc::new(GmailEmailProcessor::new(store, gmail, &cfg)),
    );

    let shutdown = ShutdownSignal::new();
    let (tx, rx) = mpsc::channel();

    let signal_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(Event::Signal);
    })
    .context("Failed to install signal handler")?;

    let loop_shutdown = shutdown.clone();
    thread::Builder::new()
        .name("scheduler".to_string())
        .spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| scheduler.run(&loop_shutdown)))
                .unwrap_or_else(|_| Err(anyhow!("Scheduler thread panicked")));
            let _ = tx.send(Event::Stopped(result));
        })
        .context("Failed to spawn scheduler thread")?;

    info!("Watcher running, press Ctrl+C to stop");

    // The loop only stops by itself on a fatal error
    match rx.recv() {
        Ok(Event::Stopped(result)) => return result,
        Ok(Event::Signal) => {}
        Err(_) => bail!("Scheduler thread exited without reporting"),
    }

    info!(
        "Shutdown requested, waiting up to {}s for the current job",
        cfg.shutdown_timeout_secs
    );
    shutdown.cancel();

    let deadline = Instant::now() + cfg.shutdown_timeout();
    loop {
        match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(Event::Stopped(result)) => {
                result?;
                info!("Watcher stopped");
                return Ok(());
            }
            Ok(Event::Signal) => warn!("Already shutting down"),
            Err(RecvTimeoutError::Timeout) => bail!(
                "Scheduler did not stop within {}s, forcing exit",
                cfg.shutdown_timeout_secs
            ),
            Err(RecvTimeoutError::Disconnected) => {
                bail!("Scheduler thread exited without reporting")
            }
        }
    }
}
