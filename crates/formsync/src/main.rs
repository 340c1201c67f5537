//! `formsync` - CLI for the offline-first disclaimer form client
//!
//! This binary submits forms, manages the local queue and runs the background
//! sync scheduler.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::watch;
use tracing::warn;

use formsync::cli::{Cli, Command, ConfigCommand, DaemonCommand, QueueCommand};
use formsync::{
    init_logging, Config, ConnectivityMonitor, Error, HttpSubmissionApi, Listing, LocalQueue,
    ReachabilityProbe, StoredRegistrations, SubmissionApi, SubmissionClient, SubmitOutcome,
    SyncScheduler, SyncTrigger,
};

/// Everything a command may need, wired from the configuration.
#[derive(Debug)]
struct App {
    config: Config,
    queue: Option<LocalQueue>,
    facility: Option<Arc<StoredRegistrations>>,
    monitor: ConnectivityMonitor,
    probe: ReachabilityProbe,
    client: SubmissionClient,
}

impl App {
    async fn build(config: Config, offline: bool) -> anyhow::Result<Self> {
        let api: Arc<dyn SubmissionApi> = Arc::new(HttpSubmissionApi::new(
            &config.remote.base_url,
            config.request_timeout(),
        )?);

        let queue = match LocalQueue::initialize(config.database_path()).await {
            Ok(queue) => Some(queue),
            Err(e) if e.is_storage_unavailable() => {
                warn!("Offline storage disabled: {}", e);
                None
            }
            Err(e) => return Err(e.into()),
        };
        let facility = queue
            .clone()
            .map(|queue| Arc::new(StoredRegistrations::new(queue)));
        let trigger = match &facility {
            Some(facility) => SyncTrigger::new(facility.clone()),
            None => SyncTrigger::unavailable(),
        };

        let monitor = ConnectivityMonitor::global().clone();
        let probe = ReachabilityProbe::for_base_url(&config.remote.base_url, config.probe_timeout())?;
        if offline {
            monitor.set_online(false);
        } else {
            probe.refresh(&monitor).await;
        }

        let client = SubmissionClient::new(
            api,
            queue.clone(),
            monitor.clone(),
            trigger,
            config.sync.max_attempts,
        )
        .with_tag(config.sync.tag.clone());

        Ok(Self {
            config,
            queue,
            facility,
            monitor,
            probe,
            client,
        })
    }

    fn queue(&self) -> anyhow::Result<&LocalQueue> {
        Ok(self.queue.as_ref().ok_or(Error::OfflineStorageDisabled)?)
    }

    /// Deliver anything left over from earlier runs before doing new work.
    async fn foreground_sync(&self) {
        match self.client.on_foreground().await {
            Ok(Some(report)) if report.attempted > 0 => println!("{}", report.summary()),
            Ok(_) => {}
            Err(e) => warn!("Foreground sync failed: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let Cli {
        config: config_path,
        offline,
        command,
        ..
    } = cli;

    let command = match command {
        Command::Config(cmd) => return handle_config(config_path, cmd),
        other => other,
    };

    let config = Config::load_from(config_path).context("loading configuration")?;
    let app = App::build(config, offline).await?;

    match command {
        Command::Submit(cmd) => {
            app.foreground_sync().await;
            handle_submit(&app, cmd.fields.into_submission(), cmd.json).await
        }
        Command::List(cmd) => {
            app.foreground_sync().await;
            handle_list(&app, cmd.json).await
        }
        Command::Queue(cmd) => handle_queue(&app, cmd).await,
        Command::Sync(cmd) => handle_sync(&app, cmd.json).await,
        Command::Update(cmd) => {
            let updated = app
                .client
                .update_remote(cmd.id, cmd.fields.into_submission())
                .await?;
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&updated)?);
            } else {
                println!("Submission {} updated.", updated.id);
            }
            Ok(())
        }
        Command::Daemon(cmd) => handle_daemon(&app, &cmd).await,
        Command::Status(cmd) => handle_status(&app, cmd.json).await,
        // Handled before the queue was opened.
        Command::Config(_) => Ok(()),
    }
}

async fn handle_submit(
    app: &App,
    submission: formsync::Submission,
    json: bool,
) -> anyhow::Result<()> {
    let outcome = app.client.submit(submission).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.message());
        if let SubmitOutcome::Queued {
            key,
            sync_registered,
        } = &outcome
        {
            println!("  Queued as record {key}");
            if !sync_registered {
                println!("  Will be sent the next time formsync runs online");
            }
        }
    }

    match outcome {
        SubmitOutcome::Rejected { reason } | SubmitOutcome::Failed { reason } => bail!(reason),
        SubmitOutcome::Delivered(_) | SubmitOutcome::Queued { .. } => Ok(()),
    }
}

async fn handle_list(app: &App, json: bool) -> anyhow::Result<()> {
    let listing = app.client.list_submissions().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    match &listing {
        Listing::Remote(items) => {
            println!("{:<6} {:<10} {:<20} {:<28} Product", "ID", "Date", "Name", "Email");
            for item in items {
                let date = item.date.map(|d| d.to_string()).unwrap_or_default();
                println!(
                    "{:<6} {:<10} {:<20} {:<28} {}",
                    item.id, date, item.name, item.email, item.product
                );
            }
        }
        Listing::Local(records) => {
            println!("Offline: showing {} pending submission(s)", records.len());
            print_records(records);
        }
    }
    Ok(())
}

fn print_records(records: &[formsync::SubmissionRecord]) {
    if records.is_empty() {
        return;
    }
    println!(
        "{:<6} {:<10} {:<20} {:<28} {:<12} {:<8} Last error",
        "Key", "Date", "Name", "Email", "Product", "Attempts"
    );
    for record in records {
        println!(
            "{:<6} {:<10} {:<20} {:<28} {:<12} {:<8} {}",
            record.key.unwrap_or_default(),
            record.submission.date,
            record.submission.name,
            record.submission.email,
            record.submission.product,
            record.attempts,
            record.last_error.as_deref().unwrap_or("-"),
        );
    }
}

async fn handle_queue(app: &App, cmd: QueueCommand) -> anyhow::Result<()> {
    let queue = app.queue()?;

    match cmd {
        QueueCommand::List { json } => {
            let records = app.client.pending().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                println!("{} pending submission(s)", records.len());
                print_records(&records);
            }
        }
        QueueCommand::Edit { key, changes } => {
            if changes.is_empty() {
                bail!("nothing to change; pass at least one field");
            }
            let record = queue.get(key).await?.ok_or(Error::RecordNotFound { key })?;
            app.client
                .edit_pending(key, changes.apply(record.submission))
                .await?;
            println!("Record {key} updated.");
        }
        QueueCommand::Remove { key } => {
            if queue.get(key).await?.is_none() {
                return Err(Error::RecordNotFound { key }.into());
            }
            app.client.remove_pending(key).await?;
            println!("Record {key} removed.");
        }
        QueueCommand::DeadLetters { json } => {
            let dead = queue.dead_letters().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&dead)?);
            } else {
                println!("{} dead letter(s)", dead.len());
                for letter in &dead {
                    println!(
                        "{:<6} {} {} <{}> failed at {}: {}",
                        letter.record.key.unwrap_or_default(),
                        letter.record.submission.date,
                        letter.record.submission.name,
                        letter.record.submission.email,
                        letter.failed_at.format("%Y-%m-%d %H:%M:%S"),
                        letter.record.last_error.as_deref().unwrap_or("-"),
                    );
                }
            }
        }
        QueueCommand::Requeue { key } => {
            if !queue.requeue_dead_letter(key).await? {
                bail!("no dead letter with key {key}");
            }
            println!("Dead letter {key} moved back to the queue.");
        }
        QueueCommand::Discard { key } => {
            if !queue.discard_dead_letter(key).await? {
                bail!("no dead letter with key {key}");
            }
            println!("Dead letter {key} discarded.");
        }
    }
    Ok(())
}

async fn handle_sync(app: &App, json: bool) -> anyhow::Result<()> {
    if !app.monitor.is_online() {
        let pending = app.queue()?.count().await?;
        println!("Offline: {pending} submission(s) remain queued.");
        return Ok(());
    }

    let report = app.client.sync_now().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
    }
    Ok(())
}

async fn handle_daemon(app: &App, cmd: &DaemonCommand) -> anyhow::Result<()> {
    let (Some(facility), Some(worker)) = (&app.facility, app.client.worker()) else {
        return Err(Error::OfflineStorageDisabled.into());
    };

    let scheduler = SyncScheduler::new(
        facility.clone(),
        worker.clone(),
        app.monitor.clone(),
        app.config.sync.tag.clone(),
    )
    .with_sync_on_reconnect(app.config.sync.sync_on_reconnect)
    .with_poll_interval(app.config.registration_poll_interval());

    if cmd.once {
        match scheduler.dispatch().await? {
            Some(report) => println!("{}", report.summary()),
            None => println!("No sync due."),
        }
        return Ok(());
    }

    println!(
        "Watching {} for connectivity (Ctrl-C to stop)",
        app.probe.target()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let probe = app.probe.clone();
    let monitor = app.monitor.clone();
    let interval = app.config.probe_interval();
    let probe_shutdown = shutdown_rx.clone();
    let probe_task =
        tokio::spawn(async move { probe.run(monitor, interval, probe_shutdown).await });
    let scheduler_task = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    println!("Shutting down...");

    let _ = shutdown_tx.send(true);
    probe_task.await.context("probe task")?;
    scheduler_task.await.context("scheduler task")?;
    Ok(())
}

async fn handle_status(app: &App, json: bool) -> anyhow::Result<()> {
    let stats = match &app.queue {
        Some(queue) => Some(queue.stats().await?),
        None => None,
    };

    if json {
        let status = serde_json::json!({
            "connectivity": app.monitor.state(),
            "remote": app.config.remote.base_url,
            "database_path": app.config.database_path(),
            "offline_storage": stats.is_some(),
            "pending": stats.as_ref().map(|s| s.pending),
            "dead_letters": stats.as_ref().map(|s| s.dead_letters),
            "registrations": stats.as_ref().map(|s| s.registrations),
            "oldest_pending": stats.as_ref().and_then(|s| s.oldest_pending),
            "db_size_bytes": stats.as_ref().map(|s| s.db_size_bytes),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("formsync status");
    println!("---------------");
    println!("Connectivity:  {}", app.monitor.state());
    println!("Remote:        {}", app.config.remote.base_url);
    println!("Database:      {}", app.config.database_path().display());
    match stats {
        Some(stats) => {
            println!("Pending:       {}", stats.pending);
            println!("Dead letters:  {}", stats.dead_letters);
            println!("Sync due:      {}", if stats.registrations > 0 { "yes" } else { "no" });
            if let Some(oldest) = stats.oldest_pending {
                println!("Oldest:        {}", oldest.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            println!("Database size: {} bytes", stats.db_size_bytes);
        }
        None => println!("Offline storage: unavailable"),
    }
    Ok(())
}

fn handle_config(config_path: Option<PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(config_path).context("loading configuration")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Remote]");
                println!("  Base URL:           {}", config.remote.base_url);
                println!("  Request timeout:    {}s", config.remote.request_timeout_secs);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!();
                println!("[Sync]");
                println!("  Tag:                {}", config.sync.tag);
                println!("  Max attempts:       {}", config.sync.max_attempts);
                println!("  Sync on reconnect:  {}", config.sync.sync_on_reconnect);
                println!(
                    "  Registration poll:  {}s",
                    config.sync.registration_poll_secs
                );
                println!();
                println!("[Connectivity]");
                println!(
                    "  Probe timeout:      {}ms",
                    config.connectivity.probe_timeout_ms
                );
                println!(
                    "  Probe interval:     {}s",
                    config.connectivity.probe_interval_secs
                );
            }
        }
        ConfigCommand::Path => {
            println!(
                "{}",
                config_path
                    .unwrap_or_else(Config::default_config_path)
                    .display()
            );
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
