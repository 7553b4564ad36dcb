//! Sync CLI commands for synchronizing with the server.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};

use perfectfit::config::{Config, ConfigError};
use perfectfit::db::{LocalStore, StoreError};
use perfectfit::models::{Customer, EntityKind, Measurement, Order};
use perfectfit::sync::{
    format_last_sync, HealthProbe, HttpTransport, SyncClient, SyncOutcome, SyncScheduler,
    TransportError,
};

type Client = SyncClient<HttpTransport, HealthProbe>;

/// Sync with remote server
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Only sync one kind (customers, orders or measurements)
    #[arg(long)]
    kind: Option<EntityKind>,

    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration, pending changes and server status
    Status,

    /// Keep syncing in the background until interrupted
    Watch,
}

impl SyncCommand {
    pub async fn run(&self, store: &LocalStore, config: &Config) -> Result<(), SyncCommandError> {
        match &self.command {
            None => self.sync(store, config).await,
            Some(SyncSubcommand::Status) => self.status(store, config).await,
            Some(SyncSubcommand::Watch) => self.watch(store, config).await,
        }
    }

    async fn sync(&self, store: &LocalStore, config: &Config) -> Result<(), SyncCommandError> {
        let client = build_client(store, config)?;

        println!("Syncing with {}...", client.transport().base_url());

        let outcome = match self.kind {
            None => client.run_sync_cycle().await,
            Some(EntityKind::Customer) => client.sync_kind::<Customer>().await,
            Some(EntityKind::Order) => client.sync_kind::<Order>().await,
            Some(EntityKind::Measurement) => client.sync_kind::<Measurement>().await,
        };

        println!("{}", outcome.message());
        match outcome {
            SyncOutcome::Success | SyncOutcome::Partial => Ok(()),
            SyncOutcome::Failed | SyncOutcome::NoNetwork => Err(SyncCommandError::Outcome(outcome)),
        }
    }

    async fn status(&self, store: &LocalStore, config: &Config) -> Result<(), SyncCommandError> {
        println!("Sync Configuration");
        println!("==================");
        println!();

        let Some(server_url) = config.sync.server_url.as_deref() else {
            println!("Status: Not configured");
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  sync:");
            println!("    server_url: \"http://192.168.1.20:3000\"");
            println!("    interval_minutes: 15");
            println!();
            println!("Or set the PERFECTFIT_SYNC_URL environment variable.");
            return Ok(());
        };

        println!("Server:    {}", server_url);
        println!("Interval:  every {} minute(s)", config.sync.interval_minutes);
        println!();

        println!("Pending changes:");
        let pending = [
            (EntityKind::Customer, store.repo::<Customer>().count_unsynced().await?),
            (EntityKind::Order, store.repo::<Order>().count_unsynced().await?),
            (EntityKind::Measurement, store.repo::<Measurement>().count_unsynced().await?),
        ];
        for (kind, count) in pending {
            println!("  {:<14} {}", kind.collection(), count);
        }
        println!();

        let watermark = store.sync_state().last_sync_timestamp().await?;
        let last = (watermark > 0)
            .then(|| DateTime::<Utc>::from_timestamp_millis(watermark))
            .flatten();
        println!("Last sync: {}", format_last_sync(last, Utc::now()));

        print!("Server status: ");
        let transport = HttpTransport::new(server_url, HealthProbe::TIMEOUT)?;
        match transport.health().await {
            Ok(health) => println!("✓ {} ({})", health.status, health.message),
            Err(e) if e.is_connectivity() => println!("✗ unreachable"),
            Err(e) => println!("✗ error: {}", e),
        }

        Ok(())
    }

    async fn watch(&self, store: &LocalStore, config: &Config) -> Result<(), SyncCommandError> {
        let client = Arc::new(build_client(store, config)?);
        let scheduler = SyncScheduler::new(Arc::clone(&client), config.sync.scheduler()?);
        let mut status = client.status().subscribe();

        scheduler.schedule_immediate();
        scheduler.schedule_periodic();
        println!(
            "Watching for changes, syncing every {} minute(s). Press Ctrl-C to stop.",
            config.sync.interval_minutes
        );

        loop {
            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = status.borrow_and_update().clone();
                    println!(
                        "[{}] {}",
                        Utc::now().format("%H:%M:%S"),
                        snapshot.message
                    );
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        scheduler.cancel();
        println!("Stopped.");
        Ok(())
    }
}

fn build_client(store: &LocalStore, config: &Config) -> Result<Client, SyncCommandError> {
    let server_url = config
        .sync
        .server_url
        .as_deref()
        .ok_or(SyncCommandError::NotConfigured)?;

    let transport = HttpTransport::new(server_url, config.sync.timeout())?;
    let device = HealthProbe::new(server_url)?;
    Ok(SyncClient::new(transport, device, store.clone()))
}

/// Errors from sync commands
#[derive(Debug, thiserror::Error)]
pub enum SyncCommandError {
    #[error("Sync is not configured. Run `perfectfit sync status` for setup help.")]
    NotConfigured,
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("sync finished with {0}")]
    Outcome(SyncOutcome),
}
