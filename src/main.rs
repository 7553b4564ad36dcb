use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{ConfigCommand, CustomerCommand, MeasurementCommand, OrderCommand, SyncCommand};
use perfectfit::config::Config;
use perfectfit::db::LocalStore;
use perfectfit::models::Customer;

#[derive(Parser)]
#[command(name = "perfectfit")]
#[command(version)]
#[command(about = "Customer, order and measurement book for tailors, with server sync", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage customers
    Customer(CustomerCommand),

    /// Manage orders
    Order(OrderCommand),

    /// Manage customer measurements
    Measurement(MeasurementCommand),

    /// Sync with the server
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "perfectfit=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Customer(cmd)) => {
            let store = LocalStore::open(&config.database_path.value).await?;
            cmd.run(&store.repo::<Customer>()).await?;
        }
        Some(Commands::Order(cmd)) => {
            let store = LocalStore::open(&config.database_path.value).await?;
            cmd.run(&store).await?;
        }
        Some(Commands::Measurement(cmd)) => {
            let store = LocalStore::open(&config.database_path.value).await?;
            cmd.run(&store).await?;
        }
        Some(Commands::Sync(cmd)) => {
            let store = LocalStore::open(&config.database_path.value).await?;
            cmd.run(&store, &config).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
