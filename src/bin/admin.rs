//! PerfectFit Admin CLI
//!
//! Maintenance tool for the sync server database. Stop the server before
//! running `dedup`.
//!
//! # Usage
//!
//! ```bash
//! perfectfit-admin dedup --dry-run
//! perfectfit-admin dedup
//! perfectfit-admin stats
//! ```
//!
//! # Environment Variables
//!
//! - `PERFECTFIT_DATA_DIR`: Directory where the server stores data (default: ~/.local/share/perfectfit-server)

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use perfectfit::models::EntityKind;
use perfectfit::server::storage::{ensure_key_indexes, init_server_db};
use perfectfit::server::{find_duplicates, remove_duplicates};

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "perfectfit-admin")]
#[command(version)]
#[command(about = "PerfectFit server administration tool")]
struct Cli {
    /// Server data directory (overrides PERFECTFIT_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove records that share a natural key, keeping the newest
    Dedup {
        /// Only list the duplicate groups
        #[arg(long)]
        dry_run: bool,
    },
    /// Show record counts per collection
    Stats,
}

// ============================================================================
// Storage
// ============================================================================

/// Get the data directory for the server
fn data_dir(cli: &Option<PathBuf>) -> PathBuf {
    if let Some(dir) = cli {
        return dir.clone();
    }
    std::env::var("PERFECTFIT_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("perfectfit-server")
        })
}

// ============================================================================
// Commands
// ============================================================================

async fn dedup(data_dir: PathBuf, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let pool = init_server_db(&data_dir.join("perfectfit.db")).await?;

    if dry_run {
        let mut total = 0;
        for kind in EntityKind::ALL {
            let groups = find_duplicates(&pool, kind).await?;
            for group in &groups {
                println!(
                    "{:<12} {}  keep {}  remove {}",
                    kind.collection(),
                    group.key,
                    group.keep,
                    group.remove.join(", ")
                );
                total += group.remove.len();
            }
        }
        if total == 0 {
            println!("No duplicates found");
        } else {
            println!("\n{} record(s) would be removed", total);
        }
        return Ok(());
    }

    let reports = remove_duplicates(&pool).await?;
    for report in &reports {
        println!(
            "{:<14} {} group(s), {} removed",
            report.kind.collection(),
            report.duplicate_groups,
            report.removed
        );
    }
    ensure_key_indexes(&pool).await?;
    println!("\nNatural-key indexes in place");

    Ok(())
}

async fn stats(data_dir: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let pool = init_server_db(&data_dir.join("perfectfit.db")).await?;

    println!("{:<14}  {:>8}  LAST MODIFIED", "COLLECTION", "RECORDS");
    println!("{}", "-".repeat(50));
    for kind in EntityKind::ALL {
        let sql = format!(
            "SELECT COUNT(*), COALESCE(MAX(last_modified), 0) FROM {}",
            kind.collection()
        );
        let (count, latest): (i64, i64) = sqlx::query_as(&sql).fetch_one(&pool).await?;
        let latest = chrono::DateTime::from_timestamp_millis(latest)
            .filter(|_| latest > 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<14}  {:>8}  {}", kind.collection(), count, latest);
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let dir = data_dir(&cli.data_dir);

    let result = match cli.command {
        Commands::Dedup { dry_run } => dedup(dir, dry_run).await,
        Commands::Stats => stats(dir).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
