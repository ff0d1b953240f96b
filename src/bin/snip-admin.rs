use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snip::config::{Cli, Config};
use snip::storage::{self, StorageError};

#[derive(Parser)]
#[command(name = "snip-admin")]
#[command(about = "snip storage management CLI", long_about = None)]
struct AdminCli {
    #[command(flatten)]
    config: Cli,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print live link and owner counts
    Stats,
    /// Check that the storage backend is reachable
    Health,
    /// Show the record stored under an alias
    Show {
        alias: String,
    },
    /// List an owner's live links
    List {
        owner_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let cli = AdminCli::parse();
    let config = Config::from_cli(cli.config)?;
    let storage = storage::connect(&config.storage).await?;

    match cli.command {
        Commands::Stats => {
            let stats = storage.stats().await.context("failed to collect stats")?;
            println!("Live links: {}", stats.urls);
            println!("Owners:     {}", stats.users);
        }
        Commands::Health => match storage.healthcheck().await {
            Ok(true) => println!("✓ Storage is healthy"),
            Ok(false) => println!("⚠ Storage reported unhealthy"),
            Err(e) => println!("⚠ Storage check failed: {:#}", e),
        },
        Commands::Show { alias } => match storage.get(&alias).await {
            Ok(url) => {
                println!("{:<12} {}", "Alias:", url.alias);
                println!("{:<12} {}", "URL:", url.original_url);
                println!("{:<12} {}", "Owner:", url.owner_id);
                println!("{:<12} {}", "Created:", url.created_at.to_rfc3339());
            }
            Err(StorageError::Deleted(_)) => println!("⚠ Alias '{}' has been deleted", alias),
            Err(StorageError::NotFound(_)) => println!("⚠ Alias '{}' not found", alias),
            Err(e) => return Err(e.into()),
        },
        Commands::List { owner_id } => {
            let urls = storage
                .get_all(owner_id, &config.base_url)
                .await
                .context("failed to list links")?;
            if urls.is_empty() {
                println!("No live links for owner {}.", owner_id);
            } else {
                println!("{:<40} {}", "Short URL", "Original URL");
                println!("{}", "-".repeat(80));
                for url in urls {
                    println!("{:<40} {}", url.short_url, url.original_url);
                }
            }
        }
    }

    Ok(())
}
