mod job;

use clap::{Parser, Subcommand};

use crate::job::JobCommands;

#[derive(Debug, Parser)]
#[command(name = "jobdesk-cli")]
#[command(about = "Jobdesk scheduler command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Inspect and run scheduled jobs
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check that the database answers
    Ping,
    /// Apply pending migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Db { command }) => run_db(command).await,
        Some(Commands::Job { command }) => job::run(command).await,
        None => {
            println!("jobdesk-cli: run with --help to list commands");
            Ok(())
        }
    }
}

async fn run_db(command: DbCommands) -> anyhow::Result<()> {
    let pool = jobdesk_db::connect_pool_from_env().await?;
    match command {
        DbCommands::Ping => {
            jobdesk_db::ping(&pool).await?;
            println!("database ok");
        }
        DbCommands::Migrate => {
            let applied = jobdesk_db::run_migrations(&pool).await?;
            println!("applied {applied} migration(s)");
        }
    }
    Ok(())
}
