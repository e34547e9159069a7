//! iqdb CLI
//!
//! A content-based reverse image search server.
//!
//! # Usage
//!
//! ```bash
//! # Run the HTTP server (defaults: localhost 8000 iqdb.db)
//! iqdb http [host] [port] [dbfile]
//!
//! # Show usage
//! iqdb help
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use parking_lot::RwLock;
use tracing_subscriber::EnvFilter;

use iqdb::server::{serve, AppState};
use iqdb_core::ImageDb;

#[derive(Parser)]
#[command(name = "iqdb")]
#[command(about = "A content-based reverse image search server")]
#[command(version)]
#[command(disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server on the given host/port
    Http {
        /// Host to bind to
        #[arg(default_value = "localhost")]
        host: String,

        /// Server port
        #[arg(default_value_t = 8000)]
        port: u16,

        /// Path to the SQLite database file
        #[arg(default_value = "iqdb.db")]
        dbfile: PathBuf,
    },

    /// Show this help
    Help,

    #[command(external_subcommand)]
    Other(Vec<String>),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Http { host, port, dbfile }) => {
            tracing::info!("loading database from {:?}", dbfile);
            let db = ImageDb::open(&dbfile)?;
            tracing::info!("{} live images in {} slots", db.live_count(), db.count());

            let state = Arc::new(AppState {
                db: RwLock::new(db),
            });
            serve(state, &host, port).await?;
        }

        Some(Commands::Help) | None => print_help()?,

        Some(Commands::Other(args)) => {
            tracing::warn!("unknown command {:?}", args.first());
            print_help()?;
        }
    }

    Ok(())
}

fn print_help() -> std::io::Result<()> {
    Cli::command().print_help()
}
