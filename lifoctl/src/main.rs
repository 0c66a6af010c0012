#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "lifoctl")]
#[command(about = "Push to, pop from and inspect a lifo stack server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push one payload (at most 127 bytes)
    Push {
        #[arg(help = "Payload to push")]
        data: String,
        #[arg(short, long, default_value = "127.0.0.1:7070", help = "Server address")]
        server: String,
        #[arg(long, help = "Treat DATA as hex, e.g. 4142")]
        hex: bool,
        #[arg(short, long, help = "Give up after this many seconds (waits for room by default)")]
        timeout: Option<u64>,
    },
    /// Pop the top payload, waiting if the stack is empty
    Pop {
        #[arg(short, long, default_value = "127.0.0.1:7070", help = "Server address")]
        server: String,
        #[arg(long, help = "Output data in hex format")]
        hex: bool,
        #[arg(short, long, help = "Give up after this many seconds (waits for data by default)")]
        timeout: Option<u64>,
    },
    /// Show the diagnostic snapshot
    Stats {
        #[arg(short, long, default_value = "127.0.0.1:7071", help = "Diagnostic address")]
        server: String,
        #[arg(long, help = "Print the raw JSON")]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Push {
            data,
            server,
            hex,
            timeout,
        } => commands::push(&server, &data, hex, timeout).await,
        Commands::Pop {
            server,
            hex,
            timeout,
        } => commands::pop(&server, hex, timeout).await,
        Commands::Stats { server, json } => commands::stats(&server, json).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}
