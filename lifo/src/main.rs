#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use clap::Parser;
use lifo::shutdown::{self, ShutdownReason};
use lifo::{Args, Config, server};
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Handle --gen-config before initializing tracing
    if let Some(path) = &args.gen_config {
        if let Err(e) = generate_config(path) {
            eprintln!("Failed to generate config: {}", e);
            std::process::exit(1);
        }
        println!("Generated default config at: {}", path.display());
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config file {}: {}", path.display(), e);
                std::process::exit(1);
            },
        },
        None => Config::from_args(&args),
    };

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let log_file = match open_log_file(&config) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file: {}", e);
            std::process::exit(1);
        },
    };

    init_tracing(log_file);

    info!(
        target: "lifo",
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen_addr,
        diagnostic = %config.diagnostic_addr,
        max_connections = config.limits.max_connections,
        max_stack_size = config.limits.max_stack_size,
        stale_connection_period_secs = config.limits.stale_connection_period_secs,
        idle_timeout_secs = config.limits.idle_timeout_secs,
        "Starting lifo"
    );

    let mut running = match server::start(&config).await {
        Ok(running) => running,
        Err(e) => {
            error!(target: "lifo", error = %e, "Failed to start listeners");
            std::process::exit(1);
        },
    };

    info!(
        target: "lifo",
        app = %running.app_addr(),
        diagnostic = %running.diagnostic_addr(),
        "Listeners bound"
    );

    let shutdown_signal = shutdown::install_signal_handlers();

    let reason = tokio::select! {
        () = shutdown_signal => ShutdownReason::Signal,
        reason = running.fault() => {
            error!(target: "lifo", reason = %reason, "Listener stopped unexpectedly");
            reason
        }
    };

    let faulted = matches!(reason, ShutdownReason::Fault(_));
    if running.shutdown(reason).await {
        info!(target: "lifo", "Listeners closed");
    } else {
        warn!(target: "lifo", "Listener close timed out");
    }

    info!(target: "lifo", "lifo shutdown complete");

    if faulted {
        std::process::exit(1);
    }
}

/// Create `log_dir` and open the log file in append mode.
fn open_log_file(config: &Config) -> std::io::Result<Option<File>> {
    let (Some(dir), Some(path)) = (&config.logging.log_dir, config.log_file_path()) else {
        return Ok(None);
    };

    std::fs::create_dir_all(dir)?;
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Some(file))
}

fn init_tracing(log_file: Option<File>) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,lifo=debug"));

    let file_layer = log_file.map(|file| {
        fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
}

fn generate_config(path: &Path) -> std::io::Result<()> {
    let config = Config::default();

    let content = format!(
        r#"# lifo Configuration File
# Generated by: lifo --gen-config {}
#
# All values shown are defaults. Uncomment and modify as needed.

# =============================================================================
# Network Settings
# =============================================================================

# Address and port for stack clients (push/pop protocol)
listen_addr = "{}"

# Address and port for the JSON diagnostic endpoint
diagnostic_addr = "{}"

# =============================================================================
# Limits
# =============================================================================

[limits]
# Live connections allowed before admission control applies
max_connections = {}

# Stack capacity in payloads; pushes block while full
max_stack_size = {}

# When at capacity, the oldest connection is evicted only if it has been
# connected longer than this many seconds; otherwise the newcomer is rejected
stale_connection_period_secs = {}

# Close a connection that sends nothing for this many seconds (0 disables)
idle_timeout_secs = {}

# =============================================================================
# Logging
# =============================================================================

[logging]
# Also write logs to <log_dir>/lifo.log (stderr only when unset)
# log_dir = "/var/log/lifo"
"#,
        path.display(),
        config.listen_addr,
        config.diagnostic_addr,
        config.limits.max_connections,
        config.limits.max_stack_size,
        config.limits.stale_connection_period_secs,
        config.limits.idle_timeout_secs,
    );

    std::fs::write(path, content)
}
