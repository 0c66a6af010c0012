use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "lifo")]
#[command(about = "lifo - bounded LIFO stack server")]
#[command(version)]
pub struct Args {
    #[arg(short, long, default_value = "0.0.0.0:7070")]
    pub listen: SocketAddr,

    #[arg(short, long, default_value = "0.0.0.0:7071")]
    pub diagnostic: SocketAddr,

    #[arg(long, default_value = "64")]
    pub max_connections: usize,

    #[arg(long, default_value = "100")]
    pub max_stack_size: usize,

    #[arg(long, default_value = "10")]
    pub stale_connection_period_secs: u64,

    /// Idle read timeout per connection in seconds (0 disables)
    #[arg(long, default_value = "0")]
    pub idle_timeout_secs: u64,

    /// Also write logs to <LOG_DIR>/lifo.log
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    pub gen_config: Option<PathBuf>,
}
