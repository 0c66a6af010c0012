use crate::args::Args;
use lifo_core::{AdmissionConfig, LifoError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name used inside `log_dir`
pub const LOG_FILE_NAME: &str = "lifo.log";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub diagnostic_addr: SocketAddr,
    #[serde(default)]
    pub limits: LimitSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSettings {
    /// Live connections admitted before eviction/rejection applies
    pub max_connections: usize,
    /// Stack capacity in payloads
    pub max_stack_size: usize,
    /// Age after which the oldest connection may be evicted on overflow
    pub stale_connection_period_secs: u64,
    /// Idle read timeout per connection, 0 disables
    #[serde(default)]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Directory for the log file; stderr only when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7070"
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 7070))),
            diagnostic_addr: "0.0.0.0:7071"
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 7071))),
            limits: LimitSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_connections: 64,
            max_stack_size: 100,
            stale_connection_period_secs: 10,
            idle_timeout_secs: 0,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Self = match ext {
            "toml" => toml::from_str(&content)
                .map_err(|e| LifoError::Config(format!("TOML parse error: {}", e)))?,
            "json" => serde_json::from_str(&content)
                .map_err(|e| LifoError::Config(format!("JSON parse error: {}", e)))?,
            _ => {
                return Err(LifoError::Config(format!(
                    "Unknown config file extension: {}",
                    ext
                )));
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_args(args: &Args) -> Self {
        Self {
            listen_addr: args.listen,
            diagnostic_addr: args.diagnostic,
            limits: LimitSettings {
                max_connections: args.max_connections,
                max_stack_size: args.max_stack_size,
                stale_connection_period_secs: args.stale_connection_period_secs,
                idle_timeout_secs: args.idle_timeout_secs,
            },
            logging: LoggingSettings {
                log_dir: args.log_dir.clone(),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.limits.max_connections == 0 {
            return Err(LifoError::Config(
                "max_connections must be at least 1".into(),
            ));
        }
        if self.limits.max_stack_size == 0 {
            return Err(LifoError::Config("max_stack_size must be at least 1".into()));
        }
        if self.listen_addr == self.diagnostic_addr && self.listen_addr.port() != 0 {
            return Err(LifoError::Config(format!(
                "listen_addr and diagnostic_addr must differ (both {})",
                self.listen_addr
            )));
        }
        Ok(())
    }

    pub fn admission_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            max_connections: self.limits.max_connections,
            stale_connection_period: Duration::from_secs(self.limits.stale_connection_period_secs),
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.limits.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn log_file_path(&self) -> Option<PathBuf> {
        self.logging
            .log_dir
            .as_ref()
            .map(|dir| dir.join(LOG_FILE_NAME))
    }
}
