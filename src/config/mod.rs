mod file_config;

pub use file_config::{DispatchConfig, FileConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML
/// config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub pool_size: usize,
    pub webhook_url: Option<String>,
    pub webhook_timeout_sec: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub webhook_url: Option<String>,
    pub webhook_timeout_sec: u64,

    // Dispatch settings (with defaults)
    pub dispatch: DispatchSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file
    /// config. TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let webhook_url = file.webhook_url.or_else(|| cli.webhook_url.clone());
        let webhook_timeout_sec = file.webhook_timeout_sec.unwrap_or(cli.webhook_timeout_sec);

        let dispatch_file = file.dispatch.unwrap_or_default();
        let dispatch = DispatchSettings {
            pool_size: file.pool_size.unwrap_or(cli.pool_size),
            max_error_count: dispatch_file.max_error_count.unwrap_or(3),
            poll_interval_secs: dispatch_file.poll_interval_secs.unwrap_or(180), // 3 minutes
            confirmation_max_age_days: dispatch_file.confirmation_max_age_days.unwrap_or(14),
        };

        if dispatch.pool_size == 0 {
            bail!("pool_size must be at least 1");
        }

        Ok(Self {
            db_dir,
            webhook_url,
            webhook_timeout_sec,
            dispatch,
        })
    }

    pub fn notification_db_path(&self) -> PathBuf {
        self.db_dir.join("notifications.db")
    }

    pub fn preferences_db_path(&self) -> PathBuf {
        self.db_dir.join("preferences.db")
    }
}

/// Settings for the dispatch engine and confirmation resolution.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Number of long-lived worker tasks polling for due notifications.
    pub pool_size: usize,
    /// Error counts above this value make a notification undeliverable.
    pub max_error_count: u32,
    /// Safety-net poll interval while no wake signal arrives.
    pub poll_interval_secs: u64,
    /// Confirmation tokens older than this are silently ignored.
    pub confirmation_max_age_days: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            pool_size: 1,
            max_error_count: 3,
            poll_interval_secs: 180, // 3 minutes
            confirmation_max_age_days: 14,
        }
    }
}
