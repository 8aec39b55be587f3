use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::render::MessageTemplate;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub pool_size: Option<usize>,
    pub webhook_url: Option<String>,
    pub webhook_timeout_sec: Option<u64>,

    // Feature configs
    pub dispatch: Option<DispatchConfig>,

    /// Message templates keyed by notification type.
    pub templates: HashMap<String, MessageTemplate>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_error_count: Option<u32>,
    pub poll_interval_secs: Option<u64>,
    pub confirmation_max_age_days: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
