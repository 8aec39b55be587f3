use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use notify_server::channel::PushChannel;
use notify_server::config::{AppConfig, CliConfig, FileConfig};
use notify_server::confirm::ConfirmationResolver;
use notify_server::dispatch::DispatchEngine;
use notify_server::model::Preferences;
use notify_server::render::TemplateRenderService;
use notify_server::service::NotifyService;
use notify_server::store::{SqliteNotificationStore, SqlitePreferencesStore};
use notify_server::WebhookChannel;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the notification and preferences databases.
    #[clap(value_parser = parse_path)]
    pub db_dir: PathBuf,

    /// Path to a TOML config file (overrides CLI values where present).
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Number of dispatch worker tasks.
    #[clap(long, default_value_t = 1)]
    pub pool_size: usize,

    /// Endpoint the webhook channel delivers to by default.
    #[clap(long)]
    pub webhook_url: Option<String>,

    /// Timeout in seconds for webhook requests.
    #[clap(long, default_value_t = 30)]
    pub webhook_timeout_sec: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let templates = file_config
        .as_ref()
        .map(|f| f.templates.clone())
        .unwrap_or_default();

    let cli_config = CliConfig {
        db_dir: Some(cli_args.db_dir),
        pool_size: cli_args.pool_size,
        webhook_url: cli_args.webhook_url,
        webhook_timeout_sec: cli_args.webhook_timeout_sec,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!(
        "Opening notification database at {:?}...",
        config.notification_db_path()
    );
    let notification_store = Arc::new(SqliteNotificationStore::new(
        config.notification_db_path(),
    )?);
    let preferences_store = Arc::new(SqlitePreferencesStore::new(config.preferences_db_path())?);

    let mut render_service = TemplateRenderService::new();
    let notification_types: std::collections::HashSet<String> =
        templates.keys().cloned().collect();
    for (notification_type, template) in templates {
        render_service.register(notification_type, template);
    }
    info!(
        "Registered {} notification templates",
        render_service.template_count()
    );

    let mut channels: Vec<Arc<dyn PushChannel>> = Vec::new();
    if let Some(url) = &config.webhook_url {
        info!("Webhook channel configured at {}", url);
        channels.push(Arc::new(WebhookChannel::new(
            notification_types,
            Some(url.clone()),
            config.webhook_timeout_sec,
        )));
    }
    if channels.is_empty() {
        bail!("no push channels configured");
    }

    let engine = Arc::new(DispatchEngine::new(
        notification_store.clone(),
        preferences_store.clone(),
        Arc::new(render_service),
        channels,
        &config.dispatch,
    ));
    let confirmations = Arc::new(ConfirmationResolver::new(
        notification_store.clone(),
        Duration::from_secs(config.dispatch.confirmation_max_age_days * 24 * 60 * 60),
    ));

    let service = NotifyService::new(
        notification_store,
        preferences_store,
        engine,
        confirmations,
        Preferences::new(""),
        None,
    );

    service.start();
    info!(
        "Dispatching notifications with {} workers",
        config.dispatch.pool_size
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    service.shutdown().await;
    Ok(())
}
