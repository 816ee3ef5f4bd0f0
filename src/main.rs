use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::sync::Arc;

use authed_http::{
    auth::{CredentialStore, MemoryStore, Session, SqliteStore},
    config::{CliArgs, Config},
    error::ApiError,
    hooks::{AutoConfirm, Confirmer, LoggingNavigator, TerminalConfirmer, TracingNotifier},
    http_client::{ApiClient, RequestOptions},
    locale::{Catalog, LocaleProvider},
    recovery::Hooks,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = Config::load(&args)?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("Base URL: {}", config.base_url);

    let store: Arc<dyn CredentialStore> = match config.session_db_file {
        Some(ref path) => Arc::new(SqliteStore::open(path)?),
        None => {
            tracing::info!("No SESSION_DB_FILE set, session lives in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    let session = Arc::new(Session::new(store, config.session_namespace.clone()));
    let locale = Arc::new(LocaleProvider::new(session.clone(), config.default_lang.clone()));

    let confirmer: Arc<dyn Confirmer> = if args.yes {
        Arc::new(AutoConfirm(true))
    } else {
        Arc::new(TerminalConfirmer)
    };
    let hooks = Hooks {
        notifier: Arc::new(TracingNotifier),
        confirmer,
        navigator: Arc::new(LoggingNavigator),
        translator: Arc::new(Catalog::new(locale.clone())),
    };

    let client = ApiClient::new(config.client_settings()?, session, locale, hooks)?;

    let data = args.payload()?;

    let method = args.method.to_lowercase();
    let path = args.path.as_str();
    let options = RequestOptions::default();

    let result: std::result::Result<Value, ApiError> = match method.as_str() {
        "get" => client.get(path, &data, options).await,
        "post" => client.post(path, &data, options).await,
        "put" => client.put(path, &data, options).await,
        "patch" => client.patch(path, &data, options).await,
        "delete" => client.delete(path, &data, options).await,
        "jsonp" => client.jsonp(path, Some(&args.callback)).await,
        other => anyhow::bail!("Unsupported method: {}", other),
    };

    match result {
        Ok(payload) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("Failed to render payload")?
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("❌ {}", e);
            Err(e.into())
        }
    }
}
