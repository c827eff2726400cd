mod bootstrap;
mod chat;
mod health;

use anyhow::Result;
use trackcrow_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use tracing::Level;
    use trackcrow_core::config::LogFormat::*;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    // Bootstrap with the same config we already loaded
    let app = bootstrap::bootstrap_with_config(config)?;

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let router = chat::router(app.chat_state()).merge(health::router());

    tracing::info!(
        event_name = "server.started",
        bind_address = %address,
        model = app.config.llm.model.as_str(),
        "trackcrow-server listening"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(event_name = "server.stopping", "trackcrow-server stopping");

    Ok(())
}

async fn wait_for_shutdown() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!(event_name = "server.shutdown_signal_failed", "ctrl-c handler unavailable");
    }
}
