mod api;
mod bootstrap;
mod health;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use haggler_core::config::{AppConfig, LoadOptions, MailOutbound};

fn init_logging(config: &AppConfig) {
    use haggler_core::config::LogFormat::*;
    use tracing::Level;

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

    // Now bootstrap using the same config we already loaded
    let app = bootstrap::bootstrap_with_config(config).await?;

    tracing::info!(
        event_name = "system.server.mail_outbound_mode",
        outbound_mode = match &app.config.mail.outbound {
            MailOutbound::Noop => "noop",
            MailOutbound::HttpRelay => "http_relay",
        },
        correlation_id = "bootstrap",
        "outbound mail mode initialized"
    );

    let router = api::router(Arc::clone(&app.engine)).merge(health::router(app.db_pool.clone()));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    // With the noop transport the runner returns immediately; inbound mail
    // arrives through the webhook instead.
    let mailbox = app.mailbox;
    tokio::spawn(async move {
        if let Err(error) = mailbox.run().await {
            tracing::error!(
                event_name = "system.mailbox.error",
                correlation_id = "bootstrap",
                error = %error,
                "mailbox runner terminated unexpectedly"
            );
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "haggler-server listening"
    );

    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "haggler-server stopping"
    );
    let _ = shutdown_tx.send(());

    // In-flight requests get a bounded drain window before the process exits.
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, server).await {
        Ok(serve_result) => serve_result??,
        Err(_) => {
            tracing::warn!(
                event_name = "system.server.drain_timeout",
                correlation_id = "shutdown",
                grace_secs = app.config.server.graceful_shutdown_secs,
                "connections still open after the grace period; exiting"
            );
        }
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
