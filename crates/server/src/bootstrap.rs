use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use haggler_agent::conclusion::MarkerConclusionPolicy;
use haggler_agent::http::completion_client_from_config;
use haggler_core::config::{AppConfig, ConfigError, LoadOptions};
use haggler_db::repositories::{
    SqlAuditSink, SqlMessageRepository, SqlNegotiationRepository, SqlOrphanedEventRepository,
};
use haggler_db::{connect_with_settings, migrations, DbPool};
use haggler_engine::service::{EngineDeps, EngineOptions, NegotiationEngine};
use haggler_mail::mailer::mailer_from_config;
use haggler_mail::runner::MailboxRunner;
use haggler_mail::transport::{NoopMailTransport, ReconnectPolicy};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<NegotiationEngine>,
    pub mailbox: MailboxRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("collaborator wiring failed: {0}")]
    Wiring(anyhow::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let completion = completion_client_from_config(&config.llm).map_err(BootstrapError::Wiring)?;
    let mailer = mailer_from_config(&config.mail).map_err(BootstrapError::Wiring)?;

    let deps = EngineDeps {
        negotiations: Arc::new(SqlNegotiationRepository::new(db_pool.clone())),
        messages: Arc::new(SqlMessageRepository::new(db_pool.clone())),
        orphans: Arc::new(SqlOrphanedEventRepository::new(db_pool.clone())),
        audit: Arc::new(SqlAuditSink::spawn(db_pool.clone())),
        completion,
        mailer,
        conclusion: Arc::new(MarkerConclusionPolicy),
    };
    let engine = Arc::new(NegotiationEngine::new(deps, EngineOptions::from_config(&config)));

    // Inbound mail arrives through the webhook endpoint; the noop transport
    // keeps the runner idle until a pull transport is configured.
    let mailbox =
        MailboxRunner::new(Arc::new(NoopMailTransport), engine.router(), ReconnectPolicy::default());
    info!(
        event_name = "system.bootstrap.engine_wired",
        correlation_id = "bootstrap",
        "negotiation engine wired"
    );

    Ok(Application { config, db_pool, engine, mailbox })
}
