use std::sync::Arc;

use quoteflow_core::config::AppConfig;
use quoteflow_core::ApprovalEngine;
use quoteflow_db::{connect_from_config, migrations, DbPool, SqlApprovalStore, SqlWorkflowCatalog};
use thiserror::Error;
use tracing::info;

pub type SqlEngine = ApprovalEngine<SqlApprovalStore, SqlWorkflowCatalog>;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<SqlEngine>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
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

    let engine = ApprovalEngine::new(
        SqlApprovalStore::new(db_pool.clone()),
        SqlWorkflowCatalog::new(db_pool.clone()),
    )
    .with_config(config.approvals.engine_config());

    Ok(Application { config, db_pool, engine: Arc::new(engine) })
}
