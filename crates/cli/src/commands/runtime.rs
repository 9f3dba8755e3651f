use std::future::Future;

use quoteflow_core::config::{AppConfig, LoadOptions};
use quoteflow_core::{ApprovalEngine, ApprovalError};
use quoteflow_db::{connect_from_config, migrations, DbPool, SqlApprovalStore, SqlWorkflowCatalog};

use crate::commands::CommandResult;

pub(crate) type SqlEngine = ApprovalEngine<SqlApprovalStore, SqlWorkflowCatalog>;

/// A command failure carrying its stable class and process exit code.
#[derive(Debug)]
pub(crate) struct Failure {
    pub error_class: &'static str,
    pub message: String,
    pub exit_code: u8,
}

impl Failure {
    pub fn approval(command: &str, error: ApprovalError) -> Self {
        let detail = error.to_string();
        let error_class = error.error_class();
        let exit_code = if error.is_retryable() { 8 } else { 7 };
        let interface = error.into_interface(format!("cli-{command}"));
        Self {
            error_class,
            message: format!("{} ({detail})", interface.user_message()),
            exit_code,
        }
    }
}

pub(crate) fn engine(config: &AppConfig, pool: &DbPool) -> SqlEngine {
    ApprovalEngine::new(SqlApprovalStore::new(pool.clone()), SqlWorkflowCatalog::new(pool.clone()))
        .with_config(config.approvals.engine_config())
}

/// Loads config, opens the database, applies pending migrations and runs
/// `action` on a current-thread runtime.
pub(crate) fn execute<F, Fut>(command: &str, action: F) -> CommandResult
where
    F: FnOnce(AppConfig, DbPool) -> Fut,
    Fut: Future<Output = Result<CommandResult, Failure>>,
{
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database).await.map_err(|error| Failure {
            error_class: "db_connectivity",
            message: error.to_string(),
            exit_code: 4,
        })?;
        migrations::run_pending(&pool).await.map_err(|error| Failure {
            error_class: "migration",
            message: error.to_string(),
            exit_code: 5,
        })?;

        let outcome = action(config, pool.clone()).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(result) => result,
        Err(failure) => {
            CommandResult::failure(command, failure.error_class, failure.message, failure.exit_code)
        }
    }
}
