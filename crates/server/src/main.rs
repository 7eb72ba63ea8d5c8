mod bootstrap;
mod runtime;
mod shutdown;

use std::path::PathBuf;
use std::process::ExitCode;

use kunly_core::config::{AppConfig, LoadOptions};
use kunly_core::errors::{ApplicationError, ExitStatus};

fn init_logging(config: &AppConfig) {
    use kunly_core::config::LogFormat::*;
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
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::from(ExitStatus::Clean.code()),
        Err(error) => {
            let status = error.exit_status();
            tracing::error!(
                event_name = "system.server.exit",
                error_class = status.error_class(),
                exit_code = status.code(),
                error = %error,
                "kunly-server exiting with error"
            );
            // logging may not be initialized yet when configuration fails
            eprintln!("kunly-server: {error}");
            ExitCode::from(status.code())
        }
    }
}

/// Keeps `.env` problems other than a missing file, to be reported once logging is up.
fn dotenv_problem(result: Result<PathBuf, dotenvy::Error>) -> Option<dotenvy::Error> {
    match result {
        Ok(_) => None,
        Err(error) if error.not_found() => None,
        Err(error) => Some(error),
    }
}

pub async fn run() -> Result<(), ApplicationError> {
    let dotenv_problem = dotenv_problem(dotenvy::dotenv());

    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);
    if let Some(error) = dotenv_problem {
        tracing::warn!(
            event_name = "system.config.dotenv_ignored",
            error = %error,
            ".env file could not be loaded; continuing with the process environment"
        );
    }

    let runtime = bootstrap::bootstrap_with_config(config);
    runtime
        .run_until(async {
            if let Err(error) = shutdown::shutdown_signal().await {
                tracing::error!(
                    error = %error,
                    "signal handlers unavailable; falling back to ctrl-c"
                );
                if let Err(error) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %error, "ctrl-c handler unavailable");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
}
