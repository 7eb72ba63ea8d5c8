use std::sync::Arc;

use chrono::Utc;
use kunly_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use kunly_core::errors::ExitStatus;
use kunly_slack::notifier::{NotifyError, Notifier};
use kunly_slack::retry::RetryPolicy;
use kunly_slack::web::{MessagePoster, SlackWebClient};
use kunly_slack::startup_notice;

use crate::commands::{block_on, CommandResult};

/// Posts the startup notice regardless of `notifier.enabled`.
pub fn run(text: Option<String>) -> CommandResult {
    let options = LoadOptions {
        overrides: ConfigOverrides { notifier_text: text, ..ConfigOverrides::default() },
        ..LoadOptions::default()
    };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "notify",
                ExitStatus::Configuration,
                format!("configuration issue: {error}"),
            );
        }
    };

    let poster = Arc::new(SlackWebClient::from_config(&config.slack));
    send_notice(&config, poster)
}

fn send_notice(config: &AppConfig, poster: Arc<dyn MessagePoster>) -> CommandResult {
    let message = startup_notice(&config.slack.channel_id, &config.notifier, Utc::now());
    let notifier = Notifier::new(
        poster,
        RetryPolicy {
            max_retries: config.notifier.max_retries,
            base_delay_ms: config.socket.base_delay_ms,
            max_delay_ms: config.socket.max_delay_ms,
        },
    );

    match block_on(notifier.send(&message)) {
        Ok(Ok(timestamp)) => CommandResult::success(
            "notify",
            format!("posted startup notice to {} (ts {timestamp})", message.channel_id),
        ),
        Ok(Err(error @ (NotifyError::InvalidChannel(_) | NotifyError::EmptyMessage))) => {
            CommandResult::failure("notify", ExitStatus::Configuration, error.to_string())
        }
        Ok(Err(error)) => {
            CommandResult::failure("notify", ExitStatus::Connection, error.to_string())
        }
        Err(error) => CommandResult::failure("notify", ExitStatus::Connection, format!("{error:#}")),
    }
}
