use std::sync::Arc;

use kunly_core::config::AppConfig;
use kunly_slack::{EventDispatcher, SlackSocketTransport, SlackWebClient};
use tracing::info;

use crate::runtime::Runtime;

/// Builds the platform clients for an already loaded and validated configuration.
pub fn bootstrap_with_config(config: AppConfig) -> Runtime {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let transport = Arc::new(SlackSocketTransport::from_config(&config.slack));
    let poster = Arc::new(SlackWebClient::from_config(&config.slack));
    info!(
        event_name = "system.bootstrap.platform_client_ready",
        correlation_id = "bootstrap",
        api_base_url = %config.slack.api_base_url,
        channel_id = %config.slack.channel_id,
        "slack platform client constructed"
    );

    Runtime { config, transport, poster, dispatcher: EventDispatcher::default() }
}
