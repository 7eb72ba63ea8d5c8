use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_SLACK_BOT_TOKEN: &str = "SLACK_AUTH_TOKEN";
pub const ENV_SLACK_APP_TOKEN: &str = "SLACK_APP_TOKEN";
pub const ENV_SLACK_CHANNEL_ID: &str = "SLACK_CHANNEL_ID";

pub const DEFAULT_CONFIG_FILE: &str = "kunly.toml";
pub const NESTED_CONFIG_FILE: &str = "config/kunly.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub socket: SocketConfig,
    pub notifier: NotifierConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub app_token: SecretString,
    pub bot_token: SecretString,
    pub channel_id: String,
    pub api_base_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub event_buffer: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotifierConfig {
    pub enabled: bool,
    pub text: String,
    pub pretext: String,
    pub color: String,
    pub max_retries: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub slack_app_token: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_channel_id: Option<String>,
    pub slack_api_base_url: Option<String>,
    pub notifier_enabled: Option<bool>,
    pub notifier_text: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            slack: SlackConfig {
                app_token: String::new().into(),
                bot_token: String::new().into(),
                channel_id: String::new(),
                api_base_url: "https://slack.com/api".to_string(),
            },
            socket: SocketConfig {
                max_retries: 5,
                base_delay_ms: 250,
                max_delay_ms: 5_000,
                event_buffer: 64,
            },
            notifier: NotifierConfig {
                enabled: true,
                text: "New message from bot".to_string(),
                pretext: "Kunly Bot Message".to_string(),
                color: "#36a64f".to_string(),
                max_retries: 2,
            },
            server: ServerConfig { graceful_shutdown_secs: 10 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

fn trimmed_secret(value: &SecretString) -> SecretString {
    secret_value(value.expose_secret().trim().to_string())
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.normalize();
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(slack) = patch.slack {
            if let Some(slack_app_token_value) = slack.app_token {
                self.slack.app_token = secret_value(slack_app_token_value);
            }
            if let Some(slack_bot_token_value) = slack.bot_token {
                self.slack.bot_token = secret_value(slack_bot_token_value);
            }
            if let Some(channel_id) = slack.channel_id {
                self.slack.channel_id = channel_id;
            }
            if let Some(api_base_url) = slack.api_base_url {
                self.slack.api_base_url = api_base_url;
            }
        }

        if let Some(socket) = patch.socket {
            if let Some(max_retries) = socket.max_retries {
                self.socket.max_retries = max_retries;
            }
            if let Some(base_delay_ms) = socket.base_delay_ms {
                self.socket.base_delay_ms = base_delay_ms;
            }
            if let Some(max_delay_ms) = socket.max_delay_ms {
                self.socket.max_delay_ms = max_delay_ms;
            }
            if let Some(event_buffer) = socket.event_buffer {
                self.socket.event_buffer = event_buffer;
            }
        }

        if let Some(notifier) = patch.notifier {
            if let Some(enabled) = notifier.enabled {
                self.notifier.enabled = enabled;
            }
            if let Some(text) = notifier.text {
                self.notifier.text = text;
            }
            if let Some(pretext) = notifier.pretext {
                self.notifier.pretext = pretext;
            }
            if let Some(color) = notifier.color {
                self.notifier.color = color;
            }
            if let Some(max_retries) = notifier.max_retries {
                self.notifier.max_retries = max_retries;
            }
        }

        if let Some(server) = patch.server {
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env(ENV_SLACK_APP_TOKEN) {
            self.slack.app_token = secret_value(value);
        }
        if let Some(value) = read_env(ENV_SLACK_BOT_TOKEN) {
            self.slack.bot_token = secret_value(value);
        }
        if let Some(value) = read_env(ENV_SLACK_CHANNEL_ID) {
            self.slack.channel_id = value;
        }
        if let Some(value) = read_env("KUNLY_SLACK_API_BASE_URL") {
            self.slack.api_base_url = value;
        }

        if let Some(value) = read_env("KUNLY_SOCKET_MAX_RETRIES") {
            self.socket.max_retries = parse_u32("KUNLY_SOCKET_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("KUNLY_SOCKET_BASE_DELAY_MS") {
            self.socket.base_delay_ms = parse_u64("KUNLY_SOCKET_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("KUNLY_SOCKET_MAX_DELAY_MS") {
            self.socket.max_delay_ms = parse_u64("KUNLY_SOCKET_MAX_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("KUNLY_SOCKET_EVENT_BUFFER") {
            self.socket.event_buffer = parse_usize("KUNLY_SOCKET_EVENT_BUFFER", &value)?;
        }

        if let Some(value) = read_env("KUNLY_NOTIFIER_ENABLED") {
            self.notifier.enabled = parse_bool("KUNLY_NOTIFIER_ENABLED", &value)?;
        }
        if let Some(value) = read_env("KUNLY_NOTIFIER_TEXT") {
            self.notifier.text = value;
        }
        if let Some(value) = read_env("KUNLY_NOTIFIER_PRETEXT") {
            self.notifier.pretext = value;
        }
        if let Some(value) = read_env("KUNLY_NOTIFIER_COLOR") {
            self.notifier.color = value;
        }
        if let Some(value) = read_env("KUNLY_NOTIFIER_MAX_RETRIES") {
            self.notifier.max_retries = parse_u32("KUNLY_NOTIFIER_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("KUNLY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("KUNLY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("KUNLY_LOGGING_LEVEL").or_else(|| read_env("KUNLY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("KUNLY_LOGGING_FORMAT").or_else(|| read_env("KUNLY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    /// Strips surrounding whitespace from the identifiers that are sent to Slack verbatim.
    fn normalize(&mut self) {
        self.slack.app_token = trimmed_secret(&self.slack.app_token);
        self.slack.bot_token = trimmed_secret(&self.slack.bot_token);
        self.slack.channel_id = self.slack.channel_id.trim().to_string();
        self.slack.api_base_url = self.slack.api_base_url.trim().to_string();
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(slack_app_token) = overrides.slack_app_token {
            self.slack.app_token = secret_value(slack_app_token);
        }
        if let Some(slack_bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(slack_bot_token);
        }
        if let Some(channel_id) = overrides.slack_channel_id {
            self.slack.channel_id = channel_id;
        }
        if let Some(api_base_url) = overrides.slack_api_base_url {
            self.slack.api_base_url = api_base_url;
        }
        if let Some(enabled) = overrides.notifier_enabled {
            self.notifier.enabled = enabled;
        }
        if let Some(text) = overrides.notifier_text {
            self.notifier.text = text;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_slack(&self.slack)?;
        validate_socket(&self.socket)?;
        validate_notifier(&self.notifier)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// Returns true when `value` looks like a Slack conversation id (`C…`, `G…` or `D…`).
pub fn is_conversation_id(value: &str) -> bool {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    matches!(first, 'C' | 'G' | 'D')
        && value.len() > 1
        && chars.all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit())
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from(NESTED_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let app_token = slack.app_token.expose_secret();
    if app_token.is_empty() {
        return Err(ConfigError::Validation(format!(
            "slack.app_token is required (set `{ENV_SLACK_APP_TOKEN}`). Get it from https://api.slack.com/apps > Your App > Basic Information > App-Level Tokens"
        )));
    }
    if !app_token.starts_with("xapp-") {
        let hint = if app_token.starts_with("xoxb-") {
            " (hint: you may have used the bot token instead of the app token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.app_token must start with `xapp-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(format!(
            "slack.bot_token is required (set `{ENV_SLACK_BOT_TOKEN}`). Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token"
        )));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used the app token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    let channel_id = slack.channel_id.as_str();
    if channel_id.is_empty() {
        return Err(ConfigError::Validation(format!(
            "slack.channel_id is required (set `{ENV_SLACK_CHANNEL_ID}`)"
        )));
    }
    if !is_conversation_id(channel_id) {
        return Err(ConfigError::Validation(format!(
            "slack.channel_id `{channel_id}` is not a Slack conversation id (expected C…, G… or D…)"
        )));
    }

    let base_url = slack.api_base_url.as_str();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "slack.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_socket(socket: &SocketConfig) -> Result<(), ConfigError> {
    if socket.event_buffer == 0 {
        return Err(ConfigError::Validation(
            "socket.event_buffer must be greater than zero".to_string(),
        ));
    }

    if socket.base_delay_ms > socket.max_delay_ms {
        return Err(ConfigError::Validation(
            "socket.base_delay_ms must not exceed socket.max_delay_ms".to_string(),
        ));
    }

    Ok(())
}

fn validate_notifier(notifier: &NotifierConfig) -> Result<(), ConfigError> {
    if !notifier.enabled {
        return Ok(());
    }

    if notifier.text.trim().is_empty() && notifier.pretext.trim().is_empty() {
        return Err(ConfigError::Validation(
            "notifier.text or notifier.pretext must be set when the notifier is enabled"
                .to_string(),
        ));
    }

    let color = notifier.color.trim();
    let hex = color.strip_prefix('#').unwrap_or("");
    let named = matches!(color, "good" | "warning" | "danger");
    if !named && !(hex.len() == 6 && hex.chars().all(|ch| ch.is_ascii_hexdigit())) {
        return Err(ConfigError::Validation(format!(
            "notifier.color `{color}` must be `#rrggbb` or one of good|warning|danger"
        )));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    slack: Option<SlackPatch>,
    socket: Option<SocketPatch>,
    notifier: Option<NotifierPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    app_token: Option<String>,
    bot_token: Option<String>,
    channel_id: Option<String>,
    api_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SocketPatch {
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    event_buffer: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct NotifierPatch {
    enabled: Option<bool>,
    text: Option<String>,
    pretext: Option<String>,
    color: Option<String>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
