use kunly_core::config::{AppConfig, LoadOptions};
use kunly_core::errors::ExitStatus;
use kunly_slack::web::{AuthIdentity, SlackWebClient, WebApiError};
use serde::Serialize;

use crate::commands::{block_on, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
    #[serde(skip)]
    exit_status: ExitStatus,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = report.exit_status.code();

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    let exit_status = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: format!(
                    "configuration loaded and validated (channel `{}`)",
                    config.slack.channel_id
                ),
            });

            let client = SlackWebClient::from_config(&config.slack);
            let auth_check = match block_on(client.auth_test()) {
                Ok(result) => auth_check(result),
                Err(error) => DoctorCheck {
                    name: "slack_auth",
                    status: CheckStatus::Fail,
                    details: format!("{error:#}"),
                },
            };
            let status = if auth_check.status == CheckStatus::Pass {
                ExitStatus::Clean
            } else {
                ExitStatus::Connection
            };
            checks.push(auth_check);
            status
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(DoctorCheck {
                name: "slack_auth",
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            });
            ExitStatus::Configuration
        }
    };

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks, exit_status }
}

fn auth_check(result: Result<AuthIdentity, WebApiError>) -> DoctorCheck {
    match result {
        Ok(identity) => DoctorCheck {
            name: "slack_auth",
            status: CheckStatus::Pass,
            details: format!(
                "authenticated as `{}` ({}) in team `{}`",
                identity.user, identity.user_id, identity.team
            ),
        },
        Err(error) if error.is_auth_failure() => DoctorCheck {
            name: "slack_auth",
            status: CheckStatus::Fail,
            details: format!("bot token rejected: {error}"),
        },
        Err(error) => DoctorCheck {
            name: "slack_auth",
            status: CheckStatus::Fail,
            details: format!("slack unreachable: {error}"),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use kunly_slack::web::{AuthIdentity, WebApiError};

    use super::{auth_check, CheckStatus};

    #[test]
    fn successful_auth_names_the_bot_identity() {
        let check = auth_check(Ok(AuthIdentity {
            team: "Kunly".to_owned(),
            user: "kunly-bot".to_owned(),
            user_id: "UBOT".to_owned(),
            bot_id: Some("BBOT".to_owned()),
        }));

        assert_eq!(check.status, CheckStatus::Pass);
        assert!(check.details.contains("kunly-bot"));
        assert!(check.details.contains("UBOT"));
    }

    #[test]
    fn rejected_token_is_reported_as_auth_failure() {
        let check = auth_check(Err(WebApiError::Api {
            method: "auth.test".to_owned(),
            code: "invalid_auth".to_owned(),
        }));

        assert_eq!(check.status, CheckStatus::Fail);
        assert!(check.details.starts_with("bot token rejected"));
    }
}
