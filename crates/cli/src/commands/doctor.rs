use serde::Serialize;

use stocky_agent::openai::OpenAiCapability;
use stocky_core::config::{AppConfig, LoadOptions};
use stocky_core::domain::message::SessionId;
use stocky_db::{
    connect_with_settings, RecordStore, SqlRecordStore, SqlTranscriptStore, StorageBackend,
    TranscriptStore,
};

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
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_completion_api(&config));
            let (connectivity, schema) = check_database(&config);
            checks.push(connectivity);
            checks.push(schema);
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["completion_api_readiness", "database_connectivity", "schema_objects"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Runs the same constructor the chat command uses, so a pass here means
/// chat will get past capability setup.
fn check_completion_api(config: &AppConfig) -> DoctorCheck {
    match OpenAiCapability::from_config(&config.llm) {
        Ok(_) => {
            let key_state = if config.llm.has_api_key() {
                "api key set"
            } else {
                "no api key, custom endpoint"
            };
            DoctorCheck {
                name: "completion_api_readiness",
                status: CheckStatus::Pass,
                details: format!(
                    "{key_state}, model `{}` via {}",
                    config.llm.model, config.llm.base_url
                ),
            }
        }
        Err(error) => DoctorCheck {
            name: "completion_api_readiness",
            status: CheckStatus::Fail,
            details: format!("{error} (set STOCKY_LLM_API_KEY)"),
        },
    }
}

fn check_database(config: &AppConfig) -> (DoctorCheck, DoctorCheck) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let connectivity = DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
            let schema = DoctorCheck {
                name: "schema_objects",
                status: CheckStatus::Skipped,
                details: "skipped because the database was not reached".to_string(),
            };
            return (connectivity, schema);
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                let connectivity = DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to connect to database: {error}"),
                };
                let schema = DoctorCheck {
                    name: "schema_objects",
                    status: CheckStatus::Skipped,
                    details: "skipped because the database was not reached".to_string(),
                };
                return (connectivity, schema);
            }
        };

        let backend = StorageBackend::from_url(&config.database.url);
        let connectivity = DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}` ({})", config.database.url, backend.as_str()),
        };

        let records = SqlRecordStore::new(pool.clone());
        let transcript = SqlTranscriptStore::new(pool.clone());
        let probe = SessionId("doctor-probe".to_string());
        let schema = match (records.fetch_all().await, transcript.history(&probe).await) {
            (Ok(rows), Ok(_)) => DoctorCheck {
                name: "schema_objects",
                status: CheckStatus::Pass,
                details: format!(
                    "daily_data and conversation_history are queryable ({} days stored)",
                    rows.len()
                ),
            },
            (Err(error), _) | (_, Err(error)) => DoctorCheck {
                name: "schema_objects",
                status: CheckStatus::Fail,
                details: format!("tables are missing or unreadable, run `stocky migrate` ({error})"),
            },
        };

        pool.close().await;
        (connectivity, schema)
    })
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
