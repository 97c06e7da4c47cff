use eivs_adapters::default_adapter_set;
use eivs_core::config::{AppConfig, LoadOptions};
use eivs_db::connect_from_config;
use serde::Serialize;

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

/// Returns the rendered report and whether every check passed.
pub fn run(options: LoadOptions, json_output: bool) -> (String, bool) {
    let report = build_report(options);
    let healthy = report.overall_status == CheckStatus::Pass;

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return (output, healthy);
    }

    (render_human(&report), healthy)
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_adapters(&config));
            checks.extend(check_catalog(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["adapter_registry", "database_connectivity", "catalog_schema"] {
                checks.push(skipped(name));
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

fn skipped(name: &'static str) -> DoctorCheck {
    DoctorCheck {
        name,
        status: CheckStatus::Skipped,
        details: "skipped because an earlier check failed".to_string(),
    }
}

fn check_adapters(config: &AppConfig) -> DoctorCheck {
    match default_adapter_set(&config.http) {
        Ok(adapters) => {
            let kinds = adapters
                .kinds()
                .iter()
                .map(|kind| kind.as_str())
                .collect::<Vec<_>>();
            DoctorCheck {
                name: "adapter_registry",
                status: CheckStatus::Pass,
                details: format!("adapters registered: {}", kinds.join(", ")),
            }
        }
        Err(error) => DoctorCheck {
            name: "adapter_registry",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_catalog(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                skipped("catalog_schema"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_from_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    skipped("catalog_schema"),
                ];
            }
        };

        let connectivity = DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: "catalog database reachable".to_string(),
        };

        let schema = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'validation_rules'",
        )
        .fetch_one(&pool)
        .await;
        pool.close().await;

        let schema = match schema {
            Ok(1) => DoctorCheck {
                name: "catalog_schema",
                status: CheckStatus::Pass,
                details: "validation catalog tables present".to_string(),
            },
            Ok(_) => DoctorCheck {
                name: "catalog_schema",
                status: CheckStatus::Fail,
                details: "validation catalog missing; run `eivs migrate`".to_string(),
            },
            Err(error) => DoctorCheck {
                name: "catalog_schema",
                status: CheckStatus::Fail,
                details: format!("failed to inspect catalog schema: {error}"),
            },
        };

        vec![connectivity, schema]
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
