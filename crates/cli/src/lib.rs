pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use eivs_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};

use crate::commands::validate::ValidateArgs;

#[derive(Debug, Parser)]
#[command(
    name = "eivs",
    about = "EIVS validation engine CLI",
    long_about = "Manage the validation rule catalog and evaluate candidate records against a tenant's intent rules.",
    after_help = "Examples:\n  eivs migrate\n  eivs seed\n  eivs validate --tenant acme --intent support --record '{\"sender_email\":\"ops@acme.test\"}'\n  eivs probe --tenant acme customer_db\n  eivs doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to an eivs.toml config file")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Override database.url")]
    database_url: Option<String>,
    #[arg(long, global = true, help = "Override logging.level")]
    log_level: Option<String>,
    #[arg(long, global = true, help = "Override logging.format (compact|pretty|json)")]
    log_format: Option<LogFormat>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending catalog migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo tenants, rules, and customer database (idempotent)")]
    Seed {
        #[arg(long, help = "Address of the demo customer database to create")]
        customer_db: Option<String>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Check config, adapter registry, database connectivity, and catalog schema")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Evaluate a candidate record against an intent's rules")]
    Validate(ValidateArgs),
    #[command(about = "Check that a tenant's datasource configuration is reachable")]
    Probe {
        #[arg(long, help = "Tenant that owns the datasource configuration")]
        tenant: String,
        #[arg(help = "Datasource configuration name")]
        config_name: String,
    },
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            overrides: ConfigOverrides {
                database_url: self.database_url.clone(),
                log_level: self.log_level.clone(),
                log_format: self.log_format,
                ..ConfigOverrides::default()
            },
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.load_options();

    // A broken config is reported by the command itself.
    let logging_config = AppConfig::load(options.clone()).unwrap_or_default();
    logging::init_logging(&logging_config);

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(options),
        Command::Seed { customer_db } => commands::seed::run(options, customer_db),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(options) }
        }
        Command::Doctor { json } => {
            let (output, healthy) = commands::doctor::run(options, json);
            commands::CommandResult { exit_code: if healthy { 0 } else { 1 }, output }
        }
        Command::Validate(args) => commands::validate::run(options, args),
        Command::Probe { tenant, config_name } => {
            commands::probe::run(options, tenant, config_name)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn validate_arguments_parse() {
        let cli = Cli::try_parse_from([
            "eivs",
            "--database-url",
            "sqlite::memory:",
            "validate",
            "--tenant",
            "acme",
            "--intent",
            "support",
            "--record",
            "{}",
            "--policy",
            "stop",
        ])
        .expect("parsed");

        assert_eq!(cli.load_options().overrides.database_url.as_deref(), Some("sqlite::memory:"));
        match cli.command {
            Command::Validate(args) => {
                assert_eq!(args.tenant, "acme");
                assert_eq!(args.intent, "support");
                assert_eq!(args.policy.as_deref(), Some("stop"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn explicit_config_path_is_required_to_exist() {
        let cli =
            Cli::try_parse_from(["eivs", "--config", "custom.toml", "migrate"]).expect("parsed");

        assert!(cli.load_options().require_file);
    }
}
