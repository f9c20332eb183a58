mod commands;
mod config;
mod logging;
mod provider;
mod serve;
mod views;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use time::{Date, OffsetDateTime};
use vitalog_pipeline::Language;
use vitalog_storage::ObservationId;

use crate::commands::{
    cmd_analyze, cmd_delete, cmd_dismiss, cmd_list, cmd_status, cmd_submit, cmd_trend,
    parse_attribute, parse_day, parse_rfc3339, SubmitArgs,
};
use crate::config::AppConfig;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Health observation log with AI-assisted analysis.
#[derive(Parser)]
#[command(
    name = "vitalog",
    version,
    about = "Health observation log with AI-assisted analysis"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database file (overrides config and VITALOG_DB)
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP JSON API server
    Serve {
        /// Port to listen on (default from config, 8080)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Record a new observation
    Submit {
        /// Subject the observation is about
        #[arg(long)]
        subject: String,
        /// Image file path or URL
        #[arg(long)]
        image: String,
        /// Attribute as key=value; repeatable
        #[arg(long = "attr", value_parser = parse_attribute)]
        attributes: Vec<(String, serde_json::Value)>,
        /// When the observation happened (RFC 3339; defaults to now)
        #[arg(long, value_parser = parse_rfc3339)]
        observed_at: Option<OffsetDateTime>,
    },

    /// List a subject's observations, newest first
    List {
        #[arg(long)]
        subject: String,
    },

    /// Run analysis for an observation and wait for the outcome
    Analyze {
        id: ObservationId,
        /// Response language (en or zh)
        #[arg(long, default_value = "en")]
        language: Language,
    },

    /// Show the analysis state of an observation
    Status { id: ObservationId },

    /// Acknowledge a rejected analysis, deleting the observation
    Dismiss { id: ObservationId },

    /// Delete an observation
    Delete { id: ObservationId },

    /// Trend report over a date range (inclusive, UTC days)
    Trend {
        #[arg(long)]
        subject: String,
        /// First day, YYYY-MM-DD
        #[arg(long, value_parser = parse_day)]
        start: Date,
        /// Last day, YYYY-MM-DD
        #[arg(long, value_parser = parse_day)]
        end: Date,
        /// Response language (en or zh)
        #[arg(long, default_value = "en")]
        language: Language,
    },
}

fn main() {
    let cli = Cli::parse();

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            report_error(&format!("error: {e}"), cli.output, cli.quiet);
            process::exit(1);
        }
    };
    if let Some(db) = cli.db {
        config.storage.database = db;
    }

    let level = match (&cli.command, cli.quiet) {
        (_, true) => tracing::Level::ERROR,
        (Commands::Serve { .. }, false) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };
    logging::init(level);

    let (output, quiet) = (cli.output, cli.quiet);
    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    report_error(&format!("failed to create tokio runtime: {e}"), output, quiet);
                    process::exit(1);
                }
            };
            if let Err(e) = rt.block_on(serve::start_server(config)) {
                report_error(&format!("Server error: {e}"), output, quiet);
                process::exit(1);
            }
        }
        Commands::Submit {
            subject,
            image,
            attributes,
            observed_at,
        } => {
            let args = SubmitArgs {
                subject,
                image,
                attributes,
                observed_at,
            };
            cmd_submit(&config, args, output, quiet);
        }
        Commands::List { subject } => cmd_list(&config, &subject, output, quiet),
        Commands::Analyze { id, language } => cmd_analyze(&config, id, language, output, quiet),
        Commands::Status { id } => cmd_status(&config, id, output, quiet),
        Commands::Dismiss { id } => cmd_dismiss(&config, id, output, quiet),
        Commands::Delete { id } => cmd_delete(&config, id, output, quiet),
        Commands::Trend {
            subject,
            start,
            end,
            language,
        } => cmd_trend(&config, &subject, start, end, language, output, quiet),
    }
}

/// Print an error message respecting output format and quiet flag.
pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{msg}"),
        OutputFormat::Json => eprintln!("{}", serde_json::json!({ "error": msg })),
    }
}
