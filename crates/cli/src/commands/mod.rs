//! Local subcommands. Each one opens the configured SQLite database, runs a
//! single pipeline operation, and prints the result.

mod observation;
mod trend;

use std::future::Future;
use std::process;
use std::sync::Arc;

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use vitalog_pipeline::{Clock, Pipeline};
use vitalog_storage_sqlite::SqliteStore;

pub(crate) use observation::{
    cmd_analyze, cmd_delete, cmd_dismiss, cmd_list, cmd_status, cmd_submit, SubmitArgs,
};
pub(crate) use trend::cmd_trend;

use crate::config::AppConfig;
use crate::{provider, report_error, OutputFormat};

/// Open the database named in `config` and wire a pipeline around it.
pub(crate) fn open_pipeline(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Pipeline, String> {
    let store = SqliteStore::open(&config.storage.database).map_err(|e| {
        format!(
            "could not open database '{}': {e}",
            config.storage.database.display()
        )
    })?;
    let (interpreter, summarizer) = provider::build(&config.provider);
    Ok(Pipeline::new(
        store,
        interpreter,
        summarizer,
        clock,
        &config.pipeline,
    ))
}

/// Drive `fut` to completion; report its error and exit 1 on failure.
pub(crate) fn run<F>(output: OutputFormat, quiet: bool, fut: F)
where
    F: Future<Output = Result<(), String>>,
{
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("failed to create tokio runtime: {e}"), output, quiet);
            process::exit(1);
        }
    };
    if let Err(msg) = rt.block_on(fut) {
        report_error(&msg, output, quiet);
        process::exit(1);
    }
}

/// Print `value` as pretty JSON, or `text` for text output.
fn emit<T: Serialize>(output: OutputFormat, quiet: bool, value: &T, text: impl FnOnce() -> String) {
    match output {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("failed to serialize output: {e}"),
        },
        OutputFormat::Text if !quiet => println!("{}", text()),
        OutputFormat::Text => {}
    }
}

pub(crate) fn parse_rfc3339(s: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(s.trim(), &Rfc3339)
        .map_err(|e| format!("invalid RFC 3339 timestamp '{s}': {e}"))
}

pub(crate) fn parse_day(s: &str) -> Result<Date, String> {
    Date::parse(s.trim(), format_description!("[year]-[month]-[day]"))
        .map_err(|e| format!("invalid date '{s}' (expected YYYY-MM-DD): {e}"))
}

/// `key=value`; the value is read as JSON when it parses, else as a string.
pub(crate) fn parse_attribute(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid attribute '{s}' (expected key=value)"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid attribute '{s}': empty key"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}
