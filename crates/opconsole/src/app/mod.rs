#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::sync::Arc;

use clap::CommandFactory;
use clap::Parser;
use clap_complete::generate;
use opconsole_api::ApiConfig;
use opconsole_api::ApiError;
use opconsole_api::HttpBackend;
use opconsole_common::color_init;
use opconsole_common::telemetry;
use opconsole_common::telemetry::LogSink;
use opconsole_common::Colors;
use serde_json::json;
use tracing::debug;

pub mod commands;
pub mod handlers;

use crate::app::commands::Cli;
use crate::app::commands::Commands;
use crate::app::commands::OutputFormat;
use crate::app::handlers::HandlerContext;
use crate::error::SessionError;

const PROGRAM_NAME: &str = "opconsole";

/// Exit codes following sysexits.h.
mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
}

pub struct Application;

impl Application {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self) -> i32 {
        let cli = Cli::parse();
        let format = cli.effective_format();
        match self.execute(cli) {
            Ok(()) => exit_codes::SUCCESS,
            Err(e) => self.handle_error(&e, format),
        }
    }

    fn execute(&self, cli: Cli) -> anyhow::Result<()> {
        // A raw-mode session owns the tty, so its logs only go to OPCONSOLE_LOG.
        let sink = match cli.command {
            Commands::Connect(_) => LogSink::FileOnly,
            _ => LogSink::Console,
        };
        let _telemetry =
            telemetry::init_tracing(if cli.verbose { "debug" } else { "warn" }, sink);
        color_init(cli.no_color);
        let format = cli.effective_format();
        debug!(command = ?cli.command, format = ?format, "CLI command parsed");

        if let Commands::Completions { shell } = &cli.command {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, PROGRAM_NAME, &mut std::io::stdout());
            return Ok(());
        }

        let mut api = ApiConfig::from_env();
        if let Some(url) = cli.api_url.clone() {
            api = api.with_base_url(url);
        }
        let backend = HttpBackend::new(api)?;
        let ctx = HandlerContext::new(Arc::new(backend), format);

        match &cli.command {
            Commands::Devices => handlers::handle_devices(&ctx),
            Commands::Connect(args) => handlers::handle_connect(&ctx, args),
            Commands::Exec { device_id, command } => {
                handlers::handle_exec(&ctx, *device_id, command)
            }
            Commands::Completions { .. } => unreachable!("Handled before backend setup"),
        }
    }

    fn handle_error(&self, e: &anyhow::Error, format: OutputFormat) -> i32 {
        if let Some(session_error) = e.downcast_ref::<SessionError>() {
            let payload = serde_json::to_value(session_error.to_payload()).unwrap_or_default();
            return report(
                format,
                &session_error.to_string(),
                Some(&session_error.suggestion()),
                session_error.is_retryable(),
                payload,
                session_error.exit_code(),
            );
        }
        if let Some(api_error) = e.downcast_ref::<ApiError>() {
            return report(
                format,
                &api_error.to_string(),
                api_error.suggestion(),
                api_error.is_retryable(),
                api_error.to_json(),
                api_error.exit_code(),
            );
        }
        report(
            format,
            &e.to_string(),
            None,
            false,
            json!({ "success": false, "error": e.to_string() }),
            exit_codes::GENERAL_ERROR,
        )
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

fn report(
    format: OutputFormat,
    message: &str,
    suggestion: Option<&str>,
    retryable: bool,
    json: serde_json::Value,
    exit_code: i32,
) -> i32 {
    match format {
        OutputFormat::Json => {
            eprintln!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
        }
        OutputFormat::Text => {
            eprintln!("{}: {} {}", PROGRAM_NAME, Colors::error("Error:"), message);
            if let Some(suggestion) = suggestion {
                eprintln!("{} {}", Colors::dim("Suggestion:"), suggestion);
            }
            if retryable {
                eprintln!(
                    "{}",
                    Colors::dim("(This error may be transient - retry may succeed)")
                );
            }
        }
    }
    exit_code
}
