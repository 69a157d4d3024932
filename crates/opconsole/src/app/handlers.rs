#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::env;
use std::sync::Arc;

use opconsole_api::ConnectionNegotiator;
use opconsole_api::Device;
use opconsole_api::DeviceDirectory;
use opconsole_api::DeviceId;
use opconsole_api::ExecuteOutcome;
use opconsole_api::ExecutionGateway;
use opconsole_api::SessionCredentials;
use opconsole_common::Colors;
use serde_json::json;
use tracing::debug;

use crate::app::commands::ConnectArgs;
use crate::app::commands::OutputFormat;
use crate::config::SessionConfig;
use crate::controller::CloseReason;
use crate::controller::Collaborators;
use crate::controller::LifecycleController;
use crate::error::SessionError;
use crate::session::ReconnectPolicy;
use crate::session::WsConnector;
use crate::signals::CloseSignals;
use crate::terminal::CrosstermSurfaceProvider;

pub type HandlerResult = anyhow::Result<()>;

/// Everything the CLI needs from the operator backend.
pub trait OperatorBackend:
    ConnectionNegotiator + ExecutionGateway + DeviceDirectory + 'static
{
}

impl<T> OperatorBackend for T where
    T: ConnectionNegotiator + ExecutionGateway + DeviceDirectory + 'static
{
}

pub struct HandlerContext<B: OperatorBackend> {
    pub backend: Arc<B>,
    pub format: OutputFormat,
}

impl<B: OperatorBackend> HandlerContext<B> {
    pub fn new(backend: Arc<B>, format: OutputFormat) -> Self {
        Self { backend, format }
    }

    fn output_json_or(&self, value: &serde_json::Value, text: impl FnOnce()) -> HandlerResult {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => text(),
        }
        Ok(())
    }
}

pub fn handle_devices<B: OperatorBackend>(ctx: &HandlerContext<B>) -> HandlerResult {
    let devices = ctx.backend.list_devices()?;
    debug!(count = devices.len(), "Listed devices");
    let value = json!({ "devices": devices });
    ctx.output_json_or(&value, || {
        if devices.is_empty() {
            println!("{}", Colors::dim("No devices assigned"));
        } else {
            print!("{}", format_device_table(&devices));
        }
    })
}

pub fn format_device_table(devices: &[Device]) -> String {
    let header = ["ID", "HOSTNAME", "IP", "PORT", "OS", "GROUP", "CREATED"];
    let rows: Vec<[String; 7]> = devices
        .iter()
        .map(|device| {
            [
                device.id.to_string(),
                device.hostname.clone(),
                device.ip_address.clone(),
                device.port().to_string(),
                if device.os_type.is_empty() {
                    "-".to_string()
                } else {
                    device.os_type.clone()
                },
                device.group_label(),
                device.created_at_display(),
            ]
        })
        .collect();

    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let render = |cells: &[&str], out: &mut String| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    };
    render(&header, &mut out);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        render(&cells, &mut out);
    }
    out
}

pub fn handle_exec<B: OperatorBackend>(
    ctx: &HandlerContext<B>,
    device_id: DeviceId,
    command: &[String],
) -> HandlerResult {
    let command = command.join(" ");
    let command = command.trim();
    if command.is_empty() {
        return Err(SessionError::InvalidConfig {
            message: "command cannot be empty".to_string(),
        }
        .into());
    }
    match ctx.backend.execute(device_id, command)? {
        ExecuteOutcome::Succeeded { output } => {
            let value = json!({ "success": true, "device_id": device_id, "output": output });
            ctx.output_json_or(&value, || {
                if output.ends_with('\n') || output.is_empty() {
                    print!("{output}");
                } else {
                    println!("{output}");
                }
            })
        }
        ExecuteOutcome::Failed { message, .. } => {
            Err(SessionError::ExecutionFailed { message }.into())
        }
    }
}

pub fn handle_connect<B: OperatorBackend>(
    ctx: &HandlerContext<B>,
    args: &ConnectArgs,
) -> HandlerResult {
    let device = ctx
        .backend
        .find_device(args.device_id)?
        .ok_or(SessionError::DeviceNotFound {
            device_id: args.device_id,
        })?;
    let config = session_config(args);
    let password = read_password(args, &device)?;
    let credentials = SessionCredentials::new(device.id, args.username.clone(), password);

    eprintln!(
        "{} Connecting to {} ({})...",
        Colors::dim("[connect]"),
        Colors::device(&device.hostname),
        device.ip_address
    );
    if config.close_keys.is_disabled() {
        eprintln!(
            "{} Close keys disabled; end the session with SIGTERM.",
            Colors::dim("[connect]")
        );
    } else {
        eprintln!(
            "{} Press {} to close.",
            Colors::dim("[connect]"),
            Colors::bold(config.close_keys.display())
        );
    }

    let max_attempts = config.reconnect.max_attempts();
    let connector = WsConnector::new(config.socket_url.clone(), config.connect_timeout);
    let mut controller = LifecycleController::new(
        device,
        config,
        Collaborators {
            negotiator: ctx.backend.clone(),
            gateway: ctx.backend.clone(),
            connector: Box::new(connector),
            surfaces: Box::new(CrosstermSurfaceProvider::new()),
        },
    );
    let _signals = CloseSignals::install(controller.events())?;
    controller.submit_credentials(credentials)?;
    let session_id = controller
        .session()
        .map(|session| session.id().to_string())
        .unwrap_or_default();
    let reason = controller.run();
    drop(controller);

    eprintln!(
        "{} Session {} {}",
        Colors::dim("[connect]"),
        Colors::session_id(&session_id),
        reason
    );
    match reason {
        CloseReason::TransportExhausted => Err(SessionError::ReconnectExhausted {
            attempts: max_attempts,
        }
        .into()),
        CloseReason::SurfaceFailed => {
            Err(SessionError::Terminal(std::io::Error::other("terminal input failed")).into())
        }
        CloseReason::Hotkey | CloseReason::Signal | CloseReason::Requested => Ok(()),
    }
}

fn session_config(args: &ConnectArgs) -> SessionConfig {
    let mut config = SessionConfig::from_env();
    if let Some(url) = &args.socket_url {
        config = config.with_socket_url(url.clone());
    }
    if args.reconnect_attempts.is_some() || args.reconnect_delay_ms.is_some() {
        let attempts = args
            .reconnect_attempts
            .unwrap_or(config.reconnect.max_attempts());
        let delay = args
            .reconnect_delay_ms
            .map(std::time::Duration::from_millis)
            .unwrap_or(config.reconnect.delay());
        config = config.with_reconnect(ReconnectPolicy::new(attempts, delay));
    }
    if let Some(keys) = &args.close_keys {
        config = config.with_close_keys(keys.clone());
    }
    if args.open_command.is_some() {
        config = config.with_open_command(args.open_command.clone());
    }
    config
}

fn read_password(args: &ConnectArgs, device: &Device) -> Result<String, SessionError> {
    if let Some(var) = &args.password_env {
        return env::var(var).map_err(|_| SessionError::InvalidCredentials {
            message: format!("environment variable {var} is not set"),
        });
    }
    inquire::Password::new(&format!(
        "SSH password for {}@{}:",
        args.username, device.hostname
    ))
    .with_display_mode(inquire::PasswordDisplayMode::Masked)
    .without_confirmation()
    .with_validator(inquire::required!())
    .prompt()
    .map_err(|err| SessionError::InvalidCredentials {
        message: format!("password prompt failed: {err}"),
    })
}
