use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
pub use clap_complete::Shell;
use opconsole_api::DeviceId;
use url::Url;

use crate::keys::CloseKeys;

const AFTER_LONG_HELP: &str = r#"WORKFLOW:
    1. List the devices assigned to you
    2. Connect with your SSH credentials
    3. Type commands; one-shot commands run through the backend,
       full-screen programs (nano, vim, vi, top, less, more) stream raw
    4. Press the close keys (Ctrl-] by default) to end the session

EXAMPLES:
    opconsole devices
    opconsole connect 7 --username admin
    OPCONSOLE_SSH_PASSWORD=... opconsole connect 7 -u admin --password-env OPCONSOLE_SSH_PASSWORD
    opconsole exec 7 uptime
    opconsole --format json devices

ENVIRONMENT:
    OPCONSOLE_API_URL              REST base URL (default http://127.0.0.1:8000/api/v1)
    OPCONSOLE_TOKEN                Bearer token for the REST backend
    OPCONSOLE_SOCKET_URL           Terminal gateway (default ws://127.0.0.1:8001/ws)
    OPCONSOLE_RECONNECT_ATTEMPTS   Reconnection attempts (default 5)
    OPCONSOLE_RECONNECT_DELAY_MS   Delay between attempts (default 1000)
    OPCONSOLE_OPEN_COMMAND         Command run once when the terminal opens
    OPCONSOLE_CLOSE_KEYS           Close keys, e.g. ctrl-] or none
    OPCONSOLE_LOG                  Log file path"#;

#[derive(Parser)]
#[command(name = "opconsole")]
#[command(author, version, propagate_version = true)]
#[command(about = "Interactive terminal sessions to managed devices through the operator backend")]
#[command(after_long_help = AFTER_LONG_HELP)]
#[command(subcommand_required = true, arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short,
        long,
        global = true,
        value_enum,
        value_name = "FORMAT",
        default_value_t = OutputFormat::Text
    )]
    pub format: OutputFormat,

    #[arg(long, global = true)]
    pub json: bool,

    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Override OPCONSOLE_API_URL
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<Url>,
}

impl Cli {
    pub fn effective_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            self.format
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the devices assigned to you
    #[command(visible_alias = "ls")]
    Devices,

    /// Open an interactive terminal session to a device
    #[command(long_about = "\
Open an interactive terminal session to a device.

Negotiates a session with the backend using your SSH credentials, then
bridges this terminal to the device through the terminal gateway. Lines
are executed through the backend and their output shown locally, except
full-screen programs, which switch the session to raw passthrough.")]
    Connect(ConnectArgs),

    /// Run one command on a device and print its output
    Exec {
        #[arg(value_name = "DEVICE_ID")]
        device_id: DeviceId,

        #[arg(
            value_name = "COMMAND",
            required = true,
            num_args = 1..,
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        command: Vec<String>,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
pub struct ConnectArgs {
    #[arg(value_name = "DEVICE_ID")]
    pub device_id: DeviceId,

    /// SSH username on the device
    #[arg(short, long, env = "OPCONSOLE_SSH_USERNAME")]
    pub username: String,

    /// Read the SSH password from this environment variable instead of prompting
    #[arg(long, value_name = "VAR")]
    pub password_env: Option<String>,

    /// Keys that close the session (e.g. ctrl-], "ctrl-a,d", none)
    #[arg(long, value_name = "KEYS")]
    pub close_keys: Option<CloseKeys>,

    /// Override OPCONSOLE_SOCKET_URL
    #[arg(long, value_name = "URL")]
    pub socket_url: Option<Url>,

    #[arg(long, value_name = "N")]
    pub reconnect_attempts: Option<u32>,

    #[arg(long, value_name = "MS")]
    pub reconnect_delay_ms: Option<u64>,

    /// Command run once through the backend when the terminal opens
    #[arg(long, value_name = "COMMAND")]
    pub open_command: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum, Default, PartialEq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
