//! ANSI styling for the non-interactive command output.
//!
//! Styling is off when `--no-color` is passed, `NO_COLOR` is set, or stdout
//! is not a terminal. The interactive session paints its own lines.

use std::io::IsTerminal;
use std::sync::OnceLock;

static PLAIN: OnceLock<bool> = OnceLock::new();

const RESET: &str = "\x1b[0m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const GREY: &str = "\x1b[90m";
const BOLD: &str = "\x1b[1m";

/// Decides once per process whether output is styled.
pub fn init(no_color_flag: bool) {
    let plain = no_color_flag
        || std::env::var_os("NO_COLOR").is_some()
        || !std::io::stdout().is_terminal();
    let _ = PLAIN.set(plain);
}

fn plain() -> bool {
    PLAIN.get().copied().unwrap_or(false)
}

fn styled(text: &str, codes: &[&str]) -> String {
    if plain() {
        return text.to_string();
    }
    wrap(text, codes)
}

fn wrap(text: &str, codes: &[&str]) -> String {
    let mut out = codes.concat();
    out.push_str(text);
    out.push_str(RESET);
    out
}

pub struct Colors;

impl Colors {
    pub fn error(text: &str) -> String {
        styled(text, &[RED])
    }

    pub fn dim(text: &str) -> String {
        styled(text, &[GREY])
    }

    pub fn bold(text: &str) -> String {
        styled(text, &[BOLD])
    }

    pub fn session_id(text: &str) -> String {
        styled(text, &[BOLD, CYAN])
    }

    pub fn device(text: &str) -> String {
        styled(text, &[BOLD, GREEN])
    }
}
