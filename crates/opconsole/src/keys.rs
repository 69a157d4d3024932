//! Key encoding and the close hotkey.

use std::str::FromStr;

use crossterm::event::KeyCode;
use crossterm::event::KeyEvent;
use crossterm::event::KeyModifiers;

/// Byte sequence that closes the session instead of reaching the remote shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseKeys {
    sequence: Vec<u8>,
    display: String,
}

impl CloseKeys {
    pub fn is_disabled(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.sequence
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn disabled() -> Self {
        Self {
            sequence: Vec::new(),
            display: "disabled".to_string(),
        }
    }
}

impl Default for CloseKeys {
    fn default() -> Self {
        Self {
            sequence: vec![0x1d],
            display: "Ctrl-]".to_string(),
        }
    }
}

impl FromStr for CloseKeys {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("close keys cannot be empty".to_string());
        }

        if trimmed.eq_ignore_ascii_case("none") {
            return Ok(Self::disabled());
        }

        let tokens: Vec<&str> = trimmed
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .collect();

        if tokens.is_empty() {
            return Err("close keys cannot be empty".to_string());
        }

        let mut sequence = Vec::with_capacity(tokens.len());
        let mut display_tokens = Vec::with_capacity(tokens.len());
        for token in tokens {
            let (byte, display) = parse_key_token(token)?;
            sequence.push(byte);
            display_tokens.push(display);
        }

        Ok(Self {
            sequence,
            display: display_tokens.join(" "),
        })
    }
}

/// Watches the input stream for the close sequence.
///
/// Bytes that turn out not to be part of the sequence are handed back so they
/// still reach the session.
#[derive(Debug)]
pub struct CloseDetector {
    sequence: Vec<u8>,
    matched: usize,
}

impl CloseDetector {
    pub fn new(close_keys: &CloseKeys) -> Self {
        Self {
            sequence: close_keys.bytes().to_vec(),
            matched: 0,
        }
    }

    pub fn is_partial_match(&self) -> bool {
        self.matched > 0
    }

    pub fn consume(&mut self, bytes: &[u8]) -> (Vec<u8>, bool) {
        let mut output = Vec::new();
        for &byte in bytes {
            if self.consume_byte(byte, &mut output) {
                return (output, true);
            }
        }
        (output, false)
    }

    fn consume_byte(&mut self, byte: u8, output: &mut Vec<u8>) -> bool {
        if self.sequence.is_empty() {
            output.push(byte);
            return false;
        }

        if self.matched > 0 && byte != self.sequence[self.matched] {
            output.extend_from_slice(&self.sequence[..self.matched]);
            self.matched = 0;
        }

        if byte == self.sequence[self.matched] {
            self.matched += 1;
            if self.matched == self.sequence.len() {
                self.matched = 0;
                return true;
            }
            return false;
        }

        output.push(byte);
        false
    }
}

fn parse_key_token(token: &str) -> Result<(u8, String), String> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return Err("close keys cannot be empty".to_string());
    }

    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("ctrl-") || lower.starts_with("control-") {
        let rest = trimmed
            .split_once('-')
            .map(|(_, rest)| rest.trim())
            .unwrap_or_default();
        if rest.is_empty() {
            return Err("close keys: ctrl- requires a key (e.g. ctrl-])".to_string());
        }

        let mut chars = rest.chars();
        let ch = match (chars.next(), chars.next()) {
            _ if rest.eq_ignore_ascii_case("space") => ' ',
            (Some(ch), None) => ch,
            _ => return Err(format!("close keys: unsupported ctrl key '{rest}'")),
        };

        let byte = ctrl_char_to_byte(ch)
            .ok_or_else(|| format!("close keys: unsupported ctrl key '{rest}'"))?;
        return Ok((byte, format!("Ctrl-{}", display_char(ch))));
    }

    if lower == "space" {
        return Ok((b' ', "Space".to_string()));
    }

    let mut chars = trimmed.chars();
    if let (Some(ch), None) = (chars.next(), chars.next()) {
        if !ch.is_ascii() {
            return Err("close keys must be ASCII".to_string());
        }
        return Ok((ch as u8, display_char(ch)));
    }

    Err(format!("close keys: unsupported token '{trimmed}'"))
}

fn ctrl_char_to_byte(ch: char) -> Option<u8> {
    if ch.is_ascii_lowercase() {
        return Some(ch as u8 - b'a' + 1);
    }
    if ch.is_ascii_uppercase() {
        return Some(ch as u8 - b'A' + 1);
    }

    match ch {
        '[' => Some(0x1b),
        '\\' => Some(0x1c),
        ']' => Some(0x1d),
        '^' => Some(0x1e),
        '_' => Some(0x1f),
        '?' => Some(0x7f),
        ' ' | '@' => Some(0x00),
        _ => None,
    }
}

// Legacy terminals report Ctrl-] and friends as Ctrl plus a digit.
fn ctrl_digit_to_byte(ch: char) -> Option<u8> {
    match ch {
        '2' => Some(0x00),
        '3' => Some(0x1b),
        '4' => Some(0x1c),
        '5' => Some(0x1d),
        '6' => Some(0x1e),
        '7' => Some(0x1f),
        '8' => Some(0x7f),
        _ => None,
    }
}

fn display_char(ch: char) -> String {
    if ch == ' ' {
        return "Space".to_string();
    }
    if ch.is_ascii_alphabetic() {
        return ch.to_ascii_uppercase().to_string();
    }
    ch.to_string()
}

/// Encodes a crossterm key event as the bytes a remote PTY expects.
pub fn key_event_to_bytes(key_event: &KeyEvent) -> Option<Vec<u8>> {
    match key_event.code {
        KeyCode::Char(c) => key_char_to_bytes(c, key_event.modifiers),
        KeyCode::F(n) => function_key(n),
        KeyCode::BackTab => Some(b"\x1b[Z".to_vec()),
        KeyCode::Tab if key_event.modifiers.contains(KeyModifiers::SHIFT) => {
            Some(b"\x1b[Z".to_vec())
        }
        code => {
            let base = named_key(code)?;
            if key_event.modifiers.contains(KeyModifiers::ALT) {
                let mut bytes = vec![0x1b];
                bytes.extend_from_slice(base);
                return Some(bytes);
            }
            Some(base.to_vec())
        }
    }
}

fn key_char_to_bytes(c: char, modifiers: KeyModifiers) -> Option<Vec<u8>> {
    if modifiers.contains(KeyModifiers::CONTROL) {
        return ctrl_char_to_byte(c)
            .or_else(|| ctrl_digit_to_byte(c))
            .map(|byte| vec![byte]);
    }

    let mut buf = [0u8; 4];
    let encoded = c.encode_utf8(&mut buf).as_bytes();
    if modifiers.contains(KeyModifiers::ALT) {
        let mut bytes = vec![0x1b];
        bytes.extend_from_slice(encoded);
        return Some(bytes);
    }
    Some(encoded.to_vec())
}

fn named_key(code: KeyCode) -> Option<&'static [u8]> {
    match code {
        KeyCode::Enter => Some(b"\r"),
        KeyCode::Tab => Some(b"\t"),
        KeyCode::Backspace => Some(b"\x7f"),
        KeyCode::Delete => Some(b"\x1b[3~"),
        KeyCode::Esc => Some(b"\x1b"),
        KeyCode::Up => Some(b"\x1b[A"),
        KeyCode::Down => Some(b"\x1b[B"),
        KeyCode::Right => Some(b"\x1b[C"),
        KeyCode::Left => Some(b"\x1b[D"),
        KeyCode::Home => Some(b"\x1b[H"),
        KeyCode::End => Some(b"\x1b[F"),
        KeyCode::PageUp => Some(b"\x1b[5~"),
        KeyCode::PageDown => Some(b"\x1b[6~"),
        KeyCode::Insert => Some(b"\x1b[2~"),
        _ => None,
    }
}

fn function_key(n: u8) -> Option<Vec<u8>> {
    let seq: &[u8] = match n {
        1 => b"\x1bOP",
        2 => b"\x1bOQ",
        3 => b"\x1bOR",
        4 => b"\x1bOS",
        5 => b"\x1b[15~",
        6 => b"\x1b[17~",
        7 => b"\x1b[18~",
        8 => b"\x1b[19~",
        9 => b"\x1b[20~",
        10 => b"\x1b[21~",
        11 => b"\x1b[23~",
        12 => b"\x1b[24~",
        _ => return None,
    };
    Some(seq.to_vec())
}
