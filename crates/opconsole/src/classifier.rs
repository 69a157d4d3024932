//! Line editing and dispatch classification for operator input.

/// Programs that redraw the whole screen and need raw keystroke passthrough.
pub const FULL_SCREEN_PROGRAMS: [&str; 6] = ["nano", "vim", "vi", "top", "less", "more"];

/// Where a completed input line goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Forwarded to the socket as-is (an empty line sends a bare terminator).
    Passthrough,
    /// Pre-flight through the gateway, then promote the session to interactive mode.
    Interactive,
    /// Executed through the gateway; output is written straight to the terminal.
    ValidateThenExecute,
}

/// Classifies a submitted line. `interactive` is the session's current mode flag.
pub fn classify(line: &str, interactive: bool) -> Dispatch {
    if interactive {
        return Dispatch::Passthrough;
    }
    let line = line.trim();
    if line.is_empty() {
        return Dispatch::Passthrough;
    }
    if is_full_screen_command(line) {
        Dispatch::Interactive
    } else {
        Dispatch::ValidateThenExecute
    }
}

/// True when the first token names a full-screen program, either bare or as a path.
pub fn is_full_screen_command(line: &str) -> bool {
    let Some(first) = line.split_whitespace().next() else {
        return false;
    };
    let program = first.rsplit('/').next().unwrap_or(first);
    FULL_SCREEN_PROGRAMS.contains(&program)
}

/// Not-yet-submitted input. The cursor counts characters, not bytes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    text: String,
    cursor: usize,
}

impl PendingCommand {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn insert(&mut self, ch: char) {
        let at = self.byte_offset(self.cursor);
        self.text.insert(at, ch);
        self.cursor += 1;
    }

    /// Removes the character before the cursor. Returns false on an empty buffer.
    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let at = self.byte_offset(self.cursor - 1);
        self.text.remove(at);
        self.cursor -= 1;
        true
    }

    /// Hands over the text and leaves the buffer empty.
    pub fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.text)
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
    }

    fn byte_offset(&self, chars: usize) -> usize {
        self.text
            .char_indices()
            .nth(chars)
            .map(|(offset, _)| offset)
            .unwrap_or(self.text.len())
    }
}

/// What the controller must do in response to a chunk of line-mode input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineAction {
    /// Echo the inserted text.
    Echo(String),
    /// Erase one character on screen (`\b \b`).
    Erase,
    /// The pending line was discarded (Ctrl-C).
    Cancel,
    /// A completed line, untrimmed.
    Submit(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Escape {
    #[default]
    None,
    Start,
    Csi,
    Ss3,
}

/// Turns raw keystroke bytes into line edits.
///
/// Escape sequences (arrows, function keys, Alt chords) and other control
/// bytes are swallowed; they have no meaning for a line that is executed
/// remotely as a whole.
#[derive(Debug, Default)]
pub struct LineEditor {
    pending: PendingCommand,
    escape: Escape,
    after_cr: bool,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &PendingCommand {
        &self.pending
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.escape = Escape::None;
        self.after_cr = false;
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<LineAction> {
        let mut actions = Vec::new();
        let mut echo = String::new();
        for ch in String::from_utf8_lossy(bytes).chars() {
            let after_cr = std::mem::replace(&mut self.after_cr, false);
            if self.consume_escape(ch) {
                continue;
            }
            match ch {
                '\n' if after_cr => {}
                '\r' | '\n' => {
                    flush_echo(&mut echo, &mut actions);
                    self.after_cr = ch == '\r';
                    actions.push(LineAction::Submit(self.pending.take()));
                }
                '\x7f' | '\x08' => {
                    flush_echo(&mut echo, &mut actions);
                    if self.pending.backspace() {
                        actions.push(LineAction::Erase);
                    }
                }
                '\x03' => {
                    flush_echo(&mut echo, &mut actions);
                    self.pending.clear();
                    actions.push(LineAction::Cancel);
                }
                '\x1b' => self.escape = Escape::Start,
                '\t' => {
                    self.pending.insert(' ');
                    echo.push(' ');
                }
                ch if ch.is_control() => {}
                ch => {
                    self.pending.insert(ch);
                    echo.push(ch);
                }
            }
        }
        flush_echo(&mut echo, &mut actions);
        actions
    }

    fn consume_escape(&mut self, ch: char) -> bool {
        match self.escape {
            Escape::None => false,
            Escape::Start => {
                self.escape = match ch {
                    '[' => Escape::Csi,
                    'O' => Escape::Ss3,
                    _ => Escape::None,
                };
                true
            }
            Escape::Csi => {
                if ('\x40'..='\x7e').contains(&ch) {
                    self.escape = Escape::None;
                }
                true
            }
            Escape::Ss3 => {
                self.escape = Escape::None;
                true
            }
        }
    }
}

fn flush_echo(echo: &mut String, actions: &mut Vec<LineAction>) {
    if !echo.is_empty() {
        actions.push(LineAction::Echo(std::mem::take(echo)));
    }
}
