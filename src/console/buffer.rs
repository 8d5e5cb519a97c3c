//! Line-buffered console storage.
//!
//! Inbound chunks are decoded (or hex dumped), optionally run through the VT100 parser and
//! reassembled into [`DisplayLine`]s. Exactly one in-progress line exists at any time.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::escape::{self, ParseEvent, ParserState};
use super::format::{self, Utf8Decoder};
use super::{ConsoleConfig, DisplayMode, Result};

/// One finalized terminal row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayLine {
    /// Set when timestamps were enabled at the moment the line was finalized
    pub timestamp: Option<DateTime<Local>>,
    pub text: String,
}

impl DisplayLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self { timestamp: None, text: text.into() }
    }
}

impl fmt::Display for DisplayLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(time) = &self.timestamp {
            f.write_str(&format::timestamp_prefix(time))?;
        }
        f.write_str(&self.text)
    }
}

/// What a single buffer mutation changed, for the display layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleUpdate {
    /// Lines finalized by this mutation, oldest first
    pub finalized: Vec<DisplayLine>,
    /// All previously displayed content was discarded before `finalized` was appended
    pub cleared: bool,
    /// The in-progress line changed
    pub partial_changed: bool,
}

impl ConsoleUpdate {
    pub fn is_empty(&self) -> bool {
        self.finalized.is_empty() && !self.cleared && !self.partial_changed
    }

    fn cleared() -> Self {
        Self { finalized: Vec::new(), cleared: true, partial_changed: true }
    }
}

pub struct ConsoleBuffer {
    config: ConsoleConfig,
    lines: VecDeque<DisplayLine>,
    current: String,
    decoder: Utf8Decoder,
    /// Last character appended was `\r`; a following `\n` belongs to the same terminator
    pending_cr: bool,
    evicted: u64,
}

impl ConsoleBuffer {
    pub fn new(config: ConsoleConfig) -> Self {
        Self {
            config,
            lines: VecDeque::new(),
            current: String::new(),
            decoder: Utf8Decoder::new(),
            pending_cr: false,
            evicted: 0,
        }
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    /// Replace the console options. Lowering `max_lines` evicts immediately.
    pub fn set_config(&mut self, config: ConsoleConfig) {
        self.config = config;
        self.enforce_line_limit();
    }

    /// Feed bytes received from the port.
    ///
    /// When `vt100` carries a parser state the decoded text is interpreted for the supported
    /// escape sequences; otherwise it is appended as is. Hex display never goes through the
    /// parser since the dump cannot contain control characters.
    pub fn on_bytes(&mut self, raw: &[u8], vt100: Option<&mut ParserState>) -> ConsoleUpdate {
        let mut update = ConsoleUpdate::default();
        if raw.is_empty() {
            return update;
        }

        match self.config.display_mode {
            DisplayMode::Hexadecimal => {
                let dump = format::hex_dump(raw);
                self.break_line(&mut update);
                self.append_text(&dump, &mut update);
            }
            DisplayMode::PlainText => {
                let text = self.decoder.decode(raw);
                match vt100 {
                    Some(state) => {
                        for event in escape::feed(state, &text) {
                            self.apply(event, &mut update);
                        }
                    }
                    None => self.append_text(&text, &mut update),
                }
            }
        }

        update
    }

    /// Render data the user just sent, if echo is enabled.
    pub fn echo(&mut self, sent: &[u8]) -> ConsoleUpdate {
        let mut update = ConsoleUpdate::default();
        if !self.config.echo || sent.is_empty() {
            return update;
        }

        let text = match self.config.display_mode {
            DisplayMode::Hexadecimal => {
                self.break_line(&mut update);
                format::hex_dump(sent)
            }
            DisplayMode::PlainText => String::from_utf8_lossy(sent).into_owned(),
        };
        self.append_text(&text, &mut update);
        update
    }

    /// Drop all lines and the in-progress line. Configuration is kept.
    pub fn clear(&mut self) -> ConsoleUpdate {
        self.lines.clear();
        self.current.clear();
        self.decoder.reset();
        self.pending_cr = false;
        ConsoleUpdate::cleared()
    }

    /// Send path formatting for `text` according to the current data mode and line ending.
    pub fn encode_input(&self, text: &str) -> Result<Vec<u8>> {
        format::encode_input(text, self.config.data_mode, self.config.line_ending)
    }

    /// Input field helper, see [`format::format_user_hex`].
    pub fn format_user_hex(&self, text: &str) -> String {
        format::format_user_hex(text)
    }

    pub fn lines(&self) -> &VecDeque<DisplayLine> {
        &self.lines
    }

    pub fn partial_line(&self) -> &str {
        &self.current
    }

    /// Number of lines dropped so far because of `max_lines`.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.current.is_empty()
    }

    pub fn save_available(&self) -> bool {
        !self.is_empty()
    }

    /// Whole console content, lines joined by `\n`, in-progress line last.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&line.to_string());
        }
        if !self.current.is_empty() {
            if !self.lines.is_empty() {
                out.push('\n');
            }
            out.push_str(&self.current);
        }
        out
    }

    /// Export the console content as UTF-8 text.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.text())?;
        log::info!("Console exported to {}", path.display());
        Ok(())
    }

    fn apply(&mut self, event: ParseEvent, update: &mut ConsoleUpdate) {
        match event {
            ParseEvent::Literal(text) => self.append_text(&text, update),
            ParseEvent::ClearScreen | ParseEvent::CursorHome => {
                self.lines.clear();
                self.current.clear();
                self.pending_cr = false;
                *update = ConsoleUpdate::cleared();
            }
            ParseEvent::ClearLine => {
                self.current.clear();
                update.partial_changed = true;
            }
        }
    }

    fn append_text(&mut self, text: &str, update: &mut ConsoleUpdate) {
        for c in text.chars() {
            if self.pending_cr {
                self.pending_cr = false;
                if c == '\n' {
                    continue;
                }
            }

            match c {
                '\n' => self.finalize_line(update),
                '\r' => {
                    self.finalize_line(update);
                    self.pending_cr = true;
                }
                _ => {
                    self.current.push(c);
                    update.partial_changed = true;
                }
            }
        }
    }

    /// Dump rows start on a fresh line: finalize any text left by plain text mode.
    fn break_line(&mut self, update: &mut ConsoleUpdate) {
        self.pending_cr = false;
        if !self.current.is_empty() {
            self.finalize_line(update);
        }
    }

    fn finalize_line(&mut self, update: &mut ConsoleUpdate) {
        let line = DisplayLine {
            timestamp: self.config.show_timestamp.then(Local::now),
            text: std::mem::take(&mut self.current),
        };
        self.lines.push_back(line.clone());
        update.finalized.push(line);
        update.partial_changed = true;
        self.enforce_line_limit();
    }

    fn enforce_line_limit(&mut self) {
        let Some(max) = self.config.max_lines else {
            return;
        };
        while self.lines.len() > max {
            self.lines.pop_front();
            self.evicted += 1;
        }
    }
}

impl Default for ConsoleBuffer {
    fn default() -> Self {
        Self::new(ConsoleConfig::default())
    }
}
