//! Minimal VT100 escape sequence handling for inbound text.
//!
//! Only clear screen (`ESC [ 2 J`), cursor home (`ESC [ H`) and clear line (`ESC [ 2 K`)
//! are interpreted. Any other syntactically started sequence is consumed and dropped.
//!
//! The parser keeps no hidden state: everything that must survive between chunks lives in
//! [`ParserState`], which the caller owns and passes to [`feed`] for every chunk.

use serde::{Deserialize, Serialize};

const ESC: char = '\u{1b}';

/// Longest command body kept before an unknown sequence is abandoned.
const MAX_COMMAND_LEN: usize = 3;

/// Output of the escape sequence parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseEvent {
    /// Plain text to be displayed, newlines included
    Literal(String),
    ClearScreen,
    ClearLine,
    CursorHome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserMode {
    #[default]
    Text,
    Escape,
    Command,
    ResetFont,
}

/// State carried between [`feed`] calls, so sequences may span chunk boundaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParserState {
    mode: ParserMode,
    command: String,
}

impl ParserState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> ParserMode {
        self.mode
    }

    /// Command body collected so far while in [`ParserMode::Command`].
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Drop any half-parsed sequence and return to text mode.
    pub fn reset(&mut self) {
        self.mode = ParserMode::Text;
        self.command.clear();
    }
}

/// Run `input` through the parser, updating `state` and returning the resulting events.
///
/// Literal text is flushed when an escape sequence starts, after every line feed (the
/// newline is kept in the literal) and at the end of `input`.
pub fn feed(state: &mut ParserState, input: &str) -> Vec<ParseEvent> {
    let mut events = Vec::new();
    let mut text = String::new();

    for c in input.chars() {
        match state.mode {
            ParserMode::Text => {
                if c == ESC {
                    flush(&mut text, &mut events);
                    state.mode = ParserMode::Escape;
                } else if c == '\n' {
                    text.push(c);
                    flush(&mut text, &mut events);
                } else {
                    text.push(c);
                }
            }
            ParserMode::Escape => {
                state.command.clear();
                state.mode = match c {
                    '[' => ParserMode::Command,
                    '(' => ParserMode::ResetFont,
                    ESC => ParserMode::Escape,
                    _ => ParserMode::Text,
                };
            }
            ParserMode::Command => {
                if c == ESC {
                    state.mode = ParserMode::Escape;
                    continue;
                }

                if !c.is_ascii_alphanumeric() {
                    state.command.clear();
                    state.mode = ParserMode::Text;
                    continue;
                }

                state.command.push(c);
                if let Some(event) = match_command(&state.command) {
                    events.push(event);
                    state.reset();
                } else if state.command.len() >= MAX_COMMAND_LEN {
                    log::trace!("Dropping unsupported escape sequence: {:?}", state.command);
                    state.reset();
                }
            }
            ParserMode::ResetFont => {
                // the character set designator is ignored
                state.mode = if c == ESC { ParserMode::Escape } else { ParserMode::Text };
            }
        }
    }

    flush(&mut text, &mut events);
    events
}

fn match_command(command: &str) -> Option<ParseEvent> {
    match command {
        "2J" => Some(ParseEvent::ClearScreen),
        "H" => Some(ParseEvent::CursorHome),
        "2K" => Some(ParseEvent::ClearLine),
        _ => None,
    }
}

fn flush(text: &mut String, events: &mut Vec<ParseEvent>) {
    if !text.is_empty() {
        events.push(ParseEvent::Literal(std::mem::take(text)));
    }
}
