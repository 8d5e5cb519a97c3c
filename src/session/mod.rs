//! Terminal session state: console buffer, escape parser, command history and display
//! preferences, plus the events the display layer renders from.
//!
//! A [`TerminalSession`] is plain synchronous state. [`terminal::Terminal`] wraps it in a
//! single async mutex together with the serial link.
pub mod terminal;

pub use terminal::Terminal;

use std::path::Path;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::console::{
    CommandHistory, ConsoleBuffer, ConsoleConfig, ConsoleUpdate, DataMode, DisplayLine,
    DisplayMode, FormatError, LineEnding, ParserState,
};
use crate::serial::SerialError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Transport(#[from] SerialError),

    #[error("Not connected")]
    NotConnected,

    #[error("Console is empty, nothing to save")]
    NothingToSave,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Notifications for the display layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Console content changed. When `cleared` is set, everything shown before must be
    /// discarded first. `partial` is the full in-progress line after the change.
    LinesChanged {
        finalized: Vec<DisplayLine>,
        partial: String,
        cleared: bool,
    },
    ScrollToEnd,
    ConfigChanged { config: ConsoleConfig, vt100: bool },
    /// New content for the input field after history navigation or a successful send
    HistoryChanged { text: String },
    ConnectionChanged { connected: bool },
    TransportError { message: String },
}

pub struct TerminalSession {
    console: ConsoleBuffer,
    parser: ParserState,
    history: CommandHistory,
    vt100: bool,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl TerminalSession {
    pub fn new(config: ConsoleConfig, vt100: bool) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            console: ConsoleBuffer::new(config),
            parser: ParserState::new(),
            history: CommandHistory::new(),
            vt100,
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Append bytes received from the port.
    pub fn on_bytes(&mut self, raw: &[u8]) {
        let parser = if self.vt100 { Some(&mut self.parser) } else { None };
        let update = self.console.on_bytes(raw, parser);
        self.publish(update);
    }

    /// Bytes that submitting `text` would put on the wire. Nothing is mutated.
    pub fn encode_input(&self, text: &str) -> std::result::Result<Vec<u8>, FormatError> {
        self.console.encode_input(text)
    }

    /// Bookkeeping after `text` was written as `sent`: history entry, echo, input field reset.
    pub fn record_sent(&mut self, text: &str, sent: &[u8]) {
        self.history.add(text);
        let update = self.console.echo(sent);
        self.publish(update);
        self.emit(SessionEvent::HistoryChanged { text: String::new() });
    }

    /// Empty the console. The escape parser starts over in text mode.
    pub fn clear(&mut self) {
        let update = self.console.clear();
        self.parser.reset();
        self.publish(update);
    }

    pub fn history_up(&mut self) -> String {
        let text = self.history.up();
        self.emit(SessionEvent::HistoryChanged { text: text.clone() });
        text
    }

    pub fn history_down(&mut self) -> String {
        let text = self.history.down();
        self.emit(SessionEvent::HistoryChanged { text: text.clone() });
        text
    }

    pub fn set_config(&mut self, config: ConsoleConfig) {
        let scroll_resumed = config.autoscroll && !self.console.config().autoscroll;
        let trimmed = config.max_lines.is_some() && config.max_lines != self.console.config().max_lines;
        let before = self.console.evicted();

        self.console.set_config(config);
        self.emit_config();

        if trimmed && self.console.evicted() != before {
            self.emit(SessionEvent::LinesChanged {
                finalized: self.console.lines().iter().cloned().collect(),
                partial: self.console.partial_line().to_string(),
                cleared: true,
            });
        }
        if scroll_resumed {
            self.emit(SessionEvent::ScrollToEnd);
        }
    }

    pub fn set_data_mode(&mut self, data_mode: DataMode) {
        self.update_config(|c| c.data_mode = data_mode);
    }

    pub fn set_display_mode(&mut self, display_mode: DisplayMode) {
        self.update_config(|c| c.display_mode = display_mode);
    }

    pub fn set_line_ending(&mut self, line_ending: LineEnding) {
        self.update_config(|c| c.line_ending = line_ending);
    }

    pub fn set_echo(&mut self, echo: bool) {
        self.update_config(|c| c.echo = echo);
    }

    pub fn set_show_timestamp(&mut self, show_timestamp: bool) {
        self.update_config(|c| c.show_timestamp = show_timestamp);
    }

    pub fn set_max_lines(&mut self, max_lines: Option<usize>) {
        self.update_config(|c| c.max_lines = max_lines);
    }

    pub fn set_autoscroll(&mut self, autoscroll: bool) {
        self.update_config(|c| c.autoscroll = autoscroll);
    }

    /// Turning VT100 interpretation off drops any half-parsed sequence.
    pub fn set_vt100(&mut self, vt100: bool) {
        if self.vt100 == vt100 {
            return;
        }
        self.vt100 = vt100;
        if !vt100 {
            self.parser.reset();
        }
        self.emit_config();
    }

    /// The view was scrolled away from the bottom by the user.
    pub fn user_scrolled_up(&mut self) {
        if self.console.config().autoscroll {
            log::debug!("Autoscroll paused");
            self.set_autoscroll(false);
        }
    }

    /// The user brought the view back to the bottom.
    pub fn user_scrolled_to_bottom(&mut self) {
        if !self.console.config().autoscroll {
            log::debug!("Autoscroll resumed");
            self.set_autoscroll(true);
        }
    }

    pub fn notify_connection(&mut self, connected: bool) {
        if !connected {
            // a sequence cut by the disconnect would swallow the next session's output
            self.parser.reset();
        }
        self.emit(SessionEvent::ConnectionChanged { connected });
    }

    pub fn notify_transport_error(&mut self, message: impl Into<String>) {
        self.emit(SessionEvent::TransportError { message: message.into() });
    }

    /// Write the console content to `path` as UTF-8 text.
    pub fn save(&self, path: &Path) -> Result<()> {
        if !self.console.save_available() {
            return Err(SessionError::NothingToSave);
        }
        self.console.save(path)?;
        Ok(())
    }

    /// Regroup typed hex digits into byte pairs, for the input field and the `/history` listing.
    pub fn format_user_hex(&self, text: &str) -> String {
        self.console.format_user_hex(text)
    }

    pub fn config(&self) -> &ConsoleConfig {
        self.console.config()
    }

    pub fn vt100(&self) -> bool {
        self.vt100
    }

    pub fn autoscroll(&self) -> bool {
        self.console.config().autoscroll
    }

    pub fn console(&self) -> &ConsoleBuffer {
        &self.console
    }

    pub fn parser_state(&self) -> &ParserState {
        &self.parser
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn lines(&self) -> Vec<DisplayLine> {
        self.console.lines().iter().cloned().collect()
    }

    pub fn partial_line(&self) -> &str {
        self.console.partial_line()
    }

    pub fn text(&self) -> String {
        self.console.text()
    }

    pub fn is_empty(&self) -> bool {
        self.console.is_empty()
    }

    pub fn save_available(&self) -> bool {
        self.console.save_available()
    }

    fn update_config(&mut self, change: impl FnOnce(&mut ConsoleConfig)) {
        let mut config = self.console.config().clone();
        change(&mut config);
        if &config != self.console.config() {
            self.set_config(config);
        }
    }

    fn emit_config(&self) {
        self.emit(SessionEvent::ConfigChanged {
            config: self.console.config().clone(),
            vt100: self.vt100,
        });
    }

    fn publish(&self, update: ConsoleUpdate) {
        if update.is_empty() {
            return;
        }
        self.emit(SessionEvent::LinesChanged {
            finalized: update.finalized,
            partial: self.console.partial_line().to_string(),
            cleared: update.cleared,
        });
        if self.console.config().autoscroll {
            self.emit(SessionEvent::ScrollToEnd);
        }
    }

    fn emit(&self, event: SessionEvent) {
        // no display attached is fine
        let _ = self.events_tx.send(event);
    }
}

impl Default for TerminalSession {
    fn default() -> Self {
        Self::new(ConsoleConfig::default(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ParserMode;

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_inbound_bytes_publish_lines_and_scroll() {
        let mut session = TerminalSession::default();
        let mut rx = session.subscribe();

        session.on_bytes(b"OK\r\nRE");
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                SessionEvent::LinesChanged {
                    finalized: vec![DisplayLine::new("OK")],
                    partial: "RE".to_string(),
                    cleared: false,
                },
                SessionEvent::ScrollToEnd,
            ]
        );
    }

    #[test]
    fn test_autoscroll_follows_user_scrolling() {
        let mut session = TerminalSession::default();
        let mut rx = session.subscribe();

        session.user_scrolled_up();
        assert!(!session.autoscroll());
        drain(&mut rx);

        session.on_bytes(b"line\n");
        assert!(!drain(&mut rx).contains(&SessionEvent::ScrollToEnd));

        session.user_scrolled_to_bottom();
        assert!(session.autoscroll());
        assert!(drain(&mut rx).contains(&SessionEvent::ScrollToEnd));
    }

    #[test]
    fn test_vt100_toggle() {
        let mut session = TerminalSession::new(ConsoleConfig::default(), true);
        session.on_bytes(b"abc\x1b[2");
        assert_eq!(session.parser_state().mode(), ParserMode::Command);

        session.set_vt100(false);
        assert_eq!(session.parser_state().mode(), ParserMode::Text);
        session.on_bytes(b"J");
        assert_eq!(session.partial_line(), "abcJ");
    }

    #[test]
    fn test_clear_resets_parser() {
        let mut session = TerminalSession::new(ConsoleConfig::default(), true);
        session.on_bytes(b"x\n\x1b[");
        session.clear();
        assert!(session.is_empty());
        assert_eq!(session.parser_state().mode(), ParserMode::Text);

        session.on_bytes(b"2J");
        assert_eq!(session.partial_line(), "2J");
    }

    #[test]
    fn test_record_sent_echoes_and_resets_input() {
        let mut config = ConsoleConfig::default();
        config.echo = true;
        let mut session = TerminalSession::new(config, false);
        let mut rx = session.subscribe();

        let bytes = session.encode_input("AT").unwrap();
        session.record_sent("AT", &bytes);
        assert_eq!(session.history().entries(), &["AT".to_string()]);
        assert_eq!(session.partial_line(), "AT");
        assert!(drain(&mut rx).contains(&SessionEvent::HistoryChanged { text: String::new() }));
    }

    #[test]
    fn test_history_navigation_events() {
        let mut session = TerminalSession::default();
        session.record_sent("a", b"a");
        session.record_sent("b", b"b");
        let mut rx = session.subscribe();

        assert_eq!(session.history_up(), "b");
        assert_eq!(session.history_up(), "a");
        assert_eq!(session.history_down(), "b");
        assert_eq!(session.history_down(), "");
        assert_eq!(
            drain(&mut rx).last(),
            Some(&SessionEvent::HistoryChanged { text: String::new() })
        );
    }

    #[test]
    fn test_config_change_event() {
        let mut session = TerminalSession::default();
        let mut rx = session.subscribe();

        session.set_display_mode(DisplayMode::Hexadecimal);
        match drain(&mut rx).as_slice() {
            [SessionEvent::ConfigChanged { config, vt100: false }] => {
                assert_eq!(config.display_mode, DisplayMode::Hexadecimal)
            }
            other => panic!("unexpected events {:?}", other),
        }

        // setting the same value again is silent
        session.set_display_mode(DisplayMode::Hexadecimal);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_save_requires_content() {
        let session = TerminalSession::default();
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            session.save(&dir.path().join("out.txt")),
            Err(SessionError::NothingToSave)
        ));
    }

    #[test]
    fn test_save_writes_text() {
        let mut session = TerminalSession::default();
        session.on_bytes(b"one\ntwo");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.txt");

        session.save(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo");
    }
}
