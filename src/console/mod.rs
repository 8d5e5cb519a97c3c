pub mod buffer;
pub mod escape;
pub mod format;
pub mod history;

pub use buffer::{ConsoleBuffer, ConsoleUpdate, DisplayLine};
pub use escape::{ParseEvent, ParserMode, ParserState};
pub use history::CommandHistory;

use serde::{Deserialize, Serialize};

/// How outgoing user input is interpreted before it is written to the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataMode {
    /// Input is sent as UTF-8 text, followed by the configured line ending
    #[default]
    Utf8,
    /// Input is a string of hex pairs that is decoded to raw bytes
    Hexadecimal,
}

impl DataMode {
    pub const ALL: [DataMode; 2] = [DataMode::Utf8, DataMode::Hexadecimal];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "utf8" | "utf-8" | "ascii" | "text" => Some(DataMode::Utf8),
            "hex" | "hexadecimal" => Some(DataMode::Hexadecimal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataMode::Utf8 => "utf8",
            DataMode::Hexadecimal => "hex",
        }
    }
}

/// How received bytes are presented in the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    #[default]
    PlainText,
    Hexadecimal,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 2] = [DisplayMode::PlainText, DisplayMode::Hexadecimal];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "plain" | "plain-text" => Some(DisplayMode::PlainText),
            "hex" | "hexadecimal" => Some(DisplayMode::Hexadecimal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayMode::PlainText => "text",
            DisplayMode::Hexadecimal => "hex",
        }
    }
}

/// Terminator appended to text submitted in [`DataMode::Utf8`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineEnding {
    #[default]
    None,
    Lf,
    Cr,
    #[serde(rename = "crlf", alias = "cr-lf")]
    CrLf,
}

impl LineEnding {
    pub const ALL: [LineEnding; 4] = [LineEnding::None, LineEnding::Lf, LineEnding::Cr, LineEnding::CrLf];

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(LineEnding::None),
            "lf" | "nl" | "newline" => Some(LineEnding::Lf),
            "cr" => Some(LineEnding::Cr),
            "crlf" | "cr-lf" => Some(LineEnding::CrLf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::None => "none",
            LineEnding::Lf => "lf",
            LineEnding::Cr => "cr",
            LineEnding::CrLf => "crlf",
        }
    }

    pub fn bytes(&self) -> &'static [u8] {
        match self {
            LineEnding::None => b"",
            LineEnding::Lf => b"\n",
            LineEnding::Cr => b"\r",
            LineEnding::CrLf => b"\r\n",
        }
    }
}

/// Console options that survive a clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub data_mode: DataMode,
    pub display_mode: DisplayMode,
    pub line_ending: LineEnding,
    pub echo: bool,
    pub autoscroll: bool,
    pub show_timestamp: bool,
    /// Maximum number of finalized lines kept, `None` for unbounded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_lines: Option<usize>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            data_mode: DataMode::Utf8,
            display_mode: DisplayMode::PlainText,
            line_ending: LineEnding::None,
            echo: false,
            autoscroll: true,
            show_timestamp: false,
            max_lines: None,
        }
    }
}

/// Rejected user input on the send path. Nothing is transmitted when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("Nothing to send")]
    EmptyInput,

    #[error("Hex input has an odd number of digits ({digits})")]
    OddLength { digits: usize },

    #[error("Invalid hex character {character:?} at position {index}")]
    InvalidHexCharacter { character: char, index: usize },
}

pub type Result<T> = std::result::Result<T, FormatError>;
