//! Byte/text conversions used by the console: hex dumps, hex input and UTF-8 decoding.

use chrono::{DateTime, Local};

use super::{DataMode, FormatError, LineEnding, Result};

/// Bytes rendered on each hex dump row.
pub const HEX_ROW_BYTES: usize = 16;

/// Render `data` as hex dump rows, each terminated by `\n`.
///
/// Row layout: `48 65 6C 6C 6F ...  |  Hello`, with an extra gap after the 8th byte and
/// the hex column padded so the ASCII column always starts at the same offset.
pub fn hex_dump(data: &[u8]) -> String {
    let rows = data.len().div_ceil(HEX_ROW_BYTES);
    let mut out = String::with_capacity(rows * (HEX_ROW_BYTES * 4 + 5));

    for row in data.chunks(HEX_ROW_BYTES) {
        for i in 0..HEX_ROW_BYTES {
            match row.get(i) {
                Some(byte) => out.push_str(&format!("{:02X} ", byte)),
                None => out.push_str("   "),
            }
            if i == HEX_ROW_BYTES / 2 - 1 {
                out.push(' ');
            }
        }

        out.push_str("|  ");
        out.extend(row.iter().map(|&b| if b == b' ' || b.is_ascii_graphic() { b as char } else { '.' }));
        out.push('\n');
    }

    out
}

/// Regroup hex digits typed by the user into space separated, upper-case pairs.
///
/// Anything that is not a hex digit is discarded. This only prettifies the input field,
/// [`decode_hex_input`] does the validation on send.
pub fn format_user_hex(text: &str) -> String {
    let digits: Vec<char> = text.chars().filter(|c| c.is_ascii_hexdigit()).collect();

    let mut out = String::with_capacity(digits.len() * 3 / 2);
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && i % 2 == 0 {
            out.push(' ');
        }
        out.push(c.to_ascii_uppercase());
    }
    out
}

/// Decode a string of hex pairs (whitespace is ignored) into raw bytes.
pub fn decode_hex_input(text: &str) -> Result<Vec<u8>> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.is_empty() {
        return Err(FormatError::EmptyInput);
    }

    if let Some((index, character)) = digits.chars().enumerate().find(|(_, c)| !c.is_ascii_hexdigit()) {
        return Err(FormatError::InvalidHexCharacter { character, index });
    }

    if digits.len() % 2 != 0 {
        return Err(FormatError::OddLength { digits: digits.len() });
    }

    hex::decode(&digits).map_err(|e| match e {
        hex::FromHexError::InvalidHexCharacter { c, index } => {
            FormatError::InvalidHexCharacter { character: c, index }
        }
        _ => FormatError::OddLength { digits: digits.len() },
    })
}

/// Turn submitted user input into the bytes that go on the wire.
///
/// Hex input is sent exactly as decoded; UTF-8 input gets `line_ending` appended.
pub fn encode_input(text: &str, data_mode: DataMode, line_ending: LineEnding) -> Result<Vec<u8>> {
    if text.is_empty() {
        return Err(FormatError::EmptyInput);
    }

    match data_mode {
        DataMode::Hexadecimal => decode_hex_input(text),
        DataMode::Utf8 => {
            let mut bytes = Vec::with_capacity(text.len() + 2);
            bytes.extend_from_slice(text.as_bytes());
            bytes.extend_from_slice(line_ending.bytes());
            Ok(bytes)
        }
    }
}

/// Line prefix used when timestamps are enabled, e.g. `[14:03:59.120] `.
pub fn timestamp_prefix(time: &DateTime<Local>) -> String {
    time.format("[%H:%M:%S%.3f] ").to_string()
}

/// Lossy UTF-8 decoder that carries an incomplete trailing sequence over to the next chunk.
#[derive(Debug, Default, Clone)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, replacing invalid sequences with U+FFFD.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(bytes);

        let mut out = String::with_capacity(data.len());
        let mut rest = data.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + len..];
                        }
                        None => {
                            // sequence cut by the chunk boundary
                            self.pending = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
