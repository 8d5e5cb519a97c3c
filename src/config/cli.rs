use std::path::PathBuf;

use clap::Parser;

/// CLI arguments for the serial terminal
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "serial-terminal")]
#[command(version)]
#[command(about = "Line-oriented serial port terminal", long_about = None)]
pub struct CliArgs {
    /// Path to custom config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Serial port to open (e.g. /dev/ttyUSB0, COM3)
    #[arg(short, long, value_name = "NAME")]
    pub port: Option<String>,

    /// Baud rate (1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200)
    #[arg(short, long, value_name = "RATE")]
    pub baud: Option<u32>,

    /// Data bits (5-8)
    #[arg(long, value_name = "BITS")]
    pub data_bits: Option<u8>,

    /// Stop bits (1, 1.5, 2)
    #[arg(long, value_name = "BITS")]
    pub stop_bits: Option<String>,

    /// Parity (none, even, odd, space, mark)
    #[arg(long, value_name = "PARITY")]
    pub parity: Option<String>,

    /// Flow control (none, rts-cts, xon-xoff)
    #[arg(long, value_name = "FLOW")]
    pub flow_control: Option<String>,

    /// Interpret typed input as hex byte pairs
    #[arg(long)]
    pub hex_input: bool,

    /// Show received data as a hex dump
    #[arg(long)]
    pub hex_display: bool,

    /// Terminator appended to text input (none, lf, cr, crlf)
    #[arg(short, long, value_name = "ENDING")]
    pub line_ending: Option<String>,

    /// Prefix finalized lines with the time they completed
    #[arg(short, long)]
    pub timestamps: bool,

    /// Show sent data in the console
    #[arg(short, long)]
    pub echo: bool,

    /// Interpret VT100 clear screen / clear line / cursor home sequences
    #[arg(long)]
    pub vt100: bool,

    /// Keep at most this many console lines
    #[arg(long, value_name = "LINES")]
    pub max_lines: Option<usize>,

    /// Print the available serial ports and exit
    #[arg(long)]
    pub list: bool,

    /// Print session events as JSON lines instead of plain text
    #[arg(long)]
    pub json: bool,

    /// Send this file line by line once connected
    #[arg(long, value_name = "FILE")]
    pub send_file: Option<PathBuf>,

    /// Delay between lines of --send-file, in milliseconds
    #[arg(long, value_name = "MS")]
    pub line_interval: Option<u64>,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    pub save_config: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::parse_from([
            "serial-terminal",
            "--port",
            "/dev/ttyACM0",
            "-b",
            "115200",
            "--hex-display",
            "--line-ending",
            "crlf",
        ]);
        assert_eq!(args.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(args.baud, Some(115200));
        assert!(args.hex_display);
        assert!(!args.hex_input);
        assert_eq!(args.line_ending.as_deref(), Some("crlf"));
    }
}
