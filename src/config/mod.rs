//! Persistent settings for the terminal.
//!
//! Precedence: CLI > environment > config file > defaults. The file lives at
//! `<config dir>/serial-terminal/config.toml` unless `--config` points elsewhere.
pub mod cli;

pub use cli::CliArgs;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::console::{ConsoleConfig, DataMode, DisplayMode, LineEnding};
use crate::serial::transmission::DEFAULT_LINE_INTERVAL;
use crate::serial::{BaudRate, DataBits, FlowControl, Parity, PortSettings, StopBits};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: String, message: String },

    #[error("Could not determine config path")]
    NoConfigPath,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Console section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleSettings {
    #[serde(flatten)]
    pub options: ConsoleConfig,
    pub vt100: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmissionSettings {
    /// Delay between two lines of a file transmission
    pub line_interval_ms: u64,
}

impl Default for TransmissionSettings {
    fn default() -> Self {
        Self {
            line_interval_ms: DEFAULT_LINE_INTERVAL.as_millis() as u64,
        }
    }
}

impl TransmissionSettings {
    pub fn line_interval(&self) -> Duration {
        Duration::from_millis(self.line_interval_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: PortSettings,
    pub console: ConsoleSettings,
    pub transmission: TransmissionSettings,
}

impl Settings {
    /// Build the effective settings from defaults, the config file, env vars and CLI args.
    pub fn load_with_args(args: &CliArgs) -> Result<Self> {
        let mut settings = Settings::default();

        let config_path = args.config.clone().or_else(Self::default_config_path);
        if let Some(path) = &config_path {
            if path.exists() {
                match Self::load_from_file(path) {
                    Ok(file_settings) => settings = file_settings,
                    // an explicitly requested file must be usable
                    Err(e) if args.config.is_some() => return Err(e),
                    Err(e) => log::warn!("Failed to load config from {:?}: {}", path, e),
                }
            } else if args.config.is_some() {
                log::warn!("Config file {:?} does not exist, using defaults", path);
            }
        }

        settings.apply_env_vars();
        settings.apply_cli_args(args)?;
        settings.validate()?;

        Ok(settings)
    }

    /// Load settings from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(settings)
    }

    fn apply_env_vars(&mut self) {
        if let Ok(port) = env::var("SERIAL_TERMINAL_PORT") {
            self.port.port_name = port;
        }
        if let Ok(val) = env::var("SERIAL_TERMINAL_BAUD") {
            match val.parse::<u32>().ok().and_then(|rate| BaudRate::new(rate).ok()) {
                Some(rate) => self.port.baud_rate = rate,
                None => log::warn!("Ignoring SERIAL_TERMINAL_BAUD={}", val),
            }
        }
    }

    fn apply_cli_args(&mut self, args: &CliArgs) -> Result<()> {
        if let Some(port) = &args.port {
            self.port.port_name = port.clone();
        }
        if let Some(baud) = args.baud {
            self.port.baud_rate = BaudRate::new(baud).map_err(|e| invalid("port.baud_rate", e.to_string()))?;
        }
        if let Some(bits) = args.data_bits {
            self.port.data_bits = DataBits::try_from(bits).map_err(|e| invalid("port.data_bits", e.to_string()))?;
        }
        if let Some(stop) = &args.stop_bits {
            self.port.stop_bits = StopBits::from_str(stop)
                .ok_or_else(|| invalid("port.stop_bits", format!("'{}' is not one of 1, 1.5, 2", stop)))?;
        }
        if let Some(parity) = &args.parity {
            self.port.parity = Parity::from_str(parity)
                .ok_or_else(|| invalid("port.parity", format!("unknown parity '{}'", parity)))?;
        }
        if let Some(flow) = &args.flow_control {
            self.port.flow_control = FlowControl::from_str(flow)
                .ok_or_else(|| invalid("port.flow_control", format!("unknown flow control '{}'", flow)))?;
        }

        let console = &mut self.console.options;
        if args.hex_input {
            console.data_mode = DataMode::Hexadecimal;
        }
        if args.hex_display {
            console.display_mode = DisplayMode::Hexadecimal;
        }
        if let Some(ending) = &args.line_ending {
            console.line_ending = LineEnding::from_str(ending)
                .ok_or_else(|| invalid("console.line_ending", format!("unknown line ending '{}'", ending)))?;
        }
        if args.timestamps {
            console.show_timestamp = true;
        }
        if args.echo {
            console.echo = true;
        }
        if let Some(max_lines) = args.max_lines {
            console.max_lines = Some(max_lines);
        }
        if args.vt100 {
            self.console.vt100 = true;
        }
        if let Some(interval) = args.line_interval {
            self.transmission.line_interval_ms = interval;
        }
        Ok(())
    }

    /// Reject settings the terminal cannot use.
    pub fn validate(&self) -> Result<()> {
        if self.console.options.max_lines == Some(0) {
            return Err(invalid("console.max_lines", "must be at least 1"));
        }
        if self.transmission.line_interval_ms == 0 {
            return Err(invalid("transmission.line_interval_ms", "must be at least 1"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("serial-terminal").join("config.toml"))
    }

    /// Save settings to the default config file
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::default_config_path().ok_or(ConfigError::NoConfigPath)?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        log::info!("Saved config to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> CliArgs {
        CliArgs {
            // keep the user's real config out of the tests
            config: Some(PathBuf::from("/nonexistent/serial-terminal.toml")),
            ..CliArgs::default()
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.port.baud_rate.value(), 9600);
        assert_eq!(settings.port.data_bits, DataBits::Eight);
        assert!(settings.console.options.autoscroll);
        assert!(!settings.console.vt100);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [port]
            name = "/dev/ttyUSB0"
            baud_rate = 115200
            data_bits = 7
            stop_bits = "2"
            parity = "even"
            flow_control = "rts-cts"

            [console]
            display_mode = "hexadecimal"
            line_ending = "crlf"
            vt100 = true
            max_lines = 500
        "#;

        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.port.port_name, "/dev/ttyUSB0");
        assert_eq!(settings.port.baud_rate.value(), 115200);
        assert_eq!(settings.port.data_bits, DataBits::Seven);
        assert_eq!(settings.port.stop_bits, StopBits::Two);
        assert_eq!(settings.port.parity, Parity::Even);
        assert_eq!(settings.port.flow_control, FlowControl::RtsCts);
        assert_eq!(settings.console.options.display_mode, DisplayMode::Hexadecimal);
        assert_eq!(settings.console.options.line_ending, LineEnding::CrLf);
        assert_eq!(settings.console.options.max_lines, Some(500));
        assert!(settings.console.options.autoscroll);
        assert!(settings.console.vt100);
    }

    #[test]
    fn test_unsupported_baud_in_file() {
        let result: std::result::Result<Settings, _> = toml::from_str("[port]\nbaud_rate = 1000\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut cli = args();
        cli.port = Some("COM7".to_string());
        cli.baud = Some(57600);
        cli.hex_input = true;
        cli.line_ending = Some("lf".to_string());

        let settings = Settings::load_with_args(&cli).unwrap();
        assert_eq!(settings.port.port_name, "COM7");
        assert_eq!(settings.port.baud_rate.value(), 57600);
        assert_eq!(settings.console.options.data_mode, DataMode::Hexadecimal);
        assert_eq!(settings.console.options.line_ending, LineEnding::Lf);
    }

    #[test]
    fn test_cli_rejects_bad_values() {
        let mut cli = args();
        cli.baud = Some(12345);
        assert!(matches!(Settings::load_with_args(&cli), Err(ConfigError::Invalid { .. })));

        let mut cli = args();
        cli.parity = Some("sometimes".to_string());
        assert!(matches!(Settings::load_with_args(&cli), Err(ConfigError::Invalid { .. })));

        let mut cli = args();
        cli.max_lines = Some(0);
        assert!(matches!(Settings::load_with_args(&cli), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut settings = Settings::default();
        settings.port.port_name = "/dev/ttyS1".to_string();
        settings.port.stop_bits = StopBits::OneAndHalf;
        settings.console.options.echo = true;
        settings.console.options.max_lines = Some(1000);
        settings.save_to(&path).unwrap();

        let reloaded = Settings::load_from_file(&path).unwrap();
        assert_eq!(reloaded, settings);
    }

    #[test]
    fn test_explicit_config_must_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[port\nname = ").unwrap();

        let cli = CliArgs {
            config: Some(path),
            ..CliArgs::default()
        };
        assert!(matches!(Settings::load_with_args(&cli), Err(ConfigError::Parse(_))));
    }
}
