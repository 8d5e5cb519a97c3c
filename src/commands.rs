//! Interactive commands typed at the prompt.
//!
//! Lines starting with `/` control the terminal, everything else is sent to the port.
//! A leading `//` sends a literal `/`.
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Settings;
use crate::console::{DataMode, DisplayMode, LineEnding};
use crate::serial::transmission::FileTransmission;
use crate::session::Terminal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Send(String),
    Clear,
    Save(PathBuf),
    History,
    Up,
    Down,
    Input(DataMode),
    Display(DisplayMode),
    Ending(LineEnding),
    Echo(bool),
    Timestamps(bool),
    Vt100(bool),
    Autoscroll(bool),
    SendFile(PathBuf),
    StopFile,
    Stats,
    Connect,
    Disconnect,
    Help,
    Quit,
}

/// Whether the prompt loop keeps going after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub const HELP: &str = "\
/clear                 clear the console
/save <file>           save the console to a text file
/history, /up, /down   show or browse sent commands
/input utf8|hex        how typed input is sent
/display text|hex      how received data is shown
/ending none|lf|cr|crlf
/echo, /timestamps, /vt100, /autoscroll on|off
/send-file <file>      send a file line by line, /stop-file to pause
/stats                 link counters
/connect, /disconnect
/quit";

/// Parse one line typed at the prompt.
pub fn parse_line(line: &str) -> Result<ShellCommand, String> {
    if let Some(literal) = line.strip_prefix("//") {
        return Ok(ShellCommand::Send(format!("/{}", literal)));
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(ShellCommand::Send(line.to_string()));
    };

    let mut parts = command.trim().splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default().to_lowercase();
    let arg = parts.next().map(str::trim).unwrap_or("");

    let command = match name.as_str() {
        "clear" => ShellCommand::Clear,
        "save" => ShellCommand::Save(path_arg(arg, "save")?),
        "history" => ShellCommand::History,
        "up" => ShellCommand::Up,
        "down" => ShellCommand::Down,
        "input" => ShellCommand::Input(
            DataMode::from_str(arg).ok_or_else(|| format!("Unknown input mode '{}'", arg))?,
        ),
        "display" => ShellCommand::Display(
            DisplayMode::from_str(arg).ok_or_else(|| format!("Unknown display mode '{}'", arg))?,
        ),
        "ending" => ShellCommand::Ending(
            LineEnding::from_str(arg).ok_or_else(|| format!("Unknown line ending '{}'", arg))?,
        ),
        "echo" => ShellCommand::Echo(switch_arg(arg)?),
        "timestamps" => ShellCommand::Timestamps(switch_arg(arg)?),
        "vt100" => ShellCommand::Vt100(switch_arg(arg)?),
        "autoscroll" => ShellCommand::Autoscroll(switch_arg(arg)?),
        "send-file" => ShellCommand::SendFile(path_arg(arg, "send-file")?),
        "stop-file" => ShellCommand::StopFile,
        "stats" => ShellCommand::Stats,
        "connect" => ShellCommand::Connect,
        "disconnect" => ShellCommand::Disconnect,
        "help" | "?" => ShellCommand::Help,
        "quit" | "exit" => ShellCommand::Quit,
        _ => return Err(format!("Unknown command '/{}', try /help", name)),
    };
    Ok(command)
}

fn path_arg(arg: &str, command: &str) -> Result<PathBuf, String> {
    if arg.is_empty() {
        Err(format!("/{} needs a file name", command))
    } else {
        Ok(PathBuf::from(arg))
    }
}

fn switch_arg(arg: &str) -> Result<bool, String> {
    match arg.to_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        _ => Err(format!("Expected on or off, got '{}'", arg)),
    }
}

/// State behind the prompt: the terminal plus an optional file upload.
pub struct Shell {
    terminal: Arc<Terminal>,
    settings: Settings,
    transmission: Option<FileTransmission>,
}

impl Shell {
    pub fn new(terminal: Arc<Terminal>, settings: Settings) -> Self {
        Self {
            terminal,
            settings,
            transmission: None,
        }
    }

    pub fn terminal(&self) -> &Arc<Terminal> {
        &self.terminal
    }

    /// Run one command; informational output is returned for the caller to print.
    pub async fn execute(&mut self, command: ShellCommand) -> Result<(Flow, Option<String>), String> {
        let session = self.terminal.session();
        let output = match command {
            ShellCommand::Send(text) => {
                self.terminal
                    .submit(&text)
                    .await
                    .map_err(|e| format!("Failed to send: {}", e))?;
                None
            }
            ShellCommand::Clear => {
                self.terminal.clear().await;
                None
            }
            ShellCommand::Save(path) => {
                session
                    .lock()
                    .await
                    .save(&path)
                    .map_err(|e| format!("Failed to save console: {}", e))?;
                Some(format!("Saved to {}", path.display()))
            }
            ShellCommand::History => {
                let guard = session.lock().await;
                // hex input is listed as regrouped byte pairs
                let hex = guard.config().data_mode == DataMode::Hexadecimal;
                Some(
                    guard
                        .history()
                        .entries()
                        .iter()
                        .enumerate()
                        .map(|(i, e)| {
                            let shown = if hex { guard.format_user_hex(e) } else { e.clone() };
                            format!("{:>3}  {}", i + 1, shown)
                        })
                        .collect::<Vec<_>>()
                        .join("\n"),
                )
            }
            ShellCommand::Up => Some(self.terminal.history_up().await),
            ShellCommand::Down => Some(self.terminal.history_down().await),
            ShellCommand::Input(mode) => {
                session.lock().await.set_data_mode(mode);
                None
            }
            ShellCommand::Display(mode) => {
                session.lock().await.set_display_mode(mode);
                None
            }
            ShellCommand::Ending(ending) => {
                session.lock().await.set_line_ending(ending);
                None
            }
            ShellCommand::Echo(on) => {
                session.lock().await.set_echo(on);
                None
            }
            ShellCommand::Timestamps(on) => {
                session.lock().await.set_show_timestamp(on);
                None
            }
            ShellCommand::Vt100(on) => {
                session.lock().await.set_vt100(on);
                None
            }
            ShellCommand::Autoscroll(on) => {
                session.lock().await.set_autoscroll(on);
                None
            }
            ShellCommand::SendFile(path) => Some(self.send_file(path).await?),
            ShellCommand::StopFile => match self.transmission.as_mut() {
                Some(transmission) => {
                    transmission.stop().await;
                    let progress = transmission.progress();
                    Some(format!("Paused at {}%", progress.percent()))
                }
                None => return Err("No file transmission".to_string()),
            },
            ShellCommand::Stats => {
                let handle = self.terminal.handle().await.ok_or("Not connected")?;
                let stats = handle.stats();
                Some(format!(
                    "read {} bytes in {} chunks, wrote {} bytes, {} write errors{}",
                    stats.bytes_read,
                    stats.chunks_read,
                    stats.bytes_written,
                    stats.write_errors,
                    stats.last_error.map(|e| format!(", last error: {}", e)).unwrap_or_default()
                ))
            }
            ShellCommand::Connect => {
                self.terminal
                    .connect(&self.settings.port)
                    .await
                    .map_err(|e| format!("Failed to connect to {}: {}", self.settings.port.port_name, e))?;
                None
            }
            ShellCommand::Disconnect => {
                self.stop_transmission().await;
                self.terminal
                    .disconnect()
                    .await
                    .map_err(|e| format!("Failed to disconnect: {}", e))?;
                None
            }
            ShellCommand::Help => Some(HELP.to_string()),
            ShellCommand::Quit => return Ok((Flow::Quit, None)),
        };
        Ok((Flow::Continue, output))
    }

    /// Start (or resume) sending `path`.
    pub async fn send_file(&mut self, path: PathBuf) -> Result<String, String> {
        let handle = self.terminal.handle().await.ok_or("Not connected")?;

        let same_file = self.transmission.as_ref().map(|t| t.path() == path).unwrap_or(false);
        if !same_file {
            self.stop_transmission().await;
            let transmission = FileTransmission::open(&path)
                .map_err(|e| format!("Failed to open {}: {}", path.display(), e))?;
            self.transmission = Some(transmission);
        }

        let interval = self.settings.transmission.line_interval();
        match self.transmission.as_mut() {
            Some(transmission) => {
                transmission
                    .begin(handle, interval)
                    .map_err(|e| format!("Failed to start transmission: {}", e))?;
                Ok(format!("Sending {} ({})", transmission.file_name(), transmission.human_size()))
            }
            None => Err("No file transmission".to_string()),
        }
    }

    /// Wait for a running upload to end by itself.
    pub async fn wait_transmission(&mut self) {
        if let Some(transmission) = self.transmission.as_mut() {
            transmission.wait().await;
        }
    }

    pub async fn stop_transmission(&mut self) {
        if let Some(mut transmission) = self.transmission.take() {
            transmission.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_sent() {
        assert_eq!(parse_line("AT+GMR"), Ok(ShellCommand::Send("AT+GMR".to_string())));
        assert_eq!(parse_line("//etc"), Ok(ShellCommand::Send("/etc".to_string())));
        assert_eq!(parse_line(""), Ok(ShellCommand::Send(String::new())));
    }

    #[test]
    fn test_commands() {
        assert_eq!(parse_line("/clear"), Ok(ShellCommand::Clear));
        assert_eq!(parse_line("/save out.txt"), Ok(ShellCommand::Save(PathBuf::from("out.txt"))));
        assert_eq!(parse_line("/display hex"), Ok(ShellCommand::Display(DisplayMode::Hexadecimal)));
        assert_eq!(parse_line("/ending crlf"), Ok(ShellCommand::Ending(LineEnding::CrLf)));
        assert_eq!(parse_line("/echo on"), Ok(ShellCommand::Echo(true)));
        assert_eq!(parse_line("/QUIT"), Ok(ShellCommand::Quit));
    }

    #[test]
    fn test_command_errors() {
        assert!(parse_line("/save").is_err());
        assert!(parse_line("/echo maybe").is_err());
        assert!(parse_line("/frobnicate").is_err());
    }
}
