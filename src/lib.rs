pub mod commands;
pub mod config;
pub mod console;
pub mod serial;
pub mod session;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use commands::{Flow, Shell};
use config::{CliArgs, Settings};
use serial::SerialInterface;
use session::{SessionEvent, Terminal, TerminalSession};

/// Run the terminal with parsed command line arguments.
pub async fn run(args: CliArgs) -> anyhow::Result<()> {
    if args.list {
        return list_ports(args.json);
    }

    let settings = Settings::load_with_args(&args).context("Invalid configuration")?;
    if args.save_config {
        let path = settings.save().context("Failed to save configuration")?;
        eprintln!("Configuration saved to {}", path.display());
    }
    if settings.port.port_name.is_empty() {
        bail!("No serial port selected, pass --port (see --list)");
    }

    let session = TerminalSession::new(settings.console.options.clone(), settings.console.vt100);
    let terminal = Arc::new(Terminal::new(session));
    let printer = tokio::spawn(print_events(terminal.subscribe().await, args.json));

    terminal
        .connect(&settings.port)
        .await
        .with_context(|| format!("Failed to open {}", settings.port.port_name))?;

    let mut shell = Shell::new(terminal.clone(), settings);
    if let Some(path) = args.send_file.clone() {
        match shell.send_file(path).await {
            Ok(message) => eprintln!("{}", message),
            Err(message) => eprintln!("{}", message),
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        let outcome = match commands::parse_line(&line) {
            Ok(command) => shell.execute(command).await,
            Err(message) => Err(message),
        };
        match outcome {
            Ok((Flow::Quit, _)) => break,
            Ok((Flow::Continue, Some(output))) => eprintln!("{}", output),
            Ok((Flow::Continue, None)) => {}
            Err(message) => eprintln!("{}", message),
        }
    }

    // stdin closed while a file is going out: let it finish
    if args.send_file.is_some() {
        shell.wait_transmission().await;
    }
    shell.stop_transmission().await;
    if terminal.is_connected().await {
        terminal.disconnect().await?;
    }
    drop(shell);
    drop(terminal);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    Ok(())
}

fn list_ports(json: bool) -> anyhow::Result<()> {
    let devices = SerialInterface::discover_devices().context("Failed to enumerate serial ports")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No serial ports found");
    }
    for device in devices {
        match (device.vid, device.pid) {
            (Some(vid), Some(pid)) => {
                println!("{}\t{} [{:04x}:{:04x}]", device.port_name, device.description, vid, pid)
            }
            _ => println!("{}\t{}", device.port_name, device.description),
        }
    }
    Ok(())
}

/// Render session events on stdout until the session goes away.
async fn print_events(mut events: broadcast::Receiver<SessionEvent>, json: bool) {
    use broadcast::error::RecvError;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("Display fell behind, {} events skipped", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => log::error!("Failed to encode event: {}", e),
            }
            continue;
        }

        match event {
            SessionEvent::LinesChanged { finalized, partial, cleared } => {
                let mut stdout = std::io::stdout().lock();
                // redraw the in-progress row
                let _ = write!(stdout, "\r\x1b[2K");
                if cleared {
                    let _ = write!(stdout, "\x1b[2J\x1b[H");
                }
                for line in &finalized {
                    let _ = writeln!(stdout, "{}", line);
                }
                let _ = write!(stdout, "{}", partial);
                let _ = stdout.flush();
            }
            SessionEvent::ConnectionChanged { connected } => {
                eprintln!("[{}]", if connected { "connected" } else { "disconnected" });
            }
            SessionEvent::TransportError { message } => eprintln!("[error] {}", message),
            SessionEvent::HistoryChanged { text } if !text.is_empty() => eprintln!("> {}", text),
            SessionEvent::ConfigChanged { config, vt100 } => {
                log::info!(
                    "input {}, display {}, ending {}, echo {}, vt100 {}",
                    config.data_mode.as_str(),
                    config.display_mode.as_str(),
                    config.line_ending.as_str(),
                    config.echo,
                    vt100
                );
            }
            _ => {}
        }
    }
}
