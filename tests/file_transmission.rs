mod common;

use std::io::Write;
use std::time::Duration;

use common::{eventually, PortScript};
use serial_terminal_lib::console::ConsoleConfig;
use serial_terminal_lib::serial::transmission::FileTransmission;
use serial_terminal_lib::serial::SerialError;
use serial_terminal_lib::session::{Terminal, TerminalSession};

fn upload(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_lines_sent_without_terminators() {
    let script = PortScript::default();
    let terminal = Terminal::new(TerminalSession::new(ConsoleConfig::default(), false));
    terminal.attach(script.interface()).await.unwrap();

    let file = upload("AT\r\n\nATI\nATZ");
    let mut transmission = FileTransmission::open(file.path()).unwrap();
    transmission
        .begin(terminal.handle().await.unwrap(), Duration::from_millis(1))
        .unwrap();
    transmission.wait().await;

    // one write per non-empty line
    assert_eq!(script.writes(), vec![b"AT".to_vec(), b"ATI".to_vec(), b"ATZ".to_vec()]);
    let progress = transmission.progress();
    assert!(progress.finished);
    assert!(!progress.active);
    assert_eq!(progress.percent(), 100);
}

#[tokio::test]
async fn test_finished_transmission_restarts_from_top() {
    let script = PortScript::default();
    let terminal = Terminal::new(TerminalSession::default());
    terminal.attach(script.interface()).await.unwrap();
    let handle = terminal.handle().await.unwrap();

    let file = upload("one\ntwo\n");
    let mut transmission = FileTransmission::open(file.path()).unwrap();
    transmission.begin(handle.clone(), Duration::from_millis(1)).unwrap();
    transmission.wait().await;
    transmission.begin(handle, Duration::from_millis(1)).unwrap();
    transmission.wait().await;

    assert_eq!(script.written(), b"onetwoonetwo");
}

#[tokio::test]
async fn test_stop_pauses_and_begin_resumes() {
    let script = PortScript::default();
    let terminal = Terminal::new(TerminalSession::default());
    terminal.attach(script.interface()).await.unwrap();
    let handle = terminal.handle().await.unwrap();

    let content: String = (0..50).map(|i| format!("line{}\n", i)).collect();
    let file = upload(&content);
    let mut transmission = FileTransmission::open(file.path()).unwrap();
    transmission.begin(handle.clone(), Duration::from_millis(20)).unwrap();

    eventually(|| script.writes().len() >= 2).await;
    transmission.stop().await;
    let paused = transmission.progress();
    assert!(!paused.active);
    assert!(!paused.finished);
    let sent = script.writes().len();
    assert!(sent < 50);

    transmission.begin(handle, Duration::from_millis(1)).unwrap();
    transmission.wait().await;
    let writes = script.writes();
    assert_eq!(writes.len(), 50);
    assert_eq!(writes[sent], format!("line{}", sent).into_bytes());
}

#[tokio::test]
async fn test_transmission_stops_when_link_closes() {
    let script = PortScript::default();
    let terminal = Terminal::new(TerminalSession::default());
    terminal.attach(script.interface()).await.unwrap();
    let handle = terminal.handle().await.unwrap();

    let content: String = (0..100).map(|i| format!("{}\n", i)).collect();
    let file = upload(&content);
    let mut transmission = FileTransmission::open(file.path()).unwrap();
    transmission.begin(handle.clone(), Duration::from_millis(5)).unwrap();

    eventually(|| !script.writes().is_empty()).await;
    terminal.disconnect().await.unwrap();
    transmission.wait().await;

    let progress = transmission.progress();
    assert!(!progress.finished);
    assert!(!progress.active);
    assert!(matches!(
        transmission.begin(handle, Duration::from_millis(1)),
        Err(SerialError::NotConnected)
    ));
}
