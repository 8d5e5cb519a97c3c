//! Line-by-line file upload over an open link.
//!
//! One line is written per tick, without its line terminator. Empty lines still use up
//! a tick so the pacing of the file is kept.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use super::{Result, SerialError, SerialHandle};

/// Delay between two lines unless configured otherwise.
pub const DEFAULT_LINE_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransmissionProgress {
    pub bytes_sent: u64,
    pub total_bytes: u64,
    pub active: bool,
    pub finished: bool,
}

impl TransmissionProgress {
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return if self.finished { 100 } else { 0 };
        }
        ((self.bytes_sent.min(self.total_bytes) * 100) / self.total_bytes) as u8
    }
}

struct TransmissionTask {
    task_handle: tokio::task::JoinHandle<()>,
    stop_tx: mpsc::Sender<()>,
}

pub struct FileTransmission {
    path: PathBuf,
    content: Arc<String>,
    progress_tx: Arc<watch::Sender<TransmissionProgress>>,
    progress_rx: watch::Receiver<TransmissionProgress>,
    task: Option<TransmissionTask>,
}

impl FileTransmission {
    /// Load `path` for sending. Invalid UTF-8 is replaced, the file is sent as text.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let raw = std::fs::read(&path)?;
        let content = String::from_utf8_lossy(&raw).into_owned();

        let (progress_tx, progress_rx) = watch::channel(TransmissionProgress {
            total_bytes: content.len() as u64,
            ..Default::default()
        });

        log::info!("Loaded {} for transmission ({})", path.display(), human_size(content.len() as u64));
        Ok(Self {
            path,
            content: Arc::new(content),
            progress_tx: Arc::new(progress_tx),
            progress_rx,
            task: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn human_size(&self) -> String {
        human_size(self.size())
    }

    pub fn progress(&self) -> TransmissionProgress {
        self.progress_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransmissionProgress> {
        self.progress_rx.clone()
    }

    pub fn is_active(&self) -> bool {
        self.progress_rx.borrow().active
    }

    /// Start sending from the current position; a finished transmission starts over.
    pub fn begin(&mut self, handle: SerialHandle, interval: Duration) -> Result<()> {
        if !handle.is_connected() {
            return Err(SerialError::NotConnected);
        }
        if let Some(task) = &self.task {
            if !task.task_handle.is_finished() {
                log::warn!("Transmission of {} already running", self.file_name());
                return Ok(());
            }
        }

        let previous = self.progress();
        let start = if previous.finished { 0 } else { previous.bytes_sent as usize };
        self.progress_tx.send_replace(TransmissionProgress {
            bytes_sent: start as u64,
            total_bytes: self.size(),
            active: true,
            finished: false,
        });

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task_handle = tokio::spawn(transmission_loop(
            self.content.clone(),
            start,
            handle,
            interval.max(Duration::from_millis(1)),
            self.progress_tx.clone(),
            stop_rx,
        ));
        self.task = Some(TransmissionTask { task_handle, stop_tx });
        log::info!("Sending {} from byte {}", self.file_name(), start);
        Ok(())
    }

    /// Pause the transmission; a later [`begin`](Self::begin) resumes where it stopped.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.stop_tx.send(()).await;
            let _ = timeout(Duration::from_secs(2), task.task_handle).await;
        }
        self.progress_tx.send_modify(|p| p.active = false);
    }

    /// Wait until the running transmission ends on its own.
    pub async fn wait(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.task_handle.await;
        }
    }
}

async fn transmission_loop(
    content: Arc<String>,
    mut position: usize,
    handle: SerialHandle,
    interval: Duration,
    progress_tx: Arc<watch::Sender<TransmissionProgress>>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut finished = false;

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = ticker.tick() => {
                if !handle.is_connected() {
                    log::warn!("Link closed, transmission stopped at byte {}", position);
                    break;
                }
                let Some((line, next)) = next_line(&content, position) else {
                    finished = true;
                    break;
                };

                if !line.is_empty() {
                    if let Err(e) = handle.write(line.as_bytes().to_vec()).await {
                        log::error!("Transmission aborted: {}", e);
                        break;
                    }
                }
                position = next;
                progress_tx.send_modify(|p| p.bytes_sent = position as u64);
            }
        }
    }

    progress_tx.send_modify(|p| {
        p.active = false;
        p.finished = finished;
    });
    if finished {
        log::info!("Transmission complete ({} bytes)", content.len());
    }
}

/// Line starting at `position` without its terminator, and the offset of the next line.
fn next_line(content: &str, position: usize) -> Option<(&str, usize)> {
    if position >= content.len() {
        return None;
    }
    let rest = &content[position..];
    let (line, consumed) = match rest.find('\n') {
        Some(i) => (&rest[..i], i + 1),
        None => (rest, rest.len()),
    };
    Some((line.strip_suffix('\r').unwrap_or(line), position + consumed))
}

/// File size as shown to the user: bytes below 1 KiB, then KB or MB with two decimals.
pub fn human_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let size = bytes as f64;
    if size < KIB {
        format!("{} bytes", bytes)
    } else if size < KIB * KIB {
        format!("{:.2} KB", size / KIB)
    } else {
        format!("{:.2} MB", size / (KIB * KIB))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 bytes");
        assert_eq!(human_size(2048), "2.00 KB");
        assert_eq!(human_size(3 * 1024 * 1024 + 512 * 1024), "3.50 MB");
    }

    #[test]
    fn test_next_line() {
        let content = "AT\r\n\nATI";
        assert_eq!(next_line(content, 0), Some(("AT", 4)));
        assert_eq!(next_line(content, 4), Some(("", 5)));
        assert_eq!(next_line(content, 5), Some(("ATI", 8)));
        assert_eq!(next_line(content, 8), None);
    }

    #[test]
    fn test_progress_percent() {
        let progress = TransmissionProgress { bytes_sent: 25, total_bytes: 100, ..Default::default() };
        assert_eq!(progress.percent(), 25);
        let empty = TransmissionProgress { finished: true, ..Default::default() };
        assert_eq!(empty.percent(), 100);
    }

    #[test]
    fn test_open_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "line one\nline two\n").unwrap();

        let transmission = FileTransmission::open(file.path()).unwrap();
        assert_eq!(transmission.size(), 18);
        assert_eq!(transmission.progress().total_bytes, 18);
        assert!(!transmission.is_active());
    }

    #[test]
    fn test_open_missing_file() {
        assert!(matches!(
            FileTransmission::open("/nonexistent/upload.txt"),
            Err(SerialError::IoError(_))
        ));
    }
}
