//! Background task that owns an open port: it forwards every received chunk to subscribers
//! and serializes writes coming from any number of [`SerialHandle`] clones.
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};

use super::{Result, SerialDeviceInfo, SerialError, SerialInterface};

/// What the reader task reports to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Raw bytes exactly as they arrived
    Data(Vec<u8>),
    /// Fatal I/O error, always followed by `Closed`
    Error(String),
    Closed,
}

#[derive(Debug)]
pub enum SerialCommand {
    Write {
        data: Vec<u8>,
        responder: oneshot::Sender<Result<usize>>,
    },
    Shutdown,
}

/// Counters published by the reader task after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub chunks_read: u64,
    pub write_errors: u64,
    pub last_error: Option<String>,
}

#[derive(Clone)]
pub struct SerialHandle {
    cmd_tx: mpsc::Sender<SerialCommand>,
    events_tx: broadcast::Sender<TransportEvent>,
    connected_rx: watch::Receiver<bool>,
    stats_rx: watch::Receiver<LinkStats>,
    device_info: Option<SerialDeviceInfo>,
}

impl SerialHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events_tx.subscribe()
    }

    pub fn stats_receiver(&self) -> watch::Receiver<LinkStats> {
        self.stats_rx.clone()
    }

    pub fn stats(&self) -> LinkStats {
        self.stats_rx.borrow().clone()
    }

    pub fn connection_receiver(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    pub fn device_info(&self) -> Option<&SerialDeviceInfo> {
        self.device_info.as_ref()
    }

    /// Queue `data` for the port and wait until it has been written.
    pub async fn write(&self, data: Vec<u8>) -> Result<usize> {
        if !self.is_connected() {
            return Err(SerialError::NotConnected);
        }
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(SerialCommand::Write { data, responder: tx })
            .await
            .map_err(|_| SerialError::ChannelClosed)?;
        rx.await.map_err(|_| SerialError::ChannelClosed)?
    }

    /// Ask the task to close the port. Completion is signalled by [`TransportEvent::Closed`].
    pub async fn shutdown(&self) {
        if self.cmd_tx.send(SerialCommand::Shutdown).await.is_err() {
            log::debug!("Serial task already stopped");
        }
    }
}

pub struct SerialBuilder {
    interface: Arc<Mutex<SerialInterface>>,
    event_capacity: usize,
    command_capacity: usize,
    read_timeout_ms: u64,
    read_buffer_size: usize,
}

impl SerialBuilder {
    pub fn new(interface: SerialInterface) -> Self {
        Self {
            interface: Arc::new(Mutex::new(interface)),
            event_capacity: 256,
            command_capacity: 64,
            read_timeout_ms: 25,
            read_buffer_size: 512,
        }
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn read_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.read_timeout_ms = timeout_ms;
        self
    }

    /// Spawn the reader task.
    ///
    /// The returned receiver is subscribed before the task starts, so it sees every chunk.
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> (SerialHandle, broadcast::Receiver<TransportEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(self.command_capacity);
        let (events_tx, events_rx) = broadcast::channel(self.event_capacity);
        let (stats_tx, stats_rx) = watch::channel(LinkStats::default());

        // A fresh interface could have been handed over closed
        let (connected, device_info) = match self.interface.try_lock() {
            Ok(guard) => (guard.is_connected(), guard.device_info().cloned()),
            Err(_) => (true, None),
        };
        let (connected_tx, connected_rx) = watch::channel(connected);

        tokio::spawn(reader_task(
            self.interface.clone(),
            cmd_rx,
            events_tx.clone(),
            connected_tx,
            stats_tx,
            ReadParams {
                timeout_ms: self.read_timeout_ms,
                buffer_size: self.read_buffer_size,
            },
        ));

        let handle = SerialHandle {
            cmd_tx,
            events_tx,
            connected_rx,
            stats_rx,
            device_info,
        };
        (handle, events_rx)
    }
}

struct ReadParams {
    timeout_ms: u64,
    buffer_size: usize,
}

async fn reader_task(
    interface: Arc<Mutex<SerialInterface>>,
    mut cmd_rx: mpsc::Receiver<SerialCommand>,
    events_tx: broadcast::Sender<TransportEvent>,
    connected_tx: watch::Sender<bool>,
    stats_tx: watch::Sender<LinkStats>,
    params: ReadParams,
) {
    use tokio::select;

    let mut stats = LinkStats::default();

    loop {
        select! {
            maybe_cmd = cmd_rx.recv() => {
                match maybe_cmd {
                    Some(SerialCommand::Write { data, responder }) => {
                        let result = { let mut guard = interface.lock().await; guard.send_data(&data).await };
                        let failure = match &result {
                            Ok(n) => { stats.bytes_written += *n as u64; None },
                            Err(e) => {
                                stats.write_errors += 1;
                                stats.last_error = Some(e.to_string());
                                Some(format!("Write failed: {}", e))
                            }
                        };
                        let _ = responder.send(result);
                        let _ = stats_tx.send(stats.clone());
                        if let Some(msg) = failure {
                            log::error!("{}", msg);
                            let _ = events_tx.send(TransportEvent::Error(msg));
                            break;
                        }
                    },
                    Some(SerialCommand::Shutdown) | None => break,
                }
            },
            read_res = async {
                let mut buf = vec![0u8; params.buffer_size];
                let mut guard = interface.lock().await;
                guard.read_data(&mut buf, params.timeout_ms).await.map(|n| { buf.truncate(n); buf })
            } => {
                match read_res {
                    Ok(buf) if !buf.is_empty() => {
                        stats.bytes_read += buf.len() as u64;
                        stats.chunks_read += 1;
                        let _ = stats_tx.send(stats.clone());
                        let _ = events_tx.send(TransportEvent::Data(buf));
                    },
                    Ok(_) => tokio::task::yield_now().await,
                    Err(SerialError::Timeout) => {},
                    Err(e) => {
                        let msg = format!("Read failed: {}", e);
                        log::error!("{}", msg);
                        stats.last_error = Some(msg.clone());
                        let _ = stats_tx.send(stats.clone());
                        let _ = events_tx.send(TransportEvent::Error(msg));
                        break;
                    }
                }
            },
        }
    }

    interface.lock().await.disconnect();
    let _ = connected_tx.send(false);
    let _ = events_tx.send(TransportEvent::Closed);
    log::debug!(
        "Serial task finished: {} bytes read, {} bytes written",
        stats.bytes_read,
        stats.bytes_written
    );
}

/// Wait for `Closed` on `rx`, giving up after `limit`.
pub async fn wait_closed(rx: &mut broadcast::Receiver<TransportEvent>, limit: Duration) -> bool {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(TransportEvent::Closed) | Err(broadcast::error::RecvError::Closed) => return true,
                _ => {}
            }
        }
    };
    tokio::time::timeout(limit, wait).await.unwrap_or(false)
}
