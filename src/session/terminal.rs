use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::{Result, SessionError, SessionEvent, TerminalSession};
use crate::serial::reader::wait_closed;
use crate::serial::{PortSettings, SerialBuilder, SerialHandle, SerialInterface, TransportEvent};

pub type SharedSession = Arc<Mutex<TerminalSession>>;

/// Inbound chunks buffered between the port and the console.
///
/// A submit holds the session while the port writes, so the pump must be able to queue
/// what arrives meanwhile.
pub const DEFAULT_INBOUND_CAPACITY: usize = 1024;

/// An open link and the task feeding its data into the session.
struct Link {
    handle: SerialHandle,
    pump: JoinHandle<()>,
}

/// Serial terminal: one session shared by the inbound pump and the user-facing calls.
///
/// All console, parser and history mutation happens under the session mutex, so inbound
/// data, submits and clears never interleave mid-operation.
pub struct Terminal {
    session: SharedSession,
    link: Mutex<Option<Link>>,
    inbound_capacity: usize,
}

impl Terminal {
    pub fn new(session: TerminalSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            link: Mutex::new(None),
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
        }
    }

    /// Number of inbound chunks that may queue up before the console starts losing data.
    pub fn inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity.max(1);
        self
    }

    pub fn session(&self) -> SharedSession {
        self.session.clone()
    }

    pub async fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.lock().await.subscribe()
    }

    /// Open the port and start forwarding its data to the console
    pub async fn connect(&self, settings: &PortSettings) -> Result<()> {
        let mut interface = SerialInterface::new();
        interface.connect(settings)?;
        self.attach(interface).await
    }

    /// Start a link over an already open interface, replacing any previous link
    pub async fn attach(&self, interface: SerialInterface) -> Result<()> {
        if !interface.is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.disconnect_link().await;

        let (handle, events_rx) = SerialBuilder::new(interface)
            .event_capacity(self.inbound_capacity)
            .build();
        let pump = tokio::spawn(inbound_pump(self.session.clone(), events_rx));

        match handle.device_info() {
            Some(device) => log::info!("Terminal attached to {}", device.port_name),
            None => log::info!("Terminal attached"),
        }

        *self.link.lock().await = Some(Link { handle, pump });
        self.session.lock().await.notify_connection(true);
        Ok(())
    }

    /// Close the port. The console keeps its content.
    pub async fn disconnect(&self) -> Result<()> {
        if self.disconnect_link().await {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.link
            .lock()
            .await
            .as_ref()
            .map(|link| link.handle.is_connected())
            .unwrap_or(false)
    }

    /// Handle to the open link, e.g. for a file transmission
    pub async fn handle(&self) -> Option<SerialHandle> {
        self.link.lock().await.as_ref().map(|link| link.handle.clone())
    }

    /// Send what the user typed.
    ///
    /// Input is formatted for the current data mode first; invalid input is rejected without
    /// touching the port or the history. On success the command enters history and is
    /// echoed when echo is on.
    pub async fn submit(&self, text: &str) -> Result<usize> {
        let handle = self.handle().await.ok_or(SessionError::NotConnected)?;

        let mut session = self.session.lock().await;
        let bytes = session.encode_input(text)?;
        if !handle.is_connected() {
            return Err(SessionError::NotConnected);
        }

        match handle.write(bytes.clone()).await {
            Ok(written) => {
                session.record_sent(text, &bytes[..written.min(bytes.len())]);
                Ok(written)
            }
            Err(e) => {
                log::warn!("Send failed: {}", e);
                Err(e.into())
            }
        }
    }

    pub async fn clear(&self) {
        self.session.lock().await.clear();
    }

    pub async fn history_up(&self) -> String {
        self.session.lock().await.history_up()
    }

    pub async fn history_down(&self) -> String {
        self.session.lock().await.history_down()
    }

    async fn disconnect_link(&self) -> bool {
        let Some(link) = self.link.lock().await.take() else {
            return false;
        };

        let mut rx = link.handle.subscribe();
        if link.handle.is_connected() {
            link.handle.shutdown().await;
            if !wait_closed(&mut rx, Duration::from_secs(2)).await {
                log::warn!("Serial task did not confirm shutdown");
            }
        }
        if timeout(Duration::from_secs(2), link.pump).await.is_err() {
            log::warn!("Inbound pump did not stop in time");
        }
        true
    }
}

async fn inbound_pump(session: SharedSession, mut events_rx: broadcast::Receiver<TransportEvent>) {
    use broadcast::error::RecvError;

    loop {
        match events_rx.recv().await {
            Ok(TransportEvent::Data(bytes)) => session.lock().await.on_bytes(&bytes),
            Ok(TransportEvent::Error(message)) => {
                session.lock().await.notify_transport_error(message);
            }
            Ok(TransportEvent::Closed) | Err(RecvError::Closed) => {
                session.lock().await.notify_connection(false);
                break;
            }
            Err(RecvError::Lagged(skipped)) => {
                let message = format!("Console fell behind, {} received chunks dropped", skipped);
                log::warn!("{}", message);
                session.lock().await.notify_transport_error(message);
            }
        }
    }
}
