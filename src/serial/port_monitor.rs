use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use super::{Result, SerialDeviceInfo, SerialInterface};

/// Interval at which the port list is refreshed.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Events emitted by the port monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// A serial port appeared
    PortAdded(SerialDeviceInfo),
    /// A serial port disappeared, identified by name
    PortRemoved(String),
}

/// Watches the set of available serial ports.
#[async_trait::async_trait]
pub trait PortMonitor: Send + Sync {
    /// Start monitoring for port changes
    async fn start(&mut self) -> Result<()>;

    /// Stop monitoring
    async fn stop(&mut self) -> Result<()>;

    /// Take the receiver for port events. Only the first call returns `Some`.
    fn get_receiver(&mut self) -> Option<mpsc::Receiver<PortEvent>>;
}

type PortLister = fn() -> Result<Vec<SerialDeviceInfo>>;

struct PollingSession {
    task_handle: tokio::task::JoinHandle<()>,
    stop_tx: mpsc::Sender<()>,
}

/// Port monitor that re-enumerates ports on a fixed interval and reports the difference.
pub struct PollingPortMonitor {
    interval: Duration,
    lister: PortLister,
    event_tx: mpsc::Sender<PortEvent>,
    event_rx: Option<mpsc::Receiver<PortEvent>>,
    session: Option<PollingSession>,
}

impl PollingPortMonitor {
    pub fn new() -> Self {
        Self::with_lister(DEFAULT_POLL_INTERVAL, SerialInterface::discover_devices)
    }

    /// Monitor using a custom enumeration function.
    pub fn with_lister(interval: Duration, lister: PortLister) -> Self {
        let (event_tx, event_rx) = mpsc::channel(64);
        Self {
            interval,
            lister,
            event_tx,
            event_rx: Some(event_rx),
            session: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    async fn polling_loop(
        interval: Duration,
        lister: PortLister,
        event_tx: mpsc::Sender<PortEvent>,
        mut stop_rx: mpsc::Receiver<()>,
    ) {
        let mut known: Vec<SerialDeviceInfo> = Vec::new();
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));

        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = ticker.tick() => {
                    let current = match lister() {
                        Ok(ports) => ports,
                        Err(e) => {
                            log::warn!("Port enumeration failed: {}", e);
                            continue;
                        }
                    };
                    for event in diff_ports(&known, &current) {
                        log::debug!("Port event: {:?}", event);
                        if event_tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    known = current;
                }
            }
        }
        log::debug!("Port monitor stopped");
    }
}

impl Default for PollingPortMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PortMonitor for PollingPortMonitor {
    async fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            log::warn!("Port monitor already running");
            return Ok(());
        }

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task_handle = tokio::spawn(Self::polling_loop(
            self.interval,
            self.lister,
            self.event_tx.clone(),
            stop_rx,
        ));
        self.session = Some(PollingSession { task_handle, stop_tx });
        log::info!("Port monitor started ({:?} interval)", self.interval);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            let _ = session.stop_tx.send(()).await;
            let _ = timeout(Duration::from_secs(2), session.task_handle).await;
        }
        Ok(())
    }

    fn get_receiver(&mut self) -> Option<mpsc::Receiver<PortEvent>> {
        self.event_rx.take()
    }
}

/// Events turning `previous` into `current`: removals first, then additions.
pub fn diff_ports(previous: &[SerialDeviceInfo], current: &[SerialDeviceInfo]) -> Vec<PortEvent> {
    let before: HashSet<&str> = previous.iter().map(|d| d.port_name.as_str()).collect();
    let after: HashSet<&str> = current.iter().map(|d| d.port_name.as_str()).collect();

    let removed = previous
        .iter()
        .filter(|d| !after.contains(d.port_name.as_str()))
        .map(|d| PortEvent::PortRemoved(d.port_name.clone()));
    let added = current
        .iter()
        .filter(|d| !before.contains(d.port_name.as_str()))
        .map(|d| PortEvent::PortAdded(d.clone()));

    removed.chain(added).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str) -> SerialDeviceInfo {
        SerialDeviceInfo::from_name(name)
    }

    #[test]
    fn test_diff_ports() {
        let previous = vec![device("/dev/ttyUSB0"), device("/dev/ttyUSB1")];
        let current = vec![device("/dev/ttyUSB1"), device("/dev/ttyACM0")];
        assert_eq!(
            diff_ports(&previous, &current),
            vec![
                PortEvent::PortRemoved("/dev/ttyUSB0".to_string()),
                PortEvent::PortAdded(device("/dev/ttyACM0")),
            ]
        );
        assert!(diff_ports(&current, &current).is_empty());
    }

    fn two_ports() -> Result<Vec<SerialDeviceInfo>> {
        Ok(vec![device("COM3"), device("COM4")])
    }

    #[tokio::test]
    async fn test_polling_reports_initial_ports() {
        let mut monitor = PollingPortMonitor::with_lister(Duration::from_millis(10), two_ports);
        let mut rx = monitor.get_receiver().unwrap();
        assert!(monitor.get_receiver().is_none());

        monitor.start().await.unwrap();
        assert_eq!(rx.recv().await, Some(PortEvent::PortAdded(device("COM3"))));
        assert_eq!(rx.recv().await, Some(PortEvent::PortAdded(device("COM4"))));

        monitor.stop().await.unwrap();
        assert!(!monitor.is_running());
        // unchanged list produces nothing further
        assert!(rx.try_recv().is_err());
    }
}
