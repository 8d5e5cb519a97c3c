#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serial_terminal_lib::serial::{Result, SerialError, SerialInterface, SerialPortIO};
use serial_terminal_lib::session::SessionEvent;
use tokio::sync::broadcast;

/// Control side of a [`ScriptedPort`]: feed inbound chunks, inspect writes, break the link.
#[derive(Clone, Default)]
pub struct PortScript {
    incoming: Arc<Mutex<VecDeque<Vec<u8>>>>,
    written: Arc<Mutex<Vec<u8>>>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    broken: Arc<AtomicBool>,
    reject_writes: Arc<AtomicBool>,
}

impl PortScript {
    pub fn push(&self, chunk: &[u8]) {
        self.incoming.lock().unwrap().push_back(chunk.to_vec());
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    /// Every write call, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    /// Chunks pushed but not read by the port yet
    pub fn pending(&self) -> usize {
        self.incoming.lock().unwrap().len()
    }

    /// Fail reads and writes from now on.
    pub fn unplug(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Fail writes only; reads keep working.
    pub fn reject_writes(&self) {
        self.reject_writes.store(true, Ordering::SeqCst);
    }

    pub fn interface(&self) -> SerialInterface {
        SerialInterface::from_io(Box::new(ScriptedPort { script: self.clone() }))
    }
}

/// In-memory stand-in for a serial port.
pub struct ScriptedPort {
    script: PortScript,
}

fn unplugged() -> SerialError {
    SerialError::IoError(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "device unplugged"))
}

#[async_trait::async_trait]
impl SerialPortIO for ScriptedPort {
    async fn send_data(&mut self, data: &[u8]) -> Result<usize> {
        if self.script.broken.load(Ordering::SeqCst) {
            return Err(unplugged());
        }
        if self.script.reject_writes.load(Ordering::SeqCst) {
            return Err(SerialError::IoError(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write rejected",
            )));
        }
        self.script.written.lock().unwrap().extend_from_slice(data);
        self.script.writes.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    async fn read_data(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize> {
        if self.script.broken.load(Ordering::SeqCst) {
            return Err(unplugged());
        }
        let chunk = self.script.incoming.lock().unwrap().pop_front();
        match chunk {
            Some(chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                Ok(n)
            }
            None => {
                tokio::time::sleep(Duration::from_millis(timeout_ms.min(2))).await;
                Err(SerialError::Timeout)
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Wait for the first event matching `pred`, failing the test after two seconds.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("session dropped"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("timed out waiting for session event")
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub async fn eventually<F: FnMut() -> bool>(mut cond: F) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
