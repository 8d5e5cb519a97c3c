use std::io::Write;
use std::time::Duration;

use serialport::{SerialPort, SerialPortType};
use tokio::time::timeout;

use super::{PortSettings, Result, SerialDeviceInfo, SerialError, SerialPortIO};

/// Poll period while waiting for bytes on a native port.
const READ_POLL_MS: u64 = 5;

pub struct SerialInterface {
    io: Option<Box<dyn SerialPortIO>>,
    device_info: Option<SerialDeviceInfo>,
    settings: Option<PortSettings>,
}

impl SerialInterface {
    pub fn new() -> Self {
        Self {
            io: None,
            device_info: None,
            settings: None,
        }
    }

    /// Wrap an already open byte stream, e.g. a loopback or a scripted port in tests.
    pub fn from_io(io: Box<dyn SerialPortIO>) -> Self {
        Self {
            io: Some(io),
            device_info: None,
            settings: None,
        }
    }

    /// List serial ports present on the system
    pub fn discover_devices() -> Result<Vec<SerialDeviceInfo>> {
        let ports = serialport::available_ports()?;
        let mut devices = Vec::new();

        for port in ports {
            // Only keep the callout (cu.*) devices on macOS
            if cfg!(target_os = "macos") && is_macos_dialin(&port.port_name) {
                continue;
            }

            let device = match port.port_type {
                SerialPortType::UsbPort(usb_info) => SerialDeviceInfo {
                    description: usb_info.product.clone().unwrap_or_else(|| port.port_name.clone()),
                    port_name: port.port_name,
                    vid: Some(usb_info.vid),
                    pid: Some(usb_info.pid),
                    serial_number: usb_info.serial_number,
                    manufacturer: usb_info.manufacturer,
                    product: usb_info.product,
                },
                _ => SerialDeviceInfo::from_name(&port.port_name),
            };
            devices.push(device);
        }

        Ok(devices)
    }

    /// Open the port described by `settings`, closing any port that is currently open
    pub fn connect(&mut self, settings: &PortSettings) -> Result<()> {
        if self.is_connected() {
            self.disconnect();
        }

        let builder = serialport::new(settings.port_name.as_str(), settings.baud_rate.value())
            .data_bits(settings.data_bits.into())
            .stop_bits(settings.backend_stop_bits()?)
            .parity(settings.backend_parity()?)
            .flow_control(settings.flow_control.into())
            .timeout(Duration::from_millis(READ_POLL_MS));

        let port = builder.open().map_err(|e| match e.kind() {
            serialport::ErrorKind::NoDevice => SerialError::PortNotFound(settings.port_name.clone()),
            _ => SerialError::ConnectionFailed(e.to_string()),
        })?;

        // Enumeration can fail or miss virtual ports, the open port is usable either way
        let device_info = Self::discover_devices()
            .ok()
            .and_then(|devices| devices.into_iter().find(|d| d.port_name == settings.port_name))
            .unwrap_or_else(|| SerialDeviceInfo::from_name(&settings.port_name));

        self.io = Some(Box::new(NativePort { port }));
        self.device_info = Some(device_info);
        self.settings = Some(settings.clone());

        log::info!(
            "Connected to {} at {} baud",
            settings.port_name,
            settings.baud_rate.value()
        );
        Ok(())
    }

    /// Close the current port
    pub fn disconnect(&mut self) {
        if self.io.is_none() {
            return;
        }
        match &self.device_info {
            Some(device) => log::info!("Disconnecting from {}", device.port_name),
            None => log::info!("Disconnecting serial stream"),
        }
        self.io = None;
        self.device_info = None;
        self.settings = None;
    }

    pub fn is_connected(&self) -> bool {
        self.io.is_some()
    }

    pub fn device_info(&self) -> Option<&SerialDeviceInfo> {
        self.device_info.as_ref()
    }

    pub fn settings(&self) -> Option<&PortSettings> {
        self.settings.as_ref()
    }

    /// Send data to the connected device
    pub async fn send_data(&mut self, data: &[u8]) -> Result<usize> {
        let io = self.io.as_mut().ok_or(SerialError::NotConnected)?;
        let bytes_written = io.send_data(data).await?;
        io.flush().await?;
        Ok(bytes_written)
    }

    /// Read data from the connected device with timeout
    pub async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize> {
        let io = self.io.as_mut().ok_or(SerialError::NotConnected)?;
        io.read_data(buffer, timeout_ms).await
    }
}

impl Default for SerialInterface {
    fn default() -> Self {
        Self::new()
    }
}

fn is_macos_dialin(port_name: &str) -> bool {
    port_name
        .rsplit('/')
        .next()
        .map(|name| name.to_lowercase().starts_with("tty."))
        .unwrap_or(false)
}

/// A port opened through the `serialport` crate.
struct NativePort {
    port: Box<dyn SerialPort>,
}

#[async_trait::async_trait]
impl SerialPortIO for NativePort {
    async fn send_data(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.port.write(data)?)
    }

    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize> {
        timeout(Duration::from_millis(timeout_ms), poll_read(self.port.as_mut(), buffer))
            .await
            .map_err(|_| SerialError::Timeout)?
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(self.port.flush()?)
    }
}

/// Wait until the driver reports pending bytes, then read them.
async fn poll_read(port: &mut dyn SerialPort, buffer: &mut [u8]) -> Result<usize> {
    loop {
        if port.bytes_to_read()? == 0 {
            tokio::time::sleep(Duration::from_millis(READ_POLL_MS)).await;
            continue;
        }
        match port.read(buffer) {
            Ok(bytes_read) => return Ok(bytes_read),
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(SerialError::IoError(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macos_dialin_detection() {
        assert!(is_macos_dialin("/dev/tty.usbserial-1420"));
        assert!(!is_macos_dialin("/dev/cu.usbserial-1420"));
        assert!(!is_macos_dialin("/dev/ttyUSB0"));
    }

    #[tokio::test]
    async fn test_io_requires_connection() {
        let mut interface = SerialInterface::new();
        assert!(!interface.is_connected());
        assert!(matches!(interface.send_data(b"x").await, Err(SerialError::NotConnected)));
        let mut buf = [0u8; 4];
        assert!(matches!(interface.read_data(&mut buf, 1).await, Err(SerialError::NotConnected)));
    }

    #[test]
    fn test_invalid_settings_rejected_before_open() {
        let mut interface = SerialInterface::new();
        let mut settings = PortSettings::new("/dev/does-not-matter");
        settings.stop_bits = super::super::StopBits::OneAndHalf;
        assert!(matches!(interface.connect(&settings), Err(SerialError::InvalidSetting(_))));
        assert!(!interface.is_connected());
    }
}
