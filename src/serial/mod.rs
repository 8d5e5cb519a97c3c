pub mod interface;
pub mod port_monitor;
pub mod reader;
pub mod transmission;

pub use interface::SerialInterface;
pub use reader::{LinkStats, SerialBuilder, SerialHandle, TransportEvent};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialDeviceInfo {
    pub port_name: String,
    /// Human readable name: USB product string when known, else the port name
    pub description: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl SerialDeviceInfo {
    /// Info for a port that was opened by name without being enumerated.
    pub fn from_name(port_name: &str) -> Self {
        Self {
            port_name: port_name.to_string(),
            description: port_name.to_string(),
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Communication timeout")]
    Timeout,

    #[error("Serial task is no longer running")]
    ChannelClosed,

    #[error("Unsupported port setting: {0}")]
    InvalidSetting(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;

/// Raw byte IO underneath a [`SerialInterface`].
///
/// Implemented for real ports and by in-memory scripted ports in tests.
#[async_trait::async_trait]
pub trait SerialPortIO: Send {
    /// Write `data`, returning how many bytes were accepted.
    async fn send_data(&mut self, data: &[u8]) -> Result<usize>;
    /// Read whatever is available into `buf`, waiting at most `timeout_ms`.
    ///
    /// Returns [`SerialError::Timeout`] when nothing arrived in time.
    async fn read_data(&mut self, buf: &mut [u8], timeout_ms: u64) -> Result<usize>;
    async fn flush(&mut self) -> Result<()>;
}

/// Baud rate restricted to the rates offered by the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct BaudRate(u32);

impl BaudRate {
    pub const SUPPORTED: [u32; 8] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

    pub fn new(rate: u32) -> Result<Self> {
        if Self::SUPPORTED.contains(&rate) {
            Ok(Self(rate))
        } else {
            Err(SerialError::InvalidSetting(format!("baud rate {}", rate)))
        }
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl Default for BaudRate {
    fn default() -> Self {
        Self(9600)
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = SerialError;

    fn try_from(rate: u32) -> Result<Self> {
        Self::new(rate)
    }
}

impl From<BaudRate> for u32 {
    fn from(rate: BaudRate) -> u32 {
        rate.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = SerialError;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            _ => Err(SerialError::InvalidSetting(format!("{} data bits", bits))),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> u8 {
        match bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopBits {
    #[default]
    #[serde(rename = "1")]
    One,
    #[serde(rename = "1.5")]
    OneAndHalf,
    #[serde(rename = "2")]
    Two,
}

impl StopBits {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1" => Some(StopBits::One),
            "1.5" => Some(StopBits::OneAndHalf),
            "2" => Some(StopBits::Two),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StopBits::One => "1",
            StopBits::OneAndHalf => "1.5",
            StopBits::Two => "2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
    Space,
    Mark,
}

impl Parity {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(Parity::None),
            "even" => Some(Parity::Even),
            "odd" => Some(Parity::Odd),
            "space" => Some(Parity::Space),
            "mark" => Some(Parity::Mark),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Parity::None => "none",
            Parity::Even => "even",
            Parity::Odd => "odd",
            Parity::Space => "space",
            Parity::Mark => "mark",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlowControl {
    #[default]
    None,
    RtsCts,
    XonXoff,
}

impl FlowControl {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(FlowControl::None),
            "rts-cts" | "rts/cts" | "hardware" => Some(FlowControl::RtsCts),
            "xon-xoff" | "xon/xoff" | "software" => Some(FlowControl::XonXoff),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowControl::None => "none",
            FlowControl::RtsCts => "rts-cts",
            FlowControl::XonXoff => "xon-xoff",
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::RtsCts => serialport::FlowControl::Hardware,
            FlowControl::XonXoff => serialport::FlowControl::Software,
        }
    }
}

/// Everything needed to open a port.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    #[serde(rename = "name", alias = "port_name")]
    pub port_name: String,
    pub baud_rate: BaudRate,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

impl PortSettings {
    pub fn new(port_name: &str) -> Self {
        Self { port_name: port_name.to_string(), ..Self::default() }
    }

    /// Stop bits as understood by the `serialport` backend.
    pub fn backend_stop_bits(&self) -> Result<serialport::StopBits> {
        match self.stop_bits {
            StopBits::One => Ok(serialport::StopBits::One),
            StopBits::Two => Ok(serialport::StopBits::Two),
            StopBits::OneAndHalf => Err(SerialError::InvalidSetting("1.5 stop bits".to_string())),
        }
    }

    /// Parity as understood by the `serialport` backend.
    pub fn backend_parity(&self) -> Result<serialport::Parity> {
        match self.parity {
            Parity::None => Ok(serialport::Parity::None),
            Parity::Even => Ok(serialport::Parity::Even),
            Parity::Odd => Ok(serialport::Parity::Odd),
            Parity::Space | Parity::Mark => {
                Err(SerialError::InvalidSetting(format!("{} parity", self.parity.as_str())))
            }
        }
    }
}
