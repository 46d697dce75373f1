//! Port abstraction for serial communication with a ROCC device.
//!
//! The session never talks to a concrete serial port. It consumes two halves:
//!
//! - a [`Port`], the write side plus lifecycle (name, baud rate, close)
//! - a [`PortReader`], the read side, obtained once per connection with
//!   [`Port::try_clone_reader`]
//!
//! ```text
//! +-------------------+        +-------------------+
//! |  Session          |        |  Line framer /    |
//! |  (commands)       |        |  raw reader       |
//! +---------+---------+        +---------+---------+
//!           | write                      | read_chunk
//!           v                            v
//! +---------+---------+        +---------+---------+
//! |   Port trait      |        | PortReader trait  |
//! +---------+---------+        +---------+---------+
//!           |                            |
//!           +------------+---------------+
//!                        v
//!              +---------+---------+
//!              | Native SerialPort |
//!              |   (serialport)    |
//!              +-------------------+
//! ```
//!
//! Reads are bounded by the port timeout so that a reader can notice a stop
//! request while the device is silent.

#[cfg(feature = "native")]
pub mod native;

use std::io::Write;
use std::time::Duration;

use crate::error::Result;

/// Default baud rate of ROCC devices.
pub const DEFAULT_BAUD: u32 = 9600;

/// Default read timeout. Also the upper bound on how long a stop request
/// waits for an in-flight read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate, fixed for the life of the connection.
    pub baud_rate: u32,
    /// Read timeout.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_READ_TIMEOUT,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// Serial port information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Outcome of a single chunk read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadChunk {
    /// `n` bytes were written to the front of the buffer. `n` may be zero;
    /// an empty chunk is not the end of the stream.
    Data(usize),
    /// The read timed out without data. The channel is still open.
    Idle,
    /// The channel has ended. No more data will arrive.
    Closed,
}

/// Read side of a serial channel.
///
/// Exactly one value of this type exists per connection. It is moved between
/// the line framer and raw readers, which is what makes a second concurrent
/// reader impossible.
pub trait PortReader: Send {
    /// Read the next chunk into `buf`.
    ///
    /// Must return within the port timeout when no data arrives.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadChunk>;
}

/// Write side and lifecycle of a serial channel.
pub trait Port: Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Get the baud rate.
    fn baud_rate(&self) -> u32;

    /// Create the read half for this channel.
    fn try_clone_reader(&self) -> Result<Box<dyn PortReader>>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O and
    /// outstanding readers observe [`ReadChunk::Closed`].
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }

    /// Write UTF-8 text.
    fn write_text(&mut self, text: &str) -> Result<()> {
        self.write_all_bytes(text.as_bytes())
    }
}

impl<P: Port + ?Sized> Port for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn baud_rate(&self) -> u32 {
        (**self).baud_rate()
    }

    fn try_clone_reader(&self) -> Result<Box<dyn PortReader>> {
        (**self).try_clone_reader()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
