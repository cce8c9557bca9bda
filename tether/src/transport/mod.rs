//! Raw byte channels to the device.
//!
//! A [`Transport`] only moves bytes: pacing, pattern matching and
//! cancellation live in [`Connection`](crate::Connection).

#[cfg(unix)]
mod serial;
mod tcp;

use std::io;
use std::time::Instant;

#[cfg(unix)]
pub use serial::SerialPort;
pub use tcp::TcpPort;

use crate::error::{Error, Result};

/// URL scheme selecting [`TcpPort`].
pub const SOCKET_SCHEME: &str = "socket://";

/// A half-duplex byte channel with deadline-bounded reads.
pub trait Transport {
    /// Writes all of `data`, blocking until it has been handed to the channel.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Reads until `max_bytes` bytes have arrived or `deadline` passes.
    ///
    /// Never returns more than `max_bytes`. A deadline already in the past
    /// performs one non-blocking poll. An empty result means nothing arrived.
    fn read_deadline(&mut self, max_bytes: usize, deadline: Instant) -> io::Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write(data)
    }

    fn read_deadline(&mut self, max_bytes: usize, deadline: Instant) -> io::Result<Vec<u8>> {
        (**self).read_deadline(max_bytes, deadline)
    }
}

/// Opens a transport from a port URL.
///
/// `socket://host:port` connects over TCP (serial-over-network bridges);
/// anything else is treated as a serial device path configured for `baud`.
pub fn open(url: &str, baud: u32) -> Result<Box<dyn Transport + Send>> {
    if let Some(addr) = url.strip_prefix(SOCKET_SCHEME) {
        return Ok(Box::new(TcpPort::connect(addr)?));
    }
    open_serial(url, baud)
}

#[cfg(unix)]
fn open_serial(path: &str, baud: u32) -> Result<Box<dyn Transport + Send>> {
    Ok(Box::new(SerialPort::open(path, baud)?))
}

#[cfg(not(unix))]
fn open_serial(path: &str, _baud: u32) -> Result<Box<dyn Transport + Send>> {
    Err(Error::Config(format!(
        "serial devices are only supported on unix hosts: {path}"
    )))
}
