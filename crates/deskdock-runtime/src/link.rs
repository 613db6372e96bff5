//! Link abstraction
//!
//! A link is one duplex byte stream split into independently owned halves. Both halves
//! are blocking; [`SharedChannel`](crate::channel::SharedChannel) runs every call on the
//! blocking pool. [`DeviceProvider`] locates and opens links so the connection manager
//! can be driven by a real serial port or by the in-memory device of the `testing`
//! feature.

use deskdock_core::{SerialConfig, TransportError};
use std::io;

// ----------------------------------------------------------------------------
// Link Halves
// ----------------------------------------------------------------------------

/// Inbound half of a link
pub trait LinkReader: Send {
    /// Read whatever is available into `buf`, blocking at most the port's read timeout.
    ///
    /// Returns `Ok(0)` when nothing arrived; a timed-out read is not an error.
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Number of bytes that can be read without blocking
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Drop everything buffered on the inbound side
    fn discard_input(&mut self) -> io::Result<()>;
}

/// Outbound half of a link
pub trait LinkWriter: Send {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn flush_output(&mut self) -> io::Result<()>;
}

/// An opened device
pub struct LinkPair {
    pub port: String,
    pub reader: Box<dyn LinkReader>,
    pub writer: Box<dyn LinkWriter>,
}

impl std::fmt::Debug for LinkPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkPair").field("port", &self.port).finish()
    }
}

// ----------------------------------------------------------------------------
// Device Provider
// ----------------------------------------------------------------------------

/// Locates and opens the peripheral
pub trait DeviceProvider: Send + Sync {
    /// Port name of the first device with the given USB ids, if one is attached
    fn discover(&self, vendor_id: u16, product_id: u16) -> Result<Option<String>, TransportError>;

    /// Open `port` with the configured line settings
    fn open(&self, port: &str, config: &SerialConfig) -> Result<LinkPair, TransportError>;
}

/// Whether an I/O error only means "no data yet"
pub(crate) fn is_idle_read(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
