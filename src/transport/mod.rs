//! Transport layer for I/O abstraction

use crate::error::Result;
use std::time::Duration;

mod mock;
mod tcp;
pub use mock::{MockConnector, MockTransport};
pub use tcp::{TcpConnector, TcpTransport};

/// Byte transport to the streaming server
pub trait Transport: Send {
    /// Read data into buffer, returns number of bytes read
    ///
    /// `Ok(0)` means the peer closed the connection. A read that hits the
    /// configured read timeout returns `Err(Error::Timeout)`.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write the whole buffer
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Bound every subsequent `read` call
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Close both directions (best-effort)
    fn shutdown(&mut self);
}

/// Opens fresh transports; used for the initial connect and for reconnects
pub trait Connector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Transport>>;
}
