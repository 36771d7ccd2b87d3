//! TCP transport implementation

use super::{Connector, Transport};
use crate::error::{Error, Result};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// TCP transport for the local streaming server
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect with timeout
    ///
    /// # Arguments
    /// * `addr` - Server address (e.g., "127.0.0.1:28000")
    /// * `timeout` - Upper bound on the TCP handshake
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let sock_addrs: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("Invalid address {}: {}", addr, e)))?
            .collect();

        let mut last_err = None;
        for sock_addr in sock_addrs {
            match TcpStream::connect_timeout(&sock_addr, timeout) {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        log::warn!("Failed to set TCP_NODELAY: {}", e);
                    }
                    log::info!("Connected to streaming server at {}", sock_addr);
                    return Ok(Self::from_stream(stream));
                }
                Err(e) => {
                    log::debug!("Connect to {} failed: {}", sock_addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => Error::Network(e),
            None => Error::Config(format!("Address {} resolved to nothing", addr)),
        })
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.stream.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(Error::Timeout),
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(Error::Timeout),
            Err(e) if e.kind() == ErrorKind::Interrupted => Err(Error::Timeout),
            Err(e) => Err(Error::Network(e)),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        // A zero duration is rejected by std; clamp to 1ms
        let timeout = timeout.max(Duration::from_millis(1));
        self.stream.set_read_timeout(Some(timeout))?;
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            log::debug!("Socket shutdown: {}", e);
        }
    }
}

/// Connector dialing `host:port` over TCP
pub struct TcpConnector {
    address: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> Result<Box<dyn Transport>> {
        log::info!("Connecting to server {}", self.address);
        let transport = TcpTransport::connect(&self.address, self.connect_timeout)?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_roundtrip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let n = sock.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"device_list\r\n");
            sock.write_all(b"R device_list 0\n").unwrap();
        });

        let mut transport = TcpConnector::new(addr, Duration::from_secs(1))
            .connect()
            .unwrap();
        transport.set_read_timeout(Duration::from_secs(2)).unwrap();
        transport.write_all(b"device_list\r\n").unwrap();

        let mut buf = [0u8; 64];
        let n = transport.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"R device_list 0\n");

        server.join().unwrap();
        // Peer closed after replying
        assert_eq!(transport.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_read_timeout_maps_to_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut transport = TcpTransport::connect(&addr, Duration::from_secs(1)).unwrap();
        let _held = listener.accept().unwrap();

        transport.set_read_timeout(Duration::from_millis(20)).unwrap();
        let mut buf = [0u8; 16];
        assert!(matches!(transport.read(&mut buf), Err(Error::Timeout)));
    }

    #[test]
    fn test_connect_refused_is_network_error() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let result = TcpTransport::connect(&addr, Duration::from_millis(200));
        assert!(matches!(result, Err(Error::Network(_))));
    }
}
