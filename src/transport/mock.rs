//! Mock transport for testing
//!
//! `MockTransport` plays the server side of a connection from memory:
//! injected chunks are returned by `read` exactly as injected, and writes
//! that start with a registered command prefix queue the matching reply.
//! When nothing is queued a read sleeps briefly and reports a timeout, or
//! returns 0 once the mock was closed.

use super::{Connector, Transport};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Upper bound on the simulated read timeout so tests stay fast
const MAX_IDLE_SLEEP: Duration = Duration::from_millis(2);

/// Mock transport for unit testing
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    read_chunks: VecDeque<Vec<u8>>,
    write_buffer: Vec<u8>,
    replies: Vec<(String, Vec<u8>)>,
    read_timeout: Duration,
    closed: bool,
    fail_writes: bool,
    shut_down: bool,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                read_chunks: VecDeque::new(),
                write_buffer: Vec::new(),
                replies: Vec::new(),
                read_timeout: MAX_IDLE_SLEEP,
                closed: false,
                fail_writes: false,
                shut_down: false,
            })),
        }
    }

    /// Mock that acknowledges every command the session issues
    pub fn acking_server() -> Self {
        let mock = Self::new();
        mock.reply("device_list", "R device_list 1 | A02DE7 Empatica_E4\n");
        mock.reply("device_connect", "R device_connect OK\n");
        mock.reply("device_disconnect", "R device_disconnect OK\n");
        mock.reply("pause ON", "R pause ON OK\n");
        mock.reply("pause OFF", "R pause OFF OK\n");
        for stream in ["acc", "bvp", "gsr", "ibi", "tmp"] {
            mock.reply(
                &format!("device_subscribe {}", stream),
                &format!("R device_subscribe {} OK\n", stream),
            );
        }
        mock
    }

    /// Queue `response` whenever a write starts with `prefix`
    ///
    /// A later registration for the same prefix replaces the earlier one.
    pub fn reply(&self, prefix: &str, response: &str) {
        let mut inner = self.inner.lock();
        inner.replies.retain(|(p, _)| p != prefix);
        inner
            .replies
            .push((prefix.to_string(), response.as_bytes().to_vec()));
    }

    /// Stop replying to `prefix`
    pub fn silence(&self, prefix: &str) {
        self.inner.lock().replies.retain(|(p, _)| p != prefix);
    }

    /// Inject one chunk to be returned by a single read
    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().read_chunks.push_back(data.to_vec());
    }

    /// Signal peer close once queued chunks are drained
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    /// Make every subsequent write fail with a broken pipe
    pub fn fail_writes(&self) {
        self.inner.lock().fail_writes = true;
    }

    /// Get all written data
    pub fn get_written(&self) -> Vec<u8> {
        self.inner.lock().write_buffer.clone()
    }

    /// Written data as text
    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock().write_buffer).into_owned()
    }

    /// Number of times `command` (without terminator) was written
    pub fn count_written(&self, command: &str) -> usize {
        let needle = format!("{}\r\n", command);
        self.written_text().matches(needle.as_str()).count()
    }

    /// Clear written data
    pub fn clear_written(&self) {
        self.inner.lock().write_buffer.clear();
    }

    /// Whether `shutdown` was called
    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().shut_down
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let idle = {
            let mut inner = self.inner.lock();
            if let Some(mut chunk) = inner.read_chunks.pop_front() {
                let n = chunk.len().min(buffer.len());
                buffer[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    inner.read_chunks.push_front(chunk.split_off(n));
                }
                return Ok(n);
            }
            if inner.closed || inner.shut_down {
                return Ok(0);
            }
            inner.read_timeout.min(MAX_IDLE_SLEEP)
        };

        std::thread::sleep(idle);
        Err(Error::Timeout)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_writes || inner.shut_down {
            return Err(Error::Network(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }
        inner.write_buffer.extend_from_slice(data);

        let reply = inner
            .replies
            .iter()
            .find(|(prefix, _)| data.starts_with(prefix.as_bytes()))
            .map(|(_, reply)| reply.clone());
        if let Some(reply) = reply {
            inner.read_chunks.push_back(reply);
        }
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.inner.lock().read_timeout = timeout;
        Ok(())
    }

    fn shutdown(&mut self) {
        self.inner.lock().shut_down = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands out pre-built mock transports in order
///
/// Once the queue is empty every connect attempt is refused.
#[derive(Clone, Default)]
pub struct MockConnector {
    queue: Arc<Mutex<VecDeque<MockTransport>>>,
    attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transport for the next successful connect
    pub fn push(&self, transport: MockTransport) {
        self.queue.lock().push_back(transport);
    }

    /// Total connect attempts, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn connect(&self) -> Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.queue.lock().pop_front() {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(Error::Network(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "mock server unavailable",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_on_matching_write() {
        let mock = MockTransport::new();
        mock.reply("pause ON", "R pause ON OK\n");
        let mut transport = mock.clone();

        transport.write_all(b"pause ON\r\n").unwrap();
        let mut buf = [0u8; 32];
        let n = transport.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"R pause ON OK\n");
        assert_eq!(mock.get_written(), b"pause ON\r\n".to_vec());
        assert_eq!(mock.count_written("pause ON"), 1);
    }

    #[test]
    fn test_chunks_preserved_and_split_by_buffer() {
        let mut mock = MockTransport::new();
        mock.inject_read(b"abcdef");
        mock.inject_read(b"gh");

        let mut buf = [0u8; 4];
        assert_eq!(mock.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(mock.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(mock.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"gh");
        assert!(matches!(mock.read(&mut buf), Err(Error::Timeout)));

        mock.close();
        assert_eq!(mock.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_connector_refuses_when_empty() {
        let connector = MockConnector::new();
        connector.push(MockTransport::new());
        assert!(connector.connect().is_ok());
        assert!(matches!(connector.connect(), Err(Error::Network(_))));
        assert_eq!(connector.attempts(), 2);
    }
}
