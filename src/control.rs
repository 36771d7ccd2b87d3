//! Control channel over the streaming socket
//!
//! A [`Link`] owns one connection: the transport, its [`LineFramer`] and a
//! backlog of framed lines that arrived while a control response was being
//! awaited. The server is free to interleave data lines with a response
//! (right after `pause OFF` it starts streaming immediately), so anything
//! that is not the awaited response is kept in order for the dispatcher.
//!
//! # Command lifecycle
//!
//! ```text
//! send "<command>\r\n"
//!   └─ read until a line answering the command or response_timeout
//!        ├─ last token starts with OK  → success
//!        └─ anything else / no line   → Error::Control { operation, .. }
//! ```
//!
//! A line answers a command when it echoes it (`R <command> ...`). Answers
//! to other commands are late replies to an earlier command that already
//! timed out; they are logged and discarded.

use crate::config::ProtocolConfig;
use crate::error::{Error, Result};
use crate::protocol::{Command, Device, LineFramer, SubscriptionSet, is_ack, parse_device_list};
use crate::transport::{Connector, Transport};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Response wait used for best-effort teardown commands
const TEARDOWN_TIMEOUT: Duration = Duration::from_millis(500);

/// Result of one receive on the link
#[derive(Debug, PartialEq)]
pub enum Received {
    /// Complete lines, in arrival order (may be empty for a partial read)
    Lines(Vec<String>),
    /// Read timeout elapsed with no bytes
    Idle,
    /// Peer closed the connection
    Closed,
}

/// Outcome of subscribing a set of channels
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SubscribeReport {
    /// Streams the server acknowledged
    pub accepted: Vec<&'static str>,
    /// Streams that failed, with the reason
    pub rejected: Vec<(&'static str, String)>,
}

impl SubscribeReport {
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// One framed connection to the streaming server
pub struct Link {
    transport: Box<dyn Transport>,
    framer: LineFramer,
    backlog: VecDeque<String>,
    read_buffer: Vec<u8>,
    response_timeout: Duration,
    /// Framing error held back until the lines framed before it are consumed
    pending_error: Option<Error>,
}

impl Link {
    /// Wrap a connected transport
    pub fn new(mut transport: Box<dyn Transport>, config: &ProtocolConfig) -> Result<Self> {
        transport.set_read_timeout(config.read_timeout())?;
        Ok(Self {
            transport,
            framer: LineFramer::new(config.max_line_len),
            backlog: VecDeque::new(),
            read_buffer: vec![0u8; config.buffer_size.max(1)],
            response_timeout: config.response_timeout(),
            pending_error: None,
        })
    }

    /// Open a fresh connection through `connector`
    pub fn open(connector: &dyn Connector, config: &ProtocolConfig) -> Result<Self> {
        let transport = connector.connect()?;
        Self::new(transport, config)
    }

    // =========================================================================
    // Control operations
    // =========================================================================

    /// `device_list`: any response counts as success
    pub fn list_devices(&mut self) -> Result<Vec<Device>> {
        let response = self.request(&Command::DeviceList)?;
        let devices = parse_device_list(&response);
        log::info!(
            "Devices available: {}",
            if devices.is_empty() {
                "none".to_string()
            } else {
                devices
                    .iter()
                    .map(|d| d.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        );
        Ok(devices)
    }

    /// `device_connect <id>`: requires an OK acknowledgement
    pub fn connect_device(&mut self, device: &Device) -> Result<()> {
        log::info!("Connecting to device {}", device);
        self.request_ack(&Command::DeviceConnect(device.id.clone()))
    }

    /// `pause ON|OFF`: any response counts as success
    pub fn pause(&mut self, on: bool) -> Result<()> {
        let response = self.request(&Command::Pause(on))?;
        if !is_ack(&response) {
            log::debug!("pause {} answered without OK: {}", on, response);
        }
        Ok(())
    }

    /// `device_subscribe <stream> ON`: requires an OK acknowledgement
    pub fn subscribe(&mut self, stream: &'static str) -> Result<()> {
        self.request_ack(&Command::Subscribe(stream))
    }

    /// Connect the wristband and pause its stream
    pub fn attach_device(&mut self, device: &Device) -> Result<()> {
        self.connect_device(device)?;
        self.pause(true)
    }

    /// Subscribe every stream needed by `subscriptions`
    ///
    /// Per-stream failures are logged and reported, never returned as an
    /// error: a partially subscribed session is still usable.
    pub fn subscribe_all(&mut self, subscriptions: &SubscriptionSet) -> SubscribeReport {
        let mut report = SubscribeReport::default();
        for stream in subscriptions.streams() {
            log::info!("Starting {} stream", stream);
            match self.subscribe(stream) {
                Ok(()) => report.accepted.push(stream),
                Err(e) => {
                    log::warn!("Subscription to {} failed: {}", stream, e);
                    report.rejected.push((stream, e.to_string()));
                }
            }
        }
        report
    }

    /// Best-effort `device_disconnect` followed by socket shutdown
    ///
    /// Failures are logged and swallowed: the socket is going away anyway.
    pub fn disconnect(mut self) {
        log::info!("Disconnecting from device");
        self.response_timeout = self.response_timeout.min(TEARDOWN_TIMEOUT);
        match self.request(&Command::DeviceDisconnect) {
            Ok(response) => log::debug!("device_disconnect: {}", response),
            Err(e) => log::debug!("device_disconnect ignored: {}", e),
        }
        self.close();
    }

    /// Shut the socket down without any command
    pub fn close(mut self) {
        self.transport.shutdown();
    }

    // =========================================================================
    // Request / response
    // =========================================================================

    /// Send a command without waiting for its response
    pub fn send(&mut self, command: &Command) -> Result<()> {
        log::debug!("> {}", command);
        self.transport
            .write_all(&command.to_wire())
            .map_err(|e| Error::control(command.name(), e.to_string()))
    }

    /// Send a command and wait for its single response line
    pub fn request(&mut self, command: &Command) -> Result<String> {
        self.send(command)?;
        let response = self.read_response(command)?;
        log::debug!("< {}", response);
        Ok(response)
    }

    /// Send a command and require an OK acknowledgement
    pub fn request_ack(&mut self, command: &Command) -> Result<()> {
        let response = self.request(command)?;
        if is_ack(&response) {
            Ok(())
        } else {
            Err(Error::control(command.name(), response))
        }
    }

    fn read_response(&mut self, command: &Command) -> Result<String> {
        let operation = command.name();
        let deadline = Instant::now() + self.response_timeout;

        loop {
            match self.receive() {
                Ok(Received::Lines(lines)) => {
                    let mut response = None;
                    for line in lines {
                        if response.is_none() && command.is_reply(&line) {
                            response = Some(line);
                        } else if line.starts_with("R ") {
                            log::debug!("Discarding late reply: {}", line);
                        } else {
                            self.backlog.push_back(line);
                        }
                    }
                    if let Some(response) = response {
                        return Ok(response);
                    }
                }
                Ok(Received::Idle) => {}
                Ok(Received::Closed) => {
                    return Err(Error::control(operation, "connection closed by server"));
                }
                Err(Error::Protocol(reason)) => return Err(Error::Protocol(reason)),
                Err(e) => return Err(Error::control(operation, e.to_string())),
            }

            if Instant::now() >= deadline {
                return Err(Error::control(
                    operation,
                    format!(
                        "no response within {} ms",
                        self.response_timeout.as_millis()
                    ),
                ));
            }
        }
    }

    // =========================================================================
    // Streaming receive
    // =========================================================================

    /// Next batch of lines for the dispatcher: backlog first, then one read
    pub fn next_lines(&mut self) -> Result<Received> {
        if !self.backlog.is_empty() {
            return Ok(Received::Lines(self.backlog.drain(..).collect()));
        }
        self.receive()
    }

    /// One socket read pushed through the framer
    ///
    /// A framing error is raised only once the lines completed before it
    /// have been handed out.
    fn receive(&mut self) -> Result<Received> {
        if let Some(e) = self.pending_error.take() {
            return Err(e);
        }
        match self.transport.read(&mut self.read_buffer) {
            Ok(0) => Ok(Received::Closed),
            Ok(n) => {
                log::trace!("Read {} bytes", n);
                let framed = self.framer.push(&self.read_buffer[..n]);
                match framed.overflow {
                    None => Ok(Received::Lines(framed.lines)),
                    Some(e) if framed.lines.is_empty() => Err(e),
                    Some(e) => {
                        self.pending_error = Some(e);
                        Ok(Received::Lines(framed.lines))
                    }
                }
            }
            Err(Error::Timeout) => Ok(Received::Idle),
            Err(e) => Err(e),
        }
    }

    /// Lines framed but not yet handed out
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }
}
