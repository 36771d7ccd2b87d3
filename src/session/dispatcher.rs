//! Stream dispatcher thread
//!
//! Owns the session socket and the sinks while streaming. Each iteration:
//!
//! 1. Check the cancellation token
//! 2. Receive one batch of lines (backlog first, then a bounded read)
//! 3. Parse each line and append samples to their channel's sink
//!
//! # Faults
//!
//! A `connection lost to device` notice, a peer close, a stream silent for
//! longer than the stall timeout, or a framing/network error moves the
//! session to `Faulted`. Sinks are flushed, then exactly one reconnect is
//! attempted on this thread (server connect, device connect, resubscribe,
//! `pause OFF`). On success streaming resumes; on failure the loop exits
//! and the session stays `Faulted` until the operator acts.
//!
//! Malformed lines never fault the stream: they are counted and dropped.

use super::state::{SessionState, SessionStatus};
use super::CancelToken;
use crate::config::ProtocolConfig;
use crate::control::{Link, Received};
use crate::error::{Error, Result};
use crate::protocol::{Device, Line, SubscriptionSet, parse_line};
use crate::sink::SinkRegistry;
use crate::transport::Connector;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything needed to rebuild a subscribed connection
#[derive(Clone)]
pub(crate) struct Recovery {
    pub connector: Arc<dyn Connector>,
    pub protocol: ProtocolConfig,
    pub device: Device,
    pub subscriptions: SubscriptionSet,
}

impl Recovery {
    /// Server connect, device connect + pause, resubscribe.
    ///
    /// Walks the state through `ServerConnected`, `DeviceConnected` and
    /// `Subscribed`; the caller owns the failure transition.
    pub fn establish(&self, status: &SessionStatus) -> Result<Link> {
        let mut link = Link::open(self.connector.as_ref(), &self.protocol)?;
        status.transition(SessionState::ServerConnected, None);

        link.attach_device(&self.device)?;
        status.transition(
            SessionState::DeviceConnected,
            Some(format!("device {}", self.device)),
        );

        let report = link.subscribe_all(&self.subscriptions);
        let reason = if report.is_complete() {
            None
        } else {
            Some(format!("partial subscription, rejected: {:?}", report.rejected))
        };
        status.transition(SessionState::Subscribed, reason);

        Ok(link)
    }
}

/// Why the dispatcher left its loop
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchExit {
    /// Stop was requested through the cancellation token
    Cancelled,
    /// A fault could not be recovered automatically
    Faulted(String),
}

/// Resources handed back to the session when the thread ends
pub(crate) struct DispatchReturn {
    pub link: Option<Link>,
    pub sinks: SinkRegistry,
    pub exit: DispatchExit,
}

/// Stream-ending conditions
enum Fault {
    DeviceLost,
    Closed,
    Stalled(Duration),
    Failed(Error),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::DeviceLost => f.write_str("connection lost to device"),
            Fault::Closed => f.write_str("stream ended by server"),
            Fault::Stalled(silence) => {
                write!(f, "no data for {} ms", silence.as_millis())
            }
            Fault::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// Receive loop state (runs on its own thread)
pub(crate) struct Dispatcher {
    link: Option<Link>,
    sinks: SinkRegistry,
    cancel: CancelToken,
    status: Arc<SessionStatus>,
    recovery: Recovery,
    stall_timeout: Duration,
    last_data: Instant,
}

impl Dispatcher {
    pub fn new(
        link: Link,
        sinks: SinkRegistry,
        cancel: CancelToken,
        status: Arc<SessionStatus>,
        recovery: Recovery,
    ) -> Self {
        let stall_timeout = recovery.protocol.stall_timeout();
        Self {
            link: Some(link),
            sinks,
            cancel,
            status,
            recovery,
            stall_timeout,
            last_data: Instant::now(),
        }
    }

    /// Run until cancelled or until a fault survives its reconnect attempt
    pub fn run(mut self) -> DispatchReturn {
        log::info!("Dispatcher started");
        self.last_data = Instant::now();

        let exit = loop {
            if self.cancel.is_cancelled() {
                log::debug!("Cancellation observed, exiting");
                break DispatchExit::Cancelled;
            }

            let fault = match self.step() {
                Ok(()) => continue,
                Err(fault) => fault,
            };

            let reason = fault.to_string();
            self.status
                .transition(SessionState::Faulted, Some(reason.clone()));
            // Rows reach disk before any reconnect attempt starts
            self.flush_sinks();

            if self.cancel.is_cancelled() {
                break DispatchExit::Faulted(reason);
            }

            if let Err(e) = self.reconnect() {
                let reason = format!("{}; reconnect failed: {}", reason, e);
                self.status
                    .transition(SessionState::Faulted, Some(reason.clone()));
                break DispatchExit::Faulted(reason);
            }
        };

        self.flush_sinks();
        log::info!("Dispatcher stopped: {:?}", exit);

        DispatchReturn {
            link: self.link,
            sinks: self.sinks,
            exit,
        }
    }

    fn step(&mut self) -> std::result::Result<(), Fault> {
        let Some(link) = self.link.as_mut() else {
            return Err(Fault::Closed);
        };

        match link.next_lines() {
            Ok(Received::Lines(lines)) => {
                self.last_data = Instant::now();
                for line in lines {
                    self.handle_line(&line)?;
                }
                Ok(())
            }
            Ok(Received::Idle) => {
                let silence = self.last_data.elapsed();
                if silence >= self.stall_timeout {
                    Err(Fault::Stalled(silence))
                } else {
                    Ok(())
                }
            }
            Ok(Received::Closed) => Err(Fault::Closed),
            Err(e) => Err(Fault::Failed(e)),
        }
    }

    fn handle_line(&mut self, line: &str) -> std::result::Result<(), Fault> {
        match parse_line(line) {
            Ok(Line::Sample(sample)) => {
                if !self.recovery.subscriptions.is_enabled(sample.channel) {
                    self.status.record_unsubscribed();
                    return Ok(());
                }
                match self.sinks.append(&sample) {
                    Ok(true) => self.status.record_sample(),
                    Ok(false) => log::trace!("No sink for {}", sample.channel),
                    Err(e) => log::error!("Failed to write {} row: {}", sample.channel, e),
                }
                Ok(())
            }
            Ok(Line::DeviceLost) => Err(Fault::DeviceLost),
            Ok(Line::Ack(text)) => {
                log::debug!("Ack while streaming: {}", text);
                Ok(())
            }
            Ok(Line::Other(text)) => {
                if !text.is_empty() {
                    log::debug!("Ignoring line: {}", text);
                }
                Ok(())
            }
            Err(e) => {
                self.status.record_malformed();
                log::warn!("Dropping line: {}", e);
                Ok(())
            }
        }
    }

    fn reconnect(&mut self) -> Result<()> {
        if let Some(old) = self.link.take() {
            old.close();
        }
        log::info!("Attempting automatic reconnect");

        let mut link = self.recovery.establish(&self.status)?;
        link.pause(false)?;

        self.link = Some(link);
        self.last_data = Instant::now();
        self.status.record_reconnect();
        self.status.transition(
            SessionState::Streaming,
            Some("stream resumed after reconnect".into()),
        );
        Ok(())
    }

    fn flush_sinks(&mut self) {
        if let Err(e) = self.sinks.flush_all() {
            log::error!("Sink flush failed: {}", e);
        }
    }
}
