//! Capture session: control operations plus the streaming dispatcher
//!
//! [`Session`] is driven from one operator thread. While streaming, the
//! socket and the sinks move into the dispatcher thread; they come back
//! when the dispatcher is stopped or gives up after a fault.

pub mod state;
mod dispatcher;

pub use dispatcher::DispatchExit;
pub use state::{SessionEvent, SessionState, SessionStats, SessionStatus};

use crate::config::ProtocolConfig;
use crate::control::{Link, SubscribeReport};
use crate::error::{Error, Result};
use crate::protocol::{Device, SubscriptionSet};
use crate::sink::SinkRegistry;
use crate::transport::Connector;
use crossbeam_channel::Receiver;
use dispatcher::{DispatchReturn, Dispatcher, Recovery};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// Cooperative stop flag observed by the dispatcher between reads
///
/// A stop requested while nothing is streaming stays pending:
/// `start_streaming` refuses to start until the session clears it, which
/// happens when a running dispatcher is stopped and joined, or through
/// [`reset`](Self::reset).
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Withdraw a pending stop request
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One capture session against one streaming server
pub struct Session {
    protocol: ProtocolConfig,
    connector: Arc<dyn Connector>,
    status: Arc<SessionStatus>,
    cancel: CancelToken,
    link: Option<Link>,
    device: Option<Device>,
    devices: Vec<Device>,
    subscriptions: SubscriptionSet,
    sinks: Option<SinkRegistry>,
    dispatcher: Option<JoinHandle<DispatchReturn>>,
}

impl Session {
    pub fn new(protocol: ProtocolConfig, connector: Arc<dyn Connector>, sinks: SinkRegistry) -> Self {
        Self {
            protocol,
            connector,
            status: Arc::new(SessionStatus::new()),
            cancel: CancelToken::new(),
            link: None,
            device: None,
            devices: Vec::new(),
            subscriptions: SubscriptionSet::new(),
            sinks: Some(sinks),
            dispatcher: None,
        }
    }

    // =========================================================================
    // Observation
    // =========================================================================

    pub fn current_state(&self) -> SessionState {
        self.status.state()
    }

    /// Last failure reason or status note
    pub fn diagnostic(&self) -> Option<String> {
        self.status.diagnostic()
    }

    pub fn stats(&self) -> SessionStats {
        self.status.stats()
    }

    /// State change notifications (lossy when not drained)
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.status.events()
    }

    /// Token that stops the dispatcher; safe to trigger from a signal handler
    ///
    /// Cancelling before streaming starts makes the next `start_streaming`
    /// fail instead of being forgotten.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Devices reported by the last `list_devices`
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Connected device, if any
    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    pub fn subscriptions(&self) -> &SubscriptionSet {
        &self.subscriptions
    }

    /// True once the dispatcher thread has exited on its own
    pub fn dispatcher_finished(&self) -> bool {
        self.dispatcher
            .as_ref()
            .is_some_and(|handle| handle.is_finished())
    }

    /// Swap in a new set of sinks; only while the dispatcher is not running
    pub fn set_sinks(&mut self, sinks: SinkRegistry) -> Result<()> {
        if self.dispatcher.is_some() {
            return Err(Error::InvalidState {
                operation: "set_sinks",
                state: self.current_state(),
            });
        }
        self.sinks = Some(sinks);
        Ok(())
    }

    // =========================================================================
    // Control operations
    // =========================================================================

    /// Open the TCP connection to the streaming server
    pub fn connect_server(&mut self) -> Result<()> {
        self.require("connect_server", &[SessionState::Idle])?;
        let link = Link::open(self.connector.as_ref(), &self.protocol)
            .map_err(|e| self.fail(e))?;
        self.link = Some(link);
        self.status.transition(SessionState::ServerConnected, None);
        Ok(())
    }

    /// Ask the server which wristbands it can see
    pub fn list_devices(&mut self) -> Result<Vec<Device>> {
        self.require(
            "list_devices",
            &[
                SessionState::ServerConnected,
                SessionState::DeviceConnected,
                SessionState::Subscribed,
            ],
        )?;
        let devices = self.link_mut("list_devices")?.list_devices();
        let devices = devices.map_err(|e| self.fail(e))?;
        self.devices = devices.clone();
        Ok(devices)
    }

    /// Connect a wristband by id and pause its stream
    pub fn connect_device(&mut self, id: &str) -> Result<()> {
        self.require("connect_device", &[SessionState::ServerConnected])?;
        let device = Device::new(id);
        let attached = self.link_mut("connect_device")?.attach_device(&device);
        attached.map_err(|e| self.fail(e))?;

        self.status
            .transition(SessionState::DeviceConnected, Some(format!("device {}", device)));
        self.device = Some(device);
        Ok(())
    }

    /// Subscribe the server streams backing `subscriptions`
    ///
    /// Streams the server rejects are reported, not fatal; the session
    /// moves to `Subscribed` either way.
    pub fn configure_subscriptions(
        &mut self,
        subscriptions: SubscriptionSet,
    ) -> Result<SubscribeReport> {
        self.require("configure_subscriptions", &[SessionState::DeviceConnected])?;
        if subscriptions.is_empty() {
            return Err(self.fail(Error::Config("no channels enabled".into())));
        }

        let report = self
            .link_mut("configure_subscriptions")?
            .subscribe_all(&subscriptions);
        self.subscriptions = subscriptions;

        let reason = if report.is_complete() {
            None
        } else {
            Some(format!(
                "partial subscription, rejected: {}",
                report
                    .rejected
                    .iter()
                    .map(|(stream, _)| *stream)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        };
        self.status.transition(SessionState::Subscribed, reason);
        Ok(report)
    }

    /// Write headers, resume the stream and hand the socket to the dispatcher
    pub fn start_streaming(&mut self) -> Result<()> {
        self.require("start_streaming", &[SessionState::Subscribed])?;
        if self.cancel.is_cancelled() {
            return Err(self.fail(Error::Other(
                "stop requested before streaming started".into(),
            )));
        }
        let device = self
            .device
            .clone()
            .ok_or_else(|| Error::Other("no device connected".into()))?;
        let mut sinks = self
            .sinks
            .take()
            .ok_or_else(|| Error::Other("sinks unavailable".into()))?;

        if let Err(e) = sinks.write_headers(&self.subscriptions) {
            self.sinks = Some(sinks);
            return Err(self.fail(e));
        }

        let mut link = match self.link.take() {
            Some(link) => link,
            None => {
                self.sinks = Some(sinks);
                return Err(Error::Other("no server connection".into()));
            }
        };
        if let Err(e) = link.pause(false) {
            self.link = Some(link);
            self.sinks = Some(sinks);
            return Err(self.fail(e));
        }

        let recovery = Recovery {
            connector: Arc::clone(&self.connector),
            protocol: self.protocol.clone(),
            device,
            subscriptions: self.subscriptions.clone(),
        };
        let dispatcher = Dispatcher::new(
            link,
            sinks,
            self.cancel.clone(),
            Arc::clone(&self.status),
            recovery,
        );

        self.status.transition(SessionState::Streaming, None);
        let handle = thread::Builder::new()
            .name("e4-dispatch".into())
            .spawn(move || dispatcher.run())
            .map_err(|e| {
                let reason = format!("failed to spawn dispatcher: {}", e);
                self.status
                    .transition(SessionState::Faulted, Some(reason.clone()));
                Error::Other(reason)
            })?;
        self.dispatcher = Some(handle);
        Ok(())
    }

    /// Stop the dispatcher and pause the stream; no-op when not streaming
    ///
    /// A session that faulted stays `Faulted`; otherwise it returns to
    /// `Subscribed`.
    pub fn stop_streaming(&mut self) -> Result<()> {
        if self.dispatcher.is_none() {
            log::debug!("stop_streaming: dispatcher not running");
            return Ok(());
        }
        let exit = self.halt_dispatcher()?;

        if exit == DispatchExit::Cancelled
            && let Some(link) = self.link.as_mut()
        {
            if let Err(e) = link.pause(true) {
                log::warn!("Failed to pause stream: {}", e);
            }
            self.status
                .transition(SessionState::Subscribed, Some("streaming stopped".into()));
        }
        Ok(())
    }

    /// Rebuild the connection after a fault the dispatcher could not clear
    pub fn recover(&mut self) -> Result<()> {
        self.require("recover", &[SessionState::Faulted])?;
        if self.dispatcher.is_some() {
            if !self.dispatcher_finished() {
                return Err(Error::InvalidState {
                    operation: "recover",
                    state: SessionState::Faulted,
                });
            }
            self.halt_dispatcher()?;
        }

        let device = self
            .device
            .clone()
            .ok_or_else(|| Error::Other("no device to recover".into()))?;
        if let Some(old) = self.link.take() {
            old.close();
        }

        let recovery = Recovery {
            connector: Arc::clone(&self.connector),
            protocol: self.protocol.clone(),
            device,
            subscriptions: self.subscriptions.clone(),
        };
        match recovery.establish(&self.status) {
            Ok(link) => {
                self.link = Some(link);
                self.status.record_reconnect();
                Ok(())
            }
            Err(e) => {
                self.status.transition(
                    SessionState::Faulted,
                    Some(format!("recovery failed: {}", e)),
                );
                Err(e)
            }
        }
    }

    /// Leave the server from any state
    ///
    /// Stops streaming, sends a best-effort `device_disconnect` when a
    /// connection exists and closes the socket. Calling it again is a no-op
    /// apart from the state report.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.dispatcher.is_some()
            && let Err(e) = self.halt_dispatcher()
        {
            log::warn!("Dispatcher did not stop cleanly: {}", e);
        }
        if let Some(link) = self.link.take() {
            link.disconnect();
        }
        self.device = None;
        self.status
            .transition(SessionState::Idle, Some("disconnected".into()));
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Cancel and join the dispatcher, taking back the link and sinks
    fn halt_dispatcher(&mut self) -> Result<DispatchExit> {
        let Some(handle) = self.dispatcher.take() else {
            return Ok(DispatchExit::Cancelled);
        };
        self.cancel.cancel();

        let returned = handle.join().map_err(|_| {
            let reason = "dispatcher thread panicked".to_string();
            self.status
                .transition(SessionState::Faulted, Some(reason.clone()));
            Error::Other(reason)
        })?;
        // The stop has been served; a later start must not see it
        self.cancel.reset();

        self.link = returned.link;
        self.sinks = Some(returned.sinks);
        Ok(returned.exit)
    }

    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        let state = self.current_state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            let err = Error::InvalidState { operation, state };
            log::warn!("{}", err);
            Err(err)
        }
    }

    fn link_mut(&mut self, operation: &'static str) -> Result<&mut Link> {
        self.link
            .as_mut()
            .ok_or_else(|| Error::control(operation, "no server connection"))
    }

    /// Record a failed operation's reason and hand the error back
    fn fail(&self, err: Error) -> Error {
        self.status.note(err.to_string());
        log::error!("{}", err);
        err
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.take() {
            self.cancel.cancel();
            let _ = handle.join();
        }
    }
}
