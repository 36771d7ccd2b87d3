//! Session state shared between the operator thread and the dispatcher
//!
//! # State Machine
//!
//! ```text
//!  Idle ──connect──▶ ServerConnected ──device──▶ DeviceConnected
//!   ▲                      ▲                           │
//!   │                      │ reconnect                 │ subscribe
//!   │ disconnect           │ (one attempt)             ▼
//!   │ (from any)       Faulted ◀──fault──── Streaming ◀──start── Subscribed
//!   │                                           │                   ▲
//!   └───────────────────────────────────────────┴──────stop─────────┘
//! ```
//!
//! Only the owner of the session (operator side) and the dispatcher thread
//! write the state; both go through [`SessionStatus::transition`] so every
//! change is logged and published as a [`SessionEvent`].

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Capacity of the event queue; events are dropped when nobody drains it
const EVENT_QUEUE_CAPACITY: usize = 64;

/// Lifecycle state of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    ServerConnected,
    DeviceConnected,
    Subscribed,
    Streaming,
    Faulted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "Idle",
            SessionState::ServerConnected => "ServerConnected",
            SessionState::DeviceConnected => "DeviceConnected",
            SessionState::Subscribed => "Subscribed",
            SessionState::Streaming => "Streaming",
            SessionState::Faulted => "Faulted",
        };
        f.write_str(name)
    }
}

/// Notification published on every state change
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
        reason: Option<String>,
    },
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Rows handed to sinks
    pub samples_written: u64,
    /// Tagged lines dropped because they failed to parse
    pub malformed_lines: u64,
    /// Samples of channels that are not subscribed (IBI/HR sibling)
    pub unsubscribed_dropped: u64,
    /// Successful automatic reconnects
    pub reconnects: u64,
}

struct StatusInner {
    state: SessionState,
    diagnostic: Option<String>,
}

/// Thread-safe state cell, counters and event fan-out
pub struct SessionStatus {
    inner: Mutex<StatusInner>,
    samples_written: AtomicU64,
    malformed_lines: AtomicU64,
    unsubscribed_dropped: AtomicU64,
    reconnects: AtomicU64,
    event_tx: Sender<SessionEvent>,
    event_rx: Receiver<SessionEvent>,
}

impl SessionStatus {
    pub fn new() -> Self {
        let (event_tx, event_rx) = bounded(EVENT_QUEUE_CAPACITY);
        Self {
            inner: Mutex::new(StatusInner {
                state: SessionState::Idle,
                diagnostic: None,
            }),
            samples_written: AtomicU64::new(0),
            malformed_lines: AtomicU64::new(0),
            unsubscribed_dropped: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            event_tx,
            event_rx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Last human-readable diagnostic (failure reason or status note)
    pub fn diagnostic(&self) -> Option<String> {
        self.inner.lock().diagnostic.clone()
    }

    /// Record a diagnostic without changing state
    pub fn note(&self, diagnostic: impl Into<String>) {
        self.inner.lock().diagnostic = Some(diagnostic.into());
    }

    /// Move to `to`, logging and publishing the change
    pub fn transition(&self, to: SessionState, reason: Option<String>) {
        let from = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            inner.state = to;
            if let Some(reason) = &reason {
                inner.diagnostic = Some(reason.clone());
            }
            from
        };

        if from == to {
            return;
        }

        match &reason {
            Some(reason) if to == SessionState::Faulted => {
                log::warn!("state {} -> {} ({})", from, to, reason)
            }
            Some(reason) => log::info!("state {} -> {} ({})", from, to, reason),
            None => log::info!("state {} -> {}", from, to),
        }

        let event = SessionEvent::StateChanged { from, to, reason };
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => log::debug!("Event queue full, dropping state event"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Receiver for state events; clones share one queue
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.event_rx.clone()
    }

    pub(crate) fn record_sample(&self) {
        self.samples_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unsubscribed(&self) {
        self.unsubscribed_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            samples_written: self.samples_written.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            unsubscribed_dropped: self.unsubscribed_dropped.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_publishes_event() {
        let status = SessionStatus::new();
        let events = status.events();

        status.transition(SessionState::ServerConnected, None);
        status.transition(SessionState::Faulted, Some("device lost".into()));

        assert_eq!(status.state(), SessionState::Faulted);
        assert_eq!(status.diagnostic().as_deref(), Some("device lost"));
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::StateChanged {
                from: SessionState::Idle,
                to: SessionState::ServerConnected,
                reason: None,
            }
        );
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::StateChanged {
                to: SessionState::Faulted,
                ..
            }
        ));
    }

    #[test]
    fn test_same_state_is_silent() {
        let status = SessionStatus::new();
        let events = status.events();
        status.transition(SessionState::Idle, None);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_does_not_block() {
        let status = SessionStatus::new();
        for i in 0..(EVENT_QUEUE_CAPACITY * 2) {
            let to = if i % 2 == 0 {
                SessionState::ServerConnected
            } else {
                SessionState::Idle
            };
            status.transition(to, None);
        }
        assert_eq!(status.events().len(), EVENT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_counters() {
        let status = SessionStatus::new();
        status.record_sample();
        status.record_sample();
        status.record_malformed();
        let stats = status.stats();
        assert_eq!(stats.samples_written, 2);
        assert_eq!(stats.malformed_lines, 1);
        assert_eq!(stats.reconnects, 0);
    }
}
