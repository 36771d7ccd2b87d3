//! NadiIO - Capture client for the E4 wristband streaming server
//!
//! Connects to the streaming server over TCP, attaches one wristband,
//! subscribes its physiological channels and records every sample to a
//! per-channel sink.
//!
//! ## Layers
//!
//! - [`transport`]: byte transport (TCP, in-memory mock)
//! - [`protocol`]: line framing, sample parsing, command encoding
//! - [`control`]: request/response over one connection
//! - [`session`]: state machine and the streaming dispatcher thread
//! - [`sink`]: row writers (CSV files, in-memory)

pub mod config;
pub mod control;
pub mod error;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use control::SubscribeReport;
pub use error::{Error, Result};
pub use protocol::{ChannelKind, Device, Field, Sample, SubscriptionSet};
pub use session::{CancelToken, Session, SessionEvent, SessionState, SessionStats};
pub use sink::{SampleSink, SinkRegistry};
