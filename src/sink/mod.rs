//! Per-channel row writers
//!
//! The session core only ever appends rows; creating and closing the
//! underlying files belongs to whoever builds the [`SinkRegistry`].

use crate::error::{Error, Result};
use crate::protocol::{ChannelKind, Field, Sample, SubscriptionSet};
use std::collections::{BTreeMap, BTreeSet};

mod csv;
mod memory;
pub use csv::{CsvSink, open_csv_sinks};
pub use memory::{MemorySink, MemoryRows};

/// Append-only row destination for one channel
pub trait SampleSink: Send {
    /// Write the column header; called at most once per sink
    fn write_header(&mut self, columns: &[&str]) -> Result<()>;

    /// Append one row
    fn append(&mut self, row: &[Field]) -> Result<()>;

    /// Push buffered rows to durable storage
    fn flush(&mut self) -> Result<()>;
}

/// ChannelKind -> sink mapping owned by the front end
///
/// Moves into the dispatcher thread while streaming and back out when the
/// dispatcher exits; only one thread ever writes to it.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: BTreeMap<ChannelKind, Box<dyn SampleSink>>,
    headers_written: BTreeSet<ChannelKind>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the sink for a channel
    pub fn insert(&mut self, channel: ChannelKind, sink: Box<dyn SampleSink>) {
        self.headers_written.remove(&channel);
        self.sinks.insert(channel, sink);
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, channel: ChannelKind, sink: impl SampleSink + 'static) -> Self {
        self.insert(channel, Box::new(sink));
        self
    }

    pub fn contains(&self, channel: ChannelKind) -> bool {
        self.sinks.contains_key(&channel)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Write the header of every subscribed channel that has a sink and has
    /// not been given one yet
    pub fn write_headers(&mut self, subscriptions: &SubscriptionSet) -> Result<()> {
        for channel in subscriptions.channels() {
            if self.headers_written.contains(&channel) {
                continue;
            }
            if let Some(sink) = self.sinks.get_mut(&channel) {
                sink.write_header(channel.columns())?;
                self.headers_written.insert(channel);
                log::debug!("Header written for {}", channel);
            } else {
                log::warn!("{} subscribed but no sink registered; rows will be dropped", channel);
            }
        }
        Ok(())
    }

    /// Append a row to a channel's sink
    pub fn append_row(&mut self, channel: ChannelKind, row: &[Field]) -> Result<bool> {
        match self.sinks.get_mut(&channel) {
            Some(sink) => {
                sink.append(row)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Route a sample to its channel's sink; `Ok(false)` when none is registered
    pub fn append(&mut self, sample: &Sample) -> Result<bool> {
        self.append_row(sample.channel, &sample.row())
    }

    /// Flush every sink, reporting the first failure after trying them all
    pub fn flush_all(&mut self) -> Result<()> {
        let mut first_err: Option<Error> = None;
        for (channel, sink) in self.sinks.iter_mut() {
            if let Err(e) = sink.flush() {
                log::error!("Flush failed for {}: {}", channel, e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
