//! In-memory sink
//!
//! Rows land in a shared buffer that a [`MemoryRows`] handle can inspect
//! from another thread while the dispatcher owns the sink.

use super::SampleSink;
use crate::error::Result;
use crate::protocol::Field;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct Store {
    header: Option<Vec<String>>,
    header_count: usize,
    rows: Vec<Vec<Field>>,
    flushes: usize,
}

/// Sink that keeps every row in memory
#[derive(Default)]
pub struct MemorySink {
    store: Arc<Mutex<Store>>,
}

/// Read handle onto a [`MemorySink`]
#[derive(Clone)]
pub struct MemoryRows {
    store: Arc<Mutex<Store>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for reading rows after the sink has been moved away
    pub fn rows(&self) -> MemoryRows {
        MemoryRows {
            store: Arc::clone(&self.store),
        }
    }
}

impl SampleSink for MemorySink {
    fn write_header(&mut self, columns: &[&str]) -> Result<()> {
        let mut store = self.store.lock();
        store.header = Some(columns.iter().map(|c| c.to_string()).collect());
        store.header_count += 1;
        Ok(())
    }

    fn append(&mut self, row: &[Field]) -> Result<()> {
        self.store.lock().rows.push(row.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.store.lock().flushes += 1;
        Ok(())
    }
}

impl MemoryRows {
    pub fn header(&self) -> Option<Vec<String>> {
        self.store.lock().header.clone()
    }

    pub fn header_count(&self) -> usize {
        self.store.lock().header_count
    }

    pub fn len(&self) -> usize {
        self.store.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Vec<Field>> {
        self.store.lock().rows.clone()
    }

    /// Rows rendered the way the CSV sink writes them
    pub fn text_rows(&self) -> Vec<String> {
        self.store
            .lock()
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect()
    }

    pub fn flush_count(&self) -> usize {
        self.store.lock().flushes
    }
}
