//! Events emitted by the index after each committed mutation.

use std::sync::Mutex;

use crate::model::{PathInfo, TxRecord};

/// Something that happened to the index. Events are delivered strictly after
/// the batch that caused them was committed, in commit order.
#[derive(Debug, Clone)]
pub enum Event {
    /// A transaction was inserted.
    Tx { record: TxRecord, path_info: PathInfo },
    /// A transaction gained a block.
    Confirmed { record: TxRecord, path_info: PathInfo },
    /// A transaction lost its block after a reorganization.
    Unconfirmed { record: TxRecord, path_info: PathInfo },
    /// A transaction lost a double-spend arbitration and was removed.
    Conflict { record: TxRecord, path_info: PathInfo },
    /// A transaction was removed.
    RemoveTx { record: TxRecord, path_info: PathInfo },
    /// The queue of pending `add` operations became empty.
    Drain,
}

/// Receiver seam for [`Event`]s. The outer wallet implements this to fan
/// events out to its own subscribers.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Sink that discards every event.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Sink that keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Default::default()
    }

    /// Drain the collected events.
    pub fn take(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(_) => Vec::new(),
        }
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
