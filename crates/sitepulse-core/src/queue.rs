//! Durable delivery queue.
//!
//! Holds already-encoded payload strings that have not been acknowledged,
//! persisted as a JSON array through the storage layer. Entries are removed
//! only on a successful (or assumed-successful) transmission, so stale data
//! from a previous page load is retried at the start of the next one.

use tracing::{debug, warn};

use crate::config::PENDING_DATA_KEY;
use crate::storage::StorageLayer;

/// Persisted list of not-yet-acknowledged encoded payloads.
pub struct DeliveryQueue {
    entries: Vec<String>,
    expiry_secs: u64,
}

impl DeliveryQueue {
    /// Create an empty queue that has not touched storage yet.
    #[must_use]
    pub fn new(expiry_secs: u64) -> Self {
        Self {
            entries: Vec::new(),
            expiry_secs,
        }
    }

    /// Load the queue from storage.
    ///
    /// A corrupt persisted list is an unrecoverable loss of the queue's
    /// contents for this load: it is logged and treated as empty, with no
    /// partial salvage.
    pub fn load(storage: &StorageLayer, expiry_secs: u64) -> Self {
        let entries = match storage.get(PENDING_DATA_KEY, false) {
            Some(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(list) => list,
                Err(e) => {
                    warn!(error = %e, "pending queue corrupt, dropping contents");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        Self {
            entries,
            expiry_secs,
        }
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Append an encoded payload unless an equal string is already queued.
    pub fn enqueue(&mut self, storage: &mut StorageLayer, encoded: String) {
        if self.entries.iter().any(|e| *e == encoded) {
            return;
        }
        self.entries.push(encoded);
        self.persist(storage);
        debug!(pending = self.entries.len(), "payload queued for retry");
    }

    /// Attempt delivery of every pending entry.
    ///
    /// Each entry is passed to `send`; successes are removed, failures stay
    /// in place for the next drain. The persisted list is rewritten once
    /// after the pass.
    pub fn drain<F>(&mut self, storage: &mut StorageLayer, mut send: F)
    where
        F: FnMut(&str) -> bool,
    {
        if self.entries.is_empty() {
            return;
        }
        debug!(pending = self.entries.len(), "draining pending queue");
        self.entries.retain(|encoded| !send(encoded));
        self.persist(storage);
    }

    fn persist(&self, storage: &mut StorageLayer) {
        match serde_json::to_string(&self.entries) {
            Ok(raw) => storage.set(PENDING_DATA_KEY, &raw, self.expiry_secs),
            Err(e) => warn!(error = %e, "failed to encode pending queue"),
        }
    }
}
