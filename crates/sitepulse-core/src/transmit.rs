//! Payload transmission.
//!
//! One encoded payload goes out through one of two paths: a non-blocking,
//! teardown-surviving beacon whenever the host exposes it, otherwise a
//! blocking keepalive request. `true` from a send means "accepted for
//! delivery", not "confirmed stored". Anything else hands the payload to
//! the delivery queue for a later drain.

use tracing::{debug, warn};

use crate::envelope::request_body;
use crate::host::TransportBackend;
use crate::queue::DeliveryQueue;
use crate::storage::StorageLayer;

/// Sends encoded payloads to the collector tracking endpoint.
pub struct Transmitter {
    transport: Box<dyn TransportBackend>,
    track_url: String,
}

impl Transmitter {
    /// Build a transmitter over the injected transport.
    pub fn new(transport: Box<dyn TransportBackend>, track_url: String) -> Self {
        Self {
            transport,
            track_url,
        }
    }

    /// Send a freshly encoded payload, queueing it on failure.
    ///
    /// Beacon path first when available: `true` only means the host queued
    /// the transmission. Blocking path otherwise: `true` means the collector
    /// answered with a success status.
    pub fn send(
        &self,
        encoded: &str,
        queue: &mut DeliveryQueue,
        storage: &mut StorageLayer,
    ) -> bool {
        let body = request_body(encoded);

        if self.transport.supports_beacon() {
            if self.transport.beacon(&self.track_url, &body) {
                debug!("payload handed to beacon");
                return true;
            }
            warn!("beacon rejected payload, queueing");
            queue.enqueue(storage, encoded.to_string());
            return false;
        }

        match self.transport.post(&self.track_url, &body) {
            Ok(true) => true,
            Ok(false) => {
                warn!("collector rejected payload, queueing");
                queue.enqueue(storage, encoded.to_string());
                false
            }
            Err(e) => {
                warn!(error = %e, "send failed, queueing");
                queue.enqueue(storage, encoded.to_string());
                false
            }
        }
    }

    /// Replay one previously queued entry.
    ///
    /// Replays always use the blocking path and never re-queue: a failed
    /// entry simply stays where it is for the next drain.
    pub fn replay(&self, encoded: &str) -> bool {
        let body = request_body(encoded);
        match self.transport.post(&self.track_url, &body) {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %e, "replay failed");
                false
            }
        }
    }

    /// The transport behind this transmitter.
    pub fn transport(&self) -> &dyn TransportBackend {
        self.transport.as_ref()
    }
}
