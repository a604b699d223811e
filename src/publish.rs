//! Event publication
//!
//! Fan-out of detections, port statuses, and traffic snapshots over
//! per-topic broadcast channels. Delivery is best effort: publishing
//! with no subscribers is a no-op and lagging subscribers miss messages
//! rather than applying backpressure to the detection path.

use tokio::sync::broadcast;

use crate::models::{Detection, PortStatus, Snapshot};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct Publisher {
    detections_tx: broadcast::Sender<Detection>,
    port_status_tx: broadcast::Sender<PortStatus>,
    snapshots_tx: broadcast::Sender<Snapshot>,
}

impl Publisher {
    pub fn new(capacity: usize) -> Self {
        let (detections_tx, _) = broadcast::channel(capacity);
        let (port_status_tx, _) = broadcast::channel(capacity);
        let (snapshots_tx, _) = broadcast::channel(capacity);
        Self {
            detections_tx,
            port_status_tx,
            snapshots_tx,
        }
    }

    pub fn subscribe_detections(&self) -> broadcast::Receiver<Detection> {
        self.detections_tx.subscribe()
    }

    pub fn subscribe_port_status(&self) -> broadcast::Receiver<PortStatus> {
        self.port_status_tx.subscribe()
    }

    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<Snapshot> {
        self.snapshots_tx.subscribe()
    }

    pub fn publish_detection(&self, detection: Detection) {
        // Err just means nobody is listening
        let _ = self.detections_tx.send(detection);
    }

    pub fn publish_port_status(&self, status: PortStatus) {
        let _ = self.port_status_tx.send(status);
    }

    pub fn publish_snapshot(&self, snapshot: Snapshot) {
        let _ = self.snapshots_tx.send(snapshot);
    }

    pub fn detection_subscribers(&self) -> usize {
        self.detections_tx.receiver_count()
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
