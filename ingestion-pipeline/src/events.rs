use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use common::storage::types::pending_ingest::DuplicateReason;

/// Default per-user channel depth; a slow consumer loses oldest events
/// first, which the at-most-once contract permits.
const CHANNEL_CAPACITY: usize = 64;

/// The closed import event set, emitted per user in upload order.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ImportEvent {
    Progress {
        upload_id: String,
        stage: String,
    },
    Completed {
        upload_id: String,
        work_id: String,
        edition_id: String,
    },
    Skipped {
        upload_id: String,
        reason: String,
    },
    Duplicate {
        upload_id: String,
        pending_id: String,
        reason: DuplicateReason,
    },
    Failed {
        upload_id: String,
        message: String,
    },
    EnrichmentStarted {
        upload_id: String,
        work_id: String,
    },
    EnrichmentCompleted {
        upload_id: String,
        work_id: String,
        improvement_count: usize,
    },
    EnrichmentFailed {
        upload_id: String,
        work_id: String,
        message: String,
    },
}

/// Per-user broadcast fan-out for import events.
///
/// Delivery is at-most-once: events emitted with no subscriber, or past a
/// lagging subscriber's buffer, are dropped.
pub struct EventBroker {
    channels: Mutex<HashMap<String, broadcast::Sender<ImportEvent>>>,
    capacity: usize,
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroker {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: CHANNEL_CAPACITY,
        }
    }

    pub fn subscribe(&self, user_id: &str) -> broadcast::Receiver<ImportEvent> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn emit(&self, user_id: &str, event: ImportEvent) {
        let sender = {
            let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
            channels.get(user_id).cloned()
        };
        match sender {
            Some(sender) => {
                // A send error only means nobody is listening right now.
                let receivers = sender.send(event).unwrap_or(0);
                debug!(user_id, receivers, "import event emitted");
            }
            None => debug!(user_id, "import event dropped; no subscribers"),
        }
    }
}
