use crate::roles::Role;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

const FEED_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    DayUpdated { day_key: String },
    EntryWritten { day_key: String, role: Role },
    AgreementsChanged,
    WeeklyCommentStored { week_key: String },
    /// The subscriber fell behind; reload everything.
    Resync,
}

impl ChangeEvent {
    pub fn day_key(&self) -> Option<&str> {
        match self {
            ChangeEvent::DayUpdated { day_key } | ChangeEvent::EntryWritten { day_key, .. } => {
                Some(day_key)
            }
            _ => None,
        }
    }
}

/// Fan-out of committed store writes.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
    next_id: Arc<AtomicU64>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn publish(&self, event: ChangeEvent) {
        // No subscribers is not an error.
        let delivered = self.sender.send(event).unwrap_or(0);
        debug!(delivered, "change published");
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Handle returned by [`ChangeFeed::subscribe`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the feed is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(skipped)) => {
                debug!(subscription = self.id, skipped, "subscriber lagged");
                Some(ChangeEvent::Resync)
            }
            Err(RecvError::Closed) => None,
        }
    }

    pub fn unsubscribe(self) {
        debug!(subscription = self.id, "unsubscribed");
    }
}
