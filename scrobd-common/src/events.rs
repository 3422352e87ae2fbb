//! Event types for the scrobd event system
//!
//! Provides the `ScrobbleEvent` enum and an `EventBus` for broadcasting
//! lifecycle events to SSE clients and background consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::media::MediaRef;

/// Scrobble lifecycle events
///
/// Events are broadcast via the EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScrobbleEvent {
    /// A new in-progress record was created
    ScrobbleStarted {
        scrobble_id: Uuid,
        media: MediaRef,
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// An existing record absorbed a progress/pause/resume event
    ScrobbleUpdated {
        scrobble_id: Uuid,
        media: MediaRef,
        user_id: Uuid,
        percent_played: u8,
        timestamp: DateTime<Utc>,
    },

    /// A record was finalized (stopped, beyond completion, or superseded)
    ScrobbleFinished {
        scrobble_id: Uuid,
        media: MediaRef,
        user_id: Uuid,
        played_to_completion: bool,
        timestamp: DateTime<Utc>,
    },

    /// A non-terminal record was hard-deleted by user action
    ScrobbleCancelled {
        scrobble_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// An import batch started processing
    ImportStarted {
        job_id: Uuid,
        source: String,
        timestamp: DateTime<Utc>,
    },

    /// An import batch finished; `created` counts new records
    ImportFinished {
        job_id: Uuid,
        source: String,
        created: usize,
        skipped: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`: non-blocking publish, multiple concurrent
/// subscribers, automatic cleanup when subscribers drop.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScrobbleEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ScrobbleEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns the subscriber count, or an error when nobody is listening.
    /// Emitting into an empty bus is not a fault; callers `.ok()` the result.
    pub fn emit(
        &self,
        event: ScrobbleEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<ScrobbleEvent>> {
        self.tx.send(event)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(ScrobbleEvent::ScrobbleCancelled {
            scrobble_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        })
        .unwrap();

        match rx.recv().await.unwrap() {
            ScrobbleEvent::ScrobbleCancelled { .. } => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn emit_without_subscribers_is_err_not_panic() {
        let bus = EventBus::new(4);
        let result = bus.emit(ScrobbleEvent::ScrobbleStarted {
            scrobble_id: Uuid::new_v4(),
            media: MediaRef::new(MediaKind::Track, Uuid::new_v4()),
            user_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
    }
}
