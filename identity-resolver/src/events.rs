//! Domain events for downstream consumers (exports, reporting).
//!
//! Publishing is decoupled from resolution: events go onto a bounded
//! channel, and a full or closed channel is logged and counted but never
//! turns a resolution into a failure.

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::metrics_consts::EVENTS_PUBLISHED_COUNTER;
use crate::types::CanonicalId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum LiveBookEvent {
    ProfileCreated {
        id: CanonicalId,
        source: String,
    },
    ProfileUpdated {
        id: CanonicalId,
        source: String,
        reason: String,
    },
    OfferCreated {
        offer_id: String,
        profile_id: Option<CanonicalId>,
        scope: String,
    },
    OfferDeduplicated {
        offer_id: String,
        matched_offer_id: String,
        scope: String,
    },
}

impl LiveBookEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LiveBookEvent::ProfileCreated { .. } => "profile_created",
            LiveBookEvent::ProfileUpdated { .. } => "profile_updated",
            LiveBookEvent::OfferCreated { .. } => "offer_created",
            LiveBookEvent::OfferDeduplicated { .. } => "offer_deduplicated",
        }
    }
}

/// Fire-and-forget event sink.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: LiveBookEvent);
}

/// Publisher writing to a bounded channel.
#[derive(Clone)]
pub struct ChannelEventPublisher {
    sender: mpsc::Sender<LiveBookEvent>,
}

impl ChannelEventPublisher {
    /// Creates the publisher and the receiving end consumers drain.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<LiveBookEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl EventPublisher for ChannelEventPublisher {
    fn publish(&self, event: LiveBookEvent) {
        let name = event.name();
        match self.sender.try_send(event) {
            Ok(()) => {
                metrics::counter!(EVENTS_PUBLISHED_COUNTER, "event" => name, "status" => "success")
                    .increment(1);
            }
            Err(TrySendError::Full(event)) => {
                metrics::counter!(EVENTS_PUBLISHED_COUNTER, "event" => name, "status" => "failure")
                    .increment(1);
                tracing::warn!(?event, "event channel full, dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                metrics::counter!(EVENTS_PUBLISHED_COUNTER, "event" => name, "status" => "failure")
                    .increment(1);
                tracing::warn!(?event, "event channel closed, dropping event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created() -> LiveBookEvent {
        LiveBookEvent::ProfileCreated {
            id: CanonicalId::generate(),
            source: "loyalty".to_string(),
        }
    }

    #[tokio::test]
    async fn test_published_events_reach_receiver() {
        let (publisher, mut receiver) = ChannelEventPublisher::bounded(4);
        let event = created();
        publisher.publish(event.clone());
        assert_eq!(receiver.recv().await, Some(event));
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_failing() {
        let (publisher, mut receiver) = ChannelEventPublisher::bounded(1);
        let first = created();
        publisher.publish(first.clone());
        publisher.publish(created());

        assert_eq!(receiver.recv().await, Some(first));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_closed_channel_does_not_panic() {
        let (publisher, receiver) = ChannelEventPublisher::bounded(1);
        drop(receiver);
        publisher.publish(created());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = LiveBookEvent::OfferDeduplicated {
            offer_id: "o-2".to_string(),
            matched_offer_id: "o-1".to_string(),
            scope: "top_up".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "OfferDeduplicated");
        assert_eq!(json["matched_offer_id"], "o-1");
    }
}
