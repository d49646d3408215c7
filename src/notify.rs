use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Channel names the engine publishes on.
pub const BOOKINGS_CHANNEL: &str = "bookings";
pub const TABLES_CHANNEL: &str = "tables";

/// A lifecycle notification: event name (`booking:confirmed`, `table:updated`,
/// ...) plus the full updated entity as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub event: &'static str,
    pub payload: serde_json::Value,
}

/// Broadcast hub standing in for the notification gateway. Handed to the
/// engine at construction; delivery is fire-and-forget and never fails a
/// booking operation.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Notice>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a channel. Creates the channel if needed.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish `entity` on `channel`. No-op if nobody is listening; a full
    /// or closed channel is logged and ignored.
    pub fn send<T: Serialize>(&self, channel: &str, event: &'static str, entity: &T) {
        let Some(sender) = self.channels.get(channel) else {
            return;
        };
        let payload = match serde_json::to_value(entity) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("notify: failed to encode {event}: {e}");
                return;
            }
        };
        if sender.send(Notice { event, payload }).is_err() {
            tracing::debug!("notify: no live subscribers for {event}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TableStatus;
    use ulid::Ulid;

    fn table() -> impl Serialize {
        serde_json::json!({
            "id": Ulid::new().to_string(),
            "name": "T1",
            "status": TableStatus::Available.as_str(),
        })
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(TABLES_CHANNEL);

        hub.send(TABLES_CHANNEL, "table:updated", &table());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event, "table:updated");
        assert_eq!(received.payload["name"], "T1");
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber — should not panic
        hub.send(BOOKINGS_CHANNEL, "booking:new", &table());
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let hub = NotifyHub::new();
        let mut bookings = hub.subscribe(BOOKINGS_CHANNEL);
        let _tables = hub.subscribe(TABLES_CHANNEL);

        hub.send(TABLES_CHANNEL, "table:updated", &table());
        hub.send(BOOKINGS_CHANNEL, "booking:new", &table());

        // The bookings subscriber only sees the bookings event
        let got = bookings.recv().await.unwrap();
        assert_eq!(got.event, "booking:new");
        assert!(bookings.try_recv().is_err());
    }
}
