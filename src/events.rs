use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Events emitted by the cart and checkout flow. Consumed in-process by a
/// logging task; the channel is the seam for future outbound delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded { cart_id: Uuid, product_id: Uuid },
    CartItemUpdated { cart_id: Uuid, product_id: Uuid },
    CartItemRemoved { cart_id: Uuid, product_id: Uuid },
    CartCleared(Uuid),
    CartsMerged { guest_cart_id: Uuid, customer_cart_id: Uuid },

    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Payment events
    PaymentCaptured(Uuid),
    PaymentFailed(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, failing if the channel is closed or full.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing. Used on paths where event
    /// delivery must never abort the surrounding operation.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event.clone()).await {
            warn!(?event, "Dropping event: {}", e);
        }
    }
}

/// Drains the event channel for the lifetime of the process.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = rx.recv().await {
        match &event {
            Event::PaymentCaptured(order_id) => {
                info!(%order_id, "Payment captured");
            }
            Event::PaymentFailed(order_id) => {
                warn!(%order_id, "Payment failed");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "Order status changed");
            }
            other => debug!(event = ?other, "Event processed"),
        }
    }
    info!("Event processor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);

        sender.send(Event::CartCreated(Uuid::new_v4())).await.unwrap();
        assert!(matches!(rx.recv().await, Some(Event::CartCreated(_))));
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        // Must not panic or error out.
        sender.send_or_log(Event::PaymentFailed(Uuid::new_v4())).await;
    }
}
