use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the order and payment services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled(Uuid),

    // Payment events
    PaymentCaptured {
        order_id: Uuid,
        transaction_id: String,
        amount: i64,
    },
    PaymentFailed {
        order_id: Uuid,
        payment_status: String,
    },
    PaymentRefunded {
        order_id: Uuid,
        refund_id: String,
        amount: i64,
    },

    // Inventory events
    StockDecremented {
        product_id: Uuid,
        quantity: i32,
    },
    StockRestored {
        product_id: Uuid,
        quantity: i32,
    },
    /// A paid order found less stock than it sold. The sale is honored and
    /// fulfillment resolves the shortfall manually.
    OversellDetected {
        order_id: Uuid,
        product_id: Uuid,
        requested: i32,
        available: i32,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event; delivery is best-effort and failures are reported to
    /// the caller for logging, never propagated as request errors.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel and logs each event. Downstream consumers
/// (notifications, digital delivery) subscribe here.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OversellDetected {
                order_id,
                product_id,
                requested,
                available,
            } => {
                warn!(
                    %order_id,
                    %product_id,
                    requested,
                    available,
                    "oversell detected at payment completion"
                );
            }
            other => info!(event = ?other, "event processed"),
        }
    }
    info!("event channel closed; processor exiting");
}
