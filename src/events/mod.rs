use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Buffer size used when wiring the default event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a connected sender/receiver pair with the default capacity.
pub fn channel() -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    (EventSender::new(tx), rx)
}

// The events that can occur in the settlement core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderItemAdded {
        order_id: Uuid,
        item_id: Uuid,
    },
    OrderItemQuantityChanged {
        order_id: Uuid,
        item_id: Uuid,
        old_quantity: i32,
        new_quantity: i32,
    },
    OrderItemCancellationToggled {
        order_id: Uuid,
        item_id: Uuid,
        is_cancelled: bool,
    },
    OrderPaymentStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Wallet events
    WalletDebited {
        member_id: Uuid,
        amount: Decimal,
        reference: Option<String>,
    },
    WalletCredited {
        member_id: Uuid,
        amount: Decimal,
        reference: Option<String>,
    },

    // Stock events
    StockIssued {
        product_id: Uuid,
        variant_id: Uuid,
        depot_id: Uuid,
        quantity: i32,
        order_id: Option<Uuid>,
    },
    StockReceived {
        product_id: Uuid,
        variant_id: Uuid,
        depot_id: Uuid,
        quantity: i32,
    },

    // Invoice events
    InvoiceGenerated {
        order_id: Uuid,
        invoice_no: String,
    },
}

/// Drains the event channel, logging each event.
///
/// Downstream consumers (notifications, projections) hang off this loop;
/// the bundled implementation only records the stream.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = receiver.recv().await {
        debug!(?event, "event received");
    }
    info!("Event processor stopped");
}
