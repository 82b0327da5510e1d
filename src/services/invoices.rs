use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::{order, order_item};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::sequences::SequenceAllocator;

/// Snapshot of an order handed to the renderer. Cancelled lines are kept so
/// the document can mark them distinctly.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceSnapshot {
    pub invoice_no: String,
    pub order_number: String,
    pub customer_name: String,
    pub address_line: String,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<InvoiceLine>,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub total_amount: Decimal,
    pub wallet_amount_applied: Decimal,
    pub payable_amount: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceLine {
    pub name: String,
    pub variant_name: Option<String>,
    pub price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
    pub is_cancelled: bool,
}

/// Reference to a bound invoice, recorded back on the order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRef {
    pub invoice_no: String,
    pub invoice_path: String,
}

/// Turns an invoice snapshot into a document on disk and returns its path.
/// PDF or other rich rendering plugs in here.
#[async_trait]
pub trait InvoiceRenderer: Send + Sync {
    async fn render(&self, snapshot: &InvoiceSnapshot) -> anyhow::Result<String>;
}

/// Plain-text renderer used when no richer renderer is wired in.
#[derive(Debug, Clone)]
pub struct TextInvoiceRenderer {
    output_dir: PathBuf,
}

impl TextInvoiceRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl InvoiceRenderer for TextInvoiceRenderer {
    async fn render(&self, snapshot: &InvoiceSnapshot) -> anyhow::Result<String> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let mut doc = String::new();
        doc.push_str(&format!("INVOICE {}\n", snapshot.invoice_no));
        doc.push_str(&format!("Order {}\n", snapshot.order_number));
        doc.push_str(&format!(
            "{}\n{}\n\n",
            snapshot.customer_name, snapshot.address_line
        ));
        for line in &snapshot.items {
            let marker = if line.is_cancelled { " [CANCELLED]" } else { "" };
            doc.push_str(&format!(
                "{}{} x{} @ {} = {}{}\n",
                line.name,
                line.variant_name
                    .as_deref()
                    .map(|v| format!(" ({v})"))
                    .unwrap_or_default(),
                line.quantity,
                line.price,
                line.line_total,
                marker
            ));
        }
        doc.push_str(&format!("\nSubtotal: {}\n", snapshot.subtotal));
        doc.push_str(&format!("Delivery fee: {}\n", snapshot.delivery_fee));
        doc.push_str(&format!("Total: {}\n", snapshot.total_amount));
        doc.push_str(&format!(
            "Wallet applied: {}\n",
            snapshot.wallet_amount_applied
        ));
        doc.push_str(&format!("Payable: {}\n", snapshot.payable_amount));

        let path = self.output_dir.join(format!("{}.txt", snapshot.invoice_no));
        tokio::fs::write(&path, doc).await?;
        Ok(path.to_string_lossy().into_owned())
    }
}

/// Binds rendered invoices to orders, outside the order transaction.
///
/// Invoice numbering draws from its own sequence scope, independent of the
/// order-number bucket. Re-invoking always allocates a fresh number and
/// renders a fresh file so later item edits are reflected; callers wanting
/// "download" semantics regenerate rather than reuse a stale path.
#[derive(Clone)]
pub struct InvoiceService {
    db: Arc<DatabaseConnection>,
    allocator: SequenceAllocator,
    renderer: Arc<dyn InvoiceRenderer>,
    prefix: Option<String>,
    event_sender: Option<Arc<EventSender>>,
}

impl InvoiceService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        allocator: SequenceAllocator,
        renderer: Arc<dyn InvoiceRenderer>,
        prefix: Option<String>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            allocator,
            renderer,
            prefix,
            event_sender,
        }
    }

    /// Generates a fresh invoice for the order and records the reference on
    /// it in a short transaction of its own.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn generate(&self, order_id: Uuid) -> Result<InvoiceRef, ServiceError> {
        let order_row = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        let now = Utc::now();

        // Number allocation and the order update share one short
        // transaction; rendering happens in between so a failed write to
        // disk rolls the number back rather than burning it.
        let txn = self.db.begin().await?;
        let invoice_no = self
            .allocator
            .next_invoice_number(&txn, now, self.prefix.as_deref())
            .await?;

        let snapshot = InvoiceSnapshot {
            invoice_no: invoice_no.clone(),
            order_number: order_row.order_number.clone(),
            customer_name: order_row.customer_name.clone(),
            address_line: order_row.address_line.clone(),
            generated_at: now,
            items: items
                .iter()
                .map(|i| InvoiceLine {
                    name: i.name.clone(),
                    variant_name: i.variant_name.clone(),
                    price: i.price,
                    quantity: i.quantity,
                    line_total: i.line_total,
                    is_cancelled: i.is_cancelled,
                })
                .collect(),
            subtotal: order_row.subtotal,
            delivery_fee: order_row.delivery_fee,
            total_amount: order_row.total_amount,
            wallet_amount_applied: order_row.wallet_amount_applied,
            payable_amount: order_row.payable_amount,
        };

        let invoice_path = self.renderer.render(&snapshot).await.map_err(|e| {
            warn!(error = %e, order_id = %order_id, "invoice rendering failed");
            ServiceError::InternalError(format!("invoice rendering failed: {e}"))
        })?;

        let mut active: order::ActiveModel = order_row.into();
        active.invoice_no = Set(Some(invoice_no.clone()));
        active.invoice_path = Set(Some(invoice_path.clone()));
        active.updated_at = Set(Some(now));
        active.update(&txn).await?;

        txn.commit().await?;

        info!(order_id = %order_id, invoice_no = %invoice_no, "invoice bound to order");
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender
                .send(Event::InvoiceGenerated {
                    order_id,
                    invoice_no: invoice_no.clone(),
                })
                .await
            {
                warn!(error = %e, "failed to send invoice event");
            }
        }

        Ok(InvoiceRef {
            invoice_no,
            invoice_path,
        })
    }
}
