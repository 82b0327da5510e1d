pub mod orders;
pub mod wallet;

use axum::{routing::get, routing::post, routing::put, Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::audit::{AuditSink, TracingAuditSink};
use crate::services::invoices::{InvoiceService, TextInvoiceRenderer};
use crate::services::orders::OrderService;
use crate::services::sequences::SequenceAllocator;
use crate::services::stock::StockLedgerService;
use crate::services::wallet::WalletService;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub wallet: Arc<WalletService>,
    pub stock: Arc<StockLedgerService>,
    pub invoices: Arc<InvoiceService>,
}

impl AppServices {
    /// Wires the service graph onto one connection pool.
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, config: &AppConfig) -> Self {
        let allocator = SequenceAllocator::new(config.sequence_retry_budget);
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
        let renderer = Arc::new(TextInvoiceRenderer::new(config.invoice_output_dir.clone()));

        let invoices = Arc::new(InvoiceService::new(
            db_pool.clone(),
            allocator,
            renderer,
            config.invoice_prefix.clone(),
            Some(event_sender.clone()),
        ));
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            Some(event_sender.clone()),
            allocator,
            audit,
            invoices.clone(),
        ));
        let wallet = Arc::new(WalletService::new(
            db_pool.clone(),
            Some(event_sender.clone()),
        ));
        let stock = Arc::new(StockLedgerService::new(db_pool));

        Self {
            orders,
            wallet,
            stock,
            invoices,
        }
    }
}

/// Builds the application router over the exposed operations.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/orders", post(orders::create_order).get(orders::list_orders))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/items", post(orders::add_item))
        .route(
            "/orders/:id/items/:item_id/quantity",
            put(orders::update_item_quantity),
        )
        .route(
            "/orders/:id/items/:item_id/cancellation",
            put(orders::toggle_item_cancellation),
        )
        .route("/orders/:id/mark-paid", post(orders::mark_paid))
        .route("/orders/:id/payment-status", put(orders::update_payment_status))
        .route("/orders/:id/invoice", post(orders::regenerate_invoice))
        .route("/wallet/:member_id/credit", post(wallet::credit))
        .route("/wallet/:member_id/debit", post(wallet::debit))
        .route("/wallet/:member_id/balance", get(wallet::balance))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
