use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, LoaderTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::entities::depot::{self, Entity as DepotEntity};
use crate::entities::depot_product_variant::{self, Entity as VariantEntity};
use crate::entities::order::{self, Entity as OrderEntity, PaymentStatus};
use crate::entities::order_item::{self, Entity as OrderItemEntity};
use crate::entities::product::Entity as ProductEntity;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::audit::{record_best_effort, AuditEntry, AuditSink};
use crate::services::invoices::{InvoiceRef, InvoiceService};
use crate::services::sequences::SequenceAllocator;
use crate::services::stock::{issue_stock, StockMovement};
use crate::services::wallet::{apply_debit, WalletMovement};

/// Divergence allowed between a client-submitted total and the
/// server-recomputed one; guards against float/rounding noise, not
/// deliberate tampering beyond that.
const AMOUNT_TOLERANCE: Decimal = dec!(1);

/// Workflow tags written into the stock ledger.
const STOCK_MODULE_CREATE: &str = "order";
const STOCK_MODULE_EDIT: &str = "order-edit";

/// Request/Response types for the order service
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CustomerDetails {
    #[validate(length(min = 1, message = "Customer name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Customer mobile is required"))]
    pub mobile: String,
    pub email: Option<String>,
    #[validate(length(min = 1, message = "Delivery address is required"))]
    pub address_line: String,
    pub city: Option<String>,
    pub pincode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub variant_name: Option<String>,
    pub price: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate]
    pub customer: CustomerDetails,
    pub items: Vec<NewOrderItem>,
    pub depot_id: Option<Uuid>,
    pub member_id: Option<Uuid>,
    #[serde(default)]
    pub delivery_fee: Decimal,
    /// Prepaid wallet amount the customer wants applied.
    #[serde(default)]
    pub wallet_amount: Decimal,
    /// Client-computed grand total, cross-checked against the
    /// server-side recomputation when present.
    pub client_total: Option<Decimal>,
    pub acting_user: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddItemRequest {
    pub product_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    /// Display name; resolved from the variant/product when omitted.
    pub name: Option<String>,
    pub variant_name: Option<String>,
    /// Unit price; resolved from the variant/product when omitted.
    pub price: Option<Decimal>,
    pub quantity: i32,
    pub acting_user: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkPaidRequest {
    pub payment_mode: Option<String>,
    pub payment_reference: Option<String>,
    pub payment_date: Option<DateTime<Utc>>,
    pub acting_user: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub variant_name: Option<String>,
    pub price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
    pub is_cancelled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub customer_name: String,
    pub customer_mobile: String,
    pub customer_email: Option<String>,
    pub address_line: String,
    pub city: Option<String>,
    pub pincode: Option<String>,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub total_amount: Decimal,
    pub wallet_amount_applied: Decimal,
    pub payable_amount: Decimal,
    pub payment_status: PaymentStatus,
    pub payment_mode: Option<String>,
    pub payment_reference: Option<String>,
    pub payment_date: Option<DateTime<Utc>>,
    pub depot_id: Option<Uuid>,
    pub member_id: Option<Uuid>,
    pub invoice_no: Option<String>,
    pub invoice_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItemResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrderResponse {
    pub order: OrderResponse,
    /// Bound invoice when post-commit generation succeeded.
    pub invoice: Option<InvoiceRef>,
    /// Soft-failure flag: the order committed but invoicing did not.
    pub invoice_error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Owns the order/line-item lifecycle and orchestrates sequence
/// allocation, stock issue, and wallet application inside one transaction
/// per operation.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
    allocator: SequenceAllocator,
    audit: Arc<dyn AuditSink>,
    invoices: Arc<InvoiceService>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Option<Arc<EventSender>>,
        allocator: SequenceAllocator,
        audit: Arc<dyn AuditSink>,
        invoices: Arc<InvoiceService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            allocator,
            audit,
            invoices,
        }
    }

    /// Creates an order at checkout.
    ///
    /// Order, items, wallet debit, and stock issues commit together;
    /// per-item stock problems (missing variant, bad reference) are logged
    /// and skipped so they never abort the order, while wallet and
    /// sequence failures roll the whole transaction back. Invoice
    /// generation runs after commit and only ever sets the soft-failure
    /// flag on the response.
    #[instrument(skip(self, request), fields(member_id = ?request.member_id))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        if request.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "an order needs at least one item".to_string(),
            ));
        }
        for item in &request.items {
            validate_item_fields(&item.name, item.price, item.quantity)?;
        }
        if request.delivery_fee < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "delivery fee cannot be negative".to_string(),
            ));
        }
        if request.wallet_amount < Decimal::ZERO {
            return Err(ServiceError::InvalidAmount(format!(
                "wallet amount cannot be negative, got {}",
                request.wallet_amount
            )));
        }

        // The client's arithmetic is advisory: totals are recomputed here
        // and only cross-checked against the submission.
        let subtotal = request
            .items
            .iter()
            .map(|i| line_total(i.price, i.quantity))
            .sum::<Decimal>()
            .round_dp(2);
        let total_amount = (subtotal + request.delivery_fee).round_dp(2);

        if let Some(client_total) = request.client_total {
            let divergence = (client_total - total_amount).abs();
            if divergence > AMOUNT_TOLERANCE {
                return Err(ServiceError::AmountMismatch(format!(
                    "client total {client_total} differs from computed total {total_amount} by {divergence}"
                )));
            }
        }

        let depot = self.resolve_depot(request.depot_id).await?;

        let wallet_amount = request.wallet_amount;
        let wallet_member_id = if wallet_amount > Decimal::ZERO {
            let member_id = request.member_id.ok_or_else(|| {
                ServiceError::ValidationError(
                    "wallet payment requires a member account".to_string(),
                )
            })?;
            // Fast-fail before any writes; the authoritative check is the
            // conditional balance update inside the transaction.
            let member = crate::entities::member::Entity::find_by_id(member_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("member {member_id} not found")))?;
            if member.wallet_balance < wallet_amount {
                return Err(ServiceError::InsufficientFunds(format!(
                    "requested {wallet_amount} exceeds balance {}",
                    member.wallet_balance
                )));
            }
            Some(member_id)
        } else {
            None
        };

        let payable_amount = (total_amount - wallet_amount).max(Decimal::ZERO);
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order_number = self.allocator.next_order_number(&txn, now).await?;

        let order_active = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            customer_name: Set(request.customer.name.clone()),
            customer_mobile: Set(request.customer.mobile.clone()),
            customer_email: Set(request.customer.email.clone()),
            address_line: Set(request.customer.address_line.clone()),
            city: Set(request.customer.city.clone()),
            pincode: Set(request.customer.pincode.clone()),
            subtotal: Set(subtotal),
            delivery_fee: Set(request.delivery_fee),
            total_amount: Set(total_amount),
            wallet_amount_applied: Set(wallet_amount),
            payable_amount: Set(payable_amount),
            payment_status: Set(PaymentStatus::Pending),
            payment_mode: Set(None),
            payment_reference: Set(None),
            payment_date: Set(None),
            depot_id: Set(Some(depot.id)),
            member_id: Set(request.member_id),
            invoice_no: Set(None),
            invoice_path: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };
        let order_row = order_active.insert(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order in database");
            ServiceError::DatabaseError(e)
        })?;

        let mut inserted_items = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let item_active = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                variant_id: Set(item.variant_id),
                name: Set(item.name.clone()),
                variant_name: Set(item.variant_name.clone()),
                price: Set(item.price),
                quantity: Set(item.quantity),
                line_total: Set(line_total(item.price, item.quantity)),
                is_cancelled: Set(false),
                ..Default::default()
            };
            inserted_items.push(item_active.insert(&txn).await?);
        }

        if let Some(member_id) = wallet_member_id {
            apply_debit(
                &txn,
                &WalletMovement {
                    member_id,
                    amount: wallet_amount,
                    payment_method: Some("WALLET".to_string()),
                    reference_number: Some(order_number.clone()),
                    notes: Some(format!("Applied to order {order_number}")),
                    processed_by: request.acting_user,
                },
            )
            .await?;
        }

        for item in &inserted_items {
            self.issue_item_stock(&txn, depot.id, item, STOCK_MODULE_CREATE)
                .await;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, order_number = %order_number, "Order created successfully");

        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(
                order_id,
                "order-created",
                format!("Order {order_number} created with {} items", inserted_items.len()),
            )
            .by(request.acting_user),
        )
        .await;
        self.emit(Event::OrderCreated(order_id)).await;
        if let Some(member_id) = wallet_member_id {
            self.emit(Event::WalletDebited {
                member_id,
                amount: wallet_amount,
                reference: Some(order_number.clone()),
            })
            .await;
        }

        // Best-effort: the order is committed whatever happens here.
        let (invoice, invoice_error) = match self.invoices.generate(order_id).await {
            Ok(r) => (Some(r), None),
            Err(e) => {
                warn!(error = %e, order_id = %order_id, "invoice generation failed after commit");
                (None, Some(e.to_string()))
            }
        };

        let order = self.load_order_snapshot(order_id).await?;
        Ok(CreateOrderResponse {
            order,
            invoice,
            invoice_error,
        })
    }

    /// Appends a line to an existing order and recomputes its totals.
    #[instrument(skip(self, request), fields(order_id = %order_id))]
    pub async fn add_item(
        &self,
        order_id: Uuid,
        request: AddItemRequest,
    ) -> Result<OrderResponse, ServiceError> {
        if request.quantity < 0 {
            return Err(ServiceError::ValidationError(format!(
                "quantity cannot be negative, got {}",
                request.quantity
            )));
        }

        let resolved = self.resolve_item(&request).await?;

        let txn = self.db.begin().await?;

        let order_row = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

        let item_active = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(resolved.product_id),
            variant_id: Set(resolved.variant_id),
            name: Set(resolved.name.clone()),
            variant_name: Set(resolved.variant_name.clone()),
            price: Set(resolved.price),
            quantity: Set(request.quantity),
            line_total: Set(line_total(resolved.price, request.quantity)),
            is_cancelled: Set(false),
            ..Default::default()
        };
        let item = item_active.insert(&txn).await?;

        let depot_id = order_row.depot_id;
        self.recompute_totals(&txn, order_row).await?;

        if let Some(depot_id) = depot_id {
            self.issue_item_stock(&txn, depot_id, &item, STOCK_MODULE_EDIT)
                .await;
        }

        txn.commit().await?;

        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(
                order_id,
                "item-added",
                format!(
                    "Added {} x{} at {} (line total {})",
                    item.name, item.quantity, item.price, item.line_total
                ),
            )
            .by(request.acting_user)
            .with_change(
                Value::Null,
                json!({ "item_id": item.id, "quantity": item.quantity, "line_total": item.line_total }),
            ),
        )
        .await;
        self.emit(Event::OrderItemAdded {
            order_id,
            item_id: item.id,
        })
        .await;

        self.load_order_snapshot(order_id).await
    }

    /// Changes a line's quantity, issuing additional stock when it grows.
    ///
    /// Decreases deliberately do not restock: once issued, stock does not
    /// return through this path.
    #[instrument(skip(self), fields(order_id = %order_id, item_id = %item_id))]
    pub async fn update_item_quantity(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        new_quantity: i32,
        acting_user: Option<Uuid>,
    ) -> Result<OrderResponse, ServiceError> {
        if new_quantity < 0 {
            return Err(ServiceError::ValidationError(format!(
                "quantity cannot be negative, got {new_quantity}"
            )));
        }

        let txn = self.db.begin().await?;

        let order_row = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

        let item = OrderItemEntity::find_by_id(item_id)
            .filter(order_item::Column::OrderId.eq(order_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("item {item_id} not found on order {order_id}"))
            })?;

        if item.is_cancelled {
            return Err(ServiceError::ImmutableCancelledItem(item_id));
        }

        let old_quantity = item.quantity;
        let old_line_total = item.line_total;
        let delta = new_quantity - old_quantity;
        let price = item.price;
        let variant_id = item.variant_id;
        let product_id = item.product_id;

        let mut item_active: order_item::ActiveModel = item.into();
        item_active.quantity = Set(new_quantity);
        item_active.line_total = Set(line_total(price, new_quantity));
        let item = item_active.update(&txn).await?;

        let depot_id = order_row.depot_id;
        self.recompute_totals(&txn, order_row).await?;

        if delta > 0 {
            if let (Some(variant_id), Some(depot_id)) = (variant_id, depot_id) {
                self.issue_stock_logged(
                    &txn,
                    StockMovement {
                        product_id,
                        variant_id,
                        depot_id,
                        quantity: delta,
                        module: STOCK_MODULE_EDIT.to_string(),
                        origin: Some(order_id),
                    },
                )
                .await;
            }
        }

        txn.commit().await?;

        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(
                order_id,
                "quantity-updated",
                format!(
                    "Quantity of {} changed {} -> {}",
                    item.name, old_quantity, new_quantity
                ),
            )
            .by(acting_user)
            .with_change(
                json!({ "quantity": old_quantity, "line_total": old_line_total }),
                json!({ "quantity": new_quantity, "line_total": item.line_total }),
            ),
        )
        .await;
        self.emit(Event::OrderItemQuantityChanged {
            order_id,
            item_id,
            old_quantity,
            new_quantity,
        })
        .await;

        self.load_order_snapshot(order_id).await
    }

    /// Cancels or restores a line and recomputes the order's totals.
    /// Cancellation never writes to the stock ledger.
    #[instrument(skip(self), fields(order_id = %order_id, item_id = %item_id))]
    pub async fn toggle_item_cancellation(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        is_cancelled: bool,
        acting_user: Option<Uuid>,
    ) -> Result<OrderResponse, ServiceError> {
        let txn = self.db.begin().await?;

        let order_row = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

        let item = OrderItemEntity::find_by_id(item_id)
            .filter(order_item::Column::OrderId.eq(order_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("item {item_id} not found on order {order_id}"))
            })?;

        let was_cancelled = item.is_cancelled;
        let item_name = item.name.clone();

        let mut item_active: order_item::ActiveModel = item.into();
        item_active.is_cancelled = Set(is_cancelled);
        item_active.update(&txn).await?;

        self.recompute_totals(&txn, order_row).await?;

        txn.commit().await?;

        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(
                order_id,
                "item-cancellation-toggled",
                format!(
                    "Item {} {}",
                    item_name,
                    if is_cancelled { "cancelled" } else { "restored" }
                ),
            )
            .by(acting_user)
            .with_change(
                json!({ "is_cancelled": was_cancelled }),
                json!({ "is_cancelled": is_cancelled }),
            ),
        )
        .await;
        self.emit(Event::OrderItemCancellationToggled {
            order_id,
            item_id,
            is_cancelled,
        })
        .await;

        self.load_order_snapshot(order_id).await
    }

    /// Marks a pending order paid, recording payment metadata.
    #[instrument(skip(self, request), fields(order_id = %order_id))]
    pub async fn mark_paid(
        &self,
        order_id: Uuid,
        request: MarkPaidRequest,
    ) -> Result<OrderResponse, ServiceError> {
        self.transition_payment_status(
            order_id,
            PaymentStatus::Paid,
            request.payment_mode,
            request.payment_reference,
            request.payment_date,
            request.acting_user,
        )
        .await
    }

    /// Applies a payment-status transition, honoring the one-way state
    /// machine. Refund side effects of PAID -> CANCELLED are the caller's
    /// responsibility.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_payment_status(
        &self,
        order_id: Uuid,
        new_status: PaymentStatus,
        acting_user: Option<Uuid>,
    ) -> Result<OrderResponse, ServiceError> {
        self.transition_payment_status(order_id, new_status, None, None, None, acting_user)
            .await
    }

    async fn transition_payment_status(
        &self,
        order_id: Uuid,
        new_status: PaymentStatus,
        payment_mode: Option<String>,
        payment_reference: Option<String>,
        payment_date: Option<DateTime<Utc>>,
        acting_user: Option<Uuid>,
    ) -> Result<OrderResponse, ServiceError> {
        let txn = self.db.begin().await?;

        let order_row = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

        let old_status = order_row.payment_status;
        if !old_status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidStatusTransition(format!(
                "{old_status} -> {new_status} is not allowed"
            )));
        }

        let mut active: order::ActiveModel = order_row.into();
        active.payment_status = Set(new_status);
        if new_status == PaymentStatus::Paid {
            active.payment_mode = Set(payment_mode);
            active.payment_reference = Set(payment_reference);
            active.payment_date = Set(Some(payment_date.unwrap_or_else(Utc::now)));
        }
        active.updated_at = Set(Some(Utc::now()));
        active.update(&txn).await?;

        txn.commit().await?;

        info!(order_id = %order_id, %old_status, %new_status, "Order payment status updated");

        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(
                order_id,
                "payment-status-changed",
                format!("Payment status changed {old_status} -> {new_status}"),
            )
            .by(acting_user)
            .with_change(
                json!({ "payment_status": old_status.to_string() }),
                json!({ "payment_status": new_status.to_string() }),
            ),
        )
        .await;
        self.emit(Event::OrderPaymentStatusChanged {
            order_id,
            old_status: old_status.to_string(),
            new_status: new_status.to_string(),
        })
        .await;

        self.load_order_snapshot(order_id).await
    }

    /// Retrieves an order with its items and totals.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        self.load_order_snapshot(order_id).await
    }

    /// Lists orders with pagination, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let paginator = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;
        let items = orders.load_many(OrderItemEntity, &*self.db).await?;

        let orders = orders
            .into_iter()
            .zip(items)
            .map(|(o, i)| model_to_response(o, i))
            .collect();

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Regenerates the order's invoice; always a fresh number and file.
    pub async fn regenerate_invoice(&self, order_id: Uuid) -> Result<InvoiceRef, ServiceError> {
        self.invoices.generate(order_id).await
    }

    async fn resolve_depot(&self, depot_id: Option<Uuid>) -> Result<depot::Model, ServiceError> {
        match depot_id {
            Some(id) => DepotEntity::find_by_id(id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::InvalidDepot(format!("depot {id} not found"))),
            None => DepotEntity::find()
                .filter(depot::Column::IsDefault.eq(true))
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::InvalidDepot("no default depot configured".to_string())
                }),
        }
    }

    /// Resolves an item's display name and price from the request or by
    /// dereferencing the variant/product it points at.
    async fn resolve_item(
        &self,
        request: &AddItemRequest,
    ) -> Result<ResolvedItem, ServiceError> {
        let variant = match request.variant_id {
            Some(id) => VariantEntity::find_by_id(id).one(&*self.db).await?,
            None => None,
        };
        let product = match request.product_id {
            Some(id) => ProductEntity::find_by_id(id).one(&*self.db).await?,
            None => None,
        };

        let name = request
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| product.as_ref().map(|p| p.name.clone()))
            .or_else(|| variant.as_ref().map(|v| v.name.clone()))
            .ok_or_else(|| {
                ServiceError::ResolutionError(
                    "no item name given and no product or variant to take one from".to_string(),
                )
            })?;

        let price = request
            .price
            .or_else(|| variant.as_ref().map(|v| v.price))
            .or_else(|| product.as_ref().map(|p| p.price))
            .ok_or_else(|| {
                ServiceError::ResolutionError(format!("no price resolvable for item {name}"))
            })?;

        if price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "price cannot be negative, got {price}"
            )));
        }

        let variant_name = request
            .variant_name
            .clone()
            .or_else(|| variant.as_ref().map(|v| v.name.clone()));

        Ok(ResolvedItem {
            product_id: request
                .product_id
                .or_else(|| variant.as_ref().map(|v| v.product_id)),
            variant_id: request.variant_id,
            name,
            variant_name,
            price,
        })
    }

    /// Per-item stock issue during order flows. Missing or mismatched
    /// variant references are logged and skipped, never fatal; real
    /// database failures still propagate through the poisoned transaction
    /// at commit.
    async fn issue_item_stock<C: ConnectionTrait>(
        &self,
        conn: &C,
        depot_id: Uuid,
        item: &order_item::Model,
        module: &str,
    ) {
        let Some(variant_id) = item.variant_id else {
            return;
        };
        if item.quantity <= 0 {
            return;
        }
        self.issue_stock_logged(
            conn,
            StockMovement {
                product_id: item.product_id,
                variant_id,
                depot_id,
                quantity: item.quantity,
                module: module.to_string(),
                origin: Some(item.order_id),
            },
        )
        .await;
    }

    async fn issue_stock_logged<C: ConnectionTrait>(&self, conn: &C, movement: StockMovement) {
        if let Err(e) = issue_stock(conn, &movement).await {
            warn!(
                error = %e,
                variant_id = %movement.variant_id,
                "stock issue skipped during order mutation"
            );
        }
    }

    /// Re-establishes the §3 total invariants on the order row from its
    /// current items, inside the caller's transaction.
    async fn recompute_totals<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_row: order::Model,
    ) -> Result<order::Model, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_row.id))
            .all(conn)
            .await?;

        let (subtotal, total_amount, payable_amount) = order_totals(
            &items,
            order_row.delivery_fee,
            order_row.wallet_amount_applied,
        );

        let mut active: order::ActiveModel = order_row.into();
        active.subtotal = Set(subtotal);
        active.total_amount = Set(total_amount);
        active.payable_amount = Set(payable_amount);
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(conn).await?)
    }

    async fn load_order_snapshot(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        let order_row = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(model_to_response(order_row, items))
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to send order event");
            }
        }
    }
}

struct ResolvedItem {
    product_id: Option<Uuid>,
    variant_id: Option<Uuid>,
    name: String,
    variant_name: Option<String>,
    price: Decimal,
}

fn validate_item_fields(name: &str, price: Decimal, quantity: i32) -> Result<(), ServiceError> {
    if name.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "item name is required".to_string(),
        ));
    }
    if price < Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "item price cannot be negative, got {price}"
        )));
    }
    if quantity < 0 {
        return Err(ServiceError::ValidationError(format!(
            "item quantity cannot be negative, got {quantity}"
        )));
    }
    Ok(())
}

/// Line total for a price/quantity pair, rounded to two decimals.
pub fn line_total(price: Decimal, quantity: i32) -> Decimal {
    (price * Decimal::from(quantity)).round_dp(2)
}

/// Totals over the current items: cancelled lines are excluded from the
/// subtotal but stay on the order for audit.
pub fn order_totals(
    items: &[order_item::Model],
    delivery_fee: Decimal,
    wallet_amount_applied: Decimal,
) -> (Decimal, Decimal, Decimal) {
    let subtotal = items
        .iter()
        .filter(|i| !i.is_cancelled)
        .map(|i| i.line_total)
        .sum::<Decimal>()
        .round_dp(2);
    let total_amount = (subtotal + delivery_fee).round_dp(2);
    let payable_amount = (total_amount - wallet_amount_applied).max(Decimal::ZERO);
    (subtotal, total_amount, payable_amount)
}

fn model_to_response(model: order::Model, items: Vec<order_item::Model>) -> OrderResponse {
    OrderResponse {
        id: model.id,
        order_number: model.order_number,
        customer_name: model.customer_name,
        customer_mobile: model.customer_mobile,
        customer_email: model.customer_email,
        address_line: model.address_line,
        city: model.city,
        pincode: model.pincode,
        subtotal: model.subtotal,
        delivery_fee: model.delivery_fee,
        total_amount: model.total_amount,
        wallet_amount_applied: model.wallet_amount_applied,
        payable_amount: model.payable_amount,
        payment_status: model.payment_status,
        payment_mode: model.payment_mode,
        payment_reference: model.payment_reference,
        payment_date: model.payment_date,
        depot_id: model.depot_id,
        member_id: model.member_id,
        invoice_no: model.invoice_no,
        invoice_path: model.invoice_path,
        created_at: model.created_at,
        updated_at: model.updated_at,
        items: items
            .into_iter()
            .map(|i| OrderItemResponse {
                id: i.id,
                product_id: i.product_id,
                variant_id: i.variant_id,
                name: i.name,
                variant_name: i.variant_name,
                price: i.price,
                quantity: i.quantity,
                line_total: i.line_total,
                is_cancelled: i.is_cancelled,
            })
            .collect(),
    }
}
