use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    FromQueryResult, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::depot_product_variant::{self, Entity as VariantEntity};
use crate::entities::stock_ledger::{self, Entity as StockLedgerEntity};
use crate::errors::ServiceError;

/// One stock movement against a (product, variant, depot) tuple.
#[derive(Debug, Clone)]
pub struct StockMovement {
    /// Product reference. When absent it is resolved from the variant row;
    /// when present it must agree with it.
    pub product_id: Option<Uuid>,
    pub variant_id: Uuid,
    pub depot_id: Uuid,
    pub quantity: i32,
    /// Originating workflow tag, e.g. "order", "order-edit", "adjustment".
    pub module: String,
    /// Originating order id, when the movement came from an order.
    pub origin: Option<Uuid>,
}

/// Appends an issue movement and decrements the variant's cached
/// `closing_qty` in the same transaction.
///
/// Issuing past the cached on-hand quantity logs a warning and proceeds:
/// the business favors completing orders over blocking on stock, so
/// insufficient stock is a backorder, not a failure. A missing variant row
/// is an error; callers on item-mutation paths downgrade it to a warning.
pub async fn issue_stock<C: ConnectionTrait>(
    conn: &C,
    movement: &StockMovement,
) -> Result<(), ServiceError> {
    apply_movement(conn, movement, 0, movement.quantity).await
}

/// Appends a receipt movement and increments the cached `closing_qty`.
pub async fn receive_stock<C: ConnectionTrait>(
    conn: &C,
    movement: &StockMovement,
) -> Result<(), ServiceError> {
    apply_movement(conn, movement, movement.quantity, 0).await
}

async fn apply_movement<C: ConnectionTrait>(
    conn: &C,
    movement: &StockMovement,
    received_qty: i32,
    issued_qty: i32,
) -> Result<(), ServiceError> {
    if movement.quantity <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "stock movement quantity must be positive, got {}",
            movement.quantity
        )));
    }

    let variant = VariantEntity::find_by_id(movement.variant_id)
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!(
                "depot product variant {} not found",
                movement.variant_id
            ))
        })?;

    if variant.depot_id != movement.depot_id {
        return Err(ServiceError::ValidationError(format!(
            "variant {} does not belong to depot {}",
            movement.variant_id, movement.depot_id
        )));
    }

    let product_id = match movement.product_id {
        Some(id) if id != variant.product_id => {
            return Err(ServiceError::ValidationError(format!(
                "variant {} belongs to product {}, not {}",
                movement.variant_id, variant.product_id, id
            )));
        }
        Some(id) => id,
        None => variant.product_id,
    };

    if issued_qty > 0 && issued_qty > variant.closing_qty {
        warn!(
            variant_id = %movement.variant_id,
            depot_id = %movement.depot_id,
            requested = issued_qty,
            on_hand = variant.closing_qty,
            "issuing beyond on-hand stock, backorder allowed"
        );
    }

    let entry = stock_ledger::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        variant_id: Set(movement.variant_id),
        depot_id: Set(movement.depot_id),
        received_qty: Set(received_qty),
        issued_qty: Set(issued_qty),
        module: Set(movement.module.clone()),
        foreign_key: Set(movement.origin),
        ..Default::default()
    };
    entry.insert(conn).await?;

    // The cache adjustment is inseparable from the ledger append; both ride
    // the caller's transaction.
    let delta = received_qty - issued_qty;
    VariantEntity::update_many()
        .col_expr(
            depot_product_variant::Column::ClosingQty,
            Expr::col(depot_product_variant::Column::ClosingQty).add(delta),
        )
        .filter(depot_product_variant::Column::Id.eq(movement.variant_id))
        .exec(conn)
        .await?;

    Ok(())
}

#[derive(FromQueryResult)]
struct LedgerTotals {
    received: Option<i64>,
    issued: Option<i64>,
}

/// On-hand quantity for a tuple, recomputed from the ledger itself.
pub async fn on_hand<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    variant_id: Uuid,
    depot_id: Uuid,
) -> Result<i64, ServiceError> {
    let totals = StockLedgerEntity::find()
        .select_only()
        .column_as(stock_ledger::Column::ReceivedQty.sum(), "received")
        .column_as(stock_ledger::Column::IssuedQty.sum(), "issued")
        .filter(stock_ledger::Column::ProductId.eq(product_id))
        .filter(stock_ledger::Column::VariantId.eq(variant_id))
        .filter(stock_ledger::Column::DepotId.eq(depot_id))
        .into_model::<LedgerTotals>()
        .one(conn)
        .await?;

    Ok(totals
        .map(|t| t.received.unwrap_or(0) - t.issued.unwrap_or(0))
        .unwrap_or(0))
}

/// Service wrapper for stock-ledger operations that run in their own
/// transaction scope (manual adjustments, cache repair, reads).
#[derive(Clone)]
pub struct StockLedgerService {
    db: Arc<DatabaseConnection>,
}

impl StockLedgerService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Records a manual receipt (purchase, correction) against a variant.
    #[instrument(skip(self, movement), fields(variant_id = %movement.variant_id))]
    pub async fn receive(&self, movement: StockMovement) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        receive_stock(&txn, &movement).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Records a manual issue against a variant.
    #[instrument(skip(self, movement), fields(variant_id = %movement.variant_id))]
    pub async fn issue(&self, movement: StockMovement) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        issue_stock(&txn, &movement).await?;
        txn.commit().await?;
        Ok(())
    }

    /// On-hand quantity derived from the ledger aggregate.
    pub async fn on_hand(
        &self,
        product_id: Uuid,
        variant_id: Uuid,
        depot_id: Uuid,
    ) -> Result<i64, ServiceError> {
        on_hand(&*self.db, product_id, variant_id, depot_id).await
    }

    /// Rewrites a variant's cached `closing_qty` from the ledger aggregate.
    ///
    /// The ledger is the source of truth; the cache is a rebuildable
    /// materialized view. Returns the recomputed quantity.
    #[instrument(skip(self))]
    pub async fn rebuild_closing_qty(&self, variant_id: Uuid) -> Result<i32, ServiceError> {
        let txn = self.db.begin().await?;

        let variant = VariantEntity::find_by_id(variant_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("depot product variant {variant_id} not found"))
            })?;

        let derived = on_hand(&txn, variant.product_id, variant.id, variant.depot_id).await? as i32;

        if derived != variant.closing_qty {
            info!(
                variant_id = %variant_id,
                cached = variant.closing_qty,
                derived,
                "closing quantity drifted from ledger, rebuilding"
            );
        }

        let mut active: depot_product_variant::ActiveModel = variant.into();
        active.closing_qty = Set(derived);
        active.update(&txn).await?;

        txn.commit().await?;
        Ok(derived)
    }
}
