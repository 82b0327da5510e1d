use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::member::{self, Entity as MemberEntity};
use crate::entities::wallet_transaction::{
    self, Entity as WalletTransactionEntity, WalletTxnType,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// A wallet movement to apply to a member's account.
#[derive(Debug, Clone)]
pub struct WalletMovement {
    pub member_id: Uuid,
    pub amount: Decimal,
    pub payment_method: Option<String>,
    pub reference_number: Option<String>,
    pub notes: Option<String>,
    pub processed_by: Option<Uuid>,
}

/// Applies a debit inside the caller's transaction: one appended
/// transaction row plus one balance decrement, or neither.
///
/// The precondition and the decrement are a single conditional update
/// (`balance = balance - ? WHERE id = ? AND balance >= ?`), so there is no
/// window between the check and the write for a concurrent debit to slip
/// through.
pub async fn apply_debit<C: ConnectionTrait>(
    conn: &C,
    movement: &WalletMovement,
) -> Result<wallet_transaction::Model, ServiceError> {
    validate_amount(movement.amount)?;

    let updated = MemberEntity::update_many()
        .col_expr(
            member::Column::WalletBalance,
            Expr::col(member::Column::WalletBalance).sub(movement.amount),
        )
        .filter(member::Column::Id.eq(movement.member_id))
        .filter(member::Column::WalletBalance.gte(movement.amount))
        .exec(conn)
        .await?;

    if updated.rows_affected == 0 {
        let member = MemberEntity::find_by_id(movement.member_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("member {} not found", movement.member_id))
            })?;
        return Err(ServiceError::InsufficientFunds(format!(
            "debit of {} exceeds balance {} for member {}",
            movement.amount, member.wallet_balance, movement.member_id
        )));
    }

    append_transaction(conn, movement, WalletTxnType::Debit).await
}

/// Applies a credit inside the caller's transaction. No balance
/// precondition: a zero or negative balance may become positive.
pub async fn apply_credit<C: ConnectionTrait>(
    conn: &C,
    movement: &WalletMovement,
) -> Result<wallet_transaction::Model, ServiceError> {
    validate_amount(movement.amount)?;

    let updated = MemberEntity::update_many()
        .col_expr(
            member::Column::WalletBalance,
            Expr::col(member::Column::WalletBalance).add(movement.amount),
        )
        .filter(member::Column::Id.eq(movement.member_id))
        .exec(conn)
        .await?;

    if updated.rows_affected == 0 {
        return Err(ServiceError::NotFound(format!(
            "member {} not found",
            movement.member_id
        )));
    }

    append_transaction(conn, movement, WalletTxnType::Credit).await
}

fn validate_amount(amount: Decimal) -> Result<(), ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::InvalidAmount(format!(
            "wallet amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

async fn append_transaction<C: ConnectionTrait>(
    conn: &C,
    movement: &WalletMovement,
    txn_type: WalletTxnType,
) -> Result<wallet_transaction::Model, ServiceError> {
    let record = wallet_transaction::ActiveModel {
        id: Set(Uuid::new_v4()),
        member_id: Set(movement.member_id),
        amount: Set(movement.amount),
        txn_type: Set(txn_type),
        status: Set("COMPLETED".to_string()),
        payment_method: Set(movement.payment_method.clone()),
        reference_number: Set(movement.reference_number.clone()),
        notes: Set(movement.notes.clone()),
        processed_by: Set(movement.processed_by),
        ..Default::default()
    };
    Ok(record.insert(conn).await?)
}

/// Service for wallet operations that own their transaction scope.
#[derive(Clone)]
pub struct WalletService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
}

impl WalletService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Debits a member's wallet in its own transaction.
    #[instrument(skip(self, movement), fields(member_id = %movement.member_id, amount = %movement.amount))]
    pub async fn debit(
        &self,
        movement: WalletMovement,
    ) -> Result<wallet_transaction::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let record = apply_debit(&txn, &movement).await?;
        txn.commit().await?;

        info!(member_id = %movement.member_id, amount = %movement.amount, "wallet debited");
        self.emit(Event::WalletDebited {
            member_id: movement.member_id,
            amount: movement.amount,
            reference: movement.reference_number.clone(),
        })
        .await;

        Ok(record)
    }

    /// Credits a member's wallet in its own transaction.
    #[instrument(skip(self, movement), fields(member_id = %movement.member_id, amount = %movement.amount))]
    pub async fn credit(
        &self,
        movement: WalletMovement,
    ) -> Result<wallet_transaction::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let record = apply_credit(&txn, &movement).await?;
        txn.commit().await?;

        info!(member_id = %movement.member_id, amount = %movement.amount, "wallet credited");
        self.emit(Event::WalletCredited {
            member_id: movement.member_id,
            amount: movement.amount,
            reference: movement.reference_number.clone(),
        })
        .await;

        Ok(record)
    }

    /// The member's cached running balance.
    pub async fn balance(&self, member_id: Uuid) -> Result<Decimal, ServiceError> {
        let member = MemberEntity::find_by_id(member_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("member {member_id} not found")))?;
        Ok(member.wallet_balance)
    }

    /// Balance recomputed from the transaction ledger: sum of credits minus
    /// sum of debits. The cached balance must always equal this.
    pub async fn ledger_balance(&self, member_id: Uuid) -> Result<Decimal, ServiceError> {
        let transactions = WalletTransactionEntity::find()
            .filter(wallet_transaction::Column::MemberId.eq(member_id))
            .all(&*self.db)
            .await?;

        Ok(transactions
            .iter()
            .fold(Decimal::ZERO, |acc, t| match t.txn_type {
                WalletTxnType::Credit => acc + t.amount,
                WalletTxnType::Debit => acc - t.amount,
            }))
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to send wallet event");
            }
        }
    }
}
