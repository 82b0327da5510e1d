//! Wallet ledger tests: paired balance deltas, the debit precondition,
//! and cache/ledger agreement.

mod common;

use assert_matches::assert_matches;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

use common::{seed_member, setup};
use dailybasket_api::entities::wallet_transaction::{self, WalletTxnType};
use dailybasket_api::errors::ServiceError;
use dailybasket_api::services::wallet::WalletMovement;

fn movement(member_id: Uuid, amount: Decimal) -> WalletMovement {
    WalletMovement {
        member_id,
        amount,
        payment_method: Some("CASH".to_string()),
        reference_number: None,
        notes: None,
        processed_by: None,
    }
}

#[tokio::test]
async fn credit_writes_one_transaction_and_one_balance_delta() {
    let ctx = setup().await;
    let member = seed_member(&ctx.db, Decimal::ZERO).await;

    let record = ctx
        .services
        .wallet
        .credit(movement(member.id, dec!(250)))
        .await
        .expect("credited");

    assert_eq!(record.txn_type, WalletTxnType::Credit);
    assert_eq!(record.amount, dec!(250));

    let balance = ctx.services.wallet.balance(member.id).await.unwrap();
    assert_eq!(balance, dec!(250));

    let rows = wallet_transaction::Entity::find()
        .filter(wallet_transaction::Column::MemberId.eq(member.id))
        .count(&*ctx.db)
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn debit_within_balance_succeeds() {
    let ctx = setup().await;
    let member = seed_member(&ctx.db, dec!(500)).await;

    let record = ctx
        .services
        .wallet
        .debit(movement(member.id, dec!(180)))
        .await
        .expect("debited");
    assert_eq!(record.txn_type, WalletTxnType::Debit);

    let balance = ctx.services.wallet.balance(member.id).await.unwrap();
    assert_eq!(balance, dec!(320));
}

#[tokio::test]
async fn overdraft_fails_and_writes_nothing() {
    let ctx = setup().await;
    let member = seed_member(&ctx.db, dec!(500)).await;

    let result = ctx.services.wallet.debit(movement(member.id, dec!(600))).await;
    assert_matches!(result, Err(ServiceError::InsufficientFunds(_)));

    let balance = ctx.services.wallet.balance(member.id).await.unwrap();
    assert_eq!(balance, dec!(500), "failed debit leaves the balance alone");

    let rows = wallet_transaction::Entity::find()
        .filter(wallet_transaction::Column::MemberId.eq(member.id))
        .count(&*ctx.db)
        .await
        .unwrap();
    assert_eq!(rows, 0, "failed debit appends no transaction");
}

#[tokio::test]
async fn debit_of_the_exact_balance_is_allowed() {
    let ctx = setup().await;
    let member = seed_member(&ctx.db, dec!(75)).await;

    ctx.services
        .wallet
        .debit(movement(member.id, dec!(75)))
        .await
        .expect("exact-balance debit");

    let balance = ctx.services.wallet.balance(member.id).await.unwrap();
    assert_eq!(balance, Decimal::ZERO);
}

#[tokio::test]
async fn non_positive_amounts_are_rejected() {
    let ctx = setup().await;
    let member = seed_member(&ctx.db, dec!(100)).await;

    for amount in [Decimal::ZERO, dec!(-10)] {
        let debit = ctx.services.wallet.debit(movement(member.id, amount)).await;
        assert_matches!(debit, Err(ServiceError::InvalidAmount(_)));

        let credit = ctx.services.wallet.credit(movement(member.id, amount)).await;
        assert_matches!(credit, Err(ServiceError::InvalidAmount(_)));
    }

    let balance = ctx.services.wallet.balance(member.id).await.unwrap();
    assert_eq!(balance, dec!(100));
}

#[tokio::test]
async fn unknown_member_is_not_found() {
    let ctx = setup().await;

    let result = ctx
        .services
        .wallet
        .credit(movement(Uuid::new_v4(), dec!(10)))
        .await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn cached_balance_tracks_the_transaction_ledger() {
    let ctx = setup().await;
    let member = seed_member(&ctx.db, Decimal::ZERO).await;

    ctx.services
        .wallet
        .credit(movement(member.id, dec!(300)))
        .await
        .unwrap();
    ctx.services
        .wallet
        .debit(movement(member.id, dec!(120)))
        .await
        .unwrap();
    ctx.services
        .wallet
        .credit(movement(member.id, dec!(45.50)))
        .await
        .unwrap();
    ctx.services
        .wallet
        .debit(movement(member.id, dec!(0.50)))
        .await
        .unwrap();

    let cached = ctx.services.wallet.balance(member.id).await.unwrap();
    let derived = ctx.services.wallet.ledger_balance(member.id).await.unwrap();
    assert_eq!(cached, dec!(225));
    assert_eq!(cached, derived, "cache and ledger must agree");
}
