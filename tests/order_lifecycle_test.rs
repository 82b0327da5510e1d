//! End-to-end tests for the order settlement core: creation, item
//! mutations, totals invariants, wallet application, and the payment
//! state machine.

mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use uuid::Uuid;

use common::{seed_depot, seed_member, seed_product, seed_variant, setup};
use dailybasket_api::entities::{
    order::{self, PaymentStatus},
    order_item, stock_ledger, wallet_transaction,
};
use dailybasket_api::errors::ServiceError;
use dailybasket_api::services::orders::{
    AddItemRequest, CreateOrderRequest, CustomerDetails, MarkPaidRequest, NewOrderItem,
};
use dailybasket_api::services::sequences::fiscal_year_bucket;

fn customer() -> CustomerDetails {
    CustomerDetails {
        name: "Asha Rao".to_string(),
        mobile: "9876500000".to_string(),
        email: None,
        address_line: "12 Lakeview Road".to_string(),
        city: Some("Pune".to_string()),
        pincode: Some("411001".to_string()),
    }
}

fn simple_item(price: Decimal, quantity: i32) -> NewOrderItem {
    NewOrderItem {
        product_id: None,
        variant_id: None,
        name: "Toned Milk".to_string(),
        variant_name: None,
        price,
        quantity,
    }
}

fn create_request(items: Vec<NewOrderItem>, delivery_fee: Decimal) -> CreateOrderRequest {
    CreateOrderRequest {
        customer: customer(),
        items,
        depot_id: None,
        member_id: None,
        delivery_fee,
        wallet_amount: Decimal::ZERO,
        client_total: None,
        acting_user: None,
    }
}

#[tokio::test]
async fn create_order_recomputes_totals_server_side() {
    let ctx = setup().await;
    seed_depot(&ctx.db, "Central", true).await;

    let response = ctx
        .services
        .orders
        .create_order(create_request(vec![simple_item(dec!(100), 2)], dec!(10)))
        .await
        .expect("order created");

    let order = &response.order;
    assert_eq!(order.subtotal, dec!(200));
    assert_eq!(order.total_amount, dec!(210));
    assert_eq!(order.payable_amount, dec!(210));
    assert_eq!(order.wallet_amount_applied, Decimal::ZERO);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.items.len(), 1);

    let bucket = fiscal_year_bucket(Utc::now());
    assert_eq!(order.order_number, format!("{bucket}-00001"));
}

#[tokio::test]
async fn sequential_orders_get_contiguous_numbers() {
    let ctx = setup().await;
    seed_depot(&ctx.db, "Central", true).await;
    let bucket = fiscal_year_bucket(Utc::now());

    let first = ctx
        .services
        .orders
        .create_order(create_request(vec![simple_item(dec!(10), 1)], Decimal::ZERO))
        .await
        .expect("first order");
    let second = ctx
        .services
        .orders
        .create_order(create_request(vec![simple_item(dec!(10), 1)], Decimal::ZERO))
        .await
        .expect("second order");

    assert_eq!(first.order.order_number, format!("{bucket}-00001"));
    assert_eq!(second.order.order_number, format!("{bucket}-00002"));
}

#[tokio::test]
async fn add_item_extends_the_totals() {
    let ctx = setup().await;
    seed_depot(&ctx.db, "Central", true).await;

    let created = ctx
        .services
        .orders
        .create_order(create_request(vec![simple_item(dec!(100), 2)], dec!(10)))
        .await
        .expect("order created");

    let updated = ctx
        .services
        .orders
        .add_item(
            created.order.id,
            AddItemRequest {
                product_id: None,
                variant_id: None,
                name: Some("Paneer".to_string()),
                variant_name: None,
                price: Some(dec!(50)),
                quantity: 1,
                acting_user: None,
            },
        )
        .await
        .expect("item added");

    assert_eq!(updated.subtotal, dec!(250));
    assert_eq!(updated.total_amount, dec!(260));
    assert_eq!(updated.payable_amount, dec!(260));
    assert_eq!(updated.items.len(), 2);
}

#[tokio::test]
async fn add_item_resolves_from_catalog_when_client_sends_no_name() {
    let ctx = setup().await;
    let depot = seed_depot(&ctx.db, "Central", true).await;
    let product = seed_product(&ctx.db, "Curd", dec!(30)).await;
    let variant = seed_variant(&ctx.db, &depot, &product, dec!(32), 50).await;

    let created = ctx
        .services
        .orders
        .create_order(create_request(vec![simple_item(dec!(100), 1)], Decimal::ZERO))
        .await
        .expect("order created");

    let updated = ctx
        .services
        .orders
        .add_item(
            created.order.id,
            AddItemRequest {
                product_id: None,
                variant_id: Some(variant.id),
                name: None,
                variant_name: None,
                price: None,
                quantity: 2,
                acting_user: None,
            },
        )
        .await
        .expect("item resolved and added");

    let added = updated
        .items
        .iter()
        .find(|i| i.variant_id == Some(variant.id))
        .expect("resolved line present");
    assert_eq!(added.name, variant.name);
    assert_eq!(added.price, dec!(32));
    assert_eq!(added.line_total, dec!(64));
}

#[tokio::test]
async fn add_item_without_any_name_fails_resolution() {
    let ctx = setup().await;
    seed_depot(&ctx.db, "Central", true).await;

    let created = ctx
        .services
        .orders
        .create_order(create_request(vec![simple_item(dec!(100), 1)], Decimal::ZERO))
        .await
        .expect("order created");

    let result = ctx
        .services
        .orders
        .add_item(
            created.order.id,
            AddItemRequest {
                product_id: None,
                variant_id: None,
                name: None,
                variant_name: None,
                price: Some(dec!(10)),
                quantity: 1,
                acting_user: None,
            },
        )
        .await;

    assert_matches!(result, Err(ServiceError::ResolutionError(_)));
}

#[tokio::test]
async fn client_total_outside_tolerance_is_rejected() {
    let ctx = setup().await;
    seed_depot(&ctx.db, "Central", true).await;

    let mut request = create_request(vec![simple_item(dec!(100), 2)], dec!(10));
    request.client_total = Some(dec!(215));

    let result = ctx.services.orders.create_order(request).await;
    assert_matches!(result, Err(ServiceError::AmountMismatch(_)));

    // Rounding noise within one currency unit is accepted.
    let mut request = create_request(vec![simple_item(dec!(100), 2)], dec!(10));
    request.client_total = Some(dec!(210.80));
    ctx.services
        .orders
        .create_order(request)
        .await
        .expect("tolerated divergence");
}

#[tokio::test]
async fn missing_depot_reference_is_rejected() {
    let ctx = setup().await;
    seed_depot(&ctx.db, "Central", true).await;

    let mut request = create_request(vec![simple_item(dec!(10), 1)], Decimal::ZERO);
    request.depot_id = Some(Uuid::new_v4());

    let result = ctx.services.orders.create_order(request).await;
    assert_matches!(result, Err(ServiceError::InvalidDepot(_)));
}

#[tokio::test]
async fn order_without_depot_falls_back_to_the_default() {
    let ctx = setup().await;
    seed_depot(&ctx.db, "North", false).await;
    let default_depot = seed_depot(&ctx.db, "Central", true).await;

    let response = ctx
        .services
        .orders
        .create_order(create_request(vec![simple_item(dec!(10), 1)], Decimal::ZERO))
        .await
        .expect("order created");

    assert_eq!(response.order.depot_id, Some(default_depot.id));
}

#[tokio::test]
async fn insufficient_wallet_funds_abort_creation_before_any_write() {
    let ctx = setup().await;
    seed_depot(&ctx.db, "Central", true).await;
    let member = seed_member(&ctx.db, dec!(500)).await;

    let mut request = create_request(vec![simple_item(dec!(300), 2)], Decimal::ZERO);
    request.member_id = Some(member.id);
    request.wallet_amount = dec!(600);

    let result = ctx.services.orders.create_order(request).await;
    assert_matches!(result, Err(ServiceError::InsufficientFunds(_)));

    let orders = order::Entity::find().count(&*ctx.db).await.unwrap();
    assert_eq!(orders, 0, "no order row may survive a failed wallet check");
    let wallet_txns = wallet_transaction::Entity::find()
        .count(&*ctx.db)
        .await
        .unwrap();
    assert_eq!(wallet_txns, 0);

    let balance = ctx.services.wallet.balance(member.id).await.unwrap();
    assert_eq!(balance, dec!(500), "balance untouched by the failed attempt");
}

#[tokio::test]
async fn wallet_application_debits_and_reduces_payable() {
    let ctx = setup().await;
    seed_depot(&ctx.db, "Central", true).await;
    let member = seed_member(&ctx.db, dec!(500)).await;

    let mut request = create_request(vec![simple_item(dec!(100), 2)], dec!(10));
    request.member_id = Some(member.id);
    request.wallet_amount = dec!(100);

    let response = ctx
        .services
        .orders
        .create_order(request)
        .await
        .expect("order created");

    assert_eq!(response.order.wallet_amount_applied, dec!(100));
    assert_eq!(response.order.payable_amount, dec!(110));

    let balance = ctx.services.wallet.balance(member.id).await.unwrap();
    assert_eq!(balance, dec!(400));

    let txn = wallet_transaction::Entity::find()
        .filter(wallet_transaction::Column::MemberId.eq(member.id))
        .one(&*ctx.db)
        .await
        .unwrap()
        .expect("one wallet transaction");
    assert_eq!(txn.amount, dec!(100));
    assert_eq!(
        txn.reference_number.as_deref(),
        Some(response.order.order_number.as_str()),
        "debit references the order number"
    );
}

#[tokio::test]
async fn creation_issues_stock_for_variant_backed_items() {
    let ctx = setup().await;
    let depot = seed_depot(&ctx.db, "Central", true).await;
    let product = seed_product(&ctx.db, "Milk", dec!(25)).await;
    let variant = seed_variant(&ctx.db, &depot, &product, dec!(25), 20).await;

    let mut item = simple_item(dec!(25), 3);
    item.product_id = Some(product.id);
    item.variant_id = Some(variant.id);

    let response = ctx
        .services
        .orders
        .create_order(create_request(vec![item], Decimal::ZERO))
        .await
        .expect("order created");

    let on_hand = ctx
        .services
        .stock
        .on_hand(product.id, variant.id, depot.id)
        .await
        .unwrap();
    assert_eq!(on_hand, -3, "only issues so far, ledger net is negative");

    let cached = dailybasket_api::entities::depot_product_variant::Entity::find_by_id(variant.id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.closing_qty, 17);

    let entry = stock_ledger::Entity::find()
        .filter(stock_ledger::Column::VariantId.eq(variant.id))
        .one(&*ctx.db)
        .await
        .unwrap()
        .expect("ledger entry written");
    assert_eq!(entry.issued_qty, 3);
    assert_eq!(entry.received_qty, 0);
    assert_eq!(entry.module, "order");
    assert_eq!(entry.foreign_key, Some(response.order.id));
}

#[tokio::test]
async fn bad_variant_reference_never_aborts_creation() {
    let ctx = setup().await;
    seed_depot(&ctx.db, "Central", true).await;

    let mut item = simple_item(dec!(25), 3);
    item.variant_id = Some(Uuid::new_v4());

    let response = ctx
        .services
        .orders
        .create_order(create_request(vec![item], Decimal::ZERO))
        .await
        .expect("order still created");

    assert_eq!(response.order.subtotal, dec!(75));
    let entries = stock_ledger::Entity::find().count(&*ctx.db).await.unwrap();
    assert_eq!(entries, 0, "no ledger entry for the unknown variant");
}

#[tokio::test]
async fn quantity_increase_issues_only_the_delta() {
    let ctx = setup().await;
    let depot = seed_depot(&ctx.db, "Central", true).await;
    let product = seed_product(&ctx.db, "Milk", dec!(25)).await;
    let variant = seed_variant(&ctx.db, &depot, &product, dec!(25), 20).await;

    let mut item = simple_item(dec!(100), 2);
    item.product_id = Some(product.id);
    item.variant_id = Some(variant.id);

    let created = ctx
        .services
        .orders
        .create_order(create_request(vec![item], Decimal::ZERO))
        .await
        .expect("order created");
    let item_id = created.order.items[0].id;

    // 20 seeded, 2 issued at creation, 3 more on the increase.
    let updated = ctx
        .services
        .orders
        .update_item_quantity(created.order.id, item_id, 5, None)
        .await
        .expect("quantity updated");

    assert_eq!(updated.items[0].quantity, 5);
    assert_eq!(updated.items[0].line_total, dec!(500));
    assert_eq!(updated.subtotal, dec!(500));

    let cached = dailybasket_api::entities::depot_product_variant::Entity::find_by_id(variant.id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.closing_qty, 15);

    let delta_entry = stock_ledger::Entity::find()
        .filter(stock_ledger::Column::VariantId.eq(variant.id))
        .filter(stock_ledger::Column::Module.eq("order-edit"))
        .one(&*ctx.db)
        .await
        .unwrap()
        .expect("delta entry written");
    assert_eq!(delta_entry.issued_qty, 3);
}

#[tokio::test]
async fn quantity_decrease_never_restocks() {
    let ctx = setup().await;
    let depot = seed_depot(&ctx.db, "Central", true).await;
    let product = seed_product(&ctx.db, "Milk", dec!(25)).await;
    let variant = seed_variant(&ctx.db, &depot, &product, dec!(25), 20).await;

    let mut item = simple_item(dec!(100), 5);
    item.product_id = Some(product.id);
    item.variant_id = Some(variant.id);

    let created = ctx
        .services
        .orders
        .create_order(create_request(vec![item], Decimal::ZERO))
        .await
        .expect("order created");
    let item_id = created.order.items[0].id;

    let before = stock_ledger::Entity::find().count(&*ctx.db).await.unwrap();

    let updated = ctx
        .services
        .orders
        .update_item_quantity(created.order.id, item_id, 2, None)
        .await
        .expect("quantity reduced");

    assert_eq!(updated.items[0].quantity, 2);
    assert_eq!(updated.subtotal, dec!(200));

    let after = stock_ledger::Entity::find().count(&*ctx.db).await.unwrap();
    assert_eq!(after, before, "decreases write no ledger entries");

    let cached = dailybasket_api::entities::depot_product_variant::Entity::find_by_id(variant.id)
        .one(&*ctx.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.closing_qty, 15, "stock stays issued");
}

#[tokio::test]
async fn cancelled_items_cannot_change_quantity() {
    let ctx = setup().await;
    seed_depot(&ctx.db, "Central", true).await;

    let created = ctx
        .services
        .orders
        .create_order(create_request(vec![simple_item(dec!(100), 2)], Decimal::ZERO))
        .await
        .expect("order created");
    let item_id = created.order.items[0].id;

    ctx.services
        .orders
        .toggle_item_cancellation(created.order.id, item_id, true, None)
        .await
        .expect("cancelled");

    let result = ctx
        .services
        .orders
        .update_item_quantity(created.order.id, item_id, 5, None)
        .await;
    assert_matches!(result, Err(ServiceError::ImmutableCancelledItem(id)) if id == item_id);
}

#[tokio::test]
async fn negative_quantity_is_rejected() {
    let ctx = setup().await;
    seed_depot(&ctx.db, "Central", true).await;

    let created = ctx
        .services
        .orders
        .create_order(create_request(vec![simple_item(dec!(100), 2)], Decimal::ZERO))
        .await
        .expect("order created");
    let item_id = created.order.items[0].id;

    let result = ctx
        .services
        .orders
        .update_item_quantity(created.order.id, item_id, -1, None)
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn cancellation_excludes_and_restoring_readds_the_line() {
    let ctx = setup().await;
    seed_depot(&ctx.db, "Central", true).await;

    let created = ctx
        .services
        .orders
        .create_order(create_request(
            vec![simple_item(dec!(100), 2), simple_item(dec!(50), 1)],
            dec!(10),
        ))
        .await
        .expect("order created");
    assert_eq!(created.order.subtotal, dec!(250));
    let second_item = created
        .order
        .items
        .iter()
        .find(|i| i.price == dec!(50))
        .expect("second line present")
        .id;

    let cancelled = ctx
        .services
        .orders
        .toggle_item_cancellation(created.order.id, second_item, true, None)
        .await
        .expect("cancelled");
    assert_eq!(cancelled.subtotal, dec!(200));
    assert_eq!(cancelled.total_amount, dec!(210));
    assert_eq!(cancelled.items.len(), 2, "cancelled line is retained");

    let restored = ctx
        .services
        .orders
        .toggle_item_cancellation(created.order.id, second_item, false, None)
        .await
        .expect("restored");
    assert_eq!(restored.subtotal, dec!(250));

    let ledger_writes = stock_ledger::Entity::find().count(&*ctx.db).await.unwrap();
    assert_eq!(ledger_writes, 0, "cancellation never touches the stock ledger");
}

#[tokio::test]
async fn payment_status_machine_is_enforced() {
    let ctx = setup().await;
    seed_depot(&ctx.db, "Central", true).await;

    let created = ctx
        .services
        .orders
        .create_order(create_request(vec![simple_item(dec!(100), 1)], Decimal::ZERO))
        .await
        .expect("order created");

    let paid = ctx
        .services
        .orders
        .mark_paid(
            created.order.id,
            MarkPaidRequest {
                payment_mode: Some("UPI".to_string()),
                payment_reference: Some("TXN-991".to_string()),
                payment_date: None,
                acting_user: None,
            },
        )
        .await
        .expect("marked paid");
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert_eq!(paid.payment_mode.as_deref(), Some("UPI"));
    assert!(paid.payment_date.is_some());

    // Paid again is not a legal transition.
    let again = ctx
        .services
        .orders
        .mark_paid(
            created.order.id,
            MarkPaidRequest {
                payment_mode: None,
                payment_reference: None,
                payment_date: None,
                acting_user: None,
            },
        )
        .await;
    assert_matches!(again, Err(ServiceError::InvalidStatusTransition(_)));

    let cancelled = ctx
        .services
        .orders
        .update_payment_status(created.order.id, PaymentStatus::Cancelled, None)
        .await
        .expect("paid orders may cancel");
    assert_eq!(cancelled.payment_status, PaymentStatus::Cancelled);

    let out_of_cancelled = ctx
        .services
        .orders
        .update_payment_status(created.order.id, PaymentStatus::Paid, None)
        .await;
    assert_matches!(
        out_of_cancelled,
        Err(ServiceError::InvalidStatusTransition(_))
    );
}

#[tokio::test]
async fn totals_invariants_hold_after_every_mutation() {
    let ctx = setup().await;
    seed_depot(&ctx.db, "Central", true).await;
    let member = seed_member(&ctx.db, dec!(1000)).await;

    let mut request = create_request(vec![simple_item(dec!(37.50), 3)], dec!(15));
    request.member_id = Some(member.id);
    request.wallet_amount = dec!(60);
    let created = ctx
        .services
        .orders
        .create_order(request)
        .await
        .expect("order created");

    let assert_invariants = |o: &dailybasket_api::services::orders::OrderResponse| {
        assert_eq!(o.total_amount, (o.subtotal + o.delivery_fee).round_dp(2));
        assert_eq!(
            o.payable_amount,
            (o.total_amount - o.wallet_amount_applied).max(Decimal::ZERO)
        );
    };
    assert_invariants(&created.order);

    let after_add = ctx
        .services
        .orders
        .add_item(
            created.order.id,
            AddItemRequest {
                product_id: None,
                variant_id: None,
                name: Some("Ghee".to_string()),
                variant_name: None,
                price: Some(dec!(450)),
                quantity: 1,
                acting_user: None,
            },
        )
        .await
        .expect("item added");
    assert_invariants(&after_add);

    let item_id = after_add.items[0].id;
    let after_update = ctx
        .services
        .orders
        .update_item_quantity(created.order.id, item_id, 1, None)
        .await
        .expect("quantity updated");
    assert_invariants(&after_update);

    let after_toggle = ctx
        .services
        .orders
        .toggle_item_cancellation(created.order.id, item_id, true, None)
        .await
        .expect("cancelled");
    assert_invariants(&after_toggle);
}

#[tokio::test]
async fn order_items_survive_in_snapshot_reads() {
    let ctx = setup().await;
    seed_depot(&ctx.db, "Central", true).await;

    let created = ctx
        .services
        .orders
        .create_order(create_request(
            vec![simple_item(dec!(10), 1), simple_item(dec!(20), 2)],
            Decimal::ZERO,
        ))
        .await
        .expect("order created");

    let fetched = ctx
        .services
        .orders
        .get_order(created.order.id)
        .await
        .expect("fetched");
    assert_eq!(fetched.items.len(), 2);

    let listed = ctx
        .services
        .orders
        .list_orders(1, 20)
        .await
        .expect("listed");
    assert_eq!(listed.total, 1);
    assert_eq!(listed.orders[0].items.len(), 2);

    let raw_items = order_item::Entity::find().count(&*ctx.db).await.unwrap();
    assert_eq!(raw_items, 2);
}

#[tokio::test]
async fn empty_or_malformed_orders_are_rejected() {
    let ctx = setup().await;
    seed_depot(&ctx.db, "Central", true).await;

    let result = ctx
        .services
        .orders
        .create_order(create_request(vec![], Decimal::ZERO))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));

    let mut bad_item = simple_item(dec!(10), 1);
    bad_item.name = "  ".to_string();
    let result = ctx
        .services
        .orders
        .create_order(create_request(vec![bad_item], Decimal::ZERO))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));

    let result = ctx
        .services
        .orders
        .create_order(create_request(vec![simple_item(dec!(-5), 1)], Decimal::ZERO))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));

    let mut no_customer = create_request(vec![simple_item(dec!(10), 1)], Decimal::ZERO);
    no_customer.customer.name = String::new();
    let result = ctx.services.orders.create_order(no_customer).await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}
