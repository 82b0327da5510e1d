pub mod depot;
pub mod depot_product_variant;
pub mod member;
pub mod order;
pub mod order_item;
pub mod product;
pub mod sequence_counter;
pub mod stock_ledger;
pub mod wallet_transaction;
