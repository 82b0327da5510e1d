#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use tempfile::TempDir;
use uuid::Uuid;

use dailybasket_api::{
    config::AppConfig,
    entities::{depot, depot_product_variant, member, product},
    events,
    handlers::AppServices,
    migrator::Migrator,
};
use sea_orm_migration::MigratorTrait;

/// Test harness backed by an in-memory SQLite database.
///
/// The pool is pinned to a single connection so the in-memory database is
/// shared across all statements; each harness gets a fresh database, so
/// tests stay independent and parallel-safe.
pub struct TestContext {
    pub db: Arc<DatabaseConnection>,
    pub services: AppServices,
    pub config: AppConfig,
    _invoice_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

pub async fn setup() -> TestContext {
    setup_with_invoice_prefix(None).await
}

pub async fn setup_with_invoice_prefix(invoice_prefix: Option<&str>) -> TestContext {
    let mut opts = ConnectOptions::new("sqlite::memory:".to_string());
    opts.max_connections(1)
        .min_connections(1)
        .idle_timeout(Duration::from_secs(3600))
        .sqlx_logging(false);

    let db = Arc::new(Database::connect(opts).await.expect("sqlite connect"));
    Migrator::up(&*db, None).await.expect("migrations");

    let invoice_dir = TempDir::new().expect("invoice temp dir");
    let mut config = AppConfig::new("sqlite::memory:", "test");
    config.invoice_output_dir = invoice_dir.path().to_string_lossy().into_owned();
    config.invoice_prefix = invoice_prefix.map(|p| p.to_string());

    let (event_sender, event_receiver) = events::channel();
    let event_task = tokio::spawn(events::process_events(event_receiver));

    let services = AppServices::new(db.clone(), Arc::new(event_sender), &config);

    TestContext {
        db,
        services,
        config,
        _invoice_dir: invoice_dir,
        _event_task: event_task,
    }
}

pub async fn seed_depot(db: &DatabaseConnection, name: &str, is_default: bool) -> depot::Model {
    depot::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        address: Set(None),
        is_default: Set(is_default),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed depot")
}

pub async fn seed_member(db: &DatabaseConnection, balance: Decimal) -> member::Model {
    member::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Asha Rao".to_string()),
        mobile: Set("9876500000".to_string()),
        email: Set(None),
        wallet_balance: Set(balance),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed member")
}

pub async fn seed_product(db: &DatabaseConnection, name: &str, price: Decimal) -> product::Model {
    product::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        unit: Set(Some("500ml".to_string())),
        price: Set(price),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed product")
}

pub async fn seed_variant(
    db: &DatabaseConnection,
    depot: &depot::Model,
    product: &product::Model,
    price: Decimal,
    closing_qty: i32,
) -> depot_product_variant::Model {
    depot_product_variant::ActiveModel {
        id: Set(Uuid::new_v4()),
        depot_id: Set(depot.id),
        product_id: Set(product.id),
        name: Set(format!("{} (depot pack)", product.name)),
        unit: Set(product.unit.clone()),
        price: Set(price),
        closing_qty: Set(closing_qty),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed variant")
}
