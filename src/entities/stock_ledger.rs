use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only stock movement. Entries are never updated or deleted;
/// on-hand quantity for a (product, variant, depot) tuple is always the sum
/// of received minus issued over all of its entries.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_ledger")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Uuid,
    pub depot_id: Uuid,
    pub transaction_date: DateTime<Utc>,
    pub received_qty: i32,
    pub issued_qty: i32,
    /// Originating workflow tag, e.g. "order", "order-edit", "adjustment".
    pub module: String,
    /// Originating order id, when the movement came from an order.
    #[sea_orm(nullable)]
    pub foreign_key: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::depot_product_variant::Entity",
        from = "Column::VariantId",
        to = "super::depot_product_variant::Column::Id"
    )]
    Variant,
}

impl Related<super::depot_product_variant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Variant.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();
        if let ActiveValue::NotSet = active_model.created_at {
            active_model.created_at = Set(now);
        }
        if let ActiveValue::NotSet = active_model.transaction_date {
            active_model.transaction_date = Set(now);
        }
        Ok(active_model)
    }
}
